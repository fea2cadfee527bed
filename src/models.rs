use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionLevel {
    Low,
    Medium,
    High,
}

impl AttentionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionLevel::Low => "low",
            AttentionLevel::Medium => "medium",
            AttentionLevel::High => "high",
        }
    }
}

impl FromStr for AttentionLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(AttentionLevel::Low),
            "medium" => Ok(AttentionLevel::Medium),
            "high" => Ok(AttentionLevel::High),
            other => bail!("unknown attention level '{other}'"),
        }
    }
}

impl fmt::Display for AttentionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => bail!("unknown risk level '{other}'"),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Counselor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Counselor => "counselor",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "teacher" => Ok(Role::Teacher),
            "counselor" => Ok(Role::Counselor),
            "admin" => Ok(Role::Admin),
            other => bail!("unknown role '{other}'"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    InProgress,
    Closed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::InProgress => "in_progress",
            CaseStatus::Closed => "closed",
        }
    }
}

impl FromStr for CaseStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "open" => Ok(CaseStatus::Open),
            "in_progress" => Ok(CaseStatus::InProgress),
            "closed" => Ok(CaseStatus::Closed),
            other => bail!("unknown case status '{other}'"),
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: Uuid,
    pub full_name: String,
    pub group_name: String,
    pub age: Option<i32>,
    pub family_context: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the student has been removed; history is kept but hidden.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Student {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Removed students keep their history but take no new records.
    pub fn ensure_active(&self) -> anyhow::Result<()> {
        if let Some(deleted_at) = self.deleted_at {
            bail!(
                "student {} ({}) was removed on {}",
                self.full_name,
                self.group_name,
                deleted_at.date_naive()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ObservationRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub behavior: String,
    pub attention_level: AttentionLevel,
    pub social_interaction: i32,
    pub instruction_following: i32,
    pub concentration: i32,
    pub observed_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl ObservationRecord {
    /// Date shown to readers: when the behavior happened, else when it was entered.
    pub fn display_date(&self) -> NaiveDate {
        self.observed_on
            .unwrap_or_else(|| self.created_at.date_naive())
    }
}

/// An observation as entered, before the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub behavior: String,
    pub attention_level: AttentionLevel,
    pub social_interaction: i32,
    pub instruction_following: i32,
    pub concentration: i32,
    pub observed_on: Option<NaiveDate>,
    pub source_key: Option<String>,
}

/// Component averages behind a score, each rounded to one decimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub attention_avg: f64,
    pub social_interaction_avg: f64,
    pub instruction_following_avg: f64,
    pub concentration_avg: f64,
    pub observations_analyzed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub score: f64,
    pub risk_level: RiskLevel,
    /// `None` when no observations were analyzed.
    pub breakdown: Option<Breakdown>,
}

#[derive(Debug, Clone)]
pub struct ScoringRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub evaluator_id: Uuid,
    pub risk_level: RiskLevel,
    pub score: f64,
    pub breakdown: Option<Breakdown>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ImprovementRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub noted_on: NaiveDate,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CounselorComment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub counselor_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CaseRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub counselor_id: Uuid,
    pub status: CaseStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DeletionLogEntry {
    pub id: Uuid,
    pub student_name: String,
    pub group_name: Option<String>,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskDistribution {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

#[derive(Debug, Clone)]
pub struct CaseSummary {
    pub student_id: Uuid,
    pub student_name: String,
    pub group_name: String,
    pub observation_count: usize,
    pub risk_level: Option<RiskLevel>,
    pub score: Option<f64>,
    pub status: Option<CaseStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_parse_their_stored_text() {
        assert_eq!("medium".parse::<AttentionLevel>().unwrap(), AttentionLevel::Medium);
        assert_eq!(" HIGH ".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert_eq!("in-progress".parse::<CaseStatus>().unwrap(), CaseStatus::InProgress);
        assert_eq!("counselor".parse::<Role>().unwrap(), Role::Counselor);
        assert!("sometimes".parse::<AttentionLevel>().is_err());
        assert!("critical".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn risk_levels_order_by_severity() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }

    #[test]
    fn removed_students_refuse_new_records() {
        let mut student = Student {
            id: Uuid::new_v4(),
            full_name: "Jules Moreno".to_string(),
            group_name: "5B".to_string(),
            age: None,
            family_context: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        assert!(student.ensure_active().is_ok());

        student.deleted_at = Some(Utc::now());
        let err = student.ensure_active().unwrap_err();
        assert!(err.to_string().contains("Jules Moreno (5B) was removed"));
    }

    #[test]
    fn display_date_prefers_observed_on() {
        let created_at = Utc::now();
        let mut record = ObservationRecord {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            teacher_id: Uuid::new_v4(),
            behavior: "calm during reading".to_string(),
            attention_level: AttentionLevel::High,
            social_interaction: 4,
            instruction_following: 4,
            concentration: 4,
            observed_on: None,
            created_at,
        };
        assert_eq!(record.display_date(), created_at.date_naive());

        let observed = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        record.observed_on = Some(observed);
        assert_eq!(record.display_date(), observed);
    }
}
