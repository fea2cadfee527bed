use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::merge;
use crate::models::{
    CaseRecord, CaseStatus, CounselorComment, DeletionLogEntry, ImprovementRecord,
    ObservationRecord, RiskDistribution, RiskLevel, ScoringRecord, Student, User,
};

const NO_GROUP: &str = "No group";
const BEHAVIOR_PREVIEW_CHARS: usize = 50;

/// Counts the current risk label of each student; older scorings are ignored.
pub fn risk_distribution(scorings: &[ScoringRecord]) -> RiskDistribution {
    let mut distribution = RiskDistribution::default();

    for record in merge::latest_per_student(scorings).values() {
        match record.risk_level {
            RiskLevel::Low => distribution.low += 1,
            RiskLevel::Medium => distribution.medium += 1,
            RiskLevel::High => distribution.high += 1,
        }
    }

    distribution
}

pub fn observations_by_group(
    students: &[Student],
    observations: &[ObservationRecord],
) -> BTreeMap<String, usize> {
    let groups: std::collections::HashMap<uuid::Uuid, &str> = students
        .iter()
        .map(|student| (student.id, student.group_name.as_str()))
        .collect();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();

    for observation in observations {
        let group = match groups.get(&observation.student_id) {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => NO_GROUP.to_string(),
        };
        *counts.entry(group).or_insert(0) += 1;
    }

    counts
}

pub fn case_status_counts(cases: &[CaseRecord]) -> BTreeMap<&'static str, usize> {
    let mut counts: BTreeMap<&'static str, usize> = [
        CaseStatus::Open,
        CaseStatus::InProgress,
        CaseStatus::Closed,
    ]
    .iter()
    .map(|status| (status.as_str(), 0))
    .collect();

    for case in cases {
        *counts.entry(case.status.as_str()).or_insert(0) += 1;
    }

    counts
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

pub fn build_global_report(
    generated_on: NaiveDate,
    users: &[User],
    students: &[Student],
    observations: &[ObservationRecord],
    scorings: &[ScoringRecord],
    cases: &[CaseRecord],
    deletions: &[DeletionLogEntry],
) -> String {
    let active_students: Vec<Student> = students
        .iter()
        .filter(|student| student.is_active())
        .cloned()
        .collect();
    let observations = merge::retain_active(observations, students);
    let scorings = merge::retain_active(scorings, students);
    let active_ids: std::collections::HashSet<uuid::Uuid> =
        active_students.iter().map(|student| student.id).collect();
    let cases: Vec<CaseRecord> = cases
        .iter()
        .filter(|case| active_ids.contains(&case.student_id))
        .cloned()
        .collect();

    let distribution = risk_distribution(&scorings);
    let groups = observations_by_group(&active_students, &observations);
    let statuses = case_status_counts(&cases);

    let mut output = String::new();

    let _ = writeln!(output, "# Behavior Early Warning Report");
    let _ = writeln!(output, "Generated on {}", generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Totals");
    let _ = writeln!(output, "- Users: {}", users.len());
    let _ = writeln!(output, "- Students: {}", active_students.len());
    let _ = writeln!(output, "- Observations: {}", observations.len());

    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Distribution");
    let _ = writeln!(output, "- High: {}", distribution.high);
    let _ = writeln!(output, "- Medium: {}", distribution.medium);
    let _ = writeln!(output, "- Low: {}", distribution.low);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Observations by Group");
    if groups.is_empty() {
        let _ = writeln!(output, "No observations recorded.");
    } else {
        for (group, count) in groups.iter() {
            let _ = writeln!(output, "- {}: {}", group, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Cases by Status");
    for (status, count) in statuses.iter() {
        let _ = writeln!(output, "- {}: {}", status, count);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Removed Students");
    if deletions.is_empty() {
        let _ = writeln!(output, "No students removed.");
    } else {
        let mut recent = deletions.to_vec();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for entry in recent.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}) on {}",
                entry.student_name,
                entry.group_name.as_deref().unwrap_or(NO_GROUP),
                entry.created_at.date_naive()
            );
        }
    }

    output
}

pub struct StudentReportData<'a> {
    pub student: &'a Student,
    pub observations: &'a [ObservationRecord],
    pub scorings: &'a [ScoringRecord],
    pub improvements: &'a [ImprovementRecord],
    pub comments: &'a [CounselorComment],
    pub case: Option<&'a CaseRecord>,
}

pub fn build_student_report(generated_on: NaiveDate, data: &StudentReportData<'_>) -> String {
    let student = data.student;
    let mut output = String::new();

    let _ = writeln!(output, "# Student Report: {}", student.full_name);
    let _ = writeln!(output, "Generated on {}", generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Student");
    let _ = writeln!(output, "- Group: {}", student.group_name);
    if let Some(age) = student.age {
        let _ = writeln!(output, "- Age: {}", age);
    }
    if let Some(context) = student.family_context.as_deref() {
        let _ = writeln!(output, "- Family context: {}", context);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Assessment");
    match merge::latest_for(data.scorings, student.id) {
        Some(scoring) => {
            let _ = writeln!(
                output,
                "- Risk level: {} (score {:.1})",
                scoring.risk_level.as_str().to_uppercase(),
                scoring.score
            );
            if let Some(breakdown) = &scoring.breakdown {
                let _ = writeln!(output, "- Attention average: {:.1}", breakdown.attention_avg);
                let _ = writeln!(
                    output,
                    "- Social interaction average: {:.1}",
                    breakdown.social_interaction_avg
                );
                let _ = writeln!(
                    output,
                    "- Instruction following average: {:.1}",
                    breakdown.instruction_following_avg
                );
                let _ = writeln!(
                    output,
                    "- Concentration average: {:.1}",
                    breakdown.concentration_avg
                );
                let _ = writeln!(
                    output,
                    "- Observations analyzed: {}",
                    breakdown.observations_analyzed
                );
            }
        }
        None => {
            let _ = writeln!(output, "Not scored yet.");
        }
    }

    if let Some(case) = data.case {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Case");
        let _ = writeln!(output, "- Status: {}", case.status.as_str().to_uppercase());
        let _ = writeln!(output, "- Last updated: {}", case.updated_at.date_naive());
        if let Some(notes) = case.notes.as_deref() {
            let _ = writeln!(output, "- Notes: {}", notes);
        }
    }

    let observations = merge::history_for(data.observations, student.id);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Observations ({})", observations.len());
    if observations.is_empty() {
        let _ = writeln!(output, "No observations recorded.");
    } else {
        let _ = writeln!(
            output,
            "| # | Behavior | Attention | Social | Following | Concentration | Date |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|");
        for (index, observation) in observations.iter().enumerate() {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {}/5 | {}/5 | {}/5 | {} |",
                index + 1,
                preview(&observation.behavior, BEHAVIOR_PREVIEW_CHARS),
                observation.attention_level,
                observation.social_interaction,
                observation.instruction_following,
                observation.concentration,
                observation.display_date()
            );
        }
    }

    let improvements = merge::history_for(data.improvements, student.id);
    if !improvements.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Improvements ({})", improvements.len());
        for improvement in improvements {
            let _ = writeln!(output, "- {}: {}", improvement.noted_on, improvement.note);
        }
    }

    let comments = merge::history_for(data.comments, student.id);
    if !comments.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Counselor Comments ({})", comments.len());
        for (index, comment) in comments.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. {}: {}",
                index + 1,
                comment.created_at.date_naive(),
                comment.body
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttentionLevel, Breakdown, Role};
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).unwrap()
    }

    fn student(name: &str, group: &str) -> Student {
        Student {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            group_name: group.to_string(),
            age: Some(11),
            family_context: Some("lives with grandparents".to_string()),
            created_at: at(1),
            deleted_at: None,
        }
    }

    fn observation(student_id: Uuid, day: u32, behavior: &str) -> ObservationRecord {
        ObservationRecord {
            id: Uuid::new_v4(),
            student_id,
            teacher_id: Uuid::nil(),
            behavior: behavior.to_string(),
            attention_level: AttentionLevel::Low,
            social_interaction: 2,
            instruction_following: 2,
            concentration: 1,
            observed_on: None,
            created_at: at(day),
        }
    }

    fn scoring(student_id: Uuid, day: u32, risk_level: RiskLevel) -> ScoringRecord {
        ScoringRecord {
            id: Uuid::new_v4(),
            student_id,
            evaluator_id: Uuid::nil(),
            risk_level,
            score: 0.0,
            breakdown: None,
            created_at: at(day),
        }
    }

    #[test]
    fn distribution_counts_each_student_once() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let scorings = vec![
            scoring(first, 2, RiskLevel::High),
            scoring(first, 5, RiskLevel::Low),
            scoring(first, 3, RiskLevel::Medium),
            scoring(second, 4, RiskLevel::High),
        ];

        let distribution = risk_distribution(&scorings);
        assert_eq!(
            distribution,
            RiskDistribution {
                low: 1,
                medium: 0,
                high: 1
            }
        );
    }

    #[test]
    fn groups_fall_back_to_no_group() {
        let grouped = student("Avery Lee", "5A");
        let ungrouped = student("Kiara Patel", " ");
        let observations = vec![
            observation(grouped.id, 2, "a"),
            observation(grouped.id, 3, "b"),
            observation(ungrouped.id, 3, "c"),
        ];

        let counts = observations_by_group(&[grouped, ungrouped], &observations);
        assert_eq!(counts.get("5A"), Some(&2));
        assert_eq!(counts.get(NO_GROUP), Some(&1));
    }

    #[test]
    fn global_report_skips_removed_students() {
        let kept = student("Avery Lee", "5A");
        let mut removed = student("Jules Moreno", "5B");
        removed.deleted_at = Some(at(6));
        let users = vec![User {
            id: Uuid::new_v4(),
            email: "admin@school.example".to_string(),
            full_name: "Admin".to_string(),
            role: Role::Admin,
            active: true,
            created_at: at(1),
        }];
        let observations = vec![
            observation(kept.id, 2, "calm"),
            observation(removed.id, 2, "restless"),
        ];
        let scorings = vec![
            scoring(kept.id, 3, RiskLevel::Medium),
            scoring(removed.id, 3, RiskLevel::High),
        ];
        let deletions = vec![DeletionLogEntry {
            id: Uuid::new_v4(),
            student_name: removed.full_name.clone(),
            group_name: Some(removed.group_name.clone()),
            actor_id: None,
            created_at: at(6),
        }];

        let report = build_global_report(
            at(7).date_naive(),
            &users,
            &[kept, removed],
            &observations,
            &scorings,
            &[],
            &deletions,
        );

        assert!(report.contains("- Students: 1"));
        assert!(report.contains("- Observations: 1"));
        assert!(report.contains("- High: 0"));
        assert!(report.contains("- Medium: 1"));
        assert!(report.contains("- 5A: 1"));
        assert!(!report.contains("- 5B:"));
        assert!(report.contains("- Jules Moreno (5B) on 2026-03-06"));
    }

    #[test]
    fn student_report_lists_history_newest_first() {
        let avery = student("Avery Lee", "5A");
        let long_behavior = "x".repeat(60);
        let observations = vec![
            observation(avery.id, 2, "older note"),
            observation(avery.id, 4, &long_behavior),
        ];
        let mut current = scoring(avery.id, 5, RiskLevel::High);
        current.score = 310.0;
        current.breakdown = Some(Breakdown {
            attention_avg: 1.0,
            social_interaction_avg: 2.0,
            instruction_following_avg: 2.0,
            concentration_avg: 1.0,
            observations_analyzed: 2,
        });
        let scorings = vec![scoring(avery.id, 3, RiskLevel::Low), current];
        let improvements = vec![ImprovementRecord {
            id: Uuid::new_v4(),
            student_id: avery.id,
            teacher_id: Uuid::nil(),
            noted_on: at(6).date_naive(),
            note: "finished homework on time".to_string(),
            created_at: at(6),
        }];

        let report = build_student_report(
            at(7).date_naive(),
            &StudentReportData {
                student: &avery,
                observations: &observations,
                scorings: &scorings,
                improvements: &improvements,
                comments: &[],
                case: None,
            },
        );

        assert!(report.contains("- Risk level: HIGH (score 310.0)"));
        assert!(report.contains("- Observations analyzed: 2"));
        assert!(report.contains("## Observations (2)"));
        let newest = report.find(&format!("{}...", "x".repeat(50))).expect("truncated behavior");
        let oldest = report.find("older note").expect("older note");
        assert!(newest < oldest);
        assert!(report.contains("- 2026-03-06: finished homework on time"));
        assert!(!report.contains("## Counselor Comments"));
    }
}
