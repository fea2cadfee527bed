use anyhow::bail;

use crate::models::{AttentionLevel, Breakdown, ObservationRecord, RiskLevel, ScoreResult};

const ATTENTION_WEIGHT: f64 = 25.0;
const SOCIAL_WEIGHT: f64 = 20.0;
const FOLLOWING_WEIGHT: f64 = 25.0;
const CONCENTRATION_WEIGHT: f64 = 30.0;

/// Best possible average on every component.
const SCALE_MAX: f64 = 5.0;

const HIGH_THRESHOLD: f64 = 60.0;
const MEDIUM_THRESHOLD: f64 = 30.0;

/// Scores one student's observations. The weights are not normalized: an
/// all-worst profile scores 400, an all-best profile scores 0.
pub fn compute_score(observations: &[ObservationRecord]) -> ScoreResult {
    if observations.is_empty() {
        return ScoreResult {
            score: 0.0,
            risk_level: RiskLevel::Low,
            breakdown: None,
        };
    }

    let mut attention = 0.0;
    let mut social = 0.0;
    let mut following = 0.0;
    let mut concentration = 0.0;

    for observation in observations {
        attention += attention_value(observation.attention_level);
        social += observation.social_interaction as f64;
        following += observation.instruction_following as f64;
        concentration += observation.concentration as f64;
    }

    let n = observations.len();
    let count = n as f64;
    let attention = attention / count;
    let social = social / count;
    let following = following / count;
    let concentration = concentration / count;

    let raw = (SCALE_MAX - attention) * ATTENTION_WEIGHT
        + (SCALE_MAX - social) * SOCIAL_WEIGHT
        + (SCALE_MAX - following) * FOLLOWING_WEIGHT
        + (SCALE_MAX - concentration) * CONCENTRATION_WEIGHT;

    // Level is taken before rounding: 59.96 stays medium even though it shows as 60.0.
    ScoreResult {
        score: round_one(raw),
        risk_level: risk_level_for(raw),
        breakdown: Some(Breakdown {
            attention_avg: round_one(attention),
            social_interaction_avg: round_one(social),
            instruction_following_avg: round_one(following),
            concentration_avg: round_one(concentration),
            observations_analyzed: n,
        }),
    }
}

pub fn attention_value(level: AttentionLevel) -> f64 {
    match level {
        AttentionLevel::Low => 1.0,
        AttentionLevel::Medium => 3.0,
        AttentionLevel::High => 5.0,
    }
}

pub fn risk_level_for(score: f64) -> RiskLevel {
    if score >= HIGH_THRESHOLD {
        RiskLevel::High
    } else if score >= MEDIUM_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Rounds half up to one decimal place.
pub fn round_one(value: f64) -> f64 {
    (value * 10.0 + 0.5).floor() / 10.0
}

/// Checks the 1-5 ratings of an observation before it is stored.
pub fn validate_observation(
    social_interaction: i32,
    instruction_following: i32,
    concentration: i32,
) -> anyhow::Result<()> {
    for (field, value) in [
        ("social_interaction", social_interaction),
        ("instruction_following", instruction_following),
        ("concentration", concentration),
    ] {
        if !(1..=5).contains(&value) {
            bail!("{field} must be between 1 and 5, got {value}");
        }
    }
    Ok(())
}
