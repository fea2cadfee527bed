use std::cmp::Ordering;
use std::collections::HashMap;

use uuid::Uuid;

use crate::merge;
use crate::models::{CaseRecord, CaseSummary, ObservationRecord, ScoringRecord, Student};

/// One row per active student with at least one observation, riskiest first.
pub fn build_case_board(
    students: &[Student],
    observations: &[ObservationRecord],
    scorings: &[ScoringRecord],
    cases: &[CaseRecord],
) -> Vec<CaseSummary> {
    let observations = merge::retain_active(observations, students);
    let scorings = merge::retain_active(scorings, students);
    let grouped = merge::group_by_student(&observations);
    let current = merge::latest_per_student(&scorings);
    let statuses: HashMap<Uuid, &CaseRecord> =
        cases.iter().map(|case| (case.student_id, case)).collect();

    let mut board: Vec<CaseSummary> = students
        .iter()
        .filter(|student| student.is_active())
        .filter_map(|student| {
            let history = grouped.get(&student.id)?;
            let scoring = current.get(&student.id);
            Some(CaseSummary {
                student_id: student.id,
                student_name: student.full_name.clone(),
                group_name: student.group_name.clone(),
                observation_count: history.len(),
                risk_level: scoring.map(|record| record.risk_level),
                score: scoring.map(|record| record.score),
                status: statuses.get(&student.id).map(|case| case.status),
            })
        })
        .collect();

    board.sort_by(|a, b| {
        b.risk_level
            .cmp(&a.risk_level)
            .then_with(|| {
                b.score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.score.unwrap_or(0.0))
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.student_name.cmp(&b.student_name))
    });
    board
}

/// The list a counselor hands to the scorer for one student.
pub fn observations_for(observations: &[ObservationRecord], student_id: Uuid) -> Vec<ObservationRecord> {
    observations
        .iter()
        .filter(|observation| observation.student_id == student_id)
        .cloned()
        .collect()
}
