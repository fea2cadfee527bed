//! Grouping and reduction of per-student record histories.
//!
//! Every view that shows "the current" record for a student goes through
//! [`latest_per_student`]; views that need counts or full history use
//! [`group_by_student`] or [`history_for`]. Ties on `created_at` are broken by
//! the larger record id so results never depend on input order.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    CounselorComment, ImprovementRecord, ObservationRecord, ScoringRecord, Student,
};

pub trait StudentScoped {
    fn student_id(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
    fn record_id(&self) -> Uuid;
}

macro_rules! student_scoped {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StudentScoped for $ty {
                fn student_id(&self) -> Uuid {
                    self.student_id
                }

                fn created_at(&self) -> DateTime<Utc> {
                    self.created_at
                }

                fn record_id(&self) -> Uuid {
                    self.id
                }
            }
        )*
    };
}

student_scoped!(ObservationRecord, ScoringRecord, ImprovementRecord, CounselorComment);

/// Newest first; equal timestamps put the larger id first.
fn newest_first<T: StudentScoped>(a: &T, b: &T) -> Ordering {
    b.created_at()
        .cmp(&a.created_at())
        .then_with(|| b.record_id().cmp(&a.record_id()))
}

pub fn latest_per_student<T: StudentScoped>(records: &[T]) -> HashMap<Uuid, &T> {
    let mut latest: HashMap<Uuid, &T> = HashMap::new();

    for record in records {
        latest
            .entry(record.student_id())
            .and_modify(|current| {
                if newest_first(record, *current) == Ordering::Less {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    latest
}

pub fn latest_for<T: StudentScoped>(records: &[T], student_id: Uuid) -> Option<&T> {
    records
        .iter()
        .filter(|record| record.student_id() == student_id)
        .min_by(|a, b| newest_first(*a, *b))
}

pub fn history_for<T: StudentScoped>(records: &[T], student_id: Uuid) -> Vec<&T> {
    let mut history: Vec<&T> = records
        .iter()
        .filter(|record| record.student_id() == student_id)
        .collect();
    history.sort_by(|a, b| newest_first(*a, *b));
    history
}

pub fn group_by_student<T: StudentScoped>(records: &[T]) -> HashMap<Uuid, Vec<&T>> {
    let mut groups: HashMap<Uuid, Vec<&T>> = HashMap::new();

    for record in records {
        groups.entry(record.student_id()).or_default().push(record);
    }
    for history in groups.values_mut() {
        history.sort_by(|a, b| newest_first(*a, *b));
    }

    groups
}

/// Drops records belonging to tombstoned or unknown students.
pub fn retain_active<T: StudentScoped + Clone>(records: &[T], students: &[Student]) -> Vec<T> {
    let active: HashSet<Uuid> = students
        .iter()
        .filter(|student| student.is_active())
        .map(|student| student.id)
        .collect();

    records
        .iter()
        .filter(|record| active.contains(&record.student_id()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, hour, 0, 0).unwrap()
    }

    fn scoring(student_id: Uuid, created_at: DateTime<Utc>, score: f64) -> ScoringRecord {
        ScoringRecord {
            id: Uuid::new_v4(),
            student_id,
            evaluator_id: Uuid::nil(),
            risk_level: crate::risk::risk_level_for(score),
            score,
            breakdown: None,
            created_at,
        }
    }

    fn student(name: &str, deleted: bool) -> Student {
        Student {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            group_name: "5B".to_string(),
            age: None,
            family_context: None,
            created_at: at(8),
            deleted_at: deleted.then(|| at(9)),
        }
    }

    #[test]
    fn most_recent_scoring_wins_in_any_order() {
        let student_id = Uuid::new_v4();
        let t1 = scoring(student_id, at(9), 10.0);
        let t2 = scoring(student_id, at(10), 45.0);
        let t3 = scoring(student_id, at(11), 80.0);

        let orders = [
            vec![t1.clone(), t2.clone(), t3.clone()],
            vec![t3.clone(), t1.clone(), t2.clone()],
            vec![t2.clone(), t3.clone(), t1.clone()],
        ];
        for records in orders {
            let latest = latest_per_student(&records);
            assert_eq!(latest[&student_id].id, t3.id);
            assert_eq!(latest[&student_id].risk_level, RiskLevel::High);
            assert_eq!(latest_for(&records, student_id).map(|r| r.id), Some(t3.id));
        }
    }

    #[test]
    fn equal_timestamps_prefer_the_larger_id() {
        let student_id = Uuid::new_v4();
        let a = scoring(student_id, at(10), 20.0);
        let b = scoring(student_id, at(10), 70.0);
        let expected = a.id.max(b.id);

        let forward = latest_per_student(&[a.clone(), b.clone()])[&student_id].id;
        let backward = latest_per_student(&[b.clone(), a.clone()])[&student_id].id;
        assert_eq!(forward, expected);
        assert_eq!(backward, expected);
    }

    #[test]
    fn latest_is_kept_per_student() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let records = vec![
            scoring(first, at(9), 10.0),
            scoring(second, at(12), 65.0),
            scoring(first, at(13), 35.0),
            scoring(second, at(8), 5.0),
        ];

        let latest = latest_per_student(&records);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[&first].score, 35.0);
        assert_eq!(latest[&second].score, 65.0);
        assert!(latest_for(&records, Uuid::new_v4()).is_none());
    }

    #[test]
    fn history_keeps_everything_newest_first() {
        let student_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let records = vec![
            scoring(student_id, at(9), 10.0),
            scoring(other, at(10), 50.0),
            scoring(student_id, at(11), 30.0),
            scoring(student_id, at(10), 20.0),
        ];

        let history: Vec<f64> = history_for(&records, student_id)
            .iter()
            .map(|record| record.score)
            .collect();
        assert_eq!(history, vec![30.0, 20.0, 10.0]);

        let groups = group_by_student(&records);
        assert_eq!(groups[&student_id].len(), 3);
        assert_eq!(groups[&other].len(), 1);
        assert!(groups[&student_id][0].created_at >= groups[&student_id][1].created_at);
    }

    #[test]
    fn tombstoned_students_are_filtered() {
        let kept = student("Avery Lee", false);
        let removed = student("Jules Moreno", true);
        let records = vec![
            scoring(kept.id, at(9), 12.0),
            scoring(removed.id, at(9), 90.0),
            scoring(Uuid::new_v4(), at(9) + Duration::hours(1), 40.0),
        ];

        let active = retain_active(&records, &[kept.clone(), removed]);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].student_id, kept.id);
    }
}
