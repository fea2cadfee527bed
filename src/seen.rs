use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::merge::StudentScoped;

/// Remembers when a user last looked at a subject (e.g. "observations").
pub trait SeenStore {
    fn last_seen(&self, user_id: Uuid, subject: &str) -> Option<DateTime<Utc>>;
    fn mark_seen(&mut self, user_id: Uuid, subject: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
}

fn key(user_id: Uuid, subject: &str) -> String {
    format!("{user_id}:{subject}")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SeenFile {
    entries: HashMap<String, DateTime<Utc>>,
}

/// JSON-backed store, rewritten on every mark.
#[derive(Debug)]
pub struct FileSeenStore {
    path: PathBuf,
    state: SeenFile,
}

impl FileSeenStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let state = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            SeenFile::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }
}

impl SeenStore for FileSeenStore {
    fn last_seen(&self, user_id: Uuid, subject: &str) -> Option<DateTime<Utc>> {
        self.state.entries.get(&key(user_id, subject)).copied()
    }

    fn mark_seen(&mut self, user_id: Uuid, subject: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.state.entries.insert(key(user_id, subject), at);
        let raw = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

pub fn count_unseen<T: StudentScoped>(records: &[T], last_seen: Option<DateTime<Utc>>) -> usize {
    match last_seen {
        Some(seen) => records
            .iter()
            .filter(|record| record.created_at() > seen)
            .count(),
        None => records.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CounselorComment;
    use chrono::Duration;

    #[derive(Debug, Default)]
    struct MemorySeenStore {
        entries: HashMap<String, DateTime<Utc>>,
    }

    impl SeenStore for MemorySeenStore {
        fn last_seen(&self, user_id: Uuid, subject: &str) -> Option<DateTime<Utc>> {
            self.entries.get(&key(user_id, subject)).copied()
        }

        fn mark_seen(&mut self, user_id: Uuid, subject: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
            self.entries.insert(key(user_id, subject), at);
            Ok(())
        }
    }

    fn comment(created_at: DateTime<Utc>) -> CounselorComment {
        CounselorComment {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            counselor_id: Uuid::nil(),
            body: "family meeting scheduled".to_string(),
            created_at,
        }
    }

    #[test]
    fn unseen_counts_only_newer_records() {
        let now = Utc::now();
        let comments = vec![
            comment(now - Duration::hours(3)),
            comment(now - Duration::hours(1)),
            comment(now),
        ];
        assert_eq!(count_unseen(&comments, None), 3);
        assert_eq!(count_unseen(&comments, Some(now - Duration::hours(2))), 2);
        assert_eq!(count_unseen(&comments, Some(now)), 0);
    }

    #[test]
    fn memory_store_is_keyed_by_user_and_subject() {
        let mut store = MemorySeenStore::default();
        let user = Uuid::new_v4();
        let at = Utc::now();
        store.mark_seen(user, "comments", at).unwrap();

        assert_eq!(store.last_seen(user, "comments"), Some(at));
        assert_eq!(store.last_seen(user, "observations"), None);
        assert_eq!(store.last_seen(Uuid::new_v4(), "comments"), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!("seen-store-{}.json", Uuid::new_v4()));
        let user = Uuid::new_v4();
        let at = Utc::now();

        let mut store = FileSeenStore::open(&path).unwrap();
        assert_eq!(store.last_seen(user, "observations"), None);
        store.mark_seen(user, "observations", at).unwrap();

        let reopened = FileSeenStore::open(&path).unwrap();
        assert_eq!(reopened.last_seen(user, "observations"), Some(at));

        let _ = std::fs::remove_file(&path);
    }
}
