//! One import attempt from upload to commit. Every step is an explicit
//! operator action; nothing advances on its own.

use crate::formats::merge::MergedUpload;
use crate::formats::FormatKind;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Uploaded,
    Validated,
    Previewed,
    Aggregated,
    Loading,
    Committed,
    RolledBack,
}

impl AttemptState {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptState::Uploaded => "uploaded",
            AttemptState::Validated => "validated",
            AttemptState::Previewed => "previewed",
            AttemptState::Aggregated => "aggregated",
            AttemptState::Loading => "loading",
            AttemptState::Committed => "committed",
            AttemptState::RolledBack => "rolled_back",
        }
    }

    fn can_move_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Uploaded, Validated)
                | (Validated, Previewed)
                | (Previewed, Previewed)
                | (Previewed, Aggregated)
                | (Aggregated, Previewed)
                | (Aggregated, Loading)
                | (Loading, Committed)
                | (Loading, RolledBack)
                | (RolledBack, Previewed)
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadTransition {
    pub from: AttemptState,
    pub to: AttemptState,
}

impl fmt::Display for BadTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt is {}; cannot move to {}", self.from, self.to)
    }
}

#[derive(Debug, Clone)]
pub struct ImportAttempt {
    pub id: String,
    pub format: FormatKind,
    pub label: String,
    pub source_files: Vec<String>,
    pub upload: MergedUpload,
    pub state: AttemptState,
    /// District the last preview was computed for.
    pub previewed_district: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: String,
}

impl ImportAttempt {
    pub fn new(format: FormatKind, label: String, source_files: Vec<String>, upload: MergedUpload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            format,
            label,
            source_files,
            upload,
            state: AttemptState::Uploaded,
            previewed_district: None,
            last_error: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn advance(&mut self, next: AttemptState) -> Result<(), BadTransition> {
        if !self.state.can_move_to(next) {
            return Err(BadTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(attempt = %self.id, from = %self.state, to = %next, "attempt state");
        self.state = next;
        Ok(())
    }

    /// Failed load: record why, then return to the previewed state so the
    /// operator can retry without uploading again.
    pub fn roll_back(&mut self, reason: String) -> Result<(), BadTransition> {
        self.advance(AttemptState::RolledBack)?;
        warn!(attempt = %self.id, reason = %reason, "import rolled back");
        self.last_error = Some(reason);
        self.advance(AttemptState::Previewed)
    }

    pub fn source_label(&self) -> String {
        self.source_files.join("; ")
    }

    pub fn to_json(&self) -> Value {
        json!({
            "attemptId": self.id,
            "format": self.format.as_str(),
            "label": self.label,
            "state": self.state.as_str(),
            "sourceFiles": self.source_files,
            "uploadFile": self.upload.file_name(),
            "sha256": self.upload.sha256,
            "title": self.upload.title,
            "dataRows": self.upload.data_rows,
            "previewedDistrictId": self.previewed_district,
            "lastError": self.last_error,
            "createdAt": self.created_at,
        })
    }

    /// Deletes the working file. A file that is already gone is fine.
    pub fn remove_upload(&self) {
        if let Err(e) = std::fs::remove_file(&self.upload.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(attempt = %self.id, error = %e, "could not remove upload");
            }
        }
    }
}

/// Open attempts, keyed by attempt id.
#[derive(Debug, Default)]
pub struct AttemptRegistry {
    open: HashMap<String, ImportAttempt>,
}

impl AttemptRegistry {
    pub fn insert(&mut self, attempt: ImportAttempt) -> String {
        let id = attempt.id.clone();
        self.open.insert(id.clone(), attempt);
        id
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ImportAttempt> {
        self.open.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<ImportAttempt> {
        self.open.remove(id)
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<&ImportAttempt> {
        let mut v: Vec<&ImportAttempt> = self.open.values().collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        v
    }

    /// Drops every attempt and its working file, used when the workspace
    /// changes underneath them.
    pub fn clear(&mut self) {
        for (_, attempt) in self.open.drain() {
            attempt.remove_upload();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::Delimiter;
    use std::path::PathBuf;

    fn attempt() -> ImportAttempt {
        ImportAttempt::new(
            FormatKind::NamedColumns,
            "ELA Cycle 1".to_string(),
            vec!["a.csv".to_string(), "b.csv".to_string()],
            MergedUpload {
                path: PathBuf::from("/nonexistent/upload.csv"),
                delimiter: Delimiter::Comma,
                title: Some("ELA Cycle 1".to_string()),
                files: 2,
                data_rows: 10,
                sha256: "00".repeat(32),
            },
        )
    }

    #[test]
    fn happy_path_walks_every_state() {
        let mut a = attempt();
        for next in [
            AttemptState::Validated,
            AttemptState::Previewed,
            AttemptState::Aggregated,
            AttemptState::Loading,
            AttemptState::Committed,
        ] {
            a.advance(next).expect("transition");
        }
        assert_eq!(a.state, AttemptState::Committed);
        assert!(a.advance(AttemptState::Previewed).is_err());
    }

    #[test]
    fn states_cannot_be_skipped() {
        let mut a = attempt();
        a.advance(AttemptState::Validated).expect("validated");
        let e = a.advance(AttemptState::Loading).expect_err("skip");
        assert_eq!(e.from, AttemptState::Validated);
        assert_eq!(e.to_string(), "attempt is validated; cannot move to loading");
        assert_eq!(a.state, AttemptState::Validated);
    }

    #[test]
    fn failed_load_returns_to_previewed() {
        let mut a = attempt();
        for next in [
            AttemptState::Validated,
            AttemptState::Previewed,
            AttemptState::Aggregated,
            AttemptState::Loading,
        ] {
            a.advance(next).expect("transition");
        }
        a.roll_back("constraint failed".to_string()).expect("rollback");
        assert_eq!(a.state, AttemptState::Previewed);
        assert_eq!(a.last_error.as_deref(), Some("constraint failed"));
        a.advance(AttemptState::Aggregated).expect("retry");
    }

    #[test]
    fn listing_describes_only_pending_work() {
        let mut a = attempt();
        a.advance(AttemptState::Validated).expect("validated");
        let listed = a.to_json();
        assert_eq!(listed["state"].as_str(), Some("validated"));
        assert_eq!(listed["sourceFiles"].as_array().map(|f| f.len()), Some(2));
        assert_eq!(listed["dataRows"].as_u64(), Some(10));
        // Batch ids are only handed out by the apply response.
        assert!(listed.get("batchId").is_none());
    }

    #[test]
    fn registry_lists_and_forgets() {
        let mut reg = AttemptRegistry::default();
        let id = reg.insert(attempt());
        assert_eq!(reg.list().len(), 1);
        assert_eq!(reg.get_mut(&id).map(|a| a.source_label()), Some("a.csv; b.csv".to_string()));
        reg.clear();
        assert!(reg.get_mut(&id).is_none());
    }
}
