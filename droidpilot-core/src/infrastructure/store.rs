//! Persists finished tasks as JSON session records for later diagnosis.
//! Store failures are reported, never allowed to fail the task itself.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::application::agent::TaskReport;
use crate::domain::Transcript;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access session record at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode session record: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode session record from {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub report: TaskReport,
    pub transcript: Transcript,
}

pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save(
        &self,
        session_id: &str,
        report: &TaskReport,
        transcript: &Transcript,
    ) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let record = SessionRecord {
            session_id: session_id.to_string(),
            saved_at: Utc::now(),
            report: report.clone(),
            transcript: transcript.clone(),
        };
        let name = format!("{}-{session_id}.json", Utc::now().format("%Y%m%d-%H%M%S"));
        let path = self.dir.join(name);
        let json =
            serde_json::to_string_pretty(&record).map_err(|source| StoreError::Encode { source })?;
        fs::write(&path, json).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), entries = transcript.len(), "Session record saved");
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<SessionRecord, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Saved record paths, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        Ok(paths)
    }
}
