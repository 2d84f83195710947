//! The `pipeline.store` handoff record.
//!
//! An async pipeline writes its result here before signalling
//! completion; a later reconcile tick (possibly in a different process)
//! consumes it. The record is the authoritative outcome once the child
//! is gone.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::workspace::atomic_write;
use crate::workspace::lock::OperationKind;
use crate::Result;

use super::output;

/// Outcome of a single CLI invocation within a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub args: Vec<String>,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout_lines: Vec<String>,
    #[serde(default)]
    pub stderr_lines: Vec<String>,
}

impl StageRecord {
    /// The subcommand this stage ran (`apply`, `plan`, ...).
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(|s| s.as_str())
    }

    pub fn error_message(&self) -> String {
        output::error_message(self.exit_code, &self.stdout_lines, &self.stderr_lines)
    }
}

/// Result of a whole pipeline, written to `pipeline.store`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRecord {
    pub operation: OperationKind,
    pub succeeded: bool,
    pub stages: Vec<StageRecord>,
    pub finished_at: DateTime<Utc>,
}

impl StoreRecord {
    /// Exit code of the first stage running the given subcommand.
    pub fn exit_code_for(&self, subcommand: &str) -> Option<i32> {
        self.stages
            .iter()
            .find(|s| s.subcommand() == Some(subcommand))
            .map(|s| s.exit_code)
    }

    /// The stage that stopped the pipeline, if any.
    pub fn failing_stage(&self) -> Option<&StageRecord> {
        if self.succeeded {
            return None;
        }
        self.stages.last()
    }

    pub fn error_message(&self) -> String {
        match self.failing_stage() {
            Some(stage) => stage.error_message(),
            None => String::new(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_vec(self).map_err(|e| Error::codec(path, e))?;
        atomic_write(path, &raw)
    }

    pub fn read(path: &Path) -> Result<Option<StoreRecord>> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(path, e)),
        };
        let record = serde_json::from_slice(&raw).map_err(|e| Error::codec(path, e))?;
        Ok(Some(record))
    }
}
