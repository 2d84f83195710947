use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of CLI operation a workspace can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Init,
    Create,
    Apply,
    Destroy,
    Refresh,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Init => "init",
            OperationKind::Create => "create",
            OperationKind::Apply => "apply",
            OperationKind::Destroy => "destroy",
            OperationKind::Refresh => "refresh",
        }
    }

    /// Create and apply both run `apply` under the hood; polling treats
    /// them as one family.
    pub fn is_applying(&self) -> bool {
        matches!(self, OperationKind::Create | OperationKind::Apply)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The orchestration state-lock persisted as `.xp.lock`.
///
/// Presence of this record marks an operation as owning the workspace.
/// The pid is filled in once a child is spawned; the deadline is the
/// wall-clock instant after which the lock is considered stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    pub operation: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub deadline: DateTime<Utc>,
}

impl StateLock {
    pub fn new(operation: OperationKind, timeout: std::time::Duration) -> Self {
        let timeout = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::days(3650));
        Self {
            operation,
            pid: None,
            deadline: Utc::now() + timeout,
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline < Utc::now()
    }
}
