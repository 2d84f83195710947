use crate::workspace::lock::OperationKind;

/// Errors produced while driving the provisioner CLI for a resource.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another operation holds the workspace. Callers translate this into
    /// an observation instead of surfacing it to the user.
    #[error("operation {0} is in progress")]
    OperationInProgress(OperationKind),

    /// The desired configuration cannot be turned into a valid
    /// provisioner input.
    #[error("invalid resource configuration: {0}")]
    Configuration(String),

    /// The CLI exited non-zero; `message` carries the extracted
    /// diagnostics.
    #[error("provisioner failed: {message}")]
    Provisioner { message: String },

    /// The provisioner state document could not be decoded.
    #[error("cannot parse provisioner state: {0}")]
    StateCorruption(String),

    /// A bounded operation outlived its deadline and was killed.
    #[error("operation {operation} timed out")]
    Timeout { operation: OperationKind },

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {path}: {source}")]
    Codec {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Persisting annotations onto the managed object failed after the
    /// retry budget was exhausted.
    #[error("cannot persist resource state: {0}")]
    Persist(String),
}

impl Error {
    /// The operation kind currently holding the workspace, if this is an
    /// in-progress signal.
    pub fn in_progress_kind(&self) -> Option<OperationKind> {
        match self {
            Error::OperationInProgress(kind) => Some(*kind),
            _ => None,
        }
    }

    /// True when a create or apply pipeline holds the workspace.
    pub fn is_applying(&self) -> bool {
        matches!(
            self.in_progress_kind(),
            Some(OperationKind::Create) | Some(OperationKind::Apply)
        )
    }

    /// True when a destroy pipeline holds the workspace.
    pub fn is_destroying(&self) -> bool {
        matches!(self.in_progress_kind(), Some(OperationKind::Destroy))
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Error::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn codec(path: &std::path::Path, source: serde_json::Error) -> Self {
        Error::Codec {
            path: path.display().to_string(),
            source,
        }
    }
}
