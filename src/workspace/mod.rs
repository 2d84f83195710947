//! Per-resource workspace directories and the orchestration state-lock.
//!
//! Every managed resource maps to one `ws-<handle>` directory under a
//! temp root. The directory holds the generated provisioner
//! configuration, the CLI's own state file, and two bookkeeping files of
//! ours: `.xp.lock` (which operation owns the workspace) and
//! `pipeline.store` (the async result handoff).

pub mod lock;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Error;
use crate::pipeline::process;
use crate::Result;
use lock::StateLock;

pub const FILE_MAIN_CONFIG: &str = "main.tf.json";
pub const FILE_TF_STATE: &str = "terraform.tfstate";
pub const FILE_INIT_LOCK: &str = ".terraform.lock.hcl";
pub const FILE_STATE_LOCK: &str = ".xp.lock";
pub const FILE_PIPELINE_STORE: &str = "pipeline.store";
pub const PREFIX_WS_DIR: &str = "ws-";

/// Handle-keyed workspace directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    handle: String,
    path: PathBuf,
}

impl Workspace {
    pub fn new(root: &Path, handle: &str) -> Self {
        Self {
            handle: handle.to_string(),
            path: root.join(format!("{}{}", PREFIX_WS_DIR, handle)),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path).map_err(|e| Error::io(&self.path, e))
    }

    /// True once `init` has run in this workspace.
    pub fn init_lock_exists(&self) -> bool {
        self.path.join(FILE_INIT_LOCK).is_file()
    }

    pub fn state_lock_path(&self) -> PathBuf {
        self.path.join(FILE_STATE_LOCK)
    }

    pub fn store_path(&self) -> PathBuf {
        self.path.join(FILE_PIPELINE_STORE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join(FILE_MAIN_CONFIG)
    }

    pub fn tf_state_path(&self) -> PathBuf {
        self.path.join(FILE_TF_STATE)
    }

    /// Write the generated configuration. Refused while an operation is
    /// in flight: the running pipeline owns the workspace contents.
    pub fn write_config(&self, config: &[u8]) -> Result<()> {
        self.guard_not_locked()?;
        atomic_write(&self.config_path(), config)
    }

    /// Seed the CLI state file from the prior state blob. Refused while
    /// an operation is in flight.
    pub fn write_state(&self, state: &[u8]) -> Result<()> {
        self.guard_not_locked()?;
        atomic_write(&self.tf_state_path(), state)
    }

    pub fn read_state(&self) -> Result<Option<Vec<u8>>> {
        let path = self.tf_state_path();
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    pub fn read_lock(&self) -> Result<Option<StateLock>> {
        let path = self.state_lock_path();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&path, e)),
        };
        let lock = serde_json::from_slice(&raw).map_err(|e| Error::codec(&path, e))?;
        Ok(Some(lock))
    }

    pub fn write_lock(&self, lock: &StateLock) -> Result<()> {
        let path = self.state_lock_path();
        let raw = serde_json::to_vec(lock).map_err(|e| Error::codec(&path, e))?;
        atomic_write(&path, &raw)
    }

    /// Record the spawned child's pid in the state-lock so a restarted
    /// process can probe it.
    pub fn set_lock_pid(&self, pid: u32) -> Result<()> {
        let Some(mut lock) = self.read_lock()? else {
            // Lock was removed underneath us (close or expiry); nothing
            // to annotate.
            return Ok(());
        };
        lock.pid = Some(pid);
        self.write_lock(&lock)
    }

    /// Return the operation currently owning this workspace, discarding
    /// a stale lock on the way.
    ///
    /// A lock past its deadline no longer counts as running: any child
    /// still alive is signalled and the state store is removed so the
    /// caller can start fresh.
    pub fn check_operation(&self) -> Result<Option<StateLock>> {
        let Some(lock) = self.read_lock()? else {
            return Ok(None);
        };
        if !lock.expired() {
            return Ok(Some(lock));
        }
        warn!(
            handle = %self.handle,
            operation = %lock.operation,
            deadline = %lock.deadline,
            "discarding expired state-lock"
        );
        if let Some(pid) = lock.pid {
            if process::is_pid_alive(pid) {
                process::signal_term(pid);
            }
        }
        self.remove_state_store()?;
        Ok(None)
    }

    /// Delete `.xp.lock` and `pipeline.store`, leaving the generated
    /// configuration and the CLI state intact.
    pub fn remove_state_store(&self) -> Result<()> {
        remove_if_exists(&self.state_lock_path())?;
        remove_if_exists(&self.store_path())
    }

    /// Recursively remove the workspace directory.
    pub fn destroy(&self) -> Result<()> {
        debug!(handle = %self.handle, path = %self.path.display(), "destroying workspace");
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }

    fn guard_not_locked(&self) -> Result<()> {
        match self.check_operation()? {
            Some(lock) => Err(Error::OperationInProgress(lock.operation)),
            None => Ok(()),
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Write through a temp file + rename so readers never observe a
/// half-written record.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data).map_err(|e| Error::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}
