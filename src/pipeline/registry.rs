//! In-process registry of active pipelines.
//!
//! The registry is a fast path: it answers "is this handle busy" without
//! touching the filesystem and wakes pollers through a watch channel.
//! The `.xp.lock` on disk stays authoritative across restarts.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::workspace::lock::OperationKind;

#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub operation: OperationKind,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
}

#[derive(Debug)]
struct Entry {
    operation: OperationKind,
    started_at: DateTime<Utc>,
    done: watch::Receiver<bool>,
}

/// Marks a pipeline finished when dropped, so completion is signalled
/// even if the pipeline task panics.
#[derive(Debug)]
pub struct CompletionGuard {
    tx: watch::Sender<bool>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Debug, Default)]
pub struct PipelineRegistry {
    entries: DashMap<String, Entry>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used when a caller does not inject one.
    pub fn global() -> Arc<PipelineRegistry> {
        static GLOBAL: OnceLock<Arc<PipelineRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(PipelineRegistry::new())))
    }

    /// Register a pipeline for the handle. Fails with the kind of the
    /// running pipeline if one is still active.
    pub fn begin(
        &self,
        handle: &str,
        operation: OperationKind,
    ) -> std::result::Result<CompletionGuard, OperationKind> {
        if let Some(existing) = self.entries.get(handle) {
            if !*existing.done.borrow() {
                return Err(existing.operation);
            }
        }
        let (tx, rx) = watch::channel(false);
        self.entries.insert(
            handle.to_string(),
            Entry {
                operation,
                started_at: Utc::now(),
                done: rx,
            },
        );
        Ok(CompletionGuard { tx })
    }

    pub fn status(&self, handle: &str) -> Option<PipelineStatus> {
        self.entries.get(handle).map(|e| PipelineStatus {
            operation: e.operation,
            started_at: e.started_at,
            finished: *e.done.borrow(),
        })
    }

    /// Drop the entry once its result has been consumed.
    pub fn remove(&self, handle: &str) {
        self.entries.remove(handle);
    }

    /// Wait until the handle's pipeline signals completion. Returns
    /// immediately when no pipeline is registered.
    pub async fn wait(&self, handle: &str) {
        let mut rx = match self.entries.get(handle) {
            Some(e) => e.done.clone(),
            None => return,
        };
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_rejects_second_pipeline_until_done() {
        let registry = PipelineRegistry::new();
        let guard = registry.begin("h1", OperationKind::Apply).unwrap();

        let conflict = registry.begin("h1", OperationKind::Refresh).unwrap_err();
        assert_eq!(conflict, OperationKind::Apply);

        drop(guard);
        assert!(registry.status("h1").unwrap().finished);
        registry.begin("h1", OperationKind::Refresh).unwrap();
    }

    #[test]
    fn handles_are_independent() {
        let registry = PipelineRegistry::new();
        let _a = registry.begin("a", OperationKind::Apply).unwrap();
        let _b = registry.begin("b", OperationKind::Destroy).unwrap();
        assert_eq!(registry.status("a").unwrap().operation, OperationKind::Apply);
        assert_eq!(
            registry.status("b").unwrap().operation,
            OperationKind::Destroy
        );
    }

    #[tokio::test]
    async fn wait_returns_after_guard_drop() {
        let registry = Arc::new(PipelineRegistry::new());
        let guard = registry.begin("h", OperationKind::Refresh).unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait("h").await })
        };
        drop(guard);
        waiter.await.unwrap();
    }
}
