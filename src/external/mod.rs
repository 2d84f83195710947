//! The reconciler-facing bridge.
//!
//! Implements the Observe/Create/Update/Delete contract on top of the
//! adapter and persists the returned state blob back onto the managed
//! object through the caller-supplied object store.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::adapter::CliAdapter;
use crate::error::Error;
use crate::meta;
use crate::resource::{Condition, ConnectionDetails, Terraformed};
use crate::Result;

/// Errors surfaced by the object store (the API client behind it).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Optimistic-concurrency failure; the object changed underneath us.
    #[error("conflicting write, object has changed")]
    Conflict,
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("api failure: {0}")]
    Other(String),
}

/// Consumed interface of the API client used to persist annotations.
#[async_trait]
pub trait ObjectStore<T: Terraformed>: Send + Sync {
    /// Fetch the current revision of the object.
    async fn get(&self, name: &str) -> std::result::Result<T, ApiError>;

    /// Write the object back under optimistic concurrency.
    async fn update(&self, object: &T) -> std::result::Result<(), ApiError>;
}

#[derive(Debug, Default)]
pub struct ExternalObservation {
    pub resource_exists: bool,
    pub resource_up_to_date: bool,
    pub connection_details: ConnectionDetails,
}

#[derive(Debug, Default)]
pub struct ExternalCreation {
    pub connection_details: ConnectionDetails,
}

#[derive(Debug, Default)]
pub struct ExternalUpdate {
    pub connection_details: ConnectionDetails,
}

/// Manages the lifecycle of one terraform-backed managed resource.
pub struct External<T, S> {
    store: S,
    adapter: CliAdapter,
    persist_timeout: Duration,
    _object: PhantomData<fn() -> T>,
}

impl<T, S> External<T, S>
where
    T: Terraformed,
    S: ObjectStore<T>,
{
    pub fn new(store: S, adapter: CliAdapter) -> Self {
        Self {
            store,
            adapter,
            persist_timeout: Duration::from_secs(30),
            _object: PhantomData,
        }
    }

    /// Bound for the persist retry loop; normally the reconcile deadline.
    pub fn with_persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout = timeout;
        self
    }

    /// Observe the resource for this tick.
    pub async fn observe(&self, tr: &mut T) -> Result<ExternalObservation> {
        // Nothing recorded and nothing running: the resource was never
        // created, no need to touch the CLI.
        if meta::get_state(tr).is_none() && self.adapter.operation_in_flight()?.is_none() {
            return Ok(ExternalObservation::default());
        }

        let obs = match self.adapter.observe(tr).await {
            Ok(obs) => obs,
            Err(e) => return Err(self.record_failure(tr, e)),
        };

        if !obs.completed {
            // Observation still in flight; report converged so the
            // controller does nothing this tick.
            tr.set_conditions(Condition::creating());
            return Ok(ExternalObservation {
                resource_exists: true,
                resource_up_to_date: true,
                connection_details: ConnectionDetails::default(),
            });
        }

        if !obs.exists && meta::was_deleted(tr) {
            // The external resource is gone and the object is being
            // deleted: the workspace has no further use.
            self.adapter.close().await?;
            return Ok(ExternalObservation::default());
        }

        tr.set_conditions(Condition::available());
        Ok(ExternalObservation {
            resource_exists: obs.exists,
            resource_up_to_date: obs.up_to_date,
            connection_details: obs.connection_details,
        })
    }

    /// Create the resource. Incomplete applies report empty so the
    /// controller polls on a later tick.
    pub async fn create(&self, tr: &mut T) -> Result<ExternalCreation> {
        let up = match self.adapter.create_or_update(tr).await {
            Ok(up) => up,
            Err(e) => return Err(self.record_failure(tr, e)),
        };
        if !up.completed {
            return Ok(ExternalCreation::default());
        }

        self.persist_state(tr).await?;
        Ok(ExternalCreation {
            connection_details: up.connection_details,
        })
    }

    /// Update the resource; state is persisted only when it changed.
    pub async fn update(&self, tr: &mut T) -> Result<ExternalUpdate> {
        let prior = meta::get_state(tr);
        let up = match self.adapter.create_or_update(tr).await {
            Ok(up) => up,
            Err(e) => return Err(self.record_failure(tr, e)),
        };
        if !up.completed {
            return Ok(ExternalUpdate::default());
        }

        if meta::get_state(tr) != prior {
            self.persist_state(tr).await?;
        }
        Ok(ExternalUpdate {
            connection_details: up.connection_details,
        })
    }

    /// Delete the resource. Returns silently whether or not the destroy
    /// has completed; the reconciler re-invokes until the object is gone
    /// from the API.
    pub async fn delete(&self, tr: &mut T) -> Result<()> {
        tr.set_conditions(Condition::deleting());
        if let Err(e) = self.adapter.delete(tr).await {
            return Err(self.record_failure(tr, e));
        }
        Ok(())
    }

    /// Terminal errors are mirrored onto the object before they surface.
    fn record_failure(&self, tr: &mut T, err: Error) -> Error {
        tr.set_conditions(Condition::reconcile_error(err.to_string()));
        err
    }

    /// Write the external-name and state annotations back through the
    /// store under optimistic concurrency, retrying conflicts with
    /// exponential backoff until the persist deadline.
    async fn persist_state(&self, tr: &T) -> Result<()> {
        let state = meta::get_state(tr);
        let external_name = meta::get_external_name(tr);
        let deadline = Instant::now() + self.persist_timeout;
        let mut delay = Duration::from_millis(100);

        loop {
            match self
                .try_persist(tr.name(), state.as_deref(), external_name.as_deref())
                .await
            {
                Ok(()) => return Ok(()),
                Err(ApiError::Conflict) if Instant::now() + delay < deadline => {
                    debug!(name = tr.name(), "conflict while persisting state, retrying");
                    sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                }
                Err(e) => {
                    warn!(
                        name = tr.name(),
                        error = %e,
                        "cannot persist provisioner state; the external resource may be leaked, operator intervention required"
                    );
                    return Err(Error::Persist(e.to_string()));
                }
            }
        }
    }

    async fn try_persist(
        &self,
        name: &str,
        state: Option<&str>,
        external_name: Option<&str>,
    ) -> std::result::Result<(), ApiError> {
        let mut fresh = self.store.get(name).await?;
        if meta::get_external_name(&fresh).is_none() {
            if let Some(en) = external_name {
                meta::set_external_name(&mut fresh, en);
            }
        }
        if let Some(st) = state {
            meta::set_state(&mut fresh, st);
        }
        self.store.update(&fresh).await
    }
}
