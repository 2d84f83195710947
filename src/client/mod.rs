//! The per-resource client façade.
//!
//! A `Client` owns one workspace and exposes the three reconcile verbs
//! plus `close`. Verbs never block on the CLI: the first call starts a
//! pipeline and reports incomplete; later calls poll it and eventually
//! consume the result. Mutual exclusion lives in the on-disk state-lock
//! so it survives controller restarts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::pipeline::{self, process, registry::PipelineRegistry, StageSpec};
use crate::pipeline::store::StoreRecord;
use crate::state::StateV4;
use crate::workspace::lock::{OperationKind, StateLock};
use crate::workspace::Workspace;
use crate::Result;

/// Per-kind deadlines written into the state-lock.
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub init: Duration,
    pub refresh: Duration,
    pub apply: Duration,
    pub destroy: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            init: Duration::from_secs(3 * 60),
            refresh: Duration::from_secs(5 * 60),
            apply: Duration::from_secs(20 * 60),
            destroy: Duration::from_secs(20 * 60),
        }
    }
}

impl Timeouts {
    fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Init => self.init,
            OperationKind::Refresh => self.refresh,
            OperationKind::Create | OperationKind::Apply => self.apply,
            OperationKind::Destroy => self.destroy,
        }
    }
}

#[derive(Debug, Default)]
pub struct RefreshResult {
    pub completed: bool,
    pub exists: bool,
    pub up_to_date: bool,
    pub state: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct ApplyResult {
    pub completed: bool,
    pub state: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct DestroyResult {
    pub completed: bool,
}

/// Builder for a per-resource [`Client`].
pub struct ClientBuilder {
    root: PathBuf,
    registry: Option<Arc<PipelineRegistry>>,
    binary: String,
    timeouts: Timeouts,
    handle: Option<String>,
    resource_name: Option<String>,
    resource_type: Option<String>,
    resource_body: serde_json::Value,
    provider_name: Option<String>,
    provider_config: Option<Vec<u8>>,
    state: Option<Vec<u8>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            root: std::env::temp_dir(),
            registry: None,
            binary: "terraform".to_string(),
            timeouts: Timeouts::default(),
            handle: None,
            resource_name: None,
            resource_type: None,
            resource_body: serde_json::Value::Object(serde_json::Map::new()),
            provider_name: None,
            provider_config: None,
            state: None,
        }
    }

    /// Root directory under which workspaces are created.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_registry(mut self, registry: Arc<PipelineRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Name or path of the provisioner CLI binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Desired configuration injected verbatim as the resource body.
    pub fn with_resource_body(mut self, body: serde_json::Value) -> Self {
        self.resource_body = body;
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    /// Provider block contents, JSON-encoded. Carries credentials; never
    /// logged.
    pub fn with_provider_configuration(mut self, config: &[u8]) -> Self {
        self.provider_config = Some(config.to_vec());
        self
    }

    /// Prior provisioner state to seed the workspace with.
    pub fn with_state(mut self, state: Vec<u8>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> Result<Client> {
        let handle = self
            .handle
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Configuration("resource handle is required".to_string()))?;
        let resource_name = self
            .resource_name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Configuration("resource name is required".to_string()))?;
        let resource_type = self
            .resource_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Configuration("resource type is required".to_string()))?;

        let provider_config = match self.provider_config {
            Some(raw) => serde_json::from_slice(&raw).map_err(|e| {
                Error::Configuration(format!("provider configuration is not valid JSON: {}", e))
            })?,
            None => serde_json::Value::Object(serde_json::Map::new()),
        };

        let provider_name = match self.provider_name {
            Some(name) => name,
            None => {
                // Resource kinds are conventionally `<provider>_<type>`.
                let prefix = resource_type.split('_').next().unwrap_or_default();
                if prefix.is_empty() {
                    return Err(Error::Configuration(format!(
                        "cannot derive provider name from resource type {:?}",
                        resource_type
                    )));
                }
                prefix.to_string()
            }
        };

        if !self.resource_body.is_object() {
            return Err(Error::Configuration(
                "resource body must be a JSON object".to_string(),
            ));
        }

        Ok(Client {
            ws: Workspace::new(&self.root, &handle),
            registry: self
                .registry
                .unwrap_or_else(PipelineRegistry::global),
            binary: self.binary,
            timeouts: self.timeouts,
            resource_name,
            resource_type,
            resource_body: self.resource_body,
            provider_name,
            provider_config,
            state: self.state,
        })
    }
}

enum Poll {
    Idle,
    Running,
    Finished(StoreRecord),
}

/// Drives the provisioner CLI for one managed resource.
#[derive(Debug)]
pub struct Client {
    ws: Workspace,
    registry: Arc<PipelineRegistry>,
    binary: String,
    timeouts: Timeouts,
    resource_name: String,
    resource_type: String,
    resource_body: serde_json::Value,
    provider_name: String,
    provider_config: serde_json::Value,
    state: Option<Vec<u8>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn handle(&self) -> &str {
        self.ws.handle()
    }

    pub fn workspace(&self) -> &Workspace {
        &self.ws
    }

    /// The operation currently holding the workspace, if any. Stale
    /// locks are discarded on the way.
    pub fn operation_in_flight(&self) -> Result<Option<OperationKind>> {
        Ok(self.ws.check_operation()?.map(|lock| lock.operation))
    }

    /// Observe the resource: start or poll a refresh pipeline.
    pub async fn refresh(&self, external_name: &str) -> Result<RefreshResult> {
        debug!(handle = %self.handle(), external_name, "refresh requested");
        match self.poll(&[OperationKind::Refresh])? {
            Poll::Running => Ok(RefreshResult::default()),
            Poll::Finished(record) => self.consume_refresh(record),
            Poll::Idle => {
                self.start(OperationKind::Refresh, refresh_stages()).await?;
                Ok(RefreshResult::default())
            }
        }
    }

    /// Realize the desired configuration: start or poll an apply
    /// pipeline. Recorded as `create` when no prior state exists.
    pub async fn apply(&self) -> Result<ApplyResult> {
        let kind = if self.state.is_some() {
            OperationKind::Apply
        } else {
            OperationKind::Create
        };
        match self.poll(&[OperationKind::Create, OperationKind::Apply])? {
            Poll::Running => Ok(ApplyResult::default()),
            Poll::Finished(record) => self.consume_apply(record),
            Poll::Idle => {
                self.start(kind, apply_stages()).await?;
                Ok(ApplyResult::default())
            }
        }
    }

    /// Tear down the external resource: start or poll a destroy
    /// pipeline.
    pub async fn destroy(&self) -> Result<DestroyResult> {
        match self.poll(&[OperationKind::Destroy])? {
            Poll::Running => Ok(DestroyResult::default()),
            Poll::Finished(record) => {
                self.finish()?;
                if !record.succeeded {
                    return Err(Error::Provisioner {
                        message: record.error_message(),
                    });
                }
                Ok(DestroyResult { completed: true })
            }
            Poll::Idle => {
                self.start(OperationKind::Destroy, destroy_stages()).await?;
                Ok(DestroyResult::default())
            }
        }
    }

    /// Kill any running pipeline and remove the workspace. Called when
    /// the managed object is gone.
    pub async fn close(&self) -> Result<()> {
        if let Ok(Some(lock)) = self.ws.read_lock() {
            if let Some(pid) = lock.pid {
                if process::is_pid_alive(pid) {
                    info!(handle = %self.handle(), pid, "terminating running pipeline");
                    process::signal_term(pid);
                    for _ in 0..20 {
                        if !process::is_pid_alive(pid) {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    if process::is_pid_alive(pid) {
                        warn!(handle = %self.handle(), pid, "pipeline ignored TERM, killing");
                        process::signal_kill(pid);
                    }
                }
            }
        }
        self.registry.remove(self.handle());
        self.ws.destroy()
    }

    fn poll(&self, family: &[OperationKind]) -> Result<Poll> {
        let Some(lock) = self.ws.check_operation()? else {
            self.registry.remove(self.handle());
            return Ok(Poll::Idle);
        };

        if !family.contains(&lock.operation) {
            return Err(Error::OperationInProgress(lock.operation));
        }

        if let Some(status) = self.registry.status(self.handle()) {
            if !status.finished {
                return Ok(Poll::Running);
            }
        } else if let Some(pid) = lock.pid {
            if process::is_pid_alive(pid) {
                return Ok(Poll::Running);
            }
        } else {
            // Locked, no pid recorded, and nothing in this process: a
            // spawn is imminent here or in another process. The deadline
            // bounds how long this can hold.
            return Ok(Poll::Running);
        }

        match StoreRecord::read(&self.ws.store_path())? {
            Some(record) => Ok(Poll::Finished(record)),
            None => {
                warn!(
                    handle = %self.handle(),
                    operation = %lock.operation,
                    "pipeline ended without a result record, resetting"
                );
                self.finish()?;
                Ok(Poll::Idle)
            }
        }
    }

    fn consume_refresh(&self, record: StoreRecord) -> Result<RefreshResult> {
        self.finish()?;
        if !record.succeeded {
            return Err(Error::Provisioner {
                message: record.error_message(),
            });
        }

        let raw = self.ws.read_state()?;
        let parsed = match &raw {
            Some(bytes) => Some(StateV4::parse(bytes)?),
            None => None,
        };
        let exists = parsed.as_ref().map(|s| !s.is_empty()).unwrap_or(false);
        let up_to_date = record.exit_code_for("plan") == Some(0);

        info!(
            handle = %self.handle(),
            exists,
            up_to_date,
            "refresh completed"
        );
        Ok(RefreshResult {
            completed: true,
            exists,
            up_to_date,
            state: if exists { raw } else { None },
        })
    }

    fn consume_apply(&self, record: StoreRecord) -> Result<ApplyResult> {
        self.finish()?;
        if !record.succeeded {
            return Err(Error::Provisioner {
                message: record.error_message(),
            });
        }

        let raw = self.ws.read_state()?.ok_or_else(|| Error::Provisioner {
            message: "apply completed without producing a state file".to_string(),
        })?;
        // Validate before handing the blob back.
        StateV4::parse(&raw)?;

        info!(handle = %self.handle(), "apply completed");
        Ok(ApplyResult {
            completed: true,
            state: Some(raw),
        })
    }

    async fn start(&self, kind: OperationKind, stages: Vec<StageSpec>) -> Result<()> {
        self.ensure_workspace().await?;
        self.ws
            .write_lock(&StateLock::new(kind, self.timeouts.for_kind(kind)))?;
        if let Err(e) = pipeline::spawn(
            self.ws.clone(),
            Arc::clone(&self.registry),
            self.binary.clone(),
            kind,
            stages,
        ) {
            self.ws.remove_state_store()?;
            return Err(e);
        }
        Ok(())
    }

    /// Create the workspace files and run `init` once, synchronously and
    /// bounded.
    async fn ensure_workspace(&self) -> Result<()> {
        self.ws.ensure_dir()?;
        self.ws.write_config(&self.render_config()?)?;
        if let Some(state) = &self.state {
            if !state.is_empty() {
                self.ws.write_state(state)?;
            }
        }

        if !self.ws.init_lock_exists() {
            info!(handle = %self.handle(), "initializing workspace");
            self.ws.write_lock(&StateLock::new(
                OperationKind::Init,
                self.timeouts.init,
            ))?;
            let result = pipeline::run(
                &self.binary,
                self.ws.path(),
                &["init", "-input=false"],
                OperationKind::Init,
                Some(self.timeouts.init),
            )
            .await;
            self.ws.remove_state_store()?;
            let out = result?;
            if out.exit_code != 0 {
                return Err(Error::Provisioner {
                    message: out.error_message(),
                });
            }
        }
        Ok(())
    }

    /// Generate `main.tf.json`: one provider block, one resource block.
    fn render_config(&self) -> Result<Vec<u8>> {
        let mut provider = serde_json::Map::new();
        provider.insert(self.provider_name.clone(), self.provider_config.clone());

        let mut instances = serde_json::Map::new();
        instances.insert(self.resource_name.clone(), self.resource_body.clone());
        let mut resource = serde_json::Map::new();
        resource.insert(
            self.resource_type.clone(),
            serde_json::Value::Object(instances),
        );

        let mut root = serde_json::Map::new();
        root.insert("provider".to_string(), serde_json::Value::Object(provider));
        root.insert("resource".to_string(), serde_json::Value::Object(resource));

        serde_json::to_vec_pretty(&serde_json::Value::Object(root))
            .map_err(|e| Error::Configuration(e.to_string()))
    }

    fn finish(&self) -> Result<()> {
        self.ws.remove_state_store()?;
        self.registry.remove(self.handle());
        Ok(())
    }
}

fn refresh_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new(["refresh", "-input=false"]),
        StageSpec::new(["plan", "-detailed-exitcode", "-input=false"]).with_success_codes(&[0, 2]),
        StageSpec::new(["show", "-json"]),
    ]
}

fn apply_stages() -> Vec<StageSpec> {
    vec![StageSpec::new([
        "apply",
        "-auto-approve",
        "-input=false",
        "-json",
    ])]
}

fn destroy_stages() -> Vec<StageSpec> {
    vec![StageSpec::new([
        "destroy",
        "-auto-approve",
        "-input=false",
        "-json",
    ])]
}
