//! The managed-object contract.
//!
//! A managed resource is the user-facing declarative representation of a
//! cloud resource. The bridge only needs a narrow capability set from
//! it: identity, annotations, conditions, and the terraform-specific
//! accessors for parameters and observation.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::Result;

/// Sensitive key/value pairs surfaced to the caller after an operation.
/// Values are opaque bytes and must never be logged.
pub type ConnectionDetails = HashMap<String, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionType {
    Ready,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionReason {
    Creating,
    Deleting,
    Available,
    Unavailable,
    ReconcileError,
}

/// A status condition mirrored onto the managed object.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub condition_type: ConditionType,
    pub status: bool,
    pub reason: ConditionReason,
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    fn new(
        condition_type: ConditionType,
        status: bool,
        reason: ConditionReason,
        message: Option<String>,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason,
            message,
            last_transition_time: Utc::now(),
        }
    }

    pub fn creating() -> Self {
        Self::new(ConditionType::Ready, false, ConditionReason::Creating, None)
    }

    pub fn deleting() -> Self {
        Self::new(ConditionType::Ready, false, ConditionReason::Deleting, None)
    }

    pub fn available() -> Self {
        Self::new(ConditionType::Ready, true, ConditionReason::Available, None)
    }

    pub fn reconcile_error(message: impl Into<String>) -> Self {
        Self::new(
            ConditionType::Synced,
            false,
            ConditionReason::ReconcileError,
            Some(message.into()),
        )
    }
}

/// Core object metadata the bridge relies on.
pub trait Managed: Send + Sync {
    /// Opaque unique id; doubles as the workspace handle.
    fn uid(&self) -> &str;

    fn name(&self) -> &str;

    fn annotations(&self) -> &BTreeMap<String, String>;

    fn annotations_mut(&mut self) -> &mut BTreeMap<String, String>;

    /// Set when the object has been marked for deletion.
    fn deletion_timestamp(&self) -> Option<DateTime<Utc>>;

    fn conditions(&self) -> &[Condition];

    /// Replace the condition of the same type, or append.
    fn set_conditions(&mut self, condition: Condition);
}

/// A managed object realized through the provisioner CLI.
pub trait Terraformed: Managed {
    /// The provisioner resource kind, e.g. `aws_vpc`.
    fn terraform_resource_type(&self) -> &str;

    /// The attribute holding the external identifier.
    fn terraform_resource_id_field(&self) -> &str {
        "id"
    }

    /// Desired configuration as the resource's parameter block.
    fn get_parameters(&self) -> Result<serde_json::Value>;

    /// Write observed attributes back into the desired configuration.
    fn set_parameters(&mut self, attributes: &serde_json::Value) -> Result<()>;

    /// Publish observed attributes on the object's status.
    fn set_observation(&mut self, attributes: &serde_json::Value) -> Result<()>;
}
