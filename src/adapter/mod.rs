//! Translation between managed objects and the client façade.
//!
//! The adapter encodes the desired configuration into a client, maps the
//! reconcile verbs, and consumes returned state back onto the object:
//! external-name annotation, observation, connection details, and the
//! durable encoded state blob.

use tracing::warn;

use crate::client::{Client, ClientBuilder};
use crate::error::Error;
use crate::meta;
use crate::resource::{ConnectionDetails, Terraformed};
use crate::state::StateV4;
use crate::workspace::lock::OperationKind;
use crate::Result;

/// Outcome of an observation tick.
#[derive(Debug, Default)]
pub struct Observation {
    pub completed: bool,
    pub exists: bool,
    pub up_to_date: bool,
    pub connection_details: ConnectionDetails,
}

/// Outcome of a create-or-update tick.
#[derive(Debug, Default)]
pub struct Update {
    pub completed: bool,
    pub connection_details: ConnectionDetails,
}

/// Build a client for a managed resource: handle from the uid, desired
/// configuration from the parameters, workspace state from the encoded
/// annotation.
pub fn client_for_resource<T: Terraformed>(builder: ClientBuilder, tr: &T) -> Result<Client> {
    let mut builder = builder
        .with_handle(tr.uid())
        .with_resource_name(tr.name())
        .with_resource_type(tr.terraform_resource_type())
        .with_resource_body(tr.get_parameters()?);

    if let Some(encoded) = meta::get_state(tr) {
        let state = StateV4::from_encoded(&encoded)?;
        builder = builder.with_state(state.serialize()?);
    }

    builder.build()
}

/// Adapter from managed objects to CLI operations.
pub struct CliAdapter {
    client: Client,
}

impl CliAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn operation_in_flight(&self) -> Result<Option<OperationKind>> {
        self.client.operation_in_flight()
    }

    /// Observe via refresh. A workspace held by another operation is not
    /// an error here: an in-flight apply means the resource exists but
    /// is not up to date (provoking an update that polls it), an
    /// in-flight destroy means up-to-date so a pending deletion
    /// timestamp triggers the delete that polls it.
    pub async fn observe<T: Terraformed>(&self, tr: &mut T) -> Result<Observation> {
        let external_name = meta::get_external_name(tr).unwrap_or_default();
        let res = match self.client.refresh(&external_name).await {
            Ok(res) => res,
            Err(e) if e.is_applying() => {
                return Ok(Observation {
                    completed: true,
                    exists: true,
                    up_to_date: false,
                    connection_details: ConnectionDetails::default(),
                })
            }
            Err(e) if e.is_destroying() => {
                return Ok(Observation {
                    completed: true,
                    exists: true,
                    up_to_date: true,
                    connection_details: ConnectionDetails::default(),
                })
            }
            Err(e) => return Err(e),
        };

        if !res.completed {
            return Ok(Observation::default());
        }

        let mut connection_details = ConnectionDetails::default();
        if let Some(state) = &res.state {
            connection_details = consume_state(state, tr)?;
        }

        Ok(Observation {
            completed: true,
            exists: res.exists,
            up_to_date: res.up_to_date,
            connection_details,
        })
    }

    /// Create or update via apply.
    pub async fn create_or_update<T: Terraformed>(&self, tr: &mut T) -> Result<Update> {
        let res = self.client.apply().await?;
        if !res.completed {
            return Ok(Update::default());
        }

        let state = res.state.ok_or_else(|| Error::Provisioner {
            message: "apply returned no state".to_string(),
        })?;
        let connection_details = consume_state(&state, tr)?;

        Ok(Update {
            completed: true,
            connection_details,
        })
    }

    /// Delete via destroy. Returns whether the destroy has completed.
    pub async fn delete<T: Terraformed>(&self, _tr: &mut T) -> Result<bool> {
        Ok(self.client.destroy().await?.completed)
    }

    /// Tear down the workspace once the managed object is gone.
    pub async fn close(&self) -> Result<()> {
        self.client.close().await
    }
}

/// Consume a fresh state document onto the managed object.
///
/// The external name is written before the state blob so a partial
/// failure still leaves enough to identify the resource. An established
/// external name is never overwritten.
pub fn consume_state<T: Terraformed>(raw: &[u8], tr: &mut T) -> Result<ConnectionDetails> {
    let state = StateV4::parse(raw)?;
    let attributes = state
        .attributes()
        .cloned()
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

    let id_field = tr.terraform_resource_id_field().to_string();
    match meta::get_external_name(tr) {
        None => {
            let id = attributes.get(&id_field).ok_or_else(|| {
                Error::Configuration(format!("state has no value for id field {:?}", id_field))
            })?;
            let id = id.as_str().ok_or_else(|| {
                Error::Configuration(format!("id field {:?} is not a string", id_field))
            })?;
            meta::set_external_name(tr, id);
        }
        Some(existing) => {
            if let Some(fresh) = attributes.get(&id_field).and_then(|v| v.as_str()) {
                if fresh != existing {
                    warn!(
                        current = %existing,
                        observed = %fresh,
                        "observed id differs from established external name, keeping the existing one"
                    );
                }
            }
        }
    }

    tr.set_observation(&attributes)?;

    let connection_details = decode_sensitive(state.sensitive_attributes())?;

    let encoded = state.encoded()?;
    meta::set_state(tr, &encoded);

    Ok(connection_details)
}

/// Decode the opaque sensitive map into connection details. String
/// values become raw bytes, anything else stays JSON-encoded.
fn decode_sensitive(sensitive: Option<&serde_json::Value>) -> Result<ConnectionDetails> {
    let mut details = ConnectionDetails::default();
    if let Some(serde_json::Value::Object(map)) = sensitive {
        for (key, value) in map {
            let bytes = match value {
                serde_json::Value::String(s) => s.clone().into_bytes(),
                other => serde_json::to_vec(other)
                    .map_err(|e| Error::StateCorruption(e.to_string()))?,
            };
            details.insert(key.clone(), bytes);
        }
    }
    Ok(details)
}
