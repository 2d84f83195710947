//! Version-4 provisioner state codec.
//!
//! The CLI reads and writes `terraform.tfstate` as a versioned JSON
//! envelope. We parse the pieces the bridge consumes (attributes,
//! sensitive attributes, the id attribute) and round-trip everything
//! else untouched. The encoded form (gzip + base64) is what survives on
//! the managed object between reconciles.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

const STATE_VERSION: u64 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateV4 {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    #[serde(default)]
    pub serial: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub outputs: serde_json::Value,
    #[serde(default)]
    pub resources: Vec<ResourceStateV4>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStateV4 {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub instances: Vec<InstanceObjectStateV4>,
}

fn default_mode() -> String {
    "managed".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceObjectStateV4 {
    #[serde(default)]
    pub schema_version: u64,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub sensitive_attributes: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl StateV4 {
    /// An empty version-4 document, used when no prior state exists.
    pub fn empty() -> Self {
        Self {
            version: STATE_VERSION,
            terraform_version: None,
            serial: 0,
            lineage: None,
            outputs: serde_json::Value::Null,
            resources: Vec::new(),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let state: StateV4 = serde_json::from_slice(data)
            .map_err(|e| Error::StateCorruption(e.to_string()))?;
        if state.version != STATE_VERSION {
            return Err(Error::StateCorruption(format!(
                "unsupported state version {}",
                state.version
            )));
        }
        Ok(state)
    }

    /// Decode the durable annotation form: base64, then gzip, then JSON.
    /// An empty input yields an empty document.
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        if encoded.is_empty() {
            return Ok(Self::empty());
        }
        let compressed = BASE64
            .decode(encoded)
            .map_err(|e| Error::StateCorruption(format!("invalid base64: {}", e)))?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(|e| Error::StateCorruption(format!("invalid gzip payload: {}", e)))?;
        Self::parse(&raw)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::StateCorruption(e.to_string()))
    }

    /// The durable annotation form: JSON, then gzip, then base64.
    pub fn encoded(&self) -> Result<String> {
        let raw = self.serialize()?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .map_err(|e| Error::StateCorruption(format!("cannot compress state: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| Error::StateCorruption(format!("cannot compress state: {}", e)))?;
        Ok(BASE64.encode(compressed))
    }

    fn first_instance(&self) -> Option<&InstanceObjectStateV4> {
        self.resources
            .iter()
            .find(|r| r.mode == "managed")
            .and_then(|r| r.instances.first())
    }

    /// Attributes of the first managed instance, if the state holds one.
    pub fn attributes(&self) -> Option<&serde_json::Value> {
        self.first_instance()
            .map(|i| &i.attributes)
            .filter(|a| a.is_object())
    }

    /// Sensitive attribute map of the first managed instance.
    pub fn sensitive_attributes(&self) -> Option<&serde_json::Value> {
        self.first_instance()
            .map(|i| &i.sensitive_attributes)
            .filter(|s| !s.is_null())
    }

    /// Look up a single attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes().and_then(|a| a.get(key))
    }

    pub fn is_empty(&self) -> bool {
        self.attributes().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{
            "version": 4,
            "terraform_version": "1.5.7",
            "serial": 3,
            "lineage": "4a67cf30",
            "resources": [{
                "mode": "managed",
                "type": "aws_vpc",
                "name": "example",
                "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
                "instances": [{
                    "schema_version": 1,
                    "attributes": {"id": "vpc-123", "cidr_block": "10.0.0.0/16"},
                    "sensitive_attributes": {"secret_token": "hunter2"}
                }]
            }]
        }"#
    }

    #[test]
    fn parses_attributes_and_sensitive_map() {
        let state = StateV4::parse(sample().as_bytes()).unwrap();
        assert_eq!(
            state.attribute("id").and_then(|v| v.as_str()),
            Some("vpc-123")
        );
        let sensitive = state.sensitive_attributes().unwrap();
        assert_eq!(
            sensitive.get("secret_token").and_then(|v| v.as_str()),
            Some("hunter2")
        );
    }

    #[test]
    fn rejects_wrong_version() {
        let err = StateV4::parse(br#"{"version": 3, "resources": []}"#).unwrap_err();
        assert!(matches!(err, Error::StateCorruption(_)));
    }

    #[test]
    fn rejects_garbage() {
        let err = StateV4::parse(b"not json").unwrap_err();
        assert!(matches!(err, Error::StateCorruption(_)));
    }

    #[test]
    fn empty_state_has_no_attributes() {
        let state = StateV4::empty();
        assert!(state.is_empty());
        assert!(state.attributes().is_none());
    }

    #[test]
    fn from_empty_encoded_builds_empty_state() {
        let state = StateV4::from_encoded("").unwrap();
        assert!(state.is_empty());
        assert_eq!(state.version, 4);
    }
}
