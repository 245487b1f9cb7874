//! Immutable payloads passed along connections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::{NodeId, RunId};
use strata_workflow::DataType;

/// The data a node produced on one output port.
///
/// Small data is carried inline as JSON. Large tabular data lives in an
/// external store and only a reference travels through the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Inline JSON value.
    Inline {
        /// The value.
        value: serde_json::Value,
    },
    /// Handle into an external store.
    Reference {
        /// Store-specific locator.
        uri: String,
        /// Size of the referenced data in bytes.
        bytes: u64,
    },
}

impl Payload {
    /// Create an inline payload.
    pub fn inline(value: serde_json::Value) -> Self {
        Self::Inline { value }
    }

    /// Create a reference payload.
    pub fn reference(uri: impl Into<String>, bytes: u64) -> Self {
        Self::Reference {
            uri: uri.into(),
            bytes,
        }
    }

    /// Returns `true` if this is an inline value.
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }

    /// Extract the inline value, if present.
    pub fn as_inline(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Inline { value } => Some(value),
            Self::Reference { .. } => None,
        }
    }

    /// Bytes attributed to this payload: the serialized length of an inline
    /// value, or the declared size of a reference.
    pub fn size_bytes(&self) -> u64 {
        match self {
            Self::Inline { value } => serde_json::to_vec(value).map_or(0, |b| b.len() as u64),
            Self::Reference { bytes, .. } => *bytes,
        }
    }
}

/// Where a packet came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    /// Producing node.
    pub producer: NodeId,
    /// Producing output port.
    pub port: String,
    /// Run the packet belongs to.
    pub run_id: RunId,
    /// Logical timestamp: publish order within the run, starting at 1.
    pub sequence: u64,
    /// Declared type of the producing port.
    pub schema: DataType,
    /// `true` when a failure policy injected this packet in place of real output.
    #[serde(default)]
    pub substituted: bool,
    /// Wall-clock publish time.
    pub produced_at: DateTime<Utc>,
}

/// A payload plus its lineage. Never mutated after publish; consumers hold
/// `Arc<DataPacket>` references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    /// The data.
    pub payload: Payload,
    /// Provenance.
    pub lineage: Lineage,
}

impl DataPacket {
    /// Inline value, if the payload is inline.
    #[must_use]
    pub fn value(&self) -> Option<&serde_json::Value> {
        self.payload.as_inline()
    }

    /// Bytes attributed to this packet.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.payload.size_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inline_payload_size_is_serialized_length() {
        let payload = Payload::inline(json!({"a": 1}));
        assert_eq!(payload.size_bytes(), br#"{"a":1}"#.len() as u64);
        assert!(payload.is_inline());
        assert_eq!(payload.as_inline(), Some(&json!({"a": 1})));
    }

    #[test]
    fn reference_payload_reports_declared_size() {
        let payload = Payload::reference("cache://run/frame-7", 4096);
        assert_eq!(payload.size_bytes(), 4096);
        assert!(!payload.is_inline());
        assert!(payload.as_inline().is_none());
    }

    #[test]
    fn payload_serde_is_tagged() {
        let json = serde_json::to_value(Payload::reference("s3://b/k", 10)).unwrap();
        assert_eq!(json, json!({"type": "reference", "uri": "s3://b/k", "bytes": 10}));
        let json = serde_json::to_value(Payload::inline(json!(5))).unwrap();
        assert_eq!(json, json!({"type": "inline", "value": 5}));
    }
}
