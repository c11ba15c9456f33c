//! Values passed between [`crate::server`] and the provider implementation,
//! plus the stdout handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;

use crate::generated as pb;

/// Protocol version announced in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// First field of the handshake line.
pub const HANDSHAKE_PREFIX: &str = "GOOGLEWORKSPACE_PROVIDER";

/// `GOOGLEWORKSPACE_PROVIDER|<version>|<addr>`, printed once the listener is bound.
pub fn handshake_line(addr: SocketAddr) -> String {
    format!("{HANDSHAKE_PREFIX}|{PROTOCOL_VERSION}|{addr}")
}

/// One top-level attribute or block that a plan would touch.
///
/// `before` is `None` when the value is being introduced, `after` is `None`
/// when it goes away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute or block name.
    pub path: String,
    /// Prior value.
    pub before: Option<Value>,
    /// Planned value.
    pub after: Option<Value>,
}

impl AttributeChange {
    /// A value that did not exist before.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: None,
            after: Some(value),
        }
    }

    /// A value that goes away.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(value),
            after: None,
        }
    }

    /// A value that changes from `before` to `after`.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(before),
            after: Some(after),
        }
    }
}

fn json_bytes(value: Option<Value>) -> Vec<u8> {
    value
        .and_then(|v| serde_json::to_vec(&v).ok())
        .unwrap_or_default()
}

impl From<AttributeChange> for pb::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: json_bytes(change.before),
            after: json_bytes(change.after),
        }
    }
}

/// Outcome of planning one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// State expected after apply; `null` for a delete.
    pub planned_state: Value,
    /// What differs from the prior state, sorted by path.
    pub changes: Vec<AttributeChange>,
    /// A `force_new` attribute changed, so apply deletes and recreates.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Nothing to do; `state` is carried through unchanged.
    pub fn no_change(state: Value) -> Self {
        Self::with_changes(state, Vec::new(), false)
    }

    /// A plan that applies `changes`.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether apply has any work to do.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// State produced by `ImportResourceState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// Type the state belongs to, e.g. `googleworkspace_group`.
    pub resource_type: String,
    /// State as read from the API.
    pub state: Value,
}

impl ImportedResource {
    /// Pair a type name with its imported state.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Answer to `GetMetadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Managed resource type names.
    pub resources: Vec<String>,
    /// Data source type names.
    pub data_sources: Vec<String>,
    /// Optional protocol features.
    pub capabilities: ServerCapabilities,
}

/// Optional protocol features the provider supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// `PlanResourceChange` accepts a null proposal and plans the delete.
    pub plan_destroy: bool,
}
