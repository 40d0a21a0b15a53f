//! Plan, state and result types.
//!
//! [`ChangePlan`] is the engine's intended change for one resource
//! instance. The host-facing result types below wrap it (and the state it
//! produces) in the shapes carried over the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifier::Identifier;
use crate::normalizer::NormalizedView;
use crate::schema::Diagnostic;
use crate::value::{self, AttrMap};

/// The top-level action of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a new object.
    Create,
    /// Alter the live object.
    UpdateInPlace,
    /// Destroy the object and create it again.
    Recreate,
    /// Destroy the object.
    Destroy,
    /// Nothing to do.
    Noop,
}

impl Action {
    /// Whether the action issues remote mutations.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Noop)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::UpdateInPlace => "update",
            Self::Recreate => "recreate",
            Self::Destroy => "destroy",
            Self::Noop => "noop",
        };
        f.write_str(s)
    }
}

/// One per-attribute operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AttrOp {
    /// Write a value.
    Set {
        /// Attribute name.
        name: String,
        /// New value (may be the unknown placeholder).
        value: Value,
    },
    /// Clear the value at this object's level.
    Unset {
        /// Attribute name.
        name: String,
    },
    /// Carry an observed remote value into state without a mutation.
    ResetToRemote {
        /// Attribute name.
        name: String,
        /// Observed value (`null` when the remote no longer reports one).
        value: Value,
    },
    /// No change.
    Noop {
        /// Attribute name.
        name: String,
    },
}

impl AttrOp {
    /// The attribute this operation applies to.
    pub fn name(&self) -> &str {
        match self {
            Self::Set { name, .. }
            | Self::Unset { name }
            | Self::ResetToRemote { name, .. }
            | Self::Noop { name } => name,
        }
    }

    /// The value carried by the operation, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Set { value, .. } | Self::ResetToRemote { value, .. } => Some(value),
            Self::Unset { .. } | Self::Noop { .. } => None,
        }
    }

    /// Whether the operation requests a remote mutation.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Set { .. } | Self::Unset { .. })
    }
}

/// The engine's intended change for one resource instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePlan {
    /// Top-level action.
    pub action: Action,
    /// Per-attribute operations in descriptor order.
    pub ops: Vec<AttrOp>,
    /// The state expected after apply; `None` when the object goes away.
    pub planned_state: Option<AttrMap>,
    /// Attributes whose change forces recreation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_replace: Vec<String>,
    /// Recreate with `CREATE OR REPLACE ... COPY GRANTS` instead of
    /// dropping first.
    #[serde(default)]
    pub copy_grants: bool,
    /// Drift and other soft findings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Diagnostic>,
}

impl ChangePlan {
    /// A plan that keeps `state` as is.
    pub fn noop(state: Option<AttrMap>) -> Self {
        Self {
            action: Action::Noop,
            ops: Vec::new(),
            planned_state: state,
            requires_replace: Vec::new(),
            copy_grants: false,
            warnings: Vec::new(),
        }
    }

    /// Operations other than [`AttrOp::Noop`].
    pub fn changes(&self) -> impl Iterator<Item = &AttrOp> {
        self.ops.iter().filter(|op| !matches!(op, AttrOp::Noop { .. }))
    }

    /// Operations that request a remote mutation.
    pub fn mutations(&self) -> impl Iterator<Item = &AttrOp> {
        self.ops.iter().filter(|op| op.is_mutation())
    }

    /// The operation for `name`, if any.
    pub fn op(&self, name: &str) -> Option<&AttrOp> {
        self.ops.iter().find(|op| op.name() == name)
    }

    /// Whether any operation or planned value is still unknown.
    pub fn has_unknowns(&self) -> bool {
        self.ops
            .iter()
            .filter_map(AttrOp::value)
            .any(value::contains_unknown)
    }

    /// Encode for the host's private plan payload.
    pub fn to_private(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from the host's private plan payload.
    pub fn from_private(bytes: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        if bytes.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(bytes).map(Some)
    }
}

/// The state tree persisted by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PersistedState {
    /// Schema version the attributes conform to.
    #[serde(default)]
    pub version: u64,
    /// Attribute values keyed by descriptor name.
    pub attributes: AttrMap,
    /// The remote object may be incomplete; the next plan recreates it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tainted: bool,
}

impl PersistedState {
    /// State at `version` holding `attributes`.
    pub fn new(version: u64, attributes: AttrMap) -> Self {
        Self {
            version,
            attributes,
            tainted: false,
        }
    }

    /// Mark the state tainted.
    pub fn tainted(mut self) -> Self {
        self.tainted = true;
        self
    }

    /// Decode a state tree received from the host.
    ///
    /// Both the full envelope and a bare attribute map are accepted; a
    /// bare map is taken to be at `version`.
    pub fn from_raw(raw: Value, version: u64) -> Result<Option<Self>, serde_json::Error> {
        match raw {
            Value::Null => Ok(None),
            Value::Object(map) if map.get("attributes").map(Value::is_object).unwrap_or(false) => {
                serde_json::from_value(Value::Object(map)).map(Some)
            },
            Value::Object(map) => Ok(Some(Self::new(version, map))),
            other => serde_json::from_value::<Self>(other).map(Some),
        }
    }

    /// Encode for the host.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Everything known about one resource instance during a call.
#[derive(Debug, Clone, Default)]
pub struct ResourceInstance {
    /// Identifier of the remote object, once it can be derived.
    pub id: Option<Identifier>,
    /// Desired configuration.
    pub config: Option<AttrMap>,
    /// Persisted state.
    pub state: Option<PersistedState>,
    /// Normalised remote view, once fetched.
    pub remote: Option<NormalizedView>,
}

impl ResourceInstance {
    /// Whether the persisted state is tainted.
    pub fn is_tainted(&self) -> bool {
        self.state.as_ref().map(|s| s.tainted).unwrap_or(false)
    }

    /// Persisted attributes, if any.
    pub fn prior(&self) -> Option<&AttrMap> {
        self.state.as_ref().map(|s| &s.attributes)
    }
}

/// A change to a single attribute, as shown to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<Value>,
    /// The value after the change (None if unsetting).
    pub after: Option<Value>,
    /// The values must not be displayed.
    #[serde(default)]
    pub sensitive: bool,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
            sensitive: false,
        }
    }

    /// Mark the change sensitive.
    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

impl From<crate::generated::AttributeChange> for AttributeChange {
    fn from(proto: crate::generated::AttributeChange) -> Self {
        Self {
            path: proto.path,
            before: if proto.before.is_empty() {
                None
            } else {
                serde_json::from_slice(&proto.before).ok()
            },
            after: if proto.after.is_empty() {
                None
            } else {
                serde_json::from_slice(&proto.after).ok()
            },
            sensitive: proto.sensitive,
        }
    }
}

impl From<AttributeChange> for crate::generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        // Sensitive values never leave the process.
        let encode = |v: Option<Value>| {
            v.map(|v| {
                if change.sensitive {
                    serde_json::to_vec(value::REDACTED).unwrap_or_default()
                } else {
                    serde_json::to_vec(&v).unwrap_or_default()
                }
            })
            .unwrap_or_default()
        };
        Self {
            before: encode(change.before.clone()),
            after: encode(change.after.clone()),
            path: change.path,
            sensitive: change.sensitive,
        }
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The engine's plan.
    pub plan: ChangePlan,
    /// Attribute changes for display.
    pub changes: Vec<AttributeChange>,
    /// Diagnostics (warnings) produced while planning.
    pub diagnostics: Vec<Diagnostic>,
}

impl PlanResult {
    /// Wrap a plan, deriving the display changes from its operations.
    pub fn from_plan(
        plan: ChangePlan,
        prior: Option<&AttrMap>,
        sensitive: impl Fn(&str) -> bool,
    ) -> Self {
        let changes = plan
            .changes()
            .map(|op| {
                let before = prior.and_then(|p| value::get(p, op.name())).cloned();
                let after = match op {
                    AttrOp::Unset { .. } => None,
                    other => other.value().cloned().filter(|v| !v.is_null()),
                };
                AttributeChange::new(op.name(), before, after).sensitive(sensitive(op.name()))
            })
            .collect();
        let diagnostics = plan.warnings.clone();
        Self {
            plan,
            changes,
            diagnostics,
        }
    }

    /// The planned state as a JSON value.
    pub fn planned_state(&self) -> Value {
        self.plan
            .planned_state
            .clone()
            .map(Value::Object)
            .unwrap_or(Value::Null)
    }

    /// Whether the plan recreates the object.
    pub fn requires_replace(&self) -> bool {
        self.plan.action == Action::Recreate
    }
}

/// The result of an apply operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplyResult {
    /// State after apply; `None` when the object is gone.
    pub new_state: Option<PersistedState>,
    /// Diagnostics produced while applying.
    pub diagnostics: Vec<Diagnostic>,
}

/// The result of a read operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadResult {
    /// Refreshed state; `None` when the object no longer exists.
    pub state: Option<PersistedState>,
    /// Diagnostics produced while reading.
    pub diagnostics: Vec<Diagnostic>,
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: PersistedState,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: PersistedState) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Provider metadata returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// Resource types that need opting into.
    pub preview_resources: Vec<String>,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
}

/// Server capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Whether the provider supports planning destroy operations.
    pub plan_destroy: bool,
}

/// The protocol version for the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// The handshake prefix output by the provider.
pub const HANDSHAKE_PREFIX: &str = "SNOWFLAKE_PROVIDER";
