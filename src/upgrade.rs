//! Lifts persisted state from older schema versions to the current one.
//!
//! Each resource kind owns an [`UpgraderChain`]: a contiguous sequence of
//! steps, one per version bump. Upgrading from version *k* runs every step
//! from *k* up to the current version in order; each step is a pure
//! function over the raw attribute map.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ProviderError;
use crate::identifier::{Identifier, IdentifierScope};
use crate::value::AttrMap;

/// One version bump of a resource kind's persisted state.
pub trait StateUpgrader: Send + Sync {
    /// The version this step upgrades from; it produces `from_version() + 1`.
    fn from_version(&self) -> u64;

    /// Transform the raw attributes.
    fn upgrade(&self, state: AttrMap) -> Result<AttrMap, ProviderError>;
}

type UpgradeFn = dyn Fn(AttrMap) -> Result<AttrMap, ProviderError> + Send + Sync;

/// A step backed by a closure.
pub struct FnUpgrader {
    from_version: u64,
    step: Arc<UpgradeFn>,
}

impl FnUpgrader {
    /// Wrap `step` as the upgrade from `from_version`.
    pub fn new<F>(from_version: u64, step: F) -> Self
    where
        F: Fn(AttrMap) -> Result<AttrMap, ProviderError> + Send + Sync + 'static,
    {
        Self {
            from_version,
            step: Arc::new(step),
        }
    }
}

impl fmt::Debug for FnUpgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnUpgrader")
            .field("from_version", &self.from_version)
            .finish_non_exhaustive()
    }
}

impl StateUpgrader for FnUpgrader {
    fn from_version(&self) -> u64 {
        self.from_version
    }

    fn upgrade(&self, state: AttrMap) -> Result<AttrMap, ProviderError> {
        (self.step)(state)
    }
}

/// The ordered upgrade steps of one resource kind.
#[derive(Default)]
pub struct UpgraderChain {
    steps: Vec<Box<dyn StateUpgrader>>,
}

impl fmt::Debug for UpgraderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let versions: Vec<u64> = self.steps.iter().map(|s| s.from_version()).collect();
        f.debug_struct("UpgraderChain")
            .field("steps", &versions)
            .finish()
    }
}

impl UpgraderChain {
    /// An empty chain (current version 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn with_step(mut self, step: impl StateUpgrader + 'static) -> Self {
        self.steps.push(Box::new(step));
        self.steps.sort_by_key(|s| s.from_version());
        self
    }

    /// Append a closure step.
    pub fn with_fn<F>(self, from_version: u64, step: F) -> Self
    where
        F: Fn(AttrMap) -> Result<AttrMap, ProviderError> + Send + Sync + 'static,
    {
        self.with_step(FnUpgrader::new(from_version, step))
    }

    /// The version the chain upgrades to.
    pub fn current_version(&self) -> u64 {
        self.steps
            .iter()
            .map(|s| s.from_version() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Upgrade `state` from version `from` to version `to`.
    ///
    /// Versions above `to` are refused. A gap in the chain is an engine
    /// defect and is reported as a plan invariant violation.
    pub fn upgrade(
        &self,
        kind: &str,
        mut state: AttrMap,
        from: u64,
        to: u64,
    ) -> Result<AttrMap, ProviderError> {
        if from > to {
            return Err(ProviderError::StateUpgrade {
                from_version: from,
                attribute: "schema_version".to_string(),
                reason: format!(
                    "is newer than this provider supports (version {}); upgrade the provider",
                    to
                ),
            });
        }
        for version in from..to {
            let step = self
                .steps
                .iter()
                .find(|s| s.from_version() == version)
                .ok_or_else(|| {
                    ProviderError::plan_invariant(
                        kind,
                        "schema_version",
                        format!("no upgrade step from version {}", version),
                    )
                })?;
            debug!(kind, from = version, to = version + 1, "upgrading state");
            state = step.upgrade(state).map_err(|e| match e {
                ProviderError::StateUpgrade { .. } => e,
                other => ProviderError::StateUpgrade {
                    from_version: version,
                    attribute: other.attribute().unwrap_or("state").to_string(),
                    reason: other.message(),
                },
            })?;
        }
        Ok(state)
    }
}

/// Fail unless `name` holds a value.
pub fn require_attribute(
    state: &AttrMap,
    from_version: u64,
    name: &str,
) -> Result<(), ProviderError> {
    match state.get(name) {
        Some(v) if !v.is_null() => Ok(()),
        _ => Err(ProviderError::StateUpgrade {
            from_version,
            attribute: name.to_string(),
            reason: "is missing".to_string(),
        }),
    }
}

/// Move `from` to `to`, keeping an existing `to` value.
pub fn rename_attribute(mut state: AttrMap, from: &str, to: &str) -> AttrMap {
    if let Some(value) = state.remove(from) {
        state.entry(to.to_string()).or_insert(value);
    }
    state
}

/// Wrap the scalar `scalar` into a single-element nested block `block`,
/// storing it under `field`.
pub fn promote_to_block(mut state: AttrMap, scalar: &str, block: &str, field: &str) -> AttrMap {
    match state.remove(scalar) {
        Some(Value::Null) | None => {},
        Some(value) => {
            let mut inner = Map::new();
            inner.insert(field.to_string(), value);
            state.insert(block.to_string(), Value::Array(vec![Value::Object(inner)]));
        },
    }
    state
}

/// Turn an ordered list into a sorted, de-duplicated set.
pub fn list_to_set(mut state: AttrMap, name: &str) -> AttrMap {
    if let Some(Value::Array(items)) = state.get_mut(name) {
        let mut keyed: Vec<(String, Value)> = items
            .drain(..)
            .map(|v| {
                let key = match &v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key, v)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);
        items.extend(keyed.into_iter().map(|(_, v)| v));
    }
    state
}

/// Re-encode the legacy identifier stored in `attribute` in the current
/// import form and refresh `fully_qualified_name`.
pub fn reshape_identifier(
    mut state: AttrMap,
    from_version: u64,
    attribute: &str,
    scope: IdentifierScope,
) -> Result<AttrMap, ProviderError> {
    let raw = match state.get(attribute) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => {
            return Err(ProviderError::StateUpgrade {
                from_version,
                attribute: attribute.to_string(),
                reason: "is missing".to_string(),
            })
        },
    };
    let id = Identifier::parse(&raw, scope).map_err(|e| ProviderError::StateUpgrade {
        from_version,
        attribute: attribute.to_string(),
        reason: format!("cannot be parsed ({})", e),
    })?;
    state.insert(attribute.to_string(), Value::String(id.import_id()));
    state.insert(
        "fully_qualified_name".to_string(),
        Value::String(id.fully_qualified_name()),
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> AttrMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn two_step_chain() -> UpgraderChain {
        UpgraderChain::new()
            .with_fn(1, |state| Ok(rename_attribute(state, "root_location", "stage")))
            .with_fn(0, |state| Ok(list_to_set(state, "roles")))
    }

    #[test]
    fn test_current_version() {
        assert_eq!(UpgraderChain::new().current_version(), 0);
        assert_eq!(two_step_chain().current_version(), 2);
    }

    #[test]
    fn test_runs_steps_in_order() {
        let state = attrs(json!({"roles": ["b", "a", "b"], "root_location": "@s"}));
        let out = two_step_chain().upgrade("snowflake_x", state, 0, 2).unwrap();
        assert_eq!(out, attrs(json!({"roles": ["a", "b"], "stage": "@s"})));
    }

    #[test]
    fn test_stepwise_upgrade_matches_direct() {
        let chain = two_step_chain();
        let raw = attrs(json!({"roles": ["b", "a", "b"], "root_location": "@s", "comment": "c"}));

        let one = chain.upgrade("snowflake_x", raw.clone(), 0, 1).unwrap();
        let stepwise = chain.upgrade("snowflake_x", one, 1, 2).unwrap();
        let direct = chain.upgrade("snowflake_x", raw, 0, 2).unwrap();
        assert_eq!(stepwise, direct);
    }

    #[test]
    fn test_same_version_is_untouched() {
        let state = attrs(json!({"roles": ["b", "a"]}));
        let out = two_step_chain().upgrade("snowflake_x", state.clone(), 2, 2).unwrap();
        assert_eq!(out, state);
    }

    #[test]
    fn test_future_version_refused() {
        let err = two_step_chain()
            .upgrade("snowflake_x", AttrMap::new(), 5, 2)
            .unwrap_err();
        assert!(matches!(err, ProviderError::StateUpgrade { from_version: 5, .. }));
    }

    #[test]
    fn test_gap_is_invariant_violation() {
        let chain = UpgraderChain::new().with_fn(1, Ok);
        let err = chain.upgrade("snowflake_x", AttrMap::new(), 0, 2).unwrap_err();
        assert!(matches!(err, ProviderError::PlanInvariant { .. }));
    }

    #[test]
    fn test_step_failure_names_attribute() {
        let chain = UpgraderChain::new().with_fn(0, |state| {
            require_attribute(&state, 0, "type")?;
            Ok(state)
        });
        let err = chain
            .upgrade("snowflake_x", AttrMap::new(), 0, 1)
            .unwrap_err();
        match err {
            ProviderError::StateUpgrade {
                from_version,
                attribute,
                ..
            } => {
                assert_eq!(from_version, 0);
                assert_eq!(attribute, "type");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_promote_to_block() {
        let state = attrs(json!({"key": "k1"}));
        let out = promote_to_block(state, "key", "keys", "value");
        assert_eq!(out, attrs(json!({"keys": [{"value": "k1"}]})));
    }

    #[test]
    fn test_reshape_identifier() {
        let state = attrs(json!({"id": "db.\"My Schema\".v"}));
        let out = reshape_identifier(state, 0, "id", IdentifierScope::Schema).unwrap();
        assert_eq!(out["id"], json!("DB|\"My Schema\"|V"));
        assert_eq!(out["fully_qualified_name"], json!("\"DB\".\"My Schema\".\"V\""));
    }

    #[test]
    fn test_reshape_identifier_rejects_garbage() {
        let state = attrs(json!({"id": "a.b"}));
        let err = reshape_identifier(state, 0, "id", IdentifierScope::Schema).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::StateUpgrade { ref attribute, .. } if attribute == "id"
        ));
    }
}
