//! The three-way diff of prior state, remote view and desired
//! configuration.
//!
//! [`diff`] decides what has to happen to one resource instance:
//!
//! 1. the existence gate picks `Create`, `Destroy` or `Noop` when either
//!    side is missing
//! 2. otherwise every descriptor is classified by comparing its effective
//!    old value (what the remote reports, falling back to prior state)
//!    against its effective new value (configuration, interpreted under
//!    the descriptor's default policy)
//! 3. any real force-new change makes the action `Recreate`; any in-place
//!    change makes it `UpdateInPlace`
//!
//! The planned state produced alongside the operations is what the
//! reconciler expects to read back after apply.

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::ProviderError;
use crate::normalizer::{NormalizedView, ParameterLevel};
use crate::schema::{
    classify_change, values_equal, AttributeDescriptor, ChangeClass, Diagnostic, RemoteBinding,
    ResourceSchema,
};
use crate::types::{Action, AttrOp, ChangePlan};
use crate::value::{self, AttrMap};

/// What is known about the remote object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation<'a> {
    /// The remote was not consulted.
    NotFetched,
    /// The remote was consulted and the object does not exist.
    Absent,
    /// The remote object as normalised.
    Present(&'a NormalizedView),
}

impl<'a> Observation<'a> {
    fn view(&self) -> Option<&'a NormalizedView> {
        match self {
            Self::Present(view) => Some(view),
            _ => None,
        }
    }
}

/// Inputs of one diff.
#[derive(Debug, Clone, Copy)]
pub struct DiffInput<'a> {
    /// Persisted attributes, if the instance exists in state.
    pub prior: Option<&'a AttrMap>,
    /// Remote observation.
    pub remote: Observation<'a>,
    /// Desired configuration; `None` when the instance is being removed.
    pub desired: Option<&'a AttrMap>,
    /// The persisted state is tainted.
    pub tainted: bool,
    /// The level at which this object's parameters are set.
    pub own_level: ParameterLevel,
    /// The kind can keep grants across `CREATE OR REPLACE`.
    pub supports_copy_grants: bool,
}

impl<'a> DiffInput<'a> {
    /// Inputs for an instance with the given sides.
    pub fn new(
        prior: Option<&'a AttrMap>,
        remote: Observation<'a>,
        desired: Option<&'a AttrMap>,
    ) -> Self {
        Self {
            prior,
            remote,
            desired,
            tainted: false,
            own_level: ParameterLevel::Object,
            supports_copy_grants: false,
        }
    }

    /// Mark the prior state tainted.
    pub fn tainted(mut self, tainted: bool) -> Self {
        self.tainted = tainted;
        self
    }

    /// Set the object's own parameter level.
    pub fn at_level(mut self, level: ParameterLevel) -> Self {
        self.own_level = level;
        self
    }

    /// Allow recreation with `COPY GRANTS`.
    pub fn copy_grants(mut self, supported: bool) -> Self {
        self.supports_copy_grants = supported;
        self
    }
}

/// Diff one resource instance of kind `kind`.
///
/// An empty attribute map on either side counts as absent.
pub fn diff(
    kind: &str,
    schema: &ResourceSchema,
    input: &DiffInput<'_>,
) -> Result<ChangePlan, ProviderError> {
    let prior = input.prior.filter(|m| !m.is_empty());
    let desired = input.desired.filter(|m| !m.is_empty());
    let plan = match (prior, desired) {
        (None, None) => ChangePlan::noop(None),
        (Some(_), None) => destroy_plan(),
        (None, Some(desired)) => create_plan(schema, desired, Action::Create, input),
        (Some(_), Some(desired)) if input.remote == Observation::Absent => {
            let mut plan = create_plan(schema, desired, Action::Create, input);
            plan.warnings.push(
                Diagnostic::warning("Object no longer exists").with_detail(format!(
                    "The {} was removed outside of this provider and will be created again.",
                    kind
                )),
            );
            plan
        },
        (Some(_), Some(desired)) if input.tainted => {
            let mut plan = create_plan(schema, desired, Action::Recreate, input);
            plan.copy_grants = input.supports_copy_grants;
            plan
        },
        (Some(prior), Some(desired)) => update_plan(kind, schema, prior, desired, input)?,
    };
    debug!(
        kind,
        action = %plan.action,
        changes = plan.changes().count(),
        "diff complete"
    );
    Ok(plan)
}

fn destroy_plan() -> ChangePlan {
    ChangePlan {
        action: Action::Destroy,
        ..ChangePlan::noop(None)
    }
}

/// Every configured value becomes a `Set`; computed values are unknown.
fn create_plan(
    schema: &ResourceSchema,
    desired: &AttrMap,
    action: Action,
    input: &DiffInput<'_>,
) -> ChangePlan {
    let mut ops = Vec::with_capacity(schema.attributes.len());
    let mut planned = AttrMap::new();

    for desc in &schema.attributes {
        let name = desc.name.clone();
        if desc.is_computed() {
            planned.insert(name.clone(), value::unknown());
            ops.push(AttrOp::Noop { name });
            continue;
        }
        match value::get(desired, &name) {
            Some(v) if desc.policy.is_sentinel(v) => {
                planned.insert(name.clone(), v.clone());
                ops.push(AttrOp::Noop { name });
            },
            Some(v) => {
                planned.insert(name.clone(), v.clone());
                ops.push(AttrOp::Set {
                    name,
                    value: v.clone(),
                });
            },
            None => match &desc.default {
                Some(default) => {
                    planned.insert(name.clone(), default.clone());
                    ops.push(AttrOp::Set {
                        name,
                        value: default.clone(),
                    });
                },
                None => {
                    // Server defaults are only known once the object exists.
                    let expected = if desc.policy.absent_means_unset() || !desc.is_observable() {
                        Value::Null
                    } else {
                        value::unknown()
                    };
                    planned.insert(name.clone(), expected);
                    ops.push(AttrOp::Noop { name });
                },
            },
        }
    }

    ChangePlan {
        action,
        ops,
        planned_state: Some(planned),
        requires_replace: Vec::new(),
        copy_grants: action == Action::Recreate && input.supports_copy_grants,
        warnings: Vec::new(),
    }
}

/// The baseline the desired value is compared against.
fn effective_old<'a>(
    desc: &AttributeDescriptor,
    prior: &'a AttrMap,
    input: &DiffInput<'a>,
) -> Option<&'a Value> {
    if !desc.is_observable() {
        return value::get(prior, &desc.name);
    }
    match input.remote.view() {
        Some(view) => view.effective(desc, input.own_level),
        None => value::get(prior, &desc.name),
    }
}

/// What configuration asks for.
enum Desired<'a> {
    /// A concrete value.
    Value(&'a Value),
    /// Explicitly unset.
    Unset,
    /// Keep whatever the remote has.
    Adopt,
}

fn effective_new<'a>(desc: &'a AttributeDescriptor, desired: &'a AttrMap) -> Desired<'a> {
    match value::get(desired, &desc.name) {
        Some(v) if desc.policy.is_sentinel(v) => Desired::Unset,
        Some(v) => Desired::Value(v),
        None => match &desc.default {
            Some(default) => Desired::Value(default),
            None if desc.policy.absent_means_unset() => Desired::Unset,
            None => Desired::Adopt,
        },
    }
}

fn update_plan(
    kind: &str,
    schema: &ResourceSchema,
    prior: &AttrMap,
    desired: &AttrMap,
    input: &DiffInput<'_>,
) -> Result<ChangePlan, ProviderError> {
    let mut ops = Vec::with_capacity(schema.attributes.len());
    let mut planned = AttrMap::new();
    let mut requires_replace = Vec::new();
    let mut warnings = Vec::new();
    let mut in_place = false;

    for desc in &schema.attributes {
        let name = desc.name.clone();
        let prior_value = value::get(prior, &name);
        let old = effective_old(desc, prior, input);

        if desc.is_computed() {
            let observed = match (&desc.remote, input.remote.view()) {
                (RemoteBinding::Derived, _) | (_, None) => prior_value,
                (_, Some(view)) => view.get(&name),
            };
            planned.insert(name.clone(), observed.cloned().unwrap_or(Value::Null));
            if values_equal(desc, prior_value, observed) {
                ops.push(AttrOp::Noop { name });
            } else {
                trace!(kind, attribute = %name, "computed value drifted");
                ops.push(AttrOp::ResetToRemote {
                    name,
                    value: observed.cloned().unwrap_or(Value::Null),
                });
            }
            continue;
        }

        let new = match effective_new(desc, desired) {
            Desired::Adopt => {
                planned.insert(name.clone(), old.cloned().unwrap_or(Value::Null));
                if input.remote.view().is_some() && !values_equal(desc, prior_value, old) {
                    ops.push(AttrOp::ResetToRemote {
                        name,
                        value: old.cloned().unwrap_or(Value::Null),
                    });
                } else {
                    ops.push(AttrOp::Noop { name });
                }
                continue;
            },
            Desired::Unset => None,
            Desired::Value(v) => Some(v),
        };

        if new.map(value::contains_unknown).unwrap_or(false) {
            // Resolved at apply; a force-new change found then is an error.
            planned.insert(name.clone(), value::unknown());
            ops.push(AttrOp::Set {
                name,
                value: value::unknown(),
            });
            in_place = true;
            continue;
        }

        let class = classify_change(desc, old, new);
        let written = value::get(desired, &name).cloned();
        match class {
            ChangeClass::NoChange => {
                // Keep the user's spelling when it compares equal.
                let keep = written.or_else(|| old.cloned()).unwrap_or(Value::Null);
                planned.insert(name.clone(), keep);
                if input.remote.view().is_some()
                    && desc.is_observable()
                    && !values_equal(desc, prior_value, old)
                {
                    ops.push(AttrOp::ResetToRemote {
                        name,
                        value: old.cloned().unwrap_or(Value::Null),
                    });
                } else {
                    ops.push(AttrOp::Noop { name });
                }
            },
            ChangeClass::InPlace | ChangeClass::ForceNew => {
                if input.remote.view().is_some() && !values_equal(desc, prior_value, old) {
                    warnings.push(
                        Diagnostic::warning(format!("Attribute '{}' drifted", name))
                            .with_detail(format!(
                                "Remote value {} differs from the recorded {}; \
                                 it will be set back to {}.",
                                desc.render_value(old),
                                desc.render_value(prior_value),
                                desc.render_value(new),
                            ))
                            .with_attribute(name.clone()),
                    );
                }
                if class == ChangeClass::ForceNew {
                    requires_replace.push(name.clone());
                } else {
                    in_place = true;
                }
                let value = written.unwrap_or_else(|| new.cloned().unwrap_or(Value::Null));
                planned.insert(name.clone(), value);
                ops.push(match new {
                    Some(v) => AttrOp::Set {
                        name,
                        value: v.clone(),
                    },
                    None => AttrOp::Unset { name },
                });
            },
            ChangeClass::OnlyComputed => {
                return Err(ProviderError::plan_invariant(
                    kind,
                    &name,
                    "non-computed attribute classified as computed-only",
                ))
            },
        }
    }

    if !requires_replace.is_empty() {
        let mut plan = create_plan(schema, desired, Action::Recreate, input);
        plan.requires_replace = requires_replace;
        plan.warnings = warnings;
        return Ok(plan);
    }

    Ok(ChangePlan {
        action: if in_place {
            Action::UpdateInPlace
        } else {
            Action::Noop
        },
        ops,
        planned_state: Some(planned),
        requires_replace,
        copy_grants: false,
        warnings,
    })
}

/// Check that a plan re-derived at apply time is compatible with the one
/// shown to the user.
pub fn check_replan(
    kind: &str,
    planned: &ChangePlan,
    replanned: &ChangePlan,
) -> Result<(), ProviderError> {
    if replanned.action == Action::Recreate && planned.action != Action::Recreate {
        let attribute = replanned
            .requires_replace
            .first()
            .map(String::as_str)
            .unwrap_or("*");
        return Err(ProviderError::plan_invariant(
            kind,
            attribute,
            "value known only at apply time forces replacement, which the plan did not include",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::ParameterLevel;
    use crate::schema::{AttributeDescriptor, Equality, SemanticType, MutationClass};
    use serde_json::json;

    fn attrs(value: Value) -> AttrMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn pool_schema() -> ResourceSchema {
        ResourceSchema::new(0)
            .with_attribute(AttributeDescriptor::required_string("name").force_new().identity())
            .with_attribute(
                AttributeDescriptor::optional_int("min_instances").with_default(json!(1)),
            )
            .with_attribute(
                AttributeDescriptor::optional_int("max_instances").with_default(json!(1)),
            )
            .with_attribute(AttributeDescriptor::optional_bool("auto_resume"))
            .with_attribute(AttributeDescriptor::optional_string("comment"))
            .with_attribute(AttributeDescriptor::computed_string("owner"))
    }

    fn user_schema() -> ResourceSchema {
        ResourceSchema::new(1)
            .with_attribute(AttributeDescriptor::required_string("name").rename())
            .with_attribute(AttributeDescriptor::optional_string("default_role").case_insensitive())
            .with_attribute(AttributeDescriptor::optional_string_set("default_secondary_roles"))
            .with_attribute(AttributeDescriptor::optional_int("mins_to_unlock").sentinel_int(-1))
            .with_attribute(AttributeDescriptor::new(
                "password",
                SemanticType::SensitiveString,
                MutationClass::InPlace,
            ))
            .with_attribute(AttributeDescriptor::parameter_int(
                "statement_timeout_in_seconds",
                "STATEMENT_TIMEOUT_IN_SECONDS",
                -1,
            ))
    }

    fn streamlit_schema() -> ResourceSchema {
        ResourceSchema::new(1)
            .with_attribute(AttributeDescriptor::required_string("name").rename())
            .with_attribute(
                AttributeDescriptor::optional_string_set("external_access_integrations")
                    .force_new()
                    .with_equality(Equality::Identifier),
            )
            .with_attribute(AttributeDescriptor::optional_string("comment"))
    }

    #[test]
    fn test_empty_both_sides_is_noop() {
        let input = DiffInput::new(None, Observation::NotFetched, None);
        let plan = diff("k", &pool_schema(), &input).unwrap();
        assert_eq!(plan.action, Action::Noop);
        assert!(plan.planned_state.is_none());
    }

    #[test]
    fn test_create_sets_configured_and_defaults() {
        let desired = attrs(json!({"name": "POOL_A"}));
        let plan = diff(
            "snowflake_compute_pool",
            &pool_schema(),
            &DiffInput::new(None, Observation::NotFetched, Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Create);
        let changes: Vec<&AttrOp> = plan.changes().collect();
        assert_eq!(
            changes,
            vec![
                &AttrOp::Set {
                    name: "name".into(),
                    value: json!("POOL_A")
                },
                &AttrOp::Set {
                    name: "min_instances".into(),
                    value: json!(1)
                },
                &AttrOp::Set {
                    name: "max_instances".into(),
                    value: json!(1)
                },
            ]
        );
        let planned = plan.planned_state.unwrap();
        assert!(value::is_unknown(&planned["owner"]));
        assert!(value::is_unknown(&planned["auto_resume"]));
    }

    #[test]
    fn test_destroy() {
        let prior = attrs(json!({"name": "POOL_A"}));
        let plan = diff(
            "k",
            &pool_schema(),
            &DiffInput::new(Some(&prior), Observation::NotFetched, None),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Destroy);
        assert!(plan.planned_state.is_none());
    }

    #[test]
    fn test_empty_config_without_state_is_noop() {
        let empty = AttrMap::new();
        let plan = diff(
            "k",
            &pool_schema(),
            &DiffInput::new(None, Observation::NotFetched, Some(&empty)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Noop);
        assert!(plan.planned_state.is_none());

        let plan = diff(
            "k",
            &pool_schema(),
            &DiffInput::new(Some(&empty), Observation::NotFetched, Some(&empty)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Noop);
    }

    #[test]
    fn test_empty_config_with_state_destroys() {
        let prior = attrs(json!({"name": "POOL_A", "min_instances": 1}));
        let view = NormalizedView::new(prior.clone());
        let empty = AttrMap::new();
        let plan = diff(
            "k",
            &pool_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&empty)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Destroy);
        assert!(plan.planned_state.is_none());
        assert_eq!(plan.changes().count(), 0);
    }

    #[test]
    fn test_remote_absent_recreates_with_warning() {
        let prior = attrs(json!({"name": "POOL_A"}));
        let desired = prior.clone();
        let plan = diff(
            "k",
            &pool_schema(),
            &DiffInput::new(Some(&prior), Observation::Absent, Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Create);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn test_tainted_forces_recreate() {
        let prior = attrs(json!({"name": "V", "comment": "c"}));
        let view = NormalizedView::new(prior.clone());
        let plan = diff(
            "k",
            &streamlit_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&prior))
                .tainted(true)
                .copy_grants(true),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Recreate);
        assert!(plan.copy_grants);
    }

    #[test]
    fn test_case_insensitive_is_noop() {
        let prior = attrs(json!({"name": "ALICE", "default_role": "MY_ROLE"}));
        let view = NormalizedView::new(prior.clone());
        let desired = attrs(json!({"name": "ALICE", "default_role": "my_role"}));
        let plan = diff(
            "snowflake_user",
            &user_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Noop);
        assert_eq!(plan.changes().count(), 0);
        // The user's spelling is what gets planned.
        assert_eq!(plan.planned_state.unwrap()["default_role"], json!("my_role"));
    }

    #[test]
    fn test_set_order_is_noop() {
        let prior = attrs(json!({"name": "ALICE", "default_secondary_roles": ["A", "B"]}));
        let view = NormalizedView::new(prior.clone());
        let desired = attrs(json!({"name": "ALICE", "default_secondary_roles": ["B", "A"]}));
        let plan = diff(
            "snowflake_user",
            &user_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Noop);
    }

    #[test]
    fn test_drift_adopted_when_unset_is_default() {
        let prior = attrs(json!({"name": "POOL_A", "min_instances": 1, "max_instances": 1}));
        let view = NormalizedView::new(attrs(
            json!({"name": "POOL_A", "min_instances": 1, "max_instances": 1, "comment": "foo"}),
        ));
        let desired = attrs(json!({"name": "POOL_A"}));
        let plan = diff(
            "k",
            &pool_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Noop);
        assert_eq!(
            plan.op("comment"),
            Some(&AttrOp::ResetToRemote {
                name: "comment".into(),
                value: json!("foo")
            })
        );
        assert_eq!(plan.planned_state.unwrap()["comment"], json!("foo"));
    }

    #[test]
    fn test_sentinel_unsets() {
        let prior = attrs(json!({"name": "ALICE", "mins_to_unlock": 9}));
        let view = NormalizedView::new(prior.clone());
        let desired = attrs(json!({"name": "ALICE", "mins_to_unlock": -1}));
        let plan = diff(
            "snowflake_user",
            &user_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::UpdateInPlace);
        let changes: Vec<&AttrOp> = plan.changes().collect();
        assert_eq!(
            changes,
            vec![&AttrOp::Unset {
                name: "mins_to_unlock".into()
            }]
        );
    }

    #[test]
    fn test_force_new_with_in_place_recreates() {
        let prior = attrs(json!({
            "name": "APP",
            "external_access_integrations": ["eai1"],
            "comment": "c1",
        }));
        let view = NormalizedView::new(prior.clone());
        let desired = attrs(json!({
            "name": "APP",
            "external_access_integrations": ["eai2"],
            "comment": "c2",
        }));
        let plan = diff(
            "snowflake_streamlit",
            &streamlit_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Recreate);
        assert_eq!(plan.requires_replace, vec!["external_access_integrations".to_string()]);
        assert!(!plan.copy_grants);
        let planned = plan.planned_state.unwrap();
        assert_eq!(planned["comment"], json!("c2"));
        assert_eq!(planned["external_access_integrations"], json!(["eai2"]));
    }

    #[test]
    fn test_parameter_inherited_counts_as_unset() {
        let prior = attrs(json!({"name": "ALICE", "statement_timeout_in_seconds": null}));
        let remote = attrs(json!({"name": "ALICE", "statement_timeout_in_seconds": 3600}));
        let view = NormalizedView::new(remote)
            .with_level("statement_timeout_in_seconds", ParameterLevel::Account);
        let desired = attrs(json!({"name": "ALICE"}));
        let plan = diff(
            "snowflake_user",
            &user_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Noop);
    }

    #[test]
    fn test_parameter_set_at_own_level_is_unset_when_removed() {
        let prior = attrs(json!({"name": "ALICE", "statement_timeout_in_seconds": 600}));
        let remote = attrs(json!({"name": "ALICE", "statement_timeout_in_seconds": 600}));
        let view = NormalizedView::new(remote)
            .with_level("statement_timeout_in_seconds", ParameterLevel::Object);
        let desired = attrs(json!({"name": "ALICE"}));
        let plan = diff(
            "snowflake_user",
            &user_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::UpdateInPlace);
        assert_eq!(
            plan.op("statement_timeout_in_seconds"),
            Some(&AttrOp::Unset {
                name: "statement_timeout_in_seconds".into()
            })
        );
    }

    #[test]
    fn test_write_only_compared_against_prior() {
        let prior = attrs(json!({"name": "ALICE", "password": "old-secret"}));
        let view = NormalizedView::new(attrs(json!({"name": "ALICE"})));
        let same = prior.clone();
        let plan = diff(
            "snowflake_user",
            &user_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&same)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Noop);

        let changed = attrs(json!({"name": "ALICE", "password": "new-secret"}));
        let plan = diff(
            "snowflake_user",
            &user_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&changed)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::UpdateInPlace);
    }

    #[test]
    fn test_drift_warning_redacts_sensitive() {
        let schema = ResourceSchema::new(0)
            .with_attribute(AttributeDescriptor::required_string("name"))
            .with_attribute(AttributeDescriptor::optional_string("secret_hint").sensitive());
        let prior = attrs(json!({"name": "X", "secret_hint": "recorded-secret"}));
        let view = NormalizedView::new(attrs(json!({"name": "X", "secret_hint": "remote-secret"})));
        let desired = attrs(json!({"name": "X", "secret_hint": "desired-secret"}));
        let plan = diff(
            "k",
            &schema,
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.warnings.len(), 1);
        let text = format!("{:?}", plan.warnings);
        assert!(!text.contains("recorded-secret"));
        assert!(!text.contains("remote-secret"));
        assert!(!text.contains("desired-secret"));
    }

    #[test]
    fn test_unknown_never_recreates_at_plan() {
        let prior = attrs(json!({"name": "APP", "external_access_integrations": ["eai1"]}));
        let view = NormalizedView::new(prior.clone());
        let desired = attrs(json!({
            "name": "APP",
            "external_access_integrations": [value::UNKNOWN_VALUE],
        }));
        let plan = diff(
            "snowflake_streamlit",
            &streamlit_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::UpdateInPlace);
        assert!(plan.has_unknowns());

        let resolved = attrs(json!({"name": "APP", "external_access_integrations": ["eai2"]}));
        let replanned = diff(
            "snowflake_streamlit",
            &streamlit_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&resolved)),
        )
        .unwrap();
        let err = check_replan("snowflake_streamlit", &plan, &replanned).unwrap_err();
        assert!(matches!(err, ProviderError::PlanInvariant { ref path, .. }
            if path == "snowflake_streamlit.external_access_integrations"));
    }

    #[test]
    fn test_computed_drift_resets_to_remote() {
        let prior = attrs(json!({
            "name": "POOL_A",
            "min_instances": 1,
            "max_instances": 1,
            "owner": "SYSADMIN",
        }));
        let view = NormalizedView::new(attrs(json!({
            "name": "POOL_A",
            "min_instances": 1,
            "max_instances": 1,
            "owner": "ACCOUNTADMIN",
        })));
        let desired = attrs(json!({"name": "POOL_A"}));
        let plan = diff(
            "k",
            &pool_schema(),
            &DiffInput::new(Some(&prior), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Noop);
        assert_eq!(
            plan.op("owner"),
            Some(&AttrOp::ResetToRemote {
                name: "owner".into(),
                value: json!("ACCOUNTADMIN")
            })
        );
    }
}
