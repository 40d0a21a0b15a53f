//! Applies a [`ChangePlan`] to the remote account.
//!
//! One apply step moves through
//! `Planned -> Applying -> (RemoteOk | RemoteFailed) -> (Refreshed | Refused) -> Committed`.
//! Every statement runs under the [`RetryPolicy`]: transient driver
//! failures are retried with exponential backoff, everything else is
//! fatal. Cancellation is checked before each attempt and interrupts
//! both the driver call and the backoff sleep.
//!
//! Failure policy:
//!
//! - a failed create leaves no state; an interrupted create, or one whose
//!   refresh fails, leaves tainted state so the next plan recreates it
//! - a failed update keeps the prior state (with a rename carried over
//!   if that statement already went through)
//! - a failed destroy keeps the object in state
//! - a refresh that disagrees with what was written is a consistency
//!   error and taints the new state

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::context::CallContext;
use crate::driver::{collect_rows, DriverError, Row, SqlDriver};
use crate::error::ProviderError;
use crate::identifier::Identifier;
use crate::normalizer::{normalize, NormalizedView, ParameterLevel, RemoteView};
use crate::resource::{set_identity, Resource};
use crate::schema::{
    values_equal, AttributeDescriptor, Diagnostic, Equality, RemoteBinding, ResourceSchema,
    SemanticType, SqlForm,
};
use crate::sql::{AlterAction, CreateRequest, Property, SqlValue, Statement, StatementBuilder};
use crate::types::{Action, AttrOp, ChangePlan, PersistedState};
use crate::value::{self, AttrMap};

/// How statements are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per statement, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Per-attempt limit; an attempt that runs over counts as transient.
    pub statement_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            statement_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the backoff bounds.
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Bound each attempt.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Where an apply step is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    /// Nothing sent yet.
    Planned,
    /// Statements are being sent.
    Applying,
    /// Every statement was accepted.
    RemoteOk,
    /// A statement failed.
    RemoteFailed,
    /// The object was read back and matches.
    Refreshed,
    /// The object was read back and disagrees with what was written.
    Refused,
    /// The new state is final.
    Committed,
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planned => "planned",
            Self::Applying => "applying",
            Self::RemoteOk => "remote_ok",
            Self::RemoteFailed => "remote_failed",
            Self::Refreshed => "refreshed",
            Self::Refused => "refused",
            Self::Committed => "committed",
        };
        f.write_str(s)
    }
}

/// The result of applying one plan.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// State to persist; `None` when the object is gone or was never made.
    pub state: Option<PersistedState>,
    /// Warnings, plus an error diagnostic when the step failed.
    pub diagnostics: Vec<Diagnostic>,
    /// The phase the step ended in.
    pub phase: ApplyPhase,
    /// The failure, if any.
    pub error: Option<ProviderError>,
    kind: &'static str,
}

impl ApplyOutcome {
    fn new(kind: &'static str, state: Option<PersistedState>) -> Self {
        Self {
            state,
            diagnostics: Vec::new(),
            phase: ApplyPhase::Planned,
            error: None,
            kind,
        }
    }

    fn advance(&mut self, phase: ApplyPhase) {
        debug!(kind = self.kind, from = %self.phase, to = %phase, "apply phase");
        self.phase = phase;
    }

    fn failed(mut self, err: ProviderError, state: Option<PersistedState>) -> Self {
        warn!(kind = self.kind, phase = %self.phase, error = %err, "apply failed");
        self.diagnostics.push(Diagnostic::from_error(&err));
        self.error = Some(err);
        self.state = state;
        self
    }

    fn committed(mut self, state: Option<PersistedState>) -> Self {
        self.state = state;
        self.advance(ApplyPhase::Committed);
        self
    }

    /// Whether the step completed.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A non-transient driver failure and the attempt that produced it.
struct Refusal {
    error: DriverError,
    attempts: u32,
}

impl Refusal {
    fn into_error(self, statement: &Statement) -> ProviderError {
        ProviderError::remote(self.error, statement, self.attempts)
    }
}

/// Drives plans against a driver.
#[derive(Clone)]
pub struct Reconciler {
    driver: Arc<dyn SqlDriver>,
    builder: Arc<dyn StatementBuilder>,
    retry: RetryPolicy,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// A reconciler using the default retry policy.
    pub fn new(driver: Arc<dyn SqlDriver>, builder: Arc<dyn StatementBuilder>) -> Self {
        Self {
            driver,
            builder,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `call` until it succeeds, fails for good, or the context ends.
    ///
    /// Transient failures are retried and, once the budget is spent,
    /// become [`ProviderError::RemoteTransient`]. Other driver failures
    /// are handed back for the caller to classify.
    async fn retrying<T, F, Fut>(
        &self,
        ctx: &CallContext,
        statement: &Statement,
        call: F,
    ) -> Result<Result<T, Refusal>, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            ctx.check()?;
            let outcome = match self.retry.statement_timeout {
                Some(limit) => ctx
                    .run(tokio::time::timeout(limit, call()))
                    .await?
                    .unwrap_or_else(|_| {
                        Err(DriverError::Transient(format!(
                            "statement timed out after {}s",
                            limit.as_secs_f64()
                        )))
                    }),
                None => ctx.run(call()).await?,
            };
            match outcome {
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        statement = %statement,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    ctx.sleep(delay).await?;
                },
                Err(err) if err.is_transient() => {
                    return Err(ProviderError::remote(err, statement, attempt))
                },
                Err(error) => {
                    return Ok(Err(Refusal {
                        error,
                        attempts: attempt,
                    }))
                },
                Ok(value) => return Ok(Ok(value)),
            }
        }
    }

    async fn exec(&self, ctx: &CallContext, statement: &Statement) -> Result<u64, ProviderError> {
        info!(statement = %statement, "executing");
        self.retrying(ctx, statement, move || self.driver.exec(ctx, statement))
            .await?
            .map_err(|refusal| refusal.into_error(statement))
    }

    async fn fetch(
        &self,
        ctx: &CallContext,
        statement: &Statement,
        multi: bool,
    ) -> Result<Result<Vec<Row>, Refusal>, ProviderError> {
        debug!(statement = %statement, "querying");
        self.retrying(ctx, statement, move || async move {
            let rows = if multi {
                self.driver.query_multi(ctx, statement).await?
            } else {
                self.driver.query(ctx, statement).await?
            };
            collect_rows(rows).await
        })
        .await
    }

    /// Drop the object; `Ok(false)` when it was already gone.
    async fn drop_object(
        &self,
        ctx: &CallContext,
        resource: &dyn Resource,
        id: &Identifier,
    ) -> Result<bool, ProviderError> {
        let statement = self.builder.drop_object(resource.object_type(), id);
        info!(statement = %statement, "executing");
        match self
            .retrying(ctx, &statement, || self.driver.exec(ctx, &statement))
            .await?
        {
            Ok(_) => Ok(true),
            Err(refusal) if refusal.error.is_not_found() => Ok(false),
            Err(refusal) => Err(refusal.into_error(&statement)),
        }
    }

    /// Read the object back and normalise it.
    ///
    /// Returns `Ok(None)` when the object (or its container) is gone.
    #[instrument(skip_all, fields(kind = resource.type_name(), id = %id))]
    pub async fn refresh(
        &self,
        ctx: &CallContext,
        resource: &dyn Resource,
        id: &Identifier,
    ) -> Result<Option<NormalizedView>, ProviderError> {
        let object = resource.object_type();
        let show = self.builder.show(object, id);
        let rows = match self.fetch(ctx, &show, false).await? {
            Ok(rows) => rows,
            Err(refusal) if refusal.error.is_not_found() => return Ok(None),
            Err(refusal) => return Err(refusal.into_error(&show)),
        };

        // LIKE is a pattern and case-insensitive; keep the exact name only.
        let wanted = id.name_segment().canonical();
        let Some(show_row) = rows
            .into_iter()
            .find(|row| row.get("name").map(|n| *n == wanted).unwrap_or(false))
        else {
            debug!("object not found");
            return Ok(None);
        };

        let mut view = RemoteView {
            show: show_row,
            ..Default::default()
        };
        if resource.describe_supported() {
            let describe = self.builder.describe(object, id);
            view.describe = match self.fetch(ctx, &describe, true).await? {
                Ok(rows) => rows,
                Err(refusal) if refusal.error.is_not_found() => return Ok(None),
                Err(refusal) => return Err(refusal.into_error(&describe)),
            };
        }
        if resource.schema().has_parameters() {
            let parameters = self.builder.show_parameters(object, id);
            view.parameters = match self.fetch(ctx, &parameters, true).await? {
                Ok(rows) => rows,
                Err(refusal) if refusal.error.is_not_found() => return Ok(None),
                Err(refusal) => return Err(refusal.into_error(&parameters)),
            };
        }

        normalize(resource.schema(), &view).map(Some)
    }

    /// Refresh and build persisted state, keeping `reference`'s spelling
    /// where it compares equal.
    pub async fn read(
        &self,
        ctx: &CallContext,
        resource: &dyn Resource,
        id: &Identifier,
        reference: &AttrMap,
    ) -> Result<Option<PersistedState>, ProviderError> {
        let view = self.refresh(ctx, resource, id).await?;
        Ok(view.map(|view| {
            state_from_remote(
                resource.schema(),
                &view,
                Some(reference),
                resource.parameter_level(),
                id,
            )
        }))
    }

    /// Apply `plan` to the object identified by `id` after the change.
    ///
    /// The object's current identifier is taken from `prior` when it
    /// differs (renames, recreation in another container).
    #[instrument(skip_all, fields(kind = resource.type_name(), id = %id, action = %plan.action))]
    pub async fn apply(
        &self,
        ctx: &CallContext,
        resource: &dyn Resource,
        id: &Identifier,
        plan: &ChangePlan,
        prior: Option<&PersistedState>,
    ) -> ApplyOutcome {
        let kind = resource.type_name();
        let outcome = ApplyOutcome::new(kind, prior.cloned());

        if plan.action != Action::Destroy {
            if let Some(op) = plan
                .mutations()
                .find(|op| op.value().map(value::contains_unknown).unwrap_or(false))
            {
                let err = ProviderError::plan_invariant(
                    kind,
                    op.name(),
                    "value is still unknown at apply",
                );
                return outcome.failed(err, prior.cloned());
            }
        }

        let current = match prior {
            Some(prior) => match resource.identifier(&prior.attributes) {
                Ok(Some(current)) => current,
                Ok(None) => id.clone(),
                Err(err) => return outcome.failed(err, Some(prior.clone())),
            },
            None => id.clone(),
        };

        match plan.action {
            Action::Noop => {
                let state = plan
                    .planned_state
                    .clone()
                    .map(|attrs| PersistedState::new(resource.schema().version, attrs));
                outcome.committed(state)
            },
            Action::Create => self.create(ctx, resource, id, plan, outcome).await,
            Action::UpdateInPlace => {
                self.update(ctx, resource, &current, plan, prior, outcome).await
            },
            Action::Recreate => {
                self.recreate(ctx, resource, &current, id, plan, prior, outcome)
                    .await
            },
            Action::Destroy => self.destroy(ctx, resource, &current, prior, outcome).await,
        }
    }

    async fn create(
        &self,
        ctx: &CallContext,
        resource: &dyn Resource,
        id: &Identifier,
        plan: &ChangePlan,
        mut outcome: ApplyOutcome,
    ) -> ApplyOutcome {
        let statement = match self.create_statement(resource, id, plan, false) {
            Ok(statement) => statement,
            Err(err) => return outcome.failed(err, None),
        };
        outcome.advance(ApplyPhase::Applying);
        if let Err(err) = self.exec(ctx, &statement).await {
            outcome.advance(ApplyPhase::RemoteFailed);
            // An interrupted create may have gone through.
            let state = err
                .is_interrupted()
                .then(|| partial_state(resource.schema(), plan, id).tainted());
            return outcome.failed(err, state);
        }
        outcome.advance(ApplyPhase::RemoteOk);
        let fallback = partial_state(resource.schema(), plan, id).tainted();
        self.settle(ctx, resource, id, plan, outcome, fallback).await
    }

    async fn update(
        &self,
        ctx: &CallContext,
        resource: &dyn Resource,
        current: &Identifier,
        plan: &ChangePlan,
        prior: Option<&PersistedState>,
        mut outcome: ApplyOutcome,
    ) -> ApplyOutcome {
        let (statements, target) = match self.alter_statements(resource, current, plan) {
            Ok(out) => out,
            Err(err) => return outcome.failed(err, prior.cloned()),
        };

        outcome.advance(ApplyPhase::Applying);
        let mut renamed = false;
        for (index, statement) in statements.iter().enumerate() {
            if let Err(err) = self.exec(ctx, statement).await {
                outcome.advance(ApplyPhase::RemoteFailed);
                let state = prior.map(|prior| {
                    let mut state = prior.clone();
                    if renamed {
                        state
                            .attributes
                            .insert("name".to_string(), Value::String(target.name().to_string()));
                        set_identity(&mut state.attributes, &target);
                    }
                    state
                });
                return outcome.failed(err, state);
            }
            // The rename, when present, is always the first statement.
            renamed = renamed || (index == 0 && target != *current);
        }
        outcome.advance(ApplyPhase::RemoteOk);

        let fallback = partial_state(resource.schema(), plan, &target);
        self.settle(ctx, resource, &target, plan, outcome, fallback).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn recreate(
        &self,
        ctx: &CallContext,
        resource: &dyn Resource,
        current: &Identifier,
        id: &Identifier,
        plan: &ChangePlan,
        prior: Option<&PersistedState>,
        mut outcome: ApplyOutcome,
    ) -> ApplyOutcome {
        let tainted_prior = prior.map(|p| p.clone().tainted());
        let replace = plan.copy_grants && resource.supports_copy_grants() && current == id;

        outcome.advance(ApplyPhase::Applying);
        if !replace {
            match self.drop_object(ctx, resource, current).await {
                Ok(true) => {},
                Ok(false) => debug!("object already absent before recreate"),
                Err(err) => {
                    outcome.advance(ApplyPhase::RemoteFailed);
                    return outcome.failed(err, tainted_prior);
                },
            }
        }

        let statement = match self.create_statement(resource, id, plan, replace) {
            Ok(statement) => statement,
            Err(err) => return outcome.failed(err, tainted_prior),
        };
        if let Err(err) = self.exec(ctx, &statement).await {
            outcome.advance(ApplyPhase::RemoteFailed);
            let state = if replace {
                tainted_prior
            } else {
                err.is_interrupted()
                    .then(|| partial_state(resource.schema(), plan, id).tainted())
            };
            return outcome.failed(err, state);
        }
        outcome.advance(ApplyPhase::RemoteOk);

        let fallback = partial_state(resource.schema(), plan, id).tainted();
        self.settle(ctx, resource, id, plan, outcome, fallback).await
    }

    async fn destroy(
        &self,
        ctx: &CallContext,
        resource: &dyn Resource,
        current: &Identifier,
        prior: Option<&PersistedState>,
        mut outcome: ApplyOutcome,
    ) -> ApplyOutcome {
        outcome.advance(ApplyPhase::Applying);
        match self.drop_object(ctx, resource, current).await {
            Ok(true) => {
                outcome.advance(ApplyPhase::RemoteOk);
                outcome.committed(None)
            },
            Ok(false) => {
                outcome.advance(ApplyPhase::RemoteOk);
                outcome.diagnostics.push(
                    Diagnostic::warning("Object already absent")
                        .with_detail(format!("{} was not found; nothing to destroy.", current)),
                );
                outcome.committed(None)
            },
            Err(err) => {
                outcome.advance(ApplyPhase::RemoteFailed);
                outcome.failed(err, prior.cloned())
            },
        }
    }

    /// Read the object back, check it against the plan and commit.
    async fn settle(
        &self,
        ctx: &CallContext,
        resource: &dyn Resource,
        id: &Identifier,
        plan: &ChangePlan,
        mut outcome: ApplyOutcome,
        fallback: PersistedState,
    ) -> ApplyOutcome {
        let kind = resource.type_name();
        let view = match self.refresh(ctx, resource, id).await {
            Ok(Some(view)) => view,
            Ok(None) => {
                outcome.advance(ApplyPhase::Refused);
                let err = ProviderError::Consistency {
                    attribute: "name".to_string(),
                    message: format!("{} cannot be found after apply", id),
                };
                return outcome.failed(err, Some(fallback.tainted()));
            },
            Err(err) => return outcome.failed(err, Some(fallback)),
        };

        let schema = resource.schema();
        let level = resource.parameter_level();
        let state = state_from_remote(schema, &view, plan.planned_state.as_ref(), level, id);
        if let Err(err) = check_consistency(kind, schema, plan, &view, level) {
            outcome.advance(ApplyPhase::Refused);
            return outcome.failed(err, Some(state.tainted()));
        }
        outcome.advance(ApplyPhase::Refreshed);
        outcome.committed(Some(state))
    }

    fn create_statement(
        &self,
        resource: &dyn Resource,
        id: &Identifier,
        plan: &ChangePlan,
        replace: bool,
    ) -> Result<Statement, ProviderError> {
        let kind = resource.type_name();
        let schema = resource.schema();
        let mut request = CreateRequest::new(resource.object_type(), id);
        request.or_replace = replace;
        request.copy_grants = replace;

        for op in &plan.ops {
            let AttrOp::Set { name, value } = op else {
                continue;
            };
            let desc = descriptor(kind, schema, name)?;
            match desc.sql_form {
                SqlForm::Property => request.properties.push(
                    Property::new(desc.sql_key(), sql_value(kind, desc, value)?)
                        .sensitive(desc.sensitive),
                ),
                SqlForm::Flag => {
                    if value.as_bool() == Some(true) {
                        request.modifiers.push(desc.sql_key());
                    }
                },
                SqlForm::Toggle => {
                    if value.as_bool() == Some(true) {
                        request.clauses.push(format!("WITH {}", desc.sql_key()));
                    }
                },
                SqlForm::Rename | SqlForm::Identity | SqlForm::None => {},
            }
        }
        request.trailer = plan
            .planned_state
            .as_ref()
            .and_then(|attrs| resource.create_trailer(attrs));

        Ok(self.builder.create(&request))
    }

    /// The alter statements for an in-place update, and the identifier the
    /// object has once they ran.
    ///
    /// Order: rename, the `UNSET` group, flags and toggles, the `SET`
    /// group, then attributes altered on their own.
    fn alter_statements(
        &self,
        resource: &dyn Resource,
        current: &Identifier,
        plan: &ChangePlan,
    ) -> Result<(Vec<Statement>, Identifier), ProviderError> {
        let kind = resource.type_name();
        let schema = resource.schema();
        let mut target = current.clone();
        let mut rename = None;
        let mut unset = Vec::new();
        let mut switches = Vec::new();
        let mut set = Vec::new();
        let mut standalone = Vec::new();

        for op in plan.mutations() {
            let desc = descriptor(kind, schema, op.name())?;
            let new = match op {
                AttrOp::Set { value, .. } => Some(value),
                _ => None,
            };
            match (desc.sql_form, new) {
                (SqlForm::Rename, Some(Value::String(name))) => {
                    target = current.with_name(name);
                    rename = Some(AlterAction::RenameTo(target.clone()));
                },
                (SqlForm::Flag, new) => {
                    switches.push(if new.and_then(Value::as_bool) == Some(true) {
                        AlterAction::SetFlag(desc.sql_key())
                    } else {
                        AlterAction::UnsetFlag(desc.sql_key())
                    })
                },
                (SqlForm::Toggle, new) => {
                    switches.push(if new.and_then(Value::as_bool) == Some(true) {
                        AlterAction::Enable(desc.sql_key())
                    } else {
                        AlterAction::Disable(desc.sql_key())
                    })
                },
                (SqlForm::Property, Some(value)) => {
                    let property = Property::new(desc.sql_key(), sql_value(kind, desc, value)?)
                        .sensitive(desc.sensitive);
                    if desc.standalone_alter {
                        standalone.push(AlterAction::Set(vec![property]));
                    } else {
                        set.push(property);
                    }
                },
                (SqlForm::Property, None) => {
                    if desc.standalone_alter {
                        standalone.push(AlterAction::Unset(vec![desc.sql_key()]));
                    } else {
                        unset.push(desc.sql_key());
                    }
                },
                _ => {
                    return Err(ProviderError::plan_invariant(
                        kind,
                        &desc.name,
                        "cannot be altered in place",
                    ))
                },
            }
        }

        let object = resource.object_type();
        let mut statements = Vec::new();
        if let Some(rename) = rename {
            statements.push(self.builder.alter(object, current, &rename));
        }
        if !unset.is_empty() {
            statements.push(self.builder.alter(object, &target, &AlterAction::Unset(unset)));
        }
        for action in switches {
            statements.push(self.builder.alter(object, &target, &action));
        }
        if !set.is_empty() {
            statements.push(self.builder.alter(object, &target, &AlterAction::Set(set)));
        }
        for action in standalone {
            statements.push(self.builder.alter(object, &target, &action));
        }
        Ok((statements, target))
    }
}

fn descriptor<'a>(
    kind: &str,
    schema: &'a ResourceSchema,
    name: &str,
) -> Result<&'a AttributeDescriptor, ProviderError> {
    schema
        .attribute(name)
        .ok_or_else(|| ProviderError::plan_invariant(kind, name, "not declared by the kind"))
}

/// Map an attribute value to a statement value.
fn sql_value(
    kind: &str,
    desc: &AttributeDescriptor,
    value: &Value,
) -> Result<SqlValue, ProviderError> {
    if value::contains_unknown(value) {
        return Err(ProviderError::plan_invariant(
            kind,
            &desc.name,
            "value is still unknown at apply",
        ));
    }
    let element = match &desc.semantic_type {
        SemanticType::Set(element) | SemanticType::OrderedList(element) => element.as_ref(),
        other => other,
    };
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| scalar(kind, desc, element, item))
            .collect::<Result<Vec<_>, _>>()
            .map(SqlValue::List),
        other => scalar(kind, desc, &desc.semantic_type, other),
    }
}

fn scalar(
    kind: &str,
    desc: &AttributeDescriptor,
    semantic_type: &SemanticType,
    value: &Value,
) -> Result<SqlValue, ProviderError> {
    Ok(match (semantic_type, value) {
        (_, Value::Bool(b)) => SqlValue::Bool(*b),
        (_, Value::Number(n)) => SqlValue::Number(n.as_i64().ok_or_else(|| {
            ProviderError::plan_invariant(kind, &desc.name, "is not an integer")
        })?),
        (SemanticType::Enum(_), Value::String(s)) => SqlValue::Identifier(s.to_uppercase()),
        (_, Value::String(s)) if desc.equality == Equality::Identifier => {
            SqlValue::Identifier(s.clone())
        },
        (_, Value::String(s)) => SqlValue::Text(s.clone()),
        (_, other) => SqlValue::Text(other.to_string()),
    })
}

/// The planned attributes with unknowns cleared, for recording an object
/// whose remote shape could not be read.
fn partial_state(schema: &ResourceSchema, plan: &ChangePlan, id: &Identifier) -> PersistedState {
    let mut attrs = plan.planned_state.clone().unwrap_or_default();
    for v in attrs.values_mut() {
        if value::contains_unknown(v) {
            *v = Value::Null;
        }
    }
    set_identity(&mut attrs, id);
    PersistedState::new(schema.version, attrs)
}

/// Build persisted attributes from a refreshed view.
///
/// `reference` is the configuration or planned state the object was
/// written from: where its value compares equal to the remote one its
/// spelling is kept, and write-only attributes are taken from it.
pub fn state_from_remote(
    schema: &ResourceSchema,
    view: &NormalizedView,
    reference: Option<&AttrMap>,
    own_level: ParameterLevel,
    id: &Identifier,
) -> PersistedState {
    let mut attrs = AttrMap::new();
    for desc in &schema.attributes {
        let written = reference
            .and_then(|r| value::get(r, &desc.name))
            .filter(|v| !value::contains_unknown(v));
        let value = match desc.remote {
            RemoteBinding::Derived => None,
            RemoteBinding::WriteOnly => written.cloned(),
            _ if desc.is_computed() => view.get(&desc.name).cloned(),
            _ => {
                let observed = view.effective(desc, own_level);
                match (written, observed) {
                    (Some(w), o) if values_equal(desc, Some(w), o) => Some(w.clone()),
                    (Some(w), None) if desc.policy.is_sentinel(w) => Some(w.clone()),
                    (_, o) => o.cloned(),
                }
            },
        };
        attrs.insert(desc.name.clone(), value.unwrap_or(Value::Null));
    }
    set_identity(&mut attrs, id);
    PersistedState::new(schema.version, attrs)
}

/// Check that every value written by the plan reads back equal.
fn check_consistency(
    kind: &str,
    schema: &ResourceSchema,
    plan: &ChangePlan,
    view: &NormalizedView,
    own_level: ParameterLevel,
) -> Result<(), ProviderError> {
    for op in plan.mutations() {
        let desc = descriptor(kind, schema, op.name())?;
        if !desc.is_observable() || desc.is_computed() {
            continue;
        }
        let observed = view.effective(desc, own_level);
        let consistent = match op {
            AttrOp::Set { value, .. } => values_equal(desc, observed, Some(value)),
            // Only parameters have a defined value after an unset.
            _ => !desc.is_parameter() || observed.is_none(),
        };
        if !consistent {
            let expected = match op {
                AttrOp::Set { value, .. } => desc.render_value(Some(value)),
                _ => "unset".to_string(),
            };
            return Err(ProviderError::Consistency {
                attribute: desc.name.clone(),
                message: format!(
                    "was written as {} but reads back as {}",
                    expected,
                    desc.render_value(observed)
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{diff, DiffInput, Observation};
    use crate::resources::{ComputePool, Database, Streamlit, User, View};
    use crate::sql::SnowflakeSqlBuilder;
    use crate::testing::FakeSnowflake;
    use serde_json::json;

    fn attrs(value: Value) -> AttrMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn reconciler(fake: &FakeSnowflake) -> Reconciler {
        Reconciler::new(Arc::new(fake.clone()), Arc::new(SnowflakeSqlBuilder))
            .with_retry(
                RetryPolicy::default()
                    .with_backoff(Duration::from_millis(1), Duration::from_millis(5)),
            )
    }

    fn create_plan(resource: &dyn Resource, config: &AttrMap) -> ChangePlan {
        diff(
            resource.type_name(),
            resource.schema(),
            &DiffInput::new(None, Observation::NotFetched, Some(config)),
        )
        .unwrap()
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(30), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_create_refreshes_computed_values() {
        let fake = FakeSnowflake::new();
        let r = reconciler(&fake);
        let pool = ComputePool::new();
        let config = attrs(json!({"name": "POOL_A"}));
        let plan = create_plan(&pool, &config);
        let id = Identifier::account("POOL_A");

        let outcome = r.apply(&CallContext::default(), &pool, &id, &plan, None).await;
        assert!(outcome.is_ok(), "{:?}", outcome.error);
        assert_eq!(outcome.phase, ApplyPhase::Committed);
        let state = outcome.state.unwrap();
        assert_eq!(state.attributes["owner"], json!("ACCOUNTADMIN"));
        assert_eq!(state.attributes["auto_resume"], json!(true));
        assert_eq!(state.attributes["min_instances"], json!(1));
        assert_eq!(state.attributes["id"], json!("POOL_A"));
        assert!(!state.tainted);

        let created = fake.statements();
        assert!(created[0].starts_with("CREATE COMPUTE POOL \"POOL_A\""));
        assert!(created[0].contains("MIN_NODES = 1"));
    }

    #[tokio::test]
    async fn test_update_orders_unset_before_set() {
        let fake = FakeSnowflake::new();
        let r = reconciler(&fake);
        let user = User::new();
        let id = Identifier::account("ALICE");
        let ctx = CallContext::default();

        let config = attrs(json!({"name": "ALICE", "mins_to_unlock": 9}));
        let created = r
            .apply(&ctx, &user, &id, &create_plan(&user, &config), None)
            .await
            .state
            .unwrap();

        let plan = ChangePlan {
            action: Action::UpdateInPlace,
            ops: vec![
                AttrOp::Set {
                    name: "comment".into(),
                    value: json!("hello"),
                },
                AttrOp::Unset {
                    name: "mins_to_unlock".into(),
                },
            ],
            planned_state: Some(attrs(json!({
                "name": "ALICE",
                "comment": "hello",
                "mins_to_unlock": -1,
            }))),
            requires_replace: vec![],
            copy_grants: false,
            warnings: vec![],
        };
        fake.clear_statements();
        let outcome = r.apply(&ctx, &user, &id, &plan, Some(&created)).await;
        assert!(outcome.is_ok(), "{:?}", outcome.error);
        let statements = fake.statements();
        let unset = statements.iter().position(|s| s.contains("UNSET MINS_TO_UNLOCK")).unwrap();
        let set = statements.iter().position(|s| s.contains("SET COMMENT")).unwrap();
        assert!(unset < set);
        let state = outcome.state.unwrap();
        assert_eq!(state.attributes["mins_to_unlock"], json!(-1));
        assert_eq!(state.attributes["comment"], json!("hello"));
    }

    #[tokio::test]
    async fn test_rename_runs_first() {
        let fake = FakeSnowflake::new();
        let r = reconciler(&fake);
        let db = Database::new();
        let ctx = CallContext::default();
        let config = attrs(json!({"name": "OLD_DB"}));
        let created = r
            .apply(&ctx, &db, &Identifier::account("OLD_DB"), &create_plan(&db, &config), None)
            .await
            .state
            .unwrap();

        let plan = ChangePlan {
            action: Action::UpdateInPlace,
            ops: vec![
                AttrOp::Set {
                    name: "name".into(),
                    value: json!("NEW_DB"),
                },
                AttrOp::Set {
                    name: "comment".into(),
                    value: json!("moved"),
                },
            ],
            planned_state: Some(attrs(json!({"name": "NEW_DB", "comment": "moved"}))),
            requires_replace: vec![],
            copy_grants: false,
            warnings: vec![],
        };
        fake.clear_statements();
        let new_id = Identifier::account("NEW_DB");
        let outcome = r.apply(&ctx, &db, &new_id, &plan, Some(&created)).await;
        assert!(outcome.is_ok(), "{:?}", outcome.error);
        let statements = fake.statements();
        assert_eq!(statements[0], r#"ALTER DATABASE "OLD_DB" RENAME TO "NEW_DB""#);
        assert_eq!(statements[1], r#"ALTER DATABASE "NEW_DB" SET COMMENT = 'moved'"#);
        let state = outcome.state.unwrap();
        assert_eq!(state.attributes["id"], json!("NEW_DB"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let fake = FakeSnowflake::new();
        fake.fail_next("CREATE DATABASE", DriverError::Transient("connection reset".into()), 2);
        let r = reconciler(&fake);
        let db = Database::new();
        let config = attrs(json!({"name": "DB"}));
        let plan = create_plan(&db, &config);
        let outcome = r
            .apply(&CallContext::default(), &db, &Identifier::account("DB"), &plan, None)
            .await;
        assert!(outcome.is_ok(), "{:?}", outcome.error);
        assert!(fake.has_object("DATABASE", "\"DB\""));
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let fake = FakeSnowflake::new();
        fake.fail_next("CREATE DATABASE", DriverError::Transient("connection reset".into()), 5);
        let r = reconciler(&fake);
        let db = Database::new();
        let config = attrs(json!({"name": "DB"}));
        let plan = create_plan(&db, &config);
        let outcome = r
            .apply(&CallContext::default(), &db, &Identifier::account("DB"), &plan, None)
            .await;
        assert!(matches!(
            outcome.error,
            Some(ProviderError::RemoteTransient { attempts: 3, .. })
        ));
        assert!(outcome.state.is_none());
        assert_eq!(outcome.phase, ApplyPhase::RemoteFailed);
    }

    #[tokio::test]
    async fn test_logical_errors_are_not_retried() {
        let fake = FakeSnowflake::new();
        fake.fail_next(
            "CREATE DATABASE",
            DriverError::PermissionDenied("CREATE DATABASE".into()),
            1,
        );
        let r = reconciler(&fake);
        let db = Database::new();
        let config = attrs(json!({"name": "DB"}));
        let plan = create_plan(&db, &config);
        let outcome = r
            .apply(&CallContext::default(), &db, &Identifier::account("DB"), &plan, None)
            .await;
        assert!(matches!(outcome.error, Some(ProviderError::RemoteLogical { .. })));
        assert_eq!(fake.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_after_retries_reports_attempt() {
        let fake = FakeSnowflake::new();
        fake.fail_next("CREATE DATABASE", DriverError::Transient("reset".into()), 2);
        fake.fail_next(
            "CREATE DATABASE",
            DriverError::PermissionDenied("CREATE DATABASE".into()),
            1,
        );
        let r = reconciler(&fake);
        let db = Database::new();
        let config = attrs(json!({"name": "DB"}));
        let plan = create_plan(&db, &config);
        let outcome = r
            .apply(&CallContext::default(), &db, &Identifier::account("DB"), &plan, None)
            .await;
        match outcome.error {
            Some(ProviderError::RemoteLogical { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fake.statements().len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_create_is_tainted() {
        let fake = FakeSnowflake::new();
        let r = reconciler(&fake);
        let db = Database::new();
        let ctx = CallContext::default();
        ctx.cancel();
        let config = attrs(json!({"name": "DB"}));
        let outcome = r
            .apply(&ctx, &db, &Identifier::account("DB"), &create_plan(&db, &config), None)
            .await;
        assert!(matches!(outcome.error, Some(ProviderError::Cancelled)));
        let state = outcome.state.unwrap();
        assert!(state.tainted);
        assert_eq!(state.attributes["owner"], Value::Null);
    }

    #[tokio::test]
    async fn test_silently_ignored_write_is_refused() {
        let fake = FakeSnowflake::new();
        fake.ignore_property("COMMENT");
        let r = reconciler(&fake);
        let db = Database::new();
        let config = attrs(json!({"name": "DB", "comment": "hello"}));
        let plan = create_plan(&db, &config);
        let outcome = r
            .apply(&CallContext::default(), &db, &Identifier::account("DB"), &plan, None)
            .await;
        assert_eq!(outcome.phase, ApplyPhase::Refused);
        assert!(matches!(
            outcome.error,
            Some(ProviderError::Consistency { ref attribute, .. }) if attribute == "comment"
        ));
        assert!(outcome.state.unwrap().tainted);
    }

    #[tokio::test]
    async fn test_destroy_absent_object_warns() {
        let fake = FakeSnowflake::new();
        let r = reconciler(&fake);
        let db = Database::new();
        let prior = PersistedState::new(1, attrs(json!({"name": "GONE"})));
        let plan = ChangePlan {
            action: Action::Destroy,
            ..ChangePlan::noop(None)
        };
        let outcome = r
            .apply(&CallContext::default(), &db, &Identifier::account("GONE"), &plan, Some(&prior))
            .await;
        assert!(outcome.is_ok());
        assert!(outcome.state.is_none());
        assert_eq!(outcome.diagnostics.len(), 1);
        assert!(!outcome.diagnostics[0].is_error());
    }

    #[tokio::test]
    async fn test_destroy_failure_keeps_state() {
        let fake = FakeSnowflake::new();
        fake.fail_next("DROP DATABASE", DriverError::Rejected("has dependents".into()), 1);
        let r = reconciler(&fake);
        let db = Database::new();
        let prior = PersistedState::new(1, attrs(json!({"name": "DB"})));
        let plan = ChangePlan {
            action: Action::Destroy,
            ..ChangePlan::noop(None)
        };
        let outcome = r
            .apply(&CallContext::default(), &db, &Identifier::account("DB"), &plan, Some(&prior))
            .await;
        assert!(!outcome.is_ok());
        assert_eq!(outcome.state, Some(prior));
    }

    #[tokio::test]
    async fn test_recreate_drops_then_creates() {
        let fake = FakeSnowflake::new();
        let r = reconciler(&fake);
        let app = Streamlit::new();
        let ctx = CallContext::default();
        let id = Identifier::schema_object("DB", "SCH", "APP");
        fake.create_container("DB", "SCH");

        let config = attrs(json!({
            "name": "APP", "database": "DB", "schema": "SCH",
            "stage": "DB.SCH.APPS", "main_file": "app.py",
            "external_access_integrations": ["EAI1"], "comment": "c1",
        }));
        let prior = r
            .apply(&ctx, &app, &id, &create_plan(&app, &config), None)
            .await
            .state
            .unwrap();

        let desired = attrs(json!({
            "name": "APP", "database": "DB", "schema": "SCH",
            "stage": "DB.SCH.APPS", "main_file": "app.py",
            "external_access_integrations": ["EAI2"], "comment": "c2",
        }));
        let view = r.refresh(&ctx, &app, &id).await.unwrap().unwrap();
        let plan = diff(
            app.type_name(),
            app.schema(),
            &DiffInput::new(Some(&prior.attributes), Observation::Present(&view), Some(&desired)),
        )
        .unwrap();
        assert_eq!(plan.action, Action::Recreate);

        fake.clear_statements();
        let outcome = r.apply(&ctx, &app, &id, &plan, Some(&prior)).await;
        assert!(outcome.is_ok(), "{:?}", outcome.error);
        let statements = fake.statements();
        assert!(statements[0].starts_with("DROP STREAMLIT"));
        assert!(statements[1].starts_with("CREATE STREAMLIT"));
        assert!(statements[1].contains("EXTERNAL_ACCESS_INTEGRATIONS = (EAI2)"));
        assert!(statements[1].contains("COMMENT = 'c2'"));
        let state = outcome.state.unwrap();
        assert_eq!(state.attributes["comment"], json!("c2"));
    }

    #[tokio::test]
    async fn test_recreate_with_copy_grants() {
        let fake = FakeSnowflake::new();
        let r = reconciler(&fake);
        let view = View::new();
        let ctx = CallContext::default();
        let id = Identifier::schema_object("DB", "SCH", "V");
        fake.create_container("DB", "SCH");
        let config = attrs(json!({
            "name": "V", "database": "DB", "schema": "SCH", "statement": "select 1",
        }));
        let prior = r
            .apply(&ctx, &view, &id, &create_plan(&view, &config), None)
            .await
            .state
            .unwrap();

        let mut plan = create_plan(&view, &attrs(json!({
            "name": "V", "database": "DB", "schema": "SCH", "statement": "select 2",
        })));
        plan.action = Action::Recreate;
        plan.copy_grants = true;

        fake.clear_statements();
        let outcome = r.apply(&ctx, &view, &id, &plan, Some(&prior)).await;
        assert!(outcome.is_ok(), "{:?}", outcome.error);
        let statements = fake.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0],
            r#"CREATE OR REPLACE VIEW "DB"."SCH"."V" COPY GRANTS AS select 2"#
        );
    }

    #[tokio::test]
    async fn test_noop_issues_no_statements() {
        let fake = FakeSnowflake::new();
        let r = reconciler(&fake);
        let db = Database::new();
        let plan = ChangePlan::noop(Some(attrs(json!({"name": "DB"}))));
        let outcome = r
            .apply(&CallContext::default(), &db, &Identifier::account("DB"), &plan, None)
            .await;
        assert!(outcome.is_ok());
        assert!(fake.statements().is_empty());
        assert_eq!(outcome.state.unwrap().attributes["name"], json!("DB"));
    }

    #[tokio::test]
    async fn test_unknown_values_are_refused() {
        let fake = FakeSnowflake::new();
        let r = reconciler(&fake);
        let db = Database::new();
        let mut plan = create_plan(&db, &attrs(json!({"name": "DB"})));
        plan.ops.push(AttrOp::Set {
            name: "comment".into(),
            value: value::unknown(),
        });
        let outcome = r
            .apply(&CallContext::default(), &db, &Identifier::account("DB"), &plan, None)
            .await;
        assert!(matches!(outcome.error, Some(ProviderError::PlanInvariant { .. })));
        assert!(fake.statements().is_empty());
    }

    #[test]
    fn test_state_from_remote_keeps_written_form() {
        let user = User::new();
        let view = NormalizedView::new(attrs(json!({
            "name": "ALICE",
            "default_role": "MY_ROLE",
            "owner": "ACCOUNTADMIN",
        })));
        let reference = attrs(json!({
            "name": "ALICE",
            "default_role": "my_role",
            "password": "hunter2",
            "mins_to_unlock": -1,
        }));
        let state = state_from_remote(
            user.schema(),
            &view,
            Some(&reference),
            user.parameter_level(),
            &Identifier::account("ALICE"),
        );
        assert_eq!(state.attributes["default_role"], json!("my_role"));
        assert_eq!(state.attributes["password"], json!("hunter2"));
        assert_eq!(state.attributes["mins_to_unlock"], json!(-1));
        assert_eq!(state.attributes["owner"], json!("ACCOUNTADMIN"));
        assert_eq!(state.attributes["fully_qualified_name"], json!("\"ALICE\""));
        assert_eq!(state.version, 1);
    }
}
