//! Testing utilities.
//!
//! [`FakeSnowflake`] is an in-memory account that understands the
//! statements the provider renders. [`ProviderTester`] drives a
//! [`ProviderService`] through whole lifecycles without a gRPC server.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use snowflake_provider::testing::{FakeSnowflake, ProviderTester};
//! use snowflake_provider::SnowflakeProvider;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_database() {
//!     let fake = FakeSnowflake::new();
//!     let tester = ProviderTester::new(SnowflakeProvider::new(Arc::new(fake.clone())));
//!     tester.configure(json!({})).await.unwrap();
//!
//!     let state = tester
//!         .lifecycle_create("snowflake_database", json!({"name": "ANALYTICS"}))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(state.attributes["id"], "ANALYTICS");
//!     assert!(fake.has_object("DATABASE", "\"ANALYTICS\""));
//! }
//! ```

mod fake;

pub use fake::FakeSnowflake;

use serde_json::Value;

use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{Action, ApplyResult, ImportedResource, PersistedState, PlanResult};

/// A test harness for provider implementations.
///
/// Every call runs under the tester's [`CallContext`]; cancel it to
/// exercise interrupted operations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
    ctx: CallContext,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            ctx: CallContext::default(),
        }
    }

    /// Run calls under `ctx` instead of a fresh context.
    pub fn with_context(mut self, ctx: CallContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The context calls run under.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the resource types that must be opted into.
    pub fn preview_resource_types(&self) -> Vec<String> {
        self.provider.metadata().preview_resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.plan(resource_type, None, Some(config)).await
    }

    /// Plan a change against persisted state.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: &PersistedState,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.plan(resource_type, Some(prior_state), Some(config)).await
    }

    /// Plan the removal of a resource.
    pub async fn plan_destroy(
        &self,
        resource_type: &str,
        prior_state: &PersistedState,
    ) -> Result<PlanResult, ProviderError> {
        self.plan(resource_type, Some(prior_state), None).await
    }

    /// Full plan operation.
    pub async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<&PersistedState>,
        config: Option<Value>,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan_resource_change(
                &self.ctx,
                resource_type,
                prior_state.map(PersistedState::to_value),
                config,
            )
            .await
    }

    /// Apply a plan, handing back its private payload as the host would.
    pub async fn apply(
        &self,
        resource_type: &str,
        prior_state: Option<&PersistedState>,
        plan: &PlanResult,
        config: Option<Value>,
    ) -> Result<ApplyResult, ProviderError> {
        let planned_private = plan.plan.to_private()?;
        let planned_state = match plan.planned_state() {
            Value::Null => None,
            planned => Some(planned),
        };
        self.provider
            .apply_resource_change(
                &self.ctx,
                resource_type,
                prior_state.map(PersistedState::to_value),
                planned_state,
                config,
                &planned_private,
            )
            .await
    }

    /// Refresh persisted state; `None` when the object is gone.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: &PersistedState,
    ) -> Result<Option<PersistedState>, ProviderError> {
        let result = self
            .provider
            .read_resource(&self.ctx, resource_type, current_state.to_value())
            .await?;
        Ok(result.state)
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider
            .import_resource_state(&self.ctx, resource_type, id)
            .await
    }

    /// Upgrade resource state from an older schema version.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan → apply → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PersistedState, TestError> {
        let plan = self.plan_create(resource_type, config.clone()).await?;
        let state = self.apply_checked(resource_type, None, &plan, Some(config)).await?;
        self.read_back(resource_type, state).await
    }

    /// Run a full update lifecycle: plan → apply → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: &PersistedState,
        config: Value,
    ) -> Result<PersistedState, TestError> {
        let plan = self
            .plan_update(resource_type, prior_state, config.clone())
            .await?;
        let state = self
            .apply_checked(resource_type, Some(prior_state), &plan, Some(config))
            .await?;
        self.read_back(resource_type, state).await
    }

    /// Run a full destroy lifecycle: plan → apply.
    pub async fn lifecycle_destroy(
        &self,
        resource_type: &str,
        current_state: &PersistedState,
    ) -> Result<(), TestError> {
        let plan = self.plan_destroy(resource_type, current_state).await?;
        let result = self
            .apply(resource_type, Some(current_state), &plan, None)
            .await?;
        check_diagnostics(result.diagnostics)?;
        match result.new_state {
            None => Ok(()),
            Some(_) => Err(TestError::Unexpected(
                "destroy left the resource in state".to_string(),
            )),
        }
    }

    /// Run a full lifecycle: create → update → destroy.
    ///
    /// Returns the state after the update (before destroy).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<PersistedState, TestError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, &created, updated_config)
            .await?;
        self.lifecycle_destroy(resource_type, &updated).await?;
        Ok(updated)
    }

    async fn apply_checked(
        &self,
        resource_type: &str,
        prior_state: Option<&PersistedState>,
        plan: &PlanResult,
        config: Option<Value>,
    ) -> Result<PersistedState, TestError> {
        let result = self.apply(resource_type, prior_state, plan, config).await?;
        check_diagnostics(result.diagnostics)?;
        result.new_state.ok_or_else(|| {
            TestError::Unexpected(format!("apply of {} returned no state", plan.plan.action))
        })
    }

    async fn read_back(
        &self,
        resource_type: &str,
        state: PersistedState,
    ) -> Result<PersistedState, TestError> {
        self.read(resource_type, &state).await?.ok_or_else(|| {
            TestError::Unexpected(format!("{} not found after apply", resource_type))
        })
    }
}

/// Why a [`ProviderTester`] lifecycle helper gave up.
#[derive(Debug)]
pub enum TestError {
    /// The provider answered with error diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The provider call itself returned an error.
    Provider(ProviderError),
    /// The call succeeded but left the resource in the wrong shape.
    Unexpected(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "{} error diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  - {}", diag.summary)?;
                    if let Some(attr) = &diag.attribute {
                        write!(f, " [{}]", attr)?;
                    }
                    if let Some(detail) = &diag.detail {
                        write!(f, " ({})", detail)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "provider call failed: {}", e),
            TestError::Unexpected(msg) => write!(f, "unexpected outcome: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn errors_only(diagnostics: &[Diagnostic]) -> impl Iterator<Item = &Diagnostic> {
    diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
}

/// Keep warnings, turn any error diagnostic into [`TestError::Diagnostics`].
fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let (errors, _warnings): (Vec<_>, Vec<_>) = diagnostics
        .into_iter()
        .partition(|d| d.severity == DiagnosticSeverity::Error);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Panics unless the plan's action is `Create`.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert_eq!(
        plan.plan.action,
        Action::Create,
        "plan should create, got {}",
        plan.plan.action
    );
}

/// Panics unless the plan is a `Noop` with nothing in its change list.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty() && plan.plan.action == Action::Noop,
        "plan should be a noop, got {} touching {:?}",
        plan.plan.action,
        changed_paths(plan)
    );
}

/// Panics if the plan's change list is empty.
pub fn assert_plan_has_changes(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "plan should have changes, got none");
}

/// Panics unless the plan replaces the object.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace(),
        "plan should replace the object, got {}",
        plan.plan.action
    );
}

/// Panics unless the plan's action is `UpdateInPlace`.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert_eq!(
        plan.plan.action,
        Action::UpdateInPlace,
        "plan should update in place, got {}",
        plan.plan.action
    );
}

/// Panics unless `path` is among the plan's changed attributes.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let paths = changed_paths(plan);
    assert!(
        paths.contains(&path),
        "plan should change '{}', changed {:?}",
        path,
        paths
    );
}

/// Panics if `path` is among the plan's changed attributes.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !changed_paths(plan).contains(&path),
        "plan should leave '{}' alone",
        path
    );
}

/// Panics if any diagnostic is an error.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let summaries: Vec<_> = errors_only(diagnostics).map(|d| &d.summary).collect();
    assert!(
        summaries.is_empty(),
        "Expected no errors, got {:?}",
        summaries
    );
}

/// Panics if no diagnostic is an error.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        errors_only(diagnostics).next().is_some(),
        "expected an error diagnostic, got none"
    );
}

/// Panics unless some error diagnostic's summary contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let summaries: Vec<_> = errors_only(diagnostics).map(|d| &d.summary).collect();
    assert!(
        summaries.iter().any(|s| s.contains(substring)),
        "no error mentions '{}': {:?}",
        substring,
        summaries
    );
}
