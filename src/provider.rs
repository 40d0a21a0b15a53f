//! The Snowflake provider: binds the registry, upgrader chains, diff
//! engine and reconciler to the lifecycle operations the host drives.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::{PreviewFeatures, ProviderConfig};
use crate::context::CallContext;
use crate::diff::{check_replan, diff, DiffInput, Observation};
use crate::driver::{DriverFactory, SqlDriver};
use crate::error::ProviderError;
use crate::identifier::Identifier;
use crate::reconciler::Reconciler;
use crate::registry::Registry;
use crate::resource::{set_identity, Resource, FQN_ATTRIBUTE, ID_ATTRIBUTE};
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::sql::{SnowflakeSqlBuilder, StatementBuilder};
use crate::types::{
    Action, ApplyResult, ChangePlan, ImportedResource, PersistedState, PlanResult,
    ProviderMetadata, ReadResult, ResourceInstance, ServerCapabilities,
};
use crate::validation;
use crate::value::{self, AttrMap};

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// What `configure` produced.
#[derive(Clone)]
struct Configured {
    reconciler: Reconciler,
    preview: PreviewFeatures,
}

/// The provider served to the host.
pub struct SnowflakeProvider {
    registry: Registry,
    factory: Arc<dyn DriverFactory>,
    builder: Arc<dyn StatementBuilder>,
    env: EnvLookup,
    client: Arc<OnceCell<Arc<dyn SqlDriver>>>,
    configured: RwLock<Option<Configured>>,
}

impl std::fmt::Debug for SnowflakeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeProvider")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl SnowflakeProvider {
    /// A provider over the built-in kinds, connecting through `factory`.
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            registry: Registry::builtin(),
            factory,
            builder: Arc::new(SnowflakeSqlBuilder),
            env: Arc::new(|key| std::env::var(key).ok()),
            client: Arc::new(OnceCell::new()),
            configured: RwLock::new(None),
        }
    }

    /// Replace the kind table.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the statement renderer.
    pub fn with_builder(mut self, builder: Arc<dyn StatementBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Read environment knobs through `lookup` instead of the process
    /// environment.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Share the memoised client with other providers in the process.
    ///
    /// Only consulted when the configure-client-once knob is set.
    pub fn with_shared_client(mut self, client: Arc<OnceCell<Arc<dyn SqlDriver>>>) -> Self {
        self.client = client;
        self
    }

    /// The kind table.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn configured(&self) -> Result<Configured, ProviderError> {
        self.configured.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("provider has not been configured".to_string())
        })
    }

    /// Look up a kind, refusing preview kinds that were not enabled.
    fn resource(
        &self,
        kind: &str,
        preview: &PreviewFeatures,
    ) -> Result<Arc<dyn Resource>, ProviderError> {
        let resource = self.registry.get(kind)?;
        if resource.preview() && !preview.is_enabled(kind) {
            return Err(ProviderError::PreviewFeatureDisabled(kind.to_string()));
        }
        Ok(Arc::clone(resource))
    }

    async fn connect(&self, config: &ProviderConfig) -> Result<Arc<dyn SqlDriver>, ProviderError> {
        let connect = || {
            let factory = Arc::clone(&self.factory);
            let profile = config.profile().to_string();
            async move {
                debug!(profile = %profile, "connecting");
                factory.connect(&profile).await.map_err(|e| {
                    ProviderError::Configuration(format!(
                        "cannot connect with profile '{}': {}",
                        profile, e
                    ))
                })
            }
        };
        if config.configure_client_once {
            self.client.get_or_try_init(connect).await.map(Arc::clone)
        } else {
            connect().await
        }
    }

    /// Derive the plan for one instance, refreshing the remote object when
    /// both sides exist.
    async fn derive_plan(
        &self,
        ctx: &CallContext,
        reconciler: &Reconciler,
        resource: &dyn Resource,
        prior: Option<&PersistedState>,
        desired: Option<&AttrMap>,
    ) -> Result<ChangePlan, ProviderError> {
        let kind = resource.type_name();
        let mut instance = ResourceInstance {
            id: None,
            config: desired.cloned(),
            state: prior.cloned(),
            remote: None,
        };
        if let (Some(state), Some(_)) = (&instance.state, &instance.config) {
            instance.id = resource.identifier(&state.attributes)?;
        }
        let fetched = match &instance.id {
            Some(id) => {
                instance.remote = reconciler.refresh(ctx, resource, id).await?;
                true
            },
            None => false,
        };
        let observation = match (&instance.remote, fetched) {
            (Some(view), _) => Observation::Present(view),
            (None, true) => Observation::Absent,
            (None, false) => Observation::NotFetched,
        };

        let input = DiffInput::new(instance.prior(), observation, instance.config.as_ref())
            .tainted(instance.is_tainted())
            .at_level(resource.parameter_level())
            .copy_grants(resource.supports_copy_grants());
        let mut plan = diff(kind, resource.schema(), &input)?;

        if let Some(planned) = plan.planned_state.as_mut() {
            match resource.identifier(planned)? {
                Some(id) => set_identity(planned, &id),
                None => {
                    planned.insert(ID_ATTRIBUTE.to_string(), value::unknown());
                    planned.insert(FQN_ATTRIBUTE.to_string(), value::unknown());
                },
            }
        }
        Ok(plan)
    }
}

/// Decode persisted state and lift it to the kind's current version.
fn decode_state(
    resource: &dyn Resource,
    raw: Value,
) -> Result<Option<PersistedState>, ProviderError> {
    let current = resource.schema().version;
    let Some(state) = PersistedState::from_raw(raw, current)? else {
        return Ok(None);
    };
    if state.version == current {
        return Ok(Some(state));
    }
    let attributes = resource.upgraders().upgrade(
        resource.type_name(),
        state.attributes,
        state.version,
        current,
    )?;
    Ok(Some(PersistedState {
        version: current,
        attributes,
        tainted: state.tainted,
    }))
}

fn decode_config(kind: &str, config: Value) -> Result<AttrMap, ProviderError> {
    match config {
        Value::Object(map) => Ok(map),
        other => Err(ProviderError::Validation(format!(
            "configuration of {} must be an object, got {}",
            kind,
            match other {
                Value::Array(_) => "a list",
                Value::String(_) => "a string",
                Value::Number(_) => "a number",
                Value::Bool(_) => "a boolean",
                _ => "null",
            }
        ))),
    }
}

/// The identifier a plan is applied to.
fn target_identifier(
    resource: &dyn Resource,
    plan: &ChangePlan,
    prior: Option<&PersistedState>,
) -> Result<Identifier, ProviderError> {
    let attrs = match plan.action {
        Action::Destroy => prior.map(|p| &p.attributes),
        _ => plan.planned_state.as_ref(),
    };
    attrs
        .map(|attrs| resource.identifier(attrs))
        .transpose()?
        .flatten()
        .ok_or_else(|| {
            ProviderError::plan_invariant(
                resource.type_name(),
                "name",
                "identifier is still unknown at apply",
            )
        })
}

#[async_trait::async_trait]
impl ProviderService for SnowflakeProvider {
    fn schema(&self) -> ProviderSchema {
        self.registry.provider_schema(ProviderConfig::schema())
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.registry.kinds(),
            preview_resources: self.registry.preview_kinds(),
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validation::validate(&ProviderConfig::schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }
        let config = ProviderConfig::from_value(config)?;
        if let Err(e) = PreviewFeatures::resolve(
            &config.preview_features_enabled,
            &self.registry.preview_kinds(),
            false,
        ) {
            diagnostics.push(Diagnostic::from_error(&e).with_attribute("preview_features_enabled"));
        }
        Ok(diagnostics)
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = self.validate_provider_config(config.clone()).await?;
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let env = Arc::clone(&self.env);
        let config = ProviderConfig::from_value(config)?.with_env(|key| env(key));
        let preview = PreviewFeatures::resolve(
            &config.preview_features_enabled,
            &self.registry.preview_kinds(),
            config.enable_all_preview_features,
        )?;
        let driver = self.connect(&config).await?;
        let reconciler =
            Reconciler::new(driver, Arc::clone(&self.builder)).with_retry(config.retry_policy());

        info!(
            profile = config.profile(),
            preview = ?preview.enabled().collect::<Vec<_>>(),
            client_once = config.configure_client_once,
            "provider configured"
        );
        *self.configured.write().await = Some(Configured {
            reconciler,
            preview,
        });
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("provider stopping");
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.registry.get(resource_type)?;
        let mut diagnostics = validation::validate(resource.schema(), &config);
        if let Value::Object(map) = &config {
            if let Err(e) = resource.identifier(map) {
                diagnostics.push(Diagnostic::from_error(&e));
            }
            diagnostics.extend(resource.validate(map));
        }
        Ok(diagnostics)
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.registry.get(resource_type)?;
        let raw = match state {
            Value::Object(map) if !map.contains_key("attributes") => {
                let mut envelope = serde_json::Map::new();
                envelope.insert("version".to_string(), Value::from(version));
                envelope.insert("attributes".to_string(), Value::Object(map));
                Value::Object(envelope)
            },
            other => other,
        };
        Ok(decode_state(resource.as_ref(), raw)?
            .map(|state| state.to_value())
            .unwrap_or(Value::Null))
    }

    #[instrument(skip_all, fields(kind = resource_type))]
    async fn plan_resource_change(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        prior_state: Option<Value>,
        config: Option<Value>,
    ) -> Result<PlanResult, ProviderError> {
        let configured = self.configured().await?;
        let resource = self.resource(resource_type, &configured.preview)?;
        let prior = prior_state
            .map(|raw| decode_state(resource.as_ref(), raw))
            .transpose()?
            .flatten();
        let desired = config
            .map(|c| decode_config(resource_type, c))
            .transpose()?;

        let plan = self
            .derive_plan(
                ctx,
                &configured.reconciler,
                resource.as_ref(),
                prior.as_ref(),
                desired.as_ref(),
            )
            .await?;
        debug!(action = %plan.action, "planned");

        let schema = resource.schema();
        Ok(PlanResult::from_plan(
            plan,
            prior.as_ref().map(|p| &p.attributes),
            |name| schema.attribute(name).map(|d| d.sensitive).unwrap_or(false),
        ))
    }

    #[instrument(skip_all, fields(kind = resource_type))]
    async fn apply_resource_change(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        prior_state: Option<Value>,
        _planned_state: Option<Value>,
        config: Option<Value>,
        planned_private: &[u8],
    ) -> Result<ApplyResult, ProviderError> {
        let configured = self.configured().await?;
        let resource = self.resource(resource_type, &configured.preview)?;
        let prior = prior_state
            .map(|raw| decode_state(resource.as_ref(), raw))
            .transpose()?
            .flatten();
        let desired = config
            .map(|c| decode_config(resource_type, c))
            .transpose()?;

        let plan = match ChangePlan::from_private(planned_private)? {
            Some(planned) if planned.has_unknowns() => {
                debug!("plan had unknown values; deriving again");
                let replanned = self
                    .derive_plan(
                        ctx,
                        &configured.reconciler,
                        resource.as_ref(),
                        prior.as_ref(),
                        desired.as_ref(),
                    )
                    .await?;
                check_replan(resource_type, &planned, &replanned)?;
                replanned
            },
            Some(planned) => planned,
            None => {
                warn!("no private plan from the host; deriving again");
                self.derive_plan(
                    ctx,
                    &configured.reconciler,
                    resource.as_ref(),
                    prior.as_ref(),
                    desired.as_ref(),
                )
                .await?
            },
        };

        let id = target_identifier(resource.as_ref(), &plan, prior.as_ref())?;
        let outcome = configured
            .reconciler
            .apply(ctx, resource.as_ref(), &id, &plan, prior.as_ref())
            .await;
        if outcome.is_ok() {
            info!(id = %id, action = %plan.action, "applied");
        }

        Ok(ApplyResult {
            new_state: outcome.state,
            diagnostics: outcome.diagnostics,
        })
    }

    #[instrument(skip_all, fields(kind = resource_type))]
    async fn read_resource(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        current_state: Value,
    ) -> Result<ReadResult, ProviderError> {
        let configured = self.configured().await?;
        let resource = self.resource(resource_type, &configured.preview)?;
        let Some(state) = decode_state(resource.as_ref(), current_state)? else {
            return Ok(ReadResult::default());
        };
        let Some(id) = resource.identifier(&state.attributes)? else {
            return Ok(ReadResult {
                state: Some(state),
                diagnostics: vec![],
            });
        };

        match configured
            .reconciler
            .read(ctx, resource.as_ref(), &id, &state.attributes)
            .await?
        {
            Some(mut refreshed) => {
                refreshed.tainted = state.tainted;
                Ok(ReadResult {
                    state: Some(refreshed),
                    diagnostics: vec![],
                })
            },
            None => {
                info!(id = %id, "object no longer exists");
                Ok(ReadResult {
                    state: None,
                    diagnostics: vec![Diagnostic::warning("Object no longer exists").with_detail(
                        format!("{} was removed outside of this provider.", id),
                    )],
                })
            },
        }
    }

    #[instrument(skip_all, fields(kind = resource_type, import_id = id))]
    async fn import_resource_state(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let configured = self.configured().await?;
        let resource = self.resource(resource_type, &configured.preview)?;
        let id = Identifier::parse_import(id, resource.scope())?;
        let stub = resource.import_stub(&id);
        Ok(vec![ImportedResource::new(
            resource_type,
            PersistedState::new(resource.schema().version, stub),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CONFIGURE_CLIENT_ONCE_ENV, ENABLE_ALL_PREVIEW_FEATURES_ENV};
    use crate::driver::DriverError;
    use crate::testing::FakeSnowflake;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn provider(fake: &FakeSnowflake) -> SnowflakeProvider {
        SnowflakeProvider::new(Arc::new(fake.clone())).with_env(|_| None)
    }

    async fn configured(fake: &FakeSnowflake) -> SnowflakeProvider {
        let provider = provider(fake);
        let diagnostics = provider
            .configure(json!({
                "preview_features_enabled": ["snowflake_compute_pool", "snowflake_streamlit"],
                "retry": {"base_delay_ms": 1, "max_delay_ms": 2}
            }))
            .await
            .unwrap();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        provider
    }

    async fn create(
        provider: &SnowflakeProvider,
        kind: &str,
        config: Value,
    ) -> ApplyResult {
        let ctx = CallContext::default();
        let plan = provider
            .plan_resource_change(&ctx, kind, None, Some(config.clone()))
            .await
            .unwrap();
        let private = plan.plan.to_private().unwrap();
        provider
            .apply_resource_change(
                &ctx,
                kind,
                None,
                Some(plan.planned_state()),
                Some(config),
                &private,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_requires_configure() {
        let fake = FakeSnowflake::new();
        let provider = provider(&fake);
        let err = provider
            .plan_resource_change(
                &CallContext::default(),
                "snowflake_database",
                None,
                Some(json!({})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_preview_kinds_are_gated() {
        let fake = FakeSnowflake::new();
        let provider = provider(&fake);
        provider.configure(json!({})).await.unwrap();

        let err = provider
            .plan_resource_change(
                &CallContext::default(),
                "snowflake_compute_pool",
                None,
                Some(json!({"name": "P"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::PreviewFeatureDisabled(_)));

        // Validation never needs the feature.
        let diagnostics = provider
            .validate_resource_config("snowflake_compute_pool", json!({"name": "P"}))
            .await
            .unwrap();
        assert!(diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_preview_feature_is_a_diagnostic() {
        let fake = FakeSnowflake::new();
        let provider = provider(&fake);
        let diagnostics = provider
            .configure(json!({"preview_features_enabled": ["snowflake_warehouse_v2"]}))
            .await
            .unwrap();
        assert!(has_errors(&diagnostics));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("preview_features_enabled"));
        assert_eq!(fake.connections(), 0);
    }

    #[tokio::test]
    async fn test_enable_all_preview_features_knob() {
        let fake = FakeSnowflake::new();
        let provider = SnowflakeProvider::new(Arc::new(fake.clone()))
            .with_env(|key| (key == ENABLE_ALL_PREVIEW_FEATURES_ENV).then(|| "true".to_string()));
        provider.configure(json!({})).await.unwrap();
        let result = create(&provider, "snowflake_compute_pool", json!({"name": "P"})).await;
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[tokio::test]
    async fn test_configure_client_once() {
        let fake = FakeSnowflake::new();
        let once = |key: &str| (key == CONFIGURE_CLIENT_ONCE_ENV).then(|| "1".to_string());
        let provider = SnowflakeProvider::new(Arc::new(fake.clone())).with_env(once);
        provider.configure(json!({})).await.unwrap();
        provider.configure(json!({})).await.unwrap();
        assert_eq!(fake.connections(), 1);

        let plain = SnowflakeProvider::new(Arc::new(fake.clone())).with_env(|_| None);
        plain.configure(json!({})).await.unwrap();
        plain.configure(json!({})).await.unwrap();
        assert_eq!(fake.connections(), 3);
    }

    #[tokio::test]
    async fn test_create_then_noop() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let config = json!({"name": "ANALYTICS", "comment": "raw data"});

        let created = create(&provider, "snowflake_database", config.clone()).await;
        assert!(created.diagnostics.is_empty(), "{:?}", created.diagnostics);
        let state = created.new_state.unwrap();
        assert_eq!(state.attributes["id"], json!("ANALYTICS"));
        assert_eq!(state.attributes["fully_qualified_name"], json!("\"ANALYTICS\""));
        assert!(fake.has_object("DATABASE", "\"ANALYTICS\""));

        fake.clear_statements();
        let plan = provider
            .plan_resource_change(
                &CallContext::default(),
                "snowflake_database",
                Some(state.to_value()),
                Some(config),
            )
            .await
            .unwrap();
        assert_eq!(plan.plan.action, Action::Noop);
        assert!(plan.changes.is_empty());
        assert!(fake.statements().is_empty());
    }

    #[tokio::test]
    async fn test_plan_create_leaves_identity_unknown_until_known() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let plan = provider
            .plan_resource_change(
                &CallContext::default(),
                "snowflake_schema",
                None,
                Some(json!({"name": "S", "database": crate::value::UNKNOWN_VALUE})),
            )
            .await
            .unwrap();
        let planned = plan.planned_state();
        assert!(crate::value::is_unknown(&planned["id"]));
        assert!(crate::value::is_unknown(&planned["fully_qualified_name"]));
    }

    #[tokio::test]
    async fn test_rename_updates_identity() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let ctx = CallContext::default();
        let state = create(&provider, "snowflake_user", json!({"name": "ALICE"}))
            .await
            .new_state
            .unwrap();

        let config = json!({"name": "ALICIA"});
        let plan = provider
            .plan_resource_change(
                &ctx,
                "snowflake_user",
                Some(state.to_value()),
                Some(config.clone()),
            )
            .await
            .unwrap();
        assert_eq!(plan.plan.action, Action::UpdateInPlace);
        assert_eq!(plan.planned_state()["id"], json!("ALICIA"));

        let applied = provider
            .apply_resource_change(
                &ctx,
                "snowflake_user",
                Some(state.to_value()),
                Some(plan.planned_state()),
                Some(config),
                &plan.plan.to_private().unwrap(),
            )
            .await
            .unwrap();
        assert!(applied.diagnostics.is_empty(), "{:?}", applied.diagnostics);
        assert!(fake.has_object("USER", "\"ALICIA\""));
        assert!(!fake.has_object("USER", "\"ALICE\""));
        assert_eq!(applied.new_state.unwrap().attributes["id"], json!("ALICIA"));
    }

    #[tokio::test]
    async fn test_remote_deletion_plans_create() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let config = json!({"name": "POOL_A"});
        let state = create(&provider, "snowflake_compute_pool", config.clone())
            .await
            .new_state
            .unwrap();

        fake.out_of_band("DROP COMPUTE POOL \"POOL_A\"").unwrap();
        let plan = provider
            .plan_resource_change(
                &CallContext::default(),
                "snowflake_compute_pool",
                Some(state.to_value()),
                Some(config),
            )
            .await
            .unwrap();
        assert_eq!(plan.plan.action, Action::Create);
        assert_eq!(plan.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_destroy() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let ctx = CallContext::default();
        let state = create(&provider, "snowflake_database", json!({"name": "DB1"}))
            .await
            .new_state
            .unwrap();

        let plan = provider
            .plan_resource_change(&ctx, "snowflake_database", Some(state.to_value()), None)
            .await
            .unwrap();
        assert_eq!(plan.plan.action, Action::Destroy);

        let applied = provider
            .apply_resource_change(
                &ctx,
                "snowflake_database",
                Some(state.to_value()),
                None,
                None,
                &plan.plan.to_private().unwrap(),
            )
            .await
            .unwrap();
        assert!(applied.new_state.is_none());
        assert!(!fake.has_object("DATABASE", "\"DB1\""));
    }

    #[tokio::test]
    async fn test_apply_without_private_plan_rederives() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let config = json!({"name": "DB2"});
        let applied = provider
            .apply_resource_change(
                &CallContext::default(),
                "snowflake_database",
                None,
                None,
                Some(config),
                &[],
            )
            .await
            .unwrap();
        assert!(applied.diagnostics.is_empty(), "{:?}", applied.diagnostics);
        assert!(fake.has_object("DATABASE", "\"DB2\""));
    }

    #[tokio::test]
    async fn test_unknown_force_new_resolved_at_apply_is_refused() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let ctx = CallContext::default();
        let state = create(
            &provider,
            "snowflake_compute_pool",
            json!({"name": "POOL_B", "instance_family": "CPU_X64_XS"}),
        )
        .await
        .new_state
        .unwrap();

        let unknown = json!({"name": "POOL_B", "instance_family": crate::value::UNKNOWN_VALUE});
        let plan = provider
            .plan_resource_change(
                &ctx,
                "snowflake_compute_pool",
                Some(state.to_value()),
                Some(unknown),
            )
            .await
            .unwrap();
        assert_eq!(plan.plan.action, Action::UpdateInPlace);
        assert!(plan.plan.has_unknowns());

        fake.clear_statements();
        let resolved = json!({"name": "POOL_B", "instance_family": "CPU_X64_M"});
        let err = provider
            .apply_resource_change(
                &ctx,
                "snowflake_compute_pool",
                Some(state.to_value()),
                Some(plan.planned_state()),
                Some(resolved),
                &plan.plan.to_private().unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::PlanInvariant { .. }));
        assert_eq!(err.attribute(), Some("instance_family"));
        assert!(fake.statements().is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_keeps_prior_state() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let ctx = CallContext::default();
        let state = create(&provider, "snowflake_user", json!({"name": "BOB"}))
            .await
            .new_state
            .unwrap();

        let config = json!({"name": "BOB", "comment": "hello"});
        let plan = provider
            .plan_resource_change(
                &ctx,
                "snowflake_user",
                Some(state.to_value()),
                Some(config.clone()),
            )
            .await
            .unwrap();
        fake.fail_next("ALTER USER", DriverError::PermissionDenied("nope".into()), 1);
        let applied = provider
            .apply_resource_change(
                &ctx,
                "snowflake_user",
                Some(state.to_value()),
                Some(plan.planned_state()),
                Some(config),
                &plan.plan.to_private().unwrap(),
            )
            .await
            .unwrap();
        assert!(has_errors(&applied.diagnostics));
        assert_eq!(applied.new_state, Some(state));
    }

    #[tokio::test]
    async fn test_cancelled_create_is_tainted_and_recreated() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let config = json!({"name": "DB3"});
        let plan = provider
            .plan_resource_change(
                &CallContext::default(),
                "snowflake_database",
                None,
                Some(config.clone()),
            )
            .await
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let applied = provider
            .apply_resource_change(
                &CallContext::new(token),
                "snowflake_database",
                None,
                Some(plan.planned_state()),
                Some(config.clone()),
                &plan.plan.to_private().unwrap(),
            )
            .await
            .unwrap();
        let state = applied.new_state.unwrap();
        assert!(state.tainted);

        let plan = provider
            .plan_resource_change(
                &CallContext::default(),
                "snowflake_database",
                Some(state.to_value()),
                Some(config),
            )
            .await
            .unwrap();
        assert!(matches!(plan.plan.action, Action::Recreate | Action::Create));
    }

    #[tokio::test]
    async fn test_read_reports_drift_and_removal() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let ctx = CallContext::default();
        let state = create(&provider, "snowflake_user", json!({"name": "CAROL", "comment": "a"}))
            .await
            .new_state
            .unwrap();

        fake.out_of_band("ALTER USER \"CAROL\" SET COMMENT = 'b'").unwrap();
        let read = provider
            .read_resource(&ctx, "snowflake_user", state.to_value())
            .await
            .unwrap();
        assert_eq!(read.state.unwrap().attributes["comment"], json!("b"));

        fake.out_of_band("DROP USER \"CAROL\"").unwrap();
        let read = provider
            .read_resource(&ctx, "snowflake_user", state.to_value())
            .await
            .unwrap();
        assert!(read.state.is_none());
        assert_eq!(read.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_import_then_read() {
        let fake = FakeSnowflake::new();
        let provider = configured(&fake).await;
        let ctx = CallContext::default();
        fake.create_container("DB", "PUBLIC");

        let imported = provider
            .import_resource_state(&ctx, "snowflake_schema", "DB|PUBLIC")
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        let stub = &imported[0].state;
        assert_eq!(stub.attributes["name"], json!("PUBLIC"));
        assert_eq!(stub.attributes["database"], json!("DB"));

        let read = provider
            .read_resource(&ctx, "snowflake_schema", stub.to_value())
            .await
            .unwrap();
        let state = read.state.unwrap();
        assert_eq!(state.attributes["fully_qualified_name"], json!("\"DB\".\"PUBLIC\""));

        let err = provider
            .import_resource_state(&ctx, "snowflake_schema", "PUBLIC")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Identifier(_)));
    }

    #[tokio::test]
    async fn test_upgrade_resource_state() {
        let fake = FakeSnowflake::new();
        let provider = provider(&fake);
        let upgraded = provider
            .upgrade_resource_state(
                "snowflake_user",
                0,
                json!({"name": "DAVE", "id": "DAVE", "default_secondary_roles": ["B", "A", "B"]}),
            )
            .await
            .unwrap();
        assert_eq!(upgraded["version"], json!(1));
        assert_eq!(upgraded["attributes"]["name"], json!("DAVE"));

        let err = provider
            .upgrade_resource_state("snowflake_user", 9, json!({"name": "DAVE"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::StateUpgrade { .. }));
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let fake = FakeSnowflake::new();
        let provider = provider(&fake);
        let diagnostics = provider
            .validate_resource_config("snowflake_database", json!({"name": "", "bogus": 1}))
            .await
            .unwrap();
        assert!(has_errors(&diagnostics));
        assert!(diagnostics.iter().any(|d| d.summary.contains("bogus")));

        let err = provider
            .validate_resource_config("snowflake_widget", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[test]
    fn test_metadata() {
        let fake = FakeSnowflake::new();
        let metadata = provider(&fake).metadata();
        assert_eq!(metadata.resources.len(), 7);
        assert!(metadata.preview_resources.contains(&"snowflake_compute_pool".to_string()));
        assert!(!metadata.preview_resources.contains(&"snowflake_database".to_string()));
        assert!(metadata.capabilities.plan_destroy);
    }
}
