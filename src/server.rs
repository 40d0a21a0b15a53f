//! The plugin server.
//!
//! [`ProviderService`] is the lifecycle surface the host drives; the
//! [`serve`] family starts a gRPC server speaking it, prints the handshake
//! line and handles shutdown.
//!
//! # Cancellation and Shutdown
//!
//! Every call runs under a [`CallContext`] derived from one root token and
//! bounded by the request's `grpc-timeout`, if any. On SIGTERM or SIGINT
//! the server:
//! 1. Stops accepting new connections
//! 2. Waits up to the shutdown timeout for in-flight calls to finish
//! 3. Cancels the root token; calls still running stop at their next
//!    statement boundary and report what they committed
//! 4. Calls the provider's `stop()` method and exits

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{
    has_errors, AttributeDescriptor, Diagnostic, DiagnosticSeverity, ProviderSchema, ResourceSchema,
};
use crate::types::{
    ApplyResult, ImportedResource, PlanResult, ProviderMetadata, ReadResult, HANDSHAKE_PREFIX,
    PROTOCOL_VERSION,
};

/// The lifecycle operations a provider implements.
///
/// State and configuration arrive as decoded JSON. `None` means absent:
/// no prior state on create, no configuration on destroy.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// The schema of the provider configuration and every resource kind.
    fn schema(&self) -> ProviderSchema;

    /// Resource names and capability flags; derived from the schema by default.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            preview_resources: Vec::new(),
            capabilities: Default::default(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure credentials and settings.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Release resources before exit.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration; never contacts the remote.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Lift persisted state written at `version` to the current schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Compute the change that brings the remote object to `config`.
    async fn plan_resource_change(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        prior_state: Option<Value>,
        config: Option<Value>,
    ) -> Result<PlanResult, ProviderError>;

    /// Carry out a plan produced by [`plan_resource_change`](Self::plan_resource_change).
    ///
    /// `planned_private` is the opaque payload returned with the plan; empty
    /// when the host did not keep it.
    async fn apply_resource_change(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        prior_state: Option<Value>,
        planned_state: Option<Value>,
        config: Option<Value>,
        planned_private: &[u8],
    ) -> Result<ApplyResult, ProviderError>;

    /// Refresh persisted state from the remote.
    async fn read_resource(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        current_state: Value,
    ) -> Result<ReadResult, ProviderError>;

    /// Bring an existing remote object under management.
    async fn import_resource_state(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = (ctx, id);
        Err(ProviderError::Configuration(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }
}

/// Adapts a [`ProviderService`] to the generated gRPC trait.
pub(crate) struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
    root: CancellationToken,
}

impl<P: ProviderService> ProviderGrpcService<P> {
    pub(crate) fn new(provider: Arc<P>, root: CancellationToken) -> Self {
        Self { provider, root }
    }

    /// The context for one call: a child of the root token, bounded by the
    /// client's `grpc-timeout`.
    fn call_context<T>(&self, request: &tonic::Request<T>) -> CallContext {
        let ctx = CallContext::new(self.root.child_token());
        match request
            .metadata()
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout)
        {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    fn diagnostics_to_proto(
        &self,
        diagnostics: Vec<Diagnostic>,
    ) -> Vec<crate::generated::Diagnostic> {
        diagnostics
            .into_iter()
            .map(|d| crate::generated::Diagnostic {
                severity: match d.severity {
                    DiagnosticSeverity::Error => {
                        crate::generated::diagnostic::Severity::Error as i32
                    },
                    DiagnosticSeverity::Warning => {
                        crate::generated::diagnostic::Severity::Warning as i32
                    },
                },
                summary: d.summary,
                detail: d.detail.unwrap_or_default(),
                attribute: d.attribute.unwrap_or_default(),
            })
            .collect()
    }

    fn error_to_diagnostics(&self, err: ProviderError) -> Vec<crate::generated::Diagnostic> {
        self.diagnostics_to_proto(vec![Diagnostic::from_error(&err)])
    }
}

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Parse a `grpc-timeout` value: up to eight digits and a unit.
fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    let (digits, unit) = value.split_at(value.len().checked_sub(1)?);
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    Some(match unit {
        "H" => Duration::from_secs(n * 3600),
        "M" => Duration::from_secs(n * 60),
        "S" => Duration::from_secs(n),
        "m" => Duration::from_millis(n),
        "u" => Duration::from_micros(n),
        "n" => Duration::from_nanos(n),
        _ => return None,
    })
}

/// Decode an optional JSON payload; empty bytes and `null` are absent.
fn decode_optional(bytes: &[u8]) -> Result<Option<Value>, ProviderError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

fn encode_optional(value: Option<Value>) -> Vec<u8> {
    value
        .map(|v| serde_json::to_vec(&v).unwrap_or_default())
        .unwrap_or_default()
}

fn schema_to_proto(schema: &ResourceSchema) -> crate::generated::Schema {
    let groups = |groups: &[Vec<String>]| {
        groups
            .iter()
            .map(|names| crate::generated::AttributeGroup {
                names: names.clone(),
            })
            .collect()
    };
    crate::generated::Schema {
        version: schema.version,
        attributes: schema.attributes.iter().map(attribute_to_proto).collect(),
        description: schema.description.clone().unwrap_or_default(),
        conflicts: groups(&schema.conflicts),
        required_together: groups(&schema.required_together),
    }
}

fn attribute_to_proto(attr: &AttributeDescriptor) -> crate::generated::Attribute {
    crate::generated::Attribute {
        name: attr.name.clone(),
        r#type: serde_json::to_vec(&attr.semantic_type).unwrap_or_default(),
        required: attr.required,
        optional: !attr.required && !attr.is_computed(),
        computed: attr.is_computed() || attr.is_parameter() || attr.default.is_some(),
        sensitive: attr.sensitive,
        description: attr.description.clone().unwrap_or_default(),
        force_new: attr.is_force_new(),
        default_value: attr
            .default
            .as_ref()
            .map(|v| serde_json::to_vec(v).unwrap_or_default())
            .unwrap_or_default(),
        mutation: serde_json::to_value(attr.mutation)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
    }
}

fn log_diagnostics(operation: &str, resource_type: &str, diagnostics: &[Diagnostic]) {
    if has_errors(diagnostics) {
        warn!(
            resource_type,
            diagnostics = diagnostics.len(),
            "{} completed with errors",
            operation
        );
    } else {
        info!(resource_type, "{} completed successfully", operation);
    }
}

#[tonic::async_trait]
impl<P: ProviderService> crate::generated::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip(self, _request), name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: tonic::Request<crate::generated::GetMetadataRequest>,
    ) -> Result<tonic::Response<crate::generated::GetMetadataResponse>, tonic::Status> {
        debug!("GetMetadata called");
        let metadata = self.provider.metadata();
        info!(
            resources = metadata.resources.len(),
            preview_resources = metadata.preview_resources.len(),
            "GetMetadata completed"
        );
        Ok(tonic::Response::new(crate::generated::GetMetadataResponse {
            server_capabilities: Some(crate::generated::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            preview_resources: metadata.preview_resources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: tonic::Request<crate::generated::GetSchemaRequest>,
    ) -> Result<tonic::Response<crate::generated::GetSchemaResponse>, tonic::Status> {
        debug!("GetSchema called");
        let schema = self.provider.schema();
        info!(resources = schema.resources.len(), "GetSchema completed");
        Ok(tonic::Response::new(crate::generated::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<crate::generated::ValidateProviderConfigRequest>,
    ) -> Result<tonic::Response<crate::generated::ValidateProviderConfigResponse>, tonic::Status>
    {
        debug!("ValidateProviderConfig called");
        let req = request.into_inner();
        let config = serde_json::from_slice(&req.config).unwrap_or(Value::Null);

        let diagnostics = match self.provider.validate_provider_config(config).await {
            Ok(diagnostics) => {
                log_diagnostics("ValidateProviderConfig", "provider", &diagnostics);
                self.diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "ValidateProviderConfig failed");
                self.error_to_diagnostics(e)
            },
        };
        Ok(tonic::Response::new(crate::generated::ValidateProviderConfigResponse {
            diagnostics,
        }))
    }

    #[instrument(skip(self, request), name = "grpc.configure")]
    async fn configure(
        &self,
        request: tonic::Request<crate::generated::ConfigureRequest>,
    ) -> Result<tonic::Response<crate::generated::ConfigureResponse>, tonic::Status> {
        debug!("Configure called");
        let req = request.into_inner();
        let config = serde_json::from_slice(&req.config).unwrap_or(Value::Null);

        let diagnostics = match self.provider.configure(config).await {
            Ok(diagnostics) => {
                log_diagnostics("Configure", "provider", &diagnostics);
                self.diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "Configure failed");
                self.error_to_diagnostics(e)
            },
        };
        Ok(tonic::Response::new(crate::generated::ConfigureResponse { diagnostics }))
    }

    #[instrument(skip(self, _request), name = "grpc.stop")]
    async fn stop(
        &self,
        _request: tonic::Request<crate::generated::StopRequest>,
    ) -> Result<tonic::Response<crate::generated::StopResponse>, tonic::Status> {
        info!("Stop called");
        self.root.cancel();
        let error = match self.provider.stop().await {
            Ok(()) => {
                info!("Stop completed successfully");
                String::new()
            },
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(tonic::Response::new(crate::generated::StopResponse { error }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<crate::generated::ValidateResourceConfigRequest>,
    ) -> Result<tonic::Response<crate::generated::ValidateResourceConfigResponse>, tonic::Status>
    {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, "ValidateResourceConfig called");
        let config = serde_json::from_slice(&req.config).unwrap_or(Value::Null);

        let diagnostics = match self
            .provider
            .validate_resource_config(&req.resource_type, config)
            .await
        {
            Ok(diagnostics) => {
                log_diagnostics("ValidateResourceConfig", &req.resource_type, &diagnostics);
                self.diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(
                    resource_type = %req.resource_type,
                    error = %e,
                    "ValidateResourceConfig failed"
                );
                self.error_to_diagnostics(e)
            },
        };
        Ok(tonic::Response::new(crate::generated::ValidateResourceConfigResponse {
            diagnostics,
        }))
    }

    #[instrument(skip(self, request), name = "grpc.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: tonic::Request<crate::generated::UpgradeResourceStateRequest>,
    ) -> Result<tonic::Response<crate::generated::UpgradeResourceStateResponse>, tonic::Status>
    {
        let req = request.into_inner();
        debug!(
            resource_type = %req.resource_type,
            version = req.version,
            "UpgradeResourceState called"
        );
        let state = serde_json::from_slice(&req.raw_state).unwrap_or(Value::Null);

        match self
            .provider
            .upgrade_resource_state(&req.resource_type, req.version, state)
            .await
        {
            Ok(upgraded) => {
                info!(
                    resource_type = %req.resource_type,
                    from_version = req.version,
                    "UpgradeResourceState completed"
                );
                Ok(tonic::Response::new(crate::generated::UpgradeResourceStateResponse {
                    upgraded_state: serde_json::to_vec(&upgraded).unwrap_or_default(),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(
                    resource_type = %req.resource_type,
                    version = req.version,
                    error = %e,
                    "UpgradeResourceState failed"
                );
                Ok(tonic::Response::new(crate::generated::UpgradeResourceStateResponse {
                    upgraded_state: vec![],
                    diagnostics: self.error_to_diagnostics(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.plan_resource_change")]
    async fn plan_resource_change(
        &self,
        request: tonic::Request<crate::generated::PlanResourceChangeRequest>,
    ) -> Result<tonic::Response<crate::generated::PlanResourceChangeResponse>, tonic::Status> {
        let ctx = self.call_context(&request);
        let req = request.into_inner();
        debug!(
            resource_type = %req.resource_type,
            is_create = req.prior_state.is_empty(),
            "PlanResourceChange called"
        );

        let result = async {
            let prior = decode_optional(&req.prior_state)?;
            let config = decode_optional(&req.config)?;
            let result = self
                .provider
                .plan_resource_change(&ctx, &req.resource_type, prior, config)
                .await?;
            let private = result.plan.to_private()?;
            Ok::<_, ProviderError>((result, private))
        }
        .await;

        match result {
            Ok((result, private)) => {
                info!(
                    resource_type = %req.resource_type,
                    action = %result.plan.action,
                    changes = result.changes.len(),
                    "PlanResourceChange completed"
                );
                let planned_state = result.plan.planned_state.clone().map(Value::Object);
                let requires_replace = result.requires_replace();
                let action = serde_json::to_value(result.plan.action)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                Ok(tonic::Response::new(crate::generated::PlanResourceChangeResponse {
                    planned_state: encode_optional(planned_state),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace,
                    planned_private: private,
                    action,
                    diagnostics: self.diagnostics_to_proto(result.diagnostics),
                }))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "PlanResourceChange failed");
                Ok(tonic::Response::new(crate::generated::PlanResourceChangeResponse {
                    diagnostics: self.error_to_diagnostics(e),
                    ..Default::default()
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.apply_resource_change")]
    async fn apply_resource_change(
        &self,
        request: tonic::Request<crate::generated::ApplyResourceChangeRequest>,
    ) -> Result<tonic::Response<crate::generated::ApplyResourceChangeResponse>, tonic::Status> {
        let ctx = self.call_context(&request);
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "ApplyResourceChange called");

        let result = async {
            let prior = decode_optional(&req.prior_state)?;
            let planned = decode_optional(&req.planned_state)?;
            let config = decode_optional(&req.config)?;
            self.provider
                .apply_resource_change(
                    &ctx,
                    &req.resource_type,
                    prior,
                    planned,
                    config,
                    &req.planned_private,
                )
                .await
        }
        .await;

        match result {
            Ok(result) => {
                log_diagnostics("ApplyResourceChange", &req.resource_type, &result.diagnostics);
                Ok(tonic::Response::new(crate::generated::ApplyResourceChangeResponse {
                    new_state: encode_optional(result.new_state.map(|s| s.to_value())),
                    diagnostics: self.diagnostics_to_proto(result.diagnostics),
                }))
            },
            Err(e) => {
                error!(
                    resource_type = %req.resource_type,
                    error = %e,
                    "ApplyResourceChange failed"
                );
                Ok(tonic::Response::new(crate::generated::ApplyResourceChangeResponse {
                    new_state: req.prior_state,
                    diagnostics: self.error_to_diagnostics(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.read_resource")]
    async fn read_resource(
        &self,
        request: tonic::Request<crate::generated::ReadResourceRequest>,
    ) -> Result<tonic::Response<crate::generated::ReadResourceResponse>, tonic::Status> {
        let ctx = self.call_context(&request);
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, "ReadResource called");
        let current_state = serde_json::from_slice(&req.current_state).unwrap_or(Value::Null);

        match self
            .provider
            .read_resource(&ctx, &req.resource_type, current_state)
            .await
        {
            Ok(result) => {
                debug!(
                    resource_type = %req.resource_type,
                    gone = result.state.is_none(),
                    "ReadResource completed"
                );
                Ok(tonic::Response::new(crate::generated::ReadResourceResponse {
                    new_state: encode_optional(result.state.map(|s| s.to_value())),
                    diagnostics: self.diagnostics_to_proto(result.diagnostics),
                }))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "ReadResource failed");
                Ok(tonic::Response::new(crate::generated::ReadResourceResponse {
                    new_state: req.current_state,
                    diagnostics: self.error_to_diagnostics(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: tonic::Request<crate::generated::ImportResourceStateRequest>,
    ) -> Result<tonic::Response<crate::generated::ImportResourceStateResponse>, tonic::Status> {
        let ctx = self.call_context(&request);
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, id = %req.id, "ImportResourceState called");

        match self
            .provider
            .import_resource_state(&ctx, &req.resource_type, &req.id)
            .await
        {
            Ok(imported) => {
                info!(
                    resource_type = %req.resource_type,
                    id = %req.id,
                    imported_count = imported.len(),
                    "ImportResourceState completed"
                );
                Ok(tonic::Response::new(crate::generated::ImportResourceStateResponse {
                    imported: imported
                        .into_iter()
                        .map(|r| crate::generated::ImportedResource {
                            resource_type: r.resource_type,
                            state: serde_json::to_vec(&r.state.to_value()).unwrap_or_default(),
                        })
                        .collect(),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(
                    resource_type = %req.resource_type,
                    id = %req.id,
                    error = %e,
                    "ImportResourceState failed"
                );
                Ok(tonic::Response::new(crate::generated::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: self.error_to_diagnostics(e),
                }))
            },
        }
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long in-flight calls may run after a shutdown signal before
    /// they are cancelled. Default: 30 seconds.
    pub shutdown_timeout: Duration,
    /// How long cancelled calls get to report their partial state.
    /// Default: 5 seconds.
    pub cancel_grace: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the grace period after cancellation.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }
}

/// Wait for SIGTERM or SIGINT (CTRL+C on Windows).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to install signal handlers; shutdown only via Stop");
                    return std::future::pending::<()>().await;
                },
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(windows)]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install CTRL+C handler; shutdown only via Stop");
            return std::future::pending::<()>().await;
        }
        info!("Received CTRL+C, initiating graceful shutdown");
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::future::pending::<()>().await;
    }
}

/// Serve a provider on an ephemeral localhost port.
///
/// Prints `SNOWFLAKE_PROVIDER|<protocol version>|<address>` to stdout once
/// the port is bound, then serves until a shutdown signal arrives.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider on an ephemeral localhost port with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    serve_on_listener(provider, listener, addr, options).await
}

/// Serve a provider on a specific address.
pub async fn serve_on<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

/// Serve a provider on a specific address with custom options.
pub async fn serve_on_with_options<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    serve_on_listener(provider, listener, actual_addr, options).await
}

async fn serve_on_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);

    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let root = CancellationToken::new();
    let draining = CancellationToken::new();

    let grpc_service = ProviderGrpcService::new(Arc::clone(&provider), root.clone());
    let server = crate::generated::provider_server::ProviderServer::new(grpc_service);

    let signal = draining.clone();
    let stopped = root.clone();
    let server_future = Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async move {
                tokio::select! {
                    _ = wait_for_shutdown_signal() => {},
                    _ = stopped.cancelled() => {},
                }
                signal.cancel();
            },
        );
    tokio::pin!(server_future);

    let drained = tokio::select! {
        result = &mut server_future => Some(result),
        _ = async {
            draining.cancelled().await;
            tokio::time::sleep(options.shutdown_timeout).await;
        } => None,
    };

    let result = match drained {
        Some(result) => result,
        None => {
            warn!(
                timeout = ?options.shutdown_timeout,
                "Shutdown timeout exceeded, cancelling in-flight calls"
            );
            root.cancel();
            match tokio::time::timeout(options.cancel_grace, &mut server_future).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        grace = ?options.cancel_grace,
                        "In-flight calls did not finish, forcing shutdown"
                    );
                    Ok(())
                },
            }
        },
    };

    if let Err(e) = result {
        error!(error = %e, "Server error during shutdown");
        return Err(e.into());
    }
    info!("Server shutdown complete");

    debug!("Calling provider stop()");
    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }

    info!("Provider shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::provider_server::Provider;
    use crate::provider::SnowflakeProvider;
    use crate::testing::FakeSnowflake;
    use serde_json::json;

    fn service(fake: &FakeSnowflake) -> ProviderGrpcService<SnowflakeProvider> {
        let provider = SnowflakeProvider::new(Arc::new(fake.clone())).with_env(|_| None);
        ProviderGrpcService::new(Arc::new(provider), CancellationToken::new())
    }

    async fn configure(service: &ProviderGrpcService<SnowflakeProvider>) {
        let response = service
            .configure(tonic::Request::new(crate::generated::ConfigureRequest {
                config: serde_json::to_vec(
                    &json!({"preview_features_enabled": ["snowflake_compute_pool"]}),
                )
                .unwrap(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
    }

    #[test]
    fn test_parse_grpc_timeout() {
        assert_eq!(parse_grpc_timeout("5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("2M"), Some(Duration::from_secs(120)));
        assert_eq!(parse_grpc_timeout("S"), None);
        assert_eq!(parse_grpc_timeout("123456789S"), None);
        assert_eq!(parse_grpc_timeout("5x"), None);
        assert_eq!(parse_grpc_timeout(""), None);
    }

    #[test]
    fn test_call_context_uses_grpc_timeout() {
        let fake = FakeSnowflake::new();
        let service = service(&fake);
        let mut request = tonic::Request::new(crate::generated::StopRequest {});
        request
            .metadata_mut()
            .insert(GRPC_TIMEOUT_HEADER, "10S".parse().unwrap());
        tokio_test::block_on(async {
            let ctx = service.call_context(&request);
            assert!(ctx.deadline().is_some());
            service.root.cancel();
            assert!(ctx.is_cancelled());
        });
    }

    #[tokio::test]
    async fn test_schema_and_metadata() {
        let fake = FakeSnowflake::new();
        let service = service(&fake);

        let metadata = service
            .get_metadata(tonic::Request::new(crate::generated::GetMetadataRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(metadata.resources.len(), 7);
        assert!(metadata.preview_resources.contains(&"snowflake_streamlit".to_string()));

        let schema = service
            .get_schema(tonic::Request::new(crate::generated::GetSchemaRequest {}))
            .await
            .unwrap()
            .into_inner();
        let user = &schema.resources["snowflake_user"];
        assert_eq!(user.version, 1);
        let password = user.attributes.iter().find(|a| a.name == "password").unwrap();
        assert!(password.sensitive);
        assert!(password.optional);
        let pool = &schema.resources["snowflake_compute_pool"];
        let family = pool.attributes.iter().find(|a| a.name == "instance_family").unwrap();
        assert!(family.force_new);
        assert_eq!(family.mutation, "force_new");
    }

    #[tokio::test]
    async fn test_plan_apply_round_trip_over_the_wire() {
        let fake = FakeSnowflake::new();
        let service = service(&fake);
        configure(&service).await;

        let config =
            serde_json::to_vec(&json!({"name": "POOL_A", "instance_family": "CPU_X64_XS"}))
                .unwrap();
        let plan = service
            .plan_resource_change(tonic::Request::new(crate::generated::PlanResourceChangeRequest {
                resource_type: "snowflake_compute_pool".into(),
                prior_state: vec![],
                config: config.clone(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(plan.diagnostics.is_empty(), "{:?}", plan.diagnostics);
        assert_eq!(plan.action, "create");
        assert!(!plan.planned_private.is_empty());

        let request = crate::generated::ApplyResourceChangeRequest {
            resource_type: "snowflake_compute_pool".into(),
            prior_state: vec![],
            planned_state: plan.planned_state,
            config,
            planned_private: plan.planned_private,
        };
        let applied = service
            .apply_resource_change(tonic::Request::new(request))
            .await
            .unwrap()
            .into_inner();
        assert!(applied.diagnostics.is_empty(), "{:?}", applied.diagnostics);
        let state: Value = serde_json::from_slice(&applied.new_state).unwrap();
        assert_eq!(state["attributes"]["owner"], json!("ACCOUNTADMIN"));
        assert!(fake.has_object("COMPUTE POOL", "\"POOL_A\""));
    }

    #[tokio::test]
    async fn test_errors_become_diagnostics() {
        let fake = FakeSnowflake::new();
        let service = service(&fake);
        configure(&service).await;

        let response = service
            .plan_resource_change(tonic::Request::new(crate::generated::PlanResourceChangeRequest {
                resource_type: "snowflake_widget".into(),
                prior_state: vec![],
                config: b"{}".to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(
            response.diagnostics[0].severity,
            crate::generated::diagnostic::Severity::Error as i32
        );
        assert!(response.diagnostics[0].summary.contains("snowflake_widget"));

        let response = service
            .plan_resource_change(tonic::Request::new(crate::generated::PlanResourceChangeRequest {
                resource_type: "snowflake_database".into(),
                prior_state: b"{not json".to_vec(),
                config: b"{}".to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.diagnostics[0].summary.contains("Serialization"));
    }

    #[tokio::test]
    async fn test_stop_cancels_root() {
        let fake = FakeSnowflake::new();
        let service = service(&fake);
        let response = service
            .stop(tonic::Request::new(crate::generated::StopRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert!(response.error.is_empty());
        assert!(service.root.is_cancelled());
    }
}
