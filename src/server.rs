//! gRPC surface of the provider.
//!
//! [`ProviderService`] is the Rust-typed view of the host protocol; the
//! wrapper in this module adapts it to the generated tonic service. [`serve`]
//! binds a local port, prints the handshake line and runs until SIGTERM or
//! SIGINT.
//!
//! # Shutdown
//!
//! On a signal the server stops accepting connections and calls
//! [`ProviderService::stop`], which aborts consistency polling still in
//! flight. In-flight requests then get [`ServeOptions::shutdown_timeout`] to
//! finish before the process moves on.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated as pb;
use crate::schema::{
    Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema,
};
use crate::types::{
    handshake_line, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
};

/// Host protocol operations, with JSON state as [`serde_json::Value`].
///
/// Only the schema, `configure` and the resource CRUD calls are required;
/// everything else has a permissive default.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Provider, resource and data source schemas.
    fn schema(&self) -> ProviderSchema;

    /// Resource and data source names, derived from the schema by default.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    /// Check the provider block before `configure`.
    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Apply the provider block. Error diagnostics leave the provider
    /// unconfigured.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Abort outstanding work.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Check a resource block before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Migrate state written by an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Compute the planned state. `prior_state` is `None` for a create and
    /// `proposed_state` is null for a delete.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create the remote object.
    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Refresh state. Null means the object is gone.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update the remote object in place.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete the remote object.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Bring an existing object under management.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "import is not supported for {}",
            resource_type
        )))
    }

    /// Check a data source block.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Look up a data source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!(
            "data source {}",
            data_source_type
        )))
    }
}

struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

/// Decode a JSON payload; an empty payload is null.
fn decode(field: &str, bytes: &[u8]) -> Result<Value, ProviderError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes)
        .map_err(|err| {
            ProviderError::InvalidRequest(format!("{} is not valid JSON: {}", field, err))
        })
}

fn encode(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<pb::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| pb::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => pb::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => pb::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_diagnostics(err: ProviderError) -> Vec<pb::Diagnostic> {
    diagnostics_to_proto(vec![Diagnostic::error(err.to_string())])
}

/// Log the outcome of a validation-style call and convert it.
fn report(
    operation: &str,
    subject: &str,
    result: Result<Vec<Diagnostic>, ProviderError>,
) -> Vec<pb::Diagnostic> {
    match result {
        Ok(diagnostics) => {
            if diagnostics.iter().any(Diagnostic::is_error) {
                warn!(
                    subject,
                    diagnostics = diagnostics.len(),
                    "{} completed with errors",
                    operation
                );
            } else {
                debug!(subject, "{} completed", operation);
            }
            diagnostics_to_proto(diagnostics)
        }
        Err(err) => {
            error!(subject, error = %err, "{} failed", operation);
            error_to_diagnostics(err)
        }
    }
}

fn schema_to_proto(schema: &Schema) -> pb::Schema {
    pb::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &Block) -> pb::Block {
    let mut attributes: Vec<pb::Attribute> = block
        .attributes
        .iter()
        .map(|(name, attr)| pb::Attribute {
            name: name.clone(),
            r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
            required: attr.flags.required,
            optional: attr.flags.optional,
            computed: attr.flags.computed,
            sensitive: attr.flags.sensitive,
            description: attr.description.clone().unwrap_or_default(),
            force_new: attr.force_new,
            default_value: attr.default.as_ref().map(encode).unwrap_or_default(),
        })
        .collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut block_types: Vec<pb::NestedBlock> = block
        .blocks
        .iter()
        .map(|(name, nested)| pb::NestedBlock {
            type_name: name.clone(),
            block: Some(block_to_proto(&nested.block)),
            nesting_mode: match nested.nesting_mode {
                BlockNestingMode::Single => pb::nested_block::NestingMode::Single as i32,
                BlockNestingMode::List => pb::nested_block::NestingMode::List as i32,
                BlockNestingMode::Set => pb::nested_block::NestingMode::Set as i32,
            },
            min_items: nested.min_items as i32,
            max_items: nested.max_items as i32,
        })
        .collect();
    block_types.sort_by(|a, b| a.type_name.cmp(&b.type_name));

    pb::Block {
        attributes,
        block_types,
        description: block.description.clone().unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl<P: ProviderService> pb::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: Request<pb::GetMetadataRequest>,
    ) -> Result<Response<pb::GetMetadataResponse>, Status> {
        let metadata = self.provider.metadata();
        debug!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata completed"
        );
        Ok(Response::new(pb::GetMetadataResponse {
            server_capabilities: Some(pb::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: Request<pb::GetSchemaRequest>,
    ) -> Result<Response<pb::GetSchemaResponse>, Status> {
        let schema = self.provider.schema();
        debug!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetSchema completed"
        );
        Ok(Response::new(pb::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(name, schema)| (name.clone(), schema_to_proto(schema)))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(name, schema)| (name.clone(), schema_to_proto(schema)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: Request<pb::ValidateProviderConfigRequest>,
    ) -> Result<Response<pb::ValidateProviderConfigResponse>, Status> {
        let req = request.into_inner();
        let result = match decode("config", &req.config) {
            Ok(config) => self.provider.validate_provider_config(config).await,
            Err(err) => Err(err),
        };
        Ok(Response::new(pb::ValidateProviderConfigResponse {
            diagnostics: report("ValidateProviderConfig", "provider", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(
        &self,
        request: Request<pb::ConfigureRequest>,
    ) -> Result<Response<pb::ConfigureResponse>, Status> {
        let req = request.into_inner();
        let result = match decode("config", &req.config) {
            Ok(config) => self.provider.configure(config).await,
            Err(err) => Err(err),
        };
        Ok(Response::new(pb::ConfigureResponse {
            diagnostics: report("Configure", "provider", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(
        &self,
        _request: Request<pb::StopRequest>,
    ) -> Result<Response<pb::StopResponse>, Status> {
        info!("Stop requested");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(err) => {
                error!(error = %err, "Stop failed");
                err.to_string()
            }
        };
        Ok(Response::new(pb::StopResponse { error }))
    }

    #[instrument(
        skip_all,
        name = "grpc.validate_resource_config",
        fields(resource_type = tracing::field::Empty)
    )]
    async fn validate_resource_config(
        &self,
        request: Request<pb::ValidateResourceConfigRequest>,
    ) -> Result<Response<pb::ValidateResourceConfigResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = match decode("config", &req.config) {
            Ok(config) => {
                self.provider
                    .validate_resource_config(&req.resource_type, config)
                    .await
            }
            Err(err) => Err(err),
        };
        Ok(Response::new(pb::ValidateResourceConfigResponse {
            diagnostics: report("ValidateResourceConfig", &req.resource_type, result),
        }))
    }

    #[instrument(
        skip_all,
        name = "grpc.upgrade_resource_state",
        fields(resource_type = tracing::field::Empty)
    )]
    async fn upgrade_resource_state(
        &self,
        request: Request<pb::UpgradeResourceStateRequest>,
    ) -> Result<Response<pb::UpgradeResourceStateResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = match decode("raw_state", &req.raw_state) {
            Ok(state) => {
                self.provider
                    .upgrade_resource_state(&req.resource_type, req.version, state)
                    .await
            }
            Err(err) => Err(err),
        };

        let response = match result {
            Ok(upgraded) => pb::UpgradeResourceStateResponse {
                upgraded_state: encode(&upgraded),
                diagnostics: vec![],
            },
            Err(err) => {
                error!(version = req.version, error = %err, "UpgradeResourceState failed");
                pb::UpgradeResourceStateResponse {
                    upgraded_state: vec![],
                    diagnostics: error_to_diagnostics(err),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.plan", fields(resource_type = tracing::field::Empty))]
    async fn plan(
        &self,
        request: Request<pb::PlanRequest>,
    ) -> Result<Response<pb::PlanResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());

        let decoded = (|| {
            let prior = match decode("prior_state", &req.prior_state)? {
                Value::Null => None,
                prior => Some(prior),
            };
            Ok::<_, ProviderError>((
                prior,
                decode("proposed_state", &req.proposed_state)?,
                decode("config", &req.config)?,
            ))
        })();
        let result = match decoded {
            Ok((prior, proposed, config)) => {
                self.provider
                    .plan(&req.resource_type, prior, proposed, config)
                    .await
            }
            Err(err) => Err(err),
        };

        let response = match result {
            Ok(plan) => {
                info!(
                    changes = plan.changes.len(),
                    requires_replace = plan.requires_replace,
                    "Plan completed"
                );
                pb::PlanResponse {
                    planned_state: encode(&plan.planned_state),
                    changes: plan.changes.into_iter().map(Into::into).collect(),
                    requires_replace: plan.requires_replace,
                    diagnostics: vec![],
                }
            }
            Err(err) => {
                error!(error = %err, "Plan failed");
                pb::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_diagnostics(err),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.create", fields(resource_type = tracing::field::Empty))]
    async fn create(
        &self,
        request: Request<pb::CreateRequest>,
    ) -> Result<Response<pb::CreateResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = match decode("planned_state", &req.planned_state) {
            Ok(planned) => self.provider.create(&req.resource_type, planned).await,
            Err(err) => Err(err),
        };

        let response = match result {
            Ok(state) => {
                info!("Create completed");
                pb::CreateResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }
            }
            Err(err) => {
                error!(error = %err, "Create failed");
                pb::CreateResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(err),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.read", fields(resource_type = tracing::field::Empty))]
    async fn read(
        &self,
        request: Request<pb::ReadRequest>,
    ) -> Result<Response<pb::ReadResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = match decode("current_state", &req.current_state) {
            Ok(current) => self.provider.read(&req.resource_type, current).await,
            Err(err) => Err(err),
        };

        let response = match result {
            Ok(state) => {
                debug!(gone = state.is_null(), "Read completed");
                pb::ReadResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }
            }
            Err(err) => {
                error!(error = %err, "Read failed");
                pb::ReadResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(err),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.update", fields(resource_type = tracing::field::Empty))]
    async fn update(
        &self,
        request: Request<pb::UpdateRequest>,
    ) -> Result<Response<pb::UpdateResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let decoded = decode("prior_state", &req.prior_state)
            .and_then(|prior| Ok((prior, decode("planned_state", &req.planned_state)?)));
        let result = match decoded {
            Ok((prior, planned)) => self.provider.update(&req.resource_type, prior, planned).await,
            Err(err) => Err(err),
        };

        let response = match result {
            Ok(state) => {
                info!("Update completed");
                pb::UpdateResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }
            }
            Err(err) => {
                error!(error = %err, "Update failed");
                pb::UpdateResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(err),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.delete", fields(resource_type = tracing::field::Empty))]
    async fn delete(
        &self,
        request: Request<pb::DeleteRequest>,
    ) -> Result<Response<pb::DeleteResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = match decode("current_state", &req.current_state) {
            Ok(current) => self.provider.delete(&req.resource_type, current).await,
            Err(err) => Err(err),
        };

        let diagnostics = match result {
            Ok(()) => {
                info!("Delete completed");
                vec![]
            }
            Err(err) => {
                error!(error = %err, "Delete failed");
                error_to_diagnostics(err)
            }
        };
        Ok(Response::new(pb::DeleteResponse { diagnostics }))
    }

    #[instrument(
        skip_all,
        name = "grpc.import_resource_state",
        fields(resource_type = tracing::field::Empty, id = tracing::field::Empty)
    )]
    async fn import_resource_state(
        &self,
        request: Request<pb::ImportResourceStateRequest>,
    ) -> Result<Response<pb::ImportResourceStateResponse>, Status> {
        let req = request.into_inner();
        let span = tracing::Span::current();
        span.record("resource_type", req.resource_type.as_str());
        span.record("id", req.id.as_str());

        let response = match self.provider.import_resource(&req.resource_type, &req.id).await {
            Ok(imported) => {
                info!(imported = imported.len(), "ImportResourceState completed");
                pb::ImportResourceStateResponse {
                    imported: imported
                        .into_iter()
                        .map(|r| pb::ImportedResource {
                            resource_type: r.resource_type,
                            state: encode(&r.state),
                        })
                        .collect(),
                    diagnostics: vec![],
                }
            }
            Err(err) => {
                error!(error = %err, "ImportResourceState failed");
                pb::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: error_to_diagnostics(err),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(
        skip_all,
        name = "grpc.validate_data_source_config",
        fields(data_source_type = tracing::field::Empty)
    )]
    async fn validate_data_source_config(
        &self,
        request: Request<pb::ValidateDataSourceConfigRequest>,
    ) -> Result<Response<pb::ValidateDataSourceConfigResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let result = match decode("config", &req.config) {
            Ok(config) => {
                self.provider
                    .validate_data_source_config(&req.data_source_type, config)
                    .await
            }
            Err(err) => Err(err),
        };
        Ok(Response::new(pb::ValidateDataSourceConfigResponse {
            diagnostics: report("ValidateDataSourceConfig", &req.data_source_type, result),
        }))
    }

    #[instrument(
        skip_all,
        name = "grpc.read_data_source",
        fields(data_source_type = tracing::field::Empty)
    )]
    async fn read_data_source(
        &self,
        request: Request<pb::ReadDataSourceRequest>,
    ) -> Result<Response<pb::ReadDataSourceResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let result = match decode("config", &req.config) {
            Ok(config) => self.provider.read_data_source(&req.data_source_type, config).await,
            Err(err) => Err(err),
        };

        let response = match result {
            Ok(state) => {
                debug!("ReadDataSource completed");
                pb::ReadDataSourceResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }
            }
            Err(err) => {
                error!(error = %err, "ReadDataSource failed");
                pb::ReadDataSourceResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(err),
                }
            }
        };
        Ok(Response::new(response))
    }
}

/// Options for [`serve_with_options`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long in-flight requests may run after a shutdown signal.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Resolve on SIGTERM or SIGINT (CTRL+C elsewhere). Never resolves when the
/// handlers cannot be installed.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    _ = sigint.recv() => info!("Received SIGINT, shutting down"),
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                error!(error = %err, "Failed to install signal handlers");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
        info!("Received CTRL+C, shutting down");
    }
}

/// Serve `provider` on a free local port with default options.
///
/// Prints `GOOGLEWORKSPACE_PROVIDER|<version>|<address>` on stdout once the
/// listener is bound.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Like [`serve`], with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    serve_on_listener(provider, listener, options).await
}

/// Serve on a fixed address.
pub async fn serve_on<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

/// Serve on a fixed address with custom options.
pub async fn serve_on_with_options<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    serve_on_listener(provider, listener, options).await
}

async fn serve_on_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = listener.local_addr()?;
    println!("{}", handshake_line(addr));
    info!(address = %addr, "Provider server listening");

    let provider = Arc::new(provider);
    let service = pb::provider_server::ProviderServer::new(ProviderGrpcService {
        provider: Arc::clone(&provider),
    });

    let (signalled_tx, signalled_rx) = oneshot::channel();
    let server = Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async move {
                wait_for_shutdown_signal().await;
                let _ = signalled_tx.send(());
            },
        );
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result?;
            info!("Server exited");
            return Ok(());
        }
        Ok(()) = signalled_rx => {}
    }

    if let Err(err) = provider.stop().await {
        warn!(error = %err, "Provider stop returned an error");
    }

    match tokio::time::timeout(options.shutdown_timeout, &mut server).await {
        Ok(Ok(())) => info!("Server shutdown complete"),
        Ok(Err(err)) => {
            error!(error = %err, "Server error during shutdown");
            return Err(err.into());
        }
        Err(_) => warn!(
            timeout = ?options.shutdown_timeout,
            "Shutdown timeout exceeded, abandoning in-flight requests"
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::provider_server::Provider;
    use crate::provider::WorkspaceProvider;
    use crate::schema::{Attribute, NestedBlock};
    use serde_json::json;

    fn service() -> ProviderGrpcService<WorkspaceProvider> {
        ProviderGrpcService {
            provider: Arc::new(WorkspaceProvider::new()),
        }
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode("config", b"").unwrap(), Value::Null);
        assert_eq!(decode("config", br#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(matches!(
            decode("config", b"{"),
            Err(ProviderError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_block_to_proto_is_sorted() {
        let block = Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("email", Attribute::required_string().with_force_new())
            .with_block(
                "privileges",
                NestedBlock::set(
                    Block::new().with_attribute("service_id", Attribute::required_string()),
                )
                .with_min_items(1),
            );
        let proto = block_to_proto(&block);
        let names: Vec<&str> = proto.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["email", "name"]);
        assert!(proto.attributes[0].force_new);
        assert_eq!(proto.block_types[0].type_name, "privileges");
        assert_eq!(
            proto.block_types[0].nesting_mode,
            pb::nested_block::NestingMode::Set as i32
        );
        assert_eq!(proto.block_types[0].min_items, 1);
    }

    #[tokio::test]
    async fn test_get_schema_lists_workspace_types() {
        let response = service()
            .get_schema(Request::new(pb::GetSchemaRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert!(response.provider.is_some());
        assert!(response.resources.contains_key("googleworkspace_user"));
        assert!(response.data_sources.contains_key("googleworkspace_role"));
    }

    #[tokio::test]
    async fn test_read_before_configure_reports_diagnostic() {
        let response = service()
            .read(Request::new(pb::ReadRequest {
                resource_type: "googleworkspace_group".into(),
                current_state: br#"{"id":"grp-1"}"#.to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.state.is_empty());
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(
            response.diagnostics[0].severity,
            pb::diagnostic::Severity::Error as i32
        );
    }

    #[tokio::test]
    async fn test_invalid_json_becomes_diagnostic() {
        let response = service()
            .create(Request::new(pb::CreateRequest {
                resource_type: "googleworkspace_group".into(),
                planned_state: b"not json".to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.diagnostics[0].summary.contains("planned_state"));
    }
}
