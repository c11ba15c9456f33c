//! The Google Workspace provider.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::client::{HttpTransport, Transport, WorkspaceClient};
use crate::config::ProviderConfig;
use crate::consistency::PollOptions;
use crate::error::ProviderError;
use crate::plan::plan_resource;
use crate::resources::{Registry, ResourceContext};
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation;

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// [`ProviderService`] over the registered Workspace resources.
///
/// The API client is built by `configure`; every resource call before that
/// fails with [`ProviderError::FailedPrecondition`].
pub struct WorkspaceProvider {
    registry: Registry,
    context: RwLock<Option<Arc<ResourceContext>>>,
    stop: watch::Sender<bool>,
    transport: Option<Arc<dyn Transport>>,
    poll: PollOptions,
    retry_budget: Option<Duration>,
    env_lookup: fn(&str) -> Option<String>,
}

impl Default for WorkspaceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceProvider {
    /// A provider with every Workspace resource registered.
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            registry: Registry::workspace(),
            context: RwLock::new(None),
            stop,
            transport: None,
            poll: PollOptions::default(),
            retry_budget: None,
            env_lookup: process_env,
        }
    }

    /// Send API calls through `transport` instead of HTTPS.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the consistency poll schedule.
    pub fn with_poll_options(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }

    /// Override how long transient API failures are retried.
    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = Some(budget);
        self
    }

    /// Read environment fallbacks through `lookup` instead of the process
    /// environment.
    pub fn with_env_lookup(mut self, lookup: fn(&str) -> Option<String>) -> Self {
        self.env_lookup = lookup;
        self
    }

    /// The resource and data source handlers.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn load_config(&self, config: Value) -> Result<ProviderConfig, ProviderError> {
        Ok(ProviderConfig::from_value(config)?.with_env_fallbacks_from(self.env_lookup))
    }

    async fn context(&self) -> Result<Arc<ResourceContext>, ProviderError> {
        self.context.read().await.clone().ok_or_else(|| {
            ProviderError::FailedPrecondition("the provider has not been configured".into())
        })
    }
}

/// Turn error diagnostics into a single validation error.
fn reject_invalid(resource_type: &str, diagnostics: Vec<Diagnostic>) -> Result<(), ProviderError> {
    let errors: Vec<String> = diagnostics
        .into_iter()
        .filter(Diagnostic::is_error)
        .map(|d| match d.attribute {
            Some(attribute) => format!("{}: {}", attribute, d.summary),
            None => d.summary,
        })
        .collect();
    if errors.is_empty() {
        return Ok(());
    }
    Err(ProviderError::Validation(format!(
        "invalid {} configuration: {}",
        resource_type,
        errors.join("; ")
    )))
}

#[async_trait::async_trait]
impl ProviderService for WorkspaceProvider {
    fn schema(&self) -> ProviderSchema {
        self.registry.schema()
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validation::validate(&ProviderConfig::schema(), &config);
        diagnostics.extend(self.load_config(config)?.validate());
        Ok(diagnostics)
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config = self.load_config(config)?;
        let diagnostics = config.validate();
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }
        let customer_id = config
            .customer_id
            .clone()
            .ok_or_else(|| ProviderError::Configuration("customer_id is not set".into()))?;

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::new(config.token_source().await?)?),
        };
        let mut client = WorkspaceClient::new(transport, &customer_id);
        if let Some(budget) = self.retry_budget {
            client = client.with_retry_budget(budget);
        }

        self.stop.send_replace(false);
        let context = ResourceContext::new(client)
            .with_timeouts(config.timeouts())
            .with_poll_options(self.poll.clone())
            .with_stop_signal(self.stop.subscribe());
        *self.context.write().await = Some(Arc::new(context));

        info!(
            customer_id = %customer_id,
            impersonating = config.impersonated_user_email.as_deref().unwrap_or(""),
            "Provider configured"
        );
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.stop.send_replace(true);
        info!("Provider stopped; pending consistency waits are cancelled");
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let mut diagnostics = validation::validate(&resource.schema(), &config);
        diagnostics.extend(resource.validate(&config));
        Ok(diagnostics)
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let current = self.registry.resource(resource_type)?.schema().version;
        if version > current as i64 {
            return Err(ProviderError::FailedPrecondition(format!(
                "{} state version {} is newer than this provider's schema version {}",
                resource_type, version, current
            )));
        }
        Ok(state)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let schema = resource.schema();
        if !proposed_state.is_null() {
            reject_invalid(resource_type, validation::validate(&schema, &proposed_state))?;
        }
        let plan = plan_resource(&schema, prior_state.as_ref(), &proposed_state);
        debug!(
            resource_type,
            changes = plan.changes.len(),
            requires_replace = plan.requires_replace,
            "Planned"
        );
        Ok(plan)
    }

    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let ctx = self.context().await?;
        resource.create(&ctx, planned_state).await
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let ctx = self.context().await?;
        match resource.read(&ctx, current_state).await? {
            Some(state) => Ok(state),
            None => {
                info!(resource_type, "Remote object is gone, dropping it from state");
                Ok(Value::Null)
            }
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let ctx = self.context().await?;
        resource.update(&ctx, prior_state, planned_state).await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let ctx = self.context().await?;
        resource.delete(&ctx, current_state).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let ctx = self.context().await?;
        let state = resource
            .import(&ctx, id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} {}", resource_type, id)))?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let data_source = self.registry.data_source(data_source_type)?;
        let mut diagnostics = validation::validate(&data_source.schema(), &config);
        diagnostics.extend(data_source.validate(&config));
        Ok(diagnostics)
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let data_source = self.registry.data_source(data_source_type)?;
        reject_invalid(data_source_type, data_source.validate(&config))?;
        let ctx = self.context().await?;
        data_source.read(&ctx, config).await
    }
}
