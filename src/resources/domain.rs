use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{
    data_source_schema, found, from_state, ignore_not_found, require_id, to_state, DataSource,
    Resource, ResourceContext,
};
use crate::client::models::Domain;
use crate::client::{escape, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

const KIND: &str = "domain";

/// `googleworkspace_domain`
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainResource;

/// `googleworkspace_domain` data source, looked up by `domain_name`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainDataSource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct DomainState {
    id: Option<String>,
    domain_name: Option<String>,
    verified: Option<bool>,
    is_primary: Option<bool>,
    creation_time: Option<String>,
    domain_aliases: Option<Vec<String>>,
    etag: Option<String>,
}

impl DomainState {
    fn from_api(domain: Domain) -> Self {
        Self {
            id: domain.domain_name.clone(),
            domain_name: domain.domain_name,
            verified: domain.verified,
            is_primary: domain.is_primary,
            creation_time: domain.creation_time,
            domain_aliases: Some(
                domain
                    .domain_aliases
                    .into_iter()
                    .filter_map(|alias| alias.domain_alias_name)
                    .collect(),
            ),
            etag: domain.etag,
        }
    }

    fn key(&self) -> Result<&str, ProviderError> {
        match self.domain_name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => Ok(name),
            None => require_id(&self.id, KIND),
        }
    }
}

fn domain_path(customer: &str, name: &str) -> String {
    format!("customer/{}/domains/{}", escape(customer), escape(name))
}

async fn fetch(ctx: &ResourceContext, name: &str) -> Result<Option<Domain>, ProviderError> {
    found(
        ctx.client
            .get(Service::Directory, &domain_path(ctx.customer(), name))
            .await,
    )
}

fn domain_schema() -> Schema {
    Schema::v0()
        .with_description("Manages a secondary domain of the customer.")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "domain_name",
            Attribute::required_string()
                .with_force_new()
                .with_description("The domain name, e.g. example.com."),
        )
        .with_attribute("verified", Attribute::computed_bool())
        .with_attribute("is_primary", Attribute::computed_bool())
        .with_attribute(
            "creation_time",
            Attribute::computed_string()
                .with_description("Creation time in milliseconds since the epoch."),
        )
        .with_attribute("domain_aliases", Attribute::computed_string_set())
        .with_attribute("etag", Attribute::computed_string())
}

#[async_trait]
impl Resource for DomainResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_domain"
    }

    fn schema(&self) -> Schema {
        domain_schema()
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: DomainState = from_state(planned)?;
        let name = planned.key()?.to_string();
        let body = Domain {
            domain_name: Some(name.clone()),
            ..Domain::default()
        };
        let collection = format!("customer/{}/domains", escape(ctx.customer()));
        ctx.client
            .insert::<_, Domain>(Service::Directory, &collection, &body)
            .await?;
        info!(domain = %name, "Created domain");

        ctx.wait_until_consistent(
            KIND,
            ctx.timeouts.create,
            &domain_path(ctx.customer(), &name),
            1,
        )
        .await?;
        let domain = fetch(ctx, &name)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("domain {}", name)))?;
        to_state(&DomainState::from_api(domain))
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: DomainState = from_state(current)?;
        fetch(ctx, current.key()?)
            .await?
            .map(|domain| to_state(&DomainState::from_api(domain)))
            .transpose()
    }

    async fn update(
        &self,
        _ctx: &ResourceContext,
        _prior: Value,
        _planned: Value,
    ) -> Result<Value, ProviderError> {
        Err(ProviderError::FailedPrecondition(
            "domains cannot be updated in place".into(),
        ))
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: DomainState = from_state(current)?;
        let path = domain_path(ctx.customer(), current.key()?);
        ignore_not_found(ctx.client.delete(Service::Directory, &path).await)
    }
}

#[async_trait]
impl DataSource for DomainDataSource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_domain"
    }

    fn schema(&self) -> Schema {
        let mut schema = data_source_schema(domain_schema(), &[]);
        schema
            .block
            .attributes
            .insert("domain_name".to_string(), Attribute::required_string());
        schema
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        if config.get("domain_name").and_then(Value::as_str).is_some() {
            Vec::new()
        } else {
            vec![Diagnostic::error("domain_name is required").with_attribute("domain_name")]
        }
    }

    async fn read(&self, ctx: &ResourceContext, config: Value) -> Result<Value, ProviderError> {
        let config: DomainState = from_state(config)?;
        let name = config.key()?;
        let domain = fetch(ctx, name)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("domain {}", name)))?;
        to_state(&DomainState::from_api(domain))
    }
}
