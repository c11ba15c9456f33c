use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{found, from_state, ignore_not_found, require_id, to_state, Resource, ResourceContext};
use crate::client::models::DomainAlias;
use crate::client::{escape, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

const KIND: &str = "domain alias";

/// `googleworkspace_domain_alias`
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainAliasResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct DomainAliasState {
    id: Option<String>,
    domain_alias_name: Option<String>,
    parent_domain_name: Option<String>,
    verified: Option<bool>,
    creation_time: Option<String>,
    etag: Option<String>,
}

impl DomainAliasState {
    fn from_api(alias: DomainAlias) -> Self {
        Self {
            id: alias.domain_alias_name.clone(),
            domain_alias_name: alias.domain_alias_name,
            parent_domain_name: alias.parent_domain_name,
            verified: alias.verified,
            creation_time: alias.creation_time,
            etag: alias.etag,
        }
    }

    fn key(&self) -> Result<&str, ProviderError> {
        match self.domain_alias_name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => Ok(name),
            None => require_id(&self.id, KIND),
        }
    }
}

fn alias_path(customer: &str, name: &str) -> String {
    format!("customer/{}/domainaliases/{}", escape(customer), escape(name))
}

#[async_trait]
impl Resource for DomainAliasResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_domain_alias"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manages an alias of one of the customer's domains.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "domain_alias_name",
                Attribute::required_string().with_force_new(),
            )
            .with_attribute(
                "parent_domain_name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The domain the alias points at."),
            )
            .with_attribute("verified", Attribute::computed_bool())
            .with_attribute("creation_time", Attribute::computed_string())
            .with_attribute("etag", Attribute::computed_string())
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: DomainAliasState = from_state(planned)?;
        let name = planned.key()?.to_string();
        let body = DomainAlias {
            domain_alias_name: Some(name.clone()),
            parent_domain_name: planned.parent_domain_name.clone(),
            ..DomainAlias::default()
        };
        let collection = format!("customer/{}/domainaliases", escape(ctx.customer()));
        ctx.client
            .insert::<_, DomainAlias>(Service::Directory, &collection, &body)
            .await?;
        info!(domain_alias = %name, "Created domain alias");

        let path = alias_path(ctx.customer(), &name);
        ctx.wait_until_consistent(KIND, ctx.timeouts.create, &path, 1)
            .await?;
        let alias: DomainAlias = found(ctx.client.get(Service::Directory, &path).await)?
            .ok_or_else(|| ProviderError::NotFound(format!("domain alias {}", name)))?;
        to_state(&DomainAliasState::from_api(alias))
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: DomainAliasState = from_state(current)?;
        let path = alias_path(ctx.customer(), current.key()?);
        found::<DomainAlias>(ctx.client.get(Service::Directory, &path).await)?
            .map(|alias| to_state(&DomainAliasState::from_api(alias)))
            .transpose()
    }

    async fn update(
        &self,
        _ctx: &ResourceContext,
        _prior: Value,
        _planned: Value,
    ) -> Result<Value, ProviderError> {
        Err(ProviderError::FailedPrecondition(
            "domain aliases cannot be updated in place".into(),
        ))
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: DomainAliasState = from_state(current)?;
        let path = alias_path(ctx.customer(), current.key()?);
        ignore_not_found(ctx.client.delete(Service::Directory, &path).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::{context, settle};
    use crate::testing::MockTransport;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_create_alias() {
        let api = json!({
            "domainAliasName": "example.net",
            "parentDomainName": "example.com",
            "verified": true,
            "etag": "\"da1\""
        });
        let mock = MockTransport::new();
        mock.push_json(200, api.clone());
        settle(&mock, "\"da1\"");
        mock.push_json(200, api);
        let ctx = context(&mock);

        let state = DomainAliasResource
            .create(
                &ctx,
                json!({"domain_alias_name": "example.net", "parent_domain_name": "example.com"}),
            )
            .await
            .unwrap();
        assert_eq!(state["id"], "example.net");
        assert_eq!(state["verified"], true);
        assert_eq!(
            mock.requests()[0].body,
            Some(json!({"domainAliasName": "example.net", "parentDomainName": "example.com"}))
        );
    }

    #[tokio::test]
    async fn test_read_gone() {
        let mock = MockTransport::new();
        mock.push_json(404, json!({"error": {"code": 404, "message": "Domain alias not found"}}));
        let ctx = context(&mock);
        let state = DomainAliasResource
            .read(&ctx, json!({"id": "example.net"}))
            .await
            .unwrap();
        assert!(state.is_none());
    }
}
