use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{
    data_source_schema, found, from_state, ignore_not_found, require_id, require_one_of,
    returned_id, sync_aliases, to_state, DataSource, Resource, ResourceContext,
};
use crate::client::models::Group;
use crate::client::{escape, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

const KIND: &str = "group";

/// `googleworkspace_group`
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupResource;

/// `googleworkspace_group` data source, looked up by `email` or `id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupDataSource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct GroupState {
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    description: Option<String>,
    admin_created: Option<bool>,
    direct_members_count: Option<i64>,
    aliases: Option<Vec<String>>,
    non_editable_aliases: Option<Vec<String>>,
    etag: Option<String>,
}

impl GroupState {
    fn to_api(&self) -> Group {
        Group {
            email: self.email.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            ..Group::default()
        }
    }

    fn from_api(group: Group, prior: &GroupState) -> Self {
        Self {
            id: group.id,
            email: group.email,
            name: group.name,
            description: group.description,
            admin_created: group.admin_created,
            direct_members_count: group
                .direct_members_count
                .and_then(|count| count.parse().ok()),
            aliases: group
                .aliases
                .or_else(|| prior.aliases.as_ref().map(|_| Vec::new())),
            non_editable_aliases: group.non_editable_aliases,
            etag: group.etag,
        }
    }
}

fn group_path(id: &str) -> String {
    format!("groups/{}", escape(id))
}

async fn fetch(ctx: &ResourceContext, key: &str) -> Result<Option<Group>, ProviderError> {
    found(ctx.client.get(Service::Directory, &group_path(key)).await)
}

fn group_schema() -> Schema {
    Schema::v0()
        .with_description("Manages a Google Workspace group.")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "email",
            Attribute::required_string().with_description("The group's email address."),
        )
        .with_attribute("name", Attribute::optional_computed_string())
        .with_attribute("description", Attribute::optional_string())
        .with_attribute(
            "admin_created",
            Attribute::computed_bool().with_description(
                "Whether an administrator, rather than a user, created the group.",
            ),
        )
        .with_attribute("direct_members_count", Attribute::computed_int64())
        .with_attribute("aliases", Attribute::optional_string_set())
        .with_attribute("non_editable_aliases", Attribute::computed_string_set())
        .with_attribute("etag", Attribute::computed_string())
}

async fn read_back(
    ctx: &ResourceContext,
    id: &str,
    planned: &GroupState,
) -> Result<Value, ProviderError> {
    let group = fetch(ctx, id)
        .await?
        .ok_or_else(|| ProviderError::NotFound(format!("group {}", id)))?;
    to_state(&GroupState::from_api(group, planned))
}

#[async_trait]
impl Resource for GroupResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_group"
    }

    fn schema(&self) -> Schema {
        group_schema()
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: GroupState = from_state(planned)?;
        let created: Group = ctx
            .client
            .insert(Service::Directory, "groups", &planned.to_api())
            .await?;
        let id = returned_id(created.id, KIND)?;
        info!(group_id = %id, "Created group");

        let writes = 1 + sync_aliases(
            ctx,
            &group_path(&id),
            &[],
            &planned.aliases.clone().unwrap_or_default(),
        )
        .await?;
        ctx.wait_until_consistent(KIND, ctx.timeouts.create, &group_path(&id), writes)
            .await?;

        read_back(ctx, &id, &planned).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: GroupState = from_state(current)?;
        let id = require_id(&current.id, KIND)?;
        match fetch(ctx, id).await? {
            Some(group) => Ok(Some(to_state(&GroupState::from_api(group, &current))?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: GroupState = from_state(prior)?;
        let planned: GroupState = from_state(planned)?;
        let id = require_id(&prior.id, KIND)?.to_string();

        ctx.client
            .update::<_, Group>(Service::Directory, &group_path(&id), &planned.to_api())
            .await?;
        let writes = 1 + sync_aliases(
            ctx,
            &group_path(&id),
            &prior.aliases.clone().unwrap_or_default(),
            &planned.aliases.clone().unwrap_or_default(),
        )
        .await?;
        ctx.wait_until_consistent(KIND, ctx.timeouts.update, &group_path(&id), writes)
            .await?;

        read_back(ctx, &id, &planned).await
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: GroupState = from_state(current)?;
        let id = require_id(&current.id, KIND)?;
        ignore_not_found(ctx.client.delete(Service::Directory, &group_path(id)).await)
    }
}

#[async_trait]
impl DataSource for GroupDataSource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_group"
    }

    fn schema(&self) -> Schema {
        data_source_schema(group_schema(), &["id", "email"])
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        require_one_of(config, &["email", "id"])
    }

    async fn read(&self, ctx: &ResourceContext, config: Value) -> Result<Value, ProviderError> {
        let config: GroupState = from_state(config)?;
        let key = config
            .id
            .as_deref()
            .or(config.email.as_deref())
            .ok_or_else(|| ProviderError::Validation("one of email or id is required".into()))?;
        let group = fetch(ctx, key)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("group {}", key)))?;
        to_state(&GroupState::from_api(group, &GroupState::default()))
    }
}
