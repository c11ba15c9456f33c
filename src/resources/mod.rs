//! Resource and data source handlers.
//!
//! Each handler translates typed state into API calls through the
//! [`ResourceContext`] it is given. The [`Registry`] maps the type names the
//! host uses onto handlers.

mod chrome_policy;
mod domain;
mod domain_alias;
mod gmail_send_as_alias;
mod group;
mod group_member;
mod group_settings;
mod org_unit;
mod role;
mod role_assignment;
mod schema;
mod user;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::debug;

pub use chrome_policy::ChromePolicyResource;
pub use domain::{DomainDataSource, DomainResource};
pub use domain_alias::DomainAliasResource;
pub use gmail_send_as_alias::GmailSendAsAliasResource;
pub use group::{GroupDataSource, GroupResource};
pub use group_member::GroupMemberResource;
pub use group_settings::GroupSettingsResource;
pub use org_unit::{OrgUnitDataSource, OrgUnitResource};
pub use role::{RoleDataSource, RoleResource};
pub use role_assignment::RoleAssignmentResource;
pub use schema::{SchemaDataSource, SchemaResource};
pub use user::{UserDataSource, UserResource};

use crate::client::models::Alias;
use crate::client::{escape, ApiError, Service, WorkspaceClient};
use crate::config::{ProviderConfig, Timeouts};
use crate::consistency::{ConsistencyPoller, ConsistencyTracker, PollOptions};
use crate::error::ProviderError;
use crate::schema::{
    Attribute, AttributeFlags, Block, Diagnostic, NestedBlock, ProviderSchema, Schema,
};

/// Everything a handler needs to talk to the APIs. Built once per `Configure`.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    /// API client for the configured customer.
    pub client: WorkspaceClient,
    /// Consistency budgets.
    pub timeouts: Timeouts,
    /// Sleep schedule between consistency probes.
    pub poll: PollOptions,
    stop: Option<watch::Receiver<bool>>,
}

impl ResourceContext {
    /// Create a context with default timeouts and poll schedule.
    pub fn new(client: WorkspaceClient) -> Self {
        Self {
            client,
            timeouts: Timeouts::default(),
            poll: PollOptions::default(),
            stop: None,
        }
    }

    /// Set the consistency budgets.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the poll schedule.
    pub fn with_poll_options(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }

    /// Abort consistency polling once `stop` turns `true`.
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// The configured customer id.
    pub fn customer(&self) -> &str {
        self.client.customer_id()
    }

    /// Poll the Directory object at `path` until `expected_write_count` writes
    /// are visible or `timeout` runs out.
    pub async fn wait_until_consistent(
        &self,
        resource_kind: &str,
        timeout: Duration,
        path: &str,
        expected_write_count: u32,
    ) -> Result<(), ProviderError> {
        let mut poller = ConsistencyPoller::new(self.poll.clone());
        if let Some(stop) = &self.stop {
            poller = poller.with_stop_signal(stop.clone());
        }

        let mut tracker = ConsistencyTracker::new(resource_kind, timeout);
        poller
            .poll_until_consistent(&mut tracker, expected_write_count, move |etag| async move {
                self.client
                    .probe_etag(Service::Directory, path, &etag)
                    .await
            })
            .await?;

        debug!(
            resource_kind,
            path,
            writes = expected_write_count,
            etag = %tracker.last_observed_tag(),
            "Write is consistent"
        );
        Ok(())
    }
}

/// A managed resource type.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Name the host uses for this type, e.g. `googleworkspace_user`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Cross-field checks beyond what the schema expresses.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Create the remote object and return its state.
    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh state. `None` means the remote object no longer exists.
    async fn read(&self, ctx: &ResourceContext, current: Value)
        -> Result<Option<Value>, ProviderError>;

    /// Apply `planned` over `prior` and return the new state.
    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete the remote object.
    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError>;

    /// Load state for an existing object identified by `id`.
    async fn import(
        &self,
        ctx: &ResourceContext,
        id: &str,
    ) -> Result<Option<Value>, ProviderError> {
        self.read(ctx, json!({ "id": id })).await
    }
}

/// A read-only data source type.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Name the host uses for this type.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Cross-field checks beyond what the schema expresses.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Look the object up and return its state.
    async fn read(&self, ctx: &ResourceContext, config: Value) -> Result<Value, ProviderError>;
}

/// Resource and data source handlers keyed by type name.
#[derive(Clone, Default)]
pub struct Registry {
    resources: BTreeMap<&'static str, Arc<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Arc<dyn DataSource>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every Google Workspace resource and data source.
    pub fn workspace() -> Self {
        Self::new()
            .with_resource(UserResource)
            .with_resource(GroupResource)
            .with_resource(GroupMemberResource)
            .with_resource(GroupSettingsResource)
            .with_resource(OrgUnitResource)
            .with_resource(RoleResource)
            .with_resource(RoleAssignmentResource)
            .with_resource(DomainResource)
            .with_resource(DomainAliasResource)
            .with_resource(SchemaResource)
            .with_resource(GmailSendAsAliasResource)
            .with_resource(ChromePolicyResource)
            .with_data_source(UserDataSource)
            .with_data_source(GroupDataSource)
            .with_data_source(OrgUnitDataSource)
            .with_data_source(RoleDataSource)
            .with_data_source(DomainDataSource)
            .with_data_source(SchemaDataSource)
    }

    /// Register a resource handler.
    pub fn with_resource(mut self, resource: impl Resource) -> Self {
        self.resources.insert(resource.type_name(), Arc::new(resource));
        self
    }

    /// Register a data source handler.
    pub fn with_data_source(mut self, data_source: impl DataSource) -> Self {
        self.data_sources
            .insert(data_source.type_name(), Arc::new(data_source));
        self
    }

    /// Look up a resource handler.
    pub fn resource(&self, type_name: &str) -> Result<Arc<dyn Resource>, ProviderError> {
        self.resources
            .get(type_name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }

    /// Look up a data source handler.
    pub fn data_source(&self, type_name: &str) -> Result<Arc<dyn DataSource>, ProviderError> {
        self.data_sources
            .get(type_name)
            .cloned()
            .ok_or_else(|| {
                ProviderError::UnknownResource(format!("data source {}", type_name))
            })
    }

    /// Registered resource type names, sorted.
    pub fn resource_names(&self) -> Vec<String> {
        self.resources.keys().map(|name| name.to_string()).collect()
    }

    /// Registered data source type names, sorted.
    pub fn data_source_names(&self) -> Vec<String> {
        self.data_sources.keys().map(|name| name.to_string()).collect()
    }

    /// Full provider schema.
    pub fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(ProviderConfig::schema());
        for (name, resource) in &self.resources {
            schema = schema.with_resource(*name, resource.schema());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(*name, data_source.schema());
        }
        schema
    }
}

/// Deserialize host state into a typed state struct.
pub(crate) fn from_state<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value)
        .map_err(|err| ProviderError::InvalidRequest(format!("invalid state: {}", err)))
}

/// Serialize a typed state struct for the host.
pub(crate) fn to_state<T: Serialize>(state: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(state)?)
}

/// Map a 404 to `None`.
pub(crate) fn found<T>(result: Result<T, ApiError>) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Treat deleting an already missing object as success.
pub(crate) fn ignore_not_found(result: Result<(), ApiError>) -> Result<(), ProviderError> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => Ok(other?),
    }
}

/// The state's identifier, required for every call after create.
pub(crate) fn require_id<'a>(id: &'a Option<String>, kind: &str) -> Result<&'a str, ProviderError> {
    id.as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::InvalidRequest(format!("{} state has no id", kind)))
}

/// An identifier the API must have returned.
pub(crate) fn returned_id(id: Option<String>, kind: &str) -> Result<String, ProviderError> {
    id.filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ProviderError::Sdk(format!("API response for {} did not include an id", kind))
        })
}

/// Entries to add and to remove to turn `current` into `desired`, compared
/// case-insensitively as the Directory API does for addresses.
pub(crate) fn diff_sets(current: &[String], desired: &[String]) -> (Vec<String>, Vec<String>) {
    let lower = |items: &[String]| -> BTreeSet<String> {
        items.iter().map(|item| item.to_lowercase()).collect()
    };
    let current_keys = lower(current);
    let desired_keys = lower(desired);

    let to_add = desired
        .iter()
        .filter(|item| !current_keys.contains(&item.to_lowercase()))
        .cloned()
        .collect();
    let to_remove = current
        .iter()
        .filter(|item| !desired_keys.contains(&item.to_lowercase()))
        .cloned()
        .collect();
    (to_add, to_remove)
}

/// Add and remove aliases below `owner_path` (a user or group) and return
/// the number of writes made.
pub(crate) async fn sync_aliases(
    ctx: &ResourceContext,
    owner_path: &str,
    current: &[String],
    desired: &[String],
) -> Result<u32, ProviderError> {
    let (to_add, to_remove) = diff_sets(current, desired);
    let aliases_path = format!("{}/aliases", owner_path);

    for alias in &to_remove {
        let path = format!("{}/{}", aliases_path, escape(alias));
        ignore_not_found(ctx.client.delete(Service::Directory, &path).await)?;
    }
    for alias in &to_add {
        let body = Alias {
            alias: alias.clone(),
            primary_email: None,
        };
        ctx.client
            .insert::<_, Value>(Service::Directory, &aliases_path, &body)
            .await?;
    }
    Ok((to_add.len() + to_remove.len()) as u32)
}

/// Turn a resource schema into a data source schema: every attribute becomes
/// computed, and `lookup_keys` become optional inputs.
pub(crate) fn data_source_schema(resource: Schema, lookup_keys: &[&str]) -> Schema {
    Schema {
        version: resource.version,
        block: computed_block(resource.block, lookup_keys),
    }
}

fn computed_block(block: Block, lookup_keys: &[&str]) -> Block {
    Block {
        attributes: block
            .attributes
            .into_iter()
            .map(|(name, attr)| {
                let flags = if lookup_keys.contains(&name.as_str()) {
                    AttributeFlags::optional_computed()
                } else {
                    AttributeFlags::computed()
                };
                let attr = Attribute {
                    flags: AttributeFlags {
                        sensitive: attr.flags.sensitive,
                        ..flags
                    },
                    force_new: false,
                    default: None,
                    ..attr
                };
                (name, attr)
            })
            .collect(),
        blocks: block
            .blocks
            .into_iter()
            .map(|(name, nested)| {
                let nested = NestedBlock {
                    block: computed_block(nested.block, &[]),
                    min_items: 0,
                    max_items: 0,
                    ..nested
                };
                (name, nested)
            })
            .collect(),
        description: block.description,
    }
}

/// Diagnostic for data sources that need exactly one of several keys.
pub(crate) fn require_one_of(config: &Value, keys: &[&str]) -> Vec<Diagnostic> {
    let present = keys
        .iter()
        .filter(|key| config.get(**key).is_some_and(|v| !v.is_null()))
        .count();
    if present == 1 {
        return Vec::new();
    }
    vec![Diagnostic::error(format!("Exactly one of {} must be set", keys.join(", ")))
        .with_attribute(keys[0])]
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::testing::MockTransport;

    /// A context over `mock` with immediate retries disabled and a fast poll schedule.
    pub fn context(mock: &MockTransport) -> ResourceContext {
        let client = WorkspaceClient::new(Arc::new(mock.clone()), "C0123abc")
            .with_retry_budget(Duration::ZERO);
        ResourceContext::new(client).with_poll_options(
            PollOptions::default()
                .with_initial_interval(Duration::from_millis(10))
                .with_max_interval(Duration::from_millis(10)),
        )
    }

    /// Queue the three probe responses that settle a single-write loop:
    /// the new tag, then two "not modified".
    pub fn settle(mock: &MockTransport, etag: &str) {
        mock.push_json(200, serde_json::json!({ "etag": etag }));
        mock.push_empty(304);
        mock.push_empty(304);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    #[test]
    fn test_workspace_registry() {
        let registry = Registry::workspace();
        assert_eq!(
            registry.resource_names(),
            vec![
                "googleworkspace_chrome_policy",
                "googleworkspace_domain",
                "googleworkspace_domain_alias",
                "googleworkspace_gmail_send_as_alias",
                "googleworkspace_group",
                "googleworkspace_group_member",
                "googleworkspace_group_settings",
                "googleworkspace_org_unit",
                "googleworkspace_role",
                "googleworkspace_role_assignment",
                "googleworkspace_schema",
                "googleworkspace_user",
            ]
        );
        assert_eq!(registry.data_source_names().len(), 6);
        assert!(registry.resource("googleworkspace_user").is_ok());
        assert!(matches!(
            registry.resource("googleworkspace_printer"),
            Err(ProviderError::UnknownResource(_))
        ));

        let schema = registry.schema();
        assert_eq!(schema.resources.len(), 12);
        assert!(schema.provider.block.attributes.contains_key("customer_id"));
    }

    #[test]
    fn test_diff_sets() {
        let current = vec!["a@example.com".to_string(), "B@example.com".to_string()];
        let desired = vec!["b@example.com".to_string(), "c@example.com".to_string()];
        let (add, remove) = diff_sets(&current, &desired);
        assert_eq!(add, vec!["c@example.com"]);
        assert_eq!(remove, vec!["a@example.com"]);
    }

    #[test]
    fn test_data_source_schema() {
        let schema = data_source_schema(
            Schema::v0()
                .with_attribute("email", Attribute::required_string().with_force_new())
                .with_attribute("name", Attribute::optional_string())
                .with_block(
                    "fields",
                    NestedBlock::list(
                        Block::new().with_attribute("field_name", Attribute::required_string()),
                    )
                    .with_min_items(1),
                ),
            &["email"],
        );
        let email = &schema.block.attributes["email"];
        assert!(email.flags.optional && email.flags.computed && !email.flags.required);
        assert!(!email.force_new);
        let name = &schema.block.attributes["name"];
        assert!(name.flags.computed && !name.flags.optional);
        assert_eq!(schema.block.blocks["fields"].min_items, 0);
        assert!(schema.block.blocks["fields"].block.attributes["field_name"].flags.computed);
    }

    #[test]
    fn test_require_one_of() {
        assert!(require_one_of(&json!({"email": "a@example.com"}), &["email", "id"]).is_empty());
        assert_eq!(require_one_of(&json!({}), &["email", "id"]).len(), 1);
        assert_eq!(
            require_one_of(&json!({"email": "a", "id": "b"}), &["email", "id"]).len(),
            1
        );
        assert!(require_one_of(&json!({"email": null, "id": "b"}), &["email", "id"]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_consistent_polls_directory_path() {
        let mock = MockTransport::new();
        test_support::settle(&mock, "\"e1\"");
        let ctx = test_support::context(&mock);

        ctx.wait_until_consistent("group", Duration::from_secs(30), "groups/abc", 1)
            .await
            .unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.path == "groups/abc"));
        assert_eq!(requests[0].if_none_match, None);
        assert_eq!(requests[2].if_none_match.as_deref(), Some("\"e1\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_consistent_stops_on_signal() {
        let mock = MockTransport::new();
        for _ in 0..100 {
            mock.push_json(404, json!({"error": {"code": 404, "message": "Not Found"}}));
        }
        let (tx, rx) = watch::channel(false);
        let ctx = test_support::context(&mock).with_stop_signal(rx);
        tx.send_replace(true);

        let err = ctx
            .wait_until_consistent("user", Duration::from_secs(300), "users/1", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
    }
}
