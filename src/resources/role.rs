use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{
    data_source_schema, found, from_state, ignore_not_found, require_id, returned_id, to_state,
    DataSource, Resource, ResourceContext,
};
use crate::client::models::{Role, RolePrivilege};
use crate::client::{escape, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};

const KIND: &str = "role";

/// `googleworkspace_role`
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleResource;

/// `googleworkspace_role` data source, looked up by `name`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleDataSource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct RoleState {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    privileges: Option<Vec<PrivilegeState>>,
    is_system_role: Option<bool>,
    is_super_admin_role: Option<bool>,
    etag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct PrivilegeState {
    privilege_name: String,
    service_id: String,
}

impl RoleState {
    fn to_api(&self) -> Role {
        Role {
            role_name: self.name.clone(),
            role_description: self.description.clone(),
            role_privileges: self
                .privileges
                .iter()
                .flatten()
                .map(|privilege| RolePrivilege {
                    privilege_name: privilege.privilege_name.clone(),
                    service_id: privilege.service_id.clone(),
                })
                .collect(),
            ..Role::default()
        }
    }

    fn from_api(role: Role) -> Self {
        Self {
            id: role.role_id,
            name: role.role_name,
            description: role.role_description,
            privileges: Some(
                role.role_privileges
                    .into_iter()
                    .map(|privilege| PrivilegeState {
                        privilege_name: privilege.privilege_name,
                        service_id: privilege.service_id,
                    })
                    .collect(),
            ),
            is_system_role: role.is_system_role,
            is_super_admin_role: role.is_super_admin_role,
            etag: role.etag,
        }
    }
}

fn roles_path(customer: &str) -> String {
    format!("customer/{}/roles", escape(customer))
}

fn role_path(customer: &str, id: &str) -> String {
    format!("{}/{}", roles_path(customer), escape(id))
}

async fn read_back(ctx: &ResourceContext, path: &str) -> Result<Value, ProviderError> {
    let role: Role = found(ctx.client.get(Service::Directory, path).await)?
        .ok_or_else(|| ProviderError::NotFound(format!("role at {}", path)))?;
    to_state(&RoleState::from_api(role))
}

fn role_schema() -> Schema {
    Schema::v0()
        .with_description("Manages a custom administrator role.")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("name", Attribute::required_string())
        .with_attribute("description", Attribute::optional_string())
        .with_attribute("is_system_role", Attribute::computed_bool())
        .with_attribute("is_super_admin_role", Attribute::computed_bool())
        .with_attribute("etag", Attribute::computed_string())
        .with_block(
            "privileges",
            NestedBlock::set(
                Block::new()
                    .with_attribute("privilege_name", Attribute::required_string())
                    .with_attribute(
                        "service_id",
                        Attribute::required_string().with_description(
                            "Obfuscated id of the service the privilege belongs to.",
                        ),
                    ),
            )
            .with_min_items(1),
        )
}

#[async_trait]
impl Resource for RoleResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_role"
    }

    fn schema(&self) -> Schema {
        role_schema()
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: RoleState = from_state(planned)?;
        let created: Role = ctx
            .client
            .insert(Service::Directory, &roles_path(ctx.customer()), &planned.to_api())
            .await?;
        let id = returned_id(created.role_id, KIND)?;
        info!(role_id = %id, "Created role");

        let path = role_path(ctx.customer(), &id);
        ctx.wait_until_consistent(KIND, ctx.timeouts.create, &path, 1)
            .await?;
        read_back(ctx, &path).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: RoleState = from_state(current)?;
        let path = role_path(ctx.customer(), require_id(&current.id, KIND)?);
        found::<Role>(ctx.client.get(Service::Directory, &path).await)?
            .map(|role| to_state(&RoleState::from_api(role)))
            .transpose()
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: RoleState = from_state(prior)?;
        let planned: RoleState = from_state(planned)?;
        let path = role_path(ctx.customer(), require_id(&prior.id, KIND)?);

        ctx.client
            .update::<_, Role>(Service::Directory, &path, &planned.to_api())
            .await?;
        ctx.wait_until_consistent(KIND, ctx.timeouts.update, &path, 1)
            .await?;
        read_back(ctx, &path).await
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: RoleState = from_state(current)?;
        let path = role_path(ctx.customer(), require_id(&current.id, KIND)?);
        ignore_not_found(ctx.client.delete(Service::Directory, &path).await)
    }
}

#[async_trait]
impl DataSource for RoleDataSource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_role"
    }

    fn schema(&self) -> Schema {
        let mut schema = data_source_schema(role_schema(), &[]);
        schema
            .block
            .attributes
            .insert("name".to_string(), Attribute::required_string());
        schema
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        if config.get("name").and_then(Value::as_str).is_some() {
            Vec::new()
        } else {
            vec![Diagnostic::error("name is required").with_attribute("name")]
        }
    }

    async fn read(&self, ctx: &ResourceContext, config: Value) -> Result<Value, ProviderError> {
        let config: RoleState = from_state(config)?;
        let name = config
            .name
            .ok_or_else(|| ProviderError::Validation("name is required".into()))?;

        let roles: Vec<Role> = ctx
            .client
            .list(Service::Directory, &roles_path(ctx.customer()), &[], "items")
            .await?;
        let role = roles
            .into_iter()
            .find(|role| role.role_name.as_deref() == Some(name.as_str()))
            .ok_or_else(|| ProviderError::NotFound(format!("role named {:?}", name)))?;
        to_state(&RoleState::from_api(role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::{context, settle};
    use crate::testing::MockTransport;
    use serde_json::json;

    fn api_role() -> Value {
        json!({
            "roleId": "9170516996784129",
            "roleName": "Helpdesk",
            "roleDescription": "Password resets",
            "rolePrivileges": [
                {"privilegeName": "USERS_RETRIEVE", "serviceId": "00haapch16h1ysv"}
            ],
            "isSystemRole": false,
            "isSuperAdminRole": false,
            "etag": "\"r1\""
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_role() {
        let mock = MockTransport::new();
        mock.push_json(200, api_role());
        settle(&mock, "\"r1\"");
        mock.push_json(200, api_role());
        let ctx = context(&mock);

        let state = RoleResource
            .create(
                &ctx,
                json!({
                    "name": "Helpdesk",
                    "description": "Password resets",
                    "privileges": [
                        {"privilege_name": "USERS_RETRIEVE", "service_id": "00haapch16h1ysv"}
                    ]
                }),
            )
            .await
            .unwrap();

        assert_eq!(state["id"], "9170516996784129");
        assert_eq!(state["privileges"][0]["privilege_name"], "USERS_RETRIEVE");

        let body = mock.requests()[0].body.clone().unwrap();
        assert_eq!(body["roleName"], "Helpdesk");
        assert_eq!(body["rolePrivileges"][0]["serviceId"], "00haapch16h1ysv");
    }

    #[tokio::test]
    async fn test_data_source_pages_through_roles() {
        let mock = MockTransport::new();
        mock.push_json(
            200,
            json!({
                "items": [{"roleId": "1", "roleName": "_SEED_ADMIN_ROLE"}],
                "nextPageToken": "p2"
            }),
        );
        mock.push_json(200, json!({"items": [api_role()]}));
        let ctx = context(&mock);

        let state = RoleDataSource
            .read(&ctx, json!({"name": "Helpdesk"}))
            .await
            .unwrap();
        assert_eq!(state["id"], "9170516996784129");

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].query.contains(&("pageToken".to_string(), "p2".to_string())));
    }

    #[tokio::test]
    async fn test_data_source_unknown_role() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({"items": []}));
        let ctx = context(&mock);

        let err = RoleDataSource
            .read(&ctx, json!({"name": "Nope"}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
