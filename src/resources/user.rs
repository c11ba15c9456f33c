use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{
    data_source_schema, found, from_state, ignore_not_found, require_id, require_one_of,
    returned_id, sync_aliases, to_state, DataSource, Resource, ResourceContext,
};
use crate::client::models::{User, UserMakeAdmin, UserName};
use crate::client::{escape, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};

const KIND: &str = "user";

/// `googleworkspace_user`
#[derive(Debug, Clone, Copy, Default)]
pub struct UserResource;

/// `googleworkspace_user` data source, looked up by `primary_email` or `id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserDataSource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct UserState {
    id: Option<String>,
    primary_email: Option<String>,
    password: Option<String>,
    hash_function: Option<String>,
    name: Option<NameState>,
    suspended: Option<bool>,
    archived: Option<bool>,
    change_password_at_next_login: Option<bool>,
    include_in_global_address_list: Option<bool>,
    org_unit_path: Option<String>,
    recovery_email: Option<String>,
    recovery_phone: Option<String>,
    is_admin: Option<bool>,
    aliases: Option<Vec<String>>,
    non_editable_aliases: Option<Vec<String>>,
    is_delegated_admin: Option<bool>,
    agreed_to_terms: Option<bool>,
    customer_id: Option<String>,
    creation_time: Option<String>,
    last_login_time: Option<String>,
    etag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct NameState {
    given_name: Option<String>,
    family_name: Option<String>,
    full_name: Option<String>,
}

impl UserState {
    fn to_api(&self) -> User {
        User {
            primary_email: self.primary_email.clone(),
            password: self.password.clone(),
            hash_function: self.password.as_ref().and(self.hash_function.clone()),
            name: self.name.as_ref().map(|name| UserName {
                given_name: name.given_name.clone(),
                family_name: name.family_name.clone(),
                full_name: None,
            }),
            suspended: self.suspended,
            archived: self.archived,
            change_password_at_next_login: self.change_password_at_next_login,
            include_in_global_address_list: self.include_in_global_address_list,
            org_unit_path: self.org_unit_path.clone(),
            recovery_email: self.recovery_email.clone(),
            recovery_phone: self.recovery_phone.clone(),
            ..User::default()
        }
    }

    /// State for `user` as returned by the API. The password never comes
    /// back, so it is carried over from `prior`.
    fn from_api(user: User, prior: &UserState) -> Self {
        Self {
            id: user.id,
            primary_email: user.primary_email,
            password: prior.password.clone(),
            hash_function: prior.hash_function.clone(),
            name: user.name.map(|name| NameState {
                given_name: name.given_name,
                family_name: name.family_name,
                full_name: name.full_name,
            }),
            suspended: user.suspended,
            archived: user.archived,
            change_password_at_next_login: user.change_password_at_next_login,
            include_in_global_address_list: user.include_in_global_address_list,
            org_unit_path: user.org_unit_path,
            recovery_email: user.recovery_email,
            recovery_phone: user.recovery_phone,
            is_admin: user.is_admin,
            aliases: user
                .aliases
                .or_else(|| prior.aliases.as_ref().map(|_| Vec::new())),
            non_editable_aliases: user.non_editable_aliases,
            is_delegated_admin: user.is_delegated_admin,
            agreed_to_terms: user.agreed_to_terms,
            customer_id: user.customer_id,
            creation_time: user.creation_time,
            last_login_time: user.last_login_time,
            etag: user.etag,
        }
    }
}

fn user_path(id: &str) -> String {
    format!("users/{}", escape(id))
}

async fn fetch(ctx: &ResourceContext, key: &str) -> Result<Option<User>, ProviderError> {
    found(ctx.client.get(Service::Directory, &user_path(key)).await)
}

async fn set_admin(ctx: &ResourceContext, id: &str, status: bool) -> Result<(), ProviderError> {
    let path = format!("{}/makeAdmin", user_path(id));
    ctx.client
        .post::<_, Value>(Service::Directory, &path, &UserMakeAdmin { status })
        .await?;
    Ok(())
}

fn user_schema() -> Schema {
    Schema::v0()
        .with_description("Manages a Google Workspace user account.")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "primary_email",
            Attribute::required_string().with_description("The user's primary email address."),
        )
        .with_attribute(
            "password",
            Attribute::optional_string()
                .sensitive()
                .with_description("Password for the account. Never read back from the API."),
        )
        .with_attribute(
            "hash_function",
            Attribute::optional_string()
                .with_allowed_values(["MD5", "SHA-1", "crypt"])
                .with_description("Hash format of password, if it is already hashed."),
        )
        .with_attribute("suspended", Attribute::optional_computed_bool())
        .with_attribute("archived", Attribute::optional_computed_bool())
        .with_attribute("change_password_at_next_login", Attribute::optional_computed_bool())
        .with_attribute(
            "include_in_global_address_list",
            Attribute::optional_bool().with_default(Value::Bool(true)),
        )
        .with_attribute(
            "org_unit_path",
            Attribute::optional_computed_string()
                .with_description("Organizational unit the user belongs to, `/` when unset."),
        )
        .with_attribute("recovery_email", Attribute::optional_string())
        .with_attribute("recovery_phone", Attribute::optional_string())
        .with_attribute(
            "is_admin",
            Attribute::optional_computed_bool()
                .with_description("Whether the user has super administrator privileges."),
        )
        .with_attribute("aliases", Attribute::optional_string_set())
        .with_attribute("non_editable_aliases", Attribute::computed_string_set())
        .with_attribute("is_delegated_admin", Attribute::computed_bool())
        .with_attribute("agreed_to_terms", Attribute::computed_bool())
        .with_attribute("customer_id", Attribute::computed_string())
        .with_attribute("creation_time", Attribute::computed_string())
        .with_attribute("last_login_time", Attribute::computed_string())
        .with_attribute("etag", Attribute::computed_string())
        .with_block(
            "name",
            NestedBlock::single(
                Block::new()
                    .with_attribute("given_name", Attribute::required_string())
                    .with_attribute("family_name", Attribute::required_string())
                    .with_attribute("full_name", Attribute::computed_string()),
            )
            .with_min_items(1)
            .with_max_items(1),
        )
}

#[async_trait]
impl Resource for UserResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_user"
    }

    fn schema(&self) -> Schema {
        user_schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let has = |key: &str| config.get(key).is_some_and(|v| !v.is_null());
        if has("hash_function") && !has("password") {
            return vec![Diagnostic::error("hash_function requires password")
                .with_detail("hash_function describes how password is encoded")
                .with_attribute("hash_function")];
        }
        Vec::new()
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: UserState = from_state(planned)?;
        let created: User = ctx
            .client
            .insert(Service::Directory, "users", &planned.to_api())
            .await?;
        let id = returned_id(created.id, KIND)?;
        info!(user_id = %id, "Created user");

        let mut writes = 1;
        if planned.is_admin == Some(true) {
            set_admin(ctx, &id, true).await?;
            writes += 1;
        }
        let aliases = planned.aliases.clone().unwrap_or_default();
        writes += sync_aliases(ctx, &user_path(&id), &[], &aliases).await?;

        ctx.wait_until_consistent(KIND, ctx.timeouts.create, &user_path(&id), writes)
            .await?;

        let user = fetch(ctx, &id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("user {} vanished after create", id)))?;
        to_state(&UserState::from_api(user, &planned))
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: UserState = from_state(current)?;
        let id = require_id(&current.id, KIND)?;
        match fetch(ctx, id).await? {
            Some(user) => Ok(Some(to_state(&UserState::from_api(user, &current))?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: UserState = from_state(prior)?;
        let planned: UserState = from_state(planned)?;
        let id = require_id(&prior.id, KIND)?.to_string();

        let mut body = planned.to_api();
        if planned.password == prior.password {
            body.password = None;
            body.hash_function = None;
        }
        ctx.client
            .update::<_, User>(Service::Directory, &user_path(&id), &body)
            .await?;
        let mut writes = 1;

        if let Some(is_admin) = planned.is_admin {
            if prior.is_admin != Some(is_admin) {
                set_admin(ctx, &id, is_admin).await?;
                writes += 1;
            }
        }
        writes += sync_aliases(
            ctx,
            &user_path(&id),
            &prior.aliases.clone().unwrap_or_default(),
            &planned.aliases.clone().unwrap_or_default(),
        )
        .await?;

        ctx.wait_until_consistent(KIND, ctx.timeouts.update, &user_path(&id), writes)
            .await?;

        let user = fetch(ctx, &id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("user {} vanished after update", id)))?;
        to_state(&UserState::from_api(user, &planned))
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: UserState = from_state(current)?;
        let id = require_id(&current.id, KIND)?;
        ignore_not_found(ctx.client.delete(Service::Directory, &user_path(id)).await)?;
        info!(user_id = %id, "Deleted user");
        Ok(())
    }
}

#[async_trait]
impl DataSource for UserDataSource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_user"
    }

    fn schema(&self) -> Schema {
        data_source_schema(user_schema(), &["id", "primary_email"])
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        require_one_of(config, &["primary_email", "id"])
    }

    async fn read(&self, ctx: &ResourceContext, config: Value) -> Result<Value, ProviderError> {
        let config: UserState = from_state(config)?;
        let key = config
            .id
            .as_deref()
            .or(config.primary_email.as_deref())
            .ok_or_else(|| {
                ProviderError::Validation("one of primary_email or id is required".into())
            })?;
        let user = fetch(ctx, key)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("user {}", key)))?;
        to_state(&UserState::from_api(user, &UserState::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Method;
    use crate::resources::test_support::{context, settle};
    use crate::testing::MockTransport;
    use serde_json::json;

    fn api_user() -> Value {
        json!({
            "id": "1001",
            "primaryEmail": "jane@example.com",
            "name": {"givenName": "Jane", "familyName": "Doe", "fullName": "Jane Doe"},
            "orgUnitPath": "/",
            "isAdmin": false,
            "aliases": ["jd@example.com"],
            "etag": "\"e1\""
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_user_counts_alias_writes() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({"id": "1001", "primaryEmail": "jane@example.com"}));
        mock.push_json(200, json!({"alias": "jd@example.com"}));
        settle(&mock, "\"e1\"");
        mock.push_empty(304);
        mock.push_json(200, api_user());
        let ctx = context(&mock);

        let state = UserResource
            .create(
                &ctx,
                json!({
                    "primary_email": "jane@example.com",
                    "password": "s3cret-pass",
                    "name": {"given_name": "Jane", "family_name": "Doe"},
                    "aliases": ["jd@example.com"]
                }),
            )
            .await
            .unwrap();

        assert_eq!(state["id"], "1001");
        assert_eq!(state["password"], "s3cret-pass");
        assert_eq!(state["name"]["full_name"], "Jane Doe");
        assert_eq!(state["aliases"], json!(["jd@example.com"]));

        let requests = mock.requests();
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].path, "users");
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["primaryEmail"], "jane@example.com");
        assert!(body.get("aliases").is_none());
        assert_eq!(requests[1].path, "users/1001/aliases");
        assert_eq!(requests.last().unwrap().path, "users/1001");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_admin_user_calls_make_admin() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({"id": "1001"}));
        mock.push_empty(204);
        settle(&mock, "\"e1\"");
        mock.push_empty(304);
        mock.push_json(200, api_user());
        let ctx = context(&mock);

        UserResource
            .create(
                &ctx,
                json!({
                    "primary_email": "jane@example.com",
                    "name": {"given_name": "Jane", "family_name": "Doe"},
                    "is_admin": true
                }),
            )
            .await
            .unwrap();

        let requests = mock.requests();
        assert_eq!(requests[1].path, "users/1001/makeAdmin");
        assert_eq!(requests[1].body, Some(json!({"status": true})));
    }

    #[tokio::test]
    async fn test_read_missing_user() {
        let mock = MockTransport::new();
        mock.push_json(
            404,
            json!({"error": {"code": 404, "message": "Resource Not Found: userKey"}}),
        );
        let ctx = context(&mock);

        let state = UserResource
            .read(&ctx, json!({"id": "1001", "primary_email": "jane@example.com"}))
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_skips_unchanged_password_and_diffs_aliases() {
        let mock = MockTransport::new();
        mock.push_json(200, api_user());
        mock.push_empty(204);
        mock.push_json(200, json!({"alias": "janed@example.com"}));
        settle(&mock, "\"e2\"");
        mock.push_empty(304);
        mock.push_json(200, api_user());
        let ctx = context(&mock);

        let prior = json!({
            "id": "1001",
            "primary_email": "jane@example.com",
            "password": "s3cret-pass",
            "name": {"given_name": "Jane", "family_name": "Doe"},
            "aliases": ["jd@example.com"]
        });
        let planned = json!({
            "id": "1001",
            "primary_email": "jane@example.com",
            "password": "s3cret-pass",
            "name": {"given_name": "Jane", "family_name": "Doe"},
            "aliases": ["janed@example.com"]
        });
        UserResource.update(&ctx, prior, planned).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].method, Method::Put);
        assert!(requests[0].body.as_ref().unwrap().get("password").is_none());
        assert_eq!(requests[1].method, Method::Delete);
        assert_eq!(requests[1].path, "users/1001/aliases/jd@example.com");
        assert_eq!(requests[2].method, Method::Post);
        assert_eq!(requests[2].body, Some(json!({"alias": "janed@example.com"})));
    }

    #[tokio::test]
    async fn test_delete_already_gone() {
        let mock = MockTransport::new();
        mock.push_json(404, json!({"error": {"code": 404, "message": "Not Found"}}));
        let ctx = context(&mock);

        UserResource.delete(&ctx, json!({"id": "1001"})).await.unwrap();
        assert_eq!(mock.requests()[0].method, Method::Delete);
    }

    #[test]
    fn test_validate_hash_function_needs_password() {
        let diagnostics = UserResource.validate(&json!({"hash_function": "MD5"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(UserResource
            .validate(&json!({"hash_function": "MD5", "password": "abc"}))
            .is_empty());
    }

    #[tokio::test]
    async fn test_data_source_by_email() {
        let mock = MockTransport::new();
        mock.push_json(200, api_user());
        let ctx = context(&mock);

        let state = UserDataSource
            .read(&ctx, json!({"primary_email": "jane@example.com"}))
            .await
            .unwrap();
        assert_eq!(state["id"], "1001");
        assert_eq!(mock.requests()[0].path, "users/jane@example.com");
    }
}
