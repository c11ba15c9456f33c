use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{
    data_source_schema, found, from_state, ignore_not_found, require_id, require_one_of,
    returned_id, to_state, DataSource, Resource, ResourceContext,
};
use crate::client::models::{Schema as UserSchema, SchemaField};
use crate::client::{escape, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};

const KIND: &str = "schema";

/// `googleworkspace_schema`, a custom user attribute schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaResource;

/// `googleworkspace_schema` data source, looked up by `schema_name` or
/// `schema_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaDataSource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct SchemaState {
    id: Option<String>,
    schema_id: Option<String>,
    schema_name: Option<String>,
    display_name: Option<String>,
    fields: Option<Vec<FieldState>>,
    etag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct FieldState {
    field_id: Option<String>,
    field_name: String,
    field_type: String,
    display_name: Option<String>,
    multi_valued: Option<bool>,
    indexed: Option<bool>,
    read_access_type: Option<String>,
    etag: Option<String>,
}

impl SchemaState {
    fn to_api(&self) -> UserSchema {
        UserSchema {
            schema_name: self.schema_name.clone(),
            display_name: self.display_name.clone(),
            fields: self
                .fields
                .iter()
                .flatten()
                .map(|field| SchemaField {
                    field_name: field.field_name.clone(),
                    field_type: field.field_type.clone(),
                    display_name: field.display_name.clone(),
                    multi_valued: field.multi_valued,
                    indexed: field.indexed,
                    read_access_type: field.read_access_type.clone(),
                    ..SchemaField::default()
                })
                .collect(),
            ..UserSchema::default()
        }
    }

    fn from_api(schema: UserSchema) -> Self {
        Self {
            id: schema.schema_id.clone(),
            schema_id: schema.schema_id,
            schema_name: schema.schema_name,
            display_name: schema.display_name,
            fields: Some(
                schema
                    .fields
                    .into_iter()
                    .map(|field| FieldState {
                        field_id: field.field_id,
                        field_name: field.field_name,
                        field_type: field.field_type,
                        display_name: field.display_name,
                        multi_valued: field.multi_valued,
                        indexed: field.indexed,
                        read_access_type: field.read_access_type,
                        etag: field.etag,
                    })
                    .collect(),
            ),
            etag: schema.etag,
        }
    }
}

fn schemas_path(customer: &str) -> String {
    format!("customer/{}/schemas", escape(customer))
}

fn schema_path(customer: &str, key: &str) -> String {
    format!("{}/{}", schemas_path(customer), escape(key))
}

async fn fetch(ctx: &ResourceContext, key: &str) -> Result<Option<UserSchema>, ProviderError> {
    found(
        ctx.client
            .get(Service::Directory, &schema_path(ctx.customer(), key))
            .await,
    )
}

async fn read_back(ctx: &ResourceContext, key: &str) -> Result<Value, ProviderError> {
    let schema = fetch(ctx, key)
        .await?
        .ok_or_else(|| ProviderError::NotFound(format!("schema {}", key)))?;
    to_state(&SchemaState::from_api(schema))
}

fn custom_schema() -> Schema {
    let field = Block::new()
        .with_attribute("field_id", Attribute::computed_string())
        .with_attribute("field_name", Attribute::required_string())
        .with_attribute(
            "field_type",
            Attribute::required_string().with_allowed_values([
                "STRING", "INT64", "BOOL", "DOUBLE", "EMAIL", "PHONE", "DATE",
            ]),
        )
        .with_attribute("display_name", Attribute::optional_computed_string())
        .with_attribute(
            "multi_valued",
            Attribute::optional_bool().with_default(Value::Bool(false)),
        )
        .with_attribute(
            "indexed",
            Attribute::optional_bool().with_default(Value::Bool(true)),
        )
        .with_attribute(
            "read_access_type",
            Attribute::optional_string()
                .with_allowed_values(["ALL_DOMAIN_USERS", "ADMINS_AND_SELF"])
                .with_default(Value::from("ALL_DOMAIN_USERS")),
        )
        .with_attribute("etag", Attribute::computed_string());

    Schema::v0()
        .with_description("Manages a custom user schema.")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("schema_id", Attribute::computed_string())
        .with_attribute("schema_name", Attribute::required_string())
        .with_attribute("display_name", Attribute::optional_computed_string())
        .with_attribute("etag", Attribute::computed_string())
        .with_block("fields", NestedBlock::list(field).with_min_items(1))
}

#[async_trait]
impl Resource for SchemaResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_schema"
    }

    fn schema(&self) -> Schema {
        custom_schema()
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: SchemaState = from_state(planned)?;
        let created: UserSchema = ctx
            .client
            .insert(Service::Directory, &schemas_path(ctx.customer()), &planned.to_api())
            .await?;
        let id = returned_id(created.schema_id, KIND)?;
        info!(schema_id = %id, "Created schema");

        ctx.wait_until_consistent(KIND, ctx.timeouts.create, &schema_path(ctx.customer(), &id), 1)
            .await?;
        read_back(ctx, &id).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: SchemaState = from_state(current)?;
        fetch(ctx, require_id(&current.id, KIND)?)
            .await?
            .map(|schema| to_state(&SchemaState::from_api(schema)))
            .transpose()
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: SchemaState = from_state(prior)?;
        let planned: SchemaState = from_state(planned)?;
        let id = require_id(&prior.id, KIND)?;
        let path = schema_path(ctx.customer(), id);

        ctx.client
            .update::<_, UserSchema>(Service::Directory, &path, &planned.to_api())
            .await?;
        ctx.wait_until_consistent(KIND, ctx.timeouts.update, &path, 1)
            .await?;
        read_back(ctx, id).await
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: SchemaState = from_state(current)?;
        let path = schema_path(ctx.customer(), require_id(&current.id, KIND)?);
        ignore_not_found(ctx.client.delete(Service::Directory, &path).await)
    }
}

#[async_trait]
impl DataSource for SchemaDataSource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_schema"
    }

    fn schema(&self) -> Schema {
        data_source_schema(custom_schema(), &["schema_id", "schema_name"])
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        require_one_of(config, &["schema_name", "schema_id"])
    }

    async fn read(&self, ctx: &ResourceContext, config: Value) -> Result<Value, ProviderError> {
        let config: SchemaState = from_state(config)?;
        let key = config
            .schema_id
            .as_deref()
            .or(config.schema_name.as_deref())
            .ok_or_else(|| {
                ProviderError::Validation("one of schema_name or schema_id is required".into())
            })?;
        read_back(ctx, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Method;
    use crate::resources::test_support::{context, settle};
    use crate::testing::MockTransport;
    use serde_json::json;

    fn api_schema() -> Value {
        json!({
            "schemaId": "s-1",
            "schemaName": "employment",
            "displayName": "Employment",
            "fields": [{
                "fieldId": "f-1",
                "fieldName": "badge",
                "fieldType": "INT64",
                "multiValued": false,
                "indexed": true,
                "readAccessType": "ADMINS_AND_SELF",
                "etag": "\"f1\""
            }],
            "etag": "\"s1\""
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_schema_puts_fields() {
        let mock = MockTransport::new();
        mock.push_json(200, api_schema());
        settle(&mock, "\"s2\"");
        mock.push_json(200, api_schema());
        let ctx = context(&mock);

        let fields = json!([{
            "field_name": "badge",
            "field_type": "INT64",
            "read_access_type": "ADMINS_AND_SELF"
        }]);
        let state = SchemaResource
            .update(
                &ctx,
                json!({"id": "s-1", "schema_name": "employment", "fields": []}),
                json!({"id": "s-1", "schema_name": "employment", "fields": fields}),
            )
            .await
            .unwrap();
        assert_eq!(state["fields"][0]["field_id"], "f-1");

        let request = &mock.requests()[0];
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.path, "customer/C0123abc/schemas/s-1");
        let body = request.body.as_ref().unwrap();
        assert_eq!(body["fields"][0]["fieldType"], "INT64");
        assert!(body["fields"][0].get("fieldId").is_none());
    }

    #[tokio::test]
    async fn test_data_source_by_name() {
        let mock = MockTransport::new();
        mock.push_json(200, api_schema());
        let ctx = context(&mock);

        let state = SchemaDataSource
            .read(&ctx, json!({"schema_name": "employment"}))
            .await
            .unwrap();
        assert_eq!(state["schema_id"], "s-1");
        assert_eq!(mock.requests()[0].path, "customer/C0123abc/schemas/employment");
    }
}
