use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{
    data_source_schema, found, from_state, ignore_not_found, require_id, require_one_of,
    returned_id, to_state, DataSource, Resource, ResourceContext,
};
use crate::client::models::OrgUnit;
use crate::client::{escape, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

const KIND: &str = "org unit";

/// `googleworkspace_org_unit`
#[derive(Debug, Clone, Copy, Default)]
pub struct OrgUnitResource;

/// `googleworkspace_org_unit` data source, looked up by `org_unit_path` or
/// `org_unit_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrgUnitDataSource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct OrgUnitState {
    id: Option<String>,
    org_unit_id: Option<String>,
    org_unit_path: Option<String>,
    name: Option<String>,
    description: Option<String>,
    parent_org_unit_id: Option<String>,
    parent_org_unit_path: Option<String>,
    block_inheritance: Option<bool>,
    etag: Option<String>,
}

impl OrgUnitState {
    fn to_api(&self) -> OrgUnit {
        OrgUnit {
            name: self.name.clone(),
            description: self.description.clone(),
            parent_org_unit_id: self.parent_org_unit_id.clone(),
            parent_org_unit_path: self
                .parent_org_unit_id
                .is_none()
                .then(|| self.parent_org_unit_path.clone())
                .flatten(),
            block_inheritance: self.block_inheritance,
            ..OrgUnit::default()
        }
    }

    fn from_api(unit: OrgUnit) -> Self {
        Self {
            id: unit.org_unit_id.clone(),
            org_unit_id: unit.org_unit_id,
            org_unit_path: unit.org_unit_path,
            name: unit.name,
            description: unit.description,
            parent_org_unit_id: unit.parent_org_unit_id,
            parent_org_unit_path: unit.parent_org_unit_path,
            block_inheritance: unit.block_inheritance,
            etag: unit.etag,
        }
    }
}

/// Path of the unit with id `id`, which may or may not carry the `id:` prefix.
fn unit_path_by_id(customer: &str, id: &str) -> String {
    format!(
        "customer/{}/orgunits/id:{}",
        escape(customer),
        escape(id.trim_start_matches("id:"))
    )
}

/// Path of the unit at `org_unit_path`, e.g. `/Engineering/Platform`.
fn unit_path_by_path(customer: &str, org_unit_path: &str) -> String {
    let segments: Vec<String> = org_unit_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(escape)
        .collect();
    format!("customer/{}/orgunits/{}", escape(customer), segments.join("/"))
}

async fn fetch(ctx: &ResourceContext, path: &str) -> Result<Option<OrgUnit>, ProviderError> {
    found(ctx.client.get(Service::Directory, path).await)
}

async fn read_back(ctx: &ResourceContext, path: &str) -> Result<Value, ProviderError> {
    let unit = fetch(ctx, path)
        .await?
        .ok_or_else(|| ProviderError::NotFound(format!("org unit at {}", path)))?;
    to_state(&OrgUnitState::from_api(unit))
}

fn org_unit_schema() -> Schema {
    Schema::v0()
        .with_description("Manages an organizational unit.")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("org_unit_id", Attribute::computed_string())
        .with_attribute("org_unit_path", Attribute::computed_string())
        .with_attribute(
            "name",
            Attribute::required_string().with_description("The organizational unit's path name."),
        )
        .with_attribute("description", Attribute::optional_string())
        .with_attribute(
            "parent_org_unit_id",
            Attribute::optional_computed_string().with_description(
                "Unique id of the parent unit. Either this or parent_org_unit_path is required.",
            ),
        )
        .with_attribute(
            "parent_org_unit_path",
            Attribute::optional_computed_string()
                .with_description("Full path of the parent unit, `/` for the top level."),
        )
        .with_attribute(
            "block_inheritance",
            Attribute::optional_bool().with_default(Value::Bool(false)),
        )
        .with_attribute("etag", Attribute::computed_string())
}

#[async_trait]
impl Resource for OrgUnitResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_org_unit"
    }

    fn schema(&self) -> Schema {
        org_unit_schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let has = |key: &str| config.get(key).is_some_and(|v| !v.is_null());
        if has("parent_org_unit_id") || has("parent_org_unit_path") {
            Vec::new()
        } else {
            vec![Diagnostic::error("Missing parent org unit")
                .with_detail("One of parent_org_unit_id or parent_org_unit_path must be set")
                .with_attribute("parent_org_unit_path")]
        }
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: OrgUnitState = from_state(planned)?;
        let collection = format!("customer/{}/orgunits", escape(ctx.customer()));
        let created: OrgUnit = ctx
            .client
            .insert(Service::Directory, &collection, &planned.to_api())
            .await?;
        let id = returned_id(created.org_unit_id, KIND)?;
        info!(org_unit_id = %id, "Created org unit");

        let path = unit_path_by_id(ctx.customer(), &id);
        ctx.wait_until_consistent(KIND, ctx.timeouts.create, &path, 1)
            .await?;
        read_back(ctx, &path).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: OrgUnitState = from_state(current)?;
        let id = require_id(&current.id, KIND)?;
        fetch(ctx, &unit_path_by_id(ctx.customer(), id))
            .await?
            .map(|unit| to_state(&OrgUnitState::from_api(unit)))
            .transpose()
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: OrgUnitState = from_state(prior)?;
        let planned: OrgUnitState = from_state(planned)?;
        let path = unit_path_by_id(ctx.customer(), require_id(&prior.id, KIND)?);

        ctx.client
            .update::<_, OrgUnit>(Service::Directory, &path, &planned.to_api())
            .await?;
        ctx.wait_until_consistent(KIND, ctx.timeouts.update, &path, 1)
            .await?;
        read_back(ctx, &path).await
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: OrgUnitState = from_state(current)?;
        let path = unit_path_by_id(ctx.customer(), require_id(&current.id, KIND)?);
        ignore_not_found(ctx.client.delete(Service::Directory, &path).await)
    }
}

#[async_trait]
impl DataSource for OrgUnitDataSource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_org_unit"
    }

    fn schema(&self) -> Schema {
        data_source_schema(org_unit_schema(), &["org_unit_id", "org_unit_path"])
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        require_one_of(config, &["org_unit_path", "org_unit_id"])
    }

    async fn read(&self, ctx: &ResourceContext, config: Value) -> Result<Value, ProviderError> {
        let config: OrgUnitState = from_state(config)?;
        let path = match (&config.org_unit_id, &config.org_unit_path) {
            (Some(id), _) => unit_path_by_id(ctx.customer(), id),
            (None, Some(org_unit_path)) => unit_path_by_path(ctx.customer(), org_unit_path),
            (None, None) => {
                return Err(ProviderError::Validation(
                    "one of org_unit_path or org_unit_id is required".into(),
                ))
            }
        };
        read_back(ctx, &path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::{context, settle};
    use crate::testing::MockTransport;
    use serde_json::json;

    fn api_unit() -> Value {
        json!({
            "orgUnitId": "id:03ph8a2z1",
            "orgUnitPath": "/Engineering",
            "name": "Engineering",
            "parentOrgUnitId": "id:03ph8a2z0",
            "parentOrgUnitPath": "/",
            "blockInheritance": false,
            "etag": "\"o1\""
        })
    }

    #[test]
    fn test_unit_paths() {
        assert_eq!(
            unit_path_by_id("C0123abc", "id:03ph8a2z1"),
            "customer/C0123abc/orgunits/id:03ph8a2z1"
        );
        assert_eq!(
            unit_path_by_id("C0123abc", "03ph8a2z1"),
            "customer/C0123abc/orgunits/id:03ph8a2z1"
        );
        assert_eq!(
            unit_path_by_path("C0123abc", "/Engineering/Site Reliability"),
            "customer/C0123abc/orgunits/Engineering/Site%20Reliability"
        );
    }

    #[test]
    fn test_validate_requires_parent() {
        assert_eq!(OrgUnitResource.validate(&json!({"name": "Engineering"})).len(), 1);
        assert!(OrgUnitResource
            .validate(&json!({"name": "Engineering", "parent_org_unit_path": "/"}))
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_org_unit() {
        let mock = MockTransport::new();
        mock.push_json(200, api_unit());
        settle(&mock, "\"o1\"");
        mock.push_json(200, api_unit());
        let ctx = context(&mock);

        let state = OrgUnitResource
            .create(&ctx, json!({"name": "Engineering", "parent_org_unit_path": "/"}))
            .await
            .unwrap();
        assert_eq!(state["id"], "id:03ph8a2z1");
        assert_eq!(state["org_unit_path"], "/Engineering");

        let requests = mock.requests();
        assert_eq!(requests[0].path, "customer/C0123abc/orgunits");
        assert_eq!(requests[0].body.as_ref().unwrap()["parentOrgUnitPath"], "/");
        assert_eq!(requests[1].path, "customer/C0123abc/orgunits/id:03ph8a2z1");
    }

    #[tokio::test]
    async fn test_data_source_by_path() {
        let mock = MockTransport::new();
        mock.push_json(200, api_unit());
        let ctx = context(&mock);

        let state = OrgUnitDataSource
            .read(&ctx, json!({"org_unit_path": "/Engineering"}))
            .await
            .unwrap();
        assert_eq!(state["org_unit_id"], "id:03ph8a2z1");
        assert_eq!(mock.requests()[0].path, "customer/C0123abc/orgunits/Engineering");
    }
}
