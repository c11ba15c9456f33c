use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{
    found, from_state, ignore_not_found, require_id, returned_id, to_state, Resource,
    ResourceContext,
};
use crate::client::models::RoleAssignment;
use crate::client::{escape, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

const KIND: &str = "role assignment";

/// `googleworkspace_role_assignment`
///
/// Assignments cannot be modified in place; every attribute forces a new one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAssignmentResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct AssignmentState {
    id: Option<String>,
    role_id: Option<String>,
    assigned_to: Option<String>,
    scope_type: Option<String>,
    org_unit_id: Option<String>,
    etag: Option<String>,
}

impl AssignmentState {
    fn to_api(&self) -> RoleAssignment {
        RoleAssignment {
            role_id: self.role_id.clone(),
            assigned_to: self.assigned_to.clone(),
            scope_type: self.scope_type.clone(),
            org_unit_id: self
                .org_unit_id
                .as_deref()
                .map(|id| id.trim_start_matches("id:").to_string()),
            ..RoleAssignment::default()
        }
    }

    fn from_api(assignment: RoleAssignment, prior: &AssignmentState) -> Self {
        Self {
            id: assignment.role_assignment_id,
            role_id: assignment.role_id,
            assigned_to: assignment.assigned_to,
            scope_type: assignment.scope_type,
            // The API drops the `id:` prefix; keep the spelling from config.
            org_unit_id: match (&prior.org_unit_id, assignment.org_unit_id) {
                (Some(prior_id), Some(id)) if prior_id.trim_start_matches("id:") == id => {
                    Some(prior_id.clone())
                }
                (_, id) => id,
            },
            etag: assignment.etag,
        }
    }
}

fn assignments_path(customer: &str) -> String {
    format!("customer/{}/roleassignments", escape(customer))
}

fn assignment_path(customer: &str, id: &str) -> String {
    format!("{}/{}", assignments_path(customer), escape(id))
}

#[async_trait]
impl Resource for RoleAssignmentResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_role_assignment"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Assigns an administrator role to a user or group.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("role_id", Attribute::required_string().with_force_new())
            .with_attribute(
                "assigned_to",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Unique id of the user or group the role is assigned to."),
            )
            .with_attribute(
                "scope_type",
                Attribute::optional_string()
                    .with_force_new()
                    .with_allowed_values(["CUSTOMER", "ORG_UNIT"])
                    .with_default(Value::from("CUSTOMER")),
            )
            .with_attribute(
                "org_unit_id",
                Attribute::optional_string()
                    .with_force_new()
                    .with_description(
                        "Org unit the assignment is limited to when scope_type is ORG_UNIT.",
                    ),
            )
            .with_attribute("etag", Attribute::computed_string())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let scope = config.get("scope_type").and_then(Value::as_str);
        let has_unit = config.get("org_unit_id").is_some_and(|v| !v.is_null());
        match (scope, has_unit) {
            (Some("ORG_UNIT"), false) => vec![Diagnostic::error("Missing org_unit_id")
                .with_detail("org_unit_id is required when scope_type is ORG_UNIT")
                .with_attribute("org_unit_id")],
            (Some("ORG_UNIT"), true) => Vec::new(),
            (_, true) => vec![Diagnostic::error("Unexpected org_unit_id")
                .with_detail("org_unit_id is only used when scope_type is ORG_UNIT")
                .with_attribute("org_unit_id")],
            _ => Vec::new(),
        }
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: AssignmentState = from_state(planned)?;
        let created: RoleAssignment = ctx
            .client
            .insert(Service::Directory, &assignments_path(ctx.customer()), &planned.to_api())
            .await?;
        let id = returned_id(created.role_assignment_id, KIND)?;
        info!(role_assignment_id = %id, "Created role assignment");

        let path = assignment_path(ctx.customer(), &id);
        ctx.wait_until_consistent(KIND, ctx.timeouts.create, &path, 1)
            .await?;
        let assignment: RoleAssignment = found(ctx.client.get(Service::Directory, &path).await)?
            .ok_or_else(|| ProviderError::NotFound(format!("role assignment {}", id)))?;
        to_state(&AssignmentState::from_api(assignment, &planned))
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: AssignmentState = from_state(current)?;
        let path = assignment_path(ctx.customer(), require_id(&current.id, KIND)?);
        found::<RoleAssignment>(ctx.client.get(Service::Directory, &path).await)?
            .map(|assignment| to_state(&AssignmentState::from_api(assignment, &current)))
            .transpose()
    }

    async fn update(
        &self,
        _ctx: &ResourceContext,
        _prior: Value,
        _planned: Value,
    ) -> Result<Value, ProviderError> {
        Err(ProviderError::FailedPrecondition(
            "role assignments cannot be updated in place; they must be replaced".into(),
        ))
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: AssignmentState = from_state(current)?;
        let path = assignment_path(ctx.customer(), require_id(&current.id, KIND)?);
        ignore_not_found(ctx.client.delete(Service::Directory, &path).await)
    }
}
