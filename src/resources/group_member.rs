use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{found, from_state, ignore_not_found, returned_id, to_state, Resource, ResourceContext};
use crate::client::models::Member;
use crate::client::{escape, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

const KIND: &str = "group member";

/// `googleworkspace_group_member`
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupMemberResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct MemberState {
    id: Option<String>,
    group_id: Option<String>,
    email: Option<String>,
    member_id: Option<String>,
    role: Option<String>,
    #[serde(rename = "type")]
    member_type: Option<String>,
    delivery_settings: Option<String>,
    status: Option<String>,
    etag: Option<String>,
}

impl MemberState {
    fn to_api(&self) -> Member {
        Member {
            email: self.email.clone(),
            role: self.role.clone(),
            member_type: self.member_type.clone(),
            delivery_settings: self.delivery_settings.clone(),
            ..Member::default()
        }
    }

    fn from_api(group_id: &str, member: Member) -> Self {
        let member_id = member.id.clone().unwrap_or_default();
        Self {
            id: Some(member_id_path(group_id, &member_id)),
            group_id: Some(group_id.to_string()),
            email: member.email,
            member_id: member.id,
            role: member.role,
            member_type: member.member_type,
            delivery_settings: member.delivery_settings,
            status: member.status,
            etag: member.etag,
        }
    }

    /// `(group, member)` keys addressing this membership.
    fn keys(&self) -> Result<(String, String), ProviderError> {
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return parse_id(id);
        }
        let group = self.group_id.clone();
        let member = self.member_id.clone().or_else(|| self.email.clone());
        match (group, member) {
            (Some(group), Some(member)) => Ok((group, member)),
            _ => Err(ProviderError::InvalidRequest(
                "group member state needs id, or group_id with member_id or email".into(),
            )),
        }
    }
}

fn member_id_path(group_id: &str, member_id: &str) -> String {
    format!("groups/{}/members/{}", group_id, member_id)
}

fn members_path(group_id: &str) -> String {
    format!("groups/{}/members", escape(group_id))
}

fn member_path(group_id: &str, member_key: &str) -> String {
    format!("{}/{}", members_path(group_id), escape(member_key))
}

/// Split `groups/{group}/members/{member}`.
fn parse_id(id: &str) -> Result<(String, String), ProviderError> {
    let parts: Vec<&str> = id.split('/').collect();
    match parts.as_slice() {
        ["groups", group, "members", member] if !group.is_empty() && !member.is_empty() => {
            Ok((group.to_string(), member.to_string()))
        }
        _ => Err(ProviderError::InvalidRequest(format!(
            "group member id {:?} is not of the form groups/<group_id>/members/<member_id>",
            id
        ))),
    }
}

async fn fetch(
    ctx: &ResourceContext,
    group_id: &str,
    member_key: &str,
) -> Result<Option<Member>, ProviderError> {
    found(
        ctx.client
            .get(Service::Directory, &member_path(group_id, member_key))
            .await,
    )
}

async fn read_back(
    ctx: &ResourceContext,
    group_id: &str,
    member_id: &str,
) -> Result<Value, ProviderError> {
    let member = fetch(ctx, group_id, member_id)
        .await?
        .ok_or_else(|| {
            ProviderError::NotFound(format!("member {} of group {}", member_id, group_id))
        })?;
    to_state(&MemberState::from_api(group_id, member))
}

#[async_trait]
impl Resource for GroupMemberResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_group_member"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manages one member of a Google Workspace group.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "group_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Identifies the group by email, alias or unique id."),
            )
            .with_attribute(
                "email",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The member's email address."),
            )
            .with_attribute("member_id", Attribute::computed_string())
            .with_attribute(
                "role",
                Attribute::optional_string()
                    .with_allowed_values(["OWNER", "MANAGER", "MEMBER"])
                    .with_default(Value::from("MEMBER")),
            )
            .with_attribute(
                "type",
                Attribute::optional_string()
                    .with_allowed_values(["USER", "GROUP", "CUSTOMER"])
                    .with_default(Value::from("USER")),
            )
            .with_attribute(
                "delivery_settings",
                Attribute::optional_string()
                    .with_allowed_values(["ALL_MAIL", "DAILY", "DIGEST", "DISABLED", "NONE"])
                    .with_default(Value::from("ALL_MAIL")),
            )
            .with_attribute("status", Attribute::computed_string())
            .with_attribute("etag", Attribute::computed_string())
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: MemberState = from_state(planned)?;
        let group_id = planned
            .group_id
            .clone()
            .ok_or_else(|| ProviderError::Validation("group_id is required".into()))?;

        let created: Member = ctx
            .client
            .insert(Service::Directory, &members_path(&group_id), &planned.to_api())
            .await?;
        let member_id = returned_id(created.id, KIND)?;
        info!(group_id = %group_id, member_id = %member_id, "Added group member");

        ctx.wait_until_consistent(
            KIND,
            ctx.timeouts.create,
            &member_path(&group_id, &member_id),
            1,
        )
        .await?;
        read_back(ctx, &group_id, &member_id).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: MemberState = from_state(current)?;
        let (group_id, member_key) = current.keys()?;
        match fetch(ctx, &group_id, &member_key).await? {
            Some(member) => Ok(Some(to_state(&MemberState::from_api(&group_id, member))?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: MemberState = from_state(prior)?;
        let planned: MemberState = from_state(planned)?;
        let (group_id, member_key) = prior.keys()?;
        let path = member_path(&group_id, &member_key);

        ctx.client
            .update::<_, Member>(Service::Directory, &path, &planned.to_api())
            .await?;
        ctx.wait_until_consistent(KIND, ctx.timeouts.update, &path, 1)
            .await?;
        read_back(ctx, &group_id, &member_key).await
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: MemberState = from_state(current)?;
        let (group_id, member_key) = current.keys()?;
        ignore_not_found(
            ctx.client
                .delete(Service::Directory, &member_path(&group_id, &member_key))
                .await,
        )
    }

    async fn import(
        &self,
        ctx: &ResourceContext,
        id: &str,
    ) -> Result<Option<Value>, ProviderError> {
        let (group_id, member_id) = parse_id(id)?;
        let state = MemberState {
            group_id: Some(group_id),
            member_id: Some(member_id),
            ..MemberState::default()
        };
        self.read(ctx, to_state(&state)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Method;
    use crate::resources::test_support::{context, settle};
    use crate::testing::MockTransport;
    use serde_json::json;

    fn api_member() -> Value {
        json!({
            "id": "m-42",
            "email": "jane@example.com",
            "role": "MANAGER",
            "type": "USER",
            "status": "ACTIVE",
            "deliverySettings": "ALL_MAIL",
            "etag": "\"m1\""
        })
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(
            parse_id("groups/grp-1/members/m-42").unwrap(),
            ("grp-1".to_string(), "m-42".to_string())
        );
        assert!(parse_id("grp-1/m-42").is_err());
        assert!(parse_id("groups//members/m-42").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_member() {
        let mock = MockTransport::new();
        mock.push_json(200, api_member());
        settle(&mock, "\"m1\"");
        mock.push_json(200, api_member());
        let ctx = context(&mock);

        let state = GroupMemberResource
            .create(
                &ctx,
                json!({
                    "group_id": "grp-1",
                    "email": "jane@example.com",
                    "role": "MANAGER",
                    "type": "USER"
                }),
            )
            .await
            .unwrap();

        assert_eq!(state["id"], "groups/grp-1/members/m-42");
        assert_eq!(state["member_id"], "m-42");
        assert_eq!(state["type"], "USER");
        assert_eq!(state["status"], "ACTIVE");

        let requests = mock.requests();
        assert_eq!(requests[0].path, "groups/grp-1/members");
        assert_eq!(requests[0].body.as_ref().unwrap()["type"], "USER");
        assert_eq!(requests[1].path, "groups/grp-1/members/m-42");
    }

    #[tokio::test]
    async fn test_import_parses_id() {
        let mock = MockTransport::new();
        mock.push_json(200, api_member());
        let ctx = context(&mock);

        let state = GroupMemberResource
            .import(&ctx, "groups/grp-1/members/m-42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["group_id"], "grp-1");
        assert_eq!(state["role"], "MANAGER");
        assert_eq!(mock.requests()[0].method, Method::Get);
    }

    #[tokio::test]
    async fn test_import_rejects_bad_id() {
        let mock = MockTransport::new();
        let ctx = context(&mock);
        let err = GroupMemberResource.import(&ctx, "m-42").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert!(mock.requests().is_empty());
    }
}
