use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{found, from_state, to_state, Resource, ResourceContext};
use crate::client::models::GroupSettings;
use crate::client::{escape, ApiRequest, Method, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// `googleworkspace_group_settings`
///
/// Settings always exist for a group, so create is an update and delete only
/// drops the object from state.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupSettingsResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct SettingsState {
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    description: Option<String>,
    who_can_join: Option<String>,
    who_can_view_membership: Option<String>,
    who_can_view_group: Option<String>,
    who_can_post_message: Option<String>,
    who_can_contact_owner: Option<String>,
    who_can_leave_group: Option<String>,
    who_can_moderate_members: Option<String>,
    who_can_moderate_content: Option<String>,
    who_can_discover_group: Option<String>,
    message_moderation_level: Option<String>,
    spam_moderation_level: Option<String>,
    reply_to: Option<String>,
    custom_reply_to: Option<String>,
    custom_footer_text: Option<String>,
    primary_language: Option<String>,
    allow_external_members: Option<bool>,
    allow_web_posting: Option<bool>,
    is_archived: Option<bool>,
    archive_only: Option<bool>,
    members_can_post_as_the_group: Option<bool>,
    enable_collaborative_inbox: Option<bool>,
    include_custom_footer: Option<bool>,
}

fn flag_to_api(flag: Option<bool>) -> Option<String> {
    flag.map(|flag| flag.to_string())
}

fn flag_from_api(flag: Option<String>) -> Option<bool> {
    flag.and_then(|flag| match flag.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    })
}

impl SettingsState {
    fn to_api(&self) -> GroupSettings {
        GroupSettings {
            email: self.email.clone(),
            who_can_join: self.who_can_join.clone(),
            who_can_view_membership: self.who_can_view_membership.clone(),
            who_can_view_group: self.who_can_view_group.clone(),
            who_can_post_message: self.who_can_post_message.clone(),
            who_can_contact_owner: self.who_can_contact_owner.clone(),
            who_can_leave_group: self.who_can_leave_group.clone(),
            who_can_moderate_members: self.who_can_moderate_members.clone(),
            who_can_moderate_content: self.who_can_moderate_content.clone(),
            who_can_discover_group: self.who_can_discover_group.clone(),
            message_moderation_level: self.message_moderation_level.clone(),
            spam_moderation_level: self.spam_moderation_level.clone(),
            reply_to: self.reply_to.clone(),
            custom_reply_to: self.custom_reply_to.clone(),
            custom_footer_text: self.custom_footer_text.clone(),
            primary_language: self.primary_language.clone(),
            allow_external_members: flag_to_api(self.allow_external_members),
            allow_web_posting: flag_to_api(self.allow_web_posting),
            is_archived: flag_to_api(self.is_archived),
            archive_only: flag_to_api(self.archive_only),
            members_can_post_as_the_group: flag_to_api(self.members_can_post_as_the_group),
            enable_collaborative_inbox: flag_to_api(self.enable_collaborative_inbox),
            include_custom_footer: flag_to_api(self.include_custom_footer),
            ..GroupSettings::default()
        }
    }

    fn from_api(settings: GroupSettings) -> Self {
        Self {
            id: settings.email.clone(),
            email: settings.email,
            name: settings.name,
            description: settings.description,
            who_can_join: settings.who_can_join,
            who_can_view_membership: settings.who_can_view_membership,
            who_can_view_group: settings.who_can_view_group,
            who_can_post_message: settings.who_can_post_message,
            who_can_contact_owner: settings.who_can_contact_owner,
            who_can_leave_group: settings.who_can_leave_group,
            who_can_moderate_members: settings.who_can_moderate_members,
            who_can_moderate_content: settings.who_can_moderate_content,
            who_can_discover_group: settings.who_can_discover_group,
            message_moderation_level: settings.message_moderation_level,
            spam_moderation_level: settings.spam_moderation_level,
            reply_to: settings.reply_to,
            custom_reply_to: settings.custom_reply_to,
            custom_footer_text: settings.custom_footer_text,
            primary_language: settings.primary_language,
            allow_external_members: flag_from_api(settings.allow_external_members),
            allow_web_posting: flag_from_api(settings.allow_web_posting),
            is_archived: flag_from_api(settings.is_archived),
            archive_only: flag_from_api(settings.archive_only),
            members_can_post_as_the_group: flag_from_api(settings.members_can_post_as_the_group),
            enable_collaborative_inbox: flag_from_api(settings.enable_collaborative_inbox),
            include_custom_footer: flag_from_api(settings.include_custom_footer),
        }
    }

    fn group_key(&self) -> Result<&str, ProviderError> {
        self.email
            .as_deref()
            .or(self.id.as_deref())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidRequest("group settings state has no email".into())
            })
    }
}

/// The Groups Settings API answers in Atom unless JSON is requested.
fn request(method: Method, email: &str) -> ApiRequest {
    ApiRequest::new(Service::GroupsSettings, method, escape(email)).with_query("alt", "json")
}

async fn put(ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
    let planned: SettingsState = from_state(planned)?;
    let email = planned.group_key()?;
    let body = serde_json::to_value(planned.to_api())?;
    let settings: GroupSettings = ctx
        .client
        .execute(request(Method::Put, email).with_body(body))
        .await?;
    info!(group = %email, "Updated group settings");
    to_state(&SettingsState::from_api(settings))
}

fn who_can(values: &[&str]) -> Attribute {
    Attribute::optional_computed_string().with_allowed_values(values.iter().copied())
}

#[async_trait]
impl Resource for GroupSettingsResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_group_settings"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manages the settings of a Google Workspace group.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "email",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The group's email address."),
            )
            .with_attribute("name", Attribute::computed_string())
            .with_attribute("description", Attribute::computed_string())
            .with_attribute(
                "who_can_join",
                who_can(&[
                    "ANYONE_CAN_JOIN",
                    "ALL_IN_DOMAIN_CAN_JOIN",
                    "INVITED_CAN_JOIN",
                    "CAN_REQUEST_TO_JOIN",
                ]),
            )
            .with_attribute(
                "who_can_view_membership",
                who_can(&[
                    "ALL_IN_DOMAIN_CAN_VIEW",
                    "ALL_MEMBERS_CAN_VIEW",
                    "ALL_MANAGERS_CAN_VIEW",
                    "ALL_OWNERS_CAN_VIEW",
                ]),
            )
            .with_attribute(
                "who_can_view_group",
                who_can(&[
                    "ANYONE_CAN_VIEW",
                    "ALL_IN_DOMAIN_CAN_VIEW",
                    "ALL_MEMBERS_CAN_VIEW",
                    "ALL_MANAGERS_CAN_VIEW",
                    "ALL_OWNERS_CAN_VIEW",
                ]),
            )
            .with_attribute(
                "who_can_post_message",
                who_can(&[
                    "NONE_CAN_POST",
                    "ALL_MANAGERS_CAN_POST",
                    "ALL_MEMBERS_CAN_POST",
                    "ALL_OWNERS_CAN_POST",
                    "ALL_IN_DOMAIN_CAN_POST",
                    "ANYONE_CAN_POST",
                ]),
            )
            .with_attribute(
                "who_can_contact_owner",
                who_can(&[
                    "ALL_IN_DOMAIN_CAN_CONTACT",
                    "ALL_MANAGERS_CAN_CONTACT",
                    "ALL_MEMBERS_CAN_CONTACT",
                    "ANYONE_CAN_CONTACT",
                    "ALL_OWNERS_CAN_CONTACT",
                ]),
            )
            .with_attribute(
                "who_can_leave_group",
                who_can(&[
                    "ALL_MANAGERS_CAN_LEAVE",
                    "ALL_MEMBERS_CAN_LEAVE",
                    "NONE_CAN_LEAVE",
                    "ALL_OWNERS_CAN_LEAVE",
                ]),
            )
            .with_attribute(
                "who_can_moderate_members",
                who_can(&["ALL_MEMBERS", "OWNERS_AND_MANAGERS", "OWNERS_ONLY", "NONE"]),
            )
            .with_attribute(
                "who_can_moderate_content",
                who_can(&["ALL_MEMBERS", "OWNERS_AND_MANAGERS", "OWNERS_ONLY", "NONE"]),
            )
            .with_attribute(
                "who_can_discover_group",
                who_can(&[
                    "ANYONE_CAN_DISCOVER",
                    "ALL_IN_DOMAIN_CAN_DISCOVER",
                    "ALL_MEMBERS_CAN_DISCOVER",
                ]),
            )
            .with_attribute(
                "message_moderation_level",
                who_can(&[
                    "MODERATE_ALL_MESSAGES",
                    "MODERATE_NON_MEMBERS",
                    "MODERATE_NEW_MEMBERS",
                    "MODERATE_NONE",
                ]),
            )
            .with_attribute(
                "spam_moderation_level",
                who_can(&["ALLOW", "MODERATE", "SILENTLY_MODERATE", "REJECT"]),
            )
            .with_attribute(
                "reply_to",
                who_can(&[
                    "REPLY_TO_CUSTOM",
                    "REPLY_TO_SENDER",
                    "REPLY_TO_LIST",
                    "REPLY_TO_OWNER",
                    "REPLY_TO_IGNORE",
                    "REPLY_TO_MANAGERS",
                ]),
            )
            .with_attribute("custom_reply_to", Attribute::optional_computed_string())
            .with_attribute("custom_footer_text", Attribute::optional_computed_string())
            .with_attribute("primary_language", Attribute::optional_computed_string())
            .with_attribute("allow_external_members", Attribute::optional_computed_bool())
            .with_attribute("allow_web_posting", Attribute::optional_computed_bool())
            .with_attribute("is_archived", Attribute::optional_computed_bool())
            .with_attribute("archive_only", Attribute::optional_computed_bool())
            .with_attribute("members_can_post_as_the_group", Attribute::optional_computed_bool())
            .with_attribute("enable_collaborative_inbox", Attribute::optional_computed_bool())
            .with_attribute("include_custom_footer", Attribute::optional_computed_bool())
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        put(ctx, planned).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: SettingsState = from_state(current)?;
        let email = current.group_key()?;
        let settings: Option<GroupSettings> =
            found(ctx.client.execute(request(Method::Get, email)).await)?;
        settings
            .map(|settings| to_state(&SettingsState::from_api(settings)))
            .transpose()
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        put(ctx, planned).await
    }

    async fn delete(&self, _ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: SettingsState = from_state(current)?;
        let email = current.group_key()?;
        info!(group = %email, "Group settings removed from state; remote settings are kept");
        Ok(())
    }

    async fn import(
        &self,
        ctx: &ResourceContext,
        id: &str,
    ) -> Result<Option<Value>, ProviderError> {
        self.read(ctx, serde_json::json!({ "email": id })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::context;
    use crate::testing::MockTransport;
    use serde_json::json;

    #[test]
    fn test_flag_conversion() {
        assert_eq!(flag_to_api(Some(true)).as_deref(), Some("true"));
        assert_eq!(flag_from_api(Some("False".into())), Some(false));
        assert_eq!(flag_from_api(Some("maybe".into())), None);
        assert_eq!(flag_from_api(None), None);
    }

    #[tokio::test]
    async fn test_create_puts_string_flags() {
        let mock = MockTransport::new();
        mock.push_json(
            200,
            json!({
                "email": "eng@example.com",
                "name": "Engineering",
                "whoCanJoin": "INVITED_CAN_JOIN",
                "allowExternalMembers": "true",
                "isArchived": "false"
            }),
        );
        let ctx = context(&mock);

        let state = GroupSettingsResource
            .create(
                &ctx,
                json!({
                    "email": "eng@example.com",
                    "who_can_join": "INVITED_CAN_JOIN",
                    "allow_external_members": true
                }),
            )
            .await
            .unwrap();

        assert_eq!(state["id"], "eng@example.com");
        assert_eq!(state["allow_external_members"], true);
        assert_eq!(state["is_archived"], false);

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Put);
        assert_eq!(requests[0].service, Service::GroupsSettings);
        assert_eq!(requests[0].path, "eng@example.com");
        assert!(requests[0].query.contains(&("alt".to_string(), "json".to_string())));
        assert_eq!(requests[0].body.as_ref().unwrap()["allowExternalMembers"], "true");
    }

    #[tokio::test]
    async fn test_delete_makes_no_calls() {
        let mock = MockTransport::new();
        let ctx = context(&mock);
        GroupSettingsResource
            .delete(&ctx, json!({"email": "eng@example.com"}))
            .await
            .unwrap();
        assert!(mock.requests().is_empty());
    }
}
