//! Wire representations of the Workspace API objects.
//!
//! Field names follow the APIs (camelCase). Everything is optional so the same
//! struct serves requests, where unset fields are omitted, and responses,
//! where the server may leave fields out. 64-bit identifiers are transported
//! as JSON strings by the APIs and kept as strings here.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Directory `User`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<UserName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_password_at_next_login: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_in_global_address_list: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_unit_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_delegated_admin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_editable_aliases: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreed_to_terms: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_schemas: Option<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Directory `UserName`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserName {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// Body of `users/{key}/makeAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMakeAdmin {
    pub status: bool,
}

/// Directory `Alias` (users and groups).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alias {
    pub alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_email: Option<String>,
}

/// Directory `Group`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_members_count: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_editable_aliases: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Directory `Member`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub member_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_settings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Directory `OrgUnit`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgUnit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_unit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_unit_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_org_unit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_org_unit_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_inheritance: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Directory `Role`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role_privileges: Vec<RolePrivilege>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_system_role: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_super_admin_role: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// One privilege granted by a [`Role`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePrivilege {
    pub privilege_name: String,
    pub service_id: String,
}

/// Directory `RoleAssignment`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_assignment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_unit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Directory `Domains`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_primary: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_aliases: Vec<DomainAlias>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Directory `DomainAlias`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainAlias {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_alias_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_domain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Directory custom user `Schema`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SchemaField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// One field of a custom user [`Schema`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    pub field_name: String,
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_valued: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_access_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Gmail `SendAs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_as_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_primary: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treat_as_alias: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<String>,
}

/// Groups Settings `Groups`. Boolean settings travel as `"true"`/`"false"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_join: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_view_membership: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_view_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_post_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_contact_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_leave_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_moderate_members: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_moderate_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who_can_discover_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_external_members: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_web_posting: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_only: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members_can_post_as_the_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_collaborative_inbox: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_custom_footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_footer_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_moderation_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spam_moderation_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_language: Option<String>,
}

/// Target of a Chrome policy operation, e.g. `orgunits/03ph8a2z1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetKey {
    pub target_resource: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_target_keys: BTreeMap<String, String>,
}

/// A policy schema together with its field values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyValue {
    pub policy_schema: String,
    #[serde(default)]
    pub value: BTreeMap<String, Value>,
}

/// Body of `policies/orgunits:batchModify`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchModifyRequest {
    pub requests: Vec<ModifyPolicyRequest>,
}

/// One entry of [`BatchModifyRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyPolicyRequest {
    pub policy_target_key: PolicyTargetKey,
    pub policy_value: PolicyValue,
    pub update_mask: String,
}

/// Body of `policies/orgunits:batchInherit`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInheritRequest {
    pub requests: Vec<InheritPolicyRequest>,
}

/// One entry of [`BatchInheritRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritPolicyRequest {
    pub policy_target_key: PolicyTargetKey,
    pub policy_schema: String,
}

/// Body of `policies:resolve`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub policy_schema_filter: String,
    pub policy_target_key: PolicyTargetKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

/// Response of `policies:resolve`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    #[serde(default)]
    pub resolved_policies: Vec<ResolvedPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// One entry of [`ResolveResponse`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_key: Option<PolicyTargetKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_key: Option<PolicyTargetKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<PolicyValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_omits_unset_fields() {
        let user = User {
            primary_email: Some("jane@example.com".into()),
            name: Some(UserName {
                given_name: Some("Jane".into()),
                family_name: Some("Doe".into()),
                full_name: None,
            }),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&user).unwrap(),
            json!({
                "primaryEmail": "jane@example.com",
                "name": {"givenName": "Jane", "familyName": "Doe"}
            })
        );
    }

    #[test]
    fn test_member_type_field_name() {
        let member: Member = serde_json::from_value(json!({
            "kind": "admin#directory#member",
            "id": "1234",
            "email": "bob@example.com",
            "role": "MANAGER",
            "type": "USER",
            "etag": "\"x\""
        }))
        .unwrap();
        assert_eq!(member.member_type.as_deref(), Some("USER"));
        assert_eq!(member.role.as_deref(), Some("MANAGER"));
    }

    #[test]
    fn test_resolve_response() {
        let response: ResolveResponse = serde_json::from_value(json!({
            "resolvedPolicies": [{
                "targetKey": {"targetResource": "orgunits/03ph8a2z1"},
                "sourceKey": {"targetResource": "orgunits/03ph8a2z1"},
                "value": {
                    "policySchema": "chrome.users.MaxConnectionsPerProxy",
                    "value": {"maxConnectionsPerProxy": 34}
                }
            }]
        }))
        .unwrap();
        let value = response.resolved_policies[0].value.as_ref().unwrap();
        assert_eq!(value.policy_schema, "chrome.users.MaxConnectionsPerProxy");
        assert_eq!(value.value["maxConnectionsPerProxy"], json!(34));
        assert!(response.next_page_token.is_none());
    }
}
