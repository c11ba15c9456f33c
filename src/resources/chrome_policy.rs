use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{from_state, to_state, Resource, ResourceContext};
use crate::client::models::{
    BatchInheritRequest, BatchModifyRequest, InheritPolicyRequest, ModifyPolicyRequest,
    PolicyTargetKey, PolicyValue, ResolveRequest, ResolveResponse,
};
use crate::client::{escape, Service};
use crate::error::ProviderError;
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema,
};

/// `googleworkspace_chrome_policy`
///
/// Manages the policies applied directly to one org unit. Values are stored
/// JSON-encoded so that any policy field type fits a string map.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromePolicyResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ChromePolicyState {
    id: Option<String>,
    org_unit_id: Option<String>,
    policies: Option<Vec<PolicyState>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct PolicyState {
    schema_name: String,
    schema_values: Option<BTreeMap<String, String>>,
}

impl ChromePolicyState {
    fn org_unit(&self) -> Result<String, ProviderError> {
        self.org_unit_id
            .as_deref()
            .or(self.id.as_deref())
            .map(|id| id.trim_start_matches("id:").to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidRequest("chrome policy state has no org_unit_id".into())
            })
    }

    fn policies(&self) -> &[PolicyState] {
        self.policies.as_deref().unwrap_or_default()
    }
}

fn target_key(org_unit: &str) -> PolicyTargetKey {
    PolicyTargetKey {
        target_resource: format!("orgunits/{}", org_unit),
        ..PolicyTargetKey::default()
    }
}

fn customer_path(ctx: &ResourceContext, method: &str) -> String {
    format!("customers/{}/{}", escape(ctx.customer()), method)
}

/// Decode the JSON-encoded values of `policy`.
fn decode_values(policy: &PolicyState) -> Result<BTreeMap<String, Value>, ProviderError> {
    policy
        .schema_values
        .iter()
        .flatten()
        .map(|(field, encoded)| {
            serde_json::from_str(encoded)
                .map(|value| (field.clone(), value))
                .map_err(|err| {
                    ProviderError::Validation(format!(
                        "value of {}.{} is not valid JSON: {}",
                        policy.schema_name, field, err
                    ))
                })
        })
        .collect()
}

async fn modify(
    ctx: &ResourceContext,
    org_unit: &str,
    policies: &[PolicyState],
) -> Result<(), ProviderError> {
    if policies.is_empty() {
        return Ok(());
    }
    let mut requests = Vec::with_capacity(policies.len());
    for policy in policies {
        let value = decode_values(policy)?;
        let update_mask = value.keys().cloned().collect::<Vec<_>>().join(",");
        requests.push(ModifyPolicyRequest {
            policy_target_key: target_key(org_unit),
            policy_value: PolicyValue {
                policy_schema: policy.schema_name.clone(),
                value,
            },
            update_mask,
        });
    }

    ctx.client
        .post::<_, Value>(
            Service::ChromePolicy,
            &customer_path(ctx, "policies/orgunits:batchModify"),
            &BatchModifyRequest { requests },
        )
        .await?;
    Ok(())
}

async fn inherit(
    ctx: &ResourceContext,
    org_unit: &str,
    schema_names: &[String],
) -> Result<(), ProviderError> {
    if schema_names.is_empty() {
        return Ok(());
    }
    let requests = schema_names
        .iter()
        .map(|schema| InheritPolicyRequest {
            policy_target_key: target_key(org_unit),
            policy_schema: schema.clone(),
        })
        .collect();
    ctx.client
        .post::<_, Value>(
            Service::ChromePolicy,
            &customer_path(ctx, "policies/orgunits:batchInherit"),
            &BatchInheritRequest { requests },
        )
        .await?;
    Ok(())
}

/// Values of `schema_name` set directly on `org_unit`, or `None` when the
/// org unit inherits the policy.
async fn resolve(
    ctx: &ResourceContext,
    org_unit: &str,
    schema_name: &str,
) -> Result<Option<BTreeMap<String, Value>>, ProviderError> {
    let target = target_key(org_unit);
    let mut page_token = None;
    loop {
        let request = ResolveRequest {
            policy_schema_filter: schema_name.to_string(),
            policy_target_key: target.clone(),
            page_token: page_token.take(),
        };
        let response: ResolveResponse = ctx
            .client
            .post(Service::ChromePolicy, &customer_path(ctx, "policies:resolve"), &request)
            .await?;

        for resolved in response.resolved_policies {
            let local = resolved
                .source_key
                .as_ref()
                .is_some_and(|source| source.target_resource == target.target_resource);
            match resolved.value {
                Some(value) if local && value.policy_schema == schema_name => {
                    return Ok(Some(value.value))
                }
                _ => {}
            }
        }

        match response.next_page_token.filter(|token| !token.is_empty()) {
            Some(token) => page_token = Some(token),
            None => return Ok(None),
        }
    }
}

/// Refresh `state` from the resolved policies. The org unit id keeps the
/// spelling it was configured with.
async fn read_state(
    ctx: &ResourceContext,
    state: &ChromePolicyState,
) -> Result<Option<Value>, ProviderError> {
    let org_unit = state.org_unit()?;
    let org_unit = org_unit.as_str();
    let mut policies = Vec::with_capacity(state.policies().len());
    for policy in state.policies() {
        let Some(values) = resolve(ctx, org_unit, &policy.schema_name).await? else {
            debug!(org_unit, schema = %policy.schema_name, "Policy is inherited");
            continue;
        };
        let configured = policy.schema_values.as_ref();
        let schema_values = values
            .into_iter()
            .filter(|(field, _)| {
                configured.map_or(true, |configured| configured.contains_key(field))
            })
            .map(|(field, value)| serde_json::to_string(&value).map(|encoded| (field, encoded)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        policies.push(PolicyState {
            schema_name: policy.schema_name.clone(),
            schema_values: Some(schema_values),
        });
    }

    if policies.is_empty() {
        return Ok(None);
    }
    Ok(Some(to_state(&ChromePolicyState {
        id: Some(org_unit.to_string()),
        org_unit_id: state.org_unit_id.clone().or_else(|| Some(org_unit.to_string())),
        policies: Some(policies),
    })?))
}

#[async_trait]
impl Resource for ChromePolicyResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_chrome_policy"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manages Chrome policies applied to an org unit.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "org_unit_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Org unit the policies apply to."),
            )
            .with_block(
                "policies",
                NestedBlock::list(
                    Block::new()
                        .with_attribute(
                            "schema_name",
                            Attribute::required_string().with_description(
                                "Policy schema, e.g. chrome.users.MaxConnectionsPerProxy.",
                            ),
                        )
                        .with_attribute(
                            "schema_values",
                            Attribute::new(
                                AttributeType::map(AttributeType::String),
                                AttributeFlags::optional(),
                            )
                            .with_description("JSON-encoded field values keyed by field name."),
                        ),
                )
                .with_min_items(1),
            )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let Ok(state) = serde_json::from_value::<ChromePolicyState>(config.clone()) else {
            return Vec::new();
        };
        state
            .policies()
            .iter()
            .enumerate()
            .filter_map(|(index, policy)| {
                decode_values(policy).err().map(|err| {
                    Diagnostic::error("Invalid policy value")
                        .with_detail(err.message())
                        .with_attribute(format!("policies.{}.schema_values", index))
                })
            })
            .collect()
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: ChromePolicyState = from_state(planned)?;
        let org_unit = planned.org_unit()?;
        modify(ctx, &org_unit, planned.policies()).await?;
        info!(org_unit = %org_unit, policies = planned.policies().len(), "Applied chrome policies");

        read_state(ctx, &planned)
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("chrome policies for org unit {}", org_unit))
            })
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: ChromePolicyState = from_state(current)?;
        read_state(ctx, &current).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: ChromePolicyState = from_state(prior)?;
        let planned: ChromePolicyState = from_state(planned)?;
        let org_unit = planned.org_unit()?;

        let removed: Vec<String> = prior
            .policies()
            .iter()
            .filter(|old| {
                !planned
                    .policies()
                    .iter()
                    .any(|new| new.schema_name == old.schema_name)
            })
            .map(|old| old.schema_name.clone())
            .collect();
        inherit(ctx, &org_unit, &removed).await?;
        modify(ctx, &org_unit, planned.policies()).await?;

        read_state(ctx, &planned)
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("chrome policies for org unit {}", org_unit))
            })
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: ChromePolicyState = from_state(current)?;
        let org_unit = current.org_unit()?;
        let schemas: Vec<String> = current
            .policies()
            .iter()
            .map(|policy| policy.schema_name.clone())
            .collect();
        inherit(ctx, &org_unit, &schemas).await
    }

    /// Import id is `<org_unit_id>/<schema>[,<schema>...]`; every field the
    /// org unit sets for those schemas lands in state.
    async fn import(
        &self,
        ctx: &ResourceContext,
        id: &str,
    ) -> Result<Option<Value>, ProviderError> {
        let (org_unit, schemas) = id.split_once('/').ok_or_else(|| {
            ProviderError::InvalidRequest(format!(
                "chrome policy import id {:?} must look like <org_unit_id>/<schema>[,<schema>...]",
                id
            ))
        })?;
        let policies = schemas
            .split(',')
            .map(str::trim)
            .filter(|schema| !schema.is_empty())
            .map(|schema| PolicyState {
                schema_name: schema.to_string(),
                schema_values: None,
            })
            .collect();
        let state = ChromePolicyState {
            id: None,
            org_unit_id: Some(org_unit.to_string()),
            policies: Some(policies),
        };
        read_state(ctx, &state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::context;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn resolved(org_unit: &str, value: Value) -> Value {
        json!({
            "resolvedPolicies": [{
                "targetKey": {"targetResource": "orgunits/03ph8a2z1"},
                "sourceKey": {"targetResource": format!("orgunits/{}", org_unit)},
                "value": {"policySchema": "chrome.users.MaxConnectionsPerProxy", "value": value}
            }]
        })
    }

    fn planned() -> Value {
        json!({
            "org_unit_id": "id:03ph8a2z1",
            "policies": [{
                "schema_name": "chrome.users.MaxConnectionsPerProxy",
                "schema_values": {"maxConnectionsPerProxy": "34"}
            }]
        })
    }

    #[tokio::test]
    async fn test_create_batch_modifies_then_resolves() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({}));
        mock.push_json(
            200,
            resolved("03ph8a2z1", json!({"maxConnectionsPerProxy": 34, "other": true})),
        );
        let ctx = context(&mock);

        let state = ChromePolicyResource.create(&ctx, planned()).await.unwrap();
        assert_eq!(state["id"], "03ph8a2z1");
        assert_eq!(state["org_unit_id"], "id:03ph8a2z1");
        assert_eq!(
            state["policies"][0]["schema_values"],
            json!({"maxConnectionsPerProxy": "34"})
        );

        let requests = mock.requests();
        assert_eq!(requests[0].service, Service::ChromePolicy);
        assert_eq!(requests[0].path, "customers/C0123abc/policies/orgunits:batchModify");
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["requests"][0]["updateMask"], "maxConnectionsPerProxy");
        assert_eq!(body["requests"][0]["policyValue"]["value"]["maxConnectionsPerProxy"], 34);
        assert_eq!(
            body["requests"][0]["policyTargetKey"]["targetResource"],
            "orgunits/03ph8a2z1"
        );
        assert_eq!(requests[1].path, "customers/C0123abc/policies:resolve");
    }

    #[tokio::test]
    async fn test_read_inherited_policy_is_gone() {
        let mock = MockTransport::new();
        mock.push_json(200, resolved("03ph8a2z0", json!({"maxConnectionsPerProxy": 32})));
        let ctx = context(&mock);

        let state = ChromePolicyResource.read(&ctx, planned()).await.unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_update_inherits_removed_schemas() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({}));
        mock.push_json(200, json!({}));
        mock.push_json(200, resolved("03ph8a2z1", json!({"maxConnectionsPerProxy": 34})));
        let ctx = context(&mock);

        let prior = json!({
            "id": "03ph8a2z1",
            "org_unit_id": "id:03ph8a2z1",
            "policies": [
                {
                    "schema_name": "chrome.users.MaxConnectionsPerProxy",
                    "schema_values": {"maxConnectionsPerProxy": "32"}
                },
                {
                    "schema_name": "chrome.users.SafeBrowsingProtectionLevel",
                    "schema_values": {"safeBrowsingProtectionLevel": "\"ENHANCED_PROTECTION\""}
                }
            ]
        });
        ChromePolicyResource.update(&ctx, prior, planned()).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].path, "customers/C0123abc/policies/orgunits:batchInherit");
        assert_eq!(
            requests[0].body.as_ref().unwrap()["requests"][0]["policySchema"],
            "chrome.users.SafeBrowsingProtectionLevel"
        );
        assert_eq!(requests[1].path, "customers/C0123abc/policies/orgunits:batchModify");
    }

    #[tokio::test]
    async fn test_import_resolves_listed_schemas() {
        let mock = MockTransport::new();
        mock.push_json(200, resolved("03ph8a2z1", json!({"maxConnectionsPerProxy": 34})));
        let ctx = context(&mock);

        let state = ChromePolicyResource
            .import(&ctx, "03ph8a2z1/chrome.users.MaxConnectionsPerProxy")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["org_unit_id"], "03ph8a2z1");
        assert_eq!(
            state["policies"][0]["schema_values"],
            json!({"maxConnectionsPerProxy": "34"})
        );
        assert_eq!(
            mock.requests()[0].body.as_ref().unwrap()["policySchemaFilter"],
            "chrome.users.MaxConnectionsPerProxy"
        );

        let err = ChromePolicyResource.import(&ctx, "03ph8a2z1").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn test_validate_rejects_non_json_values() {
        let diagnostics = ChromePolicyResource.validate(&json!({
            "org_unit_id": "03ph8a2z1",
            "policies": [{"schema_name": "chrome.users.Foo", "schema_values": {"bar": "not json"}}]
        }));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("policies.0.schema_values"));
    }
}
