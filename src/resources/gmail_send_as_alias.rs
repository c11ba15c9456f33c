use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{found, from_state, ignore_not_found, to_state, Resource, ResourceContext};
use crate::client::models::SendAs;
use crate::client::{escape, ApiRequest, Method, Service};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// `googleworkspace_gmail_send_as_alias`
///
/// Calls are made as the mailbox owner, not the configured administrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct GmailSendAsAliasResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct SendAsState {
    id: Option<String>,
    primary_email: Option<String>,
    send_as_email: Option<String>,
    display_name: Option<String>,
    reply_to_address: Option<String>,
    signature: Option<String>,
    is_primary: Option<bool>,
    is_default: Option<bool>,
    treat_as_alias: Option<bool>,
    verification_status: Option<String>,
}

impl SendAsState {
    fn to_api(&self) -> SendAs {
        SendAs {
            send_as_email: self.send_as_email.clone(),
            display_name: self.display_name.clone(),
            reply_to_address: self.reply_to_address.clone(),
            signature: self.signature.clone(),
            is_default: self.is_default,
            treat_as_alias: self.treat_as_alias,
            ..SendAs::default()
        }
    }

    fn from_api(primary_email: &str, send_as: SendAs) -> Self {
        let send_as_email = send_as.send_as_email.unwrap_or_default();
        Self {
            id: Some(format!("{}:{}", primary_email, send_as_email)),
            primary_email: Some(primary_email.to_string()),
            send_as_email: Some(send_as_email),
            display_name: send_as.display_name,
            reply_to_address: send_as.reply_to_address,
            signature: send_as.signature,
            is_primary: send_as.is_primary,
            is_default: send_as.is_default,
            treat_as_alias: send_as.treat_as_alias,
            verification_status: send_as.verification_status,
        }
    }

    /// `(mailbox, alias)` addressed by this state.
    fn keys(&self) -> Result<(String, String), ProviderError> {
        match (&self.primary_email, &self.send_as_email) {
            (Some(primary), Some(send_as)) => Ok((primary.clone(), send_as.clone())),
            _ => match &self.id {
                Some(id) => parse_id(id),
                None => Err(ProviderError::InvalidRequest(
                    "send-as alias state needs primary_email and send_as_email".into(),
                )),
            },
        }
    }
}

/// Split `primary@example.com:alias@example.com`.
fn parse_id(id: &str) -> Result<(String, String), ProviderError> {
    match id.split_once(':') {
        Some((primary, send_as)) if !primary.is_empty() && !send_as.is_empty() => {
            Ok((primary.to_string(), send_as.to_string()))
        }
        _ => Err(ProviderError::InvalidRequest(format!(
            "send-as alias id {:?} is not of the form <primary_email>:<send_as_email>",
            id
        ))),
    }
}

fn collection_path(primary: &str) -> String {
    format!("users/{}/settings/sendAs", escape(primary))
}

fn alias_path(primary: &str, send_as: &str) -> String {
    format!("{}/{}", collection_path(primary), escape(send_as))
}

fn request(method: Method, path: String, primary: &str) -> ApiRequest {
    ApiRequest::new(Service::Gmail, method, path).acting_as(primary)
}

async fn fetch(
    ctx: &ResourceContext,
    primary: &str,
    send_as: &str,
) -> Result<Option<Value>, ProviderError> {
    let result = ctx
        .client
        .execute::<SendAs>(request(Method::Get, alias_path(primary, send_as), primary))
        .await;
    found(result)?
        .map(|send_as| to_state(&SendAsState::from_api(primary, send_as)))
        .transpose()
}

#[async_trait]
impl Resource for GmailSendAsAliasResource {
    fn type_name(&self) -> &'static str {
        "googleworkspace_gmail_send_as_alias"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manages a Gmail send-as alias of a user's mailbox.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "primary_email",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Mailbox the alias belongs to."),
            )
            .with_attribute(
                "send_as_email",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Address that appears in the From header."),
            )
            .with_attribute("display_name", Attribute::optional_string())
            .with_attribute("reply_to_address", Attribute::optional_string())
            .with_attribute("signature", Attribute::optional_string())
            .with_attribute("is_primary", Attribute::computed_bool())
            .with_attribute("is_default", Attribute::optional_computed_bool())
            .with_attribute(
                "treat_as_alias",
                Attribute::optional_bool().with_default(Value::Bool(true)),
            )
            .with_attribute("verification_status", Attribute::computed_string())
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: SendAsState = from_state(planned)?;
        let (primary, send_as) = planned.keys()?;
        let body = serde_json::to_value(planned.to_api())?;

        let created: SendAs = ctx
            .client
            .execute(request(Method::Post, collection_path(&primary), &primary).with_body(body))
            .await?;
        info!(primary_email = %primary, send_as_email = %send_as, "Created send-as alias");
        to_state(&SendAsState::from_api(&primary, created))
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        current: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let current: SendAsState = from_state(current)?;
        let (primary, send_as) = current.keys()?;
        fetch(ctx, &primary, &send_as).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: SendAsState = from_state(prior)?;
        let planned: SendAsState = from_state(planned)?;
        let (primary, send_as) = prior.keys()?;
        let body = serde_json::to_value(planned.to_api())?;

        let updated: SendAs = ctx
            .client
            .execute(request(Method::Put, alias_path(&primary, &send_as), &primary).with_body(body))
            .await?;
        to_state(&SendAsState::from_api(&primary, updated))
    }

    async fn delete(&self, ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
        let current: SendAsState = from_state(current)?;
        let (primary, send_as) = current.keys()?;
        let result = ctx
            .client
            .send(request(Method::Delete, alias_path(&primary, &send_as), &primary))
            .await
            .map(|_| ());
        ignore_not_found(result)
    }

    async fn import(
        &self,
        ctx: &ResourceContext,
        id: &str,
    ) -> Result<Option<Value>, ProviderError> {
        let (primary, send_as) = parse_id(id)?;
        fetch(ctx, &primary, &send_as).await
    }
}
