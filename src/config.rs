//! Provider configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{ServiceAccountTokenSource, StaticTokenSource, TokenSource};
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Diagnostic, Schema};

/// Consistency budget applied when no timeout is configured.
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 300;

const CREDENTIALS_ENV_VARS: &[&str] = &[
    "GOOGLEWORKSPACE_CREDENTIALS",
    "GOOGLEWORKSPACE_CLOUD_KEYFILE_JSON",
    "GOOGLE_CREDENTIALS",
];
const ACCESS_TOKEN_ENV_VAR: &str = "GOOGLEWORKSPACE_ACCESS_TOKEN";
const CUSTOMER_ID_ENV_VAR: &str = "GOOGLEWORKSPACE_CUSTOMER_ID";
const IMPERSONATED_USER_ENV_VAR: &str = "GOOGLEWORKSPACE_IMPERSONATED_USER_EMAIL";

/// OAuth scopes requested when `oauth_scopes` is not set.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/admin.directory.customer",
    "https://www.googleapis.com/auth/admin.directory.domain",
    "https://www.googleapis.com/auth/admin.directory.group",
    "https://www.googleapis.com/auth/admin.directory.orgunit",
    "https://www.googleapis.com/auth/admin.directory.rolemanagement",
    "https://www.googleapis.com/auth/admin.directory.user",
    "https://www.googleapis.com/auth/admin.directory.userschema",
    "https://www.googleapis.com/auth/apps.groups.settings",
    "https://www.googleapis.com/auth/chrome.management.policy",
    "https://www.googleapis.com/auth/gmail.settings.basic",
    "https://www.googleapis.com/auth/gmail.settings.sharing",
];

/// Settings supplied by the host's `Configure` call.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Service-account key JSON, or a path to it.
    pub credentials: Option<String>,
    /// A pre-minted OAuth2 access token.
    pub access_token: Option<String>,
    /// Customer every Directory call is scoped to.
    pub customer_id: Option<String>,
    /// Administrator impersonated through domain-wide delegation.
    pub impersonated_user_email: Option<String>,
    /// OAuth scopes; [`DEFAULT_SCOPES`] when empty.
    pub oauth_scopes: Vec<String>,
    /// Consistency budget after a create, in seconds.
    pub create_timeout_seconds: Option<i64>,
    /// Consistency budget after an update, in seconds.
    pub update_timeout_seconds: Option<i64>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("customer_id", &self.customer_id)
            .field("impersonated_user_email", &self.impersonated_user_email)
            .field("oauth_scopes", &self.oauth_scopes)
            .field("create_timeout_seconds", &self.create_timeout_seconds)
            .field("update_timeout_seconds", &self.update_timeout_seconds)
            .finish()
    }
}

/// Consistency budgets for mutating operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Budget after a create.
    pub create: Duration,
    /// Budget after an update.
    pub update: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        let default = Duration::from_secs(DEFAULT_TIMEOUT_SECONDS as u64);
        Self {
            create: default,
            update: default,
        }
    }
}

impl ProviderConfig {
    /// Deserialize the host-supplied configuration object. `null` yields an
    /// empty configuration.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Fill unset settings from the process environment.
    pub fn with_env_fallbacks(self) -> Self {
        self.with_env_fallbacks_from(|key| std::env::var(key).ok())
    }

    /// Fill unset settings from `lookup`. Empty strings count as unset.
    pub fn with_env_fallbacks_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        self.credentials = non_empty(self.credentials)
            .or_else(|| CREDENTIALS_ENV_VARS.iter().find_map(|key| lookup(*key)));
        self.access_token = non_empty(self.access_token).or_else(|| lookup(ACCESS_TOKEN_ENV_VAR));
        self.customer_id = non_empty(self.customer_id).or_else(|| lookup(CUSTOMER_ID_ENV_VAR));
        self.impersonated_user_email =
            non_empty(self.impersonated_user_email).or_else(|| lookup(IMPERSONATED_USER_ENV_VAR));
        self
    }

    /// Check for missing or conflicting settings.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        match (&self.credentials, &self.access_token) {
            (Some(_), Some(_)) => diagnostics.push(
                Diagnostic::error("Conflicting authentication settings")
                    .with_detail("Only one of credentials and access_token may be set")
                    .with_attribute("access_token"),
            ),
            (None, None) => diagnostics.push(
                Diagnostic::error("No authentication configured")
                    .with_detail(format!(
                        "Set credentials or access_token, or export one of {} or {}",
                        CREDENTIALS_ENV_VARS.join(", "),
                        ACCESS_TOKEN_ENV_VAR
                    ))
                    .with_attribute("credentials"),
            ),
            _ => {}
        }

        if self.credentials.is_some() && self.impersonated_user_email.is_none() {
            diagnostics.push(
                Diagnostic::error("Missing impersonated_user_email")
                    .with_detail(
                        "Service account credentials need an administrator to impersonate",
                    )
                    .with_attribute("impersonated_user_email"),
            );
        }

        if self.customer_id.is_none() {
            diagnostics.push(
                Diagnostic::error("Missing customer_id")
                    .with_detail(format!(
                        "Set customer_id or export {}",
                        CUSTOMER_ID_ENV_VAR
                    ))
                    .with_attribute("customer_id"),
            );
        }

        for (name, value) in [
            ("create_timeout_seconds", self.create_timeout_seconds),
            ("update_timeout_seconds", self.update_timeout_seconds),
        ] {
            if matches!(value, Some(seconds) if seconds <= 0) {
                diagnostics.push(
                    Diagnostic::error(format!("Invalid {}", name))
                        .with_detail("Timeouts must be a positive number of seconds")
                        .with_attribute(name),
                );
            }
        }

        diagnostics
    }

    /// Scopes to request.
    pub fn scopes(&self) -> Vec<String> {
        if self.oauth_scopes.is_empty() {
            DEFAULT_SCOPES.iter().map(|scope| scope.to_string()).collect()
        } else {
            self.oauth_scopes.clone()
        }
    }

    /// Consistency budgets, falling back to [`DEFAULT_TIMEOUT_SECONDS`].
    pub fn timeouts(&self) -> Timeouts {
        let seconds = |value: Option<i64>| {
            Duration::from_secs(value.filter(|s| *s > 0).unwrap_or(DEFAULT_TIMEOUT_SECONDS) as u64)
        };
        Timeouts {
            create: seconds(self.create_timeout_seconds),
            update: seconds(self.update_timeout_seconds),
        }
    }

    /// Build the token source selected by this configuration.
    pub async fn token_source(&self) -> Result<Arc<dyn TokenSource>, ProviderError> {
        if let Some(token) = &self.access_token {
            return Ok(Arc::new(StaticTokenSource::new(token.clone())));
        }
        let credentials = self.credentials.as_deref().ok_or_else(|| {
            ProviderError::Configuration("no credentials or access_token configured".into())
        })?;
        let source = ServiceAccountTokenSource::from_credentials(
            credentials,
            self.impersonated_user_email.clone(),
            self.scopes(),
        )
        .await
        .map_err(|err| ProviderError::Configuration(err.to_string()))?;
        Ok(Arc::new(source))
    }

    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_description("Google Workspace provider configuration")
            .with_attribute(
                "credentials",
                Attribute::optional_string()
                    .sensitive()
                    .with_description(
                        "Service account key JSON contents or a path to the key file.",
                    ),
            )
            .with_attribute(
                "access_token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description(
                        "A temporary OAuth2 access token. Conflicts with credentials.",
                    ),
            )
            .with_attribute(
                "customer_id",
                Attribute::optional_string().with_description(
                    "The customer id provided with the Google Workspace subscription.",
                ),
            )
            .with_attribute(
                "impersonated_user_email",
                Attribute::optional_string().with_description(
                    "Administrator to impersonate through domain-wide delegation.",
                ),
            )
            .with_attribute(
                "oauth_scopes",
                Attribute::new(
                    AttributeType::list(AttributeType::String),
                    AttributeFlags::optional(),
                )
                .with_description("OAuth scopes to request."),
            )
            .with_attribute(
                "create_timeout_seconds",
                Attribute::optional_int64()
                    .with_default(Value::from(DEFAULT_TIMEOUT_SECONDS))
                    .with_description(
                        "How long to wait for a created object to become consistent.",
                    ),
            )
            .with_attribute(
                "update_timeout_seconds",
                Attribute::optional_int64()
                    .with_default(Value::from(DEFAULT_TIMEOUT_SECONDS))
                    .with_description(
                        "How long to wait for an updated object to become consistent.",
                    ),
            )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_from_value() {
        let config = ProviderConfig::from_value(json!({
            "access_token": "ya29.x",
            "customer_id": "C0123abc",
            "create_timeout_seconds": 60
        }))
        .unwrap();
        assert_eq!(config.customer_id.as_deref(), Some("C0123abc"));
        assert_eq!(config.timeouts().create, Duration::from_secs(60));
        assert_eq!(config.timeouts().update, Duration::from_secs(300));

        assert_eq!(
            ProviderConfig::from_value(Value::Null).unwrap(),
            ProviderConfig::default()
        );
        assert!(ProviderConfig::from_value(json!({"customer_id": 5})).is_err());
    }

    #[test]
    fn test_env_fallbacks() {
        let config = ProviderConfig {
            customer_id: Some(String::new()),
            ..Default::default()
        }
        .with_env_fallbacks_from(env(&[
            ("GOOGLE_CREDENTIALS", "{\"type\": \"service_account\"}"),
            ("GOOGLEWORKSPACE_CLOUD_KEYFILE_JSON", ""),
            ("GOOGLEWORKSPACE_CUSTOMER_ID", "C0123abc"),
            ("GOOGLEWORKSPACE_IMPERSONATED_USER_EMAIL", "admin@example.com"),
        ]));

        assert_eq!(
            config.credentials.as_deref(),
            Some("{\"type\": \"service_account\"}")
        );
        assert_eq!(config.customer_id.as_deref(), Some("C0123abc"));
        assert_eq!(
            config.impersonated_user_email.as_deref(),
            Some("admin@example.com")
        );
        assert!(config.access_token.is_none());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_explicit_settings_win_over_env() {
        let config = ProviderConfig {
            customer_id: Some("C_explicit".into()),
            ..Default::default()
        }
        .with_env_fallbacks_from(env(&[("GOOGLEWORKSPACE_CUSTOMER_ID", "C_env")]));
        assert_eq!(config.customer_id.as_deref(), Some("C_explicit"));
    }

    #[test]
    fn test_validate_conflicts_and_missing() {
        let config = ProviderConfig {
            credentials: Some("{}".into()),
            access_token: Some("ya29.x".into()),
            ..Default::default()
        };
        let attributes: Vec<_> = config
            .validate()
            .into_iter()
            .filter_map(|d| d.attribute)
            .collect();
        assert_eq!(
            attributes,
            vec!["access_token", "impersonated_user_email", "customer_id"]
        );

        let diagnostics = ProviderConfig::default().validate();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("credentials"));
    }

    #[test]
    fn test_validate_timeouts() {
        let config = ProviderConfig {
            access_token: Some("ya29.x".into()),
            customer_id: Some("C0123abc".into()),
            update_timeout_seconds: Some(0),
            ..Default::default()
        };
        let diagnostics = config.validate();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute.as_deref(),
            Some("update_timeout_seconds")
        );
        assert_eq!(config.timeouts().update, Duration::from_secs(300));
    }

    #[test]
    fn test_scopes_default() {
        let config = ProviderConfig::default();
        assert_eq!(config.scopes().len(), DEFAULT_SCOPES.len());

        let config = ProviderConfig {
            oauth_scopes: vec!["https://www.googleapis.com/auth/admin.directory.user".into()],
            ..Default::default()
        };
        assert_eq!(config.scopes().len(), 1);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ProviderConfig {
            access_token: Some("ya29.secret".into()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("ya29.secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_static_token_source() {
        let config = ProviderConfig {
            access_token: Some("ya29.x".into()),
            ..Default::default()
        };
        let source = config.token_source().await.unwrap();
        assert_eq!(source.token(None).await.unwrap(), "ya29.x");
    }

    #[test]
    fn test_schema_marks_secrets_sensitive() {
        let schema = ProviderConfig::schema();
        assert!(schema.block.attributes["credentials"].flags.sensitive);
        assert!(schema.block.attributes["access_token"].flags.sensitive);
        assert!(!schema.block.attributes["customer_id"].flags.sensitive);
    }
}
