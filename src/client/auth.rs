//! OAuth2 access tokens for the Workspace APIs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

use super::ApiError;

/// Supplies bearer tokens.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Return a token for `subject`, or for the configured administrator when
    /// `subject` is `None`.
    async fn token(&self, subject: Option<&str>) -> Result<String, ApiError>;
}

/// A pre-minted token, used for every request regardless of subject.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Wrap an access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self, _subject: Option<&str>) -> Result<String, ApiError> {
        Ok(self.token.clone())
    }
}

/// Service-account tokens with domain-wide delegation.
///
/// One authenticator is built per impersonated subject and cached, so the
/// Gmail API can act as individual mailbox owners while Directory calls act as
/// the administrator.
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    admin_subject: Option<String>,
    scopes: Vec<String>,
    authenticators: Mutex<HashMap<Option<String>, Arc<DefaultAuthenticator>>>,
}

impl std::fmt::Debug for ServiceAccountTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokenSource")
            .field("client_email", &self.key.client_email)
            .field("admin_subject", &self.admin_subject)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl ServiceAccountTokenSource {
    /// Build from key `credentials`, given either as the JSON key contents or
    /// as a path to the key file.
    pub async fn from_credentials(
        credentials: &str,
        admin_subject: Option<String>,
        scopes: Vec<String>,
    ) -> Result<Self, ApiError> {
        let trimmed = credentials.trim();
        let key = if trimmed.starts_with('{') {
            yup_oauth2::parse_service_account_key(trimmed.as_bytes())
        } else {
            yup_oauth2::read_service_account_key(trimmed).await
        }
        .map_err(|err| ApiError::Auth(format!("invalid service account credentials: {}", err)))?;

        Ok(Self {
            key,
            admin_subject,
            scopes,
            authenticators: Mutex::new(HashMap::new()),
        })
    }

    async fn authenticator(
        &self,
        subject: Option<String>,
    ) -> Result<Arc<DefaultAuthenticator>, ApiError> {
        let mut cache = self.authenticators.lock().await;
        if let Some(auth) = cache.get(&subject) {
            return Ok(Arc::clone(auth));
        }

        debug!(subject = ?subject, "Building service account authenticator");
        let mut builder = ServiceAccountAuthenticator::builder(self.key.clone());
        if let Some(subject) = &subject {
            builder = builder.subject(subject.clone());
        }
        let auth = Arc::new(
            builder
                .build()
                .await
                .map_err(|err| ApiError::Auth(err.to_string()))?,
        );
        cache.insert(subject, Arc::clone(&auth));
        Ok(auth)
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self, subject: Option<&str>) -> Result<String, ApiError> {
        let subject = subject
            .map(str::to_string)
            .or_else(|| self.admin_subject.clone());
        let auth = self.authenticator(subject).await?;

        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        let token = auth
            .token(&scopes)
            .await
            .map_err(|err| ApiError::Auth(err.to_string()))?;
        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Auth("token response did not contain an access token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_ignores_subject() {
        let source = StaticTokenSource::new("ya29.token");
        assert_eq!(source.token(None).await.unwrap(), "ya29.token");
        assert_eq!(
            source.token(Some("someone@example.com")).await.unwrap(),
            "ya29.token"
        );
        assert!(!format!("{:?}", source).contains("ya29"));
    }

    #[tokio::test]
    async fn test_invalid_credentials_are_rejected() {
        let err = ServiceAccountTokenSource::from_credentials("{\"type\": 1}", None, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));

        let err = ServiceAccountTokenSource::from_credentials(
            "/nonexistent/path/to/key.json",
            None,
            vec![],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
    }
}
