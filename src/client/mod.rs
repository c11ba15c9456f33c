//! Google Workspace API client.
//!
//! [`WorkspaceClient`] is a thin typed layer over a [`Transport`]. The
//! production transport is [`HttpTransport`]; tests script responses with
//! [`crate::testing::MockTransport`].

mod auth;
mod error;
mod http;
pub mod models;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub use auth::{ServiceAccountTokenSource, StaticTokenSource, TokenSource};
pub use error::ApiError;
pub use http::{Endpoints, HttpTransport};

use crate::consistency::Probe;
use crate::error::ProviderError;

/// The Google API a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Admin SDK Directory API.
    Directory,
    /// Groups Settings API.
    GroupsSettings,
    /// Gmail API.
    Gmail,
    /// Chrome Policy API.
    ChromePolicy,
}

/// HTTP method of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

/// A single API call, relative to the service's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Target API.
    pub service: Service,
    /// HTTP method.
    pub method: Method,
    /// Path below the service base URL, already escaped.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON request body.
    pub body: Option<Value>,
    /// Value for the `If-None-Match` header.
    pub if_none_match: Option<String>,
    /// User to act as, for APIs that operate on a mailbox rather than the domain.
    pub subject: Option<String>,
}

impl ApiRequest {
    /// Create a request with no query, body or conditional header.
    pub fn new(service: Service, method: Method, path: impl Into<String>) -> Self {
        Self {
            service,
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            if_none_match: None,
            subject: None,
        }
    }

    /// Append a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Make the request conditional on the object's tag having changed.
    pub fn with_if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match = Some(etag.into());
        self
    }

    /// Authenticate as `subject` instead of the configured administrator.
    pub fn acting_as(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// A response with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: serde_json::to_vec(body).unwrap_or_default(),
        }
    }

    /// A response with no body.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes [`ApiRequest`]s.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send the request and return the raw response, whatever its status.
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

#[derive(Deserialize)]
struct Tagged {
    #[serde(default)]
    etag: Option<String>,
}

/// Typed access to the Workspace APIs for one customer.
#[derive(Clone)]
pub struct WorkspaceClient {
    transport: Arc<dyn Transport>,
    customer_id: String,
    retry_budget: Duration,
}

impl std::fmt::Debug for WorkspaceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceClient")
            .field("customer_id", &self.customer_id)
            .field("retry_budget", &self.retry_budget)
            .finish()
    }
}

impl WorkspaceClient {
    /// Create a client over `transport` for `customer_id`.
    pub fn new(transport: Arc<dyn Transport>, customer_id: impl Into<String>) -> Self {
        Self {
            transport,
            customer_id: customer_id.into(),
            retry_budget: Duration::from_secs(60),
        }
    }

    /// Limit how long retryable failures (429, 5xx, dropped connections) are
    /// retried before being returned. Zero disables retries.
    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = budget;
        self
    }

    /// The customer every Directory call is scoped to.
    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    /// Send a request, retrying transient failures, and return the successful
    /// response. Non-2xx statuses are turned into [`ApiError`]s.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        debug!(
            service = ?request.service,
            method = ?request.method,
            path = %request.path,
            "API request"
        );

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(16))
            .with_max_elapsed_time(Some(self.retry_budget))
            .build();

        backoff::future::retry(policy, || async {
            let response = self
                .transport
                .execute(request.clone())
                .await
                .map_err(retry_classify)?;
            if response.is_success() {
                Ok(response)
            } else {
                Err(retry_classify(ApiError::from_response(
                    response.status,
                    &response.body,
                )))
            }
        })
        .await
    }

    /// Send a request and decode the JSON response.
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        decode(&response.body)
    }

    /// `GET path`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
    ) -> Result<T, ApiError> {
        self.execute(ApiRequest::new(service, Method::Get, path))
            .await
    }

    /// `GET path` with `If-None-Match: etag`. A 304 is returned as
    /// [`ApiError::NotModified`].
    pub async fn get_if_none_match<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        etag: &str,
    ) -> Result<T, ApiError> {
        let mut request = ApiRequest::new(service, Method::Get, path);
        if !etag.is_empty() {
            request = request.with_if_none_match(etag);
        }
        self.execute(request).await
    }

    /// Fetch every page of a list call and collect the array found under
    /// `items_field` in each page.
    pub async fn list<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        query: &[(&str, &str)],
        items_field: &str,
    ) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = ApiRequest::new(service, Method::Get, path);
            for (key, value) in query {
                request = request.with_query(*key, *value);
            }
            if let Some(token) = &page_token {
                request = request.with_query("pageToken", token.as_str());
            }

            let mut page: Value = self.execute(request).await?;
            if let Some(Value::Array(values)) = page.get_mut(items_field).map(Value::take) {
                for value in values {
                    items.push(serde_json::from_value(value)?);
                }
            }

            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                return Ok(items);
            }
        }
    }

    /// `POST path` with a JSON body.
    pub async fn insert<B: Serialize, T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        self.execute(ApiRequest::new(service, Method::Post, path).with_body(body))
            .await
    }

    /// `POST path` for RPC-style methods such as `makeAdmin` or `batchModify`.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.insert(service, path, body).await
    }

    /// `PUT path` with a JSON body (full replacement).
    pub async fn update<B: Serialize, T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        self.execute(ApiRequest::new(service, Method::Put, path).with_body(body))
            .await
    }

    /// `PATCH path` with a JSON body.
    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        self.execute(ApiRequest::new(service, Method::Patch, path).with_body(body))
            .await
    }

    /// `DELETE path`.
    pub async fn delete(&self, service: Service, path: &str) -> Result<(), ApiError> {
        self.send(ApiRequest::new(service, Method::Delete, path))
            .await
            .map(|_| ())
    }

    /// One consistency probe: a conditional `GET` of `path` that reports
    /// whether the object's tag moved away from `last_etag`.
    pub async fn probe_etag(
        &self,
        service: Service,
        path: &str,
        last_etag: &str,
    ) -> Result<Probe, ProviderError> {
        let result = self
            .get_if_none_match::<Tagged>(service, path, last_etag)
            .await
            .map(|tagged| tagged.etag.unwrap_or_default());
        Probe::from_fetch(result)
    }
}

fn retry_classify(err: ApiError) -> backoff::Error<ApiError> {
    if err.is_retryable() {
        warn!(error = %err, "Retrying API request");
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(serde_json::from_value(Value::Null)?)
    } else {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Characters escaped in a path segment. `@` and `:` are left as is, so
/// email keys and `id:` org unit keys stay readable.
const PATH_SEGMENT: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'@')
    .remove(b':');

/// Percent-encode a single path segment.
pub fn escape(segment: &str) -> String {
    utf8_percent_encode(segment, &PATH_SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn client(mock: &MockTransport) -> WorkspaceClient {
        WorkspaceClient::new(Arc::new(mock.clone()), "C0123abc")
            .with_retry_budget(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_get_decodes_body() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({"id": "42", "etag": "\"abc\""}));

        let value: Value = client(&mock).get(Service::Directory, "users/42").await.unwrap();
        assert_eq!(value["id"], "42");

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].path, "users/42");
    }

    #[tokio::test]
    async fn test_error_status_is_parsed() {
        let mock = MockTransport::new();
        mock.push_json(
            409,
            json!({
                "error": {
                    "code": 409,
                    "message": "Entity already exists.",
                    "errors": [{"reason": "duplicate"}]
                }
            }),
        );

        let err = client(&mock)
            .insert::<_, Value>(Service::Directory, "groups", &json!({"email": "a@example.com"}))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert!(matches!(err, ApiError::Status { reason: Some(ref r), .. } if r == "duplicate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let mock = MockTransport::new();
        mock.push_json(503, json!({"error": {"code": 503, "message": "Backend Error"}}));
        mock.push_json(200, json!({"id": "ok"}));

        let client = WorkspaceClient::new(Arc::new(mock.clone()), "C0123abc");
        let value: Value = client.get(Service::Directory, "groups/ok").await.unwrap();
        assert_eq!(value["id"], "ok");
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_list_follows_page_tokens() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({"roles": [{"roleName": "a"}], "nextPageToken": "p2"}));
        mock.push_json(200, json!({"roles": [{"roleName": "b"}]}));

        let roles: Vec<Value> = client(&mock)
            .list(Service::Directory, "customer/C0123abc/roles", &[], "roles")
            .await
            .unwrap();
        assert_eq!(roles.len(), 2);

        let requests = mock.requests();
        assert!(requests[0].query.is_empty());
        assert_eq!(
            requests[1].query,
            vec![("pageToken".to_string(), "p2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_delete_accepts_empty_body() {
        let mock = MockTransport::new();
        mock.push(ApiResponse::empty(204));
        client(&mock)
            .delete(Service::Directory, "users/42")
            .await
            .unwrap();
        assert_eq!(mock.requests()[0].method, Method::Delete);
    }

    #[tokio::test]
    async fn test_conditional_etag_fetch() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({"etag": "\"v1\""}));
        mock.push(ApiResponse::empty(304));
        mock.push_json(404, json!({"error": {"code": 404, "message": "Resource Not Found"}}));
        mock.push_json(403, json!({"error": {"code": 403, "message": "Not Authorized"}}));

        let client = client(&mock);
        assert_eq!(
            client.probe_etag(Service::Directory, "users/1", "").await.unwrap(),
            Probe::Changed("\"v1\"".into())
        );
        assert_eq!(
            client.probe_etag(Service::Directory, "users/1", "\"v1\"").await.unwrap(),
            Probe::Unchanged
        );
        assert_eq!(
            client.probe_etag(Service::Directory, "users/1", "\"v1\"").await.unwrap(),
            Probe::NotFound
        );
        assert!(client
            .probe_etag(Service::Directory, "users/1", "\"v1\"")
            .await
            .is_err());

        let requests = mock.requests();
        assert_eq!(requests[0].if_none_match, None);
        assert_eq!(requests[1].if_none_match.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("user@example.com"), "user@example.com");
        assert_eq!(escape("id:03ph8a2z1"), "id:03ph8a2z1");
        assert_eq!(escape("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_escape_non_ascii_segment() {
        assert_eq!(escape("Équipe Zürich"), "%C3%89quipe%20Z%C3%BCrich");
        assert_eq!(escape("ventes/été"), "ventes%2F%C3%A9t%C3%A9");
    }
}
