//! `reqwest` implementation of [`Transport`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, IF_NONE_MATCH};
use tracing::trace;

use super::{ApiError, ApiRequest, ApiResponse, Method, Service, TokenSource, Transport};

/// Base URLs of the APIs the provider talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Admin SDK Directory API.
    pub directory: String,
    /// Groups Settings API.
    pub groups_settings: String,
    /// Gmail API.
    pub gmail: String,
    /// Chrome Policy API.
    pub chrome_policy: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            directory: "https://admin.googleapis.com/admin/directory/v1/".to_string(),
            groups_settings: "https://www.googleapis.com/groups/v1/groups/".to_string(),
            gmail: "https://gmail.googleapis.com/gmail/v1/".to_string(),
            chrome_policy: "https://chromepolicy.googleapis.com/v1/".to_string(),
        }
    }
}

impl Endpoints {
    /// Base URL for `service`.
    pub fn base(&self, service: Service) -> &str {
        match service {
            Service::Directory => &self.directory,
            Service::GroupsSettings => &self.groups_settings,
            Service::Gmail => &self.gmail,
            Service::ChromePolicy => &self.chrome_policy,
        }
    }

    /// Absolute URL for `path` on `service`.
    pub fn url(&self, service: Service, path: &str) -> String {
        let base = self.base(service).trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path)
        }
    }
}

/// Sends requests over HTTPS with a bearer token.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    endpoints: Endpoints,
}

impl HttpTransport {
    /// Create a transport using `tokens` for authentication.
    pub fn new(tokens: Arc<dyn TokenSource>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("googleworkspace-provider/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            tokens,
            endpoints: Endpoints::default(),
        })
    }

    /// Override the API base URLs.
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let token = self.tokens.token(request.subject.as_deref()).await?;
        let url = self.endpoints.url(request.service, &request.path);

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .http
            .request(method, &url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .query(&[("alt", "json")]);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(etag) = &request.if_none_match {
            builder = builder.header(IF_NONE_MATCH, etag.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        trace!(%url, status, bytes = body.len(), "HTTP response");

        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StaticTokenSource;
    use httptest::{all_of, matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    fn transport(server: &Server) -> HttpTransport {
        let base = server.url_str("/v1/");
        HttpTransport::new(Arc::new(StaticTokenSource::new("ya29.test-token")))
            .unwrap()
            .with_endpoints(Endpoints {
                directory: base.clone(),
                groups_settings: base.clone(),
                gmail: base.clone(),
                chrome_policy: base,
            })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_conditional_get_passes_not_modified_through() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v1/groups/03ph8a2z"),
                request::headers(contains(("authorization", "Bearer ya29.test-token"))),
                request::headers(contains(("accept", "application/json"))),
                request::headers(contains(("if-none-match", "\"etag-1\""))),
                request::query(url_decoded(contains(("alt", "json")))),
                request::query(url_decoded(contains(("fields", "etag")))),
            ])
            .respond_with(status_code(304)),
        );

        let request = ApiRequest::new(Service::Directory, Method::Get, "groups/03ph8a2z")
            .with_query("fields", "etag")
            .with_if_none_match("\"etag-1\"");
        let response = transport(&server).execute(request).await.unwrap();
        assert_eq!(
            response,
            ApiResponse {
                status: 304,
                body: Vec::new(),
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_post_sends_json_body_and_returns_error_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v1/groups"),
                request::query(url_decoded(contains(("alt", "json")))),
                request::body(json_decoded(eq(json!({"email": "eng@example.com"})))),
            ])
            .respond_with(status_code(409).body(
                r#"{"error":{"code":409,"message":"Entity already exists."}}"#,
            )),
        );

        let request = ApiRequest::new(Service::Directory, Method::Post, "groups")
            .with_body(json!({"email": "eng@example.com"}));
        let response = transport(&server).execute(request).await.unwrap();
        assert_eq!(response.status, 409);
        assert!(matches!(
            ApiError::from_response(response.status, &response.body),
            ApiError::Status { code: 409, .. }
        ));
    }

    #[test]
    fn test_endpoint_urls() {
        let endpoints = Endpoints::default();
        assert_eq!(
            endpoints.url(Service::Directory, "users/42"),
            "https://admin.googleapis.com/admin/directory/v1/users/42"
        );
        assert_eq!(
            endpoints.url(Service::GroupsSettings, "eng@example.com"),
            "https://www.googleapis.com/groups/v1/groups/eng@example.com"
        );
        assert_eq!(
            endpoints.url(Service::Gmail, "/users/me/settings/sendAs"),
            "https://gmail.googleapis.com/gmail/v1/users/me/settings/sendAs"
        );
        assert_eq!(
            endpoints.url(Service::ChromePolicy, ""),
            "https://chromepolicy.googleapis.com/v1"
        );
    }
}
