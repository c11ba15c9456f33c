//! Test harnesses.
//!
//! [`ProviderTester`] drives a [`ProviderService`] the way the host would,
//! without a gRPC server. [`MockTransport`] replays scripted API responses so
//! resources can be exercised end to end without the network.
//!
//! # Example
//!
//! ```ignore
//! use googleworkspace_provider::testing::{MockTransport, ProviderTester};
//! use googleworkspace_provider::WorkspaceProvider;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn reads_a_domain() {
//!     let mock = MockTransport::new();
//!     mock.push_json(200, json!({"domainName": "example.com", "verified": true}));
//!
//!     let tester = ProviderTester::new(
//!         WorkspaceProvider::new().with_transport(std::sync::Arc::new(mock.clone())),
//!     );
//!     tester
//!         .configure(json!({"access_token": "ya29.token", "customer_id": "C0123abc"}))
//!         .await
//!         .unwrap();
//!
//!     let state = tester
//!         .read("googleworkspace_domain", json!({"domain_name": "example.com"}))
//!         .await
//!         .unwrap();
//!     assert_eq!(state["verified"], true);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{ApiError, ApiRequest, ApiResponse, Transport};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Wraps a [`ProviderService`] with host-like call sequences.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a tester for `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Registered resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Registered data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate the provider block; error diagnostics become `Err`.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider; error diagnostics become `Err`.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource block; error diagnostics become `Err`.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a create.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan an update of `prior_state`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a delete of `prior_state`.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read a resource; null when it is gone.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update a resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import a resource by id.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Upgrade stored state.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    /// Validate a data source block; error diagnostics become `Err`.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Plan, create, then read back. Returns the refreshed state.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created).await
    }

    /// Plan, update, then read back. Returns the refreshed state.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read(resource_type, updated).await
    }

    /// Plan a delete, then delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone()).await?;
        self.delete(resource_type, current_state).await
    }
}

/// Failure of a tester call that returns diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// Error diagnostics were returned.
    Diagnostics(Vec<Diagnostic>),
    /// The call itself failed.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Panics unless `plan` requires replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Panics unless `plan` changes `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}'. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Panics unless some error diagnostic's summary contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.summary.contains(substring)),
        "Expected an error containing '{}'. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[derive(Default)]
struct MockState {
    responses: VecDeque<ApiResponse>,
    requests: Vec<ApiRequest>,
}

/// A [`Transport`] that answers from a queue of scripted responses and
/// records every request. Clones share the queue.
///
/// Responses are consumed in order regardless of the request. Running out
/// of responses yields a non-retryable [`ApiError::Decode`].
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response.
    pub fn push(&self, response: ApiResponse) {
        self.lock().responses.push_back(response);
    }

    /// Queue a JSON response.
    pub fn push_json(&self, status: u16, body: Value) {
        self.push(ApiResponse::json(status, &body));
    }

    /// Queue a response with no body, such as 204 or 304.
    pub fn push_empty(&self, status: u16) {
        self.push(ApiResponse::empty(status));
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.lock().requests.clone()
    }

    /// Responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockTransport")
            .field("pending", &state.responses.len())
            .field("received", &state.requests.len())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut state = self.lock();
        let description = format!("{:?} {}", request.method, request.path);
        state.requests.push(request);
        state
            .responses
            .pop_front()
            .ok_or_else(|| ApiError::Decode(format!("no scripted response for {}", description)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Method, Service, WorkspaceClient};
    use crate::provider::WorkspaceProvider;
    use serde_json::json;
    use std::time::Duration;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn tester(mock: &MockTransport) -> ProviderTester<WorkspaceProvider> {
        ProviderTester::new(
            WorkspaceProvider::new()
                .with_env_lookup(no_env)
                .with_transport(Arc::new(mock.clone()))
                .with_retry_budget(Duration::ZERO)
                .with_poll_options(
                    crate::consistency::PollOptions::default()
                        .with_initial_interval(Duration::from_millis(10))
                        .with_max_interval(Duration::from_millis(10)),
                ),
        )
    }

    fn provider_config() -> Value {
        json!({"access_token": "ya29.token", "customer_id": "C0123abc"})
    }

    #[tokio::test]
    async fn test_mock_transport_replays_in_order() {
        let mock = MockTransport::new();
        mock.push_json(200, json!({"etag": "\"a\""}));
        mock.push_empty(204);

        let first = mock
            .execute(ApiRequest::new(Service::Directory, Method::Get, "users/1"))
            .await
            .unwrap();
        assert_eq!(first.status, 200);
        let second = mock
            .execute(ApiRequest::new(Service::Directory, Method::Delete, "users/1"))
            .await
            .unwrap();
        assert_eq!(second.status, 204);

        let err = mock
            .execute(ApiRequest::new(Service::Directory, Method::Get, "users/2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
        assert!(!err.is_retryable());

        let paths: Vec<String> = mock.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["users/1", "users/1", "users/2"]);
    }

    #[tokio::test]
    async fn test_mock_transport_clones_share_script() {
        let mock = MockTransport::new();
        let client = WorkspaceClient::new(Arc::new(mock.clone()), "C0123abc");
        mock.push_json(200, json!({"domainName": "example.com"}));

        let domain: Value = client
            .get(Service::Directory, "customer/C0123abc/domains/example.com")
            .await
            .unwrap();
        assert_eq!(domain["domainName"], "example.com");
        assert_eq!(mock.remaining(), 0);
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_tester_configure_rejects_conflicting_auth() {
        let tester = tester(&MockTransport::new());
        let err = tester
            .configure(json!({
                "access_token": "ya29.token",
                "credentials": "{}",
                "customer_id": "C0123abc"
            }))
            .await
            .unwrap_err();
        match err {
            TestError::Diagnostics(diagnostics) => {
                assert_error_contains(&diagnostics, "Conflicting authentication")
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_tester_lists_types() {
        let tester = tester(&MockTransport::new());
        assert!(tester
            .resource_types()
            .contains(&"googleworkspace_group_member".to_string()));
        assert!(tester
            .data_source_types()
            .contains(&"googleworkspace_domain".to_string()));
        assert!(tester.schema().provider.block.attributes.contains_key("access_token"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_domain_alias_lifecycle() {
        let api = json!({
            "domainAliasName": "example.net",
            "parentDomainName": "example.com",
            "verified": false,
            "etag": "\"da1\""
        });
        let mock = MockTransport::new();
        // create: insert, consistency probes, read back
        mock.push_json(200, api.clone());
        mock.push_json(200, json!({"etag": "\"da1\""}));
        mock.push_empty(304);
        mock.push_empty(304);
        mock.push_json(200, api.clone());
        // refresh
        mock.push_json(200, api);
        // delete
        mock.push_empty(204);

        let tester = tester(&mock);
        tester.configure(provider_config()).await.unwrap();

        let config =
            json!({"domain_alias_name": "example.net", "parent_domain_name": "example.com"});
        tester
            .validate_resource_config("googleworkspace_domain_alias", config.clone())
            .await
            .unwrap();
        let state = tester
            .lifecycle_create("googleworkspace_domain_alias", config)
            .await
            .unwrap();
        assert_eq!(state["id"], "example.net");
        assert_eq!(state["verified"], false);

        let plan = tester
            .plan_update(
                "googleworkspace_domain_alias",
                state.clone(),
                json!({"domain_alias_name": "example.net", "parent_domain_name": "example.org"}),
            )
            .await
            .unwrap();
        assert_plan_replaces(&plan);
        assert_plan_changes_attribute(&plan, "parent_domain_name");

        tester
            .lifecycle_delete("googleworkspace_domain_alias", state)
            .await
            .unwrap();
        assert_eq!(mock.remaining(), 0);
        let last = mock.requests().pop().unwrap();
        assert_eq!(last.method, Method::Delete);
        assert_eq!(last.path, "customer/C0123abc/domainaliases/example.net");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![Diagnostic::error("Missing customer_id")
            .with_detail("Set customer_id")
            .with_attribute("customer_id")]);
        let text = err.to_string();
        assert!(text.contains("1 diagnostic(s)"));
        assert!(text.contains("Missing customer_id: Set customer_id (at customer_id)"));
    }
}
