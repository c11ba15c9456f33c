//! Google Workspace infrastructure provider.
//!
//! Manages users, groups, group members and settings, organizational units,
//! admin roles and assignments, domains, custom user schemas, Gmail send-as
//! aliases and Chrome policies through the Admin SDK and related APIs. The
//! provider speaks the gRPC provider protocol to its host.
//!
//! # Eventual consistency
//!
//! The Directory API acknowledges writes before every replica serves them.
//! After a mutation, resources poll the object's ETag with conditional
//! fetches until the number of observed tag changes matches the number of
//! writes made and the tag has held steady, see [`consistency`].
//!
//! # Running
//!
//! ```ignore
//! use googleworkspace_provider::{init_logging, serve, WorkspaceProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     serve(WorkspaceProvider::new()).await
//! }
//! ```
//!
//! [`serve`] binds a free local port and prints the handshake line
//!
//! ```text
//! GOOGLEWORKSPACE_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! on stdout, so the host can spawn the provider and connect to it. Logs go
//! to stderr.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod consistency;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use client::{ApiError, WorkspaceClient};
pub use config::ProviderConfig;
pub use consistency::{ConsistencyPoller, ConsistencyTracker, PollOptions};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::WorkspaceProvider;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};
