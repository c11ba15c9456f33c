use googleworkspace_provider::{init_logging, serve, WorkspaceProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Google Workspace provider");
    serve(WorkspaceProvider::new()).await
}
