//! Submission worker process.
//!
//! Connects to the shared database, spawns the supervisor with its pool of
//! workers, and runs until interrupted.

mod context;
mod http_client;
mod notifier;

use std::sync::Arc;

use actors::{Collaborators, EngineConfig, SupervisorArgs, SupervisorMessage, start_supervisor};
use db::repositories::ApplicationRepository;
use db::{DbConfig, SurrealStore};
use storage::{DocumentStore, Storage};
use tracing_subscriber::EnvFilter;

use crate::context::DocumentContextSource;
use crate::http_client::{HttpClientConfig, HttpSubmissionClient};
use crate::notifier::TracingNotifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = EngineConfig::from_env()?;
    tracing::info!(
        workers = config.worker.worker_count,
        max_retries = config.worker.max_retries,
        lock_ttl_secs = config.queue.lock_ttl.as_secs(),
        "Starting submission engine"
    );

    db::init(DbConfig::from_env()?).await?;
    let store = Arc::new(SurrealStore::connected()?);
    let documents = DocumentStore::new(Storage::from_env().await?);
    let client = HttpSubmissionClient::new(HttpClientConfig::from_env()?)?;

    let collaborators = Collaborators {
        applications: Arc::new(ApplicationRepository),
        context: Arc::new(DocumentContextSource::new(documents)),
        client: Arc::new(client),
        notifier: Arc::new(TracingNotifier),
    };

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        config,
        store,
        collaborators,
        autostart: true,
    })
    .await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    supervisor.send_message(SupervisorMessage::Shutdown)?;
    handle.await?;

    tracing::info!("Submission engine stopped");
    Ok(())
}
