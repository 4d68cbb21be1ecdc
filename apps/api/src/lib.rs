//! Weft management API
//!
//! Axum-based HTTP surface for operators: workflow and action registration,
//! instance start/status, and the step-change callback used by external
//! action services.

pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use weft_common::{StorageBackend, WeftConfig};
use weft_domain::EndpointKind;
use weft_engine::{
    HandlerRegistry, InvokerRegistry, MessagingInvoker, StepChangeHandler, WorkflowManager,
};
use weft_storage::{MemoryStorage, PgStorage, Storage};

pub use error::ApiError;
pub use state::AppState;

/// Build the application state from configuration: storage backend, invoker
/// registry (messaging transport only when NATS is configured), manager, and
/// step-change handler.
pub async fn build_state(config: &WeftConfig) -> anyhow::Result<AppState> {
    let storage: Arc<dyn Storage> = match config.storage.backend {
        StorageBackend::InMemory => Arc::new(MemoryStorage::new()),
        StorageBackend::Postgres => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .context("storage.database_url is required for the postgres backend")?;
            Arc::new(PgStorage::connect(url).await?)
        }
    };

    let handlers = Arc::new(HandlerRegistry::new());
    let mut invokers = InvokerRegistry::with_defaults(Arc::clone(&handlers));
    if let Some(nats_url) = &config.events.nats_url {
        let client = async_nats::connect(nats_url)
            .await
            .context("failed to connect to NATS")?;
        invokers.register(
            EndpointKind::Messaging,
            Arc::new(MessagingInvoker::new(client)),
        );
    }
    let invokers = Arc::new(invokers);

    Ok(AppState {
        manager: Arc::new(WorkflowManager::new(Arc::clone(&storage), Arc::clone(&invokers))),
        handler: Arc::new(StepChangeHandler::new(storage, invokers)),
        handlers,
    })
}

/// Serve the management API until the process is stopped.
pub async fn serve(config: &WeftConfig) -> anyhow::Result<()> {
    let state = build_state(config).await?;

    let app = routes::api_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.service.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.service.bind_addr))?;
    tracing::info!(service = %config.service.name, addr = %config.service.bind_addr, "management API listening");

    axum::serve(listener, app).await?;
    Ok(())
}
