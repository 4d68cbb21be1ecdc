//! Weft worker
//!
//! Consumes step-change events from NATS and feeds them to the step-change
//! handler. This is how messaging-endpoint actions (and anything else that
//! publishes rather than calls back over HTTP) complete their steps.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;

use weft_common::{init_tracing, StorageBackend, WeftConfig};
use weft_domain::StepChangeEvent;
use weft_engine::{HandlerRegistry, InvokerRegistry, StepChangeHandler};
use weft_storage::{MemoryStorage, PgStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::var_os("WEFT_CONFIG").map(PathBuf::from);
    let config = WeftConfig::load(config_path.as_deref())?;

    let storage: Arc<dyn Storage> = match config.storage.backend {
        StorageBackend::InMemory => {
            // Workable for local experiments only: the worker would not see
            // the API process's instances.
            tracing::warn!("in-memory storage in the worker is process-local");
            Arc::new(MemoryStorage::new())
        }
        StorageBackend::Postgres => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .context("storage.database_url is required for the postgres backend")?;
            Arc::new(PgStorage::connect(url).await?)
        }
    };

    let nats_url = config
        .events
        .nats_url
        .as_deref()
        .context("events.nats_url is required for the worker")?;
    let client = async_nats::connect(nats_url)
        .await
        .context("failed to connect to NATS")?;
    let mut subscriber = client
        .subscribe(config.events.subject.clone())
        .await
        .context("failed to subscribe")?;

    let invokers = Arc::new(InvokerRegistry::with_defaults(Arc::new(
        HandlerRegistry::new(),
    )));
    let handler = StepChangeHandler::new(storage, invokers);

    tracing::info!(subject = %config.events.subject, "worker listening for step changes");

    loop {
        tokio::select! {
            message = subscriber.next() => {
                let Some(message) = message else {
                    tracing::warn!("subscription closed, shutting down");
                    break;
                };
                let event: StepChangeEvent = match serde_json::from_slice(&message.payload) {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "discarding undecodable step-change message");
                        continue;
                    }
                };
                if let Err(err) = handler.handle(&event).await {
                    tracing::error!(
                        instance = %event.instance_id,
                        step = %event.step_id,
                        error = %err,
                        "failed to apply step change"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down worker");
                break;
            }
        }
    }

    Ok(())
}
