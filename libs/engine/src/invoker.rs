//! Action invoker registry
//!
//! Dispatches an action spec's endpoint to the matching transport. Every
//! transport resolves to one of three outcomes: a synchronous completion
//! (with an output map), a synchronous failure (output map carrying the
//! error slot), or async-accepted, where completion arrives later through
//! the step-change API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use serde_json::{Map, Value};

use weft_domain::{ActionSpec, EndpointKind, Pipeline, ERROR_KEY};

use crate::actions::HandlerRegistry;
use crate::error::{EngineError, TransportError};

// =============================================================================
// Outcome
// =============================================================================

/// Result of dispatching an action to its transport.
#[derive(Debug)]
pub enum InvokeOutcome {
    /// Synchronous success; `data` is merged into the instance pipeline
    /// through a `Completed` step-change event
    Completed { data: Map<String, Value> },

    /// Synchronous failure reported by the action itself; `data` carries the
    /// error slot
    Failed { data: Map<String, Value> },

    /// Request accepted for asynchronous completion; no event is emitted now
    Accepted,
}

// =============================================================================
// Invoker Trait & Registry
// =============================================================================

/// A transport adapter for one endpoint kind.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    /// Invoke the action with the prepared action pipeline. The pipeline is
    /// mutable so in-process handlers can write their outputs onto it.
    async fn invoke(
        &self,
        spec: &ActionSpec,
        pipeline: &mut Pipeline,
    ) -> Result<InvokeOutcome, EngineError>;
}

/// Registry of transport adapters keyed by endpoint kind.
#[derive(Default)]
pub struct InvokerRegistry {
    invokers: HashMap<EndpointKind, Arc<dyn ActionInvoker>>,
}

impl InvokerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-process and REST transports wired up. The
    /// messaging transport is added separately once a client is connected;
    /// gRPC is reserved and stays unregistered.
    #[must_use]
    pub fn with_defaults(handlers: Arc<HandlerRegistry>) -> Self {
        let mut registry = Self::new();
        registry.register(EndpointKind::Local, Arc::new(LocalInvoker::new(handlers)));
        registry.register(EndpointKind::Rest, Arc::new(RestInvoker::new()));
        registry
    }

    pub fn register(&mut self, kind: EndpointKind, invoker: Arc<dyn ActionInvoker>) {
        self.invokers.insert(kind, invoker);
    }

    #[must_use]
    pub fn get(&self, kind: EndpointKind) -> Option<Arc<dyn ActionInvoker>> {
        self.invokers.get(&kind).cloned()
    }
}

// =============================================================================
// Local
// =============================================================================

/// Runs registered in-process handlers on the action pipeline.
pub struct LocalInvoker {
    handlers: Arc<HandlerRegistry>,
}

impl LocalInvoker {
    #[must_use]
    pub const fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl ActionInvoker for LocalInvoker {
    async fn invoke(
        &self,
        spec: &ActionSpec,
        pipeline: &mut Pipeline,
    ) -> Result<InvokeOutcome, EngineError> {
        let handler = self
            .handlers
            .get(&spec.id)
            .ok_or_else(|| EngineError::ActionHandlerNotFound(spec.id.clone()))?;

        match handler.handle(pipeline).await {
            Ok(()) => Ok(InvokeOutcome::Completed {
                data: pipeline.map(),
            }),
            Err(err) => {
                let mut data = Map::new();
                data.insert(ERROR_KEY.to_string(), Value::String(err.to_string()));
                Ok(InvokeOutcome::Failed { data })
            }
        }
    }
}

// =============================================================================
// Rest
// =============================================================================

/// POSTs the pipeline map as JSON; interprets 200/202/5xx per the
/// completion protocol. QoS retries apply exponential backoff to transport
/// failures, never to definitive responses.
pub struct RestInvoker {
    client: reqwest::Client,
}

impl RestInvoker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for RestInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionInvoker for RestInvoker {
    async fn invoke(
        &self,
        spec: &ActionSpec,
        pipeline: &mut Pipeline,
    ) -> Result<InvokeOutcome, EngineError> {
        let endpoint = spec.endpoint.rest.as_ref().ok_or_else(|| {
            TransportError::InvalidEndpoint(format!("action '{}' has no rest endpoint", spec.id))
        })?;

        let qos = spec.endpoint.qos.clone().unwrap_or_default();
        let payload = Value::Object(pipeline.map());

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_elapsed_time(None)
            .build();
        let attempts = AtomicU32::new(0);

        let response = backoff::future::retry(policy, || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let mut request = self.client.post(&endpoint.url).json(&payload);
            if qos.timeout_ms > 0 {
                request = request.timeout(Duration::from_millis(qos.timeout_ms));
            }
            match request.send().await {
                Ok(response) => Ok(response),
                Err(err) if attempt < qos.retries => {
                    Err(backoff::Error::transient(TransportError::Http(
                        err.to_string(),
                    )))
                }
                Err(err) => Err(backoff::Error::permanent(TransportError::Http(
                    err.to_string(),
                ))),
            }
        })
        .await
        .map_err(EngineError::Transport)?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let data: Map<String, Value> = response.json().await.map_err(|err| {
                    TransportError::Http(format!(
                        "failed to decode response for action '{}': {err}",
                        spec.id
                    ))
                })?;
                if data.contains_key(ERROR_KEY) {
                    Ok(InvokeOutcome::Failed { data })
                } else {
                    Ok(InvokeOutcome::Completed { data })
                }
            }
            reqwest::StatusCode::ACCEPTED => {
                tracing::info!(action = %spec.id, "action accepted for async completion");
                Ok(InvokeOutcome::Accepted)
            }
            status => {
                let message = response
                    .json::<ErrorBody>()
                    .await
                    .map(|body| body.message)
                    .unwrap_or_else(|_| format!("endpoint returned status {status}"));
                Err(TransportError::Remote(message).into())
            }
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: String,
}

// =============================================================================
// Messaging
// =============================================================================

/// Publishes the pipeline map to the NATS subject named by the endpoint
/// URL. Fire-and-forget; completion arrives later through the step-change
/// API.
pub struct MessagingInvoker {
    client: async_nats::Client,
}

impl MessagingInvoker {
    #[must_use]
    pub const fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    fn subject_of(spec: &ActionSpec) -> Result<String, TransportError> {
        let endpoint = spec.endpoint.messaging.as_ref().ok_or_else(|| {
            TransportError::InvalidEndpoint(format!(
                "action '{}' has no messaging endpoint",
                spec.id
            ))
        })?;
        let url = url::Url::parse(&endpoint.url).map_err(|err| {
            TransportError::InvalidEndpoint(format!(
                "invalid url '{}' for action '{}': {err}",
                endpoint.url, spec.id
            ))
        })?;
        if url.scheme() != "nats" {
            return Err(TransportError::Messaging(format!(
                "unsupported messaging scheme '{}'",
                url.scheme()
            )));
        }
        let path = url.path().trim_start_matches('/');
        let subject = if path.is_empty() {
            url.host_str().unwrap_or_default().to_string()
        } else {
            path.to_string()
        };
        if subject.is_empty() {
            return Err(TransportError::InvalidEndpoint(format!(
                "url '{}' names no subject",
                endpoint.url
            )));
        }
        Ok(subject)
    }
}

#[async_trait]
impl ActionInvoker for MessagingInvoker {
    async fn invoke(
        &self,
        spec: &ActionSpec,
        pipeline: &mut Pipeline,
    ) -> Result<InvokeOutcome, EngineError> {
        let subject = Self::subject_of(spec)?;
        let payload = serde_json::to_vec(&Value::Object(pipeline.map()))
            .map_err(|err| TransportError::Messaging(err.to_string()))?;
        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|err| TransportError::Messaging(err.to_string()))?;
        Ok(InvokeOutcome::Accepted)
    }
}
