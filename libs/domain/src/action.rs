//! Action specifications and transport endpoints.
//!
//! An action spec is a catalog entry describing an invokable external
//! operation: its input/output schemas and the endpoint used to reach it.
//! Specs are stored independently of workflows and referenced by id.

use serde::{Deserialize, Serialize};

use crate::schema::Schema;

/// Specification of an invokable action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Unique action id, referenced by workflow action steps
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Input field schemas
    #[serde(default)]
    pub parameters: Vec<Schema>,

    /// Output field schemas
    #[serde(default)]
    pub returns: Vec<Schema>,

    /// Whether completion arrives asynchronously via the step-change API
    #[serde(default, rename = "async")]
    pub async_completion: bool,

    /// Transport endpoint
    pub endpoint: Endpoint,
}

impl ActionSpec {
    /// Look up the schema for a named parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Schema> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Transport kind of an action endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Local,
    Rest,
    Messaging,
    Grpc,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Local => "local",
            Self::Rest => "rest",
            Self::Messaging => "messaging",
            Self::Grpc => "grpc",
        };
        f.write_str(s)
    }
}

/// Transport description for an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport selector
    #[serde(rename = "type")]
    pub kind: EndpointKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest: Option<RestEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging: Option<MessagingEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc: Option<GrpcEndpoint>,

    /// Quality-of-service options applied by the transport adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<Qos>,
}

impl Endpoint {
    /// In-process endpoint, dispatched through the local handler registry.
    #[must_use]
    pub const fn local() -> Self {
        Self {
            kind: EndpointKind::Local,
            local: Some(LocalEndpoint {}),
            rest: None,
            messaging: None,
            grpc: None,
            qos: None,
        }
    }

    /// HTTP endpoint receiving the pipeline map as a JSON POST.
    #[must_use]
    pub fn rest(url: impl Into<String>) -> Self {
        Self {
            kind: EndpointKind::Rest,
            local: None,
            rest: Some(RestEndpoint { url: url.into() }),
            messaging: None,
            grpc: None,
            qos: None,
        }
    }

    /// Messaging endpoint; the URL scheme selects the transport.
    #[must_use]
    pub fn messaging(url: impl Into<String>) -> Self {
        Self {
            kind: EndpointKind::Messaging,
            local: None,
            rest: None,
            messaging: Some(MessagingEndpoint { url: url.into() }),
            grpc: None,
            qos: None,
        }
    }
}

/// In-process endpoint marker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalEndpoint {}

/// HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestEndpoint {
    pub url: String,
}

/// Messaging endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingEndpoint {
    pub url: String,
}

/// gRPC endpoint; reserved, not yet dispatchable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrpcEndpoint {}

/// Quality-of-service options for a transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Qos {
    /// Maximum retry attempts for a failed call
    #[serde(default)]
    pub retries: u32,

    /// Per-attempt timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: u64,

    /// Consecutive failures before the circuit opens; 0 disables breaking
    #[serde(default)]
    pub breaker_threshold: u32,
}
