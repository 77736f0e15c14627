//! Error types for the Switchyard domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error::class`] folds all of
//! them onto the coarse [`ErrorClass`] taxonomy used for reporting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all Switchyard operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- External protocol errors ---
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // --- Delivery errors ---
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Validation ---
    #[error("Validation error: {0}")]
    Validation(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of every failure the engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Missing credential or provider.
    Configuration,
    /// Duplicate identifier, malformed schema, limits exceeded.
    Validation,
    /// Non-2xx HTTP or provider response.
    ExternalCall,
    /// A model or protocol deadline was exceeded.
    Timeout,
    /// Code-tool runtime fault.
    Execution,
    /// Handshake/reconnect failure, unknown tool.
    Protocol,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::ExternalCall => "external_call",
            Self::Timeout => "timeout",
            Self::Execution => "execution",
            Self::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Provider(e) => e.class(),
            Self::Tool(e) => e.class(),
            Self::Protocol(e) => e.class(),
            Self::Delivery(_) => ErrorClass::ExternalCall,
            Self::Config { .. } => ErrorClass::Configuration,
            Self::Validation(_) | Self::Serialization(_) => ErrorClass::Validation,
            Self::Internal(_) => ErrorClass::Execution,
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Local backend failed ({primary}) and aggregator fallback failed ({fallback})")]
    FallbackExhausted {
        primary: Box<ProviderError>,
        fallback: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotConfigured(_) => ErrorClass::Configuration,
            _ if self.is_timeout() => ErrorClass::Timeout,
            _ => ErrorClass::ExternalCall,
        }
    }

    /// True for a timeout, or for a fallback where both backends timed out.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::FallbackExhausted { primary, fallback } => primary.is_timeout() && fallback.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid HTTP template: {0}")]
    Template(String),

    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Sandbox violation: {0}")]
    SandboxViolation(String),

    #[error("Tool chain starting at {head} exceeded {max_depth} steps")]
    ChainTooDeep { head: String, max_depth: usize },

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ToolError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_)
            | Self::InvalidArguments(_)
            | Self::Template(_)
            | Self::UnsupportedMethod(_) => ErrorClass::Validation,
            Self::Http { .. } | Self::Request(_) | Self::Retrieval(_) => ErrorClass::ExternalCall,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::ExecutionFailed { .. } | Self::SandboxViolation(_) | Self::ChainTooDeep { .. } => {
                ErrorClass::Execution
            }
            Self::Protocol(e) => e.class(),
        }
    }
}

/// Failures talking to an external tool server.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Failed to launch server process: {0}")]
    Spawn(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session {0} is not connected")]
    NotConnected(String),

    #[error("Reconnect failed: {0}")]
    ReconnectFailed(String),

    #[error("Tool reported an error: {0}")]
    ToolFailed(String),

    #[error("Session {0} has shut down")]
    SessionClosed(String),
}

impl ProtocolError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } => ErrorClass::Timeout,
            _ => ErrorClass::Protocol,
        }
    }
}

/// Failures delivering a tool result to the end user.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Failed to fetch media from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("No media source in result (expected url, base64 or path)")]
    NoSource,

    #[error("Invalid media payload: {0}")]
    InvalidMedia(String),

    #[error("Messenger rejected payload: {0}")]
    Send(String),
}
