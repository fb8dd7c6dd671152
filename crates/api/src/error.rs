// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error handling module
//!
//! Two families of failures live here. [`ServerError`] covers lifecycle
//! faults: configuration, listener binding, startup, shutdown. [`ApiError`]
//! covers per-request failures and carries everything the error normalizer
//! needs to build the uniform client-facing envelope. Per-request failures
//! are contained to their request and never touch server state.

use std::net::SocketAddr;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal and process-level error types for server operations
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration validation errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Network binding errors; fatal, the server has no identity without a
    /// bound address and never retries
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Socket address that failed to bind
        address: SocketAddr,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server startup errors
    #[error("Server startup failed: {source}")]
    Startup {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server shutdown errors
    #[error("Server shutdown failed: {source}")]
    Shutdown {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Task join errors for async operations; an escalated process fault
    #[error("Task join error: {source}")]
    TaskJoin {
        /// Underlying tokio join error
        #[source]
        source: tokio::task::JoinError,
    },

    /// Signal handling errors
    #[error("Signal handling error: {message}")]
    Signal {
        /// Error message
        message: String,
    },
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Convenient From implementations for common async error types
impl From<tokio::task::JoinError> for ServerError {
    fn from(source: tokio::task::JoinError) -> Self {
        Self::TaskJoin { source }
    }
}

/// A per-request failure with the status and message the client should see.
///
/// Handlers return this type; its [`IntoResponse`] impl renders a redacted
/// envelope and stashes the full error in the response extensions so the
/// normalizer stage can re-render it with diagnostics where configured.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    /// Create an error with an explicit status and client-facing message
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    /// Attach a server-side diagnostic, exposed to clients only in verbose mode
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Unmatched-route error echoing the requested path
    pub fn route_not_found(path: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("Route {path} not found"),
        )
    }

    /// Response status
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Client-facing message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Server-side diagnostic, if one was attached
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal Server Error".to_string(),
            detail: Some(format!("{err:#}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope::redacted(&self);
        let mut response = (self.status, Json(envelope)).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Inner body of the uniform error envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// HTTP status code
    pub status: u16,
    /// Client-facing message
    pub message: String,
    /// Diagnostic detail; present only in verbose (non-production) mode,
    /// never null and never empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The uniform structure wrapping any error response.
///
/// Unmatched-route responses additionally echo the requested path and
/// method at the top level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    /// The wrapped error
    pub error: ErrorBody,
    /// Requested path, echoed on unmatched-route responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Request method, echoed on unmatched-route responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl ErrorEnvelope {
    /// Build the production-safe envelope: status and message only
    pub fn redacted(err: &ApiError) -> Self {
        Self {
            error: ErrorBody {
                status: err.status.as_u16(),
                message: err.message.clone(),
                detail: None,
            },
            path: None,
            method: None,
        }
    }

    /// Build the diagnostic envelope, falling back to the error's display
    /// form when no deeper detail was attached
    pub fn verbose(err: &ApiError) -> Self {
        Self {
            error: ErrorBody {
                status: err.status.as_u16(),
                message: err.message.clone(),
                detail: Some(err.detail.clone().unwrap_or_else(|| err.to_string())),
            },
            path: None,
            method: None,
        }
    }

    /// Echo the request path and method (unmatched-route responses)
    #[must_use]
    pub fn with_request(mut self, method: &axum::http::Method, path: &str) -> Self {
        self.path = Some(path.to_string());
        self.method = Some(method.to_string());
        self
    }
}
