// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP request handlers module
//!
//! Operational handlers for the ledger API server: the health reporter and
//! the unmatched-route fallback that guarantees every request receives a
//! response.

use axum::{Json, extract::State, http::Uri};

use crate::{
    error::ApiError,
    state::{HealthReport, ServerState},
};

/// Health check endpoint handler.
///
/// Responds 200 with a fresh snapshot while the server is listening; no
/// authentication, no side effects.
pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthReport> {
    Json(state.health_report())
}

/// Terminal fallback for requests no handler consumed.
///
/// Always reached, never skipped. The error normalizer stage renders the
/// envelope and echoes the request path and method.
pub async fn fallback_handler(uri: Uri) -> ApiError {
    ApiError::route_not_found(uri.path())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;

    use super::*;
    use crate::{
        config::{Environment, ServerConfig},
        lifecycle::Lifecycle,
        state::HealthStatus,
    };

    #[tokio::test]
    async fn health_handler_reports_environment_and_uptime() {
        let state = ServerState::new(ServerConfig::for_testing(), Arc::new(Lifecycle::new()));

        let Json(report) = health_handler(State(state)).await;

        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.environment, Environment::Testing);
        assert!(report.uptime_seconds >= 0.0);
    }

    #[tokio::test]
    async fn fallback_produces_not_found_for_any_path() {
        let err = fallback_handler(Uri::from_static("/api/v1/accounts")).await;

        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.message(), "Route /api/v1/accounts not found");
    }
}
