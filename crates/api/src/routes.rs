// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Routes module
//!
//! This module provides route configuration and handlers for the ledger API
//! server. Business route modules are mounted separately through
//! [`crate::server::Server::with_routes`]; only the operational endpoints
//! live here.

pub mod handlers;

use axum::{Router, routing::get};
use handlers::health_handler;

use crate::{metrics::metrics_handler, state::ServerState};

/// Create the operational routes: health and metrics.
///
/// Neither endpoint requires authentication; both must stay cheap since
/// orchestration probes poll them frequently. The unmatched-route fallback
/// is attached during final router assembly, after business routes merge.
pub fn create_routes() -> Router<ServerState> {
    let health_routes = Router::new().route("/health", get(health_handler));

    let ops_routes = Router::new().route("/metrics", get(metrics_handler));

    Router::new().merge(health_routes).merge(ops_routes)
}
