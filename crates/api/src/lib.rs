// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Ledger API Server Implementation
//!
//! This crate provides the HTTP server for the ledger API service, built with
//! Axum and designed for production use with comprehensive configuration,
//! an ordered middleware pipeline, and deterministic graceful shutdown.
//!
//! # Module Structure
//!
//! - [`config`]: Server configuration and environment management with hierarchical loading
//! - [`error`]: Lifecycle error taxonomy and the uniform request error envelope
//! - [`lifecycle`]: Server phase state machine, shutdown requests, and termination dispatch
//! - [`state`]: Shared application state and the health reporter
//! - [`server`]: Server assembly, listener binding, and the drain-or-timeout shutdown race
//! - [`routes`]: Operational routes and HTTP request handlers
//! - [`middleware`]: Error normalization and cross-cutting request concerns
//! - [`metrics`]: Prometheus metrics and the metrics endpoint
//!
//! # Key Features
//!
//! - **Deterministic Shutdown**: signals, faults, and programmatic requests all
//!   funnel into one idempotent shutdown entry point; drain latency is bounded
//!   by a forced-termination timer armed with the drain wait
//! - **Uniform Error Envelope**: every failure, including unmatched routes,
//!   produces one envelope shape; diagnostic detail never leaves
//!   non-production environments
//! - **Ordered Middleware Pipeline**: protective headers, compression, CORS,
//!   payload limiting, and access logging in a fixed, contract-significant order
//! - **Health Monitoring**: cheap unauthenticated snapshot endpoint for
//!   orchestration probes

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{CorsConfig, Environment, ServerConfig};
pub use error::{ApiError, ErrorEnvelope, ServerError, ServerResult};
pub use lifecycle::{Lifecycle, LifecyclePhase, ShutdownReason, ShutdownRequest};
pub use server::{BoundServer, MAX_BODY_BYTES, Server, ShutdownConfig, ShutdownOutcome};
pub use state::{HealthReport, HealthStatus, ServerState};
