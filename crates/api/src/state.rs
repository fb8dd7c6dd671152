// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server state management module
//!
//! This module provides shared application state for the ledger API server:
//! configuration, the error normalizer, the lifecycle record, and the uptime
//! baseline the health reporter measures from.

use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};

use crate::{
    config::{Environment, ServerConfig},
    lifecycle::Lifecycle,
    middleware::ErrorNormalizer,
};

/// Shared application state
#[derive(Debug, Clone)]
pub struct ServerState {
    /// Server configuration
    config: ServerConfig,
    /// Error normalizer, constructed once from the environment flag
    normalizer: ErrorNormalizer,
    /// Lifecycle record; single writer, read here for reporting
    lifecycle: Arc<Lifecycle>,
    /// Uptime baseline
    started_at: Instant,
}

impl ServerState {
    /// Create new server state
    pub fn new(config: ServerConfig, lifecycle: Arc<Lifecycle>) -> Self {
        let normalizer = ErrorNormalizer::new(config.verbose_errors());
        Self {
            config,
            normalizer,
            lifecycle,
            started_at: Instant::now(),
        }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The configured error normalizer
    pub fn normalizer(&self) -> &ErrorNormalizer {
        &self.normalizer
    }

    /// The lifecycle record
    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Produce a fresh health report; no side effects, cheap enough for
    /// frequent polling by orchestration probes
    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            status: HealthStatus::Ok,
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            environment: self.config.environment,
        }
    }
}

/// Health status of the service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is up and accepting requests
    Ok,
}

/// Snapshot returned by the health endpoint; computed fresh per request,
/// never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    /// Service status
    pub status: HealthStatus,
    /// RFC 3339 timestamp of the snapshot
    pub timestamp: String,
    /// Seconds since server state was created
    pub uptime_seconds: f64,
    /// Configured environment
    pub environment: Environment,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> ServerState {
        ServerState::new(ServerConfig::for_testing(), Arc::new(Lifecycle::new()))
    }

    #[test]
    fn health_report_is_fresh_and_nonnegative() {
        let state = test_state();

        let report = state.health_report();
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.environment, Environment::Testing);
        assert!(report.uptime_seconds >= 0.0);

        let later = state.health_report();
        assert!(later.uptime_seconds >= report.uptime_seconds);
    }

    #[test]
    fn health_report_serializes_lowercase_status() {
        let report = test_state().health_report();
        let json = serde_json::to_value(&report).expect("report serializes");

        assert_eq!(json["status"], "ok");
        assert_eq!(json["environment"], "testing");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn normalizer_verbosity_follows_config() {
        let state = test_state();
        // Testing is a non-production environment
        assert!(state.normalizer().is_verbose());

        let mut config = ServerConfig::for_testing();
        config.environment = Environment::Production;
        let state = ServerState::new(config, Arc::new(Lifecycle::new()));
        assert!(!state.normalizer().is_verbose());
    }
}
