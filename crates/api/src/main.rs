// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Ledger API Server
//!
//! An accounting backend API service.

use std::process::ExitCode;

use api::{Server, ServerConfig, ShutdownConfig};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ledger API server");

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let server = Server::new(config, ShutdownConfig::default());

    match server.run().await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            error!(error = %e, "server terminated abnormally");
            ExitCode::FAILURE
        }
    }
}
