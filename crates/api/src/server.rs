// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server implementation module
//!
//! This module provides the main server struct for the ledger API server:
//! router and middleware-pipeline assembly, listener binding, and the
//! drain-or-timeout shutdown race that bounds shutdown latency.
//!
//! The shutdown sequence is strictly ordered: a shutdown request cancels the
//! serve loop's token, which stops new-connection acceptance before the drain
//! wait begins, and the forced-termination timer is armed in the same step so
//! a hanging handler can never block shutdown indefinitely.

use std::{net::SocketAddr, process::ExitCode, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
};
use hyper::Request;
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn};

use crate::{
    config::{CorsConfig, ServerConfig},
    error::{ServerError, ServerResult},
    lifecycle::{Lifecycle, ShutdownReason, os_termination_events, spawn_dispatcher},
    metrics::track_requests,
    middleware::normalize_errors,
    routes::{create_routes, handlers::fallback_handler},
    state::ServerState,
};

// Server constants
const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;

/// Maximum accepted request payload size (10 MiB); larger requests
/// short-circuit with 413 before any handler logic runs
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Configuration for server shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight requests to drain before forcing
    /// termination
    pub graceful_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

/// How a shutdown episode ended; determines the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All in-flight requests completed before the timeout
    Clean,
    /// The drain did not finish within the bound; termination was forced
    ForcedTimeout,
}

impl ShutdownOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(self) -> ExitCode {
        match self {
            ShutdownOutcome::Clean => ExitCode::SUCCESS,
            ShutdownOutcome::ForcedTimeout => ExitCode::FAILURE,
        }
    }
}

/// Main server struct
#[derive(Debug)]
pub struct Server {
    /// Server configuration
    config: ServerConfig,
    /// Application router
    router: Router,
    /// Server state
    state: ServerState,
    /// Lifecycle record, shared with the dispatcher and health reporting
    lifecycle: Arc<Lifecycle>,
    /// Shutdown behavior
    shutdown_config: ShutdownConfig,
}

impl Server {
    /// Create a server with only the operational routes
    pub fn new(config: ServerConfig, shutdown_config: ShutdownConfig) -> Self {
        Self::with_routes(config, shutdown_config, Router::new())
    }

    /// Create a server with business routes mounted ahead of the fallback.
    ///
    /// This is the registration seam for endpoint modules; the mounted
    /// routes run inside the full middleware pipeline.
    pub fn with_routes(
        config: ServerConfig,
        shutdown_config: ShutdownConfig,
        business_routes: Router<ServerState>,
    ) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());
        let state = ServerState::new(config.clone(), Arc::clone(&lifecycle));
        let router = build_router(state.clone(), business_routes);

        Self {
            config,
            router,
            state,
            lifecycle,
            shutdown_config,
        }
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get server state
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// The lifecycle record, for phase queries and programmatic shutdown
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Request a programmatic shutdown
    pub fn shutdown(&self) {
        self.lifecycle.begin_shutdown(ShutdownReason::Programmatic);
    }

    /// Bind the listener on the configured address.
    ///
    /// Binding failure is fatal and never retried; the server has no valid
    /// identity without a bound address.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address cannot be acquired, or
    /// `ServerError::Startup` if the bound address cannot be read back.
    pub async fn bind(self) -> ServerResult<BoundServer> {
        let addr = self.config.socket_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                // Startup failure is terminal; the record must not read as
                // still initializing after the process gives up
                self.lifecycle.mark_stopped();
                return Err(ServerError::Bind {
                    address: addr,
                    source,
                });
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(source) => {
                self.lifecycle.mark_stopped();
                return Err(ServerError::Startup { source });
            }
        };

        self.lifecycle.mark_listening();
        info!(
            address = %local_addr,
            environment = %self.config.environment,
            "ledger API server listening",
        );

        Ok(BoundServer {
            listener,
            local_addr,
            router: self.router,
            lifecycle: self.lifecycle,
            shutdown_config: self.shutdown_config,
        })
    }

    /// Bind and serve until shutdown, wired to OS termination signals
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured
    /// address, or a shutdown error if the serve loop fails.
    pub async fn run(self) -> ServerResult<ShutdownOutcome> {
        self.bind().await?.serve().await
    }

    /// Run server for testing; returns the bound address and the lifecycle
    /// handle used to trigger shutdown
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured address.
    pub async fn run_for_testing(self) -> ServerResult<(SocketAddr, Arc<Lifecycle>)> {
        let bound = self.bind().await?;
        let addr = bound.local_addr();
        let lifecycle = Arc::clone(&bound.lifecycle);

        // No signal source in tests; shutdown goes through the lifecycle handle
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tx);
        tokio::spawn(async move {
            if let Err(e) = bound.serve_with_events(rx).await {
                error!(error = %e, "test server terminated abnormally");
            }
        });

        Ok((addr, lifecycle))
    }
}

/// A server whose listener is bound and accepting connections
#[derive(Debug)]
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
    lifecycle: Arc<Lifecycle>,
    shutdown_config: ShutdownConfig,
}

impl BoundServer {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The lifecycle record
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Serve until shutdown, consuming OS termination signals and process
    /// faults as shutdown triggers
    ///
    /// # Errors
    ///
    /// Returns a `ServerError` if the serve loop fails outside a shutdown
    /// episode or the drain itself errors.
    pub async fn serve(self) -> ServerResult<ShutdownOutcome> {
        self.serve_with_events(os_termination_events()).await
    }

    /// Serve until shutdown with an injected termination event source.
    ///
    /// Every event routes through the same idempotent shutdown entry point.
    /// Once a request is accepted the drain and the forced-termination timer
    /// race; whichever completes first decides the outcome.
    ///
    /// # Errors
    ///
    /// Returns a `ServerError` if the serve loop fails outside a shutdown
    /// episode or the drain itself errors.
    pub async fn serve_with_events(
        self,
        events: mpsc::UnboundedReceiver<ShutdownReason>,
    ) -> ServerResult<ShutdownOutcome> {
        let token = self.lifecycle.cancellation_token();
        let dispatcher = spawn_dispatcher(Arc::clone(&self.lifecycle), events);

        let drain_token = token.clone();
        let mut serve_task = tokio::spawn(async move {
            axum::serve(self.listener, self.router)
                .with_graceful_shutdown(drain_token.cancelled_owned())
                .await
        });

        // Wait for a shutdown request; a serve loop that ends before one is
        // accepted is itself a fault. The token branch is polled first: a
        // graceful serve completion implies the token was already cancelled,
        // so an unbiased poll order could misread a finished drain as a
        // premature exit.
        tokio::select! {
            biased;
            () = token.cancelled() => {}
            result = &mut serve_task => {
                dispatcher.abort();
                return match result {
                    Ok(Ok(())) => Err(ServerError::Shutdown {
                        source: std::io::Error::other(
                            "server loop ended without a shutdown request",
                        ),
                    }),
                    Ok(Err(source)) => Err(ServerError::Startup { source }),
                    Err(source) => Err(ServerError::TaskJoin { source }),
                };
            }
        }

        // Drain-or-timeout race. The timer arms here, the instant the
        // shutdown request landed, and cannot outlive a completed drain.
        let outcome =
            match tokio::time::timeout(self.shutdown_config.graceful_timeout, &mut serve_task)
                .await
            {
                Ok(Ok(Ok(()))) => {
                    info!("in-flight requests drained");
                    ShutdownOutcome::Clean
                }
                Ok(Ok(Err(source))) => {
                    dispatcher.abort();
                    return Err(ServerError::Shutdown { source });
                }
                Ok(Err(source)) => {
                    dispatcher.abort();
                    return Err(ServerError::TaskJoin { source });
                }
                Err(_) => {
                    serve_task.abort();
                    error!(
                        timeout_seconds = self.shutdown_config.graceful_timeout.as_secs_f64(),
                        "graceful shutdown timeout exceeded, forcing termination"
                    );
                    ShutdownOutcome::ForcedTimeout
                }
            };

        dispatcher.abort();
        self.lifecycle.mark_stopped();

        if let Some(request) = self.lifecycle.shutdown_request() {
            info!(
                reason = %request.reason,
                duplicate_triggers = self.lifecycle.duplicate_trigger_count(),
                outcome = ?outcome,
                "shutdown complete"
            );
        }

        Ok(outcome)
    }
}

/// Assemble the full request pipeline around the routes.
///
/// Stage order is contract-significant: protective headers, compression
/// negotiation, payload size limiting, access logging, cross-origin policy.
/// The CORS stage sits inside the trace span (its response wrapper requires
/// the inner body type the handler stages produce); preflight and origin
/// filtering behavior is unaffected by the placement. Request-id propagation
/// wraps the whole pipeline and the error normalizer sits innermost so every
/// failure a stage surfaces reaches it.
fn build_router(state: ServerState, business_routes: Router<ServerState>) -> Router {
    let pipeline = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("0"),
        ))
        .layer(CompressionLayer::new())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    if let Some(request_id) = req.headers().get(REQUEST_ID_HEADER) {
                        info_span!(
                            "http_request",
                            ?request_id,
                            method = %req.method(),
                            path = req.uri().path(),
                        )
                    } else {
                        tracing::error!("failed to extract id from request");
                        info_span!(
                            "http_request",
                            request_id = "unknown",
                            method = %req.method(),
                            path = req.uri().path(),
                        )
                    }
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: Duration,
                     _span: &tracing::Span| {
                        info!(
                            status = response.status().as_u16(),
                            latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                            "request completed"
                        );
                    },
                ),
        )
        .layer(cors_layer(&state.config().cors))
        .layer(TimeoutLayer::new(state.config().timeout_seconds.value()))
        .layer(middleware::from_fn(track_requests))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            normalize_errors,
        ));

    create_routes()
        .merge(business_routes)
        .fallback(fallback_handler)
        .layer(pipeline)
        .with_state(state)
}

/// Build the cross-origin policy layer from configuration.
///
/// Disallowed origins are rejected by omitting the credentialed headers,
/// never by erroring; invalid configured origins are skipped with a warning.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "skipping unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Environment, lifecycle::LifecyclePhase};

    #[tokio::test]
    async fn server_creation() {
        let config = ServerConfig::for_testing();
        let server = Server::new(config, ShutdownConfig::default());

        assert_eq!(server.config().environment, Environment::Testing);
        assert_eq!(server.lifecycle().phase(), LifecyclePhase::Initializing);
        assert!(!server.lifecycle().cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn programmatic_shutdown_requires_listening() {
        let config = ServerConfig::for_testing();
        let server = Server::new(config, ShutdownConfig::default());

        // Dispatch is only wired after a successful bind; before that a
        // programmatic request is recorded but performs no transition
        server.shutdown();
        assert_eq!(server.lifecycle().phase(), LifecyclePhase::Initializing);
        assert_eq!(server.lifecycle().duplicate_trigger_count(), 1);
    }

    #[tokio::test]
    async fn bind_reports_listening_phase() {
        let config = ServerConfig::for_testing();
        let server = Server::new(config, ShutdownConfig::default());
        let lifecycle = server.lifecycle();

        let bound = server.bind().await.expect("bind on ephemeral port");
        assert_eq!(lifecycle.phase(), LifecyclePhase::Listening);
        assert_ne!(bound.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let first = Server::new(ServerConfig::for_testing(), ShutdownConfig::default());
        let bound = first.bind().await.expect("bind on ephemeral port");

        // Same explicit port, second bind must fail with BindError
        let mut taken = ServerConfig::for_testing();
        taken.host = bound.local_addr().ip();
        taken.port = crate::config::ServerPort::new(
            bound.local_addr().port(),
            Environment::Testing,
        )
        .expect("valid port");

        let second = Server::new(taken, ShutdownConfig::default());
        let lifecycle = second.lifecycle();
        let err = second.bind().await.expect_err("port already in use");
        assert!(matches!(err, ServerError::Bind { .. }));

        // A failed bind is terminal, not a lingering initialization
        assert_eq!(lifecycle.phase(), LifecyclePhase::Stopped);
    }

    #[test]
    fn shutdown_config_default() {
        let config = ShutdownConfig::default();
        assert_eq!(
            config.graceful_timeout,
            Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS)
        );
    }

    #[test]
    fn outcome_exit_codes() {
        // ExitCode has no PartialEq; compare through Debug
        assert_eq!(
            format!("{:?}", ShutdownOutcome::Clean.exit_code()),
            format!("{:?}", ExitCode::SUCCESS)
        );
        assert_eq!(
            format!("{:?}", ShutdownOutcome::ForcedTimeout.exit_code()),
            format!("{:?}", ExitCode::FAILURE)
        );
    }
}
