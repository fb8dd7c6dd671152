// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Middleware module for HTTP request processing
//!
//! Home of the error normalizer, the terminal stage of the request pipeline.
//! Any failure surfaced by an earlier stage or handler is rendered here into
//! the single envelope shape clients see; what the envelope reveals is fixed
//! at construction time, not decided per response.

use axum::{
    Json,
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::{
    error::{ApiError, ErrorEnvelope},
    state::ServerState,
};

/// Renders per-request failures into the uniform error envelope.
///
/// Built once with an explicit verbosity flag (non-production environments
/// are verbose). The two output builders are deterministic: redacted
/// envelopes carry status and message only; verbose envelopes add the
/// diagnostic detail. Either way the failure is logged server-side in full.
#[derive(Debug, Clone, Copy)]
pub struct ErrorNormalizer {
    verbose: bool,
}

impl ErrorNormalizer {
    /// Create a normalizer; `verbose` controls whether envelopes carry detail
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Whether envelopes include diagnostic detail
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Render a failure into its response.
    ///
    /// Unmatched-route failures additionally echo the request path and
    /// method in the envelope.
    pub fn render(&self, err: &ApiError, method: &Method, path: &str) -> Response {
        let status = err.status();

        // Operator visibility is independent of what clients see
        if status.is_server_error() {
            error!(
                status = status.as_u16(),
                message = err.message(),
                %method,
                path,
                detail = err.detail(),
                "request failed"
            );
        } else {
            warn!(
                status = status.as_u16(),
                message = err.message(),
                %method,
                path,
                detail = err.detail(),
                "request rejected"
            );
        }

        let mut envelope = if self.verbose {
            ErrorEnvelope::verbose(err)
        } else {
            ErrorEnvelope::redacted(err)
        };

        if status == StatusCode::NOT_FOUND {
            envelope = envelope.with_request(method, path);
        }

        (status, Json(envelope)).into_response()
    }
}

/// Terminal pipeline stage: re-render any [`ApiError`]-carrying response
/// through the configured normalizer.
///
/// Handlers that fail produce a redacted envelope via `IntoResponse` and
/// stash the error in the response extensions; this stage picks it up and
/// applies the environment policy plus server-side logging. Responses
/// without a stashed error pass through untouched.
pub async fn normalize_errors(
    State(state): State<ServerState>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let mut response = next.run(req).await;

    match response.extensions_mut().remove::<ApiError>() {
        Some(err) => state.normalizer().render(&err, &method, &path),
        None => response,
    }
}
