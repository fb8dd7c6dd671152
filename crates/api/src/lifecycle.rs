// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server lifecycle state machine and termination dispatch
//!
//! [`Lifecycle`] owns the single process-wide phase record
//! (`Initializing → Listening → Draining → Stopped`, strictly one-directional)
//! and the cancellation token the serve loop drains on. All transitions go
//! through its methods, which serialize writers behind one mutex; everything
//! else only reads.
//!
//! The dispatcher funnels every termination trigger (signals, process faults,
//! programmatic requests) through the same idempotent
//! [`Lifecycle::begin_shutdown`]. Triggers arriving while a drain is already
//! underway are recorded and logged but produce no new action.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Phases of the server lifecycle, in transition order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Configuration loaded, listener not yet bound
    Initializing,
    /// Listener bound and accepting connections
    Listening,
    /// New connections refused, in-flight requests completing
    Draining,
    /// Terminal; nothing transitions out of this phase
    Stopped,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Initializing => write!(f, "initializing"),
            LifecyclePhase::Listening => write!(f, "listening"),
            LifecyclePhase::Draining => write!(f, "draining"),
            LifecyclePhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// What triggered a shutdown request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Interrupt signal (SIGINT / ctrl-c)
    Interrupt,
    /// Terminate signal (SIGTERM)
    Terminate,
    /// Process-level fault: a panic or an escalated task failure
    Fault(String),
    /// Requested through the server API
    Programmatic,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Fault(detail) => write!(f, "fault: {detail}"),
            ShutdownReason::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// The single shutdown episode record; immutable after creation
#[derive(Debug, Clone)]
pub struct ShutdownRequest {
    /// What triggered the shutdown
    pub reason: ShutdownReason,
    /// When the request was accepted
    pub initiated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug)]
struct LifecycleInner {
    phase: LifecyclePhase,
    request: Option<ShutdownRequest>,
    duplicate_triggers: u32,
}

/// Owner of the lifecycle phase and the shutdown cancellation token
#[derive(Debug)]
pub struct Lifecycle {
    inner: Mutex<LifecycleInner>,
    token: CancellationToken,
}

impl Lifecycle {
    /// Create a lifecycle record in the `Initializing` phase
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                phase: LifecyclePhase::Initializing,
                request: None,
                duplicate_triggers: 0,
            }),
            token: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleInner> {
        // A poisoned lock only means a writer panicked mid-transition; the
        // phase record itself is a plain enum and still readable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current phase
    pub fn phase(&self) -> LifecyclePhase {
        self.lock().phase
    }

    /// Token cancelled when a shutdown request is accepted
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Record a successful listener bind: `Initializing → Listening`
    pub fn mark_listening(&self) {
        let mut inner = self.lock();
        if inner.phase == LifecyclePhase::Initializing {
            inner.phase = LifecyclePhase::Listening;
        } else {
            warn!(phase = %inner.phase, "mark_listening ignored outside initializing phase");
        }
    }

    /// Accept a shutdown request: `Listening → Draining`, exactly once.
    ///
    /// The first caller wins, records the [`ShutdownRequest`], and cancels
    /// the token so the serve loop stops accepting connections. Every later
    /// call (any phase) is counted and logged for diagnostics but produces
    /// no new action. Returns whether this call performed the transition.
    pub fn begin_shutdown(&self, reason: ShutdownReason) -> bool {
        let mut inner = self.lock();
        if inner.phase == LifecyclePhase::Listening {
            inner.phase = LifecyclePhase::Draining;
            inner.request = Some(ShutdownRequest {
                reason: reason.clone(),
                initiated_at: chrono::Utc::now(),
            });
            drop(inner);
            warn!(%reason, "shutdown requested, draining in-flight requests");
            self.token.cancel();
            true
        } else {
            inner.duplicate_triggers += 1;
            let (phase, count) = (inner.phase, inner.duplicate_triggers);
            drop(inner);
            warn!(
                %reason,
                %phase,
                duplicate_triggers = count,
                "shutdown already in progress, trigger recorded"
            );
            false
        }
    }

    /// Record terminal arrival: drain completion or forced termination
    /// (`Draining → Stopped`), or a startup failure before the listener
    /// ever bound (`Initializing → Stopped`)
    pub fn mark_stopped(&self) {
        let mut inner = self.lock();
        match inner.phase {
            LifecyclePhase::Draining | LifecyclePhase::Initializing => {
                inner.phase = LifecyclePhase::Stopped;
            }
            phase => {
                warn!(%phase, "mark_stopped ignored in non-terminal-eligible phase");
            }
        }
    }

    /// The accepted shutdown request, if one exists
    pub fn shutdown_request(&self) -> Option<ShutdownRequest> {
        self.lock().request.clone()
    }

    /// How many triggers arrived after the first accepted request
    pub fn duplicate_trigger_count(&self) -> u32 {
        self.lock().duplicate_triggers
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Route termination events from `events` into `begin_shutdown`.
///
/// The receiving end is the injection seam: production wiring feeds it from
/// [`os_termination_events`], tests push reasons directly. The loop keeps
/// consuming after the first trigger so later faults are still observed and
/// logged during the drain.
pub fn spawn_dispatcher(
    lifecycle: Arc<Lifecycle>,
    mut events: mpsc::UnboundedReceiver<ShutdownReason>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(reason) = events.recv().await {
            if let ShutdownReason::Fault(detail) = &reason {
                // Full detail server-side regardless of environment
                error!(fault = %detail, "process-level fault observed");
            }
            lifecycle.begin_shutdown(reason);
        }
        info!("termination event source closed");
    })
}

/// Produce the production termination event stream: OS signals plus a panic
/// hook that escalates process faults to shutdown requests.
pub fn os_termination_events() -> mpsc::UnboundedReceiver<ShutdownReason> {
    let (tx, rx) = mpsc::unbounded_channel();
    install_panic_fault_hook(tx.clone());
    tokio::spawn(listen_for_signals(tx));
    rx
}

/// Escalate panics to shutdown requests, preserving the default hook's report
fn install_panic_fault_hook(tx: mpsc::UnboundedSender<ShutdownReason>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        let _ = tx.send(ShutdownReason::Fault(info.to_string()));
    }));
}

/// Forward OS termination signals into the event channel
async fn listen_for_signals(tx: mpsc::UnboundedSender<ShutdownReason>) {
    #[cfg(unix)]
    #[allow(clippy::expect_used)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

        loop {
            let reason = tokio::select! {
                _ = sigterm.recv() => ShutdownReason::Terminate,
                _ = sigint.recv() => ShutdownReason::Interrupt,
            };
            if tx.send(reason).is_err() {
                break;
            }
        }
    }

    #[cfg(not(unix))]
    #[allow(clippy::expect_used)]
    {
        loop {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install CTRL+C signal handler");
            if tx.send(ShutdownReason::Interrupt).is_err() {
                break;
            }
        }
    }
}
