//! Poll supervisor
//!
//! Drives the whole watcher from a single task:
//! - outer loop: connect, poll until the session breaks, close, cool down
//! - inner loop: extract, notify on matches, sleep for the poll interval
//!
//! Nothing that happens while polling ends the process. The only way out of
//! [`PollSupervisor::run`] is the cancellation token.

use chrono::Utc;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::monitoring::connection::{ConnectionManager, Session};
use crate::monitoring::digest::format_digest;
use crate::monitoring::query::{FilterWindow, KeywordSet, QueryExtractor};
use crate::monitoring::telegram_alert::SharedNotifier;
use crate::utils::error::{ConnectionExhausted, ExtractError};

/// Default sleep after each polling cycle
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Default pause before reconnecting
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Supervisor timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimings {
    /// Sleep after a cycle completes, not a fixed period
    pub poll_interval: Duration,
    /// Pause between a finished session and the next connect
    pub cooldown: Duration,
}

impl Default for PollTimings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Supervisor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Polling,
    Extracting,
    Notifying,
    Disconnecting,
    Cooldown,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Polling => "polling",
            SupervisorState::Extracting => "extracting",
            SupervisorState::Notifying => "notifying",
            SupervisorState::Disconnecting => "disconnecting",
            SupervisorState::Cooldown => "cooldown",
        };
        f.write_str(name)
    }
}

/// How one session lifetime ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// No session could be opened
    Exhausted(ConnectionExhausted),
    /// The session broke while polling and was closed
    Broken(ExtractError),
    /// Cancellation was requested
    Shutdown,
}

/// Result of a single extract/notify cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing matched, notifier not called
    NoMatches,
    /// Digest delivered
    Notified { records: usize },
    /// Digest built but delivery failed
    DeliveryFailed { records: usize },
}

/// Appliance address the supervisor connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplianceAddress {
    pub host: String,
    pub port: u16,
}

impl ApplianceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ApplianceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Long-running connect/poll/notify loop
///
/// The current [`SupervisorState`] is published on a watch channel.
pub struct PollSupervisor {
    address: ApplianceAddress,
    connections: ConnectionManager,
    extractor: QueryExtractor,
    keywords: KeywordSet,
    notifier: SharedNotifier,
    timings: PollTimings,
    state: watch::Sender<SupervisorState>,
}

impl PollSupervisor {
    pub fn new(
        address: ApplianceAddress,
        connections: ConnectionManager,
        extractor: QueryExtractor,
        keywords: KeywordSet,
        notifier: SharedNotifier,
    ) -> Self {
        Self {
            address,
            connections,
            extractor,
            keywords,
            notifier,
            timings: PollTimings::default(),
            state: watch::Sender::new(SupervisorState::Idle),
        }
    }

    /// Override the poll interval and cooldown
    pub fn with_timings(mut self, timings: PollTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Receiver that sees every state change
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    fn transition(&self, to: SupervisorState) {
        let from = self.state.send_replace(to);
        if from != to {
            debug!(from = %from, to = %to, "Supervisor state transition");
        }
    }

    /// Run until `shutdown` is cancelled
    ///
    /// Every session outcome other than shutdown is followed by the cooldown
    /// and a fresh connect.
    #[instrument(skip(self, shutdown), fields(appliance = %self.address))]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.timings.poll_interval.as_secs(),
            cooldown_secs = self.timings.cooldown.as_secs(),
            max_attempts = self.connections.policy().max_attempts,
            keywords = ?self.keywords.as_slice(),
            "Starting poll supervisor"
        );

        loop {
            match self.run_session(&shutdown).await {
                SessionOutcome::Shutdown => break,
                SessionOutcome::Exhausted(e) => {
                    error!(error = %e, "Could not connect to Pi-hole");
                    self.transition(SupervisorState::Cooldown);
                }
                SessionOutcome::Broken(e) => {
                    error!(error = %e, "Pi-hole session failed");
                    self.transition(SupervisorState::Cooldown);
                }
            }

            info!(
                cooldown_secs = self.timings.cooldown.as_secs(),
                "Waiting before attempting to reconnect"
            );
            if !sleep_or_cancel(self.timings.cooldown, &shutdown).await {
                break;
            }
        }

        self.transition(SupervisorState::Idle);
        info!("Poll supervisor stopped");
    }

    /// Connect, poll until the session ends, then close it exactly once
    pub async fn run_session(&self, shutdown: &CancellationToken) -> SessionOutcome {
        self.transition(SupervisorState::Connecting);
        let connect = self.connections.connect(&self.address.host, self.address.port);
        let mut session = tokio::select! {
            _ = shutdown.cancelled() => return SessionOutcome::Shutdown,
            result = connect => match result {
                Ok(session) => session,
                Err(e) => return SessionOutcome::Exhausted(e),
            },
        };

        info!(peer = %session.peer(), "Connected to Pi-hole. Retrieving queries...");
        self.transition(SupervisorState::Polling);

        let outcome = self.poll(session.as_mut(), shutdown).await;

        self.transition(SupervisorState::Disconnecting);
        if let Err(e) = session.close().await {
            warn!(error = %e, "Error while closing Pi-hole session");
        }
        debug!("Pi-hole session closed");

        outcome
    }

    /// Inner polling loop; returns when the session breaks or on shutdown
    async fn poll(&self, session: &mut dyn Session, shutdown: &CancellationToken) -> SessionOutcome {
        loop {
            let cycle = tokio::select! {
                _ = shutdown.cancelled() => return SessionOutcome::Shutdown,
                result = self.poll_once(&mut *session) => result,
            };

            if let Err(e) = cycle {
                return SessionOutcome::Broken(e);
            }

            debug!(
                sleep_secs = self.timings.poll_interval.as_secs(),
                "Waiting for next poll"
            );
            if !sleep_or_cancel(self.timings.poll_interval, shutdown).await {
                return SessionOutcome::Shutdown;
            }
        }
    }

    /// One extract → notify cycle against an open session
    ///
    /// Only a broken session is an error. A failed delivery is logged and
    /// reported in the outcome.
    #[instrument(skip(self, session), level = "debug")]
    pub async fn poll_once(&self, session: &mut dyn Session) -> Result<CycleOutcome, ExtractError> {
        self.transition(SupervisorState::Extracting);

        let window = FilterWindow::trailing(Utc::now());
        let records = self
            .extractor
            .extract(session, &self.keywords, &window)
            .await?;

        if records.is_empty() {
            info!("No queries in the last 5 minutes");
            self.transition(SupervisorState::Polling);
            return Ok(CycleOutcome::NoMatches);
        }

        self.transition(SupervisorState::Notifying);
        let message = format_digest(&records);
        let outcome = match self.notifier.notify(&message).await {
            Ok(()) => CycleOutcome::Notified {
                records: records.len(),
            },
            Err(e) => {
                error!(error = %e, records = records.len(), "Failed to deliver notification");
                CycleOutcome::DeliveryFailed {
                    records: records.len(),
                }
            }
        };

        self.transition(SupervisorState::Polling);
        Ok(outcome)
    }
}

/// Sleep for `duration`; false if cancelled first
async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
