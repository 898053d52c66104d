//! Tracking session orchestration
//!
//! A [`Session`] owns one [`SessionConfig`] and one [`DeliveryQueue`]. Fixes
//! and connectivity signals reach it through a cloneable [`SessionHandle`],
//! callable from any thread.
//!
//! ## Flow
//!
//! ```text
//! fix ──▶ LocationEvent ──▶ spawned POST ──┐
//!                                          ▼
//!                              completion channel ──▶ completion loop
//!                                                        │ immediate failure
//!                                                        ▼
//! connectivity restored ──▶ drain_and_clear ◀──── DeliveryQueue
//!            │
//!            └──▶ spawned POST per event (retry failures are dropped)
//! ```
//!
//! Each event gets at most one retry. An event that fails its immediate
//! attempt and its retry after reconnect is gone; the drop is counted in
//! [`RelayStats::dropped`] and logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

use crate::connectivity::{AlwaysReachable, Reachability};
use crate::error::{Error, Result};
use crate::time::{Clock, SystemClock};
use crate::types::{Fix, LocationEvent, LocationUpdate, SessionConfig};

use super::client::{Delivered, DeliveryClient};
use super::queue::DeliveryQueue;

/// Listener buffer for `LocationUpdated` notifications
pub const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Per-session delivery counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Fixes accepted while the session was active
    pub fixes_received: u64,
    /// Events delivered on their first attempt
    pub delivered: u64,
    /// Events queued after a failed first attempt
    pub enqueued: u64,
    /// Events detached from the queue for a retry
    pub retried: u64,
    /// Retries that succeeded
    pub retry_delivered: u64,
    /// Retries that failed; these events are lost
    pub dropped: u64,
    /// Events evicted from a full queue
    pub evicted: u64,
}

/// Collaborators and limits for a session
#[derive(Clone)]
pub struct SessionOptions {
    pub reachability: Arc<dyn Reachability>,
    pub clock: Arc<dyn Clock>,
    /// HTTP timeout; `None` keeps the transport default
    pub timeout: Option<Duration>,
    /// Queue cap; `None` is unbounded
    pub max_queued: Option<usize>,
    /// Where `LocationUpdated` goes; a private channel is created when unset
    pub updates: Option<broadcast::Sender<LocationUpdate>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reachability: Arc::new(AlwaysReachable),
            clock: Arc::new(SystemClock),
            timeout: None,
            max_queued: None,
            updates: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Immediate,
    Retry,
}

/// Result of one spawned delivery, reported back to the completion loop
struct Completion {
    event: LocationEvent,
    attempt: Attempt,
    outcome: Result<Delivered>,
}

/// State shared by the session, its handles, and in-flight attempts
struct Shared {
    id: Uuid,
    config: SessionConfig,
    queue: DeliveryQueue,
    client: DeliveryClient,
    clock: Arc<dyn Clock>,
    updates: broadcast::Sender<LocationUpdate>,
    completions: mpsc::UnboundedSender<Completion>,
    /// Attempts spawned but not yet settled by the completion loop
    in_flight: watch::Sender<usize>,
    stats: Mutex<RelayStats>,
    closed: AtomicBool,
    runtime: Handle,
    span: Span,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn update_stats(&self, f: impl FnOnce(&mut RelayStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn stats(&self) -> RelayStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_attempt(self: &Arc<Self>, event: LocationEvent, attempt: Attempt) {
        self.in_flight.send_modify(|n| *n += 1);

        let shared = Arc::clone(self);
        let span = info_span!(
            parent: &self.span,
            "delivery",
            attempt = ?attempt,
            captured_at = event.captured_at
        );
        self.runtime.spawn(
            async move {
                let outcome = shared.client.deliver(&event, &shared.config).await;
                // Fails only after stop; the result is discarded
                let _ = shared.completions.send(Completion {
                    event,
                    attempt,
                    outcome,
                });
            }
            .instrument(span),
        );
    }

    /// Apply one completion to queue and stats.
    fn settle(&self, completion: Completion) {
        let Completion {
            event,
            attempt,
            outcome,
        } = completion;

        match (attempt, outcome) {
            (Attempt::Immediate, Ok(delivered)) => {
                self.update_stats(|s| s.delivered += 1);
                tracing::debug!(
                    status = delivered.status,
                    captured_at = event.captured_at,
                    "Sent location"
                );
            }
            (Attempt::Immediate, Err(e)) => {
                let evicted = self.queue.enqueue(event);
                self.update_stats(|s| {
                    s.enqueued += 1;
                    if evicted.is_some() {
                        s.evicted += 1;
                    }
                });
                tracing::warn!(
                    error = %e,
                    captured_at = event.captured_at,
                    queued = self.queue.len(),
                    "Failed to send location, queued for retry"
                );
                if let Some(evicted) = evicted {
                    tracing::warn!(
                        captured_at = evicted.captured_at,
                        "Retry queue full, evicted oldest location"
                    );
                }
            }
            (Attempt::Retry, Ok(delivered)) => {
                self.update_stats(|s| s.retry_delivered += 1);
                tracing::debug!(
                    status = delivered.status,
                    captured_at = event.captured_at,
                    "Retried location delivered"
                );
            }
            (Attempt::Retry, Err(e)) => {
                self.update_stats(|s| s.dropped += 1);
                tracing::warn!(
                    error = %e,
                    latitude = event.latitude,
                    longitude = event.longitude,
                    captured_at = event.captured_at,
                    "Retry failed, location dropped"
                );
            }
        }

        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Cloneable entry point for fix and connectivity callbacks
///
/// Calls after the session stopped are ignored.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Handle a new fix: notify listeners and attempt delivery right away.
    ///
    /// Never blocks and never reports delivery failure to the caller.
    pub fn fix_received(&self, latitude: f64, longitude: f64) {
        let shared = &self.shared;
        if shared.is_closed() {
            tracing::debug!("Ignoring fix for stopped session");
            return;
        }

        let fix = Fix::new(latitude, longitude);
        let event = LocationEvent::capture(fix, shared.clock.as_ref());
        shared.update_stats(|s| s.fixes_received += 1);

        tracing::debug!(
            parent: &shared.span,
            latitude,
            longitude,
            captured_at = event.captured_at,
            "Updated location"
        );

        // No listeners is fine
        let _ = shared.updates.send(LocationUpdate::from(fix));

        shared.spawn_attempt(event, Attempt::Immediate);
    }

    /// Retry every queued event once.
    ///
    /// The queue is detached atomically first, so failures arriving during
    /// the drain queue up for the next signal instead of joining this one.
    pub fn connectivity_restored(&self) {
        let shared = &self.shared;
        if shared.is_closed() {
            return;
        }

        let detached = shared.queue.drain_and_clear();
        if detached.is_empty() {
            tracing::debug!(parent: &shared.span, "Network connected, nothing to retry");
            return;
        }

        tracing::info!(
            parent: &shared.span,
            count = detached.len(),
            "Network connected. Retrying failed requests"
        );
        shared.update_stats(|s| s.retried += detached.len() as u64);

        for event in detached {
            shared.spawn_attempt(event, Attempt::Retry);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.id
    }
}

/// One active tracking session
pub struct Session {
    handle: SessionHandle,
    cancel: CancellationToken,
    completion_loop: JoinHandle<()>,
}

impl Session {
    /// Validate `config` and start a session on the current tokio runtime.
    ///
    /// Fails with `Error::Config` for an invalid configuration, or when
    /// called outside a runtime. No queue exists unless this succeeds.
    pub fn start(config: SessionConfig, options: SessionOptions) -> Result<Self> {
        config.validate()?;

        let runtime = Handle::try_current()
            .map_err(|_| Error::Config("tracking requires a tokio runtime".to_string()))?;
        let client = DeliveryClient::new(options.reachability, options.timeout)?;

        let queue = match options.max_queued {
            Some(cap) => DeliveryQueue::with_capacity_limit(cap),
            None => DeliveryQueue::new(),
        };
        let updates = options
            .updates
            .unwrap_or_else(|| broadcast::channel(UPDATE_CHANNEL_CAPACITY).0);
        let (completions, receiver) = mpsc::unbounded_channel();
        let (in_flight, _) = watch::channel(0);

        let id = Uuid::new_v4();
        let span = info_span!("session", session_id = %id);

        let shared = Arc::new(Shared {
            id,
            config,
            queue,
            client,
            clock: options.clock,
            updates,
            completions,
            in_flight,
            stats: Mutex::new(RelayStats::default()),
            closed: AtomicBool::new(false),
            runtime: runtime.clone(),
            span: span.clone(),
        });

        let cancel = CancellationToken::new();
        let completion_loop = runtime.spawn(
            run_completion_loop(Arc::clone(&shared), receiver, cancel.clone()).instrument(span),
        );

        tracing::info!(
            session_id = %id,
            base_url = %shared.config.base_url,
            params = shared.config.extra_params.len(),
            "Tracking session started"
        );

        Ok(Self {
            handle: SessionHandle { shared },
            cancel,
            completion_loop,
        })
    }

    pub fn id(&self) -> Uuid {
        self.handle.shared.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.handle.shared.config
    }

    /// Handle for location and connectivity callbacks
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Subscribe to `LocationUpdated` notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LocationUpdate> {
        self.handle.shared.updates.subscribe()
    }

    pub fn on_fix_received(&self, latitude: f64, longitude: f64) {
        self.handle.fix_received(latitude, longitude);
    }

    pub fn on_connectivity_restored(&self) {
        self.handle.connectivity_restored();
    }

    /// Number of events waiting for the next connectivity signal
    pub fn pending(&self) -> usize {
        self.handle.shared.queue.len()
    }

    /// Queued events, oldest first
    pub fn queued_events(&self) -> Vec<LocationEvent> {
        self.handle.shared.queue.snapshot()
    }

    pub fn stats(&self) -> RelayStats {
        self.handle.shared.stats()
    }

    /// Wait until every spawned attempt has been settled.
    ///
    /// An attempt whose request never resolves keeps this pending; bound it
    /// with `tokio::time::timeout` or configure a delivery timeout.
    pub async fn wait_idle(&self) {
        let shared = &self.handle.shared;
        let mut in_flight = shared.in_flight.subscribe();
        let _ = in_flight
            .wait_for(|n| *n == 0 || shared.is_closed())
            .await;
    }

    /// Stop the session. Queued events are discarded, not flushed.
    ///
    /// Requests already in flight are left to finish; their results are
    /// ignored.
    pub async fn stop(mut self) -> RelayStats {
        let shared = Arc::clone(&self.handle.shared);
        shared.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        if let Err(e) = (&mut self.completion_loop).await {
            tracing::warn!(error = %e, "Completion loop ended abnormally");
        }

        let discarded = shared.queue.drain_and_clear().len();
        shared.in_flight.send_replace(0);

        let stats = shared.stats();
        tracing::info!(
            session_id = %shared.id,
            discarded,
            fixes_received = stats.fixes_received,
            delivered = stats.delivered,
            enqueued = stats.enqueued,
            retry_delivered = stats.retry_delivered,
            dropped = stats.dropped,
            "Tracking session stopped"
        );
        stats
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.handle.shared.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

async fn run_completion_loop(
    shared: Arc<Shared>,
    mut completions: mpsc::UnboundedReceiver<Completion>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            completion = completions.recv() => match completion {
                Some(completion) => shared.settle(completion),
                None => break,
            },
        }
    }
    tracing::debug!("Completion loop finished");
}
