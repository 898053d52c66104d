//! Host-facing tracking surface
//!
//! [`Tracker`] is what a host bridge talks to: `start_tracking`,
//! `stop_tracking`, and a `LocationUpdated` subscription. It owns at most
//! one [`Session`] and the [`PlatformAdapter`] that feeds it.
//!
//! Starting while a session is active fails with [`Error::AlreadyActive`]
//! and leaves the running session alone. Stopping when idle is a no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::DeliveryConfig;
use crate::error::{Error, Result};
use crate::platform::PlatformAdapter;
use crate::relay::{RelayStats, Session, SessionOptions, UPDATE_CHANNEL_CAPACITY};
use crate::time::{Clock, SystemClock};
use crate::types::{ExtraParams, LocationUpdate, SessionConfig};

/// Name of the notification emitted once per fix
pub const LOCATION_UPDATED: &str = "LocationUpdated";

/// Single-session tracking front end
pub struct Tracker {
    platform: Box<dyn PlatformAdapter>,
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
    max_queued: Option<usize>,
    /// Outlives sessions so listeners survive a restart
    updates: broadcast::Sender<LocationUpdate>,
    session: Option<Session>,
}

impl Tracker {
    pub fn new(platform: impl PlatformAdapter + 'static) -> Self {
        Self {
            platform: Box::new(platform),
            clock: Arc::new(SystemClock),
            timeout: None,
            max_queued: None,
            updates: broadcast::channel(UPDATE_CHANNEL_CAPACITY).0,
            session: None,
        }
    }

    /// Apply delivery limits to sessions started from now on.
    pub fn with_delivery(mut self, delivery: &DeliveryConfig) -> Self {
        self.timeout = delivery.timeout();
        self.max_queued = delivery.max_queued;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start tracking with the bridge's arguments.
    ///
    /// Fails synchronously with `Error::Config` when `base_url` or
    /// `header` is empty; no session is created in that case.
    pub fn start_tracking(
        &mut self,
        base_url: &str,
        header: &str,
        params: Option<ExtraParams>,
    ) -> Result<()> {
        let config =
            SessionConfig::new(base_url, header).with_extra_params(params.unwrap_or_default());
        self.start_session(config)
    }

    pub fn start_session(&mut self, config: SessionConfig) -> Result<()> {
        if self.session.is_some() {
            tracing::warn!("Tracking already active, ignoring start");
            return Err(Error::AlreadyActive);
        }

        let options = SessionOptions {
            reachability: self.platform.reachability(),
            clock: Arc::clone(&self.clock),
            timeout: self.timeout,
            max_queued: self.max_queued,
            updates: Some(self.updates.clone()),
        };
        let session = Session::start(config, options)?;

        if let Err(e) = self.platform.init(session.handle()) {
            tracing::error!(error = %e, "Platform failed to initialize");
            self.platform.shutdown();
            // Dropping the session closes it
            return Err(e);
        }

        tracing::info!(session_id = %session.id(), "Tracking started successfully");
        self.session = Some(session);
        Ok(())
    }

    /// Stop tracking. Returns the final stats, or `None` if nothing was running.
    pub async fn stop_tracking(&mut self) -> Option<RelayStats> {
        let Some(session) = self.session.take() else {
            tracing::debug!("Tracking is not active. Nothing to stop");
            return None;
        };

        self.platform.shutdown();
        let stats = session.stop().await;
        tracing::info!("Tracking stopped successfully");
        Some(stats)
    }

    /// Subscribe to `LocationUpdated` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LocationUpdate> {
        self.updates.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> Option<RelayStats> {
        self.session.as_ref().map(Session::stats)
    }

    /// Events waiting for a connectivity signal (0 when idle)
    pub fn pending(&self) -> usize {
        self.session.as_ref().map_or(0, Session::pending)
    }

    /// Wait for in-flight deliveries of the active session to settle.
    pub async fn wait_idle(&self) {
        if let Some(session) = &self.session {
            session.wait_idle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ReachabilityFlag;
    use crate::platform::ManualPlatform;

    #[tokio::test]
    async fn test_start_requires_url_and_header() {
        let mut tracker = Tracker::new(ManualPlatform::default());

        let result = tracker.start_tracking("https://api.example.com/track", "", None);
        assert!(matches!(result, Err(Error::Config(_))));
        let result = tracker.start_tracking("", "Bearer t1", None);
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(!tracker.is_active());
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let mut tracker = Tracker::new(ManualPlatform::new(ReachabilityFlag::new(false)));
        tracker
            .start_tracking("https://api.example.com/track", "Bearer t1", None)
            .unwrap();
        let first = tracker.session().unwrap().id();

        let again = tracker.start_tracking("https://other.example.com/track", "Bearer t2", None);
        assert!(matches!(again, Err(Error::AlreadyActive)));
        assert_eq!(tracker.session().unwrap().id(), first);
        assert_eq!(
            tracker.session().unwrap().config().base_url,
            "https://api.example.com/track"
        );

        assert!(tracker.stop_tracking().await.is_some());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let mut tracker = Tracker::new(ManualPlatform::default());
        assert!(tracker.stop_tracking().await.is_none());
        assert!(tracker.stats().is_none());
    }
}
