//! Platform adapter seam
//!
//! Everything the host OS owns (location permissions, foreground service,
//! notification channel, wake lock, network broadcasts) stays behind a
//! [`PlatformAdapter`]. The tracker calls `init` once a session is running
//! and `shutdown` before stopping it; between the two, the adapter pushes
//! fixes and connectivity-restored signals into the [`SessionHandle`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectivityConfig;
use crate::connectivity::{ConnectivityMonitor, Reachability, ReachabilityFlag, TcpProbe};
use crate::error::{Error, Result};
use crate::relay::SessionHandle;
use crate::source::ReplaySource;

/// Host integration for one tracker
pub trait PlatformAdapter: Send {
    /// Reachability consulted by the delivery client before each request
    fn reachability(&self) -> Arc<dyn Reachability>;

    /// Start delivering fixes and connectivity signals to `session`.
    fn init(&mut self, session: SessionHandle) -> Result<()>;

    /// Stop delivering signals. Must be safe to call when not initialized.
    fn shutdown(&mut self);
}

/// Adapter for hosts that deliver OS callbacks themselves
///
/// Clones share state: keep one clone in the host's location and network
/// callbacks and hand another to the [`crate::Tracker`]. Calls made while no
/// session is initialized are ignored.
#[derive(Clone, Default)]
pub struct ManualPlatform {
    monitor: ConnectivityMonitor,
    session: Arc<Mutex<Option<SessionHandle>>>,
}

impl ManualPlatform {
    pub fn new(reachability: ReachabilityFlag) -> Self {
        Self {
            monitor: ConnectivityMonitor::new(reachability),
            session: Arc::default(),
        }
    }

    /// Forward a location callback.
    pub fn fix_received(&self, latitude: f64, longitude: f64) {
        if let Some(session) = self.current() {
            session.fix_received(latitude, longitude);
        }
    }

    /// Forward a network-change broadcast. Only the offline → online edge
    /// reaches the session as a connectivity-restored signal.
    pub fn network_changed(&self, reachable: bool) {
        if self.monitor.observe(reachable) {
            if let Some(session) = self.current() {
                session.connectivity_restored();
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<SessionHandle> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, session: Option<SessionHandle>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

impl PlatformAdapter for ManualPlatform {
    fn reachability(&self) -> Arc<dyn Reachability> {
        Arc::new(self.monitor.flag())
    }

    fn init(&mut self, session: SessionHandle) -> Result<()> {
        self.replace(Some(session));
        Ok(())
    }

    fn shutdown(&mut self) {
        self.replace(None);
    }
}

/// Adapter for headless hosts: replays recorded fixes and probes the
/// endpoint over TCP to detect connectivity changes.
pub struct HeadlessPlatform {
    source: Option<ReplaySource>,
    probe: TcpProbe,
    connectivity: ConnectivityConfig,
    monitor: ConnectivityMonitor,
    cancel: CancellationToken,
    exhausted: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl HeadlessPlatform {
    /// `base_url` is only used to derive the probe address.
    pub fn new(
        source: ReplaySource,
        base_url: &str,
        connectivity: ConnectivityConfig,
    ) -> Result<Self> {
        connectivity.validate()?;
        let probe = TcpProbe::for_url(base_url, connectivity.probe_timeout())?;
        Ok(Self {
            source: Some(source),
            probe,
            connectivity,
            monitor: ConnectivityMonitor::default(),
            cancel: CancellationToken::new(),
            exhausted: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Cancelled once the replay input has been fully emitted.
    pub fn exhausted(&self) -> CancellationToken {
        self.exhausted.clone()
    }
}

impl PlatformAdapter for HeadlessPlatform {
    fn reachability(&self) -> Arc<dyn Reachability> {
        Arc::new(self.monitor.flag())
    }

    fn init(&mut self, session: SessionHandle) -> Result<()> {
        let source = self
            .source
            .take()
            .ok_or_else(|| Error::Config("headless platform already initialized".to_string()))?;

        tracing::info!(
            probe = %self.probe.address(),
            fixes = source.len(),
            "Starting headless platform"
        );

        let cancel = self.cancel.clone();
        let exhausted = self.exhausted.clone();
        let fixes_session = session.clone();
        self.tasks.push(tokio::spawn(async move {
            source.run(fixes_session, cancel).await;
            exhausted.cancel();
        }));

        let probe = self.probe.clone();
        let monitor = self.monitor.clone();
        let interval = self
            .connectivity
            .probe_interval()
            .max(Duration::from_millis(100));
        let cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if monitor.observe(probe.probe().await) {
                            session.connectivity_restored();
                        }
                    }
                }
            }
        }));

        Ok(())
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Headless platform shut down");
    }
}
