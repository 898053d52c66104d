//! Network reachability
//!
//! The delivery client asks a [`Reachability`] before every request and
//! fails fast with a network error when it reports offline. A
//! [`ConnectivityMonitor`] turns raw observations into the
//! "connectivity restored" edge that triggers a queue drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Synchronous view of whether the network is currently usable.
pub trait Reachability: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// Reachability that never reports offline. Every failure then surfaces
/// from the transport instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

impl Reachability for AlwaysReachable {
    fn is_reachable(&self) -> bool {
        true
    }
}

/// Shared flag updated by whoever observes the network.
///
/// Starts reachable; an optimistic start means early fixes are attempted
/// rather than parked until the first probe lands.
#[derive(Debug, Clone)]
pub struct ReachabilityFlag {
    reachable: Arc<AtomicBool>,
}

impl ReachabilityFlag {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: Arc::new(AtomicBool::new(reachable)),
        }
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Store `reachable`, returning the previous value.
    fn swap(&self, reachable: bool) -> bool {
        self.reachable.swap(reachable, Ordering::SeqCst)
    }
}

impl Default for ReachabilityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Reachability for ReachabilityFlag {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Detects the offline → online transition.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityMonitor {
    flag: ReachabilityFlag,
}

impl ConnectivityMonitor {
    pub fn new(flag: ReachabilityFlag) -> Self {
        Self { flag }
    }

    /// The flag this monitor keeps current.
    pub fn flag(&self) -> ReachabilityFlag {
        self.flag.clone()
    }

    /// Record an observation. Returns true only when connectivity was just
    /// restored.
    pub fn observe(&self, reachable: bool) -> bool {
        let was_reachable = self.flag.swap(reachable);
        let restored = reachable && !was_reachable;
        if restored {
            tracing::info!("Network connected");
        } else if was_reachable && !reachable {
            tracing::warn!("Network lost");
        }
        restored
    }
}

/// Checks reachability of the tracking endpoint with a TCP connect.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Derive `host:port` from an http(s) URL.
    pub fn for_url(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid baseURL '{}': {}", url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Config(format!("baseURL '{}' has no host", url)))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| Error::Config(format!("baseURL '{}' has no port", url)))?;

        // Bracket IPv6 literals so the address parses as host:port
        let address = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };

        Ok(Self { address, timeout })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn probe(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_defaults_to_reachable() {
        assert!(ReachabilityFlag::default().is_reachable());
        assert!(AlwaysReachable.is_reachable());
    }

    #[test]
    fn test_monitor_fires_only_on_restore() {
        let monitor = ConnectivityMonitor::new(ReachabilityFlag::new(true));

        // Still online: no signal
        assert!(!monitor.observe(true));
        // Going offline is not a restore
        assert!(!monitor.observe(false));
        assert!(!monitor.flag().is_reachable());
        assert!(!monitor.observe(false));
        // Back online fires exactly once
        assert!(monitor.observe(true));
        assert!(!monitor.observe(true));
        assert!(monitor.flag().is_reachable());
    }

    #[test]
    fn test_probe_address_from_url() {
        let timeout = Duration::from_millis(100);
        let https = TcpProbe::for_url("https://api.example.com/track", timeout).unwrap();
        assert_eq!(https.address(), "api.example.com:443");

        let explicit = TcpProbe::for_url("http://127.0.0.1:8080/track", timeout).unwrap();
        assert_eq!(explicit.address(), "127.0.0.1:8080");

        assert!(TcpProbe::for_url("not a url", timeout).is_err());
    }

    #[tokio::test]
    async fn test_probe_reports_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let url = format!("http://127.0.0.1:{}/track", port);
        let probe = TcpProbe::for_url(&url, Duration::from_millis(500)).unwrap();
        assert!(probe.probe().await);

        drop(listener);
        assert!(!probe.probe().await);
    }
}
