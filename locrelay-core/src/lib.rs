//! # locrelay-core
//!
//! Core library for locrelay - relays device location fixes to an HTTP
//! endpoint and keeps failed ones for a retry when connectivity returns.
//!
//! This library provides:
//! - Domain types for fixes, events and session configuration
//! - The delivery pipeline: HTTP client, in-memory retry queue, session
//! - Connectivity detection and a replay location source
//! - A platform adapter seam and the host-facing [`Tracker`]
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use locrelay_core::platform::ManualPlatform;
//! use locrelay_core::Tracker;
//!
//! # async fn run() -> locrelay_core::Result<()> {
//! let platform = ManualPlatform::default();
//! let mut tracker = Tracker::new(platform.clone());
//! let mut updates = tracker.subscribe();
//!
//! tracker.start_tracking("https://api.example.com/track", "Bearer t1", None)?;
//!
//! // Host callbacks
//! platform.fix_received(52.52, 13.405);
//! platform.network_changed(true);
//!
//! let update = updates.recv().await.expect("update");
//! println!("{}, {}", update.latitude, update.longitude);
//!
//! tracker.stop_tracking().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use relay::{RelayStats, Session, SessionHandle, SessionOptions};
pub use tracker::{Tracker, LOCATION_UPDATED};
pub use types::*;

// Public modules
pub mod config;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod platform;
pub mod relay;
pub mod source;
pub mod time;
pub mod tracker;
pub mod types;
