//! Location delivery pipeline
//!
//! Turns fixes into `job_tracking` POSTs and keeps failed ones for a single
//! retry once the network comes back.
//!
//! ## Architecture
//!
//! - Every fix is posted immediately; delivery never blocks the caller
//! - Failed first attempts go to an in-memory FIFO queue
//! - A connectivity-restored signal detaches the whole queue and retries
//!   each event once; events that fail again are dropped
//! - Nothing is written to disk; stopping a session discards its queue
//!
//! ## Usage
//!
//! ```rust,no_run
//! use locrelay_core::relay::{Session, SessionOptions};
//! use locrelay_core::SessionConfig;
//!
//! # async fn run() -> locrelay_core::Result<()> {
//! let config = SessionConfig::new("https://api.example.com/track", "Bearer t1");
//! let session = Session::start(config, SessionOptions::default())?;
//!
//! session.on_fix_received(10.0, 20.0);
//! session.on_connectivity_restored();
//!
//! session.wait_idle().await;
//! let stats = session.stop().await;
//! println!("delivered {}", stats.delivered);
//! # Ok(())
//! # }
//! ```

mod client;
mod payload;
mod queue;
mod session;

pub use client::{Delivered, DeliveryClient};
pub use payload::TrackingPayload;
pub use queue::DeliveryQueue;
pub use session::{RelayStats, Session, SessionHandle, SessionOptions, UPDATE_CHANNEL_CAPACITY};
