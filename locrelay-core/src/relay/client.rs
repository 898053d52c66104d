//! HTTP client for the tracking endpoint
//!
//! One call, one POST, one outcome. The client never retries; a failed
//! event goes back to the session, which decides whether to queue it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::AUTHORIZATION;

use crate::connectivity::Reachability;
use crate::error::{Error, Result};
use crate::types::{LocationEvent, SessionConfig};

use super::payload::TrackingPayload;

/// A successful (2xx) delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    /// HTTP status returned by the endpoint
    pub status: u16,
}

/// HTTP client for location deliveries
#[derive(Clone)]
pub struct DeliveryClient {
    http_client: reqwest::Client,
    reachability: Arc<dyn Reachability>,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient").finish_non_exhaustive()
    }
}

impl DeliveryClient {
    /// Create a delivery client
    ///
    /// With no `timeout` the transport's own default applies.
    pub fn new(reachability: Arc<dyn Reachability>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let http_client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            reachability,
        })
    }

    /// Whether the network looks usable right now.
    pub fn is_reachable(&self) -> bool {
        self.reachability.is_reachable()
    }

    /// Post one event to `config.base_url`
    ///
    /// Returns `Error::Network` without touching the network when
    /// reachability reports offline, and `Error::Server` for transport
    /// failures and non-2xx responses.
    pub async fn deliver(&self, event: &LocationEvent, config: &SessionConfig) -> Result<Delivered> {
        if !self.reachability.is_reachable() {
            return Err(Error::Network("no network reachability".to_string()));
        }

        let started = Instant::now();
        let response = self
            .http_client
            .post(&config.base_url)
            .header(AUTHORIZATION, &config.auth_header)
            .json(&TrackingPayload::new(event, &config.extra_params))
            .send()
            .await
            .map_err(|e| Error::Server {
                status: None,
                message: format!("HTTP request failed: {}", e),
            })?;

        let status = response.status();
        tracing::debug!(
            status = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            captured_at = event.captured_at,
            "Tracking endpoint responded"
        );

        if status.is_success() {
            Ok(Delivered {
                status: status.as_u16(),
            })
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Server {
                status: Some(status.as_u16()),
                message: format!("API error ({}): {}", status, error_text),
            })
        }
    }
}
