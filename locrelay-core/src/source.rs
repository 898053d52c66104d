//! Replay location source
//!
//! Feeds recorded fixes into a session at a fixed cadence, suppressing
//! fixes that moved less than the displacement threshold.
//!
//! ## Input format
//!
//! One fix per line, either `lat,lon` or a JSON object:
//!
//! ```text
//! # morning route
//! 52.5200,13.4050
//! {"latitude": 52.5203, "longitude": 13.4049}
//! ```

use std::io::BufRead;

use tokio_util::sync::CancellationToken;

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::relay::SessionHandle;
use crate::types::Fix;

/// Mean Earth radius in meters (IUGG)
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance between two fixes in meters (haversine).
pub fn distance_m(a: Fix, b: Fix) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Parse recorded fixes, skipping blank lines and `#` comments.
pub fn parse_fixes(reader: impl BufRead) -> Result<Vec<Fix>> {
    let mut fixes = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let fix = parse_line(trimmed).map_err(|message| Error::Parse {
            line: line_no,
            message,
        })?;
        if !fix.is_valid() {
            return Err(Error::Parse {
                line: line_no,
                message: format!(
                    "coordinates out of range: {}, {}",
                    fix.latitude, fix.longitude
                ),
            });
        }
        fixes.push(fix);
    }

    Ok(fixes)
}

fn parse_line(line: &str) -> std::result::Result<Fix, String> {
    if line.starts_with('{') {
        return serde_json::from_str::<Fix>(line).map_err(|e| format!("invalid JSON fix: {}", e));
    }

    let (lat, lon) = line
        .split_once(',')
        .ok_or_else(|| format!("expected 'lat,lon', got '{}'", line))?;
    let latitude = lat
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid latitude '{}': {}", lat.trim(), e))?;
    let longitude = lon
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid longitude '{}': {}", lon.trim(), e))?;
    Ok(Fix::new(latitude, longitude))
}

/// Suppresses fixes within `min_displacement_m` of the last accepted fix.
#[derive(Debug, Clone)]
pub struct DisplacementFilter {
    min_displacement_m: f64,
    last: Option<Fix>,
}

impl DisplacementFilter {
    pub fn new(min_displacement_m: f64) -> Self {
        Self {
            min_displacement_m: min_displacement_m.max(0.0),
            last: None,
        }
    }

    /// Returns true if `fix` should be emitted, remembering it if so.
    pub fn accept(&mut self, fix: Fix) -> bool {
        if let Some(last) = self.last {
            if distance_m(last, fix) < self.min_displacement_m {
                return false;
            }
        }
        self.last = Some(fix);
        true
    }
}

/// Replays a fixed list of fixes into a session
#[derive(Debug, Clone)]
pub struct ReplaySource {
    fixes: Vec<Fix>,
    config: SourceConfig,
}

impl ReplaySource {
    pub fn new(fixes: Vec<Fix>, config: SourceConfig) -> Self {
        Self { fixes, config }
    }

    pub fn from_reader(reader: impl BufRead, config: SourceConfig) -> Result<Self> {
        Ok(Self::new(parse_fixes(reader)?, config))
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Fixes that survive the displacement filter, in emission order.
    pub fn filtered(&self) -> Vec<Fix> {
        let mut filter = DisplacementFilter::new(self.config.min_displacement_m);
        self.fixes
            .iter()
            .copied()
            .filter(|fix| filter.accept(*fix))
            .collect()
    }

    /// Emit fixes into `handle`, one per interval, until exhausted or
    /// cancelled. Returns the number of fixes emitted.
    pub async fn run(self, handle: SessionHandle, cancel: CancellationToken) -> usize {
        let interval = self.config.interval();
        let fixes = self.filtered();
        let suppressed = self.fixes.len() - fixes.len();
        let mut emitted = 0;

        for (index, fix) in fixes.into_iter().enumerate() {
            if index > 0 && !interval.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            if cancel.is_cancelled() || handle.is_closed() {
                break;
            }
            handle.fix_received(fix.latitude, fix.longitude);
            emitted += 1;
        }

        tracing::info!(emitted, suppressed, "Replay source finished");
        emitted
    }
}
