//! Core domain types for locrelay
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Fix** | A single captured (latitude, longitude) observation |
//! | **Event** | A [`LocationEvent`] built from a fix, carrying its capture time |
//! | **Session** | One run of tracking bound to one [`SessionConfig`] and one queue |
//! | **Drain** | Detaching and re-attempting every queued event after connectivity returns |
//!
//! An event's `captured_at` is fixed when the fix arrives. Retries resend the
//! same value so the endpoint learns when the position was observed, not
//! when it was finally delivered.

use std::collections::BTreeMap;

use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time::Clock;

/// Keys owned by the wire payload; extra params may not shadow them.
pub const RESERVED_PARAM_KEYS: [&str; 3] = ["latitude", "longitude", "timestamp"];

// ============================================
// Fixes and events
// ============================================

/// A raw position observation from the location source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are finite and inside WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A fix stamped with the moment it was captured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationEvent {
    pub latitude: f64,
    pub longitude: f64,
    /// Unix epoch seconds at capture time. Never regenerated on retry.
    pub captured_at: i64,
}

impl LocationEvent {
    pub fn new(latitude: f64, longitude: f64, captured_at: i64) -> Self {
        Self {
            latitude,
            longitude,
            captured_at,
        }
    }

    /// Build an event for `fix`, stamped with the clock's current time.
    pub fn capture(fix: Fix, clock: &dyn Clock) -> Self {
        Self::new(fix.latitude, fix.longitude, clock.now_unix())
    }

    pub fn fix(&self) -> Fix {
        Fix::new(self.latitude, self.longitude)
    }
}

/// Payload of the `LocationUpdated` notification sent to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<Fix> for LocationUpdate {
    fn from(fix: Fix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
        }
    }
}

// ============================================
// Extra params
// ============================================

/// A scalar value merged into every payload.
///
/// Numbers keep their integer or float form so `7` goes out as `7`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl ParamValue {
    /// Float value, or `None` for NaN and infinities.
    pub fn from_f64(value: f64) -> Option<Self> {
        serde_json::Number::from_f64(value).map(ParamValue::Number)
    }

    /// Infer a value from command-line text: booleans, then numbers, then strings.
    pub fn infer(raw: &str) -> Self {
        match raw {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        if let Ok(int) = raw.parse::<i64>() {
            return ParamValue::from(int);
        }
        if let Some(float) = raw.parse::<f64>().ok().and_then(ParamValue::from_f64) {
            return float;
        }
        ParamValue::String(raw.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value.into())
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl TryFrom<serde_json::Value> for ParamValue {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(ParamValue::Bool(b)),
            serde_json::Value::Number(n) => Ok(ParamValue::Number(n)),
            serde_json::Value::String(s) => Ok(ParamValue::String(s)),
            other => Err(Error::Config(format!(
                "param values must be string, number or boolean, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Extra key/value pairs flattened into every `job_tracking` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraParams(BTreeMap<String, ParamValue>);

impl ExtraParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of scalars, as passed by the host bridge.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("params are not valid JSON: {}", e)))?;
        Self::from_json_value(value)
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        let object = match value {
            serde_json::Value::Object(object) => object,
            other => {
                return Err(Error::Config(format!(
                    "params must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let mut params = Self::new();
        for (key, value) in object {
            let kind = json_kind(&value);
            let value = ParamValue::try_from(value).map_err(|_| {
                Error::Config(format!(
                    "param '{}' must be a string, number or boolean, got {}",
                    key, kind
                ))
            })?;
            params.insert(key, value);
        }
        Ok(params)
    }

    /// Parse a `key=value` assignment, inferring the value's type.
    pub fn parse_assignment(raw: &str) -> Result<(String, ParamValue)> {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected key=value, got '{}'", raw)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config(format!("empty param key in '{}'", raw)));
        }
        Ok((key.to_string(), ParamValue::infer(value.trim())))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ExtraParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

// ============================================
// Session configuration
// ============================================

/// Immutable settings for one tracking session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Endpoint that receives each `job_tracking` POST
    pub base_url: String,
    /// Sent verbatim as the `Authorization` header
    pub auth_header: String,
    /// Merged into every payload
    pub extra_params: ExtraParams,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>, auth_header: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_header: auth_header.into(),
            extra_params: ExtraParams::new(),
        }
    }

    pub fn with_extra_params(mut self, extra_params: ExtraParams) -> Self {
        self.extra_params = extra_params;
        self
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("baseURL is required".to_string()));
        }
        if self.auth_header.trim().is_empty() {
            return Err(Error::Config("header is required".to_string()));
        }

        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid baseURL '{}': {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "baseURL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        HeaderValue::from_str(&self.auth_header)
            .map_err(|e| Error::Config(format!("invalid header: {}", e)))?;

        if let Some(key) = RESERVED_PARAM_KEYS
            .iter()
            .find(|key| self.extra_params.get(key).is_some())
        {
            return Err(Error::Config(format!(
                "param '{}' collides with a tracking field",
                key
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    #[test]
    fn test_capture_uses_clock() {
        let clock = ManualClock::new(1_700_000_000);
        let event = LocationEvent::capture(Fix::new(10.0, 20.0), &clock);
        assert_eq!(event, LocationEvent::new(10.0, 20.0, 1_700_000_000));
        assert_eq!(event.fix(), Fix::new(10.0, 20.0));
    }

    #[test]
    fn test_fix_bounds() {
        assert!(Fix::new(-90.0, 180.0).is_valid());
        assert!(!Fix::new(90.1, 0.0).is_valid());
        assert!(!Fix::new(0.0, -180.5).is_valid());
        assert!(!Fix::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_params_from_json() {
        let params =
            ExtraParams::from_json_str(r#"{"job_id": 42, "driver": "ana", "on_duty": true}"#)
                .unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params.get("job_id"), Some(&ParamValue::from(42_i64)));
        assert_eq!(params.get("driver"), Some(&ParamValue::from("ana")));
        assert_eq!(params.get("on_duty"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn test_params_reject_non_scalars() {
        assert!(ExtraParams::from_json_str(r#"{"nested": {"a": 1}}"#).is_err());
        assert!(ExtraParams::from_json_str(r#"{"list": [1, 2]}"#).is_err());
        assert!(ExtraParams::from_json_str(r#"{"missing": null}"#).is_err());
        assert!(ExtraParams::from_json_str("[1, 2]").is_err());
        assert!(ExtraParams::from_json_str("not json").is_err());
    }

    #[test]
    fn test_param_inference() {
        assert_eq!(ParamValue::infer("true"), ParamValue::Bool(true));
        assert_eq!(ParamValue::infer("7"), ParamValue::from(7_i64));
        assert_eq!(ParamValue::infer("2.5"), ParamValue::from_f64(2.5).unwrap());
        assert_eq!(ParamValue::infer("van-12"), ParamValue::from("van-12"));

        let (key, value) = ExtraParams::parse_assignment("job_id=42").unwrap();
        assert_eq!(key, "job_id");
        assert_eq!(value, ParamValue::from(42_i64));
        assert!(ExtraParams::parse_assignment("no-equals").is_err());
        assert!(ExtraParams::parse_assignment("=1").is_err());
    }

    #[test]
    fn test_session_config_validation() {
        let config = SessionConfig::new("https://api.example.com/track", "Bearer t1");
        assert!(config.validate().is_ok());

        let empty_header = SessionConfig::new("https://api.example.com/track", "");
        assert!(matches!(empty_header.validate(), Err(Error::Config(_))));

        let empty_url = SessionConfig::new("  ", "Bearer t1");
        assert!(matches!(empty_url.validate(), Err(Error::Config(_))));

        let relative = SessionConfig::new("/track", "Bearer t1");
        assert!(matches!(relative.validate(), Err(Error::Config(_))));

        let ftp = SessionConfig::new("ftp://api.example.com/track", "Bearer t1");
        assert!(matches!(ftp.validate(), Err(Error::Config(_))));

        let bad_header = SessionConfig::new("https://api.example.com/track", "Bearer\nt1");
        assert!(matches!(bad_header.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_reserved_param_keys_rejected() {
        let params: ExtraParams = [("timestamp", 1_i64)].into_iter().collect();
        let config = SessionConfig::new("https://api.example.com/track", "Bearer t1")
            .with_extra_params(params);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
