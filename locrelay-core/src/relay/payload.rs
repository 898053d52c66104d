//! Wire format for the tracking endpoint
//!
//! Every event is posted as:
//!
//! ```text
//! { "job_tracking": { "latitude": <f64>, "longitude": <f64>, "timestamp": <unix secs>, ...extra } }
//! ```

use serde::Serialize;

use crate::types::{ExtraParams, LocationEvent};

/// Request body for one tracking POST
#[derive(Debug, Serialize)]
pub struct TrackingPayload<'a> {
    job_tracking: JobTracking<'a>,
}

#[derive(Debug, Serialize)]
struct JobTracking<'a> {
    latitude: f64,
    longitude: f64,
    timestamp: i64,
    #[serde(flatten)]
    extra: &'a ExtraParams,
}

impl<'a> TrackingPayload<'a> {
    pub fn new(event: &LocationEvent, extra: &'a ExtraParams) -> Self {
        Self {
            job_tracking: JobTracking {
                latitude: event.latitude,
                longitude: event.longitude,
                timestamp: event.captured_at,
                extra,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let event = LocationEvent::new(10.0, 20.0, 1_700_000_000);
        let extra = ExtraParams::new();

        let body = serde_json::to_value(TrackingPayload::new(&event, &extra)).unwrap();
        assert_eq!(
            body,
            json!({
                "job_tracking": {
                    "latitude": 10.0,
                    "longitude": 20.0,
                    "timestamp": 1_700_000_000
                }
            })
        );
    }

    #[test]
    fn test_extra_params_are_flattened() {
        let event = LocationEvent::new(-33.5, 151.25, 1_700_000_123);
        let mut extra = ExtraParams::new();
        extra.insert("job_id", 42_i64);
        extra.insert("driver", "ana");
        extra.insert("on_duty", true);

        let body = serde_json::to_value(TrackingPayload::new(&event, &extra)).unwrap();
        let tracking = &body["job_tracking"];
        assert_eq!(tracking["timestamp"], json!(1_700_000_123));
        assert_eq!(tracking["job_id"], json!(42));
        assert!(tracking["job_id"].is_i64());
        assert_eq!(tracking["driver"], json!("ana"));
        assert_eq!(tracking["on_duty"], json!(true));
        assert_eq!(tracking.as_object().unwrap().len(), 6);
    }
}
