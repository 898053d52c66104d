//! Integration tests for the delivery pipeline
//!
//! A wiremock server stands in for the tracking endpoint. Sessions run
//! with a manual clock and a reachability flag so offline periods and
//! capture times are deterministic.

use std::sync::Arc;
use std::time::Duration;

use locrelay_core::connectivity::ReachabilityFlag;
use locrelay_core::relay::{Session, SessionOptions};
use locrelay_core::time::ManualClock;
use locrelay_core::{ExtraParams, LocationEvent, SessionConfig};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const T: i64 = 1_700_000_000;

struct Harness {
    server: MockServer,
    clock: ManualClock,
    network: ReachabilityFlag,
}

impl Harness {
    async fn new() -> Self {
        locrelay_core::logging::init_test();
        Self {
            server: MockServer::start().await,
            clock: ManualClock::new(T),
            network: ReachabilityFlag::new(true),
        }
    }

    fn url(&self) -> String {
        format!("{}/track", self.server.uri())
    }

    fn start(&self, config: SessionConfig) -> Session {
        let options = SessionOptions {
            reachability: Arc::new(self.network.clone()),
            clock: Arc::new(self.clock.clone()),
            ..Default::default()
        };
        Session::start(config, options).expect("session should start")
    }

    fn start_default(&self) -> Session {
        self.start(SessionConfig::new(self.url(), "Bearer t1"))
    }

    async fn respond_with(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/track"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    async fn bodies(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .expect("request recording enabled")
            .iter()
            .map(|r| r.body_json::<Value>().expect("JSON body"))
            .collect()
    }
}

#[tokio::test]
async fn delivered_fix_is_never_queued() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .and(path("/track"))
        .and(header("Authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&h.server)
        .await;

    let session = h.start_default();
    session.on_fix_received(10.0, 20.0);
    session.wait_idle().await;

    assert_eq!(session.pending(), 0);
    assert_eq!(session.stats().delivered, 1);
    assert_eq!(
        h.bodies().await,
        vec![json!({
            "job_tracking": { "latitude": 10.0, "longitude": 20.0, "timestamp": T }
        })]
    );

    session.stop().await;
}

#[tokio::test]
async fn non_2xx_response_queues_event() {
    let h = Harness::new().await;
    h.respond_with(500).await;

    let session = h.start_default();
    session.on_fix_received(10.0, 20.0);
    session.wait_idle().await;

    assert_eq!(session.queued_events(), vec![LocationEvent::new(10.0, 20.0, T)]);
    assert_eq!(session.stats().enqueued, 1);

    session.stop().await;
}

#[tokio::test]
async fn transport_failure_queues_event() {
    let h = Harness::new().await;

    // Reachable by the flag, but nothing listens on the port
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let session = h.start(SessionConfig::new(
        format!("http://127.0.0.1:{port}/track"),
        "Bearer t1",
    ));
    session.on_fix_received(10.0, 20.0);
    session.wait_idle().await;

    assert_eq!(session.queued_events(), vec![LocationEvent::new(10.0, 20.0, T)]);
    let stats = session.stats();
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.delivered, 0);

    session.stop().await;
}

#[tokio::test]
async fn offline_fix_is_retried_with_original_timestamp() {
    let h = Harness::new().await;
    h.respond_with(200).await;

    let session = h.start_default();

    h.network.set(false);
    session.on_fix_received(10.0, 20.0);
    session.wait_idle().await;
    assert_eq!(session.queued_events(), vec![LocationEvent::new(10.0, 20.0, T)]);
    assert!(h.bodies().await.is_empty());

    // Reconnect five minutes later
    h.clock.advance(300);
    h.network.set(true);
    session.on_connectivity_restored();
    session.wait_idle().await;

    assert_eq!(session.pending(), 0);
    let stats = session.stats();
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.retry_delivered, 1);

    let bodies = h.bodies().await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["job_tracking"]["timestamp"], json!(T));

    session.stop().await;
}

#[tokio::test]
async fn failed_retry_drops_event() {
    let h = Harness::new().await;
    h.respond_with(503).await;

    let session = h.start_default();

    h.network.set(false);
    session.on_fix_received(10.0, 20.0);
    session.wait_idle().await;
    assert_eq!(session.pending(), 1);

    h.network.set(true);
    session.on_connectivity_restored();
    session.wait_idle().await;

    // At most one retry: the event is gone even though it never arrived
    assert_eq!(session.pending(), 0);
    let stats = session.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.retry_delivered, 0);
    assert_eq!(h.bodies().await.len(), 1);

    // A second signal has nothing left to retry
    session.on_connectivity_restored();
    session.wait_idle().await;
    assert_eq!(h.bodies().await.len(), 1);

    session.stop().await;
}

#[tokio::test]
async fn failures_during_drain_wait_for_next_signal() {
    const QUEUED: usize = 5;
    const DURING_DRAIN: usize = 3;

    let h = Harness::new().await;
    Mock::given(method("POST"))
        .and(path("/track"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(200)))
        .mount(&h.server)
        .await;

    let session = h.start_default();

    h.network.set(false);
    for n in 0..QUEUED {
        session.on_fix_received(n as f64, 0.0);
    }
    session.wait_idle().await;
    assert_eq!(session.pending(), QUEUED);

    h.network.set(true);
    session.on_connectivity_restored();
    assert_eq!(session.pending(), 0);

    // These fail while the retries are still in flight
    h.clock.advance(10);
    for n in 0..DURING_DRAIN {
        session.on_fix_received(50.0 + n as f64, 0.0);
    }
    session.wait_idle().await;

    let queued = session.queued_events();
    assert_eq!(queued.len(), DURING_DRAIN);
    assert!(queued.iter().all(|e| e.captured_at == T + 10));

    let stats = session.stats();
    assert_eq!(stats.retried, QUEUED as u64);
    assert_eq!(stats.dropped, QUEUED as u64);
    assert_eq!(stats.enqueued, (QUEUED + DURING_DRAIN) as u64);
    assert_eq!(h.bodies().await.len(), QUEUED + DURING_DRAIN);

    session.stop().await;
}

#[tokio::test]
async fn extra_params_are_sent_with_every_event() {
    let h = Harness::new().await;
    h.respond_with(200).await;

    let params = ExtraParams::from_json_str(r#"{"job_id": 42, "vehicle": "van-12"}"#).unwrap();
    let session = h.start(SessionConfig::new(h.url(), "Bearer t1").with_extra_params(params));

    session.on_fix_received(10.0, 20.0);
    session.wait_idle().await;

    assert_eq!(
        h.bodies().await,
        vec![json!({
            "job_tracking": {
                "latitude": 10.0,
                "longitude": 20.0,
                "timestamp": T,
                "job_id": 42,
                "vehicle": "van-12"
            }
        })]
    );

    session.stop().await;
}

#[tokio::test]
async fn stop_discards_results_of_in_flight_requests() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .and(path("/track"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(300)))
        .mount(&h.server)
        .await;

    let session = h.start_default();
    session.on_fix_received(10.0, 20.0);

    let stats = session.stop().await;
    assert_eq!(stats.fixes_received, 1);
    assert_eq!(stats.enqueued, 0);

    // Let the request finish; nothing observes it
    tokio::time::sleep(Duration::from_millis(400)).await;
}
