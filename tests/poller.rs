//! Integration tests for the monitor's poll loop using wiremock.

use std::time::Duration;

use parking_relay::client::{ConnectionStatus, HoldMode, MonitorSettings, PollerHandle, StatePoller};
use parking_relay::error::PollError;
use parking_relay::occupancy::{OccupancySummary, SpotBands};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer, poll_interval: Duration) -> MonitorSettings {
    MonitorSettings {
        server_url: server.uri(),
        poll_interval,
        hold_window: Duration::from_secs(8),
        hold_mode: HoldMode::PerChannel,
        bands: SpotBands::default(),
    }
}

async fn mount_state(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/update"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn poll_applies_live_sample() {
    let server = MockServer::start().await;
    mount_state(
        &server,
        json!({ "distances": [15, 25, null], "led1": 1, "led2": 0, "active": 1, "timestamp": 1, "secondsSinceUpdate": 0 }),
    )
    .await;

    let (mut poller, display) = StatePoller::new(settings(&server, Duration::from_secs(2))).unwrap();
    assert!(poller.poll_once().await.unwrap());

    let snapshot = display.borrow().clone();
    assert_eq!(snapshot.distances, vec![Some(15.0), Some(25.0), None]);
    assert_eq!(snapshot.connection, ConnectionStatus::Connected);
    assert_eq!(
        snapshot.summary,
        OccupancySummary { total: 3, occupied: 1, available: 1, inactive: 1 }
    );
}

#[tokio::test]
async fn failed_poll_keeps_display() {
    let server = MockServer::start().await;
    mount_state(&server, json!({ "distances": [25, 40], "active": 1 })).await;

    let (mut poller, display) = StatePoller::new(settings(&server, Duration::from_secs(2))).unwrap();
    poller.poll_once().await.unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = poller.poll_once().await.unwrap_err();
    assert!(matches!(err, PollError::Status(s) if s.as_u16() == 500));

    let snapshot = display.borrow().clone();
    assert_eq!(snapshot.distances, vec![Some(25.0), Some(40.0)]);
    assert_eq!(snapshot.connection, ConnectionStatus::Error);
}

#[tokio::test]
async fn undecodable_body_keeps_display() {
    let server = MockServer::start().await;
    mount_state(&server, json!({ "distances": [25], "active": true })).await;

    let (mut poller, _display) = StatePoller::new(settings(&server, Duration::from_secs(2))).unwrap();
    poller.poll_once().await.unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = poller.poll_once().await.unwrap_err();
    assert!(matches!(err, PollError::Decode(_)));
    assert_eq!(poller.snapshot().distances, vec![Some(25.0)]);
}

#[tokio::test]
async fn stale_sample_clears_display_and_marks_disconnected() {
    let server = MockServer::start().await;
    mount_state(&server, json!({ "distances": [25, 300], "active": 1 })).await;

    let (mut poller, _display) = StatePoller::new(settings(&server, Duration::from_secs(2))).unwrap();
    poller.poll_once().await.unwrap();

    server.reset().await;
    mount_state(&server, json!({ "distances": [null, null], "active": 0 })).await;

    assert!(poller.poll_once().await.unwrap());
    let snapshot = poller.snapshot();
    assert_eq!(snapshot.distances, vec![None, None]);
    assert_eq!(snapshot.connection, ConnectionStatus::Disconnected);
    assert_eq!(
        snapshot.summary,
        OccupancySummary { total: 2, occupied: 0, available: 0, inactive: 2 }
    );
}

#[tokio::test]
async fn null_in_active_sample_is_held() {
    let server = MockServer::start().await;
    mount_state(&server, json!({ "distances": [25, 300], "active": 1 })).await;

    let (mut poller, _display) = StatePoller::new(settings(&server, Duration::from_secs(2))).unwrap();
    poller.poll_once().await.unwrap();

    server.reset().await;
    mount_state(&server, json!({ "distances": [null, 300], "active": 1 })).await;

    assert!(!poller.poll_once().await.unwrap());
    assert_eq!(poller.snapshot().distances, vec![Some(25.0), Some(300.0)]);
}

#[tokio::test]
async fn result_without_subscribers_is_discarded() {
    let server = MockServer::start().await;
    mount_state(&server, json!({ "distances": [25], "active": 1 })).await;

    let (mut poller, display) = StatePoller::new(settings(&server, Duration::from_secs(2))).unwrap();
    drop(display);

    assert!(!poller.poll_once().await.unwrap());
    assert!(poller.snapshot().distances.is_empty());
}

#[tokio::test]
async fn slow_relay_times_out_within_poll_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "distances": [25], "active": 1 }))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let (mut poller, _display) = StatePoller::new(settings(&server, Duration::from_millis(100))).unwrap();
    let err = poller.poll_once().await.unwrap_err();
    assert!(matches!(err, PollError::Timeout(100)));
    assert!(poller.snapshot().distances.is_empty());
}

#[tokio::test]
async fn spawned_poller_publishes_and_stops() {
    let server = MockServer::start().await;
    mount_state(&server, json!({ "distances": [25], "active": 1 })).await;

    let (handle, mut display) = PollerHandle::spawn(settings(&server, Duration::from_millis(50))).unwrap();

    tokio::time::timeout(Duration::from_secs(5), display.changed())
        .await
        .expect("no poll published")
        .unwrap();
    assert_eq!(display.borrow().distances, vec![Some(25.0)]);

    tokio::time::timeout(Duration::from_secs(5), handle.stop())
        .await
        .expect("poller did not stop");
}
