#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use feed_notify::hub::NotificationHub;
use feed_notify::report::{ErrorInfo, ErrorKind, ErrorReporter};
use feed_notify::status::ConnectionStatusObserver;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::common::{MockWsServer, TIMEOUT, dead_endpoint};

async fn wait_connected(rx: &mut watch::Receiver<bool>, expected: bool) {
    timeout(TIMEOUT, rx.wait_for(|connected| *connected == expected))
        .await
        .unwrap()
        .unwrap();
}

/// Start a session against `server` and wait until it is open.
async fn connected_hub(server: &mut MockWsServer, reporter: ErrorReporter) -> NotificationHub {
    let hub = NotificationHub::with_endpoint(reporter, server.endpoint());
    let mut connected = hub.connected_receiver();

    hub.connect(7, "secret".to_owned()).await;
    server.next_connection().await.unwrap();
    wait_connected(&mut connected, true).await;
    assert_eq!(server.recv().await.as_deref(), Some("ping"));

    hub
}

fn error_feed(reporter: &ErrorReporter) -> mpsc::UnboundedReceiver<ErrorInfo> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _handle = reporter.add_listener(move |error| drop(tx.send(error.clone())));
    rx
}

async fn next_error(rx: &mut mpsc::UnboundedReceiver<ErrorInfo>) -> ErrorInfo {
    timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap()
}

mod routing {
    use super::*;

    #[tokio::test]
    async fn notifications_reach_listeners_in_registration_order() {
        let mut server = MockWsServer::start().await;
        let hub = connected_hub(&mut server, ErrorReporter::new()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        for name in ["first", "second"] {
            let tx = tx.clone();
            let _handle = hub.add_listener(move |notification| {
                drop(tx.send((name, notification.data.clone())));
            });
        }

        server.send(r#"{"type":"keepalive"}"#);
        server.send(
            &json!({
                "type": "notification",
                "sender": {"id": 3, "username": "ana"},
                "data": {"kind": "comment", "post_id": 12}
            })
            .to_string(),
        );

        let first = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        let second = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, ("first", json!({"kind": "comment", "post_id": 12})));
        assert_eq!(second, ("second", json!({"kind": "comment", "post_id": 12})));

        // The keepalive before it was never delivered
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_listener_does_not_block_others() {
        let mut server = MockWsServer::start().await;
        let hub = connected_hub(&mut server, ErrorReporter::new()).await;

        let _bad = hub.add_listener(|_| panic!("listener failure"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _good = hub.add_listener(move |notification| {
            drop(tx.send(notification.sender.clone()));
        });

        for id in [1, 2] {
            server.send(&json!({"type": "notification", "sender": {"id": id}, "data": {}}).to_string());
        }

        assert_eq!(timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap(), json!({"id": 1}));
        assert_eq!(timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap(), json!({"id": 2}));
        assert!(hub.is_connected());
    }

    #[tokio::test]
    async fn removed_listener_stops_receiving() {
        let mut server = MockWsServer::start().await;
        let hub = connected_hub(&mut server, ErrorReporter::new()).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handle = hub.add_listener(move |notification| {
            sink.lock().unwrap().push(notification.data.clone());
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _probe = hub.add_listener(move |_| drop(tx.send(())));

        server.send(r#"{"type":"notification","sender":{},"data":1}"#);
        timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        handle.remove();
        server.send(r#"{"type":"notification","sender":{},"data":2}"#);
        timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();

        assert_eq!(*received.lock().unwrap(), vec![json!(1)]);
    }
}

mod session {
    use super::*;

    #[tokio::test]
    async fn connect_replaces_previous_session() {
        let mut server = MockWsServer::start().await;
        let hub = connected_hub(&mut server, ErrorReporter::new()).await;

        hub.connect(8, "other".to_owned()).await;

        let uri = server.next_connection().await.unwrap();
        assert_eq!(uri, "/ws/8?token=other");
        wait_connected(&mut hub.connected_receiver(), true).await;
        assert!(hub.is_connected());
        assert!(
            server
                .no_connection_within(Duration::from_millis(300))
                .await
        );
    }

    #[tokio::test]
    async fn disconnect_resets_state_and_forgets_session() {
        let mut server = MockWsServer::start().await;
        let hub = connected_hub(&mut server, ErrorReporter::new()).await;

        hub.disconnect().await;

        assert!(!hub.is_connected());
        assert!(!*hub.connected_receiver().borrow());
        assert!(!hub.reconnect().await);
        assert!(
            server
                .no_connection_within(Duration::from_millis(300))
                .await
        );
    }

    #[tokio::test]
    async fn reconnect_restarts_current_session() {
        let mut server = MockWsServer::start().await;
        let hub = connected_hub(&mut server, ErrorReporter::new()).await;

        assert!(hub.reconnect().await);

        assert_eq!(
            server.next_connection().await.as_deref(),
            Some("/ws/7?token=secret")
        );
        wait_connected(&mut hub.connected_receiver(), true).await;
    }

    #[tokio::test]
    async fn observer_retry_reconnects_through_hub() {
        let mut server = MockWsServer::start().await;
        let reporter = ErrorReporter::new();
        let hub = connected_hub(&mut server, reporter.clone()).await;
        let observer = ConnectionStatusObserver::new(reporter, true).with_hub(hub.clone());

        observer.retry().await;

        server.next_connection().await.unwrap();
        wait_connected(&mut hub.connected_receiver(), true).await;
    }
}

mod errors {
    use super::*;

    #[tokio::test]
    async fn connection_failures_reach_the_reporter() {
        let reporter = ErrorReporter::new();
        let mut errors = error_feed(&reporter);
        let hub = NotificationHub::with_endpoint(reporter.clone(), dead_endpoint().await);

        hub.connect(7, "secret".to_owned()).await;

        let error = next_error(&mut errors).await;
        assert_eq!(error.kind(), ErrorKind::WebSocket);
        assert_eq!(error.message(), "Notifications: Unable to connect to server");
        let details = error.details().unwrap();
        assert_eq!(details["readyState"], 0);
        assert!(!details["url"].as_str().unwrap().contains("secret"));
        assert!(!hub.is_connected());

        hub.disconnect().await;
    }

    #[tokio::test]
    async fn parse_errors_are_reported_but_keep_the_session_connected() {
        let mut server = MockWsServer::start().await;
        let reporter = ErrorReporter::new();
        let mut errors = error_feed(&reporter);
        let hub = connected_hub(&mut server, reporter.clone()).await;

        server.send("{broken");

        let error = next_error(&mut errors).await;
        assert_eq!(error.kind(), ErrorKind::WebSocket);
        assert_eq!(error.message(), "Failed to parse message from server");
        assert!(hub.is_connected());
        assert!(*hub.connected_receiver().borrow());
    }

    #[tokio::test]
    async fn observer_flags_websocket_trouble() {
        let reporter = ErrorReporter::new();
        let observer = ConnectionStatusObserver::new(reporter.clone(), true);
        let mut errors = error_feed(&reporter);
        let hub = NotificationHub::with_endpoint(reporter.clone(), dead_endpoint().await);

        hub.connect(7, "secret".to_owned()).await;
        next_error(&mut errors).await;

        assert!(observer.has_websocket_errors());
        assert!(observer.has_recent_errors());
        assert!(reporter.has_recent_errors(
            ErrorKind::WebSocket,
            ErrorReporter::DEFAULT_RECENT_WINDOW
        ));

        hub.disconnect().await;
    }
}
