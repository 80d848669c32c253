//! Real-time notification example: listens for notifications of one user and prints the
//! connection health the way a page banner would show it.
//!
//! Run with tracing enabled:
//! ```sh
//! FEED_USER_ID=7 FEED_TOKEN=... RUST_LOG=info cargo run --example notifications --features tracing
//! ```
//!
//! Optionally point it at another server or log to a file:
//! ```sh
//! FEED_WS_ENDPOINT=ws://localhost:8000 LOG_FILE=notifications.log RUST_LOG=debug cargo run --example notifications --features tracing
//! ```

use std::fs::File;
use std::time::Duration;

use feed_notify::hub::NotificationHub;
use feed_notify::report::ErrorReporter;
use feed_notify::status::{ConnectionStatusObserver, DEFAULT_OFFLINE_GRACE, OfflineNotice};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let user_id: u64 = std::env::var("FEED_USER_ID")?.parse()?;
    let token = std::env::var("FEED_TOKEN")?;

    let reporter = ErrorReporter::new();
    reporter.install_panic_hook();

    let hub = match std::env::var("FEED_WS_ENDPOINT") {
        Ok(endpoint) => NotificationHub::with_endpoint(reporter.clone(), endpoint),
        Err(_) => NotificationHub::new(reporter.clone()),
    };
    let observer = ConnectionStatusObserver::new(reporter.clone(), true).with_hub(hub.clone());
    let notice = OfflineNotice::spawn(hub.connected_receiver(), DEFAULT_OFFLINE_GRACE);

    let _notifications = hub.add_listener(|notification| {
        info!(
            sender = %notification.sender,
            data = %notification.data,
            "notification"
        );
    });
    let _errors = reporter.add_listener(|error| {
        warn!(
            kind = %error.kind(),
            message = error.user_friendly_message(),
            "connection trouble"
        );
    });

    hub.connect(user_id, token).await;

    let mut banner = notice.receiver();
    let mut websocket_errors = observer.websocket_errors_receiver();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Ok(()) = banner.changed() => {
                if *banner.borrow_and_update() {
                    warn!("offline, retrying in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    observer.retry().await;
                } else {
                    info!(state = %hub.connection_state(), "back online");
                }
            }
            Ok(()) = websocket_errors.changed() => {
                let recent = *websocket_errors.borrow_and_update();
                info!(recent, errors = observer.errors().len(), "websocket health changed");
            }
        }
    }

    hub.disconnect().await;
    info!(recent_errors = reporter.recent_errors(10).len(), "stopped");

    Ok(())
}
