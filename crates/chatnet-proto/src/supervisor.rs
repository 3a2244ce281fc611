//! Liveness sweep over the registry: pings idle peers, reaps dead ones.
//!
//! Grounded on the teacher's `RakNetServer::cleanup_sessions` (5s scan interval,
//! timeout-based removal), generalized from a single flat timeout to the
//! two-stage ping-then-reap schedule this protocol specifies.

use std::time::Duration;

use log::info;
use tokio::time::{interval, sleep};

use crate::dispatcher::Dispatcher;
use crate::message::{Message, MessageType};
use crate::registry::Registry;
use crate::utils::{generate_msg_id, unix_timestamp};

const SCAN_INTERVAL: Duration = Duration::from_secs(5);
/// Defaults used when the caller has no more specific configuration.
pub const DEFAULT_PING_THRESHOLD: Duration = Duration::from_secs(10);
pub const DEFAULT_DEAD_THRESHOLD: Duration = Duration::from_secs(30);

/// Runs until `shutdown` resolves. One process-wide instance. `ping_threshold`
/// and `dead_threshold` come from the loaded configuration.
pub async fn run(
    registry: Registry,
    dispatcher: Dispatcher,
    shutdown: tokio::sync::watch::Receiver<bool>,
    ping_threshold: Duration,
    dead_threshold: Duration,
) {
    let mut ticker = interval(SCAN_INTERVAL);
    let mut shutdown = shutdown;
    loop {
        tokio::select! {
            _ = ticker.tick() => scan_once(&registry, &dispatcher, ping_threshold, dead_threshold).await,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn scan_once(registry: &Registry, dispatcher: &Dispatcher, ping_threshold: Duration, dead_threshold: Duration) {
    for conn in registry.snapshot() {
        let idle = conn.idle_for().await;
        if idle > dead_threshold {
            let username = conn.username().await;
            info!(target: "chatnet::supervisor", "{} idle for {idle:?}, reaping", conn.client_id);
            registry.remove(&conn.client_id);
            conn.close().await;
            dispatcher.announce_departure(&conn.client_id, &username).await;
        } else if idle > ping_threshold {
            let ping = Message::new(
                generate_msg_id("srv"),
                MessageType::Heartbeat,
                "server",
                "ping",
                unix_timestamp(),
                conn.next_sequence(),
            );
            conn.enqueue(ping).await;
        }
    }
}

/// Used only by tests that want a deterministic single sweep without waiting
/// on the real 5-second ticker.
pub async fn scan_once_for_test(registry: &Registry, dispatcher: &Dispatcher) {
    scan_once(registry, dispatcher, DEFAULT_PING_THRESHOLD, DEFAULT_DEAD_THRESHOLD).await;
    sleep(Duration::from_millis(1)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn a_fresh_connection_is_neither_pinged_nor_reaped() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let conn = ConnectionHandle::new("c1".into(), "127.0.0.1:1".parse().unwrap(), tx);
        registry.insert(conn);

        scan_once_for_test(&registry, &dispatcher).await;
        assert_eq!(registry.len(), 1);
        assert!(rx.try_recv().is_err());
    }
}
