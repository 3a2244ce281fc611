//! A registered peer's non-owning handle: the shared state the dispatcher,
//! supervisor and admin surface are allowed to touch without owning the socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::Instant;

use crate::congestion::ControllerSnapshot;
use crate::send_pipeline::SendCommand;

/// Coarse connection phase, tracked for diagnostics; the authoritative
/// liveness signal is the `running` flag plus `last_heartbeat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Connected,
    Closing,
    Closed,
}

/// Shared, cloneable reference to one live connection. The registry stores
/// these; the socket halves themselves live only inside the receive and send
/// tasks this handle was spawned alongside.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub client_id: String,
    pub remote_addr: SocketAddr,
    username: Arc<RwLock<String>>,
    state: Arc<Mutex<ConnectionState>>,
    running: Arc<AtomicBool>,
    last_heartbeat: Arc<Mutex<Instant>>,
    send_tx: mpsc::Sender<SendCommand>,
    snapshot_rx: watch::Receiver<ControllerSnapshot>,
    next_seq: Arc<AtomicU64>,
}

impl ConnectionHandle {
    pub fn new(
        client_id: String,
        remote_addr: SocketAddr,
        send_tx: mpsc::Sender<SendCommand>,
    ) -> Self {
        let (_tx, rx) = watch::channel(ControllerSnapshot::default());
        Self::with_snapshot(client_id, remote_addr, send_tx, rx)
    }

    pub fn with_snapshot(
        client_id: String,
        remote_addr: SocketAddr,
        send_tx: mpsc::Sender<SendCommand>,
        snapshot_rx: watch::Receiver<ControllerSnapshot>,
    ) -> Self {
        ConnectionHandle {
            client_id,
            remote_addr,
            username: Arc::new(RwLock::new(String::new())),
            state: Arc::new(Mutex::new(ConnectionState::Handshaking)),
            running: Arc::new(AtomicBool::new(true)),
            last_heartbeat: Arc::new(Mutex::new(Instant::now())),
            send_tx,
            snapshot_rx,
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Next value in this peer's own monotonic outbound sequence, used to stamp
    /// every server-originated message this connection receives (acks, pings,
    /// broadcasts alike) so they never collide on `0`.
    pub fn next_sequence(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// The most recent congestion/flow snapshot published by the owning send
    /// task. Never blocks: `watch` always has the last published value.
    pub fn controller_snapshot(&self) -> ControllerSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn username(&self) -> String {
        self.username.read().await.clone()
    }

    pub async fn set_username(&self, name: String) {
        *self.username.write().await = name;
        *self.state.lock().await = ConnectionState::Connected;
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub async fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock().await = Instant::now();
    }

    pub async fn idle_for(&self) -> std::time::Duration {
        self.last_heartbeat.lock().await.elapsed()
    }

    /// Queues `msg` on this peer's send pipeline. Silently ignored once the
    /// connection is closing: the caller should not have to special-case a
    /// race against disconnect.
    pub async fn enqueue(&self, msg: crate::message::Message) {
        if !self.is_running() {
            return;
        }
        let _ = self.send_tx.send(SendCommand::Enqueue(msg)).await;
    }

    pub async fn notify_ack(&self, msg_id: String, ack_seq: u64) {
        let _ = self
            .send_tx
            .send(SendCommand::NotifyAck { msg_id, ack_seq })
            .await;
    }

    /// Idempotent: a second call observes `running` already false and no-ops.
    pub async fn close(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        *self.state.lock().await = ConnectionState::Closing;
        let _ = self.send_tx.send(SendCommand::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle() -> (ConnectionHandle, mpsc::Receiver<SendCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let h = ConnectionHandle::new(
            "client_1_0001".into(),
            "127.0.0.1:9000".parse().unwrap(),
            tx,
        );
        (h, rx)
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (h, mut rx) = handle();
        h.close().await;
        h.close().await;
        assert!(!h.is_running());
        assert_eq!(rx.recv().await, Some(SendCommand::Shutdown));
        // A second Shutdown was never sent.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn enqueue_after_close_is_a_silent_no_op() {
        let (h, mut rx) = handle();
        h.close().await;
        let _ = rx.recv().await;
        h.enqueue(crate::message::Message::new(
            "m1",
            crate::message::MessageType::Chat,
            "alice",
            "hi",
            0.0,
            1,
        ))
        .await;
        assert!(rx.try_recv().is_err());
    }
}
