//! Per-connection inbound path: the sole owner of a peer's read half.
//!
//! Grounded on the teacher's `RakNetServer::handle_incoming_packet`, but reads
//! one length-prefixed frame at a time off a byte stream instead of one
//! datagram at a time off a socket.

use std::sync::Arc;

use log::{trace, warn};
use tokio::io::AsyncRead;

use chatnet_wire::WireError;

use crate::connection::ConnectionHandle;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::ProtocolError;
use crate::fault_injector::FaultInjector;
use crate::message::{Message, MessageType};
use crate::metrics::Metrics;
use crate::utils::{generate_msg_id, unix_timestamp};
use crate::MAX_MESSAGE_SIZE;

/// Reads frames off `reader` until EOF, a fatal frame error, or a LEAVE, then
/// closes the connection. `conn` is this peer's own handle: acks and replies
/// synthesized here are enqueued on its own send pipeline.
pub async fn run<R>(
    mut reader: R,
    conn: ConnectionHandle,
    dispatcher: Dispatcher,
    injector: Arc<FaultInjector>,
    metrics: Arc<Metrics>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        if !conn.is_running() {
            break;
        }

        let frame = match chatnet_wire::read_frame(&mut reader, MAX_MESSAGE_SIZE).await {
            Ok(f) => f,
            Err(WireError::UnexpectedEof) => {
                trace!(target: "chatnet::recv", "{} peer closed the stream", conn.client_id);
                break;
            }
            Err(e) => {
                warn!(target: "chatnet::recv", "{} fatal frame error: {e}", conn.client_id);
                break;
            }
        };

        if !injector.apply().await {
            trace!(target: "chatnet::recv", "{} frame dropped by fault injector", conn.client_id);
            continue;
        }

        metrics.record_frame(frame.len());

        let msg = match Message::decode(&frame) {
            Ok(msg) => msg,
            Err(ProtocolError::ChecksumMismatch { msg_id }) => {
                metrics.checksum_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                warn!(target: "chatnet::recv", "{} checksum mismatch for {msg_id}", conn.client_id);
                continue;
            }
            Err(e) => {
                metrics.decode_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                warn!(target: "chatnet::recv", "{} decode failure: {e}", conn.client_id);
                continue;
            }
        };

        if msg.msg_type != MessageType::Ack {
            let ack = Message::new_ack(
                generate_msg_id("ack"),
                "server",
                &msg.msg_id,
                unix_timestamp(),
                conn.next_sequence(),
            );
            conn.enqueue(ack).await;
        }

        if let Some(DispatchOutcome::InitiateClose) = dispatch(&conn, &dispatcher, msg).await {
            break;
        }
    }

    let username = conn.username().await;
    conn.close().await;
    dispatcher.announce_departure(&conn.client_id, &username).await;
}

async fn dispatch(
    conn: &ConnectionHandle,
    dispatcher: &Dispatcher,
    msg: Message,
) -> Option<DispatchOutcome> {
    match msg.msg_type {
        MessageType::Join => {
            if let Err(e) = dispatcher.handle_join(conn, &msg.content).await {
                warn!(target: "chatnet::recv", "{} rejected join: {e}", conn.client_id);
            }
            None
        }
        MessageType::Chat => {
            dispatcher.handle_chat(conn, &msg.content).await;
            None
        }
        MessageType::Leave => Some(dispatcher.handle_leave(conn).await),
        MessageType::Heartbeat => {
            dispatcher.handle_heartbeat(conn, &msg.content).await;
            None
        }
        MessageType::Ack => {
            match msg.ack_for() {
                Ok(target_id) => conn.notify_ack(target_id, msg.sequence_number).await,
                Err(e) => warn!(target: "chatnet::recv", "{} malformed ack: {e}", conn.client_id),
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use tokio::io::duplex;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn a_chat_frame_earns_exactly_one_ack() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let (client_write, server_read) = duplex(4096);
        let (send_tx, mut send_rx) = mpsc::channel(8);
        let conn = ConnectionHandle::new("c1".into(), "127.0.0.1:1".parse().unwrap(), send_tx);
        registry.insert(conn.clone());

        let msg = Message::new("m1", MessageType::Chat, "alice", "hi", 0.0, 1);
        let mut client_write = client_write;
        chatnet_wire::write_frame(&mut client_write, &msg.encode()).await.unwrap();
        drop(client_write);

        run(
            server_read,
            conn,
            dispatcher,
            Arc::new(FaultInjector::default()),
            Arc::new(Metrics::default()),
        )
        .await;

        let cmd = send_rx.recv().await.unwrap();
        match cmd {
            crate::send_pipeline::SendCommand::Enqueue(ack) => {
                assert_eq!(ack.msg_type, MessageType::Ack);
                assert_eq!(ack.ack_for().unwrap(), "m1");
            }
            other => panic!("expected an enqueued ack, got {other:?}"),
        }
    }
}
