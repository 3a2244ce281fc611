//! Interactive CLI client: the external collaborator that exercises the wire
//! contract symmetrically with the server (§4.9 of the design: the client's
//! own send pipeline retransmits up to the same cap as the server's).

use std::io::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chatnet_proto::message::{Message, MessageType};
use chatnet_proto::send_pipeline::{SendCommand, SendPipeline};
use chatnet_proto::utils::{generate_msg_id, unix_timestamp};
use chatnet_proto::{ACK_TIMEOUT, HEARTBEAT_INTERVAL, MAX_MESSAGE_SIZE};
use log::{error, info, warn, Level};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use chatnet_log::ChatNetLogger;

#[tokio::main]
async fn main() {
    ChatNetLogger::init(Level::Info).expect("logger already initialized");

    let mut args = std::env::args().skip(1);
    let server_addr = args.next().unwrap_or_else(|| "127.0.0.1:8888".to_string());
    let username = args.next().unwrap_or_else(|| "guest".to_string());

    let stream = match TcpStream::connect(&server_addr).await {
        Ok(s) => s,
        Err(e) => {
            error!("failed to connect to {server_addr}: {e}");
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();

    let (send_tx, send_rx) = mpsc::channel::<SendCommand>(256);
    let (snap_tx, _snap_rx) = watch::channel(Default::default());
    let pipeline = SendPipeline::new(username.clone(), write_half, send_rx, snap_tx);
    tokio::spawn(pipeline.run());

    let sequence = Arc::new(AtomicU64::new(0));

    let recv_tx = send_tx.clone();
    let recv_sequence = sequence.clone();
    tokio::spawn(receive_loop(read_half, recv_tx, recv_sequence));

    let hb_tx = send_tx.clone();
    let hb_sequence = sequence.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            let seq = hb_sequence.fetch_add(1, Ordering::Relaxed);
            let msg = Message::new(generate_msg_id("hb"), MessageType::Heartbeat, "client", "ping", unix_timestamp(), seq);
            if hb_tx.send(SendCommand::Enqueue(msg)).await.is_err() {
                break;
            }
        }
    });

    let join_seq = sequence.fetch_add(1, Ordering::Relaxed);
    let join = Message::new(generate_msg_id("join"), MessageType::Join, &username, username.clone(), unix_timestamp(), join_seq);
    if send_tx.send(SendCommand::Enqueue(join)).await.is_err() {
        error!("failed to send join");
        return;
    }
    info!("connected to {server_addr} as {username} (ack timeout {:?})", ACK_TIMEOUT);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            let seq = sequence.fetch_add(1, Ordering::Relaxed);
            let leave = Message::new(generate_msg_id("leave"), MessageType::Leave, &username, "", unix_timestamp(), seq);
            let _ = send_tx.send(SendCommand::Enqueue(leave)).await;
            break;
        }
        if line == "/stats" {
            println!("(stats are served by the admin surface, not this client)");
            std::io::stdout().flush().ok();
            continue;
        }
        let seq = sequence.fetch_add(1, Ordering::Relaxed);
        let chat = Message::new(generate_msg_id("chat"), MessageType::Chat, &username, line, unix_timestamp(), seq);
        if send_tx.send(SendCommand::Enqueue(chat)).await.is_err() {
            break;
        }
    }
}

async fn receive_loop(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    send_tx: mpsc::Sender<SendCommand>,
    sequence: Arc<AtomicU64>,
) {
    loop {
        let frame = match chatnet_wire::read_frame(&mut reader, MAX_MESSAGE_SIZE).await {
            Ok(f) => f,
            Err(_) => break,
        };
        let msg = match Message::decode(&frame) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropped malformed frame: {e}");
                continue;
            }
        };
        match msg.msg_type {
            MessageType::Ack => {
                if let Ok(target_id) = msg.ack_for() {
                    let _ = send_tx
                        .send(SendCommand::NotifyAck {
                            msg_id: target_id,
                            ack_seq: msg.sequence_number,
                        })
                        .await;
                }
            }
            MessageType::Heartbeat => {
                let seq = sequence.fetch_add(1, Ordering::Relaxed);
                let ack = Message::new_ack(generate_msg_id("ack"), "client", &msg.msg_id, unix_timestamp(), seq);
                let _ = send_tx.send(SendCommand::Enqueue(ack)).await;
            }
            _ => {
                println!("{}", msg.content);
                std::io::stdout().flush().ok();
                let seq = sequence.fetch_add(1, Ordering::Relaxed);
                let ack = Message::new_ack(generate_msg_id("ack"), "client", &msg.msg_id, unix_timestamp(), seq);
                let _ = send_tx.send(SendCommand::Enqueue(ack)).await;
            }
        }
    }
}
