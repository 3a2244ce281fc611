//! Ties the acceptor, registry, supervisor, dispatcher and admin surface
//! together into one running service.
//!
//! Grounded on the teacher's `RakNetServer::run` (`tokio::select!` between the
//! accept/recv path and a periodic tick), generalized from one UDP socket to
//! two TCP listeners plus a supervisor task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::admin::{self, AdminRequest, AdminState};
use crate::connection::ConnectionHandle;
use crate::dispatcher::Dispatcher;
use crate::fault_injector::FaultInjector;
use crate::metrics::Metrics;
use crate::receive_pipeline;
use crate::registry::Registry;
use crate::send_pipeline::SendPipeline;
use crate::utils::generate_client_id;

pub struct ServerConfig {
    pub chat_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub initial_packet_loss_rate: f64,
    pub initial_artificial_delay: Duration,
    /// How long a connection may sit idle before the supervisor proactively pings it.
    pub heartbeat_interval: Duration,
    /// How long a connection may sit idle before the supervisor reaps it.
    pub idle_timeout: Duration,
    /// Seeds each new connection's congestion controller's initial RTO.
    pub ack_timeout: Duration,
    /// Per-message retransmission cap before a send pipeline gives up on it.
    pub max_retransmissions: u32,
}

pub struct ChatServer {
    config: ServerConfig,
    registry: Registry,
    dispatcher: Dispatcher,
    injector: Arc<FaultInjector>,
    metrics: Arc<Metrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let injector = Arc::new(FaultInjector::new(
            config.initial_packet_loss_rate,
            config.initial_artificial_delay,
        ));
        let (shutdown_tx, _rx) = watch::channel(false);
        ChatServer {
            config,
            registry,
            dispatcher,
            injector,
            metrics: Arc::new(Metrics::default()),
            shutdown_tx,
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Binds both listeners and runs until a shutdown is requested, either
    /// through `shutdown_tx` or the admin `shutdown` command.
    pub async fn run(&self) -> std::io::Result<()> {
        let chat_listener = TcpListener::bind(self.config.chat_addr).await?;
        let admin_listener = TcpListener::bind(self.config.admin_addr).await?;
        info!(target: "chatnet::server", "chat listening on {}", self.config.chat_addr);
        info!(target: "chatnet::server", "admin listening on {}", self.config.admin_addr);

        let supervisor = tokio::spawn(crate::supervisor::run(
            self.registry.clone(),
            self.dispatcher.clone(),
            self.shutdown_tx.subscribe(),
            self.config.heartbeat_interval,
            self.config.idle_timeout,
        ));

        let admin_state = AdminState {
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            injector: self.injector.clone(),
            metrics: self.metrics.clone(),
            shutdown: self.shutdown_tx.clone(),
        };
        let admin_task = tokio::spawn(run_admin_acceptor(
            admin_listener,
            admin_state,
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = chat_listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => warn!(target: "chatnet::server", "accept failed: {e}"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(target: "chatnet::server", "shutting down");
        for conn in self.registry.snapshot() {
            conn.close().await;
        }
        let _ = admin_task.await;
        supervisor.abort();
        Ok(())
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(target: "chatnet::server", "failed to set TCP_NODELAY for {addr}: {e}");
        }
        let (read_half, write_half) = stream.into_split();
        let client_id = generate_client_id();

        let (send_tx, send_rx) = tokio::sync::mpsc::channel(256);
        let (snap_tx, snap_rx) = watch::channel(Default::default());
        let conn = ConnectionHandle::with_snapshot(client_id.clone(), addr, send_tx, snap_rx);
        self.registry.insert(conn.clone());

        info!(target: "chatnet::server", "accepted {client_id} from {addr}");

        let pipeline = SendPipeline::with_limits(
            client_id.clone(),
            write_half,
            send_rx,
            snap_tx,
            self.config.max_retransmissions,
            Some(self.config.ack_timeout),
        );
        tokio::spawn(pipeline.run());

        let dispatcher = self.dispatcher.clone();
        let injector = self.injector.clone();
        let metrics = self.metrics.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            receive_pipeline::run(read_half, conn.clone(), dispatcher, injector, metrics).await;
            registry.remove(&conn.client_id);
        });
    }
}

async fn run_admin_acceptor(
    listener: TcpListener,
    state: AdminState,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let state = state.clone();
                        tokio::spawn(async move { handle_admin_connection(stream, addr, state).await });
                    }
                    Err(e) => warn!(target: "chatnet::admin", "admin accept failed: {e}"),
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn handle_admin_connection(mut stream: TcpStream, addr: SocketAddr, state: AdminState) {
    info!(target: "chatnet::admin", "admin connection from {addr}");
    loop {
        let frame = match chatnet_wire::read_frame(&mut stream, crate::MAX_MESSAGE_SIZE).await {
            Ok(f) => f,
            Err(chatnet_wire::WireError::UnexpectedEof) => break,
            Err(e) => {
                warn!(target: "chatnet::admin", "admin frame error from {addr}: {e}");
                break;
            }
        };
        let response = match serde_json::from_slice::<AdminRequest>(&frame) {
            Ok(req) => admin::handle(&state, req).await,
            Err(e) => serde_json::json!({ "error": format!("malformed admin request: {e}") }),
        };
        let bytes = match serde_json::to_vec(&response) {
            Ok(b) => b,
            Err(e) => {
                error!(target: "chatnet::admin", "failed to encode admin response: {e}");
                break;
            }
        };
        if let Err(e) = chatnet_wire::write_frame(&mut stream, &bytes).await {
            warn!(target: "chatnet::admin", "failed to write admin response to {addr}: {e}");
            break;
        }
    }
}
