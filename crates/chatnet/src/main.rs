use log::{error, info, logger, Level};
use tokio::time::Instant;

use chatnet_log::ChatNetLogger;
use chatnet_proto::server::{ChatServer, ServerConfig};

pub mod config;
pub mod error;

use error::ChatError;

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    ChatNetLogger::init(Level::Trace)?;

    let start_time = Instant::now();

    let config = match config::handle() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            logger().flush();
            std::process::exit(1);
        }
    };

    let server_config = ServerConfig {
        chat_addr: config.network.chat_address.parse().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid chat address: {}", config.network.chat_address),
            )
        })?,
        admin_addr: config.network.admin_address.parse().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid admin address: {}", config.network.admin_address),
            )
        })?,
        initial_packet_loss_rate: config.protocol.initial_packet_loss_rate,
        initial_artificial_delay: config.protocol.initial_artificial_delay(),
        heartbeat_interval: config.protocol.heartbeat_interval(),
        idle_timeout: config.protocol.idle_timeout(),
        ack_timeout: config.protocol.ack_timeout(),
        max_retransmissions: config.protocol.max_retransmissions,
    };

    info!("{} starting, load took {:.3}s", config.server.name, start_time.elapsed().as_secs_f64());
    logger().flush();

    let server = std::sync::Arc::new(ChatServer::new(server_config));
    let running = server.clone();
    let handle = tokio::spawn(async move { running.run().await });

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");
    server.request_shutdown();

    match handle.await {
        Ok(result) => result?,
        Err(e) => error!("server task panicked: {e}"),
    }

    logger().flush();
    Ok(())
}
