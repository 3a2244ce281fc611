use error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub mod error;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub network: NetworkConfig,
    pub server: ServerConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub chat_address: String,
    pub admin_address: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub max_clients: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProtocolConfig {
    pub heartbeat_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub ack_timeout_secs: u64,
    pub max_retransmissions: u32,
    pub initial_packet_loss_rate: f64,
    pub initial_artificial_delay_secs: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chat_address: format!("0.0.0.0:{}", chatnet_proto::DEFAULT_PORT),
            admin_address: format!("0.0.0.0:{}", chatnet_proto::DEFAULT_ADMIN_PORT),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "chatnet".to_string(),
            max_clients: 256,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: chatnet_proto::HEARTBEAT_INTERVAL.as_secs(),
            idle_timeout_secs: 30,
            ack_timeout_secs: chatnet_proto::ACK_TIMEOUT.as_secs(),
            max_retransmissions: chatnet_proto::DEFAULT_MAX_RETRANSMISSIONS,
            initial_packet_loss_rate: 0.0,
            initial_artificial_delay_secs: 0.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            server: ServerConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl ProtocolConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn initial_artificial_delay(&self) -> Duration {
        Duration::from_secs_f64(self.initial_artificial_delay_secs)
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.network.chat_address).is_err() {
            return Err(ConfigError::Validation(format!(
                "invalid chat address '{}', expected IP:PORT",
                self.network.chat_address
            )));
        }
        if SocketAddr::from_str(&self.network.admin_address).is_err() {
            return Err(ConfigError::Validation(format!(
                "invalid admin address '{}', expected IP:PORT",
                self.network.admin_address
            )));
        }
        if self.network.chat_address == self.network.admin_address {
            return Err(ConfigError::Validation(
                "chat_address and admin_address must differ".to_string(),
            ));
        }
        if self.server.name.trim().is_empty() {
            return Err(ConfigError::Validation("server name cannot be empty".to_string()));
        }
        if self.server.max_clients == 0 {
            return Err(ConfigError::Validation(
                "max_clients must be greater than 0".to_string(),
            ));
        }
        if self.protocol.heartbeat_interval_secs == 0
            || self.protocol.ack_timeout_secs == 0
            || self.protocol.idle_timeout_secs == 0
        {
            return Err(ConfigError::Validation(
                "heartbeat_interval_secs, ack_timeout_secs and idle_timeout_secs must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.protocol.initial_packet_loss_rate) {
            return Err(ConfigError::Validation(
                "initial_packet_loss_rate must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn handle() -> Result<Config, ConfigError> {
    let config_path = PathBuf::from(CONFIG_FILE_NAME);
    if config_path.exists() {
        let path = config_path.to_string_lossy().to_string();
        let config_content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Config =
            toml::from_str(&config_content).map_err(|source| ConfigError::TomlDeserialization { path, source })?;
        config.validate()?;
        Ok(config)
    } else {
        let config = Config::default();
        save(&config, &config_path)?;
        Ok(config)
    }
}

fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let path_str = path.to_string_lossy().to_string();
    let config_content = toml::to_string_pretty(config).map_err(|source| ConfigError::TomlSerialization {
        path: path_str.clone(),
        source,
    })?;
    let mut file = fs::File::create(path).map_err(|source| ConfigError::Io {
        path: path_str.clone(),
        source,
    })?;
    file.write_all(config_content.as_bytes())
        .map_err(|source| ConfigError::Io { path: path_str, source })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_identical_chat_and_admin_addresses() {
        let mut config = Config::default();
        config.network.admin_address = config.network.chat_address.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_an_out_of_range_loss_rate() {
        let mut config = Config::default();
        config.protocol.initial_packet_loss_rate = 1.5;
        assert!(config.validate().is_err());
    }
}
