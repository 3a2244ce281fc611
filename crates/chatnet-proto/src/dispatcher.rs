//! Message routing: JOIN/CHAT/LEAVE/HEARTBEAT semantics and broadcast fan-out.

use log::info;

use crate::connection::ConnectionHandle;
use crate::error::ProtocolError;
use crate::message::{Message, MessageType};
use crate::registry::Registry;
use crate::utils::{generate_msg_id, unix_timestamp};

/// 1-32 chars, `[A-Za-z0-9_-]`, must not start with `-`.
pub fn validate_username(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() || name.len() > 32 {
        return Err(ProtocolError::InvalidUsername(format!(
            "length {} out of range 1..=32",
            name.len()
        )));
    }
    if name.starts_with('-') {
        return Err(ProtocolError::InvalidUsername(
            "must not start with '-'".into(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ProtocolError::InvalidUsername(
            "only [A-Za-z0-9_-] is allowed".into(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
}

/// What the receive pipeline should do after handing a message to the dispatcher.
pub enum DispatchOutcome {
    Continue,
    InitiateClose,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Dispatcher { registry }
    }

    /// Builds a server-originated message and enqueues a copy onto every
    /// running peer except `origin`. Each destination gets its own monotonic
    /// sequence number drawn from its own connection, not a shared counter.
    pub async fn broadcast(&self, content: impl Into<String>, msg_type: MessageType, origin: Option<&str>) {
        let content = content.into();
        for peer in self.registry.others(origin) {
            let msg = Message::new(
                generate_msg_id("srv"),
                msg_type,
                "server",
                content.clone(),
                unix_timestamp(),
                peer.next_sequence(),
            );
            peer.enqueue(msg).await;
        }
    }

    pub async fn handle_join(&self, conn: &ConnectionHandle, username: &str) -> Result<(), ProtocolError> {
        validate_username(username)?;
        conn.set_username(username.to_string()).await;
        info!(target: "chatnet::dispatch", "{} joined as {username}", conn.client_id);
        self.broadcast(
            format!("*** {username} joined ***"),
            MessageType::ServerInfo,
            Some(&conn.client_id),
        )
        .await;
        Ok(())
    }

    pub async fn handle_chat(&self, conn: &ConnectionHandle, content: &str) {
        let sender = conn.username().await;
        let sender = if sender.is_empty() { "anonymous" } else { &sender };
        let line = format!("[{sender}]: {content}");
        self.broadcast(line, MessageType::Chat, Some(&conn.client_id)).await;
    }

    pub async fn handle_leave(&self, _conn: &ConnectionHandle) -> DispatchOutcome {
        DispatchOutcome::InitiateClose
    }

    pub async fn handle_heartbeat(&self, conn: &ConnectionHandle, content: &str) {
        conn.touch_heartbeat().await;
        if content == "ping" {
            let msg = Message::new(
                generate_msg_id("srv"),
                MessageType::Heartbeat,
                "server",
                "pong",
                unix_timestamp(),
                conn.next_sequence(),
            );
            conn.enqueue(msg).await;
        }
    }

    /// Emits the departure notice if the peer had a username set; called once
    /// from the close sequence, never from `handle_leave` directly, so that
    /// idle-timeout and LEAVE share one announcement path.
    pub async fn announce_departure(&self, client_id: &str, username: &str) {
        if username.is_empty() {
            return;
        }
        self.broadcast(
            format!("*** {username} left ***"),
            MessageType::ServerInfo,
            Some(client_id),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_plain_username() {
        assert!(validate_username("alice_01").is_ok());
    }

    #[test]
    fn rejects_empty_and_overlong_names() {
        assert!(validate_username("").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn rejects_a_leading_hyphen() {
        assert!(validate_username("-alice").is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(validate_username("alice!").is_err());
        assert!(validate_username("alice bob").is_err());
    }
}
