//! Wire message: the self-describing, checksummed record every frame carries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;

/// The one type every frame on the wire decodes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub msg_id: String,
    pub msg_type: MessageType,
    pub sender: String,
    pub content: String,
    pub timestamp: f64,
    pub priority: Priority,
    pub sequence_number: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Chat,
    Ack,
    Heartbeat,
    Join,
    Leave,
    Retransmit,
    ServerInfo,
    UserList,
    PrivateMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
}

impl MessageType {
    pub fn default_priority(self) -> Priority {
        match self {
            MessageType::Ack | MessageType::Heartbeat => Priority::High,
            _ => Priority::Normal,
        }
    }
}

/// Structured payload carried by an ACK's `content` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub ack_for: String,
}

impl Message {
    /// Builds a message and stamps it with its own checksum.
    pub fn new(
        msg_id: impl Into<String>,
        msg_type: MessageType,
        sender: impl Into<String>,
        content: impl Into<String>,
        timestamp: f64,
        sequence_number: u64,
    ) -> Self {
        let priority = msg_type.default_priority();
        let mut msg = Message {
            msg_id: msg_id.into(),
            msg_type,
            sender: sender.into(),
            content: content.into(),
            timestamp,
            priority,
            sequence_number,
            checksum: String::new(),
        };
        msg.checksum = msg.compute_checksum();
        msg
    }

    /// Builds an ACK message targeting `ack_for`, minted by `sender` at `timestamp`.
    pub fn new_ack(
        msg_id: impl Into<String>,
        sender: impl Into<String>,
        ack_for: &str,
        timestamp: f64,
        sequence_number: u64,
    ) -> Self {
        let payload = serde_json::to_string(&AckPayload {
            ack_for: ack_for.to_string(),
        })
        .expect("AckPayload serialization is infallible");
        Message::new(
            msg_id,
            MessageType::Ack,
            sender,
            payload,
            timestamp,
            sequence_number,
        )
    }

    /// Parses this ACK's `content` field into its structured payload.
    pub fn ack_for(&self) -> Result<String, ProtocolError> {
        if self.msg_type != MessageType::Ack {
            return Err(ProtocolError::Validation("not an ACK message".into()));
        }
        let payload: AckPayload = serde_json::from_str(&self.content)
            .map_err(|e| ProtocolError::Validation(format!("malformed ack payload: {e}")))?;
        Ok(payload.ack_for)
    }

    /// Checksum construction is a wire-compatibility constant: SHA-256 over the
    /// concatenation of every field but the checksum itself, truncated to 16 hex digits.
    pub fn compute_checksum(&self) -> String {
        let type_str = match self.msg_type {
            MessageType::Chat => "CHAT",
            MessageType::Ack => "ACK",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Join => "JOIN",
            MessageType::Leave => "LEAVE",
            MessageType::Retransmit => "RETRANSMIT",
            MessageType::ServerInfo => "SERVER_INFO",
            MessageType::UserList => "USER_LIST",
            MessageType::PrivateMessage => "PRIVATE_MESSAGE",
        };
        let input = format!(
            "{}{}{}{}{}{}{}",
            self.msg_id,
            type_str,
            self.sender,
            self.content,
            self.timestamp,
            self.priority as u8,
            self.sequence_number
        );
        let digest = Sha256::digest(input.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    pub fn is_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Serializes this message to its JSON wire form.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Message serialization is infallible")
    }

    /// Parses and checksum-verifies a frame's payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let msg: Message = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Validation(format!("malformed message: {e}")))?;
        if !msg.is_valid() {
            return Err(ProtocolError::ChecksumMismatch {
                msg_id: msg.msg_id.clone(),
            });
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::new("m1", MessageType::Chat, "alice", "hi", 1_700_000_000.0, 7)
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let msg = sample();
        let bytes = msg.encode();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
        assert!(decoded.is_valid());
    }

    #[test]
    fn checksum_rejects_a_single_flipped_field() {
        let msg = sample();
        let bytes = msg.encode();
        let mut json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        json["content"] = serde_json::Value::String("tampered".into());
        let tampered = serde_json::to_vec(&json).unwrap();

        let err = Message::decode(&tampered).unwrap_err();
        assert!(matches!(err, ProtocolError::ChecksumMismatch { .. }));
    }

    #[test]
    fn unknown_msg_type_is_rejected() {
        let mut json: serde_json::Value = serde_json::from_slice(&sample().encode()).unwrap();
        json["msg_type"] = serde_json::Value::String("EXPLODE".into());
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn ack_round_trips_its_target_id() {
        let ack = Message::new_ack("ack-1", "server", "m1", 1_700_000_001.0, 1);
        assert_eq!(ack.ack_for().unwrap(), "m1");
        assert_eq!(ack.priority, Priority::High);
    }
}
