//! Small time and id helpers shared across the protocol crate.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sender's wall-clock at creation, as seconds since the epoch.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs_f64()
}

/// `client_<epoch>_<rand4>`, per the accept-loop contract.
pub fn generate_client_id() -> String {
    let epoch = unix_timestamp() as u64;
    let suffix: u32 = rand::rng().random_range(0..10_000);
    format!("client_{epoch}_{suffix:04}")
}

/// A per-peer unique message id; not part of the wire-compatibility contract,
/// only its uniqueness matters.
pub fn generate_msg_id(prefix: &str) -> String {
    let suffix: u64 = rand::rng().random();
    format!("{prefix}-{suffix:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_have_the_expected_shape() {
        let id = generate_client_id();
        assert!(id.starts_with("client_"));
        assert_eq!(id.matches('_').count(), 2);
    }

    #[test]
    fn msg_ids_are_unique_enough() {
        let a = generate_msg_id("m");
        let b = generate_msg_id("m");
        assert_ne!(a, b);
    }
}
