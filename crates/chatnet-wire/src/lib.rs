//! Length-prefixed framing shared by the chat wire and the admin wire.

pub mod error;
pub mod framing;

pub use error::WireError;
pub use framing::{encode_frame, read_frame, try_parse_frame, write_frame};
