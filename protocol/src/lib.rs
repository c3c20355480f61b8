use thiserror::Error;

pub mod codec;
pub mod message;

pub use codec::{decode, encode, SAFE_UDP_PAYLOAD};
pub use message::{ChatContent, CommunicationMode, Message, MessageKind};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown message type: {0}")]
    UnknownKind(String),

    #[error("Empty message")]
    EmptyMessage,
}
