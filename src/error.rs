//! Main Crate Error

use std::net::SocketAddr;

#[derive(thiserror::Error, Debug)]
/// Kadnode crate error enum.
pub enum Error {
    /// Datagram is not valid bencode, or its message type header is missing or unknown.
    #[error("Failed to decode message: {0}")]
    Decode(String),

    /// Known message type, but a required field is missing or invalid.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// An identifier was built from the wrong number of bytes.
    #[error("Invalid Id size, expected 48, got {0}")]
    InvalidIdSize(usize),

    /// An identifier was parsed from an invalid hex string.
    #[error("Invalid Id hex encoding: {0}")]
    InvalidIdHex(#[from] hex::FromHexError),

    /// A request claimed to come from this node's own Id.
    #[error("Ignoring message claiming our own Id from {0}")]
    SelfMessage(SocketAddr),

    /// A find request arrived while the routing table had nothing to offer.
    #[error("No nodes in routing table")]
    EmptyResult,

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to encode or decode bencode: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    /// No response or error arrived for a transaction before it expired.
    #[error("Request to {0} timed out")]
    Timeout(SocketAddr),

    /// The remote node answered a request with an error message.
    #[error("Remote error {exception_type}: {message}")]
    Remote {
        exception_type: String,
        message: String,
    },

    /// The remote node answered with a payload that does not fit the request.
    #[error("Unexpected response from {0}")]
    UnexpectedResponse(SocketAddr),

    /// The node's worker threads were shut down.
    #[error("Dht was shutdown")]
    Shutdown,
}

/// Alias for `Result<T, kadnode::Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
