//! Client error types

use crate::message::MessageError;
use thiserror::Error;

/// Errors from a single relay connection
#[derive(Error, Debug)]
pub enum TransportError {
    /// URL is not a valid ws:// or wss:// URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Opening handshake failed
    #[error("Connection error: {0}")]
    Connect(String),

    /// Socket write failed
    #[error("Send error: {0}")]
    Send(String),

    /// Socket read failed
    #[error("Receive error: {0}")]
    Receive(String),

    /// Connect or ping did not complete in time
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Not connected to relay
    #[error("Not connected to relay")]
    NotConnected,
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        TransportError::InvalidUrl(err.to_string())
    }
}

/// Errors from the relay pool
#[derive(Error, Debug)]
pub enum PoolError {
    /// Relay could not be registered
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Outbound frame could not be built
    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

/// Transport result type
pub type Result<T> = std::result::Result<T, TransportError>;
