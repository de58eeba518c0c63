//! Error types for the meshlink stack

use crate::types::{DestinationHash, LinkId};

/// Errors produced by the networking stack
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Noise protocol error: {0}")]
    Noise(#[from] snow::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Signature verification failed")]
    Signature,

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("{0}")]
    InvalidHash(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid destination name: {0}")]
    InvalidName(String),

    #[error("Destination {0} cannot be used for this operation: {1}")]
    WrongDirection(DestinationHash, &'static str),

    #[error("No path known to {0}")]
    NoPath(DestinationHash),

    #[error("Destination {0} is already registered")]
    AlreadyRegistered(DestinationHash),

    #[error("Payload of {size} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Link {0} is not active")]
    LinkNotActive(LinkId),

    #[error("Stack has been shut down")]
    Shutdown,
}

impl MeshError {
    pub fn invalid_packet<S: Into<String>>(message: S) -> Self {
        MeshError::InvalidPacket(message.into())
    }

    pub fn crypto<S: Into<String>>(message: S) -> Self {
        MeshError::Crypto(message.into())
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        MeshError::Config(message.into())
    }
}

pub type Result<T> = core::result::Result<T, MeshError>;
