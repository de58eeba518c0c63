//! Error handling for the example programs

use meshlink_core::{DestinationHash, MeshError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemoError {
    #[error("{0}")]
    Mesh(#[from] MeshError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidDestination(String),

    #[error("No identity is known for destination {0}")]
    UnknownIdentity(DestinationHash),

    #[error("Event stream ended unexpectedly")]
    EventsClosed,
}

/// Result type for the example programs
pub type Result<T> = std::result::Result<T, DemoError>;
