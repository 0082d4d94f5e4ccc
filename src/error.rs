//! Error types for the simulation core and the replication transport.

use thiserror::Error;

use crate::entity::EntityId;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("unknown entity class: {0}")]
    UnknownEntityClass(String),

    #[error("no compatible tile for cell ({row}, {col})")]
    UngeneratableTerrain { row: usize, col: usize },

    #[error("tile name '{0}' does not end with four numeric edge components")]
    InvalidTileName(String),

    #[error("unknown level: {0}")]
    UnknownLevel(String),

    #[error("level '{level}' has no exit named '{exit}'")]
    UnknownExit { level: String, exit: String },

    #[error("object '{child}' names unknown parent '{parent}'")]
    UnknownParent { child: String, parent: String },

    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("invalid level file: {0}")]
    LevelFile(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The peer closed the stream before a full frame arrived.
    #[error("socket connection broken: expected {expected} bytes, received {received}")]
    ConnectionBroken { expected: usize, received: usize },

    #[error("frame of {0} bytes exceeds the allowed maximum")]
    FrameTooLarge(usize),

    #[error("unsupported schema version {0}")]
    UnsupportedSchema(u32),

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("send timed out")]
    SendTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Simulation(#[from] SimError),
}

pub type SimResult<T> = std::result::Result<T, SimError>;
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
