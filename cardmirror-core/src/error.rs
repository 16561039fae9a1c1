//! Error types for CARDMIRROR operations

use crate::EntityType;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Delete failed for {entity_type:?}: {reason}")]
    DeleteFailed { entity_type: EntityType, reason: String },

    #[error("URI already in use within the collection: {uri}")]
    DuplicateUri { uri: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Injected failure in {operation}")]
    Injected { operation: String },
}

/// Record model and codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Malformed member reference {reference:?}: {reason}")]
    MalformedMemberReference { reference: String, reason: String },

    #[error("Encoding record failed: {reason}")]
    EncodeFailed { reason: String },

    #[error("Decoding record failed: {reason}")]
    DecodeFailed { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Master error type for all CARDMIRROR errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MirrorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for CARDMIRROR operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

// =============================================================================
// TESTS
// =============================================================================
