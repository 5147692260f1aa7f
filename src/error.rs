//! Error types for the car advisor library.
//!
//! Only catalog loading and configuration errors are fatal, and only at
//! startup. Completion and turn errors are recovered inside the pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Failure to load or validate the static catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("I/O error reading catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate car id {0}")]
    DuplicateId(u32),

    #[error("Invalid car record {id}: {reason}")]
    InvalidRecord { id: u32, reason: String },
}

/// Failure of the external text-completion collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    /// The request did not finish within the configured timeout
    #[error("Completion request timed out")]
    Timeout,

    /// The model server could not be reached
    #[error("Completion service unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Completion service returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The completion came back but could not be used
    #[error("Unusable completion: {0}")]
    Parse(String),

    /// Completions are switched off in configuration
    #[error("Completion service disabled")]
    Disabled,
}

/// Errors a caller can see from a conversation turn.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TurnError {
    #[error("Utterance is empty")]
    EmptyUtterance,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(Uuid),

    #[error("Session {0} already has a turn in progress")]
    TurnInFlight(Uuid),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}
