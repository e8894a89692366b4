// src/core/errors.rs

//! Defines the primary error type for the coordinator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error enum, representing all possible failures within the coordinator.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("stream '{0}' not found")]
    NotFound(String),

    #[error("stream '{0}' already started")]
    AlreadyStarted(String),

    #[error("no coordinator replica accepted the command")]
    CoordinatorUnavailable,

    #[error("phase '{phase}' for stream '{stream_id}' failed: {reason}")]
    PhaseFailed {
        stream_id: String,
        phase: &'static str,
        reason: String,
    },

    #[error("quorum not reached for stream '{0}'")]
    QuorumNotMet(String),

    #[error("log engine error: {0}")]
    LogEngine(String),

    #[error("durable registry error: {0}")]
    Registry(String),

    #[error("RPC error contacting node '{node}': {reason}")]
    Rpc { node: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("state corruption detected: {0}")]
    Corruption(String),
}

/// Result alias used throughout the coordinator.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// The client-visible subset of errors, returned from the public API.
///
/// Deliberately narrower than [`CoordinatorError`]: phase errors, quorum loss,
/// and RPC failures are absorbed and retried internally and must never reach a
/// client (see the error handling policy in the design notes).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientError {
    #[error("not_found")]
    NotFound,

    #[error("already_started")]
    AlreadyStarted,

    #[error("coordinator_unavailable")]
    CoordinatorUnavailable,
}

impl From<&CoordinatorError> for ClientError {
    fn from(e: &CoordinatorError) -> Self {
        match e {
            CoordinatorError::NotFound(_) => ClientError::NotFound,
            CoordinatorError::AlreadyStarted(_) => ClientError::AlreadyStarted,
            _ => ClientError::CoordinatorUnavailable,
        }
    }
}
