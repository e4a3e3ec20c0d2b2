//! Error types for permitgate

use crate::types::{Payload, Selector};
use std::sync::PoisonError;
use thiserror::Error;

/// Main error type for permitgate operations
#[derive(Error, Debug)]
pub enum PermitGateError {
    // Administrative errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration version conflict for {policy}: expected {expected}, current {current}")]
    VersionConflict {
        policy: String,
        expected: u64,
        current: u64,
    },

    // Pipeline errors
    #[error("Extractor for selector {selector} failed: {reason}")]
    Extraction { selector: Selector, reason: String },

    #[error("Mapper for policy {policy} failed: {reason}")]
    Mapper { policy: String, reason: String },

    #[error("missing policy parameters for {policy}: {}", names.join(", "))]
    MissingParameters { policy: String, names: Vec<String> },

    // Decision errors
    /// Raised by a policy to deny an action. The engine promotes it to
    /// [`PermitGateError::PolicyRejected`].
    #[error("{0}")]
    Rejected(String),

    #[error("Policy {policy} rejected {}: {reason}", payload.selector)]
    PolicyRejected {
        policy: String,
        reason: String,
        payload: Box<Payload>,
    },

    #[error("Policy {policy} failed: {reason}")]
    PolicyFault { policy: String, reason: String },

    #[error("Post-commit hook of policy {policy} failed: {reason}")]
    PostCommitFault { policy: String, reason: String },

    #[error("no policy allowed the action and default is reject")]
    DefaultReject,

    // Permit errors
    #[error("permit already presented: {0}")]
    PermitAlreadyPresented(String),

    #[error("permit revoked: {0}")]
    PermitRevoked(String),

    #[error("Unknown permit: {0}")]
    UnknownPermit(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Issuer is not allowed: {0}")]
    IssuerNotAllowed(String),

    #[error("Presenter is not allowed: {0}")]
    PresenterNotAllowed(String),

    #[error("Caller is not the owner: {0}")]
    NotOwner(String),

    // Encoding errors
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Codec error: {0}")]
    Codec(String),

    // Storage and configuration
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PermitGateError {
    /// Intentional denial: an explicit policy rejection or the default-reject fallback.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PermitGateError::Rejected(_)
                | PermitGateError::PolicyRejected { .. }
                | PermitGateError::DefaultReject
        )
    }

    /// Something broke while deciding, as opposed to a denial.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            PermitGateError::PolicyFault { .. }
                | PermitGateError::PostCommitFault { .. }
                | PermitGateError::Extraction { .. }
                | PermitGateError::Mapper { .. }
                | PermitGateError::MissingParameters { .. }
                | PermitGateError::Internal(_)
        )
    }

    /// Shorthand used by policies to deny an action.
    pub fn rejected(reason: impl Into<String>) -> Self {
        PermitGateError::Rejected(reason.into())
    }
}

impl From<std::io::Error> for PermitGateError {
    fn from(err: std::io::Error) -> Self {
        PermitGateError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PermitGateError {
    fn from(err: serde_json::Error) -> Self {
        PermitGateError::Storage(format!("JSON error: {}", err))
    }
}

impl From<hex::FromHexError> for PermitGateError {
    fn from(err: hex::FromHexError) -> Self {
        PermitGateError::Codec(format!("Hex decode error: {}", err))
    }
}

impl From<rlp::DecoderError> for PermitGateError {
    fn from(err: rlp::DecoderError) -> Self {
        PermitGateError::Codec(format!("RLP decode error: {}", err))
    }
}

impl<T> From<PoisonError<T>> for PermitGateError {
    fn from(_: PoisonError<T>) -> Self {
        PermitGateError::Internal("lock poisoned".to_string())
    }
}

pub type Result<T> = std::result::Result<T, PermitGateError>;
