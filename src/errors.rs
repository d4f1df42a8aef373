//! Error model for the gateway
//!
//! Two layers, both `thiserror` enums:
//!
//! - [`ForwardError`]: everything that can go wrong while forwarding one
//!   inbound email. Local to that email; caught and reported at the dispatch
//!   boundary in [`crate::router`], never propagated further.
//! - [`AppError`]: configuration and tool-layer failures, mapped to MCP
//!   `ErrorData` for protocol compliance.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Per-message forwarding error
///
/// Each variant is one failure kind of the email-to-chat pipeline. The
/// message strings end up in operator-facing reports after redaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// Address does not match the configured gateway template
    #[error("address not recognized by gateway: {0}")]
    UnrecognizedAddress(String),
    /// Address matched the template but its local-part cannot be split
    #[error("malformed email recipient {0}")]
    MalformedAddress(String),
    /// Channel token unknown or channel name mismatch
    #[error("bad stream token from email recipient {0}")]
    InvalidStreamToken(String),
    /// Neither a plaintext nor an HTML body part was found
    #[error("unable to find plaintext or HTML message body")]
    NoBodyFound,
    /// No recipient header carried a gateway address
    #[error("missing recipient in mirror email")]
    NoRecipientFound,
    /// Missed-message address was already used (or never existed)
    #[error("missed message address has already been used")]
    AddressExhausted,
    /// Stored routing data is absent (expired or tampered address)
    #[error("missing missed message address data: {0}")]
    MissingData(String),
    /// Raw message could not be parsed as RFC822
    #[error("failed to parse email: {0}")]
    Parse(String),
    /// Token store backend failure
    #[error("token store failure: {0}")]
    Storage(String),
    /// Upload or delivery collaborator failure
    #[error("external collaborator failure: {0}")]
    External(String),
}

/// Result alias for the forwarding pipeline
pub type ForwardResult<T> = Result<T, ForwardError>;

/// Application error type
///
/// Covers configuration loading and MCP tool handlers. Each variant maps
/// to an appropriate MCP error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input or configuration value
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Internal error (I/O, serialization, unexpected failure)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `NotFound` → `resource_not_found`
    /// - `Internal` → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::NotFound(msg) => {
                ErrorData::resource_not_found(msg.clone(), Some(json!({ "code": "not_found" })))
            }
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

impl From<ForwardError> for AppError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::UnrecognizedAddress(_)
            | ForwardError::MalformedAddress(_)
            | ForwardError::InvalidStreamToken(_)
            | ForwardError::NoBodyFound
            | ForwardError::NoRecipientFound
            | ForwardError::AddressExhausted
            | ForwardError::Parse(_) => Self::InvalidInput(err.to_string()),
            ForwardError::MissingData(_) => Self::NotFound(err.to_string()),
            ForwardError::Storage(_) | ForwardError::External(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

/// Type alias for fallible return values outside the forwarding pipeline
pub type AppResult<T> = Result<T, AppError>;
