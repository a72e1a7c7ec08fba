//! Error types for buses and handlers

use crate::types::Token;
use std::any::Any;
use thiserror::Error;

/// Rejected bus/channel operation
///
/// Every variant leaves the aspect's state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A token is already bound to the message and a different one was given
    #[error("invalid token for {message}: {bound} -> {given}")]
    TokenMismatch {
        message: String,
        bound: Token,
        given: Token,
    },

    /// The subscriber is already registered
    #[error("already registered: {0}")]
    DuplicateRegistration(String),

    /// The subscriber is not registered
    #[error("not registered: {0}")]
    NotRegistered(String),

    /// `publish_once` on a message that is currently published
    #[error("already published: {0}")]
    AlreadyPublished(String),

    /// Indexed read beyond the end
    #[error("index {index} out of range for {len} entries")]
    OutOfRange { index: usize, len: usize },
}

/// Result type using ContextError
pub type ContextResult<T> = std::result::Result<T, ContextError>;

/// Why a request ended in `InternalError`
#[derive(Debug, Error)]
pub enum HandlerFault {
    /// The step returned an error
    #[error("step failed: {0}")]
    Step(#[from] anyhow::Error),

    /// The step panicked
    #[error("step panicked: {0}")]
    Panicked(String),

    /// A suspendable step finished without staging a response
    #[error("<{handler}> finished without a response")]
    NoResponseProduced { handler: String },
}

impl HandlerFault {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    /// Check whether this is the missing-response fault
    pub fn is_no_response(&self) -> bool {
        matches!(self, Self::NoResponseProduced { .. })
    }
}
