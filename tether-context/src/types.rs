//! Identity and capability types
//!
//! Identities are drawn from process-wide counters so they are unique and
//! strictly increasing across every aspect and record in the process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Identity of an aspect (bus, channel, handler)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AspectId(pub u64);

static ASPECT_COUNTER: AtomicU64 = AtomicU64::new(1);

impl AspectId {
    /// Allocate the next aspect identity
    pub fn next() -> Self {
        Self(ASPECT_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for AspectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:05}", self.0)
    }
}

/// Identity of a log record (message, event, request)
///
/// Every record gets a fresh one; they increase monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId(pub u64);

static LOG_COUNTER: AtomicU64 = AtomicU64::new(1);

impl LogId {
    /// Allocate the next log identity
    pub fn next() -> Self {
        Self(LOG_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log:{}", self.0)
    }
}

/// Capability binding exclusive publish/clear rights for one message
///
/// Tokens are unforgeable: the only way to hold one that matches is to be
/// handed it by whoever created it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(Uuid);

impl Token {
    /// Create a new unique token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tok:{}", &self.0.to_string()[..8])
    }
}
