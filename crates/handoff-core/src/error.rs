//! Error types for `handoff-core`.
//!
//! Most variants here are ordinary outcomes rather than faults: the HTTP
//! layer maps them to "decline and fall through". Only
//! [`IssueError::Exhausted`] and [`DirectoryError`] indicate something is
//! genuinely wrong.

use std::path::PathBuf;

/// Why a token could not be issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssueError {
    /// No credential record exists for the requested username.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Every generated candidate collided with a live token.
    #[error("token generation exhausted after {0} attempts")]
    Exhausted(usize),
}

/// Why a token could not be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RedeemError {
    /// The token was never issued, or has already been cleaned up.
    #[error("token not found")]
    NotFound,

    /// The token is still tracked but its validity window has passed.
    #[error("token expired")]
    Expired,

    /// The token's user exists but has no retrievable password.
    #[error("no password on record")]
    NoPassword,
}

/// Failure to load the credential directory at startup.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The credential file could not be read.
    #[error("failed to read credentials from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The credential file is not valid TOML/JSON of the expected shape.
    #[error("failed to parse credentials: {0}")]
    Parse(String),

    /// The same username appears more than once.
    #[error("duplicate username in credentials: {0}")]
    DuplicateUser(String),
}
