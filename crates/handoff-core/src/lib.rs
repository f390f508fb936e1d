//! handoff core library — the ephemeral token broker.
//!
//! `handoff-core` holds everything with real invariants: the read-only
//! credential directory, token generation, and the broker that issues and
//! redeems time-limited tokens. It knows nothing about HTTP so that the web
//! binary (`handoff-web`) and tests can drive it directly.
//!
//! # Modules
//!
//! - [`directory`] — [`CredentialDirectory`]: username → optional password,
//!   loaded from TOML or JSON.
//! - [`token`] — [`TokenGenerator`] trait and the default [`RandomTokenGenerator`].
//! - [`broker`] — [`TokenBroker`]: issuance, redemption, and scheduled cleanup.
//! - [`error`] — Outcome and error enums ([`IssueError`], [`RedeemError`], [`DirectoryError`]).

pub mod broker;
pub mod directory;
pub mod error;
pub mod token;

pub use broker::{
    BrokerConfig, IssuedToken, RedemptionPolicy, TokenBroker, DEFAULT_GRACE, DEFAULT_TTL,
    MAX_GENERATION_ATTEMPTS,
};
pub use directory::{CredentialDirectory, CredentialRecord};
pub use error::{DirectoryError, IssueError, RedeemError};
pub use token::{RandomTokenGenerator, TokenGenerator, TOKEN_LENGTH};
