//! Random token generation.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of every issued token.
pub const TOKEN_LENGTH: usize = 64;

/// Source of candidate token strings.
///
/// The broker only relies on candidates being drawn from `[A-Za-z0-9]`;
/// uniqueness is enforced by the broker itself.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self, length: usize) -> String;
}

/// Draws each character independently and uniformly from the 62-character
/// alphanumeric alphabet using the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self, length: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }
}
