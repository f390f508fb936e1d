//! The ephemeral token broker.
//!
//! A [`TokenBroker`] hands out short-lived tokens for known users and releases
//! the user's password when a live token is redeemed. Every issued token is
//! purged by a background task once its grace window has elapsed, so the
//! table never grows beyond (issuance rate × grace).
//!
//! Timing uses the tokio clock, which lets tests pause and advance time
//! instead of sleeping for real.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::directory::CredentialDirectory;
use crate::error::{IssueError, RedeemError};
use crate::token::{RandomTokenGenerator, TokenGenerator, TOKEN_LENGTH};

/// Upper bound on candidates tried before giving up on issuance.
pub const MAX_GENERATION_ATTEMPTS: usize = 16;

pub const DEFAULT_TTL: Duration = Duration::from_millis(3000);
pub const DEFAULT_GRACE: Duration = Duration::from_millis(3500);

/// What a successful redemption does to the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedemptionPolicy {
    /// The token stays valid until it expires and may be redeemed repeatedly.
    #[default]
    Reusable,
    /// The token is removed on its first successful redemption.
    SingleUse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// How long a token can be redeemed after issuance.
    pub ttl: Duration,
    /// How long after issuance a token is purged from the table.
    pub grace: Duration,
    pub policy: RedemptionPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            grace: DEFAULT_GRACE,
            policy: RedemptionPolicy::default(),
        }
    }
}

/// A freshly issued token, as handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// Expiry as milliseconds since the Unix epoch.
    pub expires_at_ms: u64,
}

#[derive(Debug)]
struct PendingToken {
    username: String,
    expires_at: Instant,
    /// Distinguishes rows that reuse the same key over time so a stale
    /// cleanup task never purges a newer row.
    serial: u64,
}

type TokenTable = DashMap<String, PendingToken>;

pub struct TokenBroker {
    directory: Arc<CredentialDirectory>,
    generator: Box<dyn TokenGenerator>,
    tokens: Arc<TokenTable>,
    config: BrokerConfig,
    next_serial: AtomicU64,
    cleanup: CancellationToken,
}

impl std::fmt::Debug for TokenBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBroker")
            .field("live_tokens", &self.tokens.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenBroker {
    pub fn new(directory: Arc<CredentialDirectory>, config: BrokerConfig) -> Self {
        Self::with_generator(directory, config, Box::new(RandomTokenGenerator))
    }

    pub fn with_generator(
        directory: Arc<CredentialDirectory>,
        config: BrokerConfig,
        generator: Box<dyn TokenGenerator>,
    ) -> Self {
        Self {
            directory,
            generator,
            tokens: Arc::new(DashMap::new()),
            config,
            next_serial: AtomicU64::new(0),
            cleanup: CancellationToken::new(),
        }
    }

    /// Issues a new token for `username`.
    ///
    /// The token is in the table before this returns, and its removal is
    /// scheduled `grace` from now. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`IssueError::UnknownUser`] if the directory has no such user; the
    ///   table is left untouched.
    /// - [`IssueError::Exhausted`] if [`MAX_GENERATION_ATTEMPTS`] candidates all
    ///   collided with live tokens.
    pub fn issue_token(&self, username: &str) -> Result<IssuedToken, IssueError> {
        if !self.directory.contains(username) {
            return Err(IssueError::UnknownUser(username.to_string()));
        }

        let issued_at = Instant::now();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let pending = PendingToken {
            username: username.to_string(),
            expires_at: issued_at + self.config.ttl,
            serial,
        };

        let token = self.insert_unique(pending)?;
        self.schedule_removal(token.clone(), serial, issued_at + self.config.grace);

        let expires_at_ms = epoch_millis(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .saturating_add(self.config.ttl),
        );

        tracing::debug!(
            "Token issued for user={username}, live_tokens={}",
            self.tokens.len()
        );
        Ok(IssuedToken {
            token,
            expires_at_ms,
        })
    }

    fn insert_unique(&self, pending: PendingToken) -> Result<String, IssueError> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let candidate = self.generator.generate(TOKEN_LENGTH);
            match self.tokens.entry(candidate) {
                Entry::Occupied(_) => {
                    tracing::warn!("Token collision on attempt {attempt}, regenerating");
                }
                Entry::Vacant(slot) => {
                    let token = slot.key().clone();
                    slot.insert(pending);
                    return Ok(token);
                }
            }
        }
        tracing::error!("Token generation exhausted after {MAX_GENERATION_ATTEMPTS} attempts");
        Err(IssueError::Exhausted(MAX_GENERATION_ATTEMPTS))
    }

    fn schedule_removal(&self, token: String, serial: u64, deadline: Instant) {
        let tokens = Arc::downgrade(&self.tokens);
        let cancelled = self.cleanup.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    let Some(tokens) = tokens.upgrade() else { return };
                    if tokens.remove_if(&token, |_, p| p.serial == serial).is_some() {
                        tracing::debug!("Token purged, live_tokens={}", tokens.len());
                    }
                }
            }
        });
    }

    /// Redeems `token` for its user's password.
    ///
    /// Under [`RedemptionPolicy::Reusable`] the table is not modified; under
    /// [`RedemptionPolicy::SingleUse`] a successful redemption removes the row.
    ///
    /// # Errors
    ///
    /// - [`RedeemError::NotFound`] if the token is unknown or already purged.
    /// - [`RedeemError::Expired`] if the token is present but `now >= expiry`.
    /// - [`RedeemError::NoPassword`] if the user has no password on record.
    pub fn redeem(&self, token: &str) -> Result<String, RedeemError> {
        let now = Instant::now();
        match self.config.policy {
            RedemptionPolicy::Reusable => {
                let pending = self.tokens.get(token).ok_or(RedeemError::NotFound)?;
                self.release(&pending, now)
            }
            RedemptionPolicy::SingleUse => {
                let mut outcome = Err(RedeemError::NotFound);
                self.tokens.remove_if(token, |_, pending| {
                    outcome = self.release(pending, now);
                    outcome.is_ok()
                });
                outcome
            }
        }
    }

    fn release(&self, pending: &PendingToken, now: Instant) -> Result<String, RedeemError> {
        if now >= pending.expires_at {
            return Err(RedeemError::Expired);
        }
        self.directory
            .password(&pending.username)
            .map(str::to_owned)
            .ok_or(RedeemError::NoPassword)
    }

    /// Number of tokens currently held, expired or not.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Cancels every scheduled removal. Tokens already in the table stay
    /// there; intended for process shutdown.
    pub fn shutdown(&self) {
        self.cleanup.cancel();
    }
}

/// Milliseconds since the Unix epoch, saturating at `u64::MAX`.
fn epoch_millis(since_epoch: Duration) -> u64 {
    u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
}

impl Drop for TokenBroker {
    fn drop(&mut self) {
        self.cleanup.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::CredentialRecord;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;
    use tokio::time::{advance, sleep};

    /// Replays queued tokens, then falls back to random ones.
    struct ScriptedGenerator {
        queue: Mutex<VecDeque<String>>,
    }

    impl ScriptedGenerator {
        fn new(tokens: &[&str]) -> Self {
            Self {
                queue: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            }
        }
    }

    impl TokenGenerator for ScriptedGenerator {
        fn generate(&self, length: usize) -> String {
            self.queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| RandomTokenGenerator.generate(length))
        }
    }

    fn directory() -> Arc<CredentialDirectory> {
        Arc::new(
            CredentialDirectory::from_records([
                CredentialRecord {
                    username: "alice".to_string(),
                    password: Some("secret".to_string()),
                },
                CredentialRecord {
                    username: "bob".to_string(),
                    password: None,
                },
                CredentialRecord {
                    username: "carol".to_string(),
                    password: Some("p".to_string()),
                },
            ])
            .unwrap(),
        )
    }

    fn broker() -> TokenBroker {
        TokenBroker::new(directory(), BrokerConfig::default())
    }

    fn scripted(tokens: &[&str], policy: RedemptionPolicy) -> TokenBroker {
        TokenBroker::with_generator(
            directory(),
            BrokerConfig {
                policy,
                ..BrokerConfig::default()
            },
            Box::new(ScriptedGenerator::new(tokens)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_user_allocates_nothing() {
        let broker = broker();
        let err = broker.issue_token("nobody").unwrap_err();

        assert_eq!(err, IssueError::UnknownUser("nobody".to_string()));
        assert!(broker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn issued_token_is_in_table() {
        let broker = broker();
        let issued = broker.issue_token("alice").unwrap();

        assert_eq!(issued.token.len(), TOKEN_LENGTH);
        assert!(issued.token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(broker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_timestamp_is_ttl_in_future() {
        let before = epoch_millis(SystemTime::now().duration_since(UNIX_EPOCH).unwrap());
        let issued = broker().issue_token("alice").unwrap();
        let after = epoch_millis(SystemTime::now().duration_since(UNIX_EPOCH).unwrap());

        assert!(issued.expires_at_ms >= before + 3000);
        assert!(issued.expires_at_ms <= after + 3000);
    }

    #[test]
    fn epoch_millis_saturates_instead_of_wrapping() {
        assert_eq!(epoch_millis(Duration::from_millis(1_700_000_000_123)), 1_700_000_000_123);
        assert_eq!(epoch_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_redemption_returns_password() {
        let broker = broker();
        let issued = broker.issue_token("carol").unwrap();

        assert_eq!(broker.redeem(&issued.token), Ok("p".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_token_is_not_found() {
        let broker = broker();
        assert_eq!(broker.redeem("does-not-exist"), Err(RedeemError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn user_without_password_yields_no_password() {
        let broker = broker();
        let issued = broker.issue_token("bob").unwrap();

        assert_eq!(broker.redeem(&issued.token), Err(RedeemError::NoPassword));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_boundary() {
        let broker = broker();
        let issued = broker.issue_token("alice").unwrap();

        advance(Duration::from_millis(2999)).await;
        assert_eq!(broker.redeem(&issued.token), Ok("secret".to_string()));

        advance(Duration::from_millis(1)).await;
        assert_eq!(broker.redeem(&issued.token), Err(RedeemError::Expired));
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_purged_after_grace() {
        let broker = broker();
        let before = broker.len();
        let issued = broker.issue_token("alice").unwrap();

        sleep(Duration::from_millis(3499)).await;
        assert_eq!(broker.len(), before + 1);

        sleep(Duration::from_millis(2)).await;
        assert_eq!(broker.len(), before);
        assert_eq!(broker.redeem(&issued.token), Err(RedeemError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn reference_scenario() {
        let broker = scripted(&["T1"], RedemptionPolicy::Reusable);
        let issued = broker.issue_token("alice").unwrap();
        assert_eq!(issued.token, "T1");

        sleep(Duration::from_millis(100)).await;
        assert_eq!(broker.redeem("T1"), Ok("secret".to_string()));

        sleep(Duration::from_millis(3000)).await;
        assert_eq!(broker.redeem("T1"), Err(RedeemError::Expired));

        sleep(Duration::from_millis(500)).await;
        assert_eq!(broker.redeem("T1"), Err(RedeemError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn reusable_token_redeems_repeatedly() {
        let broker = broker();
        let issued = broker.issue_token("alice").unwrap();

        assert_eq!(broker.redeem(&issued.token), Ok("secret".to_string()));
        assert_eq!(broker.redeem(&issued.token), Ok("secret".to_string()));
        assert_eq!(broker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_use_token_is_removed_on_success() {
        let broker = scripted(&[], RedemptionPolicy::SingleUse);
        let issued = broker.issue_token("alice").unwrap();

        assert_eq!(broker.redeem(&issued.token), Ok("secret".to_string()));
        assert_eq!(broker.redeem(&issued.token), Err(RedeemError::NotFound));
        assert!(broker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_use_failure_keeps_row() {
        let broker = scripted(&[], RedemptionPolicy::SingleUse);
        let issued = broker.issue_token("bob").unwrap();

        assert_eq!(broker.redeem(&issued.token), Err(RedeemError::NoPassword));
        assert_eq!(broker.len(), 1);

        advance(Duration::from_millis(3000)).await;
        assert_eq!(broker.redeem(&issued.token), Err(RedeemError::Expired));
    }

    #[tokio::test(start_paused = true)]
    async fn collision_triggers_regeneration() {
        let broker = scripted(&["SAME", "SAME", "OTHER"], RedemptionPolicy::Reusable);

        let first = broker.issue_token("alice").unwrap();
        let second = broker.issue_token("carol").unwrap();

        assert_eq!(first.token, "SAME");
        assert_eq!(second.token, "OTHER");
        assert_eq!(broker.redeem("SAME"), Ok("secret".to_string()));
        assert_eq!(broker.redeem("OTHER"), Ok("p".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_reported() {
        let script = vec!["SAME"; MAX_GENERATION_ATTEMPTS + 1];
        let broker = scripted(&script, RedemptionPolicy::Reusable);

        broker.issue_token("alice").unwrap();
        let err = broker.issue_token("alice").unwrap_err();

        assert_eq!(err, IssueError::Exhausted(MAX_GENERATION_ATTEMPTS));
        assert_eq!(broker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cleanup_does_not_purge_reissued_key() {
        let broker = scripted(&["K", "K"], RedemptionPolicy::SingleUse);

        broker.issue_token("alice").unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(broker.redeem("K"), Ok("secret".to_string()));

        // Same key issued again while the first row's cleanup is still pending.
        broker.issue_token("carol").unwrap();
        sleep(Duration::from_millis(3450)).await;

        assert_eq!(broker.len(), 1);
        assert_eq!(broker.redeem("K"), Err(RedeemError::Expired));

        sleep(Duration::from_millis(100)).await;
        assert!(broker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn many_live_tokens_are_unique() {
        let broker = broker();
        let tokens: HashSet<String> = (0..500)
            .map(|_| broker.issue_token("alice").unwrap().token)
            .collect();

        assert_eq!(tokens.len(), 500);
        assert_eq!(broker.len(), 500);

        sleep(DEFAULT_GRACE + Duration::from_millis(1)).await;
        assert!(broker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_cleanup() {
        let broker = broker();
        broker.issue_token("alice").unwrap();
        broker.shutdown();

        sleep(DEFAULT_GRACE * 2).await;
        assert_eq!(broker.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_issuance_never_duplicates() {
        let broker = Arc::new(TokenBroker::new(
            directory(),
            BrokerConfig {
                ttl: Duration::from_secs(60),
                grace: Duration::from_secs(60),
                policy: RedemptionPolicy::Reusable,
            },
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let broker = Arc::clone(&broker);
                tokio::spawn(async move {
                    (0..100)
                        .map(|_| broker.issue_token("alice").unwrap().token)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        assert_eq!(all.len(), 800);
        assert_eq!(broker.len(), 800);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_use_token_is_delivered_once_under_contention() {
        let broker = Arc::new(TokenBroker::with_generator(
            directory(),
            BrokerConfig {
                ttl: Duration::from_secs(60),
                grace: Duration::from_secs(60),
                policy: RedemptionPolicy::SingleUse,
            },
            Box::new(ScriptedGenerator::new(&["RACE"])),
        ));
        broker.issue_token("alice").unwrap();

        let barrier = Arc::new(tokio::sync::Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let broker = Arc::clone(&broker);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    broker.redeem("RACE")
                })
            })
            .collect();

        let mut delivered = 0;
        let mut not_found = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(password) => {
                    assert_eq!(password, "secret");
                    delivered += 1;
                }
                Err(RedeemError::NotFound) => not_found += 1,
                Err(other) => panic!("unexpected redemption outcome: {other:?}"),
            }
        }

        assert_eq!(delivered, 1);
        assert_eq!(not_found, 15);
        assert!(broker.is_empty());
    }
}
