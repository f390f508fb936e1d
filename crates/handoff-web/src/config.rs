use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use handoff_core::{BrokerConfig, RedemptionPolicy};
use serde::Deserialize;

/// Runtime mode. `Development` exposes error details in 500 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            _ => Environment::Production,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    /// Extra time after expiry before a token is purged.
    #[serde(default = "default_grace_extra_ms")]
    pub grace_extra_ms: u64,
    #[serde(default)]
    pub single_use: bool,
}

fn default_ttl_ms() -> u64 {
    3000
}

fn default_grace_extra_ms() -> u64 {
    500
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            grace_extra_ms: default_grace_extra_ms(),
            single_use: false,
        }
    }
}

impl BrokerSection {
    pub fn to_broker_config(&self) -> BrokerConfig {
        let ttl = Duration::from_millis(self.ttl_ms);
        BrokerConfig {
            ttl,
            grace: ttl + Duration::from_millis(self.grace_extra_ms),
            policy: if self.single_use {
                RedemptionPolicy::SingleUse
            } else {
                RedemptionPolicy::Reusable
            },
        }
    }
}

/// A single entry in a trusted-proxy list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedProxy {
    Addr(IpAddr),
    /// Any loopback address.
    Loopback,
}

impl TrustedProxy {
    pub fn matches(&self, ip: IpAddr) -> bool {
        match self {
            TrustedProxy::Addr(addr) => *addr == ip,
            TrustedProxy::Loopback => ip.is_loopback(),
        }
    }
}

/// Which hops of `X-Forwarded-For` are trusted when resolving the client IP.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RawTrustProxy")]
pub enum TrustProxy {
    /// Ignore forwarding headers; the client is the socket peer.
    #[default]
    Disabled,
    /// Trust every hop; the client is the left-most forwarded address.
    All,
    /// Trust the `n` hops closest to the server.
    Hops(u32),
    /// Trust hops whose address is in the list.
    List(Vec<TrustedProxy>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTrustProxy {
    Bool(bool),
    Hops(u32),
    Text(String),
}

impl TryFrom<RawTrustProxy> for TrustProxy {
    type Error = String;

    fn try_from(raw: RawTrustProxy) -> Result<Self, Self::Error> {
        match raw {
            RawTrustProxy::Bool(true) => Ok(TrustProxy::All),
            RawTrustProxy::Bool(false) => Ok(TrustProxy::Disabled),
            RawTrustProxy::Hops(n) => Ok(TrustProxy::Hops(n)),
            RawTrustProxy::Text(s) => s.parse(),
        }
    }
}

impl std::str::FromStr for TrustProxy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "true" => return Ok(TrustProxy::All),
            "false" | "" => return Ok(TrustProxy::Disabled),
            _ => {}
        }
        if let Ok(n) = s.parse::<u32>() {
            return Ok(TrustProxy::Hops(n));
        }

        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| match part {
                "loopback" => Ok(TrustedProxy::Loopback),
                _ => part
                    .parse::<IpAddr>()
                    .map(TrustedProxy::Addr)
                    .map_err(|_| format!("invalid trusted proxy address: {part}")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(TrustProxy::List)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub trust_proxy: TrustProxy,
    #[serde(default)]
    pub broker: BrokerSection,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.toml")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            credentials_path: default_credentials_path(),
            environment: Environment::default(),
            trust_proxy: TrustProxy::default(),
            broker: BrokerSection::default(),
        }
    }
}

impl ServerConfig {
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Loads the config file named by `HANDOFF_CONFIG` (if any) and applies
    /// environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::load`] but reads variables through `var`.
    pub fn load_from(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = match var("HANDOFF_CONFIG") {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)?;
                toml::from_str(&contents)?
            }
            None => ServerConfig::default(),
        };

        if let Some(addr) = var("HANDOFF_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }
        if let Some(path) = var("HANDOFF_CREDENTIALS") {
            config.credentials_path = PathBuf::from(path);
        }
        if let Some(env) = var("HANDOFF_ENV") {
            config.environment = Environment::parse(&env);
        }
        if let Some(trust) = var("HANDOFF_TRUST_PROXY") {
            config.trust_proxy = trust.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(ttl) = var("HANDOFF_TOKEN_TTL_MS") {
            config.broker.ttl_ms = ttl.parse()?;
        }
        if let Some(single_use) = var("HANDOFF_SINGLE_USE") {
            config.broker.single_use = matches!(single_use.trim(), "1" | "true" | "yes");
        }

        if config.broker.ttl_ms == 0 {
            anyhow::bail!("broker.ttl_ms must be greater than zero");
        }

        if config.broker.single_use {
            tracing::info!("Single-use tokens enabled: tokens are removed on first redemption");
        }

        Ok(config)
    }
}
