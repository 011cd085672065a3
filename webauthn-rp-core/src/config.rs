//! Relying party configuration
//!
//! Built in code with [`RelyingPartyConfig::new`] and the `with_*` builders,
//! or loaded from `WEBAUTHN_*` environment variables.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::codec::{sha256, CoseAlgorithm};
use crate::types::RelyingPartyIdentity;

/// Shortest challenge the engine will issue
pub const MIN_CHALLENGE_LEN: usize = 16;
pub const DEFAULT_CHALLENGE_LEN: usize = 32;
pub const DEFAULT_CEREMONY_TTL: Duration = Duration::from_secs(300);
/// Longest lifetime a pending ceremony may be given
pub const MAX_CEREMONY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_TIMEOUT_MS: u32 = 60_000;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),
    #[error("Invalid RP ID: {0}")]
    InvalidRpId(String),
    #[error("At least one allowed origin is required")]
    NoOrigins,
    #[error("At least one accepted algorithm is required")]
    NoAlgorithms,
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationPolicy {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

impl UserVerificationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Preferred => "preferred",
            Self::Discouraged => "discouraged",
        }
    }
}

impl FromStr for UserVerificationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(Self::Required),
            "preferred" => Ok(Self::Preferred),
            "discouraged" => Ok(Self::Discouraged),
            other => Err(other.to_string()),
        }
    }
}

/// Whether registration demands an attestation the trust service vouches for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationPolicy {
    /// Accept any valid attestation and flag its trust level
    #[default]
    Optional,
    /// Reject registrations whose attestation is not `Trusted`
    Required,
}

/// What to do when an assertion's signature counter did not advance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterPolicy {
    /// Fail the ceremony with `CounterRegression`
    #[default]
    Strict,
    /// Log, flag the result and keep the stored counter
    Lenient,
}

impl FromStr for CounterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(other.to_string()),
        }
    }
}

/// Immutable relying party configuration.
#[derive(Debug, Clone)]
pub struct RelyingPartyConfig {
    rp: RelyingPartyIdentity,
    rp_id_hash: [u8; 32],
    origins: BTreeSet<String>,
    algorithms: Vec<CoseAlgorithm>,
    user_verification: UserVerificationPolicy,
    attestation: AttestationPolicy,
    counter_policy: CounterPolicy,
    ceremony_ttl: Duration,
    challenge_len: usize,
    timeout_ms: u32,
    strict_decoding: bool,
}

impl RelyingPartyConfig {
    /// Create a configuration with default policies.
    ///
    /// # Arguments
    ///
    /// * `rp_id` - Relying Party ID (a registrable domain, no scheme or port)
    /// * `rp_name` - Human-readable name for the Relying Party
    /// * `origins` - Origins allowed to run ceremonies, e.g. `https://login.example.com`
    pub fn new<I, S>(rp_id: &str, rp_name: &str, origins: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rp_id = rp_id.trim().to_ascii_lowercase();
        if rp_id.is_empty() || rp_id.contains(['/', ':', ' ']) {
            return Err(ConfigError::InvalidRpId(rp_id));
        }

        let origins = origins
            .into_iter()
            .map(|origin| normalize_origin(origin.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        if origins.is_empty() {
            return Err(ConfigError::NoOrigins);
        }

        Ok(Self {
            rp_id_hash: sha256(rp_id.as_bytes()),
            rp: RelyingPartyIdentity {
                id: rp_id,
                name: rp_name.to_string(),
                icon: None,
            },
            origins,
            algorithms: vec![CoseAlgorithm::ES256, CoseAlgorithm::EdDSA, CoseAlgorithm::RS256],
            user_verification: UserVerificationPolicy::default(),
            attestation: AttestationPolicy::default(),
            counter_policy: CounterPolicy::default(),
            ceremony_ttl: DEFAULT_CEREMONY_TTL,
            challenge_len: DEFAULT_CHALLENGE_LEN,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            strict_decoding: true,
        })
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WEBAUTHN_RP_ID` - Relying Party ID (default: "localhost")
    /// - `WEBAUTHN_RP_NAME` - RP display name (default: the RP ID)
    /// - `WEBAUTHN_RP_ORIGINS` - comma-separated origins (default: "http://localhost:3000")
    /// - `WEBAUTHN_RP_ICON` - optional icon URL
    /// - `WEBAUTHN_USER_VERIFICATION` - required | preferred | discouraged
    /// - `WEBAUTHN_REQUIRE_TRUSTED_ATTESTATION` - true | false (default: false)
    /// - `WEBAUTHN_COUNTER_POLICY` - strict | lenient (default: strict)
    /// - `WEBAUTHN_CEREMONY_TTL_SECS` - pending ceremony lifetime (default: 300, max: 86400)
    /// - `WEBAUTHN_TIMEOUT_MS` - client timeout hint (default: 60000)
    /// - `WEBAUTHN_STRICT_DECODING` - reject trailing/unknown CBOR data (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let rp_id = std::env::var("WEBAUTHN_RP_ID").unwrap_or_else(|_| "localhost".to_string());
        let rp_name = std::env::var("WEBAUTHN_RP_NAME").unwrap_or_else(|_| rp_id.clone());
        let origins = std::env::var("WEBAUTHN_RP_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let mut config = Self::new(
            &rp_id,
            &rp_name,
            origins.split(',').map(str::trim).filter(|o| !o.is_empty()),
        )?;

        if let Ok(icon) = std::env::var("WEBAUTHN_RP_ICON") {
            config = config.with_icon(icon);
        }
        if let Some(uv) = env_parsed("WEBAUTHN_USER_VERIFICATION")? {
            config = config.with_user_verification(uv);
        }
        if let Some(required) = env_parsed::<bool>("WEBAUTHN_REQUIRE_TRUSTED_ATTESTATION")? {
            config = config.with_attestation_policy(if required {
                AttestationPolicy::Required
            } else {
                AttestationPolicy::Optional
            });
        }
        if let Some(policy) = env_parsed("WEBAUTHN_COUNTER_POLICY")? {
            config = config.with_counter_policy(policy);
        }
        if let Some(secs) = env_parsed::<u64>("WEBAUTHN_CEREMONY_TTL_SECS")? {
            config = config.with_ceremony_ttl(ceremony_ttl_from_secs(secs)?);
        }
        if let Some(timeout) = env_parsed("WEBAUTHN_TIMEOUT_MS")? {
            config = config.with_timeout_ms(timeout);
        }
        if let Some(strict) = env_parsed("WEBAUTHN_STRICT_DECODING")? {
            config = config.with_strict_decoding(strict);
        }

        Ok(config)
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.rp.icon = Some(icon.into());
        self
    }

    /// Accepted algorithms in preference order. Duplicates are dropped.
    pub fn with_algorithms(mut self, algorithms: &[CoseAlgorithm]) -> Result<Self, ConfigError> {
        let mut deduped = Vec::with_capacity(algorithms.len());
        for alg in algorithms {
            if !deduped.contains(alg) {
                deduped.push(*alg);
            }
        }
        if deduped.is_empty() {
            return Err(ConfigError::NoAlgorithms);
        }
        self.algorithms = deduped;
        Ok(self)
    }

    pub fn with_user_verification(mut self, policy: UserVerificationPolicy) -> Self {
        self.user_verification = policy;
        self
    }

    pub fn with_attestation_policy(mut self, policy: AttestationPolicy) -> Self {
        self.attestation = policy;
        self
    }

    pub fn with_counter_policy(mut self, policy: CounterPolicy) -> Self {
        self.counter_policy = policy;
        self
    }

    /// Pending ceremony lifetime, never above [`MAX_CEREMONY_TTL`].
    pub fn with_ceremony_ttl(mut self, ttl: Duration) -> Self {
        self.ceremony_ttl = ttl.min(MAX_CEREMONY_TTL);
        self
    }

    /// Challenge length in bytes, never below [`MIN_CHALLENGE_LEN`].
    pub fn with_challenge_len(mut self, len: usize) -> Self {
        self.challenge_len = len.max(MIN_CHALLENGE_LEN);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_strict_decoding(mut self, strict: bool) -> Self {
        self.strict_decoding = strict;
        self
    }

    pub fn rp(&self) -> &RelyingPartyIdentity {
        &self.rp
    }

    pub fn rp_id(&self) -> &str {
        &self.rp.id
    }

    /// SHA-256 of the RP ID, as authenticators embed it
    pub fn rp_id_hash(&self) -> &[u8; 32] {
        &self.rp_id_hash
    }

    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.origins.iter().map(String::as_str)
    }

    /// True when `origin` normalises to one of the allowed origins.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        normalize_origin(origin)
            .map(|normalized| self.origins.contains(&normalized))
            .unwrap_or(false)
    }

    pub fn algorithms(&self) -> &[CoseAlgorithm] {
        &self.algorithms
    }

    pub fn user_verification(&self) -> UserVerificationPolicy {
        self.user_verification
    }

    pub fn attestation_policy(&self) -> AttestationPolicy {
        self.attestation
    }

    pub fn counter_policy(&self) -> CounterPolicy {
        self.counter_policy
    }

    pub fn ceremony_ttl(&self) -> Duration {
        self.ceremony_ttl
    }

    pub fn challenge_len(&self) -> usize {
        self.challenge_len
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn strict_decoding(&self) -> bool {
        self.strict_decoding
    }
}

fn ceremony_ttl_from_secs(secs: u64) -> Result<Duration, ConfigError> {
    let ttl = Duration::from_secs(secs);
    if ttl > MAX_CEREMONY_TTL {
        return Err(ConfigError::InvalidValue {
            name: "WEBAUTHN_CEREMONY_TTL_SECS",
            value: secs.to_string(),
        });
    }
    Ok(ttl)
}

/// Reduce an origin to `scheme://host[:port]` with default ports elided.
fn normalize_origin(origin: &str) -> Result<String, ConfigError> {
    let url = Url::parse(origin.trim())
        .map_err(|e| ConfigError::InvalidOrigin(format!("{origin}: {e}")))?;
    let serialized = url.origin().ascii_serialization();
    if serialized == "null" {
        return Err(ConfigError::InvalidOrigin(format!("{origin}: opaque origin")));
    }
    Ok(serialized)
}

fn env_parsed<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        _ => Ok(None),
    }
}
