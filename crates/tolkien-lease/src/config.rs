use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const DEFAULT_TOKEN_LENGTH: usize = 11;
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_LEASE_SECS: u64 = 60;
pub const DEFAULT_RENEWAL_SECS: u64 = 60;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_POOL_TTL: Duration = Duration::from_secs(5 * 60);

/// Non-empty set of characters tokens are drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAlphabet(Vec<char>);

impl TokenAlphabet {
    pub fn new(chars: &str) -> Result<Self, ConfigError> {
        if chars.is_empty() {
            return Err(ConfigError::EmptyAlphabet);
        }
        Ok(Self(chars.chars().collect()))
    }

    pub fn chars(&self) -> &[char] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for TokenAlphabet {
    fn default() -> Self {
        Self(DEFAULT_ALPHABET.chars().collect())
    }
}

/// Tunables for the lease lifecycle.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub alphabet: TokenAlphabet,
    pub token_length: usize,
    /// Target pool size N.
    pub pool_size: usize,
    /// Counter set on assign.
    pub lease_secs: u64,
    /// Counter set on keep-alive.
    pub renewal_secs: u64,
    pub sweep_interval: Duration,
    /// How long a pool record lives after its last write.
    pub pool_ttl: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            alphabet: TokenAlphabet::default(),
            token_length: DEFAULT_TOKEN_LENGTH,
            pool_size: DEFAULT_POOL_SIZE,
            lease_secs: DEFAULT_LEASE_SECS,
            renewal_secs: DEFAULT_RENEWAL_SECS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            pool_ttl: DEFAULT_POOL_TTL,
        }
    }
}

impl LeaseConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_lease_secs(mut self, secs: u64) -> Self {
        self.lease_secs = secs;
        self
    }

    pub fn with_renewal_secs(mut self, secs: u64) -> Self {
        self.renewal_secs = secs;
        self
    }

    pub fn with_token_length(mut self, length: usize) -> Self {
        self.token_length = length;
        self
    }

    pub fn with_alphabet(mut self, alphabet: TokenAlphabet) -> Self {
        self.alphabet = alphabet;
        self
    }

    pub fn with_pool_ttl(mut self, ttl: Duration) -> Self {
        self.pool_ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alphabet.is_empty() {
            return Err(ConfigError::EmptyAlphabet);
        }
        if self.token_length == 0 {
            return Err(ConfigError::ZeroTokenLength);
        }
        if self.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self.lease_secs == 0 {
            return Err(ConfigError::ZeroDuration { name: "lease_secs" });
        }
        if self.renewal_secs == 0 {
            return Err(ConfigError::ZeroDuration {
                name: "renewal_secs",
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "sweep_interval",
            });
        }
        if self.pool_ttl.is_zero() {
            return Err(ConfigError::ZeroDuration { name: "pool_ttl" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = LeaseConfig::default();
        assert_eq!(cfg.alphabet.len(), 62);
        assert_eq!(cfg.token_length, 11);
        assert_eq!(cfg.pool_size, 10);
        assert_eq!(cfg.lease_secs, 60);
        assert_eq!(cfg.renewal_secs, 60);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(1));
        assert_eq!(cfg.pool_ttl, Duration::from_secs(300));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_alphabet_is_rejected() {
        assert_eq!(TokenAlphabet::new(""), Err(ConfigError::EmptyAlphabet));
    }

    #[test]
    fn alphabet_keeps_characters_in_order() {
        let alphabet = TokenAlphabet::new("xyz").unwrap();
        assert_eq!(alphabet.chars(), &['x', 'y', 'z']);
    }

    #[test]
    fn zero_values_are_rejected() {
        assert_eq!(
            LeaseConfig::default().with_token_length(0).validate(),
            Err(ConfigError::ZeroTokenLength)
        );
        assert_eq!(
            LeaseConfig::default().with_pool_size(0).validate(),
            Err(ConfigError::ZeroPoolSize)
        );
        assert_eq!(
            LeaseConfig::default().with_lease_secs(0).validate(),
            Err(ConfigError::ZeroDuration { name: "lease_secs" })
        );
        assert_eq!(
            LeaseConfig::default()
                .with_sweep_interval(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroDuration {
                name: "sweep_interval"
            })
        );
    }

    #[test]
    fn builders_override_fields() {
        let cfg = LeaseConfig::default()
            .with_pool_size(3)
            .with_lease_secs(2)
            .with_renewal_secs(5)
            .with_pool_ttl(Duration::from_secs(30));
        assert_eq!(cfg.pool_size, 3);
        assert_eq!(cfg.lease_secs, 2);
        assert_eq!(cfg.renewal_secs, 5);
        assert_eq!(cfg.pool_ttl, Duration::from_secs(30));
    }
}
