//! Random token generation.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::warn;

use crate::config::{LeaseConfig, TokenAlphabet};
use crate::error::ConfigError;
use crate::token::Token;

/// Draws tokens of a fixed length from an alphabet, with replacement.
#[derive(Debug, Clone)]
pub struct TokenFactory {
    alphabet: TokenAlphabet,
    length: usize,
}

impl TokenFactory {
    pub fn new(alphabet: TokenAlphabet, length: usize) -> Result<Self, ConfigError> {
        if alphabet.is_empty() {
            return Err(ConfigError::EmptyAlphabet);
        }
        if length == 0 {
            return Err(ConfigError::ZeroTokenLength);
        }
        Ok(Self { alphabet, length })
    }

    pub fn from_config(config: &LeaseConfig) -> Result<Self, ConfigError> {
        Self::new(config.alphabet.clone(), config.token_length)
    }

    /// Number of distinct tokens this factory can produce, saturating at `u128::MAX`.
    pub fn keyspace_size(&self) -> u128 {
        let base = self.alphabet.len() as u128;
        (0..self.length).fold(1u128, |acc, _| acc.saturating_mul(base))
    }

    pub fn generate_token(&self) -> Token {
        self.generate_token_with(&mut rand::thread_rng())
    }

    pub fn generate_token_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Token {
        let chars = self.alphabet.chars();
        let token: String = (0..self.length)
            .filter_map(|_| chars.choose(rng).copied())
            .collect();
        Token::new(token)
    }

    /// Generate `count` distinct tokens, none of which is in `exclusions`.
    ///
    /// Loops until enough fresh tokens are found. If `exclusions` covers most of
    /// the keyspace this may never return.
    pub fn generate_pool(&self, count: usize, exclusions: &HashSet<Token>) -> Vec<Token> {
        self.generate_pool_with(&mut rand::thread_rng(), count, exclusions)
    }

    pub fn generate_pool_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        count: usize,
        exclusions: &HashSet<Token>,
    ) -> Vec<Token> {
        let demand = (count as u128).saturating_add(exclusions.len() as u128);
        if self.keyspace_size() <= demand {
            warn!(
                keyspace = %self.keyspace_size(),
                requested = count,
                excluded = exclusions.len(),
                "Token keyspace nearly exhausted, pool generation may not terminate"
            );
        }

        let mut chosen: HashSet<Token> = HashSet::with_capacity(count);
        let mut pool = Vec::with_capacity(count);
        while pool.len() < count {
            let token = self.generate_token_with(rng);
            if exclusions.contains(&token) || chosen.contains(&token) {
                continue;
            }
            chosen.insert(token.clone());
            pool.push(token);
        }
        pool
    }
}
