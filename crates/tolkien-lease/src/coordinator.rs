use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::LeaseConfig,
    error::{ConfigError, LeaseError, StoreError},
    factory::TokenFactory,
    token::{PoolEntry, Token},
    traits::{PoolStore, TombstoneStore},
};

/// How many times an operation re-reads the pool after losing a conditional write.
const MAX_CONFLICT_RETRIES: usize = 8;

/// Request-facing lease operations over a pool and its tombstones.
///
/// Clones share the same stores and the same replenishment lock.
#[derive(Clone)]
pub struct LeaseCoordinator<P: PoolStore, T: TombstoneStore> {
    pool: P,
    tombstones: T,
    factory: TokenFactory,
    config: LeaseConfig,
    /// Serializes pool regeneration so concurrent callers cannot overfill it.
    replenish_lock: Arc<Mutex<()>>,
}

impl<P: PoolStore, T: TombstoneStore> LeaseCoordinator<P, T> {
    pub fn new(pool: P, tombstones: T, config: LeaseConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let factory = TokenFactory::from_config(&config)?;
        Ok(Self {
            pool,
            tombstones,
            factory,
            config,
            replenish_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn tombstones(&self) -> &T {
        &self.tombstones
    }

    /// Tokens currently in the pool. An empty pool is regenerated in full first.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Token>, LeaseError> {
        let mut live = self.pool.list_all().await?;
        if live.is_empty() {
            info!(pool_size = self.config.pool_size, "Pool empty, generating a fresh pool");
            self.replenish().await?;
            live = self.pool.list_all().await?;
        }
        Ok(live.into_iter().map(|entry| entry.token).collect())
    }

    /// Lease the first free token to `service_id` for the default lease duration.
    ///
    /// A token lost to a concurrent writer is skipped in favour of the next free
    /// one in the same listing; the pool is re-listed only once every candidate
    /// is gone. `NoTokenAvailable` means a listing showed no free token at all.
    #[instrument(skip(self))]
    pub async fn assign(&self, service_id: &str) -> Result<Token, LeaseError> {
        let service_id = require_service_id(service_id)?;

        let mut contended = None;
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let entries = self.pool.list_all().await?;
            let mut free = entries.into_iter().filter(|e| !e.record.blocked).peekable();
            if free.peek().is_none() {
                debug!("Every token is leased");
                return Err(LeaseError::NoTokenAvailable);
            }

            for candidate in free {
                match self
                    .pool
                    .assign(&candidate.token, service_id, self.config.lease_secs, candidate.revision)
                    .await
                {
                    Ok(_) => {
                        info!(token = %candidate.token, lease_secs = self.config.lease_secs, "Token assigned");
                        return Ok(candidate.token);
                    }
                    Err(StoreError::Conflict { .. }) => {
                        debug!(token = %candidate.token, attempt, "Lost race for free token, trying next");
                        contended = Some(candidate.token);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Err(contended.map_or(LeaseError::NoTokenAvailable, |token| conflict_exhausted(&token)))
    }

    /// Reset the lease held by `service_id` to the full renewal window.
    #[instrument(skip(self))]
    pub async fn keep_alive(&self, service_id: &str) -> Result<Token, LeaseError> {
        let service_id = require_service_id(service_id)?;

        let mut entry = self.leased_entry(service_id).await?;
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            match self
                .pool
                .renew(&entry.token, self.config.renewal_secs, entry.revision)
                .await
            {
                Ok(_) => {
                    info!(token = %entry.token, renewal_secs = self.config.renewal_secs, "Lease renewed");
                    return Ok(entry.token);
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(token = %entry.token, attempt, "Lease changed during renewal, retrying");
                    entry = self.leased_entry(service_id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(conflict_exhausted(&entry.token))
    }

    /// Retire the token leased to `service_id` and top the pool back up to N.
    ///
    /// Nothing is written unless a lease is found. Once the tombstone is
    /// written the token leaves the pool whatever happens to its record
    /// meanwhile, so a retired token can never be handed out again.
    #[instrument(skip(self))]
    pub async fn release(&self, service_id: &str) -> Result<Token, LeaseError> {
        let service_id = require_service_id(service_id)?;

        let entry = self.leased_entry(service_id).await?;
        self.tombstones.record(&entry.token, service_id).await?;
        let token = self.remove_retired(entry).await?;

        self.replenish().await?;
        Ok(token)
    }

    /// Delete a tombstoned token, following its revision if the scheduler or
    /// another writer touched the record after it was read.
    async fn remove_retired(&self, entry: PoolEntry) -> Result<Token, LeaseError> {
        let PoolEntry {
            token,
            mut revision,
            ..
        } = entry;

        for attempt in 1..=MAX_CONFLICT_RETRIES {
            match self.pool.delete(&token, revision).await {
                Ok(()) => {
                    info!(token = %token, "Token retired");
                    return Ok(token);
                }
                Err(StoreError::Conflict { .. }) => match self.pool.fetch(&token).await? {
                    Some(current) => {
                        debug!(
                            token = %token,
                            attempt,
                            blocked = current.record.blocked,
                            "Retired token changed before delete, retrying"
                        );
                        revision = current.revision;
                    }
                    None => {
                        debug!(token = %token, "Retired token already left the pool");
                        return Ok(token);
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(conflict_exhausted(&token))
    }

    /// Generate and store enough fresh tokens to bring the pool back to N.
    /// Returns the tokens actually inserted.
    pub async fn replenish(&self) -> Result<Vec<Token>, LeaseError> {
        let _guard = self.replenish_lock.lock().await;

        let live = self.pool.list_all().await?;
        let target = self.config.pool_size;
        if live.len() >= target {
            return Ok(Vec::new());
        }
        let deficit = target - live.len();

        let mut exclusions = self.tombstones.all_tombstoned().await?;
        exclusions.extend(live.into_iter().map(|entry| entry.token));

        let tokens = self.factory.generate_pool(deficit, &exclusions);
        let created = self.pool.create(&tokens).await?;
        info!(requested = deficit, created = created.len(), "Pool replenished");
        Ok(created)
    }

    async fn leased_entry(&self, service_id: &str) -> Result<PoolEntry, LeaseError> {
        self.pool
            .find_by_service(service_id)
            .await?
            .ok_or_else(|| LeaseError::LeaseNotFound {
                service_id: service_id.to_string(),
            })
    }
}

fn require_service_id(service_id: &str) -> Result<&str, LeaseError> {
    if service_id.is_empty() {
        return Err(LeaseError::MissingServiceId);
    }
    Ok(service_id)
}

fn conflict_exhausted(token: &Token) -> LeaseError {
    warn!(token = %token, attempts = MAX_CONFLICT_RETRIES, "Gave up after repeated conflicts");
    LeaseError::Store(StoreError::Conflict {
        token: token.to_string(),
    })
}
