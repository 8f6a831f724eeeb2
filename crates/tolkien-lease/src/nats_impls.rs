use std::collections::HashSet;

use async_nats::jetstream::kv::{self, Operation};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use tracing::debug;

use crate::{
    error::StoreError,
    token::{PoolEntry, Token, TokenRecord, Tombstone},
    traits::{PoolStore, TombstoneStore},
};

/// Concrete `PoolStore` backed by a NATS KV bucket (see [`crate::kv::get_or_create_pool_bucket`]).
///
/// Conditional writes map onto KV revisions: `update(key, value, revision)` for
/// record changes and `delete_expect_revision` for removal.
#[derive(Clone)]
pub struct NatsPoolStore {
    store: kv::Store,
}

impl NatsPoolStore {
    pub fn new(store: kv::Store) -> Self {
        Self { store }
    }

    async fn write_if(
        &self,
        token: &Token,
        record: &TokenRecord,
        revision: u64,
    ) -> Result<u64, StoreError> {
        let value = Bytes::from(serde_json::to_vec(record)?);
        match self.store.update(token.as_str(), value, revision).await {
            Ok(new_revision) => Ok(new_revision),
            Err(e) => Err(self.classify_failure(token, revision, e.to_string()).await),
        }
    }

    /// A failed conditional write is a conflict if the key has moved past
    /// `revision` (or is gone); otherwise the store itself failed.
    async fn classify_failure(&self, token: &Token, revision: u64, reason: String) -> StoreError {
        match self.store.entry(token.as_str()).await {
            Ok(Some(entry)) if entry.operation == Operation::Put && entry.revision == revision => {
                StoreError::Write(reason)
            }
            Ok(_) => StoreError::Conflict {
                token: token.to_string(),
            },
            Err(e) => StoreError::Write(format!("{reason} (revision check failed: {e})")),
        }
    }
}

impl PoolStore for NatsPoolStore {
    async fn list_all(&self) -> Result<Vec<PoolEntry>, StoreError> {
        let mut keys = self
            .store
            .keys()
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;

        let mut entries = Vec::new();
        while let Some(key) = keys.next().await {
            let key = key.map_err(|e| StoreError::Read(e.to_string()))?;
            let entry = self
                .store
                .entry(key.as_str())
                .await
                .map_err(|e| StoreError::Read(e.to_string()))?;

            // Keys can vanish between listing and reading (TTL purge, release).
            if let Some(entry) = entry.filter(|e| e.operation == Operation::Put) {
                let record: TokenRecord = serde_json::from_slice(&entry.value)?;
                entries.push(PoolEntry {
                    token: Token::from(key),
                    record,
                    revision: entry.revision,
                });
            }
        }
        Ok(entries)
    }

    async fn create(&self, tokens: &[Token]) -> Result<Vec<Token>, StoreError> {
        let value = Bytes::from(serde_json::to_vec(&TokenRecord::free())?);
        let mut created = Vec::with_capacity(tokens.len());
        for token in tokens {
            match self.store.create(token.as_str(), value.clone()).await {
                Ok(_) => created.push(token.clone()),
                Err(e) => {
                    let existing = self
                        .store
                        .entry(token.as_str())
                        .await
                        .map_err(|e| StoreError::Read(e.to_string()))?;
                    match existing {
                        Some(entry) if entry.operation == Operation::Put => {
                            debug!(token = %token, "Token already in pool, not recreated");
                        }
                        _ => return Err(StoreError::Write(e.to_string())),
                    }
                }
            }
        }
        Ok(created)
    }

    async fn fetch(&self, token: &Token) -> Result<Option<PoolEntry>, StoreError> {
        let entry = self
            .store
            .entry(token.as_str())
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;
        match entry {
            Some(entry) if entry.operation == Operation::Put => Ok(Some(PoolEntry {
                token: token.clone(),
                record: serde_json::from_slice(&entry.value)?,
                revision: entry.revision,
            })),
            _ => Ok(None),
        }
    }

    async fn assign(
        &self,
        token: &Token,
        service_id: &str,
        lease_secs: u64,
        revision: u64,
    ) -> Result<u64, StoreError> {
        self.write_if(token, &TokenRecord::leased(service_id, lease_secs), revision)
            .await
    }

    async fn renew(&self, token: &Token, lease_secs: u64, revision: u64) -> Result<u64, StoreError> {
        let entry = self
            .store
            .entry(token.as_str())
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;

        let current = match entry {
            Some(entry) if entry.operation == Operation::Put && entry.revision == revision => {
                serde_json::from_slice::<TokenRecord>(&entry.value)?
            }
            _ => {
                return Err(StoreError::Conflict {
                    token: token.to_string(),
                });
            }
        };

        self.write_if(token, &current.with_counter(lease_secs), revision)
            .await
    }

    async fn clear(&self, token: &Token, revision: u64) -> Result<u64, StoreError> {
        self.write_if(token, &TokenRecord::free(), revision).await
    }

    async fn delete(&self, token: &Token, revision: u64) -> Result<(), StoreError> {
        match self
            .store
            .delete_expect_revision(token.as_str(), Some(revision))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => Err(self.classify_failure(token, revision, e.to_string()).await),
        }
    }
}

/// Concrete `TombstoneStore` backed by a NATS KV bucket without `max_age`.
#[derive(Clone)]
pub struct NatsTombstoneStore {
    store: kv::Store,
}

impl NatsTombstoneStore {
    pub fn new(store: kv::Store) -> Self {
        Self { store }
    }
}

impl TombstoneStore for NatsTombstoneStore {
    async fn record(&self, token: &Token, service_id: &str) -> Result<(), StoreError> {
        let tombstone = Tombstone {
            service_id: service_id.to_string(),
            deleted_at: Utc::now(),
        };
        let value = Bytes::from(serde_json::to_vec(&tombstone)?);
        self.store
            .put(token.as_str(), value)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, token: &Token) -> Result<Option<Tombstone>, StoreError> {
        match self
            .store
            .entry(token.as_str())
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?
        {
            Some(entry) if entry.operation == Operation::Put => {
                Ok(Some(serde_json::from_slice(&entry.value)?))
            }
            _ => Ok(None),
        }
    }

    async fn all_tombstoned(&self) -> Result<HashSet<Token>, StoreError> {
        let mut keys = self
            .store
            .keys()
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;

        let mut tokens = HashSet::new();
        while let Some(key) = keys.next().await {
            let key = key.map_err(|e| StoreError::Read(e.to_string()))?;
            tokens.insert(Token::from(key));
        }
        Ok(tokens)
    }
}
