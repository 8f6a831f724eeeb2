//! In-memory store implementations for unit testing without a real NATS server.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tolkien-lease = { path = "...", features = ["test-support"] }
//! ```
//!
//! Expiry is measured on `tokio::time::Instant`, so tests running with a paused
//! clock (`#[tokio::test(start_paused = true)]`) control pool TTLs through
//! `tokio::time::advance`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::{
    config::DEFAULT_POOL_TTL,
    error::StoreError,
    token::{PoolEntry, Token, TokenRecord, Tombstone},
    traits::{PoolStore, TombstoneStore},
};

// ── Fault injection ───────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Faults {
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl Faults {
    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read("injected read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write("injected write failure".to_string()));
        }
        Ok(())
    }
}

// ── MemoryPoolStore ───────────────────────────────────────────────────────────

struct Slot {
    record: TokenRecord,
    revision: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct PoolState {
    slots: BTreeMap<Token, Slot>,
    last_revision: u64,
}

impl PoolState {
    fn purge_expired(&mut self, now: Instant) {
        self.slots.retain(|_, slot| slot.expires_at > now);
    }

    fn next_revision(&mut self) -> u64 {
        self.last_revision += 1;
        self.last_revision
    }

    fn live_at_revision(&mut self, token: &Token, revision: u64) -> Result<&mut Slot, StoreError> {
        match self.slots.get_mut(token) {
            Some(slot) if slot.revision == revision => Ok(slot),
            _ => Err(StoreError::Conflict {
                token: token.to_string(),
            }),
        }
    }
}

/// Pool backed by `Arc<Mutex<BTreeMap>>`; lists in token order.
///
/// Every write refreshes the record's expiry, like a KV bucket with `max_age`.
#[derive(Clone)]
pub struct MemoryPoolStore {
    state: Arc<Mutex<PoolState>>,
    ttl: Duration,
    faults: Faults,
}

impl Default for MemoryPoolStore {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_TTL)
    }
}

impl MemoryPoolStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState::default())),
            ttl,
            faults: Faults::default(),
        }
    }

    /// Seed or overwrite a record without `await`, bypassing revision checks.
    pub fn insert(&self, token: impl Into<Token>, record: TokenRecord) -> u64 {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision();
        state.slots.insert(
            token.into(),
            Slot {
                record,
                revision,
                expires_at: now + self.ttl,
            },
        );
        revision
    }

    /// Live record for `token`, if any.
    pub fn get(&self, token: &Token) -> Option<TokenRecord> {
        let mut state = self.state.lock().unwrap();
        state.purge_expired(Instant::now());
        state.slots.get(token).map(|slot| slot.record.clone())
    }

    pub fn entry(&self, token: &Token) -> Option<PoolEntry> {
        let mut state = self.state.lock().unwrap();
        state.purge_expired(Instant::now());
        state.slots.get(token).map(|slot| PoolEntry {
            token: token.clone(),
            record: slot.record.clone(),
            revision: slot.revision,
        })
    }

    pub fn tokens(&self) -> Vec<Token> {
        let mut state = self.state.lock().unwrap();
        state.purge_expired(Instant::now());
        state.slots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tokens().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every subsequent read fails with [`StoreError::Read`] until reset.
    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Every subsequent write fails with [`StoreError::Write`] until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn write_if(&self, token: &Token, revision: u64, f: impl FnOnce(&TokenRecord) -> TokenRecord) -> Result<u64, StoreError> {
        self.faults.check_write()?;
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.purge_expired(now);
        let new_revision = state.last_revision + 1;
        let slot = state.live_at_revision(token, revision)?;
        slot.record = f(&slot.record);
        slot.revision = new_revision;
        slot.expires_at = now + self.ttl;
        state.last_revision = new_revision;
        Ok(new_revision)
    }
}

impl PoolStore for MemoryPoolStore {
    async fn list_all(&self) -> Result<Vec<PoolEntry>, StoreError> {
        self.faults.check_read()?;
        let mut state = self.state.lock().unwrap();
        state.purge_expired(Instant::now());
        Ok(state
            .slots
            .iter()
            .map(|(token, slot)| PoolEntry {
                token: token.clone(),
                record: slot.record.clone(),
                revision: slot.revision,
            })
            .collect())
    }

    async fn create(&self, tokens: &[Token]) -> Result<Vec<Token>, StoreError> {
        self.faults.check_write()?;
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.purge_expired(now);
        let mut created = Vec::new();
        for token in tokens {
            if state.slots.contains_key(token) {
                continue;
            }
            let revision = state.next_revision();
            state.slots.insert(
                token.clone(),
                Slot {
                    record: TokenRecord::free(),
                    revision,
                    expires_at: now + self.ttl,
                },
            );
            created.push(token.clone());
        }
        Ok(created)
    }

    async fn assign(
        &self,
        token: &Token,
        service_id: &str,
        lease_secs: u64,
        revision: u64,
    ) -> Result<u64, StoreError> {
        self.write_if(token, revision, |_| TokenRecord::leased(service_id, lease_secs))
    }

    async fn renew(&self, token: &Token, lease_secs: u64, revision: u64) -> Result<u64, StoreError> {
        self.write_if(token, revision, |record| record.with_counter(lease_secs))
    }

    async fn clear(&self, token: &Token, revision: u64) -> Result<u64, StoreError> {
        self.write_if(token, revision, |_| TokenRecord::free())
    }

    async fn delete(&self, token: &Token, revision: u64) -> Result<(), StoreError> {
        self.faults.check_write()?;
        let mut state = self.state.lock().unwrap();
        state.purge_expired(Instant::now());
        state.live_at_revision(token, revision)?;
        state.slots.remove(token);
        Ok(())
    }
}

// ── MemoryTombstoneStore ──────────────────────────────────────────────────────

/// Tombstones backed by `Arc<Mutex<HashMap>>`. Never expire.
#[derive(Clone, Default)]
pub struct MemoryTombstoneStore {
    inner: Arc<Mutex<HashMap<Token, Tombstone>>>,
    faults: Faults,
}

impl MemoryTombstoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tombstone without `await`.
    pub fn insert(&self, token: impl Into<Token>, service_id: impl Into<String>) {
        self.inner.lock().unwrap().insert(
            token.into(),
            Tombstone {
                service_id: service_id.into(),
                deleted_at: Utc::now(),
            },
        );
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.inner.lock().unwrap().contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl TombstoneStore for MemoryTombstoneStore {
    async fn record(&self, token: &Token, service_id: &str) -> Result<(), StoreError> {
        self.faults.check_write()?;
        self.insert(token.clone(), service_id);
        Ok(())
    }

    async fn get(&self, token: &Token) -> Result<Option<Tombstone>, StoreError> {
        self.faults.check_read()?;
        Ok(self.inner.lock().unwrap().get(token).cloned())
    }

    async fn all_tombstoned(&self) -> Result<HashSet<Token>, StoreError> {
        self.faults.check_read()?;
        Ok(self.inner.lock().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(s: &str) -> Token {
        Token::from(s)
    }

    #[tokio::test]
    async fn create_inserts_free_records() {
        let pool = MemoryPoolStore::default();
        let created = pool.create(&[tok("a"), tok("b")]).await.unwrap();
        assert_eq!(created, vec![tok("a"), tok("b")]);

        let entries = pool.list_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.record == TokenRecord::free()));
    }

    #[tokio::test]
    async fn create_does_not_overwrite_existing_record() {
        let pool = MemoryPoolStore::default();
        pool.insert("a", TokenRecord::leased("svc", 30));

        let created = pool.create(&[tok("a"), tok("b")]).await.unwrap();

        assert_eq!(created, vec![tok("b")]);
        assert_eq!(pool.get(&tok("a")), Some(TokenRecord::leased("svc", 30)));
    }

    #[tokio::test]
    async fn assign_with_current_revision_succeeds() {
        let pool = MemoryPoolStore::default();
        let rev = pool.insert("a", TokenRecord::free());

        let new_rev = pool.assign(&tok("a"), "svc", 60, rev).await.unwrap();

        assert!(new_rev > rev);
        assert_eq!(pool.get(&tok("a")), Some(TokenRecord::leased("svc", 60)));
    }

    #[tokio::test]
    async fn stale_revision_is_a_conflict_and_writes_nothing() {
        let pool = MemoryPoolStore::default();
        let rev = pool.insert("a", TokenRecord::free());
        pool.assign(&tok("a"), "winner", 60, rev).await.unwrap();

        let err = pool.assign(&tok("a"), "loser", 60, rev).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(pool.get(&tok("a")), Some(TokenRecord::leased("winner", 60)));
    }

    #[tokio::test]
    async fn renew_keeps_owner() {
        let pool = MemoryPoolStore::default();
        let rev = pool.insert("a", TokenRecord::leased("svc", 3));

        pool.renew(&tok("a"), 60, rev).await.unwrap();

        assert_eq!(pool.get(&tok("a")), Some(TokenRecord::leased("svc", 60)));
    }

    #[tokio::test]
    async fn clear_frees_record() {
        let pool = MemoryPoolStore::default();
        let rev = pool.insert("a", TokenRecord::leased("svc", 1));

        pool.clear(&tok("a"), rev).await.unwrap();

        assert_eq!(pool.get(&tok("a")), Some(TokenRecord::free()));
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let pool = MemoryPoolStore::default();
        let rev = pool.insert("a", TokenRecord::leased("svc", 10));

        pool.delete(&tok("a"), rev).await.unwrap();

        assert!(pool.is_empty());
        assert!(pool.delete(&tok("a"), rev).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn find_by_service_ignores_unblocked_records() {
        let pool = MemoryPoolStore::default();
        pool.insert("a", TokenRecord::free());
        pool.insert("b", TokenRecord::leased("svc", 10));

        let found = pool.find_by_service("svc").await.unwrap().unwrap();
        assert_eq!(found.token, tok("b"));
        assert!(pool.find_by_service("other").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire_after_ttl_since_last_write() {
        let pool = MemoryPoolStore::new(Duration::from_secs(10));
        pool.create(&[tok("idle"), tok("busy")]).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        let busy = pool.entry(&tok("busy")).unwrap();
        pool.assign(&tok("busy"), "svc", 60, busy.revision).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(pool.tokens(), vec![tok("busy")]);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_record_cannot_be_updated() {
        let pool = MemoryPoolStore::new(Duration::from_secs(1));
        let rev = pool.insert("a", TokenRecord::free());

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(pool.assign(&tok("a"), "svc", 60, rev).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn injected_faults_surface_as_store_errors() {
        let pool = MemoryPoolStore::default();
        pool.fail_reads(true);
        assert!(matches!(pool.list_all().await, Err(StoreError::Read(_))));
        pool.fail_reads(false);

        pool.fail_writes(true);
        assert!(matches!(pool.create(&[tok("a")]).await, Err(StoreError::Write(_))));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn tombstone_record_is_idempotent() {
        let tombstones = MemoryTombstoneStore::new();
        tombstones.record(&tok("a"), "svc").await.unwrap();
        tombstones.record(&tok("a"), "svc").await.unwrap();

        assert_eq!(tombstones.len(), 1);
        let tombstone = tombstones.get(&tok("a")).await.unwrap().unwrap();
        assert_eq!(tombstone.service_id, "svc");
        assert!(tombstones.all_tombstoned().await.unwrap().contains(&tok("a")));
    }

    #[test]
    fn clone_shares_state() {
        let pool = MemoryPoolStore::default();
        let clone = pool.clone();
        pool.insert("a", TokenRecord::free());
        assert_eq!(clone.len(), 1);
    }
}
