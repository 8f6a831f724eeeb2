use std::collections::HashSet;
use std::future::Future;

use crate::error::StoreError;
use crate::token::{PoolEntry, Token, Tombstone};

/// Shared storage for live pool records.
///
/// Every mutation takes the `revision` the caller observed when it read the
/// record and must be applied atomically only if the record is still at that
/// revision. A mismatch (including the record having expired or been deleted)
/// returns [`StoreError::Conflict`] and writes nothing.
///
/// Records carry a pool-membership TTL configured on the backend; expired
/// records are never returned by [`list_all`](PoolStore::list_all).
pub trait PoolStore: Send + Sync + Clone + 'static {
    /// Snapshot of every live record, in the backend's listing order.
    fn list_all(&self) -> impl Future<Output = Result<Vec<PoolEntry>, StoreError>> + Send;

    /// Insert unassigned records. Tokens that already exist are left untouched.
    /// Returns the tokens that were actually inserted, in input order.
    fn create(
        &self,
        tokens: &[Token],
    ) -> impl Future<Output = Result<Vec<Token>, StoreError>> + Send;

    /// Current live record for `token`, if any.
    fn fetch(
        &self,
        token: &Token,
    ) -> impl Future<Output = Result<Option<PoolEntry>, StoreError>> + Send {
        async move {
            Ok(self
                .list_all()
                .await?
                .into_iter()
                .find(|entry| &entry.token == token))
        }
    }

    /// Lease a free record to `service_id` for `lease_secs`. Returns the new revision.
    fn assign(
        &self,
        token: &Token,
        service_id: &str,
        lease_secs: u64,
        revision: u64,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Set the remaining lease counter, leaving owner and blocked flag as they are.
    fn renew(
        &self,
        token: &Token,
        lease_secs: u64,
        revision: u64,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Return a record to the free state.
    fn clear(
        &self,
        token: &Token,
        revision: u64,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Remove a record from the pool entirely.
    fn delete(
        &self,
        token: &Token,
        revision: u64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// First record currently leased to `service_id`. Linear in pool size.
    fn find_by_service(
        &self,
        service_id: &str,
    ) -> impl Future<Output = Result<Option<PoolEntry>, StoreError>> + Send {
        async move {
            Ok(self
                .list_all()
                .await?
                .into_iter()
                .find(|entry| entry.record.is_leased_by(service_id)))
        }
    }
}

/// Permanent record of retired tokens.
pub trait TombstoneStore: Send + Sync + Clone + 'static {
    /// Mark `token` as retired by `service_id`, stamped with the current time.
    /// Writing the same token twice is harmless.
    fn record(
        &self,
        token: &Token,
        service_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get(
        &self,
        token: &Token,
    ) -> impl Future<Output = Result<Option<Tombstone>, StoreError>> + Send;

    /// Every retired token; used as the exclusion set for pool generation.
    fn all_tombstoned(&self) -> impl Future<Output = Result<HashSet<Token>, StoreError>> + Send;
}
