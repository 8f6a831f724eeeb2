//! # tolkien-lease
//!
//! Leases single-use opaque tokens to services for a bounded time window.
//!
//! ## Lifecycle
//!
//! - A fixed-size pool of N random tokens lives in a NATS KV bucket
//!   (`tolkien_pool`). Records age out of the bucket five minutes after their
//!   last write; an empty pool is regenerated on the next listing.
//! - `assign` leases the first free token to a service for 60 seconds.
//! - The [`LeaseScheduler`] ticks once per second, decrementing every lease and
//!   freeing those that reach zero, so abandoned leases always come back.
//! - `keep_alive` resets a lease to the full renewal window.
//! - `release` retires the token for good (a tombstone in `tolkien_tombstones`),
//!   deletes it from the pool and generates a replacement so the pool stays at N.
//!   Tombstoned tokens are never generated again.
//!
//! Every record mutation is a compare-and-swap on the KV revision observed when
//! the record was read, so two writers can never both win the same token.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use async_nats::jetstream;
//! use tolkien_lease::{
//!     LeaseConfig, LeaseCoordinator, LeaseScheduler, NatsPoolStore, NatsTombstoneStore, kv,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let nats = async_nats::connect("nats://localhost:4222").await?;
//! let js = jetstream::new(nats);
//! let config = LeaseConfig::default();
//!
//! let pool = NatsPoolStore::new(
//!     kv::get_or_create_pool_bucket(&js, kv::POOL_BUCKET, config.pool_ttl).await?,
//! );
//! let tombstones = NatsTombstoneStore::new(
//!     kv::get_or_create_tombstone_bucket(&js, kv::TOMBSTONE_BUCKET).await?,
//! );
//!
//! LeaseScheduler::new(pool.clone(), config.sweep_interval).spawn();
//! let coordinator = LeaseCoordinator::new(pool, tombstones, config)?;
//!
//! let token = coordinator.assign("billing").await?;
//! coordinator.keep_alive("billing").await?;
//! coordinator.release("billing").await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod factory;
pub mod kv;
pub mod nats_impls;
pub mod scheduler;
pub mod token;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use config::{LeaseConfig, TokenAlphabet};
pub use coordinator::LeaseCoordinator;
pub use error::{ConfigError, LeaseError, StoreError};
pub use factory::TokenFactory;
pub use nats_impls::{NatsPoolStore, NatsTombstoneStore};
pub use scheduler::{LeaseScheduler, SweepReport};
pub use token::{PoolEntry, Token, TokenRecord, Tombstone};
pub use traits::{PoolStore, TombstoneStore};

#[cfg(any(test, feature = "test-support"))]
pub use mocks::{MemoryPoolStore, MemoryTombstoneStore};
