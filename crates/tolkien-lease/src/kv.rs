use std::time::Duration;

use async_nats::jetstream::{self, kv};

use crate::error::StoreError;

pub const POOL_BUCKET: &str = "tolkien_pool";
pub const TOMBSTONE_BUCKET: &str = "tolkien_tombstones";

/// Bucket holding live pool records.
///
/// `max_age` is the pool-membership TTL: the server purges a record once its
/// latest write is older than `ttl`, so records nobody touches age out on their
/// own. If the bucket already exists its stored configuration wins.
pub async fn get_or_create_pool_bucket(
    js: &jetstream::Context,
    bucket: &str,
    ttl: Duration,
) -> Result<kv::Store, StoreError> {
    get_or_create(
        js,
        kv::Config {
            bucket: bucket.to_string(),
            history: 1,
            max_age: ttl,
            ..Default::default()
        },
    )
    .await
}

/// Bucket holding tombstones. No `max_age`: tombstones are never purged.
pub async fn get_or_create_tombstone_bucket(
    js: &jetstream::Context,
    bucket: &str,
) -> Result<kv::Store, StoreError> {
    get_or_create(
        js,
        kv::Config {
            bucket: bucket.to_string(),
            history: 1,
            ..Default::default()
        },
    )
    .await
}

async fn get_or_create(js: &jetstream::Context, config: kv::Config) -> Result<kv::Store, StoreError> {
    let name = config.bucket.clone();
    match js.create_key_value(config).await {
        Ok(store) => Ok(store),
        Err(_) => js
            .get_key_value(&name)
            .await
            .map_err(|e| StoreError::Read(e.to_string())),
    }
}
