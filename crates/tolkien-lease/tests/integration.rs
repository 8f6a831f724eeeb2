//! Integration tests for the NATS KV backends.
//!
//! Requires Docker (uses testcontainers to spin up a NATS server with JetStream).
//!
//! Run with:
//!   cargo test -p tolkien-lease --test integration

use std::time::Duration;

use async_nats::jetstream;
use testcontainers_modules::nats::Nats;
use testcontainers_modules::testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use tolkien_lease::{
    LeaseConfig, LeaseCoordinator, LeaseError, LeaseScheduler, NatsPoolStore, NatsTombstoneStore,
    PoolStore, Token, TokenRecord, TombstoneStore, kv,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn start_nats() -> (ContainerAsync<Nats>, jetstream::Context) {
    let container: ContainerAsync<Nats> = Nats::default()
        .with_cmd(["--jetstream"])
        .start()
        .await
        .expect("Failed to start NATS container — is Docker running?");
    let port = container.get_host_port_ipv4(4222).await.unwrap();
    let nats = async_nats::connect(format!("nats://127.0.0.1:{port}"))
        .await
        .expect("Failed to connect to NATS");
    (container, jetstream::new(nats))
}

async fn stores(
    js: &jetstream::Context,
    ttl: Duration,
) -> (NatsPoolStore, NatsTombstoneStore) {
    let pool = kv::get_or_create_pool_bucket(js, kv::POOL_BUCKET, ttl)
        .await
        .unwrap();
    let tombstones = kv::get_or_create_tombstone_bucket(js, kv::TOMBSTONE_BUCKET)
        .await
        .unwrap();
    (NatsPoolStore::new(pool), NatsTombstoneStore::new(tombstones))
}

// ── PoolStore ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pool_create_list_and_conditional_writes() {
    let (_container, js) = start_nats().await;
    let (pool, _) = stores(&js, Duration::from_secs(300)).await;

    let created = pool
        .create(&[Token::from("aaa"), Token::from("bbb")])
        .await
        .unwrap();
    assert_eq!(created.len(), 2);

    // Creating an existing token is a no-op.
    assert!(pool.create(&[Token::from("aaa")]).await.unwrap().is_empty());

    let entries = pool.list_all().await.unwrap();
    assert_eq!(entries.len(), 2);
    let aaa = entries.iter().find(|e| e.token.as_str() == "aaa").unwrap();
    assert_eq!(aaa.record, TokenRecord::free());

    let rev = pool.assign(&aaa.token, "svc", 60, aaa.revision).await.unwrap();
    let stale = pool.assign(&aaa.token, "other", 60, aaa.revision).await;
    assert!(stale.unwrap_err().is_conflict());

    let found = pool.find_by_service("svc").await.unwrap().unwrap();
    assert_eq!(found.token, aaa.token);
    assert_eq!(found.revision, rev);
    assert_eq!(found.record, TokenRecord::leased("svc", 60));
    assert_eq!(pool.fetch(&aaa.token).await.unwrap().unwrap().revision, rev);
    assert!(pool.fetch(&Token::from("zzz")).await.unwrap().is_none());

    let rev = pool.renew(&found.token, 10, found.revision).await.unwrap();
    let rev = pool.clear(&found.token, rev).await.unwrap();
    pool.delete(&found.token, rev).await.unwrap();

    let remaining: Vec<_> = pool
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.token)
        .collect();
    assert_eq!(remaining, vec![Token::from("bbb")]);
}

#[tokio::test]
async fn pool_records_age_out_of_bucket() {
    let (_container, js) = start_nats().await;
    let (pool, _) = stores(&js, Duration::from_secs(1)).await;

    pool.create(&[Token::from("short-lived")]).await.unwrap();
    assert_eq!(pool.list_all().await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(pool.list_all().await.unwrap().is_empty());
}

// ── TombstoneStore ────────────────────────────────────────────────────────────

#[tokio::test]
async fn tombstones_are_recorded_and_listed() {
    let (_container, js) = start_nats().await;
    let (_, tombstones) = stores(&js, Duration::from_secs(300)).await;

    assert!(tombstones.all_tombstoned().await.unwrap().is_empty());

    tombstones.record(&Token::from("gone"), "svc").await.unwrap();
    tombstones.record(&Token::from("gone"), "svc").await.unwrap();

    let all = tombstones.all_tombstoned().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all.contains(&Token::from("gone")));

    let tombstone = tombstones.get(&Token::from("gone")).await.unwrap().unwrap();
    assert_eq!(tombstone.service_id, "svc");
    assert!(tombstones.get(&Token::from("alive")).await.unwrap().is_none());
}

// ── Full lifecycle ────────────────────────────────────────────────────────────

#[tokio::test]
async fn lease_lifecycle_against_nats() {
    let (_container, js) = start_nats().await;
    let config = LeaseConfig::default().with_pool_size(3).with_lease_secs(2);
    let (pool, tombstones) = stores(&js, config.pool_ttl).await;
    let coordinator = LeaseCoordinator::new(pool.clone(), tombstones.clone(), config).unwrap();

    assert_eq!(coordinator.list().await.unwrap().len(), 3);

    let first = coordinator.assign("svc1").await.unwrap();
    coordinator.assign("svc2").await.unwrap();
    coordinator.assign("svc3").await.unwrap();
    assert!(matches!(
        coordinator.assign("svc4").await.unwrap_err(),
        LeaseError::NoTokenAvailable
    ));

    let released = coordinator.release("svc1").await.unwrap();
    assert_eq!(released, first);
    assert_eq!(pool.list_all().await.unwrap().len(), 3);
    assert!(tombstones.all_tombstoned().await.unwrap().contains(&first));

    // svc2 and svc3 hold 2-second leases; two sweeps free them.
    let scheduler = LeaseScheduler::new(pool.clone(), Duration::from_secs(1));
    scheduler.sweep_once().await.unwrap();
    let report = scheduler.sweep_once().await.unwrap();
    assert_eq!(report.expired, 2);

    let free = pool
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| !e.record.blocked)
        .count();
    assert_eq!(free, 3);
}
