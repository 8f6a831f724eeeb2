//! # tolkien-server
//!
//! HTTP front end for the tolkien token lease pool.
//!
//! ## How it works
//!
//! 1. On startup the server ensures two NATS KV buckets exist: the pool
//!    (records age out after `TOLKIEN_POOL_TTL_SECS` without a write) and the
//!    tombstones (never expire).
//! 2. A background scheduler ticks every `TOLKIEN_SWEEP_INTERVAL_MS`, ageing
//!    every lease by one and freeing leases that reach zero.
//! 3. Services lease, renew and retire tokens over plain `GET` requests.
//!
//! ## Endpoints
//!
//! | Request | Success body | Errors |
//! |---|---|---|
//! | `GET /` | `{"availableTokens": [..]}` | 500 |
//! | `GET /assign?serviceID=X` | `{"assignedToken": ".."}` | 400, 404, 500 |
//! | `GET /keep-alive?serviceID=X` | `{"message": ".."}` | 400, 404, 500 |
//! | `GET /delete?serviceID=X` | `{"message": ".."}` | 400, 404, 500 |
//!
//! Error bodies are plain text. Store failures never leak details to clients.
//!
//! ## Configuration (env vars)
//!
//! A TOML file passed with `--config` is read first; these override it.
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `TOLKIEN_PORT` | `3333` | HTTP listening port |
//! | `TOLKIEN_READ_TIMEOUT_SECS` | `30` | Logged at startup |
//! | `TOLKIEN_WRITE_TIMEOUT_SECS` | `90` | Bound on each lease operation |
//! | `TOLKIEN_IDLE_TIMEOUT_SECS` | `120` | Logged at startup |
//! | `TOLKIEN_TOKEN_LENGTH` | `11` | Characters per token |
//! | `TOLKIEN_TOKEN_CHARSET` | `a-zA-Z0-9` | Token alphabet |
//! | `TOLKIEN_POOL_SIZE` | `10` | Target pool size N |
//! | `TOLKIEN_LEASE_SECS` | `60` | Lease length on assign |
//! | `TOLKIEN_RENEWAL_SECS` | `60` | Lease length after keep-alive |
//! | `TOLKIEN_SWEEP_INTERVAL_MS` | `1000` | Scheduler tick |
//! | `TOLKIEN_POOL_TTL_SECS` | `300` | Pool record lifetime after last write |
//! | `TOLKIEN_POOL_BUCKET` | `tolkien_pool` | KV bucket for live records |
//! | `TOLKIEN_TOMBSTONE_BUCKET` | `tolkien_tombstones` | KV bucket for retired tokens |
//! | `NATS_URL` | `localhost:4222` | NATS server URL(s), comma-separated |
//! | `NATS_USER` / `NATS_PASSWORD` | none | User/password auth |
//! | `NATS_TOKEN` | none | Token auth |

pub mod config;
pub mod env;
pub mod nats;
pub mod server;

pub use config::{LoadError, ServerConfig};
pub use server::{router, serve};
