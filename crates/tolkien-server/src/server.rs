use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use async_nats::jetstream;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tolkien_lease::{
    LeaseCoordinator, LeaseError, LeaseScheduler, NatsPoolStore, NatsTombstoneStore, PoolStore,
    TombstoneStore, kv,
};
use tracing::{error, info, instrument};

use crate::config::ServerConfig;

pub struct AppState<P: PoolStore, T: TombstoneStore> {
    coordinator: LeaseCoordinator<P, T>,
    request_timeout: Duration,
}

impl<P: PoolStore, T: TombstoneStore> Clone for AppState<P, T> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

/// The four lease endpoints over `coordinator`. Each lease operation is
/// abandoned with a 500 once it has run for `request_timeout`.
pub fn router<P: PoolStore, T: TombstoneStore>(
    coordinator: LeaseCoordinator<P, T>,
    request_timeout: Duration,
) -> Router {
    let state = AppState {
        coordinator,
        request_timeout,
    };

    Router::new()
        .route("/", get(handle_list::<P, T>))
        .route("/assign", get(handle_assign::<P, T>))
        .route("/keep-alive", get(handle_keep_alive::<P, T>))
        .route("/delete", get(handle_delete::<P, T>))
        .with_state(state)
}

/// Starts the lease HTTP server.
///
/// Ensures both KV buckets exist, starts the lease scheduler, then serves
/// until the listener fails. Shutdown is immediate; in-flight leases simply
/// age out.
pub async fn serve(
    config: ServerConfig,
    nats: async_nats::Client,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let js = jetstream::new(nats);

    let pool = NatsPoolStore::new(
        kv::get_or_create_pool_bucket(&js, &config.pool_bucket, config.lease.pool_ttl).await?,
    );
    let tombstones =
        NatsTombstoneStore::new(kv::get_or_create_tombstone_bucket(&js, &config.tombstone_bucket).await?);
    info!(
        pool_bucket = %config.pool_bucket,
        tombstone_bucket = %config.tombstone_bucket,
        "KV buckets ready"
    );

    LeaseScheduler::new(pool.clone(), config.lease.sweep_interval).spawn();
    let coordinator = LeaseCoordinator::new(pool, tombstones, config.lease)?;

    let app = router(coordinator, config.write_timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        addr = %addr,
        read_timeout_secs = config.read_timeout.as_secs(),
        write_timeout_secs = config.write_timeout.as_secs(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "Lease server listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ServiceQuery {
    #[serde(rename = "serviceID", default)]
    pub service_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTokens {
    pub available_tokens: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedToken {
    pub assigned_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("lease operation exceeded {0:?}")]
    Timeout(Duration),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Lease(LeaseError::MissingServiceId) => {
                (StatusCode::BAD_REQUEST, "serviceID is required")
            }
            ApiError::Lease(LeaseError::NoTokenAvailable) => {
                (StatusCode::NOT_FOUND, "No token available")
            }
            ApiError::Lease(LeaseError::LeaseNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "Token not found")
            }
            ApiError::Lease(LeaseError::Store(e)) => {
                error!(error = %e, "Lease store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong")
            }
            ApiError::Timeout(limit) => {
                error!(timeout_secs = limit.as_secs_f64(), "Lease operation timed out");
                (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong")
            }
        };
        (status, body).into_response()
    }
}

async fn bounded<F, R>(limit: Duration, op: F) -> Result<R, ApiError>
where
    F: Future<Output = Result<R, LeaseError>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => Err(ApiError::Timeout(limit)),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

#[instrument(name = "lease.list", skip_all)]
async fn handle_list<P: PoolStore, T: TombstoneStore>(
    State(state): State<AppState<P, T>>,
) -> Result<Json<AvailableTokens>, ApiError> {
    let tokens = bounded(state.request_timeout, state.coordinator.list()).await?;
    Ok(Json(AvailableTokens {
        available_tokens: tokens.into_iter().map(|t| t.into_string()).collect(),
    }))
}

#[instrument(name = "lease.assign", skip_all, fields(service_id = tracing::field::Empty))]
async fn handle_assign<P: PoolStore, T: TombstoneStore>(
    State(state): State<AppState<P, T>>,
    Query(query): Query<ServiceQuery>,
) -> Result<Json<AssignedToken>, ApiError> {
    tracing::Span::current().record("service_id", query.service_id.as_str());
    let token = bounded(
        state.request_timeout,
        state.coordinator.assign(&query.service_id),
    )
    .await?;
    Ok(Json(AssignedToken {
        assigned_token: token.into_string(),
    }))
}

#[instrument(name = "lease.keep_alive", skip_all, fields(service_id = tracing::field::Empty))]
async fn handle_keep_alive<P: PoolStore, T: TombstoneStore>(
    State(state): State<AppState<P, T>>,
    Query(query): Query<ServiceQuery>,
) -> Result<Json<Message>, ApiError> {
    tracing::Span::current().record("service_id", query.service_id.as_str());
    bounded(
        state.request_timeout,
        state.coordinator.keep_alive(&query.service_id),
    )
    .await?;
    let window = state.coordinator.config().renewal_secs;
    Ok(Json(Message {
        message: format!("Keep-Alive successful, token is valid for next {window} seconds"),
    }))
}

#[instrument(name = "lease.delete", skip_all, fields(service_id = tracing::field::Empty))]
async fn handle_delete<P: PoolStore, T: TombstoneStore>(
    State(state): State<AppState<P, T>>,
    Query(query): Query<ServiceQuery>,
) -> Result<Json<Message>, ApiError> {
    tracing::Span::current().record("service_id", query.service_id.as_str());
    bounded(
        state.request_timeout,
        state.coordinator.release(&query.service_id),
    )
    .await?;
    Ok(Json(Message {
        message: "Token deleted successfully".to_string(),
    }))
}
