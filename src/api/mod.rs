//! HTTP API: a thin axum router over [`TimerService`].
//!
//! Routes:
//! - `POST /timers` creates a timer and answers `201 {"id"}`.
//! - `GET /timers/{id}` answers `200 {"id","time_left"}`; archived timers
//!   report `time_left = 0`.
//! - `GET /health` answers `ok`.
//! - `GET /metrics` renders the counter registry.

pub mod error;
pub mod model;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use crate::metrics::{CounterRegistry, MetricsSink, API_ERRORS};
use crate::models::TimerState;
use crate::timer::TimerService;
use crate::{AppError, Result};

use self::error::ApiError;
use self::model::{GetTimerResponse, SetTimerRequest, SetTimerResponse};

/// Shared state of the router.
#[derive(Clone)]
pub struct AppState {
    /// Domain service.
    pub service: TimerService,
    /// Counter registry, also rendered at `/metrics`.
    pub metrics: Arc<CounterRegistry>,
}

/// Build the router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/timers", post(set_timer))
        .route("/timers/{id}", get(get_timer))
        .with_state(state)
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

fn internal(state: &AppState, method: &str, reason: &str, message: &str) -> ApiError {
    state
        .metrics
        .increment_counter(API_ERRORS, &[("method", method), ("reason", reason)]);
    ApiError::Internal(message.to_owned())
}

async fn set_timer(
    State(state): State<AppState>,
    body: std::result::Result<Json<SetTimerRequest>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<SetTimerResponse>), ApiError> {
    let Json(request) =
        body.map_err(|_| ApiError::BadRequest("cannot set timer, bad request payload".into()))?;

    if Url::parse(&request.url).is_err() {
        return Err(ApiError::InvalidParams(
            "invalid param: invalid 'POST' field 'url'".into(),
        ));
    }

    match state.service.create_timer(&request.into_command()).await {
        Ok(timer) => Ok((
            StatusCode::CREATED,
            Json(SetTimerResponse {
                id: timer.id().to_owned(),
            }),
        )),
        Err(err @ (AppError::InvalidUrl(_) | AppError::FireAtInPast | AppError::InvalidTimer(_))) => {
            Err(ApiError::InvalidParams(format!("invalid param: {err}")))
        }
        Err(err) => {
            error!(%err, "set_timer: service failed");
            Err(internal(
                &state,
                "set_timer",
                "service",
                "failed to set timer due to server internal error",
            ))
        }
    }
}

async fn get_timer(
    State(state): State<AppState>,
    Path(timer_id): Path<String>,
) -> std::result::Result<Json<GetTimerResponse>, ApiError> {
    if timer_id.is_empty() {
        return Err(ApiError::InvalidParams("invalid param: id is empty".into()));
    }

    match state.service.get_timer(&timer_id).await {
        Ok(TimerState::Active(timer)) => Ok(Json(GetTimerResponse::active(&timer))),
        Ok(TimerState::Archived) => Ok(Json(GetTimerResponse::archived(&timer_id))),
        Ok(TimerState::NotFound) => Err(ApiError::NotFound("timer does not exist".into())),
        Err(err) => {
            error!(%err, timer_id, "get_timer: service failed");
            Err(internal(
                &state,
                "get_timer",
                "service",
                "failed to get timer due to server internal error",
            ))
        }
    }
}

/// Bind `bind_addr` and serve the router until `cancel` fires.
///
/// # Errors
///
/// Returns `AppError::Http` if the listener cannot bind or the server fails.
pub async fn serve_http(bind_addr: &str, state: AppState, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {bind_addr}: {err}")))?;
    serve_listener(listener, state, cancel).await
}

/// Serve the router on an already bound listener until `cancel` fires.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails.
pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Http(format!("failed to read local address: {err}")))?;
    info!(%local, "starting HTTP API");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Http(format!("HTTP server error: {err}")))?;

    info!("HTTP API shut down");
    Ok(())
}
