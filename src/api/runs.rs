//! Handlers for run history, triggering, cancellation and run logs.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::extract::{ApiJson, ApiQuery};
use super::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::runs::{Attachment, Run, RunStep, RunTarget, TargetType, Variables};

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
pub struct TriggerRun {
    /// Kept as text so an unknown value is a 400, not a body rejection.
    pub target_type: String,
    pub target_id: i64,
    #[serde(default)]
    pub variables: Variables,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StepsQuery {
    pub after: Option<i64>,
}

pub async fn trigger_run(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<TriggerRun>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let target_type: TargetType = body
        .target_type
        .parse()
        .map_err(|_| ApiError::Validation("Invalid target_type".to_string()))?;
    let target = RunTarget::new(target_type, body.target_id);
    let run = state.executor.trigger(target, body.variables).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

pub async fn list_runs(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Json<Vec<Run>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.executor.store().list(limit).await?))
}

pub async fn get_run(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Run>> {
    state
        .executor
        .store()
        .get(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Run"))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Run>> {
    Ok(Json(state.executor.cancel(id).await?))
}

pub async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.executor.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn require_run(state: &AppState, id: i64) -> ApiResult<()> {
    match state.executor.store().get(id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound("Run")),
    }
}

pub async fn list_steps(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    ApiQuery(query): ApiQuery<StepsQuery>,
) -> ApiResult<Json<Vec<RunStep>>> {
    require_run(&state, run_id).await?;
    let steps = state
        .executor
        .store()
        .list_steps(run_id, query.after)
        .await?;
    Ok(Json(steps))
}

pub async fn list_attachments(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> ApiResult<Json<Vec<Attachment>>> {
    require_run(&state, run_id).await?;
    Ok(Json(state.executor.store().list_attachments(run_id).await?))
}
