//! Handlers for testcases, groups, scenarios and configs.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::extract::ApiJson;
use super::state::AppState;
use crate::catalog::configs::{self, ConfigUpsert};
use crate::catalog::groups::{self, GroupUpdate, NewGroup};
use crate::catalog::scenarios::{self, NewScenario, ScenarioUpdate};
use crate::catalog::testcases::{self, NewTestCase, TestCaseUpdate};
use crate::catalog::{Config, Group, Scenario, TestCase};
use crate::error::{ApiError, ApiResult};
use crate::runs::vars;
use crate::storage;

fn require_name(name: &str) -> ApiResult<()> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be blank".to_string()));
    }
    Ok(())
}

fn optional_name(name: Option<&String>) -> ApiResult<()> {
    name.map_or(Ok(()), |n| require_name(n))
}

fn no_content(found: bool, entity: &'static str) -> ApiResult<StatusCode> {
    if found {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(entity))
    }
}

// ---------------------------------------------------------------------------
// Testcases
// ---------------------------------------------------------------------------

pub async fn list_testcases(State(state): State<AppState>) -> ApiResult<Json<Vec<TestCase>>> {
    let list = storage::interact(&state.pool, |conn| testcases::list(conn)).await?;
    Ok(Json(list))
}

pub async fn get_testcase(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TestCase>> {
    storage::interact(&state.pool, move |conn| testcases::get(conn, id))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Testcase"))
}

pub async fn create_testcase(
    State(state): State<AppState>,
    ApiJson(new): ApiJson<NewTestCase>,
) -> ApiResult<(StatusCode, Json<TestCase>)> {
    require_name(&new.name)?;
    let tc = storage::interact(&state.pool, move |conn| testcases::create(conn, &new)).await?;
    Ok((StatusCode::CREATED, Json(tc)))
}

pub async fn update_testcase(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(update): ApiJson<TestCaseUpdate>,
) -> ApiResult<Json<TestCase>> {
    optional_name(update.name.as_ref())?;
    storage::interact(&state.pool, move |conn| testcases::update(conn, id, &update))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Testcase"))
}

pub async fn delete_testcase(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let found = storage::interact(&state.pool, move |conn| testcases::delete(conn, id)).await?;
    no_content(found, "Testcase")
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AssignTestCase {
    pub testcase_id: i64,
}

pub async fn list_groups(State(state): State<AppState>) -> ApiResult<Json<Vec<Group>>> {
    let list = storage::interact(&state.pool, |conn| groups::list(conn)).await?;
    Ok(Json(list))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Group>> {
    storage::interact(&state.pool, move |conn| groups::get(conn, id))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Group"))
}

pub async fn create_group(
    State(state): State<AppState>,
    ApiJson(new): ApiJson<NewGroup>,
) -> ApiResult<(StatusCode, Json<Group>)> {
    require_name(&new.name)?;
    let group = storage::interact(&state.pool, move |conn| groups::create(conn, &new)).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(update): ApiJson<GroupUpdate>,
) -> ApiResult<Json<Group>> {
    optional_name(update.name.as_ref())?;
    storage::interact(&state.pool, move |conn| groups::update(conn, id, &update))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Group"))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let found = storage::interact(&state.pool, move |conn| groups::delete(conn, id)).await?;
    no_content(found, "Group")
}

pub async fn list_group_testcases(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<TestCase>>> {
    storage::interact(&state.pool, move |conn| groups::list_testcases(conn, id))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Group"))
}

pub async fn assign_group_testcase(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<AssignTestCase>,
) -> ApiResult<StatusCode> {
    let assigned = storage::interact(&state.pool, move |conn| {
        groups::assign_testcase(conn, id, body.testcase_id)
    })
    .await?;
    no_content(assigned, "Group or testcase")
}

pub async fn remove_group_testcase(
    State(state): State<AppState>,
    Path((id, testcase_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    let found = storage::interact(&state.pool, move |conn| {
        groups::remove_testcase(conn, id, testcase_id)
    })
    .await?;
    no_content(found, "Group")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

pub async fn list_scenarios(State(state): State<AppState>) -> ApiResult<Json<Vec<Scenario>>> {
    let list = storage::interact(&state.pool, |conn| scenarios::list(conn)).await?;
    Ok(Json(list))
}

pub async fn get_scenario(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Scenario>> {
    storage::interact(&state.pool, move |conn| scenarios::get(conn, id))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Scenario"))
}

pub async fn create_scenario(
    State(state): State<AppState>,
    ApiJson(new): ApiJson<NewScenario>,
) -> ApiResult<(StatusCode, Json<Scenario>)> {
    require_name(&new.name)?;
    if let Some(inputs) = &new.inputs {
        vars::validate(inputs).map_err(ApiError::Validation)?;
    }
    let scenario =
        storage::interact(&state.pool, move |conn| scenarios::create(conn, &new)).await?;
    Ok((StatusCode::CREATED, Json(scenario)))
}

pub async fn update_scenario(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(update): ApiJson<ScenarioUpdate>,
) -> ApiResult<Json<Scenario>> {
    optional_name(update.name.as_ref())?;
    if let Some(inputs) = &update.inputs {
        vars::validate(inputs).map_err(ApiError::Validation)?;
    }
    storage::interact(&state.pool, move |conn| scenarios::update(conn, id, &update))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Scenario"))
}

pub async fn delete_scenario(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let found = storage::interact(&state.pool, move |conn| scenarios::delete(conn, id)).await?;
    no_content(found, "Scenario")
}

// ---------------------------------------------------------------------------
// Configs
// ---------------------------------------------------------------------------

pub async fn list_configs(State(state): State<AppState>) -> ApiResult<Json<Vec<Config>>> {
    let list = storage::interact(&state.pool, |conn| configs::list(conn)).await?;
    Ok(Json(list))
}

pub async fn get_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Config>> {
    storage::interact(&state.pool, move |conn| configs::get(conn, &key))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Config"))
}

pub async fn upsert_config(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ConfigUpsert>,
) -> ApiResult<Json<Config>> {
    if body.key.trim().is_empty() {
        return Err(ApiError::Validation("key must not be blank".to_string()));
    }
    let cfg = storage::interact(&state.pool, move |conn| {
        configs::upsert(conn, &body.key, body.value.as_deref())
    })
    .await?;
    Ok(Json(cfg))
}

pub async fn delete_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    let found = storage::interact(&state.pool, move |conn| configs::delete(conn, &key)).await?;
    no_content(found, "Config")
}
