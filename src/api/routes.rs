//! API route definitions.

use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::state::AppState;
use super::{catalog, runs};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        // Testcases
        .route(
            "/testcases",
            get(catalog::list_testcases).post(catalog::create_testcase),
        )
        .route(
            "/testcases/{id}",
            get(catalog::get_testcase)
                .put(catalog::update_testcase)
                .delete(catalog::delete_testcase),
        )
        // Groups
        .route("/groups", get(catalog::list_groups).post(catalog::create_group))
        .route(
            "/groups/{id}",
            get(catalog::get_group)
                .put(catalog::update_group)
                .delete(catalog::delete_group),
        )
        .route(
            "/groups/{id}/testcases",
            get(catalog::list_group_testcases).post(catalog::assign_group_testcase),
        )
        .route(
            "/groups/{id}/testcases/{testcase_id}",
            delete(catalog::remove_group_testcase),
        )
        // Scenarios
        .route(
            "/scenarios",
            get(catalog::list_scenarios).post(catalog::create_scenario),
        )
        .route(
            "/scenarios/{id}",
            get(catalog::get_scenario)
                .put(catalog::update_scenario)
                .delete(catalog::delete_scenario),
        )
        // Configs
        .route("/configs", get(catalog::list_configs).post(catalog::upsert_config))
        .route(
            "/configs/{key}",
            get(catalog::get_config).delete(catalog::delete_config),
        )
        // Runs
        .route("/runs", get(runs::list_runs).post(runs::trigger_run))
        .route("/runs/{id}", get(runs::get_run).delete(runs::delete_run))
        .route("/runs/{id}/cancel", post(runs::cancel_run))
        // Logs
        .route("/logs/{run_id}/steps", get(runs::list_steps))
        .route("/logs/{run_id}/attachments", get(runs::list_attachments))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Healthy" }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
