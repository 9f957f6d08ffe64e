//! HTTP API: router assembly, access control, and handlers.

pub mod access;
pub mod applications;
pub mod auth;
pub mod error;
pub mod pfcontinue;
pub mod reports;
pub mod users;
pub mod validation;

use axum::{
    extract::{DefaultBodyLimit, Multipart},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use error::ApiError;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/applications", get(applications::list))
        .route("/applications/choices", get(applications::choices))
        .route("/applications/assigned", get(applications::assigned))
        .route("/applications/unmatched", get(applications::unmatched))
        .route("/applications/bulk-upload", post(applications::bulk_upload))
        .route(
            "/applications/:id",
            get(applications::get_one).put(applications::update),
        )
        .route("/applications/:id/assign", put(applications::assign))
        .route(
            "/applications/:id/match-status",
            put(applications::match_status),
        )
        .route("/applications/:id/history", get(applications::history))
        .route("/pfcontinue", get(pfcontinue::list))
        .route("/pfcontinue/upload", post(pfcontinue::upload))
        .route("/pfcontinue/cross-check", post(pfcontinue::cross_check))
        .route("/pfcontinue/summary", get(pfcontinue::summary))
        .route("/reports/dashboard", get(reports::dashboard))
        .route("/reports/daily", get(reports::daily))
        .route("/reports/branch-wise", get(reports::branch_wise))
        .route(
            "/reports/officer-performance",
            get(reports::officer_performance),
        )
        .route("/reports/custom", post(reports::custom))
        .route("/reports/export/excel", post(reports::export_excel))
        .route("/users", get(users::list).post(users::create))
        .route("/users/officers", get(users::officers))
        .route("/users/roles", get(users::roles))
        .route(
            "/users/:id",
            get(users::get_one).put(users::update).delete(users::remove),
        )
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            access::access_guard,
        ));

    let max_upload = state.config.upload.max_size_mb * 1024 * 1024;

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/login", post(auth::login))
        .nest("/api", protected)
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false)),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Pull the uploaded spreadsheet out of a multipart body. Expects a single
/// `file` field and validates the filename extension before reading the
/// bytes.
pub(crate) async fn read_spreadsheet_upload(
    mut multipart: Multipart,
) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|f| f.to_string())
            .ok_or_else(|| ApiError::bad_request("No file provided"))?;
        validation::validate_spreadsheet_filename(&filename)
            .map_err(|e| ApiError::validation_field("file", e))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request("Uploaded file is empty"));
        }
        return Ok((filename, bytes.to_vec()));
    }
    Err(ApiError::bad_request("No file provided"))
}
