//! Application endpoints: listing, detail, updates, assignment, history,
//! and the bulk spreadsheet import.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use super::error::ApiError;
use super::validation;
use crate::db::models::{
    actions, application, history, user, Application, ApplicationListResponse, ApplicationQuery,
    ApplicationResponse, AppStatus, Card, CardType, HistoryEntryResponse, NewApplication,
    UnmatchedApplication, User,
};
use crate::excel::Sheet;
use crate::AppState;

/// Load an application, enforcing the officer ownership scope: officers
/// only ever see applications assigned to them.
async fn load_scoped(
    state: &AppState,
    id: &str,
    user: &User,
) -> Result<Application, ApiError> {
    let app = application::find_application(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Application not found"))?;

    if user.is_officer() && app.assigned_to_id.as_deref() != Some(user.id.as_str()) {
        return Err(ApiError::forbidden("Access denied"));
    }
    Ok(app)
}

async fn respond_with(
    state: &AppState,
    message: &str,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let app = application::find_application(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Application not found"))?;
    let users = user::user_map(&state.db).await?;
    Ok(Json(json!({
        "message": message,
        "application": ApplicationResponse::build(app, &users),
    })))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<ApplicationQuery>,
) -> Result<Json<ApplicationListResponse>, ApiError> {
    let scope = user.is_officer().then_some(user.id.as_str());
    let listing = application::list_applications(&state.db, &query, scope).await?;
    Ok(Json(listing))
}

/// Listing restricted to the calling officer's assignments
pub async fn assigned(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<ApplicationQuery>,
) -> Result<Json<ApplicationListResponse>, ApiError> {
    let listing =
        application::list_applications(&state.db, &query, Some(user.id.as_str())).await?;
    Ok(Json(listing))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<ApplicationResponse>, ApiError> {
    let app = load_scoped(&state, &id, &user).await?;
    let users = user::user_map(&state.db).await?;
    Ok(Json(ApplicationResponse::build(app, &users)))
}

pub async fn choices() -> Json<serde_json::Value> {
    Json(json!({
        "status_choices": AppStatus::choices(),
        "card_choices": Card::choices(),
        "type_choices": CardType::choices(),
    }))
}

/// Applications not yet matched against any PFContinue upload
pub async fn unmatched(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let apps: Vec<Application> = sqlx::query_as(
        "SELECT * FROM applications WHERE pf_continue_matched = 0 ORDER BY date DESC, app_id",
    )
    .fetch_all(&state.db)
    .await?;

    let unmatched: Vec<UnmatchedApplication> = apps
        .into_iter()
        .map(|a| UnmatchedApplication {
            app_id: a.app_id,
            name: a.name,
            branch_code: a.branch_code,
            card_type: a.card_type,
            status: a.status,
        })
        .collect();

    Ok(Json(json!({ "unmatched_applications": unmatched })))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateApplicationRequest {
    pub status: Option<String>,
    pub remarks: Option<String>,
    pub work_on: Option<String>,
    pub inform_to: Option<String>,
    pub ipt: Option<String>,
    pub pf_continue_remarks: Option<String>,
    pub assigned_to_id: Option<String>,
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(body): Json<UpdateApplicationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let app = load_scoped(&state, &id, &user).await?;

    if body.assigned_to_id.is_some() && !user.is_admin() {
        return Err(ApiError::forbidden(
            "Only administrators can reassign applications",
        ));
    }

    if let Some(status) = &body.status {
        validation::validate_status(status)
            .map_err(|e| ApiError::validation_field("status", e))?;
    }

    let status_change = body
        .status
        .as_deref()
        .filter(|s| *s != app.status)
        .is_some();

    let mut old_fields = serde_json::Map::new();
    let mut new_fields = serde_json::Map::new();

    macro_rules! track {
        ($field:ident, $old:expr) => {
            if let Some(value) = &body.$field {
                old_fields.insert(stringify!($field).to_string(), json!($old));
                new_fields.insert(stringify!($field).to_string(), json!(value));
            }
        };
    }
    track!(status, app.status);
    track!(remarks, app.remarks);
    track!(work_on, app.work_on);
    track!(inform_to, app.inform_to);
    track!(ipt, app.ipt);
    track!(pf_continue_remarks, app.pf_continue_remarks);
    track!(assigned_to_id, app.assigned_to_id);

    if new_fields.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }

    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE applications
        SET status = ?, remarks = ?, work_on = ?, inform_to = ?, ipt = ?,
            pf_continue_remarks = ?, assigned_to_id = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(body.status.as_deref().unwrap_or(&app.status))
    .bind(body.remarks.as_ref().or(app.remarks.as_ref()))
    .bind(body.work_on.as_ref().or(app.work_on.as_ref()))
    .bind(body.inform_to.as_ref().or(app.inform_to.as_ref()))
    .bind(body.ipt.as_ref().or(app.ipt.as_ref()))
    .bind(
        body.pf_continue_remarks
            .as_ref()
            .or(app.pf_continue_remarks.as_ref()),
    )
    .bind(body.assigned_to_id.as_ref().or(app.assigned_to_id.as_ref()))
    .bind(&now)
    .bind(&id)
    .execute(&state.db)
    .await?;

    let action = if status_change {
        actions::STATUS_CHANGE
    } else {
        actions::UPDATE
    };
    history::record_history(
        &state.db,
        &id,
        action,
        Some(serde_json::Value::Object(old_fields)),
        Some(serde_json::Value::Object(new_fields)),
        Some(&user.id),
        None,
    )
    .await?;

    respond_with(&state, "Application updated successfully", &id).await
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    /// Officer to assign; `null` clears the assignment
    pub officer_id: Option<String>,
}

pub async fn assign(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(body): Json<AssignRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let app = application::find_application(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Application not found"))?;

    if let Some(officer_id) = &body.officer_id {
        let officer = user::find_user(&state.db, officer_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Officer not found"))?;
        if !officer.is_officer() || !officer.is_active {
            return Err(ApiError::bad_request(
                "Applications can only be assigned to active officers",
            ));
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query("UPDATE applications SET assigned_to_id = ?, updated_at = ? WHERE id = ?")
        .bind(&body.officer_id)
        .bind(&now)
        .bind(&id)
        .execute(&state.db)
        .await?;

    history::record_history(
        &state.db,
        &id,
        actions::ASSIGN,
        Some(json!({ "assigned_to_id": app.assigned_to_id })),
        Some(json!({ "assigned_to_id": body.officer_id })),
        Some(&user.id),
        None,
    )
    .await?;

    let message = if body.officer_id.is_some() {
        "Application assigned successfully"
    } else {
        "Application unassigned successfully"
    };
    respond_with(&state, message, &id).await
}

#[derive(Debug, Deserialize)]
pub struct MatchStatusRequest {
    pub matched: bool,
    pub remarks: Option<String>,
}

/// Manual override of the reconciliation flag, for records the automatic
/// cross-check cannot resolve
pub async fn match_status(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(body): Json<MatchStatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let app = load_scoped(&state, &id, &user).await?;

    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "UPDATE applications SET pf_continue_matched = ?, pf_continue_remarks = ?, updated_at = ? WHERE id = ?",
    )
    .bind(body.matched)
    .bind(body.remarks.as_ref().or(app.pf_continue_remarks.as_ref()))
    .bind(&now)
    .bind(&id)
    .execute(&state.db)
    .await?;

    history::record_history(
        &state.db,
        &id,
        actions::UPDATE,
        Some(json!({ "pf_continue_matched": app.pf_continue_matched })),
        Some(json!({
            "pf_continue_matched": body.matched,
            "pf_continue_remarks": body.remarks,
        })),
        Some(&user.id),
        None,
    )
    .await?;

    respond_with(&state, "Match status updated successfully", &id).await
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    load_scoped(&state, &id, &user).await?;

    let entries = history::list_history(&state.db, &id).await?;
    let users = user::user_map(&state.db).await?;
    let history: Vec<HistoryEntryResponse> = entries
        .into_iter()
        .map(|e| HistoryEntryResponse::build(e, &users))
        .collect();

    Ok(Json(json!({ "history": history })))
}

/// Bulk import from an uploaded .xlsx/.xls sheet. Rows that cannot be
/// imported are reported individually; the rest are created.
pub async fn bulk_upload(
    State(state): State<Arc<AppState>>,
    user: User,
    multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (filename, bytes) = super::read_spreadsheet_upload(multipart).await?;
    let sheet = Sheet::from_bytes(bytes)
        .map_err(|e| ApiError::bad_request(format!("Could not read spreadsheet: {e}")))?;

    let date_col = sheet.header_index("DATE");
    let branch_col = sheet.header_index("Br Code");
    let app_id_col = sheet.header_index("App ID");
    let name_col = sheet.header_index("Name");
    let card_col = sheet.header_index("Card");
    let type_col = sheet.header_index("Type");
    let remarks_col = sheet.header_index("Remarks");
    let work_on_col = sheet.header_index("Work On");
    let inform_to_col = sheet.header_index("Inform To");
    let ipt_col = sheet.header_index("IPT");

    if app_id_col.is_none() || name_col.is_none() {
        return Err(ApiError::bad_request(
            "Spreadsheet must contain 'App ID' and 'Name' columns",
        ));
    }

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let mut created_count = 0usize;
    let mut errors: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, row) in sheet.rows.iter().enumerate() {
        // 1-based data row numbers, matching what the uploader sees in Excel
        let row_number = index + 2;

        let app_id = sheet.string_at(row, app_id_col);
        if app_id.is_empty() {
            errors.push(format!("Row {row_number}: App ID is required"));
            continue;
        }
        let name = sheet.string_at(row, name_col);
        if name.is_empty() {
            errors.push(format!("Row {row_number}: Name is required"));
            continue;
        }

        if !seen.insert(app_id.clone()) {
            errors.push(format!(
                "Row {row_number}: duplicate App ID '{app_id}' in this file"
            ));
            continue;
        }

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM applications WHERE app_id = ?")
                .bind(&app_id)
                .fetch_one(&state.db)
                .await?;
        if existing > 0 {
            errors.push(format!(
                "Row {row_number}: application with App ID '{app_id}' already exists"
            ));
            continue;
        }

        let card = sheet.string_at(row, card_col).to_uppercase();
        if Card::parse(&card).is_none() {
            errors.push(format!("Row {row_number}: invalid Card '{card}'"));
            continue;
        }
        let card_type = sheet.string_at(row, type_col).to_uppercase();
        if CardType::parse(&card_type).is_none() {
            errors.push(format!("Row {row_number}: invalid Type '{card_type}'"));
            continue;
        }

        let date = sheet
            .date_at(row, date_col)
            .unwrap_or_else(|| today.clone());

        let optional = |col: Option<usize>| {
            let value = sheet.string_at(row, col);
            (!value.is_empty()).then_some(value)
        };

        let new = NewApplication {
            date,
            branch_code: sheet.string_at(row, branch_col),
            app_id,
            name,
            card,
            card_type,
            remarks: optional(remarks_col),
            work_on: optional(work_on_col),
            inform_to: optional(inform_to_col),
            ipt: optional(ipt_col),
            created_by_id: user.id.clone(),
        };

        let id = application::insert_application(&state.db, &new).await?;
        history::record_history(
            &state.db,
            &id,
            actions::CREATE,
            None,
            Some(json!({ "app_id": new.app_id, "source": "bulk_upload" })),
            Some(&user.id),
            None,
        )
        .await?;
        created_count += 1;
    }

    tracing::info!(
        filename = %filename,
        created = created_count,
        errors = errors.len(),
        "Bulk application upload processed"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("Successfully created {created_count} applications"),
            "created_count": created_count,
            "errors": errors,
        })),
    ))
}
