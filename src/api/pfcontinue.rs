//! PFContinue reconciliation endpoints: spreadsheet upload, listing,
//! cross-check, and the match summary.

use axum::{
    extract::{Multipart, Query, State},
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
    pf_continue, CrossCheckError, CrossCheckResult, PfContinueListResponse, PfContinueQuery,
    NewPfContinueRecord, User,
};
use crate::excel::Sheet;
use crate::AppState;

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// Upload a PFContinue extract. All records in one upload share the same
/// `upload_date` (today), which is the key the cross-check runs against.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    user: User,
    multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (filename, bytes) = super::read_spreadsheet_upload(multipart).await?;
    let sheet = Sheet::from_bytes(bytes)
        .map_err(|e| ApiError::bad_request(format!("Could not read spreadsheet: {e}")))?;

    let app_id_col = sheet.header_index("App ID");
    let name_col = sheet.header_index("Name");
    let branch_col = sheet.header_index("Br Code");

    if app_id_col.is_none() || name_col.is_none() {
        return Err(ApiError::bad_request(
            "Spreadsheet must contain 'App ID' and 'Name' columns",
        ));
    }

    // Every column beyond the known three is preserved verbatim
    let known: Vec<usize> = [app_id_col, name_col, branch_col]
        .into_iter()
        .flatten()
        .collect();

    let upload_date = today();
    let mut created_count = 0usize;
    let mut errors: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, row) in sheet.rows.iter().enumerate() {
        let row_number = index + 2;

        // Field validation runs before any duplicate tracking so that a row
        // rejected for a missing Name does not claim its App ID.
        let app_id = sheet.string_at(row, app_id_col);
        if app_id.is_empty() {
            errors.push(format!("Row {row_number}: App ID is required"));
            continue;
        }
        let customer_name = sheet.string_at(row, name_col);
        if customer_name.is_empty() {
            errors.push(format!("Row {row_number}: Name is required"));
            continue;
        }

        if !seen.insert(app_id.clone()) {
            errors.push(format!(
                "Row {row_number}: duplicate App ID '{app_id}' in this file"
            ));
            continue;
        }
        if pf_continue::pf_record_exists(&state.db, &app_id, &upload_date).await? {
            errors.push(format!(
                "Row {row_number}: record for App ID '{app_id}' already uploaded today"
            ));
            continue;
        }

        let mut extra = serde_json::Map::new();
        for (col, header) in sheet.headers.iter().enumerate() {
            if known.contains(&col) || header.is_empty() {
                continue;
            }
            let value = sheet.string_at(row, Some(col));
            if !value.is_empty() {
                extra.insert(header.clone(), json!(value));
            }
        }

        let new = NewPfContinueRecord {
            app_id,
            customer_name,
            branch_code: sheet.string_at(row, branch_col),
            upload_date: upload_date.clone(),
            additional_data: (!extra.is_empty()).then_some(serde_json::Value::Object(extra)),
            uploaded_by_id: user.id.clone(),
        };
        pf_continue::insert_pf_record(&state.db, &new).await?;
        created_count += 1;
    }

    tracing::info!(
        filename = %filename,
        created = created_count,
        errors = errors.len(),
        "PFContinue upload processed"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("Successfully uploaded {created_count} PFContinue records"),
            "created_count": created_count,
            "errors": errors,
        })),
    ))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PfContinueQuery>,
) -> Result<Json<PfContinueListResponse>, ApiError> {
    let listing = pf_continue::list_pf_records(&state.db, &query).await?;
    Ok(Json(listing))
}

#[derive(Debug, Default, Deserialize)]
pub struct CrossCheckRequest {
    pub upload_date: Option<String>,
}

pub async fn cross_check(
    State(state): State<Arc<AppState>>,
    user: User,
    body: Option<Json<CrossCheckRequest>>,
) -> Result<Json<CrossCheckResult>, ApiError> {
    let upload_date = body
        .and_then(|Json(b)| b.upload_date)
        .unwrap_or_else(today);
    validation::validate_date(&upload_date)
        .map_err(|e| ApiError::validation_field("upload_date", e))?;

    match pf_continue::run_cross_check(&state.db, &upload_date, &user.id).await {
        Ok(result) => {
            tracing::info!(
                upload_date = %upload_date,
                matched = result.matched_count,
                "Cross-check completed"
            );
            Ok(Json(result))
        }
        Err(CrossCheckError::NoDataForDate) => Err(ApiError::not_found(
            "No PFContinue data found for the specified date",
        )),
        Err(CrossCheckError::Db(err)) => Err(err.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub upload_date: Option<String>,
}

pub async fn summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let upload_date = query.upload_date.unwrap_or_else(today);
    validation::validate_date(&upload_date)
        .map_err(|e| ApiError::validation_field("upload_date", e))?;

    let summary = pf_continue::cross_check_summary(&state.db, &upload_date).await?;
    Ok(Json(json!({ "summary": summary })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::init_test_pool;
    use axum::extract::FromRequest;
    use sqlx::SqlitePool;

    async fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            config: Config::default(),
            db: init_test_pool().await,
        })
    }

    async fn seed_user(db: &SqlitePool, id: &str, role: &str) -> User {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, is_active, created_at, updated_at)
            VALUES (?, ?, ?, 'x', ?, 1, ?, ?)
            "#,
        )
        .bind(id)
        .bind(format!("user-{id}"))
        .bind(format!("{id}@company.com"))
        .bind(role)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await
        .unwrap();
        crate::db::models::user::find_user(db, id).await.unwrap().unwrap()
    }

    fn sheet_bytes(rows: &[(&str, &str)]) -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let ws = workbook.add_worksheet();
        ws.write(0, 0, "App ID").unwrap();
        ws.write(0, 1, "Name").unwrap();
        for (i, (app_id, name)) in rows.iter().enumerate() {
            let row = i as u32 + 1;
            ws.write(row, 0, *app_id).unwrap();
            ws.write(row, 1, *name).unwrap();
        }
        workbook.save_to_buffer().unwrap()
    }

    async fn multipart_from(bytes: Vec<u8>) -> Multipart {
        let mut body = Vec::new();
        body.extend_from_slice(b"--BOUNDARY\r\n");
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"upload.xlsx\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(&bytes);
        body.extend_from_slice(b"\r\n--BOUNDARY--\r\n");

        let request = axum::http::Request::builder()
            .header("content-type", "multipart/form-data; boundary=BOUNDARY")
            .body(axum::body::Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    #[tokio::test]
    async fn upload_creates_rows_and_reports_errors() {
        let state = test_state().await;
        let admin = seed_user(&state.db, "adm-1", "ADMIN").await;
        let multipart =
            multipart_from(sheet_bytes(&[("A1", "Jane Doe"), ("", "John Doe")])).await;

        let (status, Json(body)) =
            upload(State(state.clone()), admin, multipart).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["created_count"], 1);
        assert_eq!(body["errors"][0], "Row 3: App ID is required");
    }

    #[tokio::test]
    async fn row_missing_name_does_not_claim_its_app_id() {
        let state = test_state().await;
        let admin = seed_user(&state.db, "adm-1", "ADMIN").await;
        let multipart = multipart_from(sheet_bytes(&[("A1", ""), ("A1", "Jane Doe")])).await;

        let (_, Json(body)) = upload(State(state.clone()), admin, multipart).await.unwrap();
        assert_eq!(body["created_count"], 1);
        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0], "Row 2: Name is required");

        let stored: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pf_continue_data WHERE app_id = 'A1'")
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn duplicate_app_id_in_file_is_rejected() {
        let state = test_state().await;
        let admin = seed_user(&state.db, "adm-1", "ADMIN").await;
        let multipart =
            multipart_from(sheet_bytes(&[("A1", "Jane Doe"), ("A1", "John Doe")])).await;

        let (_, Json(body)) = upload(State(state.clone()), admin, multipart).await.unwrap();
        assert_eq!(body["created_count"], 1);
        assert_eq!(
            body["errors"][0],
            "Row 3: duplicate App ID 'A1' in this file"
        );
    }
}
