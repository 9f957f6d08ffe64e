//! Reporting endpoints: dashboard metrics, daily and branch breakdowns,
//! officer performance, the custom report, and the Excel export.
//!
//! Officers get every report scoped to their own assignments; admins and
//! viewers see the whole portfolio.

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::ApiError;
use super::validation;
use crate::db::models::{
    user, Application, ApplicationResponse, AppStatus, CardType, HistoryEntryResponse,
    User, UserResponse,
};
use crate::AppState;

const OLD_PENDING_DAYS: i64 = 3;

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Count rows per distinct value of `column`, seeded with zeroes for the
/// known choices so the response shape is stable.
async fn counts_by_column(
    state: &AppState,
    column: &str,
    choices: &[&str],
    officer_scope: Option<&str>,
) -> Result<serde_json::Map<String, serde_json::Value>, ApiError> {
    let sql = match officer_scope {
        Some(_) => format!(
            "SELECT {column}, COUNT(*) FROM applications WHERE assigned_to_id = ? GROUP BY {column}"
        ),
        None => format!("SELECT {column}, COUNT(*) FROM applications GROUP BY {column}"),
    };
    let mut query = sqlx::query_as::<_, (String, i64)>(&sql);
    if let Some(officer_id) = officer_scope {
        query = query.bind(officer_id);
    }
    let rows = query.fetch_all(&state.db).await?;

    let mut counts = serde_json::Map::new();
    for choice in choices {
        counts.insert(choice.to_string(), json!(0));
    }
    for (value, count) in rows {
        counts.insert(value, json!(count));
    }
    Ok(counts)
}

async fn scoped_count(
    state: &AppState,
    condition: &str,
    bindings: &[&str],
    officer_scope: Option<&str>,
) -> Result<i64, ApiError> {
    let mut conditions = vec![condition.to_string()];
    if officer_scope.is_some() {
        conditions.push("assigned_to_id = ?".to_string());
    }
    let sql = format!(
        "SELECT COUNT(*) FROM applications WHERE {}",
        conditions.join(" AND ")
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for binding in bindings {
        query = query.bind(*binding);
    }
    if let Some(officer_id) = officer_scope {
        query = query.bind(officer_id);
    }
    Ok(query.fetch_one(&state.db).await?)
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = user.is_officer().then_some(user.id.as_str());
    let today_str = today().format("%Y-%m-%d").to_string();
    let old_cutoff = (today() - Duration::days(OLD_PENDING_DAYS))
        .format("%Y-%m-%d")
        .to_string();

    let total_applications = scoped_count(&state, "1 = 1", &[], scope).await?;
    let today_applications = scoped_count(&state, "date = ?", &[&today_str], scope).await?;
    let old_pending_count = scoped_count(
        &state,
        "status != 'DONE' AND date < ?",
        &[&old_cutoff],
        scope,
    )
    .await?;

    let status_counts =
        counts_by_column(&state, "status", &AppStatus::choices(), scope).await?;
    let type_counts = counts_by_column(&state, "type", &CardType::choices(), scope).await?;

    // Ten busiest branches
    let branch_sql = match scope {
        Some(_) => {
            "SELECT branch_code, COUNT(*) FROM applications WHERE assigned_to_id = ? \
             GROUP BY branch_code ORDER BY COUNT(*) DESC LIMIT 10"
        }
        None => {
            "SELECT branch_code, COUNT(*) FROM applications \
             GROUP BY branch_code ORDER BY COUNT(*) DESC LIMIT 10"
        }
    };
    let mut branch_query = sqlx::query_as::<_, (String, i64)>(branch_sql);
    if let Some(officer_id) = scope {
        branch_query = branch_query.bind(officer_id);
    }
    let branch_counts: Vec<serde_json::Value> = branch_query
        .fetch_all(&state.db)
        .await?
        .into_iter()
        .map(|(branch, count)| json!({ "branch_code": branch, "count": count }))
        .collect();

    let recent_sql = match scope {
        Some(_) => {
            "SELECT * FROM application_history WHERE application_id IN \
             (SELECT id FROM applications WHERE assigned_to_id = ?) \
             ORDER BY timestamp DESC LIMIT 10"
        }
        None => "SELECT * FROM application_history ORDER BY timestamp DESC LIMIT 10",
    };
    let mut recent_query = sqlx::query_as::<_, crate::db::models::HistoryEntry>(recent_sql);
    if let Some(officer_id) = scope {
        recent_query = recent_query.bind(officer_id);
    }
    let entries = recent_query.fetch_all(&state.db).await?;
    let users = user::user_map(&state.db).await?;
    let recent_activity: Vec<HistoryEntryResponse> = entries
        .into_iter()
        .map(|e| HistoryEntryResponse::build(e, &users))
        .collect();

    let mut metrics = json!({
        "total_applications": total_applications,
        "today_applications": today_applications,
        "status_counts": status_counts,
        "type_counts": type_counts,
        "branch_counts": branch_counts,
        "old_pending_count": old_pending_count,
        "recent_activity": recent_activity,
    });

    if scope.is_none() {
        let assigned = scoped_count(&state, "assigned_to_id IS NOT NULL", &[], None).await?;
        let unassigned = scoped_count(&state, "assigned_to_id IS NULL", &[], None).await?;
        metrics["assignment_stats"] = json!({
            "assigned": assigned,
            "unassigned": unassigned,
        });
    }

    Ok(Json(json!({ "dashboard_metrics": metrics })))
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub date: Option<String>,
}

pub async fn daily(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<DailyQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = query
        .date
        .unwrap_or_else(|| today().format("%Y-%m-%d").to_string());
    validation::validate_date(&date).map_err(|e| ApiError::validation_field("date", e))?;

    let scope = user.is_officer().then_some(user.id.as_str());

    let type_sql = match scope {
        Some(_) => {
            "SELECT type, status, COUNT(*) FROM applications \
             WHERE date = ? AND assigned_to_id = ? GROUP BY type, status"
        }
        None => "SELECT type, status, COUNT(*) FROM applications WHERE date = ? GROUP BY type, status",
    };
    let mut type_query = sqlx::query_as::<_, (String, String, i64)>(type_sql).bind(&date);
    if let Some(officer_id) = scope {
        type_query = type_query.bind(officer_id);
    }

    // Per-type blocks carry a total plus a count per status, zeroes included
    let mut breakdown_by_type = serde_json::Map::new();
    for card_type in CardType::choices() {
        let mut block = serde_json::Map::new();
        block.insert("total".to_string(), json!(0));
        for status in AppStatus::choices() {
            block.insert(status.to_string(), json!(0));
        }
        breakdown_by_type.insert(card_type.to_string(), serde_json::Value::Object(block));
    }
    let mut total = 0i64;
    for (card_type, status, count) in type_query.fetch_all(&state.db).await? {
        total += count;
        let block = breakdown_by_type
            .entry(card_type)
            .or_insert_with(|| json!({ "total": 0 }));
        block["total"] = json!(block["total"].as_i64().unwrap_or(0) + count);
        block[&status] = json!(count);
    }

    let mut report = json!({
        "date": date,
        "breakdown_by_type": breakdown_by_type,
        "total_applications": total,
    });

    if scope.is_none() {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT u.username, COUNT(*) FROM applications a \
             JOIN users u ON u.id = a.assigned_to_id \
             WHERE a.date = ? GROUP BY u.username ORDER BY COUNT(*) DESC",
        )
        .bind(&date)
        .fetch_all(&state.db)
        .await?;
        let officer_breakdown: serde_json::Map<String, serde_json::Value> = rows
            .into_iter()
            .map(|(username, count)| (username, json!(count)))
            .collect();
        report["officer_breakdown"] = json!(officer_breakdown);
    }

    Ok(Json(json!({ "daily_report": report })))
}

pub async fn branch_wise(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = user.is_officer().then_some(user.id.as_str());

    let sql = match scope {
        Some(_) => "SELECT * FROM applications WHERE assigned_to_id = ?",
        None => "SELECT * FROM applications",
    };
    let mut query = sqlx::query_as::<_, Application>(sql);
    if let Some(officer_id) = scope {
        query = query.bind(officer_id);
    }
    let apps = query.fetch_all(&state.db).await?;
    let users = user::user_map(&state.db).await?;

    struct BranchStats {
        total: i64,
        status_counts: HashMap<String, i64>,
        officer_ids: Vec<String>,
    }

    let mut branches: HashMap<String, BranchStats> = HashMap::new();
    for app in &apps {
        let stats = branches
            .entry(app.branch_code.clone())
            .or_insert_with(|| BranchStats {
                total: 0,
                status_counts: HashMap::new(),
                officer_ids: Vec::new(),
            });
        stats.total += 1;
        *stats.status_counts.entry(app.status.clone()).or_insert(0) += 1;
        if let Some(officer_id) = &app.assigned_to_id {
            if !stats.officer_ids.contains(officer_id) {
                stats.officer_ids.push(officer_id.clone());
            }
        }
    }

    let mut report: Vec<serde_json::Value> = branches
        .into_iter()
        .map(|(branch_code, stats)| {
            let mut status_breakdown = serde_json::Map::new();
            for choice in AppStatus::choices() {
                let count = stats.status_counts.get(choice).copied().unwrap_or(0);
                status_breakdown.insert(choice.to_string(), json!(count));
            }
            let mut entry = json!({
                "branch_code": branch_code,
                "total": stats.total,
                "status_breakdown": status_breakdown,
            });
            if scope.is_none() {
                let officers: Vec<&str> = stats
                    .officer_ids
                    .iter()
                    .filter_map(|id| users.get(id))
                    .map(|u| u.username.as_str())
                    .collect();
                entry["assigned_officers"] = json!(officers);
            }
            entry
        })
        .collect();
    report.sort_by_key(|entry| std::cmp::Reverse(entry["total"].as_i64().unwrap_or(0)));

    Ok(Json(json!({ "branch_wise_report": report })))
}

fn days_between(from: &str, to: &str) -> Option<f64> {
    let from = DateTime::parse_from_rfc3339(from).ok()?;
    let to = DateTime::parse_from_rfc3339(to).ok()?;
    Some((to - from).num_seconds() as f64 / 86_400.0)
}

#[derive(Debug, Serialize)]
struct OfficerPerformance {
    officer: UserResponse,
    total_assigned: i64,
    status_counts: HashMap<String, i64>,
    done_count: i64,
    avg_processing_days: Option<f64>,
    oldest_pending_days: Option<i64>,
}

pub async fn officer_performance(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<serde_json::Value>, ApiError> {
    let officers: Vec<User> = if user.is_officer() {
        vec![user.clone()]
    } else {
        sqlx::query_as("SELECT * FROM users WHERE role = 'OFFICER' AND is_active = 1 ORDER BY username")
            .fetch_all(&state.db)
            .await?
    };

    let apps: Vec<Application> =
        sqlx::query_as("SELECT * FROM applications WHERE assigned_to_id IS NOT NULL")
            .fetch_all(&state.db)
            .await?;

    let today = today();
    let mut report = Vec::with_capacity(officers.len());
    for officer in officers {
        let own: Vec<&Application> = apps
            .iter()
            .filter(|a| a.assigned_to_id.as_deref() == Some(officer.id.as_str()))
            .collect();

        let mut status_counts: HashMap<String, i64> = AppStatus::choices()
            .into_iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        for app in &own {
            *status_counts.entry(app.status.clone()).or_insert(0) += 1;
        }

        let done_durations: Vec<f64> = own
            .iter()
            .filter(|a| a.status == "DONE")
            .filter_map(|a| days_between(&a.created_at, &a.updated_at))
            .collect();
        let avg_processing_days = (!done_durations.is_empty()).then(|| {
            let avg = done_durations.iter().sum::<f64>() / done_durations.len() as f64;
            (avg * 10.0).round() / 10.0
        });

        let oldest_pending_days = own
            .iter()
            .filter(|a| a.status != "DONE")
            .filter_map(|a| NaiveDate::parse_from_str(&a.date, "%Y-%m-%d").ok())
            .map(|date| (today - date).num_days())
            .max();

        report.push(OfficerPerformance {
            done_count: own.iter().filter(|a| a.status == "DONE").count() as i64,
            total_assigned: own.len() as i64,
            status_counts,
            avg_processing_days,
            oldest_pending_days,
            officer: UserResponse::from(officer),
        });
    }

    Ok(Json(json!({ "officer_performance": report })))
}

/// Filters shared by the custom report and the Excel export
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReportFilters {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub card_type: Option<String>,
    pub branch_code: Option<String>,
    pub officer_id: Option<String>,
}

async fn fetch_filtered(
    state: &AppState,
    filters: &ReportFilters,
    officer_scope: Option<&str>,
) -> Result<Vec<Application>, ApiError> {
    for date in [&filters.start_date, &filters.end_date].into_iter().flatten() {
        validation::validate_date(date).map_err(|e| ApiError::validation_field("date", e))?;
    }
    if let Some(status) = &filters.status {
        validation::validate_status(status)
            .map_err(|e| ApiError::validation_field("status", e))?;
    }
    if let Some(card_type) = &filters.card_type {
        validation::validate_card_type(card_type)
            .map_err(|e| ApiError::validation_field("type", e))?;
    }

    let mut conditions: Vec<&str> = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(start) = &filters.start_date {
        conditions.push("date >= ?");
        bindings.push(start.clone());
    }
    if let Some(end) = &filters.end_date {
        conditions.push("date <= ?");
        bindings.push(end.clone());
    }
    if let Some(status) = &filters.status {
        conditions.push("status = ?");
        bindings.push(status.clone());
    }
    if let Some(card_type) = &filters.card_type {
        conditions.push("type = ?");
        bindings.push(card_type.clone());
    }
    if let Some(branch_code) = &filters.branch_code {
        conditions.push("branch_code = ?");
        bindings.push(branch_code.clone());
    }
    match officer_scope {
        Some(officer_id) => {
            conditions.push("assigned_to_id = ?");
            bindings.push(officer_id.to_string());
        }
        None => {
            if let Some(officer_id) = &filters.officer_id {
                conditions.push("assigned_to_id = ?");
                bindings.push(officer_id.clone());
            }
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let sql = format!(
        "SELECT * FROM applications {} ORDER BY date DESC, app_id",
        where_clause
    );
    let mut query = sqlx::query_as::<_, Application>(&sql);
    for binding in &bindings {
        query = query.bind(binding);
    }
    Ok(query.fetch_all(&state.db).await?)
}

fn breakdown<'a>(
    apps: &'a [Application],
    key: impl Fn(&'a Application) -> &'a str,
) -> serde_json::Map<String, serde_json::Value> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for app in apps {
        *counts.entry(key(app)).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

pub async fn custom(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(filters): Json<ReportFilters>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = user.is_officer().then_some(user.id.as_str());
    let apps = fetch_filtered(&state, &filters, scope).await?;
    let users = user::user_map(&state.db).await?;

    let summary = json!({
        "total_applications": apps.len(),
        "status_breakdown": breakdown(&apps, |a| &a.status),
        "type_breakdown": breakdown(&apps, |a| &a.card_type),
        "branch_breakdown": breakdown(&apps, |a| &a.branch_code),
    });
    let applications: Vec<ApplicationResponse> = apps
        .into_iter()
        .map(|app| ApplicationResponse::build(app, &users))
        .collect();

    Ok(Json(json!({
        "custom_report": {
            "filters": filters,
            "summary": summary,
            "applications": applications,
        }
    })))
}

const EXPORT_HEADERS: [&str; 12] = [
    "Date",
    "Branch Code",
    "App ID",
    "Name",
    "Card",
    "Type",
    "Status",
    "Remarks",
    "Assigned To",
    "PF Continue Matched",
    "Created At",
    "Updated At",
];

fn export_workbook(
    apps: &[Application],
    users: &HashMap<String, UserResponse>,
) -> Result<Vec<u8>, ApiError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet
        .set_name("Applications")
        .map_err(|e| ApiError::internal(format!("Failed to build export: {e}")))?;

    let header_format = Format::new().set_bold();
    for (col, header) in EXPORT_HEADERS.iter().enumerate() {
        sheet
            .write_with_format(0, col as u16, *header, &header_format)
            .map_err(|e| ApiError::internal(format!("Failed to build export: {e}")))?;
    }

    let mut write = |row: u32, col: u16, value: &str| {
        sheet
            .write(row, col, value)
            .map(|_| ())
            .map_err(|e| ApiError::internal(format!("Failed to build export: {e}")))
    };

    for (index, app) in apps.iter().enumerate() {
        let row = index as u32 + 1;
        let assigned_to = app
            .assigned_to_id
            .as_deref()
            .and_then(|id| users.get(id))
            .map(|u| u.username.as_str())
            .unwrap_or("");
        write(row, 0, &app.date)?;
        write(row, 1, &app.branch_code)?;
        write(row, 2, &app.app_id)?;
        write(row, 3, &app.name)?;
        write(row, 4, &app.card)?;
        write(row, 5, &app.card_type)?;
        write(row, 6, &app.status)?;
        write(row, 7, app.remarks.as_deref().unwrap_or(""))?;
        write(row, 8, assigned_to)?;
        write(row, 9, if app.pf_continue_matched { "Yes" } else { "No" })?;
        write(row, 10, &app.created_at)?;
        write(row, 11, &app.updated_at)?;
    }

    workbook
        .save_to_buffer()
        .map_err(|e| ApiError::internal(format!("Failed to build export: {e}")))
}

pub async fn export_excel(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(filters): Json<ReportFilters>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = user.is_officer().then_some(user.id.as_str());
    let apps = fetch_filtered(&state, &filters, scope).await?;
    let users = user::user_map(&state.db).await?;
    let bytes = export_workbook(&apps, &users)?;

    let filename = format!(
        "credit_card_applications_{}.xlsx",
        today().format("%Y-%m-%d")
    );
    tracing::info!(rows = apps.len(), filename = %filename, "Excel export generated");

    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    ))
}
