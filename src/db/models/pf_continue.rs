//! PFContinue reconciliation records and the cross-check run over them.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;

use super::application::Application;
use super::history::{self, actions};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PfContinueRecord {
    pub id: String,
    pub app_id: String,
    pub customer_name: String,
    pub branch_code: String,
    pub upload_date: String,
    pub additional_data: Option<String>,
    pub uploaded_by_id: Option<String>,
    pub created_at: String,
}

/// Record with the additional-data JSON decoded for clients
#[derive(Debug, Clone, Serialize)]
pub struct PfContinueResponse {
    pub id: String,
    pub app_id: String,
    pub customer_name: String,
    pub branch_code: String,
    pub upload_date: String,
    pub additional_data: Option<serde_json::Value>,
    pub uploaded_by_id: Option<String>,
    pub created_at: String,
}

impl From<PfContinueRecord> for PfContinueResponse {
    fn from(record: PfContinueRecord) -> Self {
        Self {
            additional_data: record
                .additional_data
                .as_deref()
                .and_then(|v| serde_json::from_str(v).ok()),
            id: record.id,
            app_id: record.app_id,
            customer_name: record.customer_name,
            branch_code: record.branch_code,
            upload_date: record.upload_date,
            uploaded_by_id: record.uploaded_by_id,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PfContinueQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub upload_date: Option<String>,
    pub app_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PfContinueListResponse {
    pub pf_continue_data: Vec<PfContinueResponse>,
    pub total: i64,
    pub pages: i64,
    pub current_page: i64,
    pub per_page: i64,
}

pub struct NewPfContinueRecord {
    pub app_id: String,
    pub customer_name: String,
    pub branch_code: String,
    pub upload_date: String,
    pub additional_data: Option<serde_json::Value>,
    pub uploaded_by_id: String,
}

pub async fn insert_pf_record(
    db: &SqlitePool,
    new: &NewPfContinueRecord,
) -> Result<(), sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO pf_continue_data (id, app_id, customer_name, branch_code, upload_date, additional_data, uploaded_by_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&new.app_id)
    .bind(&new.customer_name)
    .bind(&new.branch_code)
    .bind(&new.upload_date)
    .bind(new.additional_data.as_ref().map(|v| v.to_string()))
    .bind(&new.uploaded_by_id)
    .bind(&now)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn pf_record_exists(
    db: &SqlitePool,
    app_id: &str,
    upload_date: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pf_continue_data WHERE app_id = ? AND upload_date = ?",
    )
    .bind(app_id)
    .bind(upload_date)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

/// List reconciliation records with filtering and pagination
pub async fn list_pf_records(
    db: &SqlitePool,
    query: &PfContinueQuery,
) -> Result<PfContinueListResponse, sqlx::Error> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(upload_date) = query.upload_date.as_deref().filter(|s| !s.is_empty()) {
        conditions.push("upload_date = ?");
        bindings.push(upload_date.to_string());
    }

    if let Some(app_id) = query.app_id.as_deref().filter(|s| !s.is_empty()) {
        conditions.push("app_id LIKE ?");
        bindings.push(format!("%{}%", app_id));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM pf_continue_data {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM pf_continue_data {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, PfContinueRecord>(&sql);
    for binding in &bindings {
        list_query = list_query.bind(binding);
    }
    list_query = list_query.bind(per_page).bind(offset);

    let records = list_query.fetch_all(db).await?;
    let pages = (total as f64 / per_page as f64).ceil() as i64;

    Ok(PfContinueListResponse {
        pf_continue_data: records.into_iter().map(PfContinueResponse::from).collect(),
        total,
        pages,
        current_page: page,
        per_page,
    })
}

/// Application fields echoed back for unmatched rows
#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedApplication {
    pub app_id: String,
    pub name: String,
    pub branch_code: String,
    #[serde(rename = "type")]
    pub card_type: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedPfRecord {
    pub app_id: String,
    pub customer_name: String,
    pub branch_code: String,
}

#[derive(Debug, Serialize)]
pub struct CrossCheckResult {
    pub message: String,
    pub matched_count: i64,
    pub unmatched_applications: Vec<UnmatchedApplication>,
    pub unmatched_pf_data: Vec<UnmatchedPfRecord>,
    pub total_applications: i64,
    pub total_pf_records: i64,
}

/// Outcome of a cross-check when no reconciliation rows exist for the date
#[derive(Debug)]
pub enum CrossCheckError {
    NoDataForDate,
    Db(sqlx::Error),
}

impl From<sqlx::Error> for CrossCheckError {
    fn from(err: sqlx::Error) -> Self {
        CrossCheckError::Db(err)
    }
}

/// Run the reconciliation pass for one upload date.
///
/// Every application whose `app_id` appears in that date's PFContinue set is
/// marked matched; only transitions from unmatched to matched count as new
/// matches and produce history rows. Leftover PFContinue entries and
/// applications without a counterpart are returned verbatim.
pub async fn run_cross_check(
    db: &SqlitePool,
    upload_date: &str,
    changed_by_id: &str,
) -> Result<CrossCheckResult, CrossCheckError> {
    let pf_records: Vec<PfContinueRecord> =
        sqlx::query_as("SELECT * FROM pf_continue_data WHERE upload_date = ?")
            .bind(upload_date)
            .fetch_all(db)
            .await?;

    if pf_records.is_empty() {
        return Err(CrossCheckError::NoDataForDate);
    }

    let total_pf_records = pf_records.len() as i64;
    let mut pf_lookup: HashMap<String, PfContinueRecord> = pf_records
        .into_iter()
        .map(|r| (r.app_id.clone(), r))
        .collect();

    let applications: Vec<Application> = sqlx::query_as("SELECT * FROM applications")
        .fetch_all(db)
        .await?;
    let total_applications = applications.len() as i64;

    let mut matched_count = 0;
    let mut unmatched_applications = Vec::new();
    let now = chrono::Utc::now().to_rfc3339();

    // All flag updates and history rows land atomically: a failed run leaves
    // no partial cross-check behind.
    let mut tx = db.begin().await?;

    for app in &applications {
        if pf_lookup.remove(&app.app_id).is_some() {
            if !app.pf_continue_matched {
                sqlx::query(
                    "UPDATE applications SET pf_continue_matched = 1, updated_at = ? WHERE id = ?",
                )
                .bind(&now)
                .bind(&app.id)
                .execute(&mut *tx)
                .await?;

                history::record_history(
                    &mut *tx,
                    &app.id,
                    actions::UPDATE,
                    Some(serde_json::json!({"pf_continue_matched": false})),
                    Some(serde_json::json!({"pf_continue_matched": true})),
                    Some(changed_by_id),
                    Some("Matched with PFContinue data"),
                )
                .await?;

                matched_count += 1;
            }
        } else {
            unmatched_applications.push(UnmatchedApplication {
                app_id: app.app_id.clone(),
                name: app.name.clone(),
                branch_code: app.branch_code.clone(),
                card_type: app.card_type.clone(),
                status: app.status.clone(),
            });
        }
    }

    tx.commit().await?;

    let mut unmatched_pf_data: Vec<UnmatchedPfRecord> = pf_lookup
        .into_values()
        .map(|r| UnmatchedPfRecord {
            app_id: r.app_id,
            customer_name: r.customer_name,
            branch_code: r.branch_code,
        })
        .collect();
    unmatched_pf_data.sort_by(|a, b| a.app_id.cmp(&b.app_id));

    Ok(CrossCheckResult {
        message: format!("Cross-check completed. {} new matches found.", matched_count),
        matched_count,
        unmatched_applications,
        unmatched_pf_data,
        total_applications,
        total_pf_records,
    })
}

#[derive(Debug, Serialize)]
pub struct CrossCheckSummary {
    pub total_applications: i64,
    pub matched_applications: i64,
    pub unmatched_applications: i64,
    pub total_pf_records: i64,
    pub match_percentage: f64,
}

/// Aggregate match counts; `upload_date` scopes only the PFContinue total
pub async fn cross_check_summary(
    db: &SqlitePool,
    upload_date: &str,
) -> Result<CrossCheckSummary, sqlx::Error> {
    let total_applications: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM applications")
        .fetch_one(db)
        .await?;
    let matched_applications: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM applications WHERE pf_continue_matched = 1")
            .fetch_one(db)
            .await?;
    let total_pf_records: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pf_continue_data WHERE upload_date = ?")
            .bind(upload_date)
            .fetch_one(db)
            .await?;

    let match_percentage = if total_applications > 0 {
        (matched_applications as f64 / total_applications as f64 * 10000.0).round() / 100.0
    } else {
        0.0
    };

    Ok(CrossCheckSummary {
        total_applications,
        matched_applications,
        unmatched_applications: total_applications - matched_applications,
        total_pf_records,
        match_percentage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_pool;

    async fn seed_application(db: &SqlitePool, app_id: &str, matched: bool) {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO applications (id, date, branch_code, app_id, name, card, type, status, pf_continue_matched, created_at, updated_at)
            VALUES (?, '2024-01-15', '001', ?, 'Test Person', 'MAIN', 'GOLD', 'PENDING', ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(app_id)
        .bind(matched)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await
        .unwrap();
    }

    async fn seed_pf(db: &SqlitePool, app_id: &str, name: &str, date: &str) {
        insert_pf_record(
            db,
            &NewPfContinueRecord {
                app_id: app_id.into(),
                customer_name: name.into(),
                branch_code: "001".into(),
                upload_date: date.into(),
                additional_data: None,
                uploaded_by_id: "admin-id".into(),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn cross_check_without_data_fails() {
        let db = init_test_pool().await;
        seed_application(&db, "A1", false).await;
        let err = run_cross_check(&db, "2024-01-15", "admin-id").await;
        assert!(matches!(err, Err(CrossCheckError::NoDataForDate)));
    }

    #[tokio::test]
    async fn cross_check_counts_new_matches_only() {
        let db = init_test_pool().await;
        seed_application(&db, "A1", false).await;
        seed_application(&db, "A2", true).await;
        seed_application(&db, "A3", false).await;
        seed_pf(&db, "A1", "Jane", "2024-01-15").await;
        seed_pf(&db, "A2", "John", "2024-01-15").await;
        seed_pf(&db, "X1", "Jane", "2024-01-15").await;

        let result = run_cross_check(&db, "2024-01-15", "admin-id")
            .await
            .unwrap();

        // A2 was already matched, so only A1 is new
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.total_applications, 3);
        assert_eq!(result.total_pf_records, 3);
        assert_eq!(result.unmatched_applications.len(), 1);
        assert_eq!(result.unmatched_applications[0].app_id, "A3");
        assert_eq!(result.unmatched_pf_data.len(), 1);
        assert_eq!(result.unmatched_pf_data[0].app_id, "X1");
        assert_eq!(result.unmatched_pf_data[0].customer_name, "Jane");
        assert!(result.message.contains("1 new matches found"));

        // A second run finds nothing new
        let again = run_cross_check(&db, "2024-01-15", "admin-id")
            .await
            .unwrap();
        assert_eq!(again.matched_count, 0);
    }

    #[tokio::test]
    async fn cross_check_ignores_other_dates() {
        let db = init_test_pool().await;
        seed_application(&db, "A1", false).await;
        seed_pf(&db, "A1", "Jane", "2024-01-14").await;

        let err = run_cross_check(&db, "2024-01-15", "admin-id").await;
        assert!(matches!(err, Err(CrossCheckError::NoDataForDate)));
    }

    #[tokio::test]
    async fn summary_percentage() {
        let db = init_test_pool().await;
        seed_application(&db, "A1", true).await;
        seed_application(&db, "A2", false).await;
        seed_application(&db, "A3", false).await;
        seed_pf(&db, "A1", "Jane", "2024-01-15").await;

        let summary = cross_check_summary(&db, "2024-01-15").await.unwrap();
        assert_eq!(summary.total_applications, 3);
        assert_eq!(summary.matched_applications, 1);
        assert_eq!(summary.unmatched_applications, 2);
        assert_eq!(summary.total_pf_records, 1);
        assert_eq!(summary.match_percentage, 33.33);
    }

    #[tokio::test]
    async fn summary_with_no_applications() {
        let db = init_test_pool().await;
        let summary = cross_check_summary(&db, "2024-01-15").await.unwrap();
        assert_eq!(summary.match_percentage, 0.0);
        assert_eq!(summary.total_applications, 0);
    }

    #[tokio::test]
    async fn pf_listing_filters_by_app_id_substring() {
        let db = init_test_pool().await;
        seed_pf(&db, "AB123", "Jane", "2024-01-15").await;
        seed_pf(&db, "CD456", "John", "2024-01-15").await;

        let query = PfContinueQuery {
            app_id: Some("B12".into()),
            ..Default::default()
        };
        let result = list_pf_records(&db, &query).await.unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.pf_continue_data[0].app_id, "AB123");
    }
}
