//! Application records and the filtered/paginated listing over them.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;

use super::user::UserResponse;

/// Processing status of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    Untouch,
    Pending,
    Hold,
    Done,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Untouch => "UNTOUCH",
            AppStatus::Pending => "PENDING",
            AppStatus::Hold => "HOLD",
            AppStatus::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<AppStatus> {
        match s {
            "UNTOUCH" => Some(AppStatus::Untouch),
            "PENDING" => Some(AppStatus::Pending),
            "HOLD" => Some(AppStatus::Hold),
            "DONE" => Some(AppStatus::Done),
            _ => None,
        }
    }

    pub fn choices() -> Vec<&'static str> {
        vec!["UNTOUCH", "PENDING", "HOLD", "DONE"]
    }
}

/// Main vs supplementary card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Card {
    Main,
    Supple,
}

impl Card {
    pub fn parse(s: &str) -> Option<Card> {
        match s {
            "MAIN" => Some(Card::Main),
            "SUPPLE" => Some(Card::Supple),
            _ => None,
        }
    }

    pub fn choices() -> Vec<&'static str> {
        vec!["MAIN", "SUPPLE"]
    }
}

/// Card product tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Classic,
    Gold,
    Platinum,
}

impl CardType {
    pub fn parse(s: &str) -> Option<CardType> {
        match s {
            "CLASSIC" => Some(CardType::Classic),
            "GOLD" => Some(CardType::Gold),
            "PLATINUM" => Some(CardType::Platinum),
            _ => None,
        }
    }

    pub fn choices() -> Vec<&'static str> {
        vec!["CLASSIC", "GOLD", "PLATINUM"]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Application {
    pub id: String,
    pub date: String,
    pub branch_code: String,
    pub app_id: String,
    pub name: String,
    pub card: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub card_type: String,
    pub status: String,
    pub remarks: Option<String>,
    pub assigned_to_id: Option<String>,
    pub work_on: Option<String>,
    pub inform_to: Option<String>,
    pub ipt: Option<String>,
    pub pf_continue_matched: bool,
    pub pf_continue_remarks: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub created_by_id: Option<String>,
}

/// Application row plus the user projections the original API embeds
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationResponse {
    #[serde(flatten)]
    pub application: Application,
    pub assigned_to: Option<UserResponse>,
    pub created_by: Option<UserResponse>,
}

impl ApplicationResponse {
    pub fn build(app: Application, users: &HashMap<String, UserResponse>) -> Self {
        let assigned_to = app
            .assigned_to_id
            .as_deref()
            .and_then(|id| users.get(id))
            .cloned();
        let created_by = app
            .created_by_id
            .as_deref()
            .and_then(|id| users.get(id))
            .cloned();
        Self {
            application: app,
            assigned_to,
            created_by,
        }
    }
}

/// Query parameters for the application listing
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApplicationQuery {
    /// Page number (1-indexed, defaults to 1)
    pub page: Option<i64>,
    /// Items per page (defaults to 20, max 100)
    pub per_page: Option<i64>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub card_type: Option<String>,
    pub branch_code: Option<String>,
    pub assigned_to: Option<String>,
}

/// Paginated listing response; key names match the existing API contract
#[derive(Debug, Serialize)]
pub struct ApplicationListResponse {
    pub applications: Vec<ApplicationResponse>,
    pub total: i64,
    pub pages: i64,
    pub current_page: i64,
    pub per_page: i64,
}

/// List applications with filtering and pagination.
///
/// `officer_scope` restricts the listing to one officer's assignments; when
/// set, the `assigned_to` filter from the query is ignored.
pub async fn list_applications(
    db: &SqlitePool,
    query: &ApplicationQuery,
    officer_scope: Option<&str>,
) -> Result<ApplicationListResponse, sqlx::Error> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    // Build dynamic WHERE clause; empty filters are omitted entirely
    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(officer_id) = officer_scope {
        conditions.push("assigned_to_id = ?");
        bindings.push(officer_id.to_string());
    }

    if let Some(status) = non_empty(&query.status) {
        conditions.push("status = ?");
        bindings.push(status.to_string());
    }

    if let Some(card_type) = non_empty(&query.card_type) {
        conditions.push("type = ?");
        bindings.push(card_type.to_string());
    }

    if let Some(branch_code) = non_empty(&query.branch_code) {
        conditions.push("branch_code = ?");
        bindings.push(branch_code.to_string());
    }

    if officer_scope.is_none() {
        if let Some(assigned_to) = non_empty(&query.assigned_to) {
            conditions.push("assigned_to_id = ?");
            bindings.push(assigned_to.to_string());
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM applications {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM applications {} ORDER BY date DESC, app_id LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, Application>(&sql);
    for binding in &bindings {
        list_query = list_query.bind(binding);
    }
    list_query = list_query.bind(per_page).bind(offset);

    let rows = list_query.fetch_all(db).await?;

    let users = super::user::user_map(db).await?;
    let applications = rows
        .into_iter()
        .map(|app| ApplicationResponse::build(app, &users))
        .collect();

    let pages = (total as f64 / per_page as f64).ceil() as i64;

    Ok(ApplicationListResponse {
        applications,
        total,
        pages,
        current_page: page,
        per_page,
    })
}

pub async fn find_application(
    db: &SqlitePool,
    id: &str,
) -> Result<Option<Application>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM applications WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Insert a new application row. Used by the bulk importer.
pub struct NewApplication {
    pub date: String,
    pub branch_code: String,
    pub app_id: String,
    pub name: String,
    pub card: String,
    pub card_type: String,
    pub remarks: Option<String>,
    pub work_on: Option<String>,
    pub inform_to: Option<String>,
    pub ipt: Option<String>,
    pub created_by_id: String,
}

pub async fn insert_application(
    db: &SqlitePool,
    new: &NewApplication,
) -> Result<String, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO applications (id, date, branch_code, app_id, name, card, type, status, remarks, work_on, inform_to, ipt, created_at, updated_at, created_by_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'UNTOUCH', ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&new.date)
    .bind(&new.branch_code)
    .bind(&new.app_id)
    .bind(&new.name)
    .bind(&new.card)
    .bind(&new.card_type)
    .bind(&new.remarks)
    .bind(&new.work_on)
    .bind(&new.inform_to)
    .bind(&new.ipt)
    .bind(&now)
    .bind(&now)
    .bind(&new.created_by_id)
    .execute(db)
    .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_pool;

    async fn seed_application(
        db: &SqlitePool,
        app_id: &str,
        status: &str,
        branch: &str,
        assigned_to: Option<&str>,
    ) {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO applications (id, date, branch_code, app_id, name, card, type, status, assigned_to_id, created_at, updated_at)
            VALUES (?, '2024-01-15', ?, ?, 'Test Person', 'MAIN', 'GOLD', ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(branch)
        .bind(app_id)
        .bind(status)
        .bind(assigned_to)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn empty_listing_has_zero_pages() {
        let db = init_test_pool().await;
        let result = list_applications(&db, &ApplicationQuery::default(), None)
            .await
            .unwrap();
        assert_eq!(result.total, 0);
        assert_eq!(result.pages, 0);
        assert_eq!(result.current_page, 1);
        assert!(result.applications.is_empty());
    }

    #[tokio::test]
    async fn status_filter_and_pagination_math() {
        let db = init_test_pool().await;
        for i in 0..3 {
            seed_application(&db, &format!("P{}", i), "PENDING", "001", None).await;
        }
        seed_application(&db, "D0", "DONE", "001", None).await;

        let query = ApplicationQuery {
            status: Some("PENDING".into()),
            ..Default::default()
        };
        let result = list_applications(&db, &query, None).await.unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.pages, 1);
        assert_eq!(result.applications.len(), 3);

        // Second page of a one-page result set is empty but keeps the total
        let query = ApplicationQuery {
            status: Some("PENDING".into()),
            page: Some(2),
            ..Default::default()
        };
        let result = list_applications(&db, &query, None).await.unwrap();
        assert_eq!(result.total, 3);
        assert!(result.applications.is_empty());
    }

    #[tokio::test]
    async fn per_page_is_clamped() {
        let db = init_test_pool().await;
        seed_application(&db, "A1", "UNTOUCH", "002", None).await;

        let query = ApplicationQuery {
            per_page: Some(100_000),
            ..Default::default()
        };
        let result = list_applications(&db, &query, None).await.unwrap();
        assert_eq!(result.per_page, 100);

        let query = ApplicationQuery {
            per_page: Some(0),
            page: Some(-3),
            ..Default::default()
        };
        let result = list_applications(&db, &query, None).await.unwrap();
        assert_eq!(result.per_page, 1);
        assert_eq!(result.current_page, 1);
    }

    #[tokio::test]
    async fn officer_scope_overrides_assigned_filter() {
        let db = init_test_pool().await;
        seed_application(&db, "A1", "PENDING", "001", Some("officer-1")).await;
        seed_application(&db, "A2", "PENDING", "001", Some("officer-2")).await;

        // The officer asks for someone else's assignments; scoping wins
        let query = ApplicationQuery {
            assigned_to: Some("officer-2".into()),
            ..Default::default()
        };
        let result = list_applications(&db, &query, Some("officer-1"))
            .await
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.applications[0].application.app_id, "A1");
    }

    #[tokio::test]
    async fn idempotent_listing() {
        let db = init_test_pool().await;
        seed_application(&db, "A1", "PENDING", "001", None).await;
        seed_application(&db, "A2", "PENDING", "002", None).await;

        let query = ApplicationQuery {
            status: Some("PENDING".into()),
            ..Default::default()
        };
        let first = list_applications(&db, &query, None).await.unwrap();
        let second = list_applications(&db, &query, None).await.unwrap();
        assert_eq!(first.total, second.total);
        assert_eq!(first.applications.len(), second.applications.len());
    }

    #[test]
    fn enum_choices_are_closed() {
        assert_eq!(AppStatus::choices(), vec!["UNTOUCH", "PENDING", "HOLD", "DONE"]);
        assert_eq!(Card::choices(), vec!["MAIN", "SUPPLE"]);
        assert_eq!(CardType::choices(), vec!["CLASSIC", "GOLD", "PLATINUM"]);
        assert!(AppStatus::parse("REJECTED").is_none());
        assert!(CardType::parse("gold").is_none());
    }
}
