//! Change history for application records.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;

use super::user::UserResponse;

/// History actions
pub mod actions {
    pub const CREATE: &str = "CREATE";
    pub const UPDATE: &str = "UPDATE";
    pub const ASSIGN: &str = "ASSIGN";
    pub const STATUS_CHANGE: &str = "STATUS_CHANGE";
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HistoryEntry {
    pub id: String,
    pub application_id: String,
    pub action: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub remarks: Option<String>,
    pub changed_by_id: Option<String>,
    pub timestamp: String,
}

/// History entry with JSON values decoded and the actor attached
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntryResponse {
    pub id: String,
    pub application_id: String,
    pub action: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub remarks: Option<String>,
    pub changed_by_id: Option<String>,
    pub changed_by: Option<UserResponse>,
    pub timestamp: String,
}

impl HistoryEntryResponse {
    pub fn build(entry: HistoryEntry, users: &HashMap<String, UserResponse>) -> Self {
        let changed_by = entry
            .changed_by_id
            .as_deref()
            .and_then(|id| users.get(id))
            .cloned();
        Self {
            old_value: entry
                .old_value
                .as_deref()
                .and_then(|v| serde_json::from_str(v).ok()),
            new_value: entry
                .new_value
                .as_deref()
                .and_then(|v| serde_json::from_str(v).ok()),
            id: entry.id,
            application_id: entry.application_id,
            action: entry.action,
            remarks: entry.remarks,
            changed_by_id: entry.changed_by_id,
            changed_by,
            timestamp: entry.timestamp,
        }
    }
}

/// Record a history entry for an application change. Takes any SQLite
/// executor so it can participate in a caller's transaction.
pub async fn record_history<'e, E>(
    db: E,
    application_id: &str,
    action: &str,
    old_value: Option<serde_json::Value>,
    new_value: Option<serde_json::Value>,
    changed_by_id: Option<&str>,
    remarks: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO application_history (id, application_id, action, old_value, new_value, remarks, changed_by_id, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(application_id)
    .bind(action)
    .bind(old_value.map(|v| v.to_string()))
    .bind(new_value.map(|v| v.to_string()))
    .bind(remarks)
    .bind(changed_by_id)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::debug!(
        application_id = application_id,
        action = action,
        "History entry recorded"
    );

    Ok(())
}

/// History for one application, newest first
pub async fn list_history(
    db: &SqlitePool,
    application_id: &str,
) -> Result<Vec<HistoryEntry>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM application_history WHERE application_id = ? ORDER BY timestamp DESC",
    )
    .bind(application_id)
    .fetch_all(db)
    .await
}
