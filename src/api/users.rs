//! User management endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use super::auth;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation;
use crate::db::models::{
    user, CreateUserRequest, Role, UpdateUserRequest, User, UserResponse,
};
use crate::AppState;

pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let users: Vec<User> =
        sqlx::query_as("SELECT * FROM users WHERE is_active = 1 ORDER BY username")
            .fetch_all(&state.db)
            .await?;
    let users: Vec<UserResponse> = users.into_iter().map(UserResponse::from).collect();
    Ok(Json(json!({ "users": users })))
}

/// Active officers, for the assignment picker
pub async fn officers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let users: Vec<User> = sqlx::query_as(
        "SELECT * FROM users WHERE role = 'OFFICER' AND is_active = 1 ORDER BY username",
    )
    .fetch_all(&state.db)
    .await?;
    let officers: Vec<UserResponse> = users.into_iter().map(UserResponse::from).collect();
    Ok(Json(json!({ "officers": officers })))
}

pub async fn roles() -> Json<serde_json::Value> {
    Json(json!({ "roles": Role::choices() }))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    current: User,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Officers may only look up their own account
    if current.is_officer() && current.id != id {
        return Err(ApiError::forbidden("Access denied"));
    }
    let user = user::find_user(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(json!({ "user": UserResponse::from(user) })))
}

async fn username_taken(
    state: &AppState,
    username: &str,
    exclude_id: Option<&str>,
) -> Result<bool, ApiError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ? AND id != ?")
            .bind(username)
            .bind(exclude_id.unwrap_or(""))
            .fetch_one(&state.db)
            .await?;
    Ok(count > 0)
}

async fn email_taken(
    state: &AppState,
    email: &str,
    exclude_id: Option<&str>,
) -> Result<bool, ApiError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ? AND id != ?")
        .bind(email)
        .bind(exclude_id.unwrap_or(""))
        .fetch_one(&state.db)
        .await?;
    Ok(count > 0)
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let role = body.role.as_deref().unwrap_or("OFFICER");

    let mut builder = ValidationErrorBuilder::new();
    if let Err(e) = validation::validate_username(&body.username) {
        builder.add("username", e);
    }
    if let Err(e) = validation::validate_email(&body.email) {
        builder.add("email", e);
    }
    if let Err(e) = validation::validate_password(&body.password) {
        builder.add("password", e);
    }
    if let Err(e) = validation::validate_role(role) {
        builder.add("role", e);
    }
    builder.finish()?;

    if username_taken(&state, &body.username, None).await? {
        return Err(ApiError::bad_request("Username already exists"));
    }
    if email_taken(&state, &body.email, None).await? {
        return Err(ApiError::bad_request("Email already exists"));
    }

    let password_hash = auth::hash_password(&body.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {e}")))?;
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, role, employee_id, department, phone_number, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&body.username)
    .bind(&body.email)
    .bind(&password_hash)
    .bind(role)
    .bind(&body.employee_id)
    .bind(&body.department)
    .bind(&body.phone_number)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    tracing::info!(username = %body.username, role = %role, "User created");

    let user = user::find_user(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::internal("User vanished after insert"))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User created successfully",
            "user": UserResponse::from(user),
        })),
    ))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    current: User,
    Path(id): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target = user::find_user(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if current.is_officer() {
        // Officers edit only their own contact details
        if current.id != id {
            return Err(ApiError::forbidden("Access denied"));
        }
        if body.username.is_some()
            || body.password.is_some()
            || body.role.is_some()
            || body.employee_id.is_some()
            || body.is_active.is_some()
        {
            return Err(ApiError::forbidden(
                "Officers can only update their email, phone number, and department",
            ));
        }
    }

    let mut builder = ValidationErrorBuilder::new();
    if let Some(username) = &body.username {
        if let Err(e) = validation::validate_username(username) {
            builder.add("username", e);
        }
    }
    if let Some(email) = &body.email {
        if let Err(e) = validation::validate_email(email) {
            builder.add("email", e);
        }
    }
    if let Some(password) = &body.password {
        if let Err(e) = validation::validate_password(password) {
            builder.add("password", e);
        }
    }
    if let Some(role) = &body.role {
        if let Err(e) = validation::validate_role(role) {
            builder.add("role", e);
        }
    }
    builder.finish()?;

    if let Some(username) = &body.username {
        if username_taken(&state, username, Some(&id)).await? {
            return Err(ApiError::bad_request("Username already exists"));
        }
    }
    if let Some(email) = &body.email {
        if email_taken(&state, email, Some(&id)).await? {
            return Err(ApiError::bad_request("Email already exists"));
        }
    }

    // Demoting or deactivating the last active admin would lock everyone out
    let leaves_admin_pool = target.is_admin()
        && target.is_active
        && (body.role.as_deref().is_some_and(|r| r != "ADMIN")
            || body.is_active == Some(false));
    if leaves_admin_pool && user::active_admin_count(&state.db).await? <= 1 {
        return Err(ApiError::bad_request(
            "Cannot remove the last active administrator",
        ));
    }

    let password_hash = match &body.password {
        Some(password) => Some(
            auth::hash_password(password)
                .map_err(|e| ApiError::internal(format!("Failed to hash password: {e}")))?,
        ),
        None => None,
    };

    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE users
        SET username = ?, email = ?, password_hash = ?, role = ?, employee_id = ?,
            department = ?, phone_number = ?, is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(body.username.as_deref().unwrap_or(&target.username))
    .bind(body.email.as_deref().unwrap_or(&target.email))
    .bind(password_hash.as_deref().unwrap_or(&target.password_hash))
    .bind(body.role.as_deref().unwrap_or(&target.role))
    .bind(body.employee_id.as_ref().or(target.employee_id.as_ref()))
    .bind(body.department.as_ref().or(target.department.as_ref()))
    .bind(body.phone_number.as_ref().or(target.phone_number.as_ref()))
    .bind(body.is_active.unwrap_or(target.is_active))
    .bind(&now)
    .bind(&id)
    .execute(&state.db)
    .await?;

    let user = user::find_user(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(json!({
        "message": "User updated successfully",
        "user": UserResponse::from(user),
    })))
}

/// Soft delete: the account is deactivated and its sessions revoked, but
/// history rows keep pointing at it.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    current: User,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if current.id == id {
        return Err(ApiError::bad_request("Cannot delete your own account"));
    }

    let target = user::find_user(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if target.is_admin()
        && target.is_active
        && user::active_admin_count(&state.db).await? <= 1
    {
        return Err(ApiError::bad_request(
            "Cannot remove the last active administrator",
        ));
    }

    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query("UPDATE users SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&id)
        .execute(&state.db)
        .await?;
    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    tracing::info!(username = %target.username, "User deactivated");

    Ok(Json(json!({ "message": "User deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::init_test_pool;
    use sqlx::SqlitePool;

    async fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            config: Config::default(),
            db: init_test_pool().await,
        })
    }

    async fn seed_user(db: &SqlitePool, id: &str, username: &str, role: &str, active: bool) {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, is_active, created_at, updated_at)
            VALUES (?, ?, ?, 'x', ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(format!("{username}@company.com"))
        .bind(role)
        .bind(active)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await
        .unwrap();
    }

    fn create_request(username: &str, email: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.into(),
            email: email.into(),
            password: "changeme123".into(),
            role: None,
            employee_id: None,
            department: None,
            phone_number: None,
        }
    }

    #[tokio::test]
    async fn create_defaults_to_officer_role() {
        let state = test_state().await;
        let (status, Json(body)) = create(
            State(state.clone()),
            Json(create_request("jane", "jane@company.com")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["role"], "OFFICER");
    }

    #[tokio::test]
    async fn create_rejects_duplicate_username() {
        let state = test_state().await;
        seed_user(&state.db, "u1", "jane", "OFFICER", true).await;

        let err = create(
            State(state),
            Json(create_request("jane", "other@company.com")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("Username already exists"));
    }

    #[tokio::test]
    async fn create_rejects_weak_password() {
        let state = test_state().await;
        let mut request = create_request("jane", "jane@company.com");
        request.password = "short".into();

        let err = create(State(state), Json(request)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cannot_delete_last_active_admin() {
        let state = test_state().await;
        seed_user(&state.db, "adm-1", "root", "ADMIN", true).await;
        seed_user(&state.db, "adm-2", "other", "ADMIN", false).await;
        let caller = user::find_user(&state.db, "adm-2").await.unwrap().unwrap();

        let err = remove(State(state), caller, Path("adm-1".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_deactivates_and_revokes_sessions() {
        let state = test_state().await;
        seed_user(&state.db, "adm-1", "root", "ADMIN", true).await;
        seed_user(&state.db, "off-1", "jane", "OFFICER", true).await;
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at) VALUES ('s1', 'off-1', 'h', '2999-01-01T00:00:00+00:00')",
        )
        .execute(&state.db)
        .await
        .unwrap();
        let caller = user::find_user(&state.db, "adm-1").await.unwrap().unwrap();

        remove(State(state.clone()), caller, Path("off-1".into()))
            .await
            .unwrap();

        let target = user::find_user(&state.db, "off-1").await.unwrap().unwrap();
        assert!(!target.is_active);
        let sessions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = 'off-1'")
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(sessions, 0);
    }

    #[tokio::test]
    async fn cannot_delete_own_account() {
        let state = test_state().await;
        seed_user(&state.db, "adm-1", "root", "ADMIN", true).await;
        let caller = user::find_user(&state.db, "adm-1").await.unwrap().unwrap();

        let err = remove(State(state), caller, Path("adm-1".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn officer_cannot_change_own_role() {
        let state = test_state().await;
        seed_user(&state.db, "off-1", "jane", "OFFICER", true).await;
        let caller = user::find_user(&state.db, "off-1").await.unwrap().unwrap();

        let body = UpdateUserRequest {
            role: Some("ADMIN".into()),
            ..Default::default()
        };
        let err = update(State(state), caller, Path("off-1".into()), Json(body))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn officer_updates_own_contact_details() {
        let state = test_state().await;
        seed_user(&state.db, "off-1", "jane", "OFFICER", true).await;
        let caller = user::find_user(&state.db, "off-1").await.unwrap().unwrap();

        let body = UpdateUserRequest {
            phone_number: Some("555-0101".into()),
            department: Some("Cards".into()),
            ..Default::default()
        };
        let Json(response) = update(State(state.clone()), caller, Path("off-1".into()), Json(body))
            .await
            .unwrap();
        assert_eq!(response["user"]["phone_number"], "555-0101");
        assert_eq!(response["user"]["department"], "Cards");
    }

    #[tokio::test]
    async fn cannot_demote_last_active_admin() {
        let state = test_state().await;
        seed_user(&state.db, "adm-1", "root", "ADMIN", true).await;
        let caller = user::find_user(&state.db, "adm-1").await.unwrap().unwrap();

        let body = UpdateUserRequest {
            role: Some("VIEWER".into()),
            ..Default::default()
        };
        let err = update(State(state), caller, Path("adm-1".into()), Json(body))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn officers_listing_excludes_admins_and_inactive() {
        let state = test_state().await;
        seed_user(&state.db, "adm-1", "root", "ADMIN", true).await;
        seed_user(&state.db, "off-1", "jane", "OFFICER", true).await;
        seed_user(&state.db, "off-2", "gone", "OFFICER", false).await;

        let Json(body) = officers(State(state)).await.unwrap();
        let officers = body["officers"].as_array().unwrap();
        assert_eq!(officers.len(), 1);
        assert_eq!(officers[0]["username"], "jane");
    }
}
