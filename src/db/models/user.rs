//! User account and session models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;

/// Account roles. The wire format keeps the upper-case strings the rest of
/// the system (spreadsheets, reports, clients) already uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "OFFICER")]
    Officer,
    #[serde(rename = "VIEWER")]
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Officer => "OFFICER",
            Role::Viewer => "VIEWER",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "ADMIN" => Some(Role::Admin),
            "OFFICER" => Some(Role::Officer),
            "VIEWER" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn choices() -> Vec<&'static str> {
        vec!["ADMIN", "OFFICER", "VIEWER"]
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub employee_id: Option<String>,
    pub department: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin.as_str()
    }

    pub fn is_officer(&self) -> bool {
        self.role == Role::Officer.as_str()
    }

    pub fn is_viewer(&self) -> bool {
        self.role == Role::Viewer.as_str()
    }
}

/// Public projection of a user, safe to embed in any response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub employee_id: Option<String>,
    pub department: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            employee_id: user.employee_id,
            department: user.department,
            phone_number: user.phone_number,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
    pub employee_id: Option<String>,
    pub department: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub employee_id: Option<String>,
    pub department: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: Option<bool>,
}

/// Load every user keyed by id, for attaching user projections to
/// application rows without per-row lookups.
pub async fn user_map(db: &SqlitePool) -> Result<HashMap<String, UserResponse>, sqlx::Error> {
    let users: Vec<User> = sqlx::query_as("SELECT * FROM users")
        .fetch_all(db)
        .await?;
    Ok(users
        .into_iter()
        .map(|u| (u.id.clone(), UserResponse::from(u)))
        .collect())
}

pub async fn find_user(db: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Count of active administrator accounts, for the sole-admin delete guard
pub async fn active_admin_count(db: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'ADMIN' AND is_active = 1")
        .fetch_one(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in Role::choices() {
            assert_eq!(Role::parse(role).unwrap().as_str(), role);
        }
        assert!(Role::parse("SUPERUSER").is_none());
        assert!(Role::parse("admin").is_none());
    }

    #[test]
    fn role_predicates() {
        let mut user = User {
            id: "u1".into(),
            username: "jane".into(),
            email: "jane@company.com".into(),
            password_hash: String::new(),
            role: "OFFICER".into(),
            employee_id: None,
            department: None,
            phone_number: None,
            is_active: true,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(user.is_officer());
        assert!(!user.is_admin());

        user.role = "ADMIN".into();
        assert!(user.is_admin());
        assert!(!user.is_viewer());
    }

    #[test]
    fn user_response_omits_password_hash() {
        let user = User {
            id: "u1".into(),
            username: "jane".into(),
            email: "jane@company.com".into(),
            password_hash: "secret-hash".into(),
            role: "VIEWER".into(),
            employee_id: Some("E100".into()),
            department: None,
            phone_number: None,
            is_active: true,
            created_at: "2024-01-01T00:00:00+00:00".into(),
            updated_at: "2024-01-01T00:00:00+00:00".into(),
        };
        let json = serde_json::to_string(&UserResponse::from(user)).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("\"employee_id\":\"E100\""));
    }
}
