//! Session authentication: login/logout, token handling and the
//! current-user extractor consumed by every protected handler.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap},
    Json,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::error::ApiError;
use crate::db::{DbPool, LoginRequest, LoginResponse, Session, User, UserResponse};
use crate::AppState;

/// Session token cookie name
pub const SESSION_COOKIE: &str = "cardtrack_session";

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random session token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Login endpoint: verifies credentials, creates a session row and sets the
/// session cookie. The token is also returned in the body for clients that
/// prefer the Authorization header.
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(&request.username)
        .fetch_optional(&state.db)
        .await?;

    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !user.is_active || !verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    // Opportunistic sweep of expired sessions
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(&now)
        .execute(&state.db)
        .await?;

    let token = generate_token();
    let token_hash = hash_token(&token);
    let expires_at = (chrono::Utc::now()
        + chrono::Duration::days(state.config.auth.session_days))
    .to_rfc3339();

    let session_id = uuid::Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO sessions (id, user_id, token_hash, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&session_id)
        .bind(&user.id)
        .bind(&token_hash)
        .bind(&expires_at)
        .execute(&state.db)
        .await?;

    tracing::info!(username = %user.username, role = %user.role, "User logged in");

    let jar = jar.add(session_cookie(token.clone()));
    Ok((
        jar,
        Json(LoginResponse {
            token,
            user: UserResponse::from(user),
        }),
    ))
}

/// Logout endpoint: deletes the session row and clears the cookie
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    if let Some(token) = extract_token(&jar, &HeaderMap::new()) {
        let token_hash = hash_token(&token);
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(&token_hash)
            .execute(&state.db)
            .await?;
    }

    let jar = jar.remove(Cookie::from(SESSION_COOKIE));
    Ok((jar, Json(serde_json::json!({"message": "Logged out"}))))
}

/// Current-user endpoint
pub async fn me(user: User) -> Json<serde_json::Value> {
    Json(serde_json::json!({"user": UserResponse::from(user)}))
}

/// Extract the session token from the cookie or the Authorization header
pub(crate) fn extract_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Resolve a token to its (active) user
pub async fn get_current_user(pool: &DbPool, token: &str) -> Result<User, ApiError> {
    let token_hash = hash_token(token);
    let now = chrono::Utc::now().to_rfc3339();

    let session: Option<Session> =
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(&token_hash)
            .bind(&now)
            .fetch_optional(pool)
            .await?;

    let session = session.ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ? AND is_active = 1")
        .bind(&session.user_id)
        .fetch_optional(pool)
        .await?;

    user.ok_or_else(|| ApiError::unauthorized("Authentication required"))
}

/// Authenticate a request from its parts. The access guard stores the user
/// in request extensions, so most requests never hit the database twice.
pub async fn authenticate(parts: &mut Parts, state: &Arc<AppState>) -> Result<User, ApiError> {
    if let Some(user) = parts.extensions.get::<User>() {
        return Ok(user.clone());
    }

    let jar = CookieJar::from_headers(&parts.headers);
    let token = extract_token(&jar, &parts.headers)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    get_current_user(&state.db, &token).await
}

/// Extractor for the current authenticated user
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await
    }
}

/// Create the bootstrap administrator account if it does not exist yet
pub async fn ensure_admin_user(
    pool: &DbPool,
    username: &str,
    email: &str,
    password: &str,
) -> anyhow::Result<()> {
    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, role, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'ADMIN', 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(username)
    .bind(email)
    .bind(&password_hash)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    tracing::info!(username = username, "Created bootstrap admin user");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_pool;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn tokens_are_unique_and_hashed() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(hash_token(&a), a);
        assert_eq!(hash_token(&a), hash_token(&a));
    }

    #[tokio::test]
    async fn ensure_admin_is_idempotent() {
        let db = init_test_pool().await;
        ensure_admin_user(&db, "admin", "admin@company.com", "admin123")
            .await
            .unwrap();
        ensure_admin_user(&db, "admin", "admin@company.com", "other-password")
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let user: User = sqlx::query_as("SELECT * FROM users WHERE username = 'admin'")
            .fetch_one(&db)
            .await
            .unwrap();
        assert!(user.is_admin());
        // First password wins; the second call must not overwrite it
        assert!(verify_password("admin123", &user.password_hash));
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected() {
        let db = init_test_pool().await;
        ensure_admin_user(&db, "admin", "admin@company.com", "admin123")
            .await
            .unwrap();
        let user: User = sqlx::query_as("SELECT * FROM users WHERE username = 'admin'")
            .fetch_one(&db)
            .await
            .unwrap();

        let token = generate_token();
        let expired = (chrono::Utc::now() - chrono::Duration::days(1)).to_rfc3339();
        sqlx::query("INSERT INTO sessions (id, user_id, token_hash, expires_at) VALUES (?, ?, ?, ?)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&user.id)
            .bind(hash_token(&token))
            .bind(&expired)
            .execute(&db)
            .await
            .unwrap();

        assert!(get_current_user(&db, &token).await.is_err());
    }

    #[tokio::test]
    async fn valid_session_resolves_user() {
        let db = init_test_pool().await;
        ensure_admin_user(&db, "admin", "admin@company.com", "admin123")
            .await
            .unwrap();
        let user: User = sqlx::query_as("SELECT * FROM users WHERE username = 'admin'")
            .fetch_one(&db)
            .await
            .unwrap();

        let token = generate_token();
        let expires = (chrono::Utc::now() + chrono::Duration::days(7)).to_rfc3339();
        sqlx::query("INSERT INTO sessions (id, user_id, token_hash, expires_at) VALUES (?, ?, ?, ?)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&user.id)
            .bind(hash_token(&token))
            .bind(&expires)
            .execute(&db)
            .await
            .unwrap();

        let resolved = get_current_user(&db, &token).await.unwrap();
        assert_eq!(resolved.username, "admin");
    }
}
