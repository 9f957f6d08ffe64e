//! Declarative role-based access control.
//!
//! One table maps each protected route to the roles allowed to call it,
//! consulted by a single guard middleware, instead of per-handler role
//! checks. Officer data scoping (an officer only sees their own
//! assignments) is not route gating and stays in the handlers' queries.
//!
//! Rules are matched first to last, so literal segments must precede
//! parameter patterns covering the same shape.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use super::auth;
use super::error::ApiError;
use crate::db::{Role, User};
use crate::AppState;

const ALL: &[Role] = &[Role::Admin, Role::Officer, Role::Viewer];
const ADMIN: &[Role] = &[Role::Admin];
const ADMIN_VIEWER: &[Role] = &[Role::Admin, Role::Viewer];
const ADMIN_OFFICER: &[Role] = &[Role::Admin, Role::Officer];
const OFFICER: &[Role] = &[Role::Officer];

struct AccessRule {
    method: &'static str,
    pattern: &'static str,
    roles: &'static [Role],
}

const fn rule(method: &'static str, pattern: &'static str, roles: &'static [Role]) -> AccessRule {
    AccessRule {
        method,
        pattern,
        roles,
    }
}

/// Route-class to allowed-roles table. Paths are relative to the `/api`
/// mount point.
static ACCESS_RULES: &[AccessRule] = &[
    // Applications
    rule("GET", "/applications", ALL),
    rule("GET", "/applications/choices", ALL),
    rule("GET", "/applications/assigned", OFFICER),
    rule("GET", "/applications/unmatched", ADMIN_VIEWER),
    rule("POST", "/applications/bulk-upload", ADMIN),
    rule("GET", "/applications/:id", ALL),
    rule("PUT", "/applications/:id", ADMIN_OFFICER),
    rule("PUT", "/applications/:id/assign", ADMIN),
    rule("PUT", "/applications/:id/match-status", ADMIN_OFFICER),
    rule("GET", "/applications/:id/history", ALL),
    // Reconciliation
    rule("POST", "/pfcontinue/upload", ADMIN),
    rule("POST", "/pfcontinue/cross-check", ADMIN),
    rule("GET", "/pfcontinue/summary", ADMIN_VIEWER),
    rule("GET", "/pfcontinue", ADMIN_VIEWER),
    // Reports
    rule("GET", "/reports/dashboard", ALL),
    rule("GET", "/reports/daily", ALL),
    rule("GET", "/reports/branch-wise", ALL),
    rule("GET", "/reports/officer-performance", ALL),
    rule("POST", "/reports/custom", ALL),
    rule("POST", "/reports/export/excel", ALL),
    // Users
    rule("GET", "/users/officers", ADMIN_VIEWER),
    rule("GET", "/users/roles", ALL),
    rule("GET", "/users", ADMIN_VIEWER),
    rule("POST", "/users", ADMIN),
    rule("GET", "/users/:id", ALL),
    rule("PUT", "/users/:id", ADMIN_OFFICER),
    rule("DELETE", "/users/:id", ADMIN),
];

/// Look up the roles allowed for a method/path pair
fn allowed_roles(method: &str, path: &str) -> Option<&'static [Role]> {
    ACCESS_RULES
        .iter()
        .find(|rule| rule.method == method && pattern_matches(rule.pattern, path))
        .map(|rule| rule.roles)
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let mut pattern_segments = pattern.split('/').filter(|s| !s.is_empty());
    let mut path_segments = path.split('/').filter(|s| !s.is_empty());

    loop {
        match (pattern_segments.next(), path_segments.next()) {
            (None, None) => return true,
            (Some(p), Some(s)) if p.starts_with(':') || p == s => continue,
            _ => return false,
        }
    }
}

fn role_allowed(roles: &[Role], user: &User) -> bool {
    Role::parse(&user.role).is_some_and(|role| roles.contains(&role))
}

/// Guard middleware for the protected `/api` router: authenticates the
/// request, checks the access table, and stores the user in request
/// extensions for the handlers. Denied requests never reach a handler, so
/// a denied role produces no side effects at all.
pub async fn access_guard(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = auth::extract_token(&jar, request.headers())
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let user = auth::get_current_user(&state.db, &token).await?;

    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();

    match allowed_roles(&method, &path) {
        Some(roles) if role_allowed(roles, &user) => {}
        Some(_) => {
            tracing::debug!(username = %user.username, role = %user.role, path = %path, "Access denied");
            return Err(ApiError::forbidden("Access denied"));
        }
        // Unknown routes fall through to axum's 404 for authenticated users
        None => {}
    }

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
