//! Input validation for API requests.
//!
//! Validators return a plain `String` error message; handlers collect them
//! into an `ApiError` with the `ValidationErrorBuilder` from the `error`
//! module.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::db::{AppStatus, Card, CardType, Role};

lazy_static! {
    /// Usernames: alphanumeric plus dot/dash/underscore, 3-80 chars
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]{2,79}$").unwrap();

    /// Minimal email shape check; the mail system is the real authority
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();

    /// Branch codes as they appear in the spreadsheets: short alphanumeric
    static ref BRANCH_CODE_REGEX: Regex = Regex::new(r"^[A-Za-z0-9]{1,10}$").unwrap();
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Username must be 3-80 characters (letters, digits, '.', '-', '_')".to_string(),
        );
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 120 || !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }
    Ok(())
}

pub fn validate_role(role: &str) -> Result<(), String> {
    Role::parse(role)
        .map(|_| ())
        .ok_or_else(|| format!("Unknown role '{}'", role))
}

pub fn validate_status(status: &str) -> Result<(), String> {
    AppStatus::parse(status)
        .map(|_| ())
        .ok_or_else(|| format!("Unknown status '{}'", status))
}

pub fn validate_card(card: &str) -> Result<(), String> {
    Card::parse(card)
        .map(|_| ())
        .ok_or_else(|| format!("Unknown card '{}'", card))
}

pub fn validate_card_type(card_type: &str) -> Result<(), String> {
    CardType::parse(card_type)
        .map(|_| ())
        .ok_or_else(|| format!("Unknown card type '{}'", card_type))
}

/// Dates travel as ISO `YYYY-MM-DD` strings
pub fn validate_date(date: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| format!("Invalid date '{}', expected YYYY-MM-DD", date))
}

pub fn validate_branch_code(branch_code: &str) -> Result<(), String> {
    if !BRANCH_CODE_REGEX.is_match(branch_code) {
        return Err("Branch code must be 1-10 alphanumeric characters".to_string());
    }
    Ok(())
}

/// Spreadsheet uploads must carry an Excel extension
pub fn validate_spreadsheet_filename(filename: &str) -> Result<(), String> {
    let lower = filename.to_lowercase();
    if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
        Ok(())
    } else {
        Err("Only Excel files are supported".to_string())
    }
}
