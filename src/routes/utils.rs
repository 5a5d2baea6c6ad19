use axum::{
    body::Body,
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{LedgerError, ValidationError};
use crate::ledger::actor::Actor;

use super::auth::{AuthError, AuthService};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

pub fn status_of(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Unauthorized => StatusCode::UNAUTHORIZED,
        LedgerError::AccessDenied(_) => StatusCode::FORBIDDEN,
        LedgerError::Validation(ValidationError::SavingsOwnershipViolation) => StatusCode::FORBIDDEN,
        LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::AtmUserNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        let message = match &self {
            // details stay in the log
            LedgerError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Rejects protected requests that carry no `Authorization` header before
/// any handler runs.
pub fn require_authorization(req: &mut Request<Body>) -> Result<(), Response> {
    if req.headers().contains_key(AUTHORIZATION) {
        Ok(())
    } else {
        Err(LedgerError::Unauthorized.into_response())
    }
}

#[inline]
pub fn validate_auth_token(headers: &HeaderMap, service: &AuthService) -> Result<Uuid, LedgerError> {
    let jwt_header_token = match headers.get(AUTHORIZATION).map(|token| token.to_str()) {
        Some(Ok(token)) => token,
        _ => {
            return Err(LedgerError::Unauthorized);
        }
    };
    let token = jwt_header_token
        .strip_prefix("Bearer ")
        .unwrap_or(jwt_header_token)
        .trim();
    service.verify_token(token).map_err(|_| LedgerError::Unauthorized)
}

/// Resolves the caller of a protected route. The role is read fresh on every
/// request so approvals and deletions take effect before the token expires.
pub async fn authenticate(headers: &HeaderMap, service: &AuthService) -> Result<Actor, LedgerError> {
    let user_id = match validate_auth_token(headers, service) {
        Ok(val) => val,
        Err(err) => {
            tracing::warn!("Token validation failed");
            return Err(err);
        }
    };
    match service.repo.find_role(user_id).await {
        Ok(Some(role)) => Ok(Actor::new(user_id, role)),
        Ok(None) => {
            tracing::warn!("Token subject {user_id} no longer exists");
            Err(LedgerError::Unauthorized)
        }
        Err(err) => {
            tracing::error!("Failed to load role for {user_id}: {err}");
            Err(err.into())
        }
    }
}

/// Lower bound of a date range. Accepts RFC 3339 timestamps, or a naive
/// ISO date-time / date read as UTC; a bare date starts at midnight.
pub fn parse_range_start(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    parse_timestamp(raw, NaiveTime::MIN)
}

/// Upper bound of a date range; a bare date covers the whole day.
pub fn parse_range_end(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let last_micro = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN);
    parse_timestamp(raw, last_micro)
}

fn parse_timestamp(raw: &str, day_time: NaiveTime) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(day_time).and_utc())
        .map_err(|_| ValidationError::InvalidSearchFilter(format!("invalid timestamp: {raw}")))
}

#[inline]
pub fn check_password(password: &str) -> Result<(), AuthError> {
    if password.len() < 8 {
        return Err(AuthError::WeakPassword("Password must be at least 8 characters"));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one uppercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one lowercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AuthError::WeakPassword("Password must contain at least one digit"));
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one special character",
        ));
    }
    Ok(())
}
