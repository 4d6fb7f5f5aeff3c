use crate::errors::{AppError, ErrorType};
use bson::oid::ObjectId;
use chrono::{DateTime, Duration, Utc};

pub fn parse_object_id(raw: &str, what: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(raw).map_err(|_| {
        AppError::new(
            format!("'{}' is not a valid {} id", raw, what).as_str(),
            ErrorType::BadRequest,
        )
    })
}

pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            AppError::new(
                format!("'{}' is not a valid RFC 3339 timestamp: {}", raw, e).as_str(),
                ErrorType::BadRequest,
            )
        })
}

pub fn parse_optional_time(raw: &Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match raw {
        Some(value) => parse_rfc3339(value).map(Some),
        None => Ok(None),
    }
}

/// Time window with defaults: `to` falls back to now, `from` to
/// `default_days_back` days before `to`.
pub fn parse_time_range(
    from: &Option<String>,
    to: &Option<String>,
    default_days_back: i64,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let to = match to {
        Some(value) => parse_rfc3339(value)?,
        None => Utc::now(),
    };
    let from = match from {
        Some(value) => parse_rfc3339(value)?,
        None => to - Duration::days(default_days_back),
    };

    Ok((from, to))
}

/// Unbounded or nonsense limits from callers get clamped; dashboards have
/// sent limit=0 and limit=100000 in the past.
pub fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    match limit {
        Some(value) if value > 0 => value.min(max),
        _ => default,
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
