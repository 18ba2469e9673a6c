//! Column encoding shared by the repositories.
//!
//! The `Any` driver only round-trips integers and text portably, so instants are stored
//! as RFC 3339 UTC strings (second precision, `Z` suffix, which also sorts correctly),
//! flags as 0/1 and metadata as JSON text.

use crate::error::DbError;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::any::AnyRow;
use sqlx::{Row, ValueRef};

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(column: &str, value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DbError::DecodeError {
            column: column.to_string(),
            message: e.to_string(),
        })
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date(column: &str, value: &str) -> Result<NaiveDate, DbError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| DbError::DecodeError {
        column: column.to_string(),
        message: e.to_string(),
    })
}

pub fn text(row: &AnyRow, column: &str) -> Result<String, DbError> {
    row.try_get::<String, _>(column).map_err(|e| decode_err(column, e))
}

/// The `Any` driver refuses to decode NULL into `Option<T>`, so NULL is checked on the raw value.
fn is_null(row: &AnyRow, column: &str) -> Result<bool, DbError> {
    let raw = row.try_get_raw(column).map_err(|e| decode_err(column, e))?;
    Ok(raw.is_null())
}

pub fn opt_text(row: &AnyRow, column: &str) -> Result<Option<String>, DbError> {
    if is_null(row, column)? {
        return Ok(None);
    }
    text(row, column).map(Some)
}

pub fn int(row: &AnyRow, column: &str) -> Result<i64, DbError> {
    row.try_get::<i64, _>(column).map_err(|e| decode_err(column, e))
}

pub fn opt_int(row: &AnyRow, column: &str) -> Result<Option<i64>, DbError> {
    if is_null(row, column)? {
        return Ok(None);
    }
    int(row, column).map(Some)
}

pub fn flag(row: &AnyRow, column: &str) -> Result<bool, DbError> {
    Ok(int(row, column)? != 0)
}

pub fn ts(row: &AnyRow, column: &str) -> Result<DateTime<Utc>, DbError> {
    parse_ts(column, &text(row, column)?)
}

pub fn opt_ts(row: &AnyRow, column: &str) -> Result<Option<DateTime<Utc>>, DbError> {
    opt_text(row, column)?
        .map(|value| parse_ts(column, &value))
        .transpose()
}

fn decode_err(column: &str, err: sqlx::Error) -> DbError {
    DbError::DecodeError {
        column: column.to_string(),
        message: err.to_string(),
    }
}
