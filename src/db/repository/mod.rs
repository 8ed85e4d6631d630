//! Repository layer: entity-scoped database operations as free functions
//! over a `rusqlite::Connection`. Callers own transactions.

mod appointment;
mod history;
mod patient;
mod resource;
mod treatment;

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use super::DatabaseError;
use crate::models::{DATE_FORMAT, TIMESTAMP_FORMAT};

pub use appointment::*;
pub use history::*;
pub use patient::*;
pub use resource::*;
pub use treatment::*;

// ─── Column codecs ───

pub(crate) fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(s: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("invalid timestamp '{s}': {e}")))
}

pub(crate) fn parse_optional_timestamp(
    s: Option<String>,
) -> Result<Option<NaiveDateTime>, DatabaseError> {
    s.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("invalid date '{s}': {e}")))
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}
