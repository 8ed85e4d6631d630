use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

const TREATMENT_COLUMNS: &str = "id, patient_id, appointment_id, condition, suggestion, kind, \
     source, model, supersedes, generated_at";

/// Treatments are insert-only.
pub fn create_treatment(
    conn: &Connection,
    treatment: &NewTreatment,
    now: NaiveDateTime,
) -> Result<Treatment, DatabaseError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO treatments (id, patient_id, appointment_id, condition, suggestion, kind,
         source, model, supersedes, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id.to_string(),
            treatment.patient_id,
            treatment.appointment_id.map(|a| a.to_string()),
            treatment.condition,
            treatment.suggestion,
            treatment.kind.as_str(),
            treatment.source.as_str(),
            treatment.model,
            treatment.supersedes.map(|s| s.to_string()),
            format_timestamp(&now),
        ],
    )?;
    get_treatment(conn, &id)?.ok_or_else(|| DatabaseError::not_found("Treatment", id))
}

pub fn get_treatment(conn: &Connection, id: &Uuid) -> Result<Option<Treatment>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {TREATMENT_COLUMNS} FROM treatments WHERE id = ?1"),
            params![id.to_string()],
            read_treatment_row,
        )
        .optional()?;
    row.map(treatment_from_row).transpose()
}

/// Newest treatments of a patient, optionally restricted to one source.
pub fn list_recent_treatments(
    conn: &Connection,
    patient_id: i64,
    source: Option<TreatmentSource>,
    limit: u32,
) -> Result<Vec<Treatment>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TREATMENT_COLUMNS} FROM treatments
         WHERE patient_id = ?1 AND (?2 IS NULL OR source = ?2)
         ORDER BY generated_at DESC, rowid DESC
         LIMIT ?3"
    ))?;
    let rows = stmt.query_map(
        params![patient_id, source.map(|s| s.as_str()), limit],
        read_treatment_row,
    )?;

    let mut treatments = Vec::new();
    for row in rows {
        treatments.push(treatment_from_row(row?)?);
    }
    Ok(treatments)
}

pub fn count_treatments(conn: &Connection, patient_id: i64) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM treatments WHERE patient_id = ?1",
        params![patient_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

type TreatmentRow = (
    String, i64, Option<String>, String, String,
    String, String, Option<String>, Option<String>, String,
);

fn read_treatment_row(row: &Row<'_>) -> rusqlite::Result<TreatmentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn treatment_from_row(row: TreatmentRow) -> Result<Treatment, DatabaseError> {
    let (id, patient_id, appointment_id, condition, suggestion, kind, source, model, supersedes, generated_at) =
        row;
    Ok(Treatment {
        id: parse_uuid(&id)?,
        patient_id,
        appointment_id: appointment_id.as_deref().map(parse_uuid).transpose()?,
        condition,
        suggestion,
        kind: SuggestionKind::from_str(&kind)?,
        source: TreatmentSource::from_str(&source)?,
        model,
        supersedes: supersedes.as_deref().map(parse_uuid).transpose()?,
        generated_at: parse_timestamp(&generated_at)?,
    })
}
