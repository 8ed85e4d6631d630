use std::str::FromStr;

use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

pub fn append_history(conn: &Connection, entry: &NewHistoryEntry) -> Result<HistoryEntry, DatabaseError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO medical_history (id, patient_id, recorded_at, category, description)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id.to_string(),
            entry.patient_id,
            format_timestamp(&entry.recorded_at),
            entry.category.as_str(),
            entry.description,
        ],
    )?;
    Ok(HistoryEntry {
        id,
        patient_id: entry.patient_id,
        // round-trip through storage precision
        recorded_at: parse_timestamp(&format_timestamp(&entry.recorded_at))?,
        category: entry.category,
        description: entry.description.clone(),
    })
}

/// Most recent entries first, at most `limit`.
pub fn list_recent_history(
    conn: &Connection,
    patient_id: i64,
    limit: u32,
) -> Result<Vec<HistoryEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, recorded_at, category, description FROM medical_history
         WHERE patient_id = ?1
         ORDER BY recorded_at DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![patient_id, limit], read_history_row)?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, patient_id, recorded_at, category, description) = row?;
        entries.push(HistoryEntry {
            id: parse_uuid(&id)?,
            patient_id,
            recorded_at: parse_timestamp(&recorded_at)?,
            category: HistoryCategory::from_str(&category)?,
            description,
        });
    }
    Ok(entries)
}

pub fn count_history(conn: &Connection, patient_id: i64) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM medical_history WHERE patient_id = ?1",
        params![patient_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

type HistoryRow = (String, i64, String, String, String);

fn read_history_row(row: &Row<'_>) -> rusqlite::Result<HistoryRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}
