use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

const APPOINTMENT_COLUMNS: &str = "id, patient_id, resource_id, starts_at, duration_minutes, \
     purpose, status, created_at, updated_at";

pub fn create_appointment(
    conn: &Connection,
    appointment: &NewAppointment,
    now: NaiveDateTime,
) -> Result<Appointment, DatabaseError> {
    let id = Uuid::new_v4();
    let ts = format_timestamp(&now);
    conn.execute(
        "INSERT INTO appointments (id, patient_id, resource_id, starts_at, ends_at,
         duration_minutes, purpose, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            id.to_string(),
            appointment.patient_id,
            appointment.resource_id,
            format_timestamp(&appointment.window.start),
            format_timestamp(&appointment.window.end()),
            appointment.window.duration_minutes,
            appointment.purpose,
            AppointmentStatus::Scheduled.as_str(),
            ts,
        ],
    )?;
    get_appointment(conn, &id)?.ok_or_else(|| DatabaseError::not_found("Appointment", id))
}

pub fn get_appointment(conn: &Connection, id: &Uuid) -> Result<Option<Appointment>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
            params![id.to_string()],
            read_appointment_row,
        )
        .optional()?;
    row.map(appointment_from_row).transpose()
}

/// Scheduled appointments on `resource_id` whose window intersects `window`.
pub fn list_appointments_for_resource(
    conn: &Connection,
    resource_id: &str,
    window: &TimeWindow,
) -> Result<Vec<Appointment>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE resource_id = ?1 AND status = 'scheduled'
           AND starts_at < ?2 AND ends_at > ?3
         ORDER BY starts_at"
    ))?;
    let rows = stmt.query_map(
        params![
            resource_id,
            format_timestamp(&window.end()),
            format_timestamp(&window.start),
        ],
        read_appointment_row,
    )?;
    collect_appointments(rows)
}

/// Every appointment of a patient, any status, oldest first.
pub fn list_appointments_for_patient(
    conn: &Connection,
    patient_id: i64,
) -> Result<Vec<Appointment>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE patient_id = ?1 ORDER BY starts_at, created_at"
    ))?;
    let rows = stmt.query_map(params![patient_id], read_appointment_row)?;
    collect_appointments(rows)
}

/// Scheduled appointments starting at or after `from`.
pub fn list_upcoming_appointments(
    conn: &Connection,
    from: NaiveDateTime,
    filter: &UpcomingFilter,
) -> Result<Vec<Appointment>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE status = 'scheduled' AND starts_at >= ?1
           AND (?2 IS NULL OR patient_id = ?2)
           AND (?3 IS NULL OR resource_id = ?3)
         ORDER BY starts_at, resource_id
         LIMIT ?4"
    ))?;
    // LIMIT -1 is unbounded in SQLite
    let limit = filter.limit.map(i64::from).unwrap_or(-1);
    let rows = stmt.query_map(
        params![format_timestamp(&from), filter.patient_id, filter.resource_id, limit],
        read_appointment_row,
    )?;
    collect_appointments(rows)
}

pub fn update_appointment_window(
    conn: &Connection,
    id: &Uuid,
    window: &TimeWindow,
    now: NaiveDateTime,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE appointments SET starts_at = ?1, ends_at = ?2, duration_minutes = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            format_timestamp(&window.start),
            format_timestamp(&window.end()),
            window.duration_minutes,
            format_timestamp(&now),
            id.to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Appointment", id));
    }
    Ok(())
}

pub fn update_appointment_status(
    conn: &Connection,
    id: &Uuid,
    status: AppointmentStatus,
    now: NaiveDateTime,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), format_timestamp(&now), id.to_string()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Appointment", id));
    }
    Ok(())
}

type AppointmentRow = (
    String, i64, String, String, i64,
    Option<String>, String, String, String,
);

fn read_appointment_row(row: &Row<'_>) -> rusqlite::Result<AppointmentRow> {
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
    ))
}

fn appointment_from_row(row: AppointmentRow) -> Result<Appointment, DatabaseError> {
    let (id, patient_id, resource_id, starts_at, duration_minutes, purpose, status, created_at, updated_at) =
        row;
    Ok(Appointment {
        id: parse_uuid(&id)?,
        patient_id,
        resource_id,
        starts_at: parse_timestamp(&starts_at)?,
        duration_minutes,
        purpose,
        status: AppointmentStatus::from_str(&status)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn collect_appointments(
    rows: rusqlite::MappedRows<'_, impl FnMut(&Row<'_>) -> rusqlite::Result<AppointmentRow>>,
) -> Result<Vec<Appointment>, DatabaseError> {
    let mut appointments = Vec::new();
    for row in rows {
        appointments.push(appointment_from_row(row?)?);
    }
    Ok(appointments)
}
