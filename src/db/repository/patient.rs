use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_date, format_timestamp, parse_date, parse_optional_timestamp, parse_timestamp};
use crate::db::DatabaseError;
use crate::models::*;

const PATIENT_COLUMNS: &str =
    "id, first_name, last_name, date_of_birth, phone, email, created_at, updated_at, archived_at";

pub fn create_patient(
    conn: &Connection,
    patient: &NewPatient,
    now: NaiveDateTime,
) -> Result<Patient, DatabaseError> {
    let ts = format_timestamp(&now);
    conn.execute(
        "INSERT INTO patients (first_name, last_name, date_of_birth, phone, email, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            patient.first_name,
            patient.last_name,
            format_date(&patient.date_of_birth),
            patient.phone,
            patient.email,
            ts,
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_patient(conn, id)?.ok_or_else(|| DatabaseError::not_found("Patient", id))
}

pub fn get_patient(conn: &Connection, id: i64) -> Result<Option<Patient>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1"),
            params![id],
            read_patient_row,
        )
        .optional()?;
    row.map(patient_from_row).transpose()
}

/// Apply a partial update. An empty update only returns the current record.
pub fn update_patient(
    conn: &Connection,
    id: i64,
    update: &PatientUpdate,
    now: NaiveDateTime,
) -> Result<Patient, DatabaseError> {
    let current = get_patient(conn, id)?.ok_or_else(|| DatabaseError::not_found("Patient", id))?;
    if update.is_empty() {
        return Ok(current);
    }

    let first_name = update.first_name.as_ref().unwrap_or(&current.first_name);
    let last_name = update.last_name.as_ref().unwrap_or(&current.last_name);
    let date_of_birth = update.date_of_birth.unwrap_or(current.date_of_birth);
    let phone = update.phone.as_ref().unwrap_or(&current.phone);
    let email = match &update.email {
        Some(email) => email.as_ref(),
        None => current.email.as_ref(),
    };

    conn.execute(
        "UPDATE patients SET first_name = ?1, last_name = ?2, date_of_birth = ?3,
         phone = ?4, email = ?5, updated_at = ?6 WHERE id = ?7",
        params![
            first_name,
            last_name,
            format_date(&date_of_birth),
            phone,
            email,
            format_timestamp(&now),
            id,
        ],
    )?;
    get_patient(conn, id)?.ok_or_else(|| DatabaseError::not_found("Patient", id))
}

pub fn list_patients(conn: &Connection, include_archived: bool) -> Result<Vec<Patient>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients
         WHERE ?1 OR archived_at IS NULL
         ORDER BY last_name, first_name, id"
    ))?;
    let rows = stmt.query_map(params![include_archived], read_patient_row)?;

    let mut patients = Vec::new();
    for row in rows {
        patients.push(patient_from_row(row?)?);
    }
    Ok(patients)
}

/// Whether any appointment, treatment or history entry points at the patient.
pub fn patient_is_referenced(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let referenced: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM appointments WHERE patient_id = ?1)
             OR EXISTS (SELECT 1 FROM treatments WHERE patient_id = ?1)
             OR EXISTS (SELECT 1 FROM medical_history WHERE patient_id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    Ok(referenced)
}

/// Delete an unreferenced patient, archive a referenced one.
pub fn remove_patient(
    conn: &Connection,
    id: i64,
    now: NaiveDateTime,
) -> Result<PatientRemoval, DatabaseError> {
    if get_patient(conn, id)?.is_none() {
        return Err(DatabaseError::not_found("Patient", id));
    }

    if patient_is_referenced(conn, id)? {
        let ts = format_timestamp(&now);
        conn.execute(
            "UPDATE patients SET archived_at = COALESCE(archived_at, ?1), updated_at = ?1 WHERE id = ?2",
            params![ts, id],
        )?;
        Ok(PatientRemoval::Archived)
    } else {
        conn.execute("DELETE FROM patients WHERE id = ?1", params![id])?;
        Ok(PatientRemoval::Deleted)
    }
}

type PatientRow = (
    i64, String, String, String, String,
    Option<String>, String, String, Option<String>,
);

fn read_patient_row(row: &Row<'_>) -> rusqlite::Result<PatientRow> {
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

fn patient_from_row(row: PatientRow) -> Result<Patient, DatabaseError> {
    let (id, first_name, last_name, dob, phone, email, created_at, updated_at, archived_at) = row;
    Ok(Patient {
        id,
        first_name,
        last_name,
        date_of_birth: parse_date(&dob)?,
        phone,
        email,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        archived_at: parse_optional_timestamp(archived_at)?,
    })
}
