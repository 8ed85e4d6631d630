use std::str::FromStr;

use chrono::NaiveTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::DatabaseError;
use crate::models::*;

const TIME_FORMAT: &str = "%H:%M:%S";

/// Insert a resource, or replace the existing one with the same id.
pub fn upsert_resource(conn: &Connection, resource: &Resource) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO resources (id, name, kind, active, opens_at, closes_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name, kind = excluded.kind, active = excluded.active,
            opens_at = excluded.opens_at, closes_at = excluded.closes_at",
        params![
            resource.id,
            resource.name,
            resource.kind.as_str(),
            resource.active as i32,
            resource.opens_at.map(|t| t.format(TIME_FORMAT).to_string()),
            resource.closes_at.map(|t| t.format(TIME_FORMAT).to_string()),
        ],
    )?;
    Ok(())
}

pub fn get_resource(conn: &Connection, id: &str) -> Result<Option<Resource>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, name, kind, active, opens_at, closes_at FROM resources WHERE id = ?1",
            params![id],
            read_resource_row,
        )
        .optional()?;
    row.map(resource_from_row).transpose()
}

pub fn list_resources(conn: &Connection) -> Result<Vec<Resource>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, kind, active, opens_at, closes_at FROM resources ORDER BY name, id",
    )?;
    let rows = stmt.query_map([], read_resource_row)?;

    let mut resources = Vec::new();
    for row in rows {
        resources.push(resource_from_row(row?)?);
    }
    Ok(resources)
}

type ResourceRow = (String, String, String, i32, Option<String>, Option<String>);

fn read_resource_row(row: &Row<'_>) -> rusqlite::Result<ResourceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn resource_from_row(row: ResourceRow) -> Result<Resource, DatabaseError> {
    let (id, name, kind, active, opens_at, closes_at) = row;
    Ok(Resource {
        id,
        name,
        kind: ResourceKind::from_str(&kind)?,
        active: active != 0,
        opens_at: opens_at.as_deref().map(parse_time).transpose()?,
        closes_at: closes_at.as_deref().map(parse_time).transpose()?,
    })
}

fn parse_time(s: &str) -> Result<NaiveTime, DatabaseError> {
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("invalid time '{s}': {e}")))
}
