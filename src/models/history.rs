use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::HistoryCategory;

/// Append-only medical history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub patient_id: i64,
    pub recorded_at: NaiveDateTime,
    pub category: HistoryCategory,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub patient_id: i64,
    pub recorded_at: NaiveDateTime,
    pub category: HistoryCategory,
    pub description: String,
}
