use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{SuggestionKind, TreatmentSource};

/// A treatment suggestion. Immutable once stored; corrections are new
/// records whose `supersedes` points at the prior one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub id: Uuid,
    pub patient_id: i64,
    pub appointment_id: Option<Uuid>,
    pub condition: String,
    pub suggestion: String,
    pub kind: SuggestionKind,
    pub source: TreatmentSource,
    pub model: Option<String>,
    pub supersedes: Option<Uuid>,
    pub generated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTreatment {
    pub patient_id: i64,
    pub appointment_id: Option<Uuid>,
    pub condition: String,
    pub suggestion: String,
    pub kind: SuggestionKind,
    pub source: TreatmentSource,
    pub model: Option<String>,
    pub supersedes: Option<Uuid>,
}
