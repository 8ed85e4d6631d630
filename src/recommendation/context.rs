use std::fmt::Write as _;

use base64::Engine;
use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::sanitize::sanitize_clinical_text;
use crate::config::RecommendationConfig;
use crate::db::{DatabaseError, Records};
use crate::models::{HistoryCategory, Patient, TreatmentSource};

/// Bounded, structured view of a patient's record used to build prompts.
///
/// Only clinician-entered treatments are included; earlier model output is
/// never fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientContext {
    pub patient_id: i64,
    pub age: Option<u32>,
    pub history: Vec<ContextEntry>,
    pub prior_treatments: Vec<ContextTreatment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
    pub date: NaiveDate,
    pub category: HistoryCategory,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextTreatment {
    pub date: NaiveDate,
    pub condition: String,
    pub suggestion: String,
}

impl PatientContext {
    pub fn empty(patient_id: i64) -> Self {
        Self {
            patient_id,
            age: None,
            history: Vec::new(),
            prior_treatments: Vec::new(),
        }
    }

    /// Load the most recent history and manual treatments within the
    /// configured bounds. Each text is sanitized and clipped.
    pub fn load(
        records: &dyn Records,
        patient: &Patient,
        today: NaiveDate,
        config: &RecommendationConfig,
    ) -> Result<Self, DatabaseError> {
        let history = records
            .list_recent_history(patient.id, config.history_limit)?
            .into_iter()
            .map(|entry| ContextEntry {
                date: entry.recorded_at.date(),
                category: entry.category,
                description: clip(&entry.description, config.context_entry_chars),
            })
            .collect();

        let prior_treatments = records
            .list_recent_treatments(patient.id, Some(TreatmentSource::Manual), config.treatment_limit)?
            .into_iter()
            .map(|t| ContextTreatment {
                date: t.generated_at.date(),
                condition: clip(&t.condition, config.context_entry_chars),
                suggestion: clip(&t.suggestion, config.context_entry_chars),
            })
            .collect();

        Ok(Self {
            patient_id: patient.id,
            age: patient.age_on(today),
            history,
            prior_treatments,
        })
    }

    /// Plain-text rendering placed inside the prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self.age {
            Some(age) => {
                let _ = writeln!(out, "Age: {age}");
            }
            None => out.push_str("Age: unknown\n"),
        }

        if self.history.is_empty() {
            out.push_str("Medical history: none recorded\n");
        } else {
            out.push_str("Medical history (newest first):\n");
            for entry in &self.history {
                let _ = writeln!(out, "- {} [{}] {}", entry.date, entry.category, entry.description);
            }
        }

        if self.prior_treatments.is_empty() {
            out.push_str("Prior treatments: none recorded");
        } else {
            out.push_str("Prior treatments by clinicians (newest first):");
            for t in &self.prior_treatments {
                let _ = write!(out, "\n- {} {}: {}", t.date, t.condition, t.suggestion);
            }
        }
        out
    }

    /// SHA-256 of the rendered context, base64 encoded.
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.render().as_bytes());
        base64::engine::general_purpose::STANDARD.encode(hash)
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    sanitize_clinical_text(text, max_chars).text.replace('\n', " ")
}
