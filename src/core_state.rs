//! `CoreState`: the one object a front end constructs.
//!
//! Owns the record store, scheduler, recommendation engine and the shared
//! AI cache/retry controller. `Send + Sync`, so a single instance can be
//! shared across threads behind an `Arc`.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ai::{
    AiServiceError, CacheRetryController, CacheStats, CompletionClient, OllamaClient, ResponseCache,
};
use crate::cancel::CancelToken;
use crate::clock::{system_clock, Clock};
use crate::config::{self, CoreConfig};
use crate::db::{DatabaseError, RecordStore, Records, SqliteStore};
use crate::models::*;
use crate::recommendation::{ManualTreatment, RecommendationEngine, RecommendationError};
use crate::scheduler::{ScheduleRequest, Scheduler, SchedulingError};

/// Row limit for the full per-patient listings.
const ALL_ROWS: u32 = u32::MAX;

/// Errors of the administrative operations (patients, resources, history).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Patient not found: {0}")]
    PatientNotFound(i64),
    #[error("Patient {0} is archived")]
    PatientArchived(i64),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("AI client error: {0}")]
    Ai(#[from] AiServiceError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Patient overview for a front end's detail screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    pub patient: Patient,
    pub upcoming_appointments: Vec<Appointment>,
    pub recent_history: Vec<HistoryEntry>,
    /// Newest first, both sources.
    pub recent_treatments: Vec<Treatment>,
}

pub struct CoreState<S: RecordStore = SqliteStore> {
    store: Arc<S>,
    scheduler: Scheduler<S>,
    engine: RecommendationEngine<S>,
    controller: Arc<CacheRetryController>,
    config: CoreConfig,
    clock: Clock,
}

impl CoreState<SqliteStore> {
    /// Open (and migrate) the SQLite file at `path` and talk to the Ollama
    /// instance named in `config.ai`.
    pub fn open(path: &Path, config: CoreConfig) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Arc::new(SqliteStore::open(path)?);
        let client = Arc::new(OllamaClient::new(&config.ai.base_url, &config.ai.model)?);
        tracing::info!(
            version = config::APP_VERSION,
            model = %config.ai.model,
            "{} core opened",
            config::APP_NAME
        );
        Ok(Self::new(store, client, config, system_clock()))
    }
}

impl<S: RecordStore> CoreState<S> {
    pub fn new(
        store: Arc<S>,
        client: Arc<dyn CompletionClient>,
        config: CoreConfig,
        clock: Clock,
    ) -> Self {
        let controller = Arc::new(CacheRetryController::new(
            ResponseCache::new(config.cache.ttl(), config.cache.capacity),
            config.retry.clone(),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            config.scheduling.clone(),
            Arc::clone(&clock),
        );
        let engine = RecommendationEngine::new(
            Arc::clone(&store),
            client,
            Arc::clone(&controller),
            config.recommendation.clone(),
            Arc::clone(&clock),
        );
        Self {
            store,
            scheduler,
            engine,
            controller,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    // ── Scheduling ──────────────────────────────────────────

    pub fn schedule(&self, request: ScheduleRequest) -> Result<Appointment, SchedulingError> {
        self.scheduler.schedule(request)
    }

    pub fn reschedule(
        &self,
        appointment_id: Uuid,
        start: chrono::NaiveDateTime,
        duration_minutes: i64,
    ) -> Result<Appointment, SchedulingError> {
        self.scheduler.reschedule(appointment_id, start, duration_minutes)
    }

    pub fn cancel(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.scheduler.cancel(appointment_id)
    }

    pub fn complete_appointment(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.scheduler.complete(appointment_id)
    }

    pub fn mark_no_show(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.scheduler.mark_no_show(appointment_id)
    }

    pub fn get_upcoming_appointments(
        &self,
        filter: &UpcomingFilter,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.scheduler.upcoming(filter)
    }

    // ── Recommendations ─────────────────────────────────────

    pub fn analyze(
        &self,
        patient_id: i64,
        symptoms: &str,
        cancel: &CancelToken,
    ) -> Result<Treatment, RecommendationError> {
        self.engine.analyze(patient_id, symptoms, cancel)
    }

    pub fn plan_treatment(
        &self,
        patient_id: i64,
        condition: &str,
        cancel: &CancelToken,
    ) -> Result<Treatment, RecommendationError> {
        self.engine.plan_treatment(patient_id, condition, cancel)
    }

    pub fn record_manual_treatment(&self, manual: ManualTreatment) -> Result<Treatment, RecommendationError> {
        self.engine.record_manual_treatment(manual)
    }

    pub fn correct_treatment(&self, prior_id: Uuid, suggestion: &str) -> Result<Treatment, RecommendationError> {
        self.engine.correct_treatment(prior_id, suggestion)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.controller.stats()
    }

    /// Drop every cached AI response.
    pub fn clear_ai_cache(&self) {
        self.controller.clear();
        tracing::info!("AI response cache cleared");
    }

    // ── Patients, resources, history ────────────────────────

    pub fn register_patient(&self, patient: NewPatient) -> Result<Patient, CoreError> {
        let now = (self.clock)();
        require("first_name", &patient.first_name)?;
        require("last_name", &patient.last_name)?;
        require("phone", &patient.phone)?;
        if patient.date_of_birth > now.date() {
            return Err(CoreError::InvalidInput("date_of_birth is in the future".into()));
        }

        let created = self.store.write(|r| r.create_patient(&patient, now))?;
        tracing::info!(patient_id = created.id, "Patient registered");
        Ok(created)
    }

    /// Apply a partial update. An empty update returns the patient as is.
    pub fn update_patient(&self, patient_id: i64, update: PatientUpdate) -> Result<Patient, CoreError> {
        let now = (self.clock)();
        for (field, value) in [
            ("first_name", &update.first_name),
            ("last_name", &update.last_name),
            ("phone", &update.phone),
        ] {
            if let Some(value) = value {
                require(field, value)?;
            }
        }
        if matches!(update.date_of_birth, Some(dob) if dob > now.date()) {
            return Err(CoreError::InvalidInput("date_of_birth is in the future".into()));
        }

        let patient = self.store.write(|r| -> Result<Patient, CoreError> {
            let current = existing_patient(r, patient_id)?;
            if update.is_empty() {
                return Ok(current);
            }
            Ok(r.update_patient(patient_id, &update, now)?)
        })?;
        tracing::info!(patient_id, "Patient updated");
        Ok(patient)
    }

    /// Delete an unreferenced patient, or archive one that appointments,
    /// treatments or history still point at.
    pub fn remove_patient(&self, patient_id: i64) -> Result<PatientRemoval, CoreError> {
        let now = (self.clock)();
        let removal = self.store.write(|r| -> Result<PatientRemoval, CoreError> {
            existing_patient(r, patient_id)?;
            Ok(r.remove_patient(patient_id, now)?)
        })?;
        tracing::info!(patient_id, outcome = ?removal, "Patient removed");
        Ok(removal)
    }

    pub fn list_patients(&self, include_archived: bool) -> Result<Vec<Patient>, CoreError> {
        Ok(self.store.read(|r| r.list_patients(include_archived))?)
    }

    /// Every appointment of the patient in any status, earliest first.
    pub fn list_patient_appointments(&self, patient_id: i64) -> Result<Vec<Appointment>, CoreError> {
        self.read_for_patient(patient_id, |r| r.list_appointments_for_patient(patient_id))
    }

    /// Every treatment of the patient, newest first, both sources.
    pub fn list_patient_treatments(&self, patient_id: i64) -> Result<Vec<Treatment>, CoreError> {
        self.read_for_patient(patient_id, |r| r.list_recent_treatments(patient_id, None, ALL_ROWS))
    }

    /// The patient's full medical history, newest first.
    pub fn list_patient_history(&self, patient_id: i64) -> Result<Vec<HistoryEntry>, CoreError> {
        self.read_for_patient(patient_id, |r| r.list_recent_history(patient_id, ALL_ROWS))
    }

    pub fn list_resources(&self) -> Result<Vec<Resource>, CoreError> {
        Ok(self.store.read(|r| r.list_resources())?)
    }

    /// Run `op` after checking the patient exists. Archived patients are
    /// still readable.
    fn read_for_patient<T, F>(&self, patient_id: i64, op: F) -> Result<T, CoreError>
    where
        F: FnOnce(&dyn Records) -> Result<T, DatabaseError>,
    {
        let found = self.store.read(|r| match r.get_patient(patient_id)? {
            Some(_) => op(r).map(Some),
            None => Ok(None),
        })?;
        found.ok_or(CoreError::PatientNotFound(patient_id))
    }

    /// Create or replace a resource.
    pub fn register_resource(&self, resource: Resource) -> Result<Resource, CoreError> {
        require("id", &resource.id)?;
        require("name", &resource.name)?;
        if let (Some(opens), Some(closes)) = (resource.opens_at, resource.closes_at) {
            if opens >= closes {
                return Err(CoreError::InvalidInput(format!(
                    "opening hours {opens}-{closes} are empty"
                )));
            }
        }

        self.store.write(|r| r.upsert_resource(&resource))?;
        tracing::info!(resource_id = %resource.id, active = resource.active, "Resource registered");
        Ok(resource)
    }

    pub fn record_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, CoreError> {
        require("description", &entry.description)?;
        let stored = self.store.write(|r| -> Result<HistoryEntry, CoreError> {
            let patient = existing_patient(r, entry.patient_id)?;
            if patient.is_archived() {
                return Err(CoreError::PatientArchived(patient.id));
            }
            Ok(r.append_history(&entry)?)
        })?;
        tracing::info!(
            patient_id = stored.patient_id,
            category = %stored.category,
            "History entry recorded"
        );
        Ok(stored)
    }

    /// Patient record plus upcoming appointments, recent history and recent
    /// treatments, read from one consistent view.
    pub fn get_patient_summary(&self, patient_id: i64) -> Result<PatientSummary, CoreError> {
        let now = (self.clock)();
        let filter = UpcomingFilter {
            patient_id: Some(patient_id),
            resource_id: None,
            limit: Some(self.config.scheduling.default_upcoming_limit),
        };
        let limits = &self.config.recommendation;

        let summary = self.store.read(|r| {
            let Some(patient) = r.get_patient(patient_id)? else {
                return Ok(None);
            };
            Ok(Some(PatientSummary {
                patient,
                upcoming_appointments: r.list_upcoming_appointments(now, &filter)?,
                recent_history: r.list_recent_history(patient_id, limits.history_limit)?,
                recent_treatments: r.list_recent_treatments(patient_id, None, limits.treatment_limit)?,
            }))
        })?;
        summary.ok_or(CoreError::PatientNotFound(patient_id))
    }
}

fn existing_patient(r: &dyn Records, patient_id: i64) -> Result<Patient, CoreError> {
    r.get_patient(patient_id)?
        .ok_or(CoreError::PatientNotFound(patient_id))
}

fn require(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}
