//! Treatment recommendation pipeline:
//! sanitize → context → cache key → controller → validate → persist

use std::sync::Arc;

use uuid::Uuid;

use super::cache_key::{cache_key, normalize_request_text};
use super::context::PatientContext;
use super::prompt::{build_analysis_prompt, build_plan_prompt, RECOMMENDATION_SYSTEM_PROMPT};
use super::sanitize::sanitize_clinical_text;
use super::validate::{validate_suggestion, SuggestionLimits};
use super::RecommendationError;
use crate::ai::{CacheRetryController, CompletionClient, CompletionRequest};
use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::RecommendationConfig;
use crate::db::{RecordStore, Records};
use crate::models::*;

/// A clinician-entered treatment.
#[derive(Debug, Clone)]
pub struct ManualTreatment {
    pub patient_id: i64,
    pub appointment_id: Option<Uuid>,
    pub condition: String,
    pub suggestion: String,
    pub kind: SuggestionKind,
}

pub struct RecommendationEngine<S: RecordStore> {
    store: Arc<S>,
    client: Arc<dyn CompletionClient>,
    controller: Arc<CacheRetryController>,
    config: RecommendationConfig,
    clock: Clock,
}

impl<S: RecordStore> RecommendationEngine<S> {
    pub fn new(
        store: Arc<S>,
        client: Arc<dyn CompletionClient>,
        controller: Arc<CacheRetryController>,
        config: RecommendationConfig,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            client,
            controller,
            config,
            clock,
        }
    }

    /// Ask the model about a symptom description and store the answer as a
    /// new AI-generated treatment.
    pub fn analyze(
        &self,
        patient_id: i64,
        symptoms: &str,
        cancel: &CancelToken,
    ) -> Result<Treatment, RecommendationError> {
        self.suggest(SuggestionKind::SymptomAnalysis, patient_id, symptoms, cancel)
    }

    /// Ask the model for a general treatment approach to a known condition.
    pub fn plan_treatment(
        &self,
        patient_id: i64,
        condition: &str,
        cancel: &CancelToken,
    ) -> Result<Treatment, RecommendationError> {
        self.suggest(SuggestionKind::TreatmentPlan, patient_id, condition, cancel)
    }

    fn suggest(
        &self,
        kind: SuggestionKind,
        patient_id: i64,
        request_text: &str,
        cancel: &CancelToken,
    ) -> Result<Treatment, RecommendationError> {
        let input = sanitize_clinical_text(request_text, self.config.max_input_chars);
        if input.removed_lines > 0 || input.removed_tags > 0 {
            tracing::warn!(
                patient_id,
                removed_lines = input.removed_lines,
                removed_tags = input.removed_tags,
                "Injection patterns removed from recommendation input"
            );
        }
        if input.text.is_empty() {
            return Err(RecommendationError::InvalidInput(
                "request text is empty".into(),
            ));
        }

        let today = (self.clock)().date();
        let loaded = self.store.read(|r| match r.get_patient(patient_id)? {
            Some(patient) => {
                let context = PatientContext::load(r, &patient, today, &self.config)?;
                Ok(Some((patient, context)))
            }
            None => Ok(None),
        })?;
        let (patient, context) = loaded.ok_or(RecommendationError::PatientNotFound(patient_id))?;
        if patient.is_archived() {
            return Err(RecommendationError::PatientArchived(patient_id));
        }

        let key = cache_key(
            kind,
            patient_id,
            &normalize_request_text(&input.text),
            &context.fingerprint(),
        );
        let prompt = match kind {
            SuggestionKind::SymptomAnalysis => build_analysis_prompt(&context, &input.text),
            SuggestionKind::TreatmentPlan => build_plan_prompt(&context, &input.text),
        };

        let raw = self.controller.get_or_fetch(&key, cancel, |timeout| {
            self.client.complete(&CompletionRequest {
                prompt: prompt.clone(),
                system: RECOMMENDATION_SYSTEM_PROMPT.to_string(),
                max_tokens: self.config.max_tokens,
                timeout,
            })
        })?;

        let suggestion = match validate_suggestion(&raw, &prompt, &input.text, self.limits()) {
            Ok(text) => text,
            Err(e) => {
                self.controller.invalidate(&key);
                tracing::warn!(patient_id, kind = %kind, reason = %e, "AI suggestion rejected");
                return Err(e.into());
            }
        };

        if cancel.is_cancelled() {
            return Err(RecommendationError::Cancelled);
        }

        let now = (self.clock)();
        let model = self.client.model_name().to_string();
        let treatment = self.store.write(|r| -> Result<Treatment, RecommendationError> {
            ensure_active_patient(r, patient_id)?;
            let treatment = r.create_treatment(
                &NewTreatment {
                    patient_id,
                    appointment_id: None,
                    condition: input.text,
                    suggestion,
                    kind,
                    source: TreatmentSource::AiGenerated,
                    model: Some(model),
                    supersedes: None,
                },
                now,
            )?;
            Ok(treatment)
        })?;

        tracing::info!(
            patient_id,
            treatment_id = %treatment.id,
            kind = %kind,
            "AI treatment suggestion stored"
        );
        Ok(treatment)
    }

    /// Store a clinician-entered treatment.
    pub fn record_manual_treatment(
        &self,
        manual: ManualTreatment,
    ) -> Result<Treatment, RecommendationError> {
        let condition = required(&manual.condition, "condition")?;
        let suggestion = required(&manual.suggestion, "suggestion")?;
        let now = (self.clock)();

        let treatment = self.store.write(|r| -> Result<Treatment, RecommendationError> {
            ensure_active_patient(r, manual.patient_id)?;
            if let Some(appointment_id) = manual.appointment_id {
                match r.get_appointment(&appointment_id)? {
                    Some(a) if a.patient_id == manual.patient_id => {}
                    _ => return Err(RecommendationError::AppointmentNotFound(appointment_id)),
                }
            }
            let treatment = r.create_treatment(
                &NewTreatment {
                    patient_id: manual.patient_id,
                    appointment_id: manual.appointment_id,
                    condition,
                    suggestion,
                    kind: manual.kind,
                    source: TreatmentSource::Manual,
                    model: None,
                    supersedes: None,
                },
                now,
            )?;
            Ok(treatment)
        })?;

        tracing::info!(
            patient_id = treatment.patient_id,
            treatment_id = %treatment.id,
            "Manual treatment stored"
        );
        Ok(treatment)
    }

    /// Record a corrected suggestion. The prior treatment is left untouched;
    /// the correction is a new manual record that supersedes it.
    pub fn correct_treatment(
        &self,
        prior_id: Uuid,
        suggestion: &str,
    ) -> Result<Treatment, RecommendationError> {
        let suggestion = required(suggestion, "suggestion")?;
        let now = (self.clock)();

        let treatment = self.store.write(|r| -> Result<Treatment, RecommendationError> {
            let prior = r
                .get_treatment(&prior_id)?
                .ok_or(RecommendationError::TreatmentNotFound(prior_id))?;
            ensure_active_patient(r, prior.patient_id)?;
            let treatment = r.create_treatment(
                &NewTreatment {
                    patient_id: prior.patient_id,
                    appointment_id: prior.appointment_id,
                    condition: prior.condition,
                    suggestion,
                    kind: prior.kind,
                    source: TreatmentSource::Manual,
                    model: None,
                    supersedes: Some(prior.id),
                },
                now,
            )?;
            Ok(treatment)
        })?;

        tracing::info!(
            patient_id = treatment.patient_id,
            treatment_id = %treatment.id,
            supersedes = %prior_id,
            "Treatment correction stored"
        );
        Ok(treatment)
    }

    pub fn controller(&self) -> &CacheRetryController {
        &self.controller
    }

    fn limits(&self) -> SuggestionLimits {
        SuggestionLimits {
            min_chars: self.config.min_suggestion_chars,
            max_chars: self.config.max_suggestion_chars,
        }
    }
}

fn ensure_active_patient(r: &dyn Records, patient_id: i64) -> Result<Patient, RecommendationError> {
    let patient = r
        .get_patient(patient_id)?
        .ok_or(RecommendationError::PatientNotFound(patient_id))?;
    if patient.is_archived() {
        return Err(RecommendationError::PatientArchived(patient_id));
    }
    Ok(patient)
}

fn required(text: &str, field: &str) -> Result<String, RecommendationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RecommendationError::InvalidInput(format!("{field} is empty")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiServiceError, MockCompletionClient, ResponseCache, RetryPolicy};
    use crate::clock::fixed_clock;
    use crate::db::{open_memory_database, SqliteStore};
    use crate::recommendation::ValidationError;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::thread;
    use std::time::Duration;

    const GOOD: &str = "Possible causes include a viral upper respiratory infection, \
        post-nasal drip, or reflux. A chest examination and basic blood work may help. \
        Rest, fluids, and humidified air are general supportive measures.";

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 5, 20)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    struct Harness {
        store: Arc<SqliteStore>,
        mock: Arc<MockCompletionClient>,
        engine: RecommendationEngine<SqliteStore>,
    }

    /// Store with patient 42 and an engine over `mock`.
    fn harness(mock: MockCompletionClient) -> Harness {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO patients (id, first_name, last_name, date_of_birth, phone, created_at, updated_at)
             VALUES (42, 'Amara', 'Diallo', '1990-06-15', '555-0110', '2030-01-01 08:00:00', '2030-01-01 08:00:00')",
            [],
        )
        .unwrap();
        let store = Arc::new(SqliteStore::from_connection(conn));
        let mock = Arc::new(mock);
        let controller = Arc::new(CacheRetryController::new(
            ResponseCache::new(Duration::from_secs(60), 16),
            RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
                attempt_timeout_ms: 1_000,
                overall_deadline_ms: 5_000,
            },
        ));
        let engine = RecommendationEngine::new(
            Arc::clone(&store),
            mock.clone() as Arc<dyn CompletionClient>,
            controller,
            RecommendationConfig::default(),
            fixed_clock(now()),
        );
        Harness { store, mock, engine }
    }

    fn treatment_count(store: &SqliteStore, patient_id: i64) -> i64 {
        store.read(|r| r.count_treatments(patient_id)).unwrap()
    }

    #[test]
    fn analyze_persists_ai_treatment() {
        let h = harness(MockCompletionClient::new(GOOD));
        let t = h.engine.analyze(42, "persistent cough", &CancelToken::new()).unwrap();

        assert_eq!(t.patient_id, 42);
        assert_eq!(t.source, TreatmentSource::AiGenerated);
        assert_eq!(t.kind, SuggestionKind::SymptomAnalysis);
        assert_eq!(t.condition, "persistent cough");
        assert_eq!(t.suggestion, GOOD);
        assert_eq!(t.model.as_deref(), Some("mock"));
        assert_eq!(t.generated_at, now());
        assert_eq!(treatment_count(&h.store, 42), 1);

        let request = h.mock.last_request().unwrap();
        assert_eq!(request.system, RECOMMENDATION_SYSTEM_PROMPT);
        assert!(request.prompt.contains("<symptoms>\npersistent cough\n</symptoms>"));
        assert_eq!(request.timeout, Duration::from_secs(1));
    }

    #[test]
    fn identical_requests_call_model_once() {
        let h = harness(MockCompletionClient::new(GOOD));
        let cancel = CancelToken::new();
        let first = h.engine.analyze(42, "persistent cough", &cancel).unwrap();
        let second = h.engine.analyze(42, "  Persistent   cough ", &cancel).unwrap();

        assert_eq!(h.mock.call_count(), 1);
        assert_ne!(first.id, second.id, "each analysis is its own record");
        assert_eq!(treatment_count(&h.store, 42), 2);
        assert_eq!(h.engine.controller().stats().hits, 1);
    }

    #[test]
    fn empty_model_output_persists_nothing() {
        let h = harness(MockCompletionClient::new(""));
        let history_before = h.store.read(|r| r.count_history(42)).unwrap();

        let result = h.engine.analyze(42, "persistent cough", &CancelToken::new());

        assert!(matches!(
            result,
            Err(RecommendationError::Validation(ValidationError::Empty))
        ));
        assert_eq!(treatment_count(&h.store, 42), 0);
        assert_eq!(h.store.read(|r| r.count_history(42)).unwrap(), history_before);
        assert_eq!(h.engine.controller().stats().entries, 0);
    }

    #[test]
    fn rejected_output_is_not_served_from_cache() {
        let h = harness(MockCompletionClient::scripted(vec![
            Ok("Take 500 mg amoxicillin three times daily for a week.".into()),
            Ok(GOOD.into()),
        ]));
        let cancel = CancelToken::new();
        assert!(matches!(
            h.engine.analyze(42, "persistent cough", &cancel),
            Err(RecommendationError::Validation(ValidationError::DosingInstruction))
        ));
        let t = h.engine.analyze(42, "persistent cough", &cancel).unwrap();
        assert_eq!(t.suggestion, GOOD);
        assert_eq!(h.mock.call_count(), 2);
    }

    #[test]
    fn unknown_and_archived_patients_rejected_before_ai_call() {
        let h = harness(MockCompletionClient::new(GOOD));
        assert!(matches!(
            h.engine.analyze(7, "persistent cough", &CancelToken::new()),
            Err(RecommendationError::PatientNotFound(7))
        ));

        h.store
            .write(|r| -> Result<(), crate::db::DatabaseError> {
                r.append_history(&NewHistoryEntry {
                    patient_id: 42,
                    recorded_at: now(),
                    category: HistoryCategory::Note,
                    description: "moved away".into(),
                })?;
                r.remove_patient(42, now())?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            h.engine.analyze(42, "persistent cough", &CancelToken::new()),
            Err(RecommendationError::PatientArchived(42))
        ));
        assert_eq!(h.mock.call_count(), 0);
    }

    #[test]
    fn blank_input_rejected() {
        let h = harness(MockCompletionClient::new(GOOD));
        let result = h.engine.analyze(42, "  \n\t ", &CancelToken::new());
        assert!(matches!(result, Err(RecommendationError::InvalidInput(_))));
        assert_eq!(h.mock.call_count(), 0);
    }

    #[test]
    fn ai_failure_surfaces_and_persists_nothing() {
        let h = harness(MockCompletionClient::failing(AiServiceError::Unauthorized));
        let result = h.engine.analyze(42, "persistent cough", &CancelToken::new());
        assert!(matches!(
            result,
            Err(RecommendationError::Ai(AiServiceError::Unauthorized))
        ));
        assert_eq!(h.mock.call_count(), 1);
        assert_eq!(treatment_count(&h.store, 42), 0);
    }

    #[test]
    fn transient_failure_retried() {
        let h = harness(MockCompletionClient::scripted(vec![
            Err(AiServiceError::Server {
                status: 503,
                body: "loading".into(),
            }),
            Ok(GOOD.into()),
        ]));
        let t = h.engine.analyze(42, "persistent cough", &CancelToken::new()).unwrap();
        assert_eq!(t.suggestion, GOOD);
        assert_eq!(h.mock.call_count(), 2);
    }

    #[test]
    fn cancelled_before_start_calls_nothing() {
        let h = harness(MockCompletionClient::new(GOOD));
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = h.engine.analyze(42, "persistent cough", &cancel);
        assert!(matches!(result, Err(RecommendationError::Cancelled)));
        assert_eq!(h.mock.call_count(), 0);
        assert_eq!(treatment_count(&h.store, 42), 0);
    }

    #[test]
    fn cancelled_during_fetch_persists_nothing() {
        let h = harness(MockCompletionClient::new(GOOD).with_delay(Duration::from_millis(150)));
        let cancel = CancelToken::new();

        let result = thread::scope(|s| {
            let trigger = cancel.clone();
            s.spawn(move || {
                thread::sleep(Duration::from_millis(30));
                trigger.cancel();
            });
            h.engine.analyze(42, "persistent cough", &cancel)
        });

        assert!(matches!(result, Err(RecommendationError::Cancelled)));
        assert_eq!(treatment_count(&h.store, 42), 0);
    }

    #[test]
    fn plan_treatment_uses_condition_prompt() {
        let h = harness(MockCompletionClient::new(GOOD));
        let t = h
            .engine
            .plan_treatment(42, "seasonal asthma", &CancelToken::new())
            .unwrap();
        assert_eq!(t.kind, SuggestionKind::TreatmentPlan);
        let prompt = h.mock.last_request().unwrap().prompt;
        assert!(prompt.contains("<condition>\nseasonal asthma\n</condition>"));
    }

    #[test]
    fn manual_treatment_changes_context_and_cache_key() {
        let h = harness(MockCompletionClient::new(GOOD));
        let cancel = CancelToken::new();
        h.engine.analyze(42, "persistent cough", &cancel).unwrap();

        h.engine
            .record_manual_treatment(ManualTreatment {
                patient_id: 42,
                appointment_id: None,
                condition: "cough".into(),
                suggestion: "Steam inhalation and rest".into(),
                kind: SuggestionKind::SymptomAnalysis,
            })
            .unwrap();
        h.engine.analyze(42, "persistent cough", &cancel).unwrap();

        assert_eq!(h.mock.call_count(), 2);
        assert!(h
            .mock
            .last_request()
            .unwrap()
            .prompt
            .contains("Steam inhalation and rest"));
    }

    #[test]
    fn correction_supersedes_without_touching_prior() {
        let h = harness(MockCompletionClient::new(GOOD));
        let prior = h.engine.analyze(42, "persistent cough", &CancelToken::new()).unwrap();
        let fixed = h
            .engine
            .correct_treatment(prior.id, "Likely post-viral cough; review in two weeks.")
            .unwrap();

        assert_eq!(fixed.supersedes, Some(prior.id));
        assert_eq!(fixed.source, TreatmentSource::Manual);
        assert_eq!(fixed.condition, prior.condition);
        let stored_prior = h.store.read(|r| r.get_treatment(&prior.id)).unwrap().unwrap();
        assert_eq!(stored_prior, prior);

        assert!(matches!(
            h.engine.correct_treatment(Uuid::new_v4(), "text"),
            Err(RecommendationError::TreatmentNotFound(_))
        ));
        assert!(matches!(
            h.engine.correct_treatment(prior.id, "   "),
            Err(RecommendationError::InvalidInput(_))
        ));
    }

    #[test]
    fn manual_treatment_rejects_foreign_appointment() {
        let h = harness(MockCompletionClient::new(GOOD));
        let result = h.engine.record_manual_treatment(ManualTreatment {
            patient_id: 42,
            appointment_id: Some(Uuid::new_v4()),
            condition: "cough".into(),
            suggestion: "rest".into(),
            kind: SuggestionKind::SymptomAnalysis,
        });
        assert!(matches!(result, Err(RecommendationError::AppointmentNotFound(_))));
        assert_eq!(treatment_count(&h.store, 42), 0);
    }
}
