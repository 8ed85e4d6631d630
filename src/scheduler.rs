//! Conflict-aware appointment scheduling.
//!
//! Every mutation reads the resource's booked windows and writes inside one
//! immediate transaction, so two callers can never both claim a slot.

use std::sync::Arc;

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::db::{DatabaseError, RecordStore, Records};
use crate::models::*;

/// Last year whose timestamps keep their text ordering in the store.
const MAX_YEAR: i32 = 9999;

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Time slot conflicts with {} scheduled appointment(s)", conflicting.len())]
    Conflict { conflicting: Vec<Uuid> },

    #[error("Invalid duration: {minutes} minutes (allowed 1 to {max})")]
    InvalidDuration { minutes: i64, max: i64 },

    #[error("Invalid start time {start}: {reason}")]
    InvalidStart {
        start: NaiveDateTime,
        reason: &'static str,
    },

    #[error("Start time {start} is in the past")]
    StartInPast { start: NaiveDateTime },

    #[error("Patient not found: {0}")]
    PatientNotFound(i64),

    #[error("Patient {0} is archived")]
    PatientArchived(i64),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource {0} is inactive")]
    ResourceInactive(String),

    #[error("Requested window is outside the opening hours of {0}")]
    OutsideAvailability(String),

    #[error("Appointment not found: {0}")]
    AppointmentNotFound(Uuid),

    #[error("Cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub patient_id: i64,
    pub resource_id: String,
    pub start: NaiveDateTime,
    pub duration_minutes: i64,
    pub purpose: Option<String>,
    /// Permit a start in the past, for entering visits after the fact.
    #[serde(default)]
    pub allow_backdated: bool,
}

pub struct Scheduler<S: RecordStore> {
    store: Arc<S>,
    config: SchedulingConfig,
    clock: Clock,
}

impl<S: RecordStore> Scheduler<S> {
    pub fn new(store: Arc<S>, config: SchedulingConfig, clock: Clock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Book a new appointment if the resource is free for the whole window.
    pub fn schedule(&self, request: ScheduleRequest) -> Result<Appointment, SchedulingError> {
        let now = (self.clock)();
        let window = TimeWindow::new(request.start, request.duration_minutes);
        self.check_window(&window, now, request.allow_backdated)?;

        let appointment = self.store.write(|r| -> Result<Appointment, SchedulingError> {
            let patient = r
                .get_patient(request.patient_id)?
                .ok_or(SchedulingError::PatientNotFound(request.patient_id))?;
            if patient.is_archived() {
                return Err(SchedulingError::PatientArchived(patient.id));
            }
            check_resource(r, &request.resource_id, &window)?;
            ensure_free(r, &request.resource_id, &window, None)?;

            let appointment = r.create_appointment(
                &NewAppointment {
                    patient_id: request.patient_id,
                    resource_id: request.resource_id.clone(),
                    window,
                    purpose: request.purpose.clone(),
                },
                now,
            )?;
            Ok(appointment)
        })?;

        tracing::info!(
            appointment_id = %appointment.id,
            patient_id = appointment.patient_id,
            resource_id = %appointment.resource_id,
            "Appointment scheduled"
        );
        Ok(appointment)
    }

    /// Move a scheduled appointment. Its own current window never counts
    /// as a conflict.
    pub fn reschedule(
        &self,
        id: Uuid,
        start: NaiveDateTime,
        duration_minutes: i64,
    ) -> Result<Appointment, SchedulingError> {
        let now = (self.clock)();
        let window = TimeWindow::new(start, duration_minutes);
        self.check_window(&window, now, false)?;

        let appointment = self.store.write(|r| -> Result<Appointment, SchedulingError> {
            let current = load_appointment(r, id)?;
            if current.status != AppointmentStatus::Scheduled {
                return Err(SchedulingError::InvalidTransition {
                    from: current.status,
                    to: AppointmentStatus::Scheduled,
                });
            }
            check_resource(r, &current.resource_id, &window)?;
            ensure_free(r, &current.resource_id, &window, Some(id))?;

            r.update_appointment_window(&id, &window, now)?;
            load_appointment(r, id)
        })?;

        tracing::info!(
            appointment_id = %id,
            resource_id = %appointment.resource_id,
            "Appointment rescheduled"
        );
        Ok(appointment)
    }

    /// Cancel an appointment. Cancelling an already cancelled appointment
    /// returns it unchanged.
    pub fn cancel(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        self.transition(id, AppointmentStatus::Cancelled)
    }

    pub fn complete(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        self.transition(id, AppointmentStatus::Completed)
    }

    pub fn mark_no_show(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        self.transition(id, AppointmentStatus::NoShow)
    }

    /// Scheduled appointments starting now or later, soonest first.
    pub fn upcoming(&self, filter: &UpcomingFilter) -> Result<Vec<Appointment>, SchedulingError> {
        let now = (self.clock)();
        let filter = UpcomingFilter {
            limit: Some(filter.limit.unwrap_or(self.config.default_upcoming_limit)),
            ..filter.clone()
        };
        Ok(self
            .store
            .read(|r| r.list_upcoming_appointments(now, &filter))?)
    }

    fn transition(&self, id: Uuid, to: AppointmentStatus) -> Result<Appointment, SchedulingError> {
        let now = (self.clock)();
        let (appointment, changed) = self.store.write(|r| -> Result<_, SchedulingError> {
            let current = load_appointment(r, id)?;
            if current.status == to && to == AppointmentStatus::Cancelled {
                return Ok((current, false));
            }
            if current.status.is_terminal() {
                return Err(SchedulingError::InvalidTransition {
                    from: current.status,
                    to,
                });
            }
            r.update_appointment_status(&id, to, now)?;
            Ok((load_appointment(r, id)?, true))
        })?;

        if changed {
            tracing::info!(appointment_id = %id, status = %to, "Appointment status changed");
        }
        Ok(appointment)
    }

    fn check_window(
        &self,
        window: &TimeWindow,
        now: NaiveDateTime,
        allow_backdated: bool,
    ) -> Result<(), SchedulingError> {
        let max = self.config.max_duration_minutes;
        if window.duration_minutes <= 0 || window.duration_minutes > max {
            return Err(SchedulingError::InvalidDuration {
                minutes: window.duration_minutes,
                max,
            });
        }
        if window.start.second() != 0 || window.start.nanosecond() != 0 {
            return Err(SchedulingError::InvalidStart {
                start: window.start,
                reason: "must fall on a whole minute",
            });
        }
        // stored timestamps sort as text only for four-digit years
        let in_range = |t: NaiveDateTime| (1..=MAX_YEAR).contains(&t.year());
        match window.checked_end() {
            Some(end) if in_range(window.start) && in_range(end) => {}
            _ => {
                return Err(SchedulingError::InvalidStart {
                    start: window.start,
                    reason: "outside the supported date range",
                })
            }
        }
        if window.start < now && !allow_backdated {
            return Err(SchedulingError::StartInPast {
                start: window.start,
            });
        }
        Ok(())
    }
}

fn load_appointment(r: &dyn Records, id: Uuid) -> Result<Appointment, SchedulingError> {
    r.get_appointment(&id)?
        .ok_or(SchedulingError::AppointmentNotFound(id))
}

fn check_resource(r: &dyn Records, resource_id: &str, window: &TimeWindow) -> Result<(), SchedulingError> {
    let resource = r
        .get_resource(resource_id)?
        .ok_or_else(|| SchedulingError::ResourceNotFound(resource_id.to_string()))?;
    if !resource.active {
        return Err(SchedulingError::ResourceInactive(resource.id));
    }
    if !resource.is_open_for(window) {
        return Err(SchedulingError::OutsideAvailability(resource.id));
    }
    Ok(())
}

/// Fail with the colliding ids if any scheduled appointment other than
/// `exclude` intersects `window` on the resource.
fn ensure_free(
    r: &dyn Records,
    resource_id: &str,
    window: &TimeWindow,
    exclude: Option<Uuid>,
) -> Result<(), SchedulingError> {
    let conflicting: Vec<Uuid> = r
        .list_appointments_for_resource(resource_id, window)?
        .into_iter()
        .filter(|a| Some(a.id) != exclude)
        .map(|a| a.id)
        .collect();

    if conflicting.is_empty() {
        return Ok(());
    }
    tracing::warn!(
        resource_id = %resource_id,
        conflicts = conflicting.len(),
        "Scheduling conflict"
    );
    Err(SchedulingError::Conflict { conflicting })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fixed_clock;
    use crate::db::SqliteStore;
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;
    use std::sync::Barrier;
    use std::thread;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn seed(store: &SqliteStore) -> i64 {
        store
            .write(|r| -> Result<i64, DatabaseError> {
                let p = r.create_patient(
                    &NewPatient {
                        first_name: "Lena".into(),
                        last_name: "Okafor".into(),
                        date_of_birth: NaiveDate::from_ymd_opt(1985, 4, 12).unwrap(),
                        phone: "555-0199".into(),
                        email: None,
                    },
                    at(7, 0),
                )?;
                r.upsert_resource(&Resource {
                    id: "dr-chen".into(),
                    name: "Dr. Chen".into(),
                    kind: ResourceKind::Clinician,
                    active: true,
                    opens_at: NaiveTime::from_hms_opt(8, 0, 0),
                    closes_at: NaiveTime::from_hms_opt(17, 0, 0),
                })?;
                r.upsert_resource(&Resource {
                    id: "room-1".into(),
                    name: "Exam room 1".into(),
                    kind: ResourceKind::Room,
                    active: true,
                    opens_at: None,
                    closes_at: None,
                })?;
                Ok(p.id)
            })
            .unwrap()
    }

    fn setup() -> (Scheduler<SqliteStore>, Arc<SqliteStore>, i64) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let patient_id = seed(&store);
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            SchedulingConfig::default(),
            fixed_clock(at(8, 0)),
        );
        (scheduler, store, patient_id)
    }

    fn request(patient_id: i64, start: NaiveDateTime, minutes: i64) -> ScheduleRequest {
        ScheduleRequest {
            patient_id,
            resource_id: "dr-chen".into(),
            start,
            duration_minutes: minutes,
            purpose: Some("follow-up".into()),
            allow_backdated: false,
        }
    }

    #[test]
    fn overlapping_booking_rejected_adjacent_allowed() {
        let (s, _, pid) = setup();
        let first = s.schedule(request(pid, at(9, 0), 30)).unwrap();
        assert_eq!(first.status, AppointmentStatus::Scheduled);
        assert_eq!(first.ends_at(), at(9, 30));

        match s.schedule(request(pid, at(9, 15), 30)) {
            Err(SchedulingError::Conflict { conflicting }) => assert_eq!(conflicting, vec![first.id]),
            other => panic!("expected conflict, got {other:?}"),
        }

        let adjacent = s.schedule(request(pid, at(9, 30), 30)).unwrap();
        assert_eq!(adjacent.starts_at, at(9, 30));
    }

    #[test]
    fn conflict_lists_every_colliding_appointment() {
        let (s, _, pid) = setup();
        let a = s.schedule(request(pid, at(10, 0), 30)).unwrap();
        let b = s.schedule(request(pid, at(10, 30), 30)).unwrap();
        match s.schedule(request(pid, at(10, 15), 30)) {
            Err(SchedulingError::Conflict { conflicting }) => {
                assert_eq!(conflicting.len(), 2);
                assert!(conflicting.contains(&a.id) && conflicting.contains(&b.id));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn other_resources_do_not_conflict() {
        let (s, _, pid) = setup();
        s.schedule(request(pid, at(9, 0), 30)).unwrap();
        let mut room = request(pid, at(9, 0), 30);
        room.resource_id = "room-1".into();
        assert!(s.schedule(room).is_ok());
    }

    #[test]
    fn invalid_durations_rejected() {
        let (s, _, pid) = setup();
        for minutes in [0, -15, 481] {
            assert!(matches!(
                s.schedule(request(pid, at(9, 0), minutes)),
                Err(SchedulingError::InvalidDuration { max: 480, .. })
            ));
        }
    }

    #[test]
    fn past_start_needs_backdated_flag() {
        let (s, _, pid) = setup();
        let yesterday = at(10, 0) - chrono::Duration::days(1);
        assert!(matches!(
            s.schedule(request(pid, yesterday, 30)),
            Err(SchedulingError::StartInPast { .. })
        ));

        let mut backdated = request(pid, yesterday, 30);
        backdated.allow_backdated = true;
        assert_eq!(s.schedule(backdated).unwrap().starts_at, yesterday);
    }

    #[test]
    fn unknown_or_unusable_references_rejected() {
        let (s, store, pid) = setup();
        assert!(matches!(
            s.schedule(request(999, at(9, 0), 30)),
            Err(SchedulingError::PatientNotFound(999))
        ));

        let mut unknown = request(pid, at(9, 0), 30);
        unknown.resource_id = "dr-nobody".into();
        assert!(matches!(
            s.schedule(unknown),
            Err(SchedulingError::ResourceNotFound(id)) if id == "dr-nobody"
        ));

        assert!(matches!(
            s.schedule(request(pid, at(16, 45), 30)),
            Err(SchedulingError::OutsideAvailability(_))
        ));

        store
            .write(|r| -> Result<(), DatabaseError> {
                let mut res = r.get_resource("dr-chen")?.unwrap();
                res.active = false;
                r.upsert_resource(&res)
            })
            .unwrap();
        assert!(matches!(
            s.schedule(request(pid, at(9, 0), 30)),
            Err(SchedulingError::ResourceInactive(_))
        ));
    }

    #[test]
    fn archived_patient_cannot_book() {
        let (s, store, pid) = setup();
        let mut room = request(pid, at(9, 0), 30);
        room.resource_id = "room-1".into();
        s.schedule(room).unwrap();
        let removal = store.write(|r| r.remove_patient(pid, at(8, 0))).unwrap();
        assert_eq!(removal, PatientRemoval::Archived);

        assert!(matches!(
            s.schedule(request(pid, at(11, 0), 30)),
            Err(SchedulingError::PatientArchived(_))
        ));
    }

    #[test]
    fn reschedule_ignores_own_window() {
        let (s, _, pid) = setup();
        let a = s.schedule(request(pid, at(9, 0), 30)).unwrap();
        let moved = s.reschedule(a.id, at(9, 15), 45).unwrap();
        assert_eq!(moved.id, a.id);
        assert_eq!(moved.starts_at, at(9, 15));
        assert_eq!(moved.duration_minutes, 45);
    }

    #[test]
    fn reschedule_into_taken_slot_rejected() {
        let (s, _, pid) = setup();
        let a = s.schedule(request(pid, at(9, 0), 30)).unwrap();
        let b = s.schedule(request(pid, at(11, 0), 30)).unwrap();
        match s.reschedule(b.id, at(9, 20), 30) {
            Err(SchedulingError::Conflict { conflicting }) => assert_eq!(conflicting, vec![a.id]),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(matches!(
            s.reschedule(Uuid::new_v4(), at(12, 0), 30),
            Err(SchedulingError::AppointmentNotFound(_))
        ));
    }

    #[test]
    fn far_future_start_rejected_and_store_stays_usable() {
        let (s, store, pid) = setup();
        let last_slot = NaiveDate::MAX.and_hms_opt(23, 50, 0).unwrap();
        let mut far = request(pid, last_slot, 30);
        far.resource_id = "room-1".into();
        assert!(matches!(
            s.schedule(far),
            Err(SchedulingError::InvalidStart { .. })
        ));

        let year_10k = NaiveDate::from_ymd_opt(10_000, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let mut y10k = request(pid, year_10k, 30);
        y10k.resource_id = "room-1".into();
        assert!(matches!(
            s.schedule(y10k),
            Err(SchedulingError::InvalidStart { .. })
        ));

        assert!(store.read(|r| r.get_patient(pid)).unwrap().is_some());
        assert!(s.schedule(request(pid, at(9, 0), 30)).is_ok());
    }

    #[test]
    fn start_must_fall_on_whole_minute() {
        let (s, _, pid) = setup();
        let odd = at(9, 0) + chrono::Duration::milliseconds(500);
        assert!(matches!(
            s.schedule(request(pid, odd, 30)),
            Err(SchedulingError::InvalidStart { .. })
        ));
        assert!(matches!(
            s.schedule(request(pid, at(9, 0) + chrono::Duration::seconds(20), 30)),
            Err(SchedulingError::InvalidStart { .. })
        ));

        let booked = s.schedule(request(pid, at(9, 0), 30)).unwrap();
        assert_eq!(booked.starts_at, at(9, 0));
    }

    #[test]
    fn reschedule_into_past_rejected() {
        let (s, _, pid) = setup();
        let a = s.schedule(request(pid, at(9, 0), 30)).unwrap();
        let yesterday = at(9, 0) - chrono::Duration::days(1);
        assert!(matches!(
            s.reschedule(a.id, yesterday, 30),
            Err(SchedulingError::StartInPast { .. })
        ));
    }

    #[test]
    fn reschedule_outside_opening_hours_rejected() {
        let (s, store, pid) = setup();
        let a = s.schedule(request(pid, at(9, 0), 30)).unwrap();
        assert!(matches!(
            s.reschedule(a.id, at(16, 45), 30),
            Err(SchedulingError::OutsideAvailability(id)) if id == "dr-chen"
        ));
        let unchanged = store.read(|r| r.get_appointment(&a.id)).unwrap().unwrap();
        assert_eq!(unchanged.starts_at, at(9, 0));
    }

    #[test]
    fn only_scheduled_appointments_move() {
        let (s, _, pid) = setup();
        let a = s.schedule(request(pid, at(9, 0), 30)).unwrap();
        s.complete(a.id).unwrap();
        assert!(matches!(
            s.reschedule(a.id, at(10, 0), 30),
            Err(SchedulingError::InvalidTransition {
                from: AppointmentStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn cancel_is_idempotent_and_frees_slot() {
        let (s, _, pid) = setup();
        let a = s.schedule(request(pid, at(9, 0), 30)).unwrap();
        let first = s.cancel(a.id).unwrap();
        let second = s.cancel(a.id).unwrap();
        assert_eq!(first.status, AppointmentStatus::Cancelled);
        assert_eq!(second, first);

        assert!(s.schedule(request(pid, at(9, 0), 30)).is_ok());
    }

    #[test]
    fn terminal_states_do_not_transition() {
        let (s, _, pid) = setup();
        let a = s.schedule(request(pid, at(9, 0), 30)).unwrap();
        assert_eq!(s.mark_no_show(a.id).unwrap().status, AppointmentStatus::NoShow);
        assert!(matches!(
            s.cancel(a.id),
            Err(SchedulingError::InvalidTransition {
                from: AppointmentStatus::NoShow,
                to: AppointmentStatus::Cancelled,
            })
        ));
        assert!(matches!(
            s.complete(a.id),
            Err(SchedulingError::InvalidTransition { .. })
        ));
        assert!(matches!(
            s.cancel(Uuid::new_v4()),
            Err(SchedulingError::AppointmentNotFound(_))
        ));
    }

    #[test]
    fn upcoming_filters_and_limits() {
        let (s, _, pid) = setup();
        let a = s.schedule(request(pid, at(9, 0), 30)).unwrap();
        let b = s.schedule(request(pid, at(10, 0), 30)).unwrap();
        let c = s.schedule(request(pid, at(11, 0), 30)).unwrap();
        s.cancel(b.id).unwrap();

        let all = s.upcoming(&UpcomingFilter::default()).unwrap();
        assert_eq!(all.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a.id, c.id]);

        let first = s
            .upcoming(&UpcomingFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, a.id);

        let room = s
            .upcoming(&UpcomingFilter {
                resource_id: Some("room-1".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(room.is_empty());
    }

    #[test]
    fn concurrent_overlapping_requests_book_once() {
        let (s, store, pid) = setup();
        let barrier = Barrier::new(8);

        let results: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8u32)
                .map(|i| {
                    let s = &s;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        s.schedule(request(pid, at(9, i * 3), 30))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let booked = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(SchedulingError::Conflict { .. })))
            .count();
        assert_eq!(booked, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.read(|r| r.list_appointments_for_patient(pid)).unwrap().len(), 1);
    }

    #[test]
    fn two_connections_on_one_file_book_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clinic.db");
        let first = Arc::new(SqliteStore::open(&path).unwrap());
        let pid = seed(&first);
        let second = Arc::new(SqliteStore::open(&path).unwrap());

        let a = Scheduler::new(first, SchedulingConfig::default(), fixed_clock(at(8, 0)));
        let b = Scheduler::new(second, SchedulingConfig::default(), fixed_clock(at(8, 0)));

        let booked = a.schedule(request(pid, at(9, 0), 30)).unwrap();
        match b.schedule(request(pid, at(9, 10), 30)) {
            Err(SchedulingError::Conflict { conflicting }) => assert_eq!(conflicting, vec![booked.id]),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn scheduled_windows_never_overlap(
            slots in prop::collection::vec((0u32..48, 1i64..=120), 1..20)
        ) {
            let (s, store, pid) = setup();
            for (slot, minutes) in slots {
                let mut req = request(pid, at(8, 0) + chrono::Duration::minutes(i64::from(slot) * 10), minutes);
                req.resource_id = "room-1".into();
                let _ = s.schedule(req);
            }

            let booked = store.read(|r| r.list_appointments_for_patient(pid)).unwrap();
            for (i, a) in booked.iter().enumerate() {
                for b in &booked[i + 1..] {
                    prop_assert!(
                        !a.window().overlaps(&b.window()),
                        "{} overlaps {}", a.id, b.id
                    );
                }
            }
        }
    }
}
