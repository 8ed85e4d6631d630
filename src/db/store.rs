//! Storage seam consumed by the scheduler and recommendation engine.
//!
//! `Records` is the narrow per-entity interface; `RecordStore` hands out a
//! `Records` view either for a plain read or inside one write transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;
use rusqlite::{Connection, TransactionBehavior};
use uuid::Uuid;

use super::{repository, sqlite, DatabaseError};
use crate::models::*;

/// Entity operations available inside a read or write scope.
pub trait Records {
    fn create_patient(&self, patient: &NewPatient, now: NaiveDateTime) -> Result<Patient, DatabaseError>;
    fn get_patient(&self, id: i64) -> Result<Option<Patient>, DatabaseError>;
    fn update_patient(
        &self,
        id: i64,
        update: &PatientUpdate,
        now: NaiveDateTime,
    ) -> Result<Patient, DatabaseError>;
    fn list_patients(&self, include_archived: bool) -> Result<Vec<Patient>, DatabaseError>;
    fn remove_patient(&self, id: i64, now: NaiveDateTime) -> Result<PatientRemoval, DatabaseError>;

    fn upsert_resource(&self, resource: &Resource) -> Result<(), DatabaseError>;
    fn get_resource(&self, id: &str) -> Result<Option<Resource>, DatabaseError>;
    fn list_resources(&self) -> Result<Vec<Resource>, DatabaseError>;

    fn get_appointment(&self, id: &Uuid) -> Result<Option<Appointment>, DatabaseError>;
    fn list_appointments_for_resource(
        &self,
        resource_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Appointment>, DatabaseError>;
    fn list_appointments_for_patient(&self, patient_id: i64) -> Result<Vec<Appointment>, DatabaseError>;
    fn list_upcoming_appointments(
        &self,
        from: NaiveDateTime,
        filter: &UpcomingFilter,
    ) -> Result<Vec<Appointment>, DatabaseError>;
    fn create_appointment(
        &self,
        appointment: &NewAppointment,
        now: NaiveDateTime,
    ) -> Result<Appointment, DatabaseError>;
    fn update_appointment_window(
        &self,
        id: &Uuid,
        window: &TimeWindow,
        now: NaiveDateTime,
    ) -> Result<(), DatabaseError>;
    fn update_appointment_status(
        &self,
        id: &Uuid,
        status: AppointmentStatus,
        now: NaiveDateTime,
    ) -> Result<(), DatabaseError>;

    fn create_treatment(&self, treatment: &NewTreatment, now: NaiveDateTime) -> Result<Treatment, DatabaseError>;
    fn get_treatment(&self, id: &Uuid) -> Result<Option<Treatment>, DatabaseError>;
    fn list_recent_treatments(
        &self,
        patient_id: i64,
        source: Option<TreatmentSource>,
        limit: u32,
    ) -> Result<Vec<Treatment>, DatabaseError>;
    fn count_treatments(&self, patient_id: i64) -> Result<i64, DatabaseError>;

    fn list_recent_history(&self, patient_id: i64, limit: u32) -> Result<Vec<HistoryEntry>, DatabaseError>;
    fn append_history(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry, DatabaseError>;
    fn count_history(&self, patient_id: i64) -> Result<i64, DatabaseError>;
}

impl Records for Connection {
    fn create_patient(&self, patient: &NewPatient, now: NaiveDateTime) -> Result<Patient, DatabaseError> {
        repository::create_patient(self, patient, now)
    }

    fn get_patient(&self, id: i64) -> Result<Option<Patient>, DatabaseError> {
        repository::get_patient(self, id)
    }

    fn update_patient(
        &self,
        id: i64,
        update: &PatientUpdate,
        now: NaiveDateTime,
    ) -> Result<Patient, DatabaseError> {
        repository::update_patient(self, id, update, now)
    }

    fn list_patients(&self, include_archived: bool) -> Result<Vec<Patient>, DatabaseError> {
        repository::list_patients(self, include_archived)
    }

    fn remove_patient(&self, id: i64, now: NaiveDateTime) -> Result<PatientRemoval, DatabaseError> {
        repository::remove_patient(self, id, now)
    }

    fn upsert_resource(&self, resource: &Resource) -> Result<(), DatabaseError> {
        repository::upsert_resource(self, resource)
    }

    fn get_resource(&self, id: &str) -> Result<Option<Resource>, DatabaseError> {
        repository::get_resource(self, id)
    }

    fn list_resources(&self) -> Result<Vec<Resource>, DatabaseError> {
        repository::list_resources(self)
    }

    fn get_appointment(&self, id: &Uuid) -> Result<Option<Appointment>, DatabaseError> {
        repository::get_appointment(self, id)
    }

    fn list_appointments_for_resource(
        &self,
        resource_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Appointment>, DatabaseError> {
        repository::list_appointments_for_resource(self, resource_id, window)
    }

    fn list_appointments_for_patient(&self, patient_id: i64) -> Result<Vec<Appointment>, DatabaseError> {
        repository::list_appointments_for_patient(self, patient_id)
    }

    fn list_upcoming_appointments(
        &self,
        from: NaiveDateTime,
        filter: &UpcomingFilter,
    ) -> Result<Vec<Appointment>, DatabaseError> {
        repository::list_upcoming_appointments(self, from, filter)
    }

    fn create_appointment(
        &self,
        appointment: &NewAppointment,
        now: NaiveDateTime,
    ) -> Result<Appointment, DatabaseError> {
        repository::create_appointment(self, appointment, now)
    }

    fn update_appointment_window(
        &self,
        id: &Uuid,
        window: &TimeWindow,
        now: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        repository::update_appointment_window(self, id, window, now)
    }

    fn update_appointment_status(
        &self,
        id: &Uuid,
        status: AppointmentStatus,
        now: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        repository::update_appointment_status(self, id, status, now)
    }

    fn create_treatment(&self, treatment: &NewTreatment, now: NaiveDateTime) -> Result<Treatment, DatabaseError> {
        repository::create_treatment(self, treatment, now)
    }

    fn get_treatment(&self, id: &Uuid) -> Result<Option<Treatment>, DatabaseError> {
        repository::get_treatment(self, id)
    }

    fn list_recent_treatments(
        &self,
        patient_id: i64,
        source: Option<TreatmentSource>,
        limit: u32,
    ) -> Result<Vec<Treatment>, DatabaseError> {
        repository::list_recent_treatments(self, patient_id, source, limit)
    }

    fn count_treatments(&self, patient_id: i64) -> Result<i64, DatabaseError> {
        repository::count_treatments(self, patient_id)
    }

    fn list_recent_history(&self, patient_id: i64, limit: u32) -> Result<Vec<HistoryEntry>, DatabaseError> {
        repository::list_recent_history(self, patient_id, limit)
    }

    fn append_history(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry, DatabaseError> {
        repository::append_history(self, entry)
    }

    fn count_history(&self, patient_id: i64) -> Result<i64, DatabaseError> {
        repository::count_history(self, patient_id)
    }
}

/// Transactional access to the record store.
pub trait RecordStore: Send + Sync {
    /// Run `op` against a consistent view without taking the write lock.
    fn read<T, F>(&self, op: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&dyn Records) -> Result<T, DatabaseError>;

    /// Run `op` inside one write transaction. Commits when `op` returns
    /// `Ok`, rolls back otherwise.
    fn write<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Records) -> Result<T, E>,
        E: From<DatabaseError>;
}

/// `RecordStore` over a single SQLite connection.
///
/// Writes take an IMMEDIATE transaction, so concurrent writers (also across
/// processes sharing the file) are serialized before any check is read.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(sqlite::open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(sqlite::open_memory_database()?))
    }

    /// Wrap an already configured and migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

impl RecordStore for SqliteStore {
    fn read<T, F>(&self, op: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&dyn Records) -> Result<T, DatabaseError>,
    {
        let conn = self.lock()?;
        op(&*conn)
    }

    fn write<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Records) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DatabaseError::from)?;
        // dropping `tx` on the error path rolls back
        let value = op(&*tx)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(value)
    }
}
