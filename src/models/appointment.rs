use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AppointmentStatus;

/// Half-open time window `[start, start + duration)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub duration_minutes: i64,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, duration_minutes: i64) -> Self {
        Self {
            start,
            duration_minutes,
        }
    }

    /// `None` when the end falls outside the representable range.
    pub fn checked_end(&self) -> Option<NaiveDateTime> {
        Duration::try_minutes(self.duration_minutes).and_then(|d| self.start.checked_add_signed(d))
    }

    /// Saturates at `NaiveDateTime::MAX`. Windows that reach the store have
    /// already been checked with `checked_end`.
    pub fn end(&self) -> NaiveDateTime {
        self.checked_end().unwrap_or(NaiveDateTime::MAX)
    }

    /// Two windows overlap unless one ends at or before the other begins.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: i64,
    pub resource_id: String,
    pub starts_at: NaiveDateTime,
    pub duration_minutes: i64,
    pub purpose: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.starts_at, self.duration_minutes)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.window().end()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAppointment {
    pub patient_id: i64,
    pub resource_id: String,
    pub window: TimeWindow,
    pub purpose: Option<String>,
}

/// Selection for upcoming scheduled appointments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpcomingFilter {
    pub patient_id: Option<i64>,
    pub resource_id: Option<String>,
    pub limit: Option<u32>,
}
