use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub phone: String,
    pub email: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    /// Set when the patient was removed while records still referenced them.
    pub archived_at: Option<NaiveDateTime>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Age in whole years on `on`. `None` if `on` precedes the birth date.
    pub fn age_on(&self, on: NaiveDate) -> Option<u32> {
        let mut years = on.year() - self.date_of_birth.year();
        if (on.month(), on.day()) < (self.date_of_birth.month(), self.date_of_birth.day()) {
            years -= 1;
        }
        u32::try_from(years).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub phone: String,
    pub email: Option<String>,
}

/// Partial update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<String>,
    pub email: Option<Option<String>>,
}

impl PatientUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.date_of_birth.is_none()
            && self.phone.is_none()
            && self.email.is_none()
    }
}

/// Outcome of removing a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientRemoval {
    /// No records referenced the patient; the row is gone.
    Deleted,
    /// Records reference the patient; it is archived instead.
    Archived,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient_born(dob: NaiveDate) -> Patient {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        Patient {
            id: 1,
            first_name: "Ada".into(),
            last_name: "Byron".into(),
            date_of_birth: dob,
            phone: "555-0100".into(),
            email: None,
            created_at: ts,
            updated_at: ts,
            archived_at: None,
        }
    }

    #[test]
    fn age_counts_completed_years() {
        let p = patient_born(NaiveDate::from_ymd_opt(1980, 6, 15).unwrap());
        assert_eq!(p.age_on(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()), Some(43));
        assert_eq!(p.age_on(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()), Some(44));
    }

    #[test]
    fn age_before_birth_is_none() {
        let p = patient_born(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap());
        assert_eq!(p.age_on(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()), None);
    }

    #[test]
    fn empty_update_detected() {
        assert!(PatientUpdate::default().is_empty());
        let update = PatientUpdate {
            email: Some(None),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
