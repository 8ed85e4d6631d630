use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::enums::ResourceKind;
use super::TimeWindow;

/// A clinician or room that appointments are booked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub kind: ResourceKind,
    pub active: bool,
    /// Daily opening hours. Both unset means bookable around the clock.
    pub opens_at: Option<NaiveTime>,
    pub closes_at: Option<NaiveTime>,
}

impl Resource {
    /// Whether `window` fits inside the resource's opening hours.
    ///
    /// The window must start and end on the same day, except that it may end
    /// exactly at midnight when the resource has no closing time.
    pub fn is_open_for(&self, window: &TimeWindow) -> bool {
        let (opens, closes) = match (self.opens_at, self.closes_at) {
            (None, None) => return true,
            (opens, closes) => (opens.unwrap_or(NaiveTime::MIN), closes),
        };

        let start = window.start;
        let end = window.end();
        if start.time() < opens {
            return false;
        }

        match closes {
            Some(closes) => end.date() == start.date() && end.time() <= closes,
            None => {
                end.date() == start.date()
                    || (end.time() == NaiveTime::MIN && end.date().pred_opt() == Some(start.date()))
            }
        }
    }
}
