use std::sync::Arc;

use chrono::{Local, NaiveDateTime};

/// Source of "now" in clinic wall-clock time.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| Local::now().naive_local())
}

/// A clock frozen at `at`.
pub fn fixed_clock(at: NaiveDateTime) -> Clock {
    Arc::new(move || at)
}
