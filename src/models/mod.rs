pub mod appointment;
pub mod enums;
pub mod history;
pub mod patient;
pub mod resource;
pub mod treatment;

pub use appointment::*;
pub use enums::*;
pub use history::*;
pub use patient::*;
pub use resource::*;
pub use treatment::*;

/// Timestamp format used for every stored date-time column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date format used for stored dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
