pub mod cache_key;
pub mod context;
pub mod engine;
pub mod prompt;
pub mod sanitize;
pub mod validate;

pub use cache_key::*;
pub use context::*;
pub use engine::*;
pub use prompt::*;
pub use sanitize::*;
pub use validate::*;

use thiserror::Error;
use uuid::Uuid;

use crate::ai::AiServiceError;
use crate::db::DatabaseError;

/// Why a completion was not accepted as a suggestion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("AI response is empty")]
    Empty,

    #[error("AI response too short ({len} < {min} characters)")]
    TooShort { len: usize, min: usize },

    #[error("AI response too long ({len} > {max} characters)")]
    TooLong { len: usize, max: usize },

    #[error("AI response repeats the request instead of answering it")]
    EchoedInput,

    #[error("AI response contains prompt scaffolding")]
    PromptLeak,

    #[error("AI response is degenerate repetition")]
    Repetitive,

    #[error("AI response contains specific dosing instructions")]
    DosingInstruction,
}

#[derive(Error, Debug)]
pub enum RecommendationError {
    #[error("Patient {0} not found")]
    PatientNotFound(i64),

    #[error("Patient {0} is archived")]
    PatientArchived(i64),

    #[error("Treatment {0} not found")]
    TreatmentNotFound(Uuid),

    #[error("Appointment {0} not found for this patient")]
    AppointmentNotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("AI response rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("AI service error: {0}")]
    Ai(AiServiceError),

    #[error("Recommendation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<AiServiceError> for RecommendationError {
    fn from(e: AiServiceError) -> Self {
        match e {
            AiServiceError::Cancelled => RecommendationError::Cancelled,
            other => RecommendationError::Ai(other),
        }
    }
}
