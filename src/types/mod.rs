//! Core data structures shared across the capture-to-answer pipeline.
//!
//! These strongly-typed models provide a shared vocabulary for extracted
//! answers, page interaction outcomes, and persisted session records.

pub mod answer;
pub mod page;
pub mod session;

pub use answer::{AnswerMode, AnswerToken, FinalAnswer};
pub use page::{
    ActivationKind, ActivationResult, AutoClickRequest, FailureReason, MatchOutcome,
    MatchStrategy, PageMessage, PageResponse, QuizOption,
};
pub use session::{
    AnalysisResultRecord, CaptureRecord, ExecutionSurface, SessionState, SessionStatus,
};
