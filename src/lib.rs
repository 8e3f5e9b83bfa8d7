//! Capture-to-answer pipeline for on-screen quiz questions.
//!
//! A captured image is sent to a vision model with a mode-specific prompt,
//! the answer is extracted from the model's free text, and, when enabled, the
//! answer is applied to the quiz page by clicking the matching option or
//! filling the free-text input.

pub mod adapter;
pub mod config;
pub mod content;
pub mod dom_scripts;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod page;
pub mod parser;
pub mod store;
pub mod types;

pub use config::{
    LoggerCallback, Verbosity, VisionKeyConfig, VisionKeyConfigError, VisionKeyConfigOverrides,
};
pub use content::ContentScriptHandler;
pub use llm::{
    ProxyVisionProvider, QuotaLevel, QuotaStatus, VisionModelClient, VisionModelError,
    VisionModelProvider, build_prompt,
};
pub use logging::{LogConfig, LogLevel, VisionLogRecord, VisionLogger};
pub use metrics::AnalysisMetrics;
pub use orchestrator::{
    AnalysisContext, AnalysisError, AnalysisOrchestrator, AnalysisOutcome, AnalysisPhase,
    AnalysisReport, AnswerDispatcher, BackgroundWorker, HandoffReceiver, HandoffRequest,
    HandoffSender, handoff_channel,
};
pub use page::{InteractionDriver, QuizSurface, SurfaceError, match_option};
pub use parser::{parse, parse_detailed};
pub use store::{
    CaptureStore, FileStore, KeyValueStore, MemoryStore, SettingsStore, StoreError,
};
pub use types::{
    ActivationResult, AnswerMode, AutoClickRequest, FailureReason, FinalAnswer, PageMessage,
    PageResponse, QuizOption, SessionState, SessionStatus,
};
