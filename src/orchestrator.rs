//! Capture → prompt → model call → parse → persist pipeline.
//!
//! The orchestrator itself holds no per-run state. Everything about the run in
//! progress lives in an [`AnalysisContext`] owned by the caller, so a popup-like
//! surface and a background worker can each drive their own run against the
//! same persisted store.
//!
//! Concurrent runs are not locked against each other. When both surfaces
//! finish the same capture the last result written wins; the session record's
//! revision tells readers which write they are looking at.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::VisionKeyConfig;
use crate::llm::{MetricsCallback, VisionModelClient, VisionModelError, VisionModelProvider};
use crate::logging::VisionLogger;
use crate::metrics::AnalysisMetrics;
use crate::page::{InteractionDriver, QuizSurface, is_restricted_url};
use crate::parser;
use crate::store::{CaptureStore, KeyValueStore, StoreError};
use crate::types::{
    ActivationResult, AnalysisResultRecord, AnswerMode, AutoClickRequest, CaptureRecord,
    ExecutionSurface, FailureReason, FinalAnswer, SessionState, SessionStatus,
};

/// Longest error text surfaced to the user.
pub const MAX_USER_ERROR_CHARS: usize = 200;

/// Lifecycle of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisPhase {
    #[default]
    Idle,
    Capturing,
    Analyzing,
    Complete,
    Error,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("API Key not set. Please configure in Settings.")]
    MissingCredential,
    #[error("Please capture a screenshot first!")]
    NoCapture,
    #[error("Analysis failed: {0}")]
    Model(#[from] VisionModelError),
    #[error("Storage failed: {0}")]
    Store(#[from] StoreError),
}

impl AnalysisError {
    /// Message suitable for display, capped at [`MAX_USER_ERROR_CHARS`].
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        if message.chars().count() <= MAX_USER_ERROR_CHARS {
            return message;
        }
        let mut truncated: String = message.chars().take(MAX_USER_ERROR_CHARS - 3).collect();
        truncated.push_str("...");
        truncated
    }
}

/// Per-run state, owned by whichever surface drives the run.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub config: VisionKeyConfig,
    pub surface: ExecutionSurface,
    phase: AnalysisPhase,
    capture: Option<CaptureRecord>,
    session: Option<SessionState>,
    last_error: Option<String>,
}

impl AnalysisContext {
    pub fn new(config: VisionKeyConfig, surface: ExecutionSurface) -> Self {
        Self {
            config,
            surface,
            phase: AnalysisPhase::Idle,
            capture: None,
            session: None,
            last_error: None,
        }
    }

    pub fn phase(&self) -> AnalysisPhase {
        self.phase
    }

    pub fn capture(&self) -> Option<&CaptureRecord> {
        self.capture.as_ref()
    }

    /// Last session record this context wrote.
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.phase == AnalysisPhase::Analyzing
    }

    /// Adopt a capture persisted by another surface.
    pub fn attach_capture(&mut self, capture: CaptureRecord) {
        self.capture = Some(capture);
    }
}

/// Completed analysis, ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub mode: AnswerMode,
    pub full_text: String,
    pub final_answer: Option<FinalAnswer>,
}

impl AnalysisReport {
    /// Text shown to the user for this result.
    pub fn render(&self) -> String {
        let Some(answer) = &self.final_answer else {
            return self.full_text.clone();
        };

        match self.mode {
            AnswerMode::MultipleChoice => {
                let parts: Vec<&str> = answer.as_str().split(", ").collect();
                if let [single] = parts.as_slice() {
                    format!("✅ Đáp án: {single}")
                } else {
                    let lines: Vec<String> = parts
                        .iter()
                        .enumerate()
                        .map(|(i, part)| format!("   Câu {}: {part}", i + 1))
                        .collect();
                    format!("✅ Đáp án:\n{}", lines.join("\n"))
                }
            }
            AnswerMode::Essay => format!("{}\n\n✅ Đáp án: {answer}", self.full_text),
        }
    }

    /// Whether the rendered text differs from the full model output, in
    /// which case the full text can be offered separately.
    pub fn has_separate_explanation(&self) -> bool {
        self.mode == AnswerMode::MultipleChoice && self.final_answer.is_some()
    }

    pub fn to_record(&self) -> AnalysisResultRecord {
        AnalysisResultRecord {
            full_text: self.full_text.clone(),
            final_answer: self.final_answer.clone(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// What the caller should do once a run completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOutcome {
    pub report: AnalysisReport,
    /// Present when auto-answer was attempted.
    pub activation: Option<ActivationResult>,
    /// The answer was applied on the page and the capture consumed; the
    /// initiating surface should close.
    pub close_surface: bool,
    /// A newer capture replaced this run's capture before it finished;
    /// nothing was dispatched or persisted after that point.
    pub superseded: bool,
}

/// Delivers an answer to the quiz page.
#[async_trait]
pub trait AnswerDispatcher: Send + Sync {
    /// URL of the page the answer would be applied to.
    async fn page_url(&self) -> Option<String> {
        None
    }

    async fn dispatch(&self, request: &AutoClickRequest) -> ActivationResult;
}

#[async_trait]
impl<S: QuizSurface> AnswerDispatcher for InteractionDriver<S> {
    async fn page_url(&self) -> Option<String> {
        self.surface().url().await.ok().flatten()
    }

    async fn dispatch(&self, request: &AutoClickRequest) -> ActivationResult {
        self.auto_answer(request)
            .await
            .unwrap_or_else(|err| ActivationResult::errored(err.to_string()))
    }
}

/// Drives analyses against a model provider and a local store.
pub struct AnalysisOrchestrator<P: VisionModelProvider, S: KeyValueStore> {
    client: VisionModelClient<P>,
    store: CaptureStore<S>,
    logger: VisionLogger,
    metrics: Arc<Mutex<AnalysisMetrics>>,
}

impl<P, S> fmt::Debug for AnalysisOrchestrator<P, S>
where
    P: VisionModelProvider,
    S: KeyValueStore,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisOrchestrator")
            .field("model", &self.client.model())
            .field("metrics", &self.metrics())
            .finish()
    }
}

impl<P: VisionModelProvider, S: KeyValueStore> AnalysisOrchestrator<P, S> {
    /// Wrap `client`, routing its inference timings into this orchestrator's
    /// metrics.
    pub fn new(mut client: VisionModelClient<P>, store: S) -> Self {
        let metrics = Arc::new(Mutex::new(AnalysisMetrics::default()));
        client.set_metrics_callback(Some(metrics_callback(&metrics)));
        Self {
            client,
            store: CaptureStore::new(store),
            logger: VisionLogger::default(),
            metrics,
        }
    }

    pub fn with_logger(mut self, logger: VisionLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn store(&self) -> &CaptureStore<S> {
        &self.store
    }

    pub fn client(&self) -> &VisionModelClient<P> {
        &self.client
    }

    pub fn metrics(&self) -> AnalysisMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store a fresh capture, superseding any previous capture and result.
    pub async fn capture(
        &self,
        ctx: &mut AnalysisContext,
        captured_image: impl Into<String>,
    ) -> Result<CaptureRecord, AnalysisError> {
        ctx.phase = AnalysisPhase::Capturing;
        ctx.last_error = None;

        match self
            .store
            .begin_capture(captured_image, Utc::now().timestamp_millis())
            .await
        {
            Ok(record) => {
                self.logger.debug(
                    "Capture stored",
                    Some("orchestrator"),
                    Some(json!({
                        "captureTimestamp": record.capture_timestamp,
                        "bytes": record.captured_image.len(),
                    })),
                );
                ctx.capture = Some(record.clone());
                Ok(record)
            }
            Err(err) => Err(self.fail(ctx, err.into()).await),
        }
    }

    /// Run the model on the context's capture and finish the run.
    ///
    /// A missing answer is a normal completion. When auto-answer is enabled
    /// and succeeds, the capture is consumed and nothing is saved; otherwise
    /// the result is persisted for display. If a newer capture replaced this
    /// one while the model was running, the outcome is marked `superseded`
    /// and the store is left to the newer capture.
    pub async fn analyze(
        &self,
        ctx: &mut AnalysisContext,
        dispatcher: Option<&dyn AnswerDispatcher>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let capture = match ctx.capture.clone() {
            Some(capture) => capture,
            None => match self.store.load_capture().await {
                Ok(Some(capture)) => {
                    ctx.capture = Some(capture.clone());
                    capture
                }
                Ok(None) => return Err(self.fail(ctx, AnalysisError::NoCapture).await),
                Err(err) => return Err(self.fail(ctx, err.into()).await),
            },
        };

        let Some(api_key) = ctx.config.credential().map(str::to_string) else {
            return Err(self.fail(ctx, AnalysisError::MissingCredential).await);
        };

        ctx.phase = AnalysisPhase::Analyzing;
        ctx.last_error = None;
        match self
            .store
            .record_session(
                SessionStatus::Analyzing,
                ctx.surface,
                Some(capture.capture_timestamp),
                None,
            )
            .await
        {
            Ok(state) => ctx.session = Some(state),
            Err(err) => return Err(self.fail(ctx, err.into()).await),
        }

        let mode = ctx.config.answer_mode;
        self.logger.info(
            "Analyzing capture",
            Some("orchestrator"),
            Some(json!({
                "mode": mode.as_str(),
                "surface": surface_label(ctx.surface),
                "captureTimestamp": capture.capture_timestamp,
            })),
        );

        let full_text = match self
            .client
            .analyze(
                &api_key,
                &capture.captured_image,
                mode,
                &ctx.config.expert_context,
            )
            .await
        {
            Ok(text) => text,
            Err(err) => return Err(self.fail(ctx, err.into()).await),
        };

        let final_answer = match parser::parse_detailed(&full_text) {
            Some(parsed) => {
                self.logger.debug(
                    format!("Parsed answer: {}", parsed.answer),
                    Some("parser"),
                    Some(json!({ "strategy": parsed.strategy.as_str() })),
                );
                Some(parsed.answer)
            }
            None => {
                self.logger
                    .info("No answer pattern found in response", Some("parser"), None);
                self.with_metrics(AnalysisMetrics::record_parse_miss);
                None
            }
        };

        let report = AnalysisReport {
            mode,
            full_text,
            final_answer,
        };

        match self.store.is_current(capture.capture_timestamp).await {
            Ok(true) => {}
            Ok(false) => return Ok(self.superseded(ctx, report, None)),
            Err(err) => return Err(self.fail(ctx, err.into()).await),
        }

        let activation = match (&report.final_answer, dispatcher) {
            (Some(answer), Some(dispatcher)) if ctx.config.auto_click_enabled => {
                Some(self.dispatch(&ctx.config, answer, dispatcher).await)
            }
            _ => None,
        };

        // Dispatch waits out the humanized delay; re-check before writing.
        match self.store.is_current(capture.capture_timestamp).await {
            Ok(true) => {}
            Ok(false) => return Ok(self.superseded(ctx, report, activation)),
            Err(err) => return Err(self.fail(ctx, err.into()).await),
        }

        let consumed = activation.as_ref().is_some_and(|result| result.success);
        let persisted = if consumed {
            self.logger.info(
                "Auto-answer succeeded, clearing capture",
                Some("orchestrator"),
                None,
            );
            self.store.clear_capture().await
        } else {
            self.store.save_result(&report.to_record()).await
        };
        if let Err(err) = persisted {
            return Err(self.fail(ctx, err.into()).await);
        }

        match self
            .store
            .record_session(
                SessionStatus::Complete,
                ctx.surface,
                Some(capture.capture_timestamp),
                None,
            )
            .await
        {
            Ok(state) => ctx.session = Some(state),
            Err(err) => return Err(self.fail(ctx, err.into()).await),
        }

        ctx.phase = AnalysisPhase::Complete;
        if consumed {
            ctx.capture = None;
        }

        Ok(AnalysisOutcome {
            report,
            activation,
            close_surface: consumed,
            superseded: false,
        })
    }

    /// Finish a run whose capture was replaced mid-analysis. The newer
    /// capture owns the store, so neither the result nor the session record
    /// is written.
    fn superseded(
        &self,
        ctx: &mut AnalysisContext,
        report: AnalysisReport,
        activation: Option<ActivationResult>,
    ) -> AnalysisOutcome {
        self.logger.info(
            "Capture superseded during analysis, discarding result",
            Some("orchestrator"),
            Some(json!({
                "captureTimestamp": ctx.capture.as_ref().map(|c| c.capture_timestamp),
            })),
        );
        ctx.phase = AnalysisPhase::Complete;
        ctx.capture = None;
        AnalysisOutcome {
            report,
            activation,
            close_surface: false,
            superseded: true,
        }
    }

    /// Capture and analyze in one step.
    pub async fn run(
        &self,
        ctx: &mut AnalysisContext,
        captured_image: impl Into<String>,
        dispatcher: Option<&dyn AnswerDispatcher>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.capture(ctx, captured_image).await?;
        self.analyze(ctx, dispatcher).await
    }

    /// Forget the capture and any result (user retake).
    pub async fn retake(&self, ctx: &mut AnalysisContext) -> Result<(), AnalysisError> {
        self.store.clear_capture().await?;
        ctx.capture = None;
        ctx.phase = AnalysisPhase::Idle;
        Ok(())
    }

    pub async fn clear_result(&self) -> Result<(), AnalysisError> {
        Ok(self.store.clear_result().await?)
    }

    pub async fn clear_history(&self, ctx: &mut AnalysisContext) -> Result<(), AnalysisError> {
        self.store.clear_history().await?;
        ctx.capture = None;
        ctx.session = None;
        ctx.phase = AnalysisPhase::Idle;
        Ok(())
    }

    /// Ask the background context to carry on when the initiating surface is
    /// going away mid-analysis. Returns whether a request was sent.
    ///
    /// [`analyze`](Self::analyze) borrows the context for the whole model
    /// call, so a surface reaches this by racing the in-flight `analyze`
    /// future against its teardown signal (e.g. `tokio::select!`) and calling
    /// this once the losing future has been dropped. The context is then
    /// still in [`AnalysisPhase::Analyzing`]. The background worker resumes
    /// from the persisted capture.
    pub fn on_surface_teardown(&self, ctx: &AnalysisContext, handoff: &HandoffSender) -> bool {
        let Some(capture) = ctx.capture.as_ref() else {
            return false;
        };
        if !ctx.is_analyzing() || !ctx.config.hands_off_on_teardown() {
            return false;
        }
        let sent = handoff.send(HandoffRequest {
            capture_timestamp: Some(capture.capture_timestamp),
        });
        self.logger.info(
            "Surface closing during analysis, requesting background continuation",
            Some("orchestrator"),
            Some(json!({ "delivered": sent })),
        );
        sent
    }

    async fn dispatch(
        &self,
        config: &VisionKeyConfig,
        answer: &FinalAnswer,
        dispatcher: &dyn AnswerDispatcher,
    ) -> ActivationResult {
        if let Some(url) = dispatcher.page_url().await {
            if is_restricted_url(&url) {
                self.logger.info(
                    format!("Cannot auto-answer on restricted page: {url}"),
                    Some("orchestrator"),
                    None,
                );
                return ActivationResult::failure(FailureReason::RestrictedPage);
            }
        }

        let request = AutoClickRequest {
            answer: answer.as_str().to_string(),
            delay: config.auto_click_delay_ms,
            show_notification: config.show_click_notification,
        };
        let result = dispatcher.dispatch(&request).await;
        self.with_metrics(|metrics| metrics.record_auto_answer(result.success));
        self.logger.info(
            if result.success {
                "Auto-answer applied"
            } else {
                "Auto-answer did not apply"
            },
            Some("orchestrator"),
            serde_json::to_value(&result).ok(),
        );
        result
    }

    async fn fail(&self, ctx: &mut AnalysisContext, error: AnalysisError) -> AnalysisError {
        let message = error.user_message();
        self.logger.error(message.clone(), Some("orchestrator"), None);
        ctx.phase = AnalysisPhase::Error;
        ctx.last_error = Some(message.clone());

        if !matches!(error, AnalysisError::Store(_)) {
            let capture_timestamp = ctx.capture.as_ref().map(|c| c.capture_timestamp);
            match self
                .store
                .record_session(
                    SessionStatus::Error,
                    ctx.surface,
                    capture_timestamp,
                    Some(message),
                )
                .await
            {
                Ok(state) => ctx.session = Some(state),
                Err(err) => self.logger.error(
                    format!("Failed to record session error: {err}"),
                    Some("orchestrator"),
                    None,
                ),
            }
        }
        error
    }

    fn with_metrics(&self, update: impl FnOnce(&mut AnalysisMetrics)) {
        let mut guard = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut guard);
    }
}

fn metrics_callback(metrics: &Arc<Mutex<AnalysisMetrics>>) -> MetricsCallback {
    let metrics = Arc::clone(metrics);
    Arc::new(move |mode, inference_time_ms| {
        metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_inference(mode, inference_time_ms);
    })
}

fn surface_label(surface: ExecutionSurface) -> &'static str {
    match surface {
        ExecutionSurface::Popup => "popup",
        ExecutionSurface::Background => "background",
    }
}

/// Request for the background context to continue an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffRequest {
    pub capture_timestamp: Option<i64>,
}

/// Fire-and-forget side of the handoff channel.
///
/// Delivery is at most once and unacknowledged: a full or closed channel
/// drops the request.
#[derive(Debug, Clone)]
pub struct HandoffSender {
    tx: mpsc::Sender<HandoffRequest>,
}

impl HandoffSender {
    pub fn send(&self, request: HandoffRequest) -> bool {
        self.tx.try_send(request).is_ok()
    }
}

#[derive(Debug)]
pub struct HandoffReceiver {
    rx: mpsc::Receiver<HandoffRequest>,
}

impl HandoffReceiver {
    pub async fn recv(&mut self) -> Option<HandoffRequest> {
        self.rx.recv().await
    }
}

pub fn handoff_channel(capacity: usize) -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (HandoffSender { tx }, HandoffReceiver { rx })
}

/// Long-lived context that resumes analyses handed off by a closing surface.
pub struct BackgroundWorker<P: VisionModelProvider, S: KeyValueStore> {
    orchestrator: Arc<AnalysisOrchestrator<P, S>>,
    config: VisionKeyConfig,
    dispatcher: Option<Arc<dyn AnswerDispatcher>>,
    logger: VisionLogger,
}

impl<P: VisionModelProvider, S: KeyValueStore> BackgroundWorker<P, S> {
    pub fn new(orchestrator: Arc<AnalysisOrchestrator<P, S>>, config: VisionKeyConfig) -> Self {
        let logger = VisionLogger::new(config.verbose);
        Self {
            orchestrator,
            config,
            dispatcher: None,
            logger,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn AnswerDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Handle requests until every sender is dropped.
    pub async fn run(self, mut requests: HandoffReceiver) {
        while let Some(request) = requests.recv().await {
            match self.resume(request).await {
                Ok(Some(outcome)) => self.logger.info(
                    "Background analysis finished",
                    Some("background"),
                    Some(json!({ "consumed": outcome.close_surface })),
                ),
                Ok(None) => {}
                Err(err) => self.logger.error(
                    format!("Background analysis failed: {}", err.user_message()),
                    Some("background"),
                    None,
                ),
            }
        }
    }

    /// Continue the analysis of the persisted capture.
    ///
    /// Returns `Ok(None)` when there is nothing to do: no capture is stored,
    /// or another context already completed this capture.
    pub async fn resume(
        &self,
        request: HandoffRequest,
    ) -> Result<Option<AnalysisOutcome>, AnalysisError> {
        let store = self.orchestrator.store();
        let Some(capture) = store.load_capture().await? else {
            self.logger
                .debug("Handoff ignored: no capture stored", Some("background"), None);
            return Ok(None);
        };

        if let Some(requested) = request.capture_timestamp {
            if requested != capture.capture_timestamp {
                self.logger.debug(
                    "Handoff ignored: capture was superseded",
                    Some("background"),
                    None,
                );
                return Ok(None);
            }
        }

        let state = store.load_session_state().await?;
        let already_done = state.is_some_and(|state| {
            state.status == SessionStatus::Complete
                && state.capture_timestamp == Some(capture.capture_timestamp)
        });
        if already_done && store.load_result().await?.is_some() {
            self.logger.debug(
                "Handoff ignored: capture already analysed",
                Some("background"),
                None,
            );
            return Ok(None);
        }

        let mut ctx = AnalysisContext::new(self.config.clone(), ExecutionSurface::Background);
        ctx.attach_capture(capture);
        let outcome = self
            .orchestrator
            .analyze(&mut ctx, self.dispatcher.as_deref())
            .await?;
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Notify;

    use crate::llm::{AnalyzeRequest, QuotaStatus};
    use crate::store::MemoryStore;

    struct FixedProvider(String);

    #[async_trait]
    impl VisionModelProvider for FixedProvider {
        async fn analyze(
            &self,
            _api_key: &str,
            _request: &AnalyzeRequest,
        ) -> Result<String, VisionModelError> {
            Ok(self.0.clone())
        }

        async fn check_quota(&self, _api_key: &str) -> Result<QuotaStatus, VisionModelError> {
            Ok(QuotaStatus::Rejected {
                message: "unused".into(),
            })
        }
    }

    /// Answers only once the gate is opened.
    struct GatedProvider {
        text: String,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl VisionModelProvider for GatedProvider {
        async fn analyze(
            &self,
            _api_key: &str,
            _request: &AnalyzeRequest,
        ) -> Result<String, VisionModelError> {
            self.gate.notified().await;
            Ok(self.text.clone())
        }

        async fn check_quota(&self, _api_key: &str) -> Result<QuotaStatus, VisionModelError> {
            Ok(QuotaStatus::Rejected {
                message: "unused".into(),
            })
        }
    }

    #[derive(Default)]
    struct CountingDispatcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnswerDispatcher for CountingDispatcher {
        async fn dispatch(&self, request: &AutoClickRequest) -> ActivationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ActivationResult::clicked(request.answer.clone())
        }
    }

    fn orchestrator(text: &str) -> AnalysisOrchestrator<FixedProvider, MemoryStore> {
        AnalysisOrchestrator::new(
            VisionModelClient::new("m", FixedProvider(text.into())),
            MemoryStore::new(),
        )
    }

    fn config_with_key() -> VisionKeyConfig {
        VisionKeyConfig {
            api_key: Some("KEY".into()),
            ..VisionKeyConfig::default()
        }
    }

    #[test]
    fn renders_single_and_multi_choice() {
        let single = AnalysisReport {
            mode: AnswerMode::MultipleChoice,
            full_text: "long".into(),
            final_answer: Some(FinalAnswer::new("B")),
        };
        assert_eq!(single.render(), "✅ Đáp án: B");
        assert!(single.has_separate_explanation());

        let multi = AnalysisReport {
            final_answer: Some(FinalAnswer::new("A, C")),
            ..single.clone()
        };
        assert_eq!(multi.render(), "✅ Đáp án:\n   Câu 1: A\n   Câu 2: C");
    }

    #[test]
    fn renders_essay_and_missing_answer() {
        let essay = AnalysisReport {
            mode: AnswerMode::Essay,
            full_text: "Giải thích".into(),
            final_answer: Some(FinalAnswer::new("42")),
        };
        assert_eq!(essay.render(), "Giải thích\n\n✅ Đáp án: 42");
        assert!(!essay.has_separate_explanation());

        let raw = AnalysisReport {
            final_answer: None,
            ..essay
        };
        assert_eq!(raw.render(), "Giải thích");
    }

    #[test]
    fn user_message_is_truncated() {
        let err = AnalysisError::Model(VisionModelError::Http {
            status: 500,
            message: "x".repeat(500),
        });
        let message = err.user_message();
        assert_eq!(message.chars().count(), MAX_USER_ERROR_CHARS);
        assert!(message.starts_with("Analysis failed: xxx"));
        assert!(message.ends_with("..."));
    }

    #[tokio::test]
    async fn missing_credential_moves_to_error_without_calling_model() {
        let orchestrator = orchestrator("FINAL_ANSWER: A");
        let mut ctx = AnalysisContext::new(VisionKeyConfig::default(), ExecutionSurface::Popup);
        orchestrator
            .capture(&mut ctx, "data:image/png;base64,AAA")
            .await
            .unwrap();

        let err = orchestrator.analyze(&mut ctx, None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::MissingCredential));
        assert_eq!(ctx.phase(), AnalysisPhase::Error);
        assert_eq!(orchestrator.metrics().total_analyses, 0);
        let state = orchestrator.store().load_session_state().await.unwrap().unwrap();
        assert_eq!(state.status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn analyze_without_capture_fails() {
        let orchestrator = orchestrator("FINAL_ANSWER: A");
        let mut ctx = AnalysisContext::new(config_with_key(), ExecutionSurface::Popup);
        let err = orchestrator.analyze(&mut ctx, None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoCapture));
    }

    #[tokio::test]
    async fn parse_miss_completes_and_persists_raw_text() {
        let orchestrator = orchestrator("Tôi không chắc.");
        let mut ctx = AnalysisContext::new(config_with_key(), ExecutionSurface::Popup);
        let outcome = orchestrator
            .run(&mut ctx, "data:image/png;base64,AAA", None)
            .await
            .unwrap();

        assert_eq!(ctx.phase(), AnalysisPhase::Complete);
        assert!(outcome.report.final_answer.is_none());
        assert_eq!(outcome.report.render(), "Tôi không chắc.");
        let metrics = orchestrator.metrics();
        assert_eq!(metrics.parse_misses, 1);
        assert_eq!(metrics.multiple_choice_analyses, 1);
        let saved = orchestrator.store().load_result().await.unwrap().unwrap();
        assert_eq!(saved.final_answer, None);
    }

    #[tokio::test]
    async fn teardown_hands_off_only_when_configured_and_analyzing() {
        let orchestrator = orchestrator("x");
        let (sender, mut receiver) = handoff_channel(1);
        let mut ctx = AnalysisContext::new(config_with_key(), ExecutionSurface::Popup);
        ctx.attach_capture(CaptureRecord {
            captured_image: "data:image/png;base64,AAA".into(),
            capture_timestamp: 9,
        });
        ctx.phase = AnalysisPhase::Analyzing;

        assert!(!orchestrator.on_surface_teardown(&ctx, &sender));

        ctx.config.continue_in_background = true;
        ctx.config.auto_click_enabled = true;
        assert!(orchestrator.on_surface_teardown(&ctx, &sender));
        // Channel is full: the second request is dropped, not queued.
        assert!(!orchestrator.on_surface_teardown(&ctx, &sender));

        assert_eq!(
            receiver.recv().await,
            Some(HandoffRequest {
                capture_timestamp: Some(9)
            })
        );

        ctx.phase = AnalysisPhase::Complete;
        assert!(!orchestrator.on_surface_teardown(&ctx, &sender));
    }

    #[tokio::test]
    async fn superseded_run_leaves_newer_capture_untouched() {
        let store = Arc::new(MemoryStore::new());
        let gate = Arc::new(Notify::new());
        let stale = AnalysisOrchestrator::new(
            VisionModelClient::new(
                "m",
                GatedProvider {
                    text: "FINAL_ANSWER: A".into(),
                    gate: Arc::clone(&gate),
                },
            ),
            Arc::clone(&store),
        );
        let fresh = AnalysisOrchestrator::new(
            VisionModelClient::new("m", FixedProvider("unused".into())),
            Arc::clone(&store),
        );
        let dispatcher = CountingDispatcher::default();

        let mut config = config_with_key();
        config.auto_click_enabled = true;
        let mut stale_ctx = AnalysisContext::new(config.clone(), ExecutionSurface::Popup);
        let stale_capture = stale
            .capture(&mut stale_ctx, "data:image/png;base64,OLD")
            .await
            .unwrap();

        let mut fresh_ctx = AnalysisContext::new(config, ExecutionSurface::Popup);
        let (outcome, fresh_capture) = tokio::join!(
            stale.analyze(&mut stale_ctx, Some(&dispatcher)),
            async {
                // Capture timestamps have millisecond resolution.
                tokio::time::sleep(Duration::from_millis(5)).await;
                let record = fresh
                    .capture(&mut fresh_ctx, "data:image/png;base64,NEW")
                    .await
                    .unwrap();
                gate.notify_one();
                record
            }
        );

        let outcome = outcome.unwrap();
        assert!(outcome.superseded);
        assert!(!outcome.close_surface);
        assert!(outcome.activation.is_none());
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(stale_ctx.phase(), AnalysisPhase::Complete);
        assert!(stale_ctx.capture().is_none());

        let capture = stale.store().load_capture().await.unwrap().unwrap();
        assert_eq!(capture, fresh_capture);
        assert!(stale.store().load_result().await.unwrap().is_none());
        let state = stale.store().load_session_state().await.unwrap().unwrap();
        // The stale run never marked itself complete.
        assert_eq!(state.status, SessionStatus::Analyzing);
        assert_eq!(state.capture_timestamp, Some(stale_capture.capture_timestamp));
    }
}
