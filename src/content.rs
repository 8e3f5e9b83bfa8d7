//! Message handler living on the quiz page.
//!
//! Replies to the selection, liveness and auto-answer messages sent by the
//! capture collaborator and the analysis surfaces.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};

use crate::logging::VisionLogger;
use crate::page::{InteractionDriver, QuizSurface};
use crate::types::{ActivationResult, PageMessage, PageResponse};

pub struct ContentScriptHandler<S: QuizSurface> {
    driver: InteractionDriver<S>,
    selecting: AtomicBool,
    logger: VisionLogger,
}

impl<S: QuizSurface> ContentScriptHandler<S> {
    pub fn new(driver: InteractionDriver<S>) -> Self {
        Self {
            driver,
            selecting: AtomicBool::new(false),
            logger: VisionLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: VisionLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn driver(&self) -> &InteractionDriver<S> {
        &self.driver
    }

    /// Whether a region selection is in progress.
    pub fn is_selecting(&self) -> bool {
        self.selecting.load(Ordering::SeqCst)
    }

    /// Abort the selection step (escape key). Returns whether a selection
    /// was active.
    pub fn cancel_selection(&self) -> bool {
        self.selecting.swap(false, Ordering::SeqCst)
    }

    pub async fn handle(&self, message: PageMessage) -> PageResponse {
        match message {
            PageMessage::StartSelection => {
                self.selecting.store(true, Ordering::SeqCst);
                PageResponse::ok()
            }
            PageMessage::CancelSelection => {
                self.cancel_selection();
                PageResponse::ok()
            }
            PageMessage::Ping => PageResponse::pong(),
            PageMessage::AutoClickAnswer(request) => {
                self.logger.debug(
                    format!("Auto-click requested: {}", request.answer),
                    Some("content"),
                    None,
                );
                let result = match self.driver.auto_answer(&request).await {
                    Ok(result) => result,
                    Err(err) => {
                        self.logger
                            .error(format!("Auto-click error: {err}"), Some("content"), None);
                        ActivationResult::errored(err.to_string())
                    }
                };
                PageResponse::Activation(result)
            }
        }
    }

    /// Handle a raw JSON message, replying with raw JSON.
    pub async fn handle_json(&self, message: Value) -> Value {
        let response = match serde_json::from_value::<PageMessage>(message) {
            Ok(message) => self.handle(message).await,
            Err(err) => {
                return json!({ "success": false, "error": err.to_string() });
            }
        };
        serde_json::to_value(&response)
            .unwrap_or_else(|err| json!({ "success": false, "error": err.to_string() }))
    }
}
