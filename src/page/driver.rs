//! Executes matched answers against a [`QuizSurface`].
//!
//! Every activation waits `base ± 100 ms` first. The jitter is part of the
//! behaviour the quiz platform sees and must not be replaced by a fixed
//! delay.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::time::sleep;

use crate::logging::VisionLogger;
use crate::types::{ActivationResult, AutoClickRequest, FailureReason, FinalAnswer, MatchOutcome};

use super::{QuizSurface, SurfaceError, is_supported_host, match_option};

/// Lower bound for the pre-click delay.
pub const CLICK_DELAY_FLOOR_MS: u64 = 100;
/// Lower bound for the pre-fill delay.
pub const TEXT_DELAY_FLOOR_MS: u64 = 0;
const JITTER_MS: i64 = 100;
/// Settle time between the last option click and the multi-select submit.
pub const MULTI_SELECT_SETTLE: Duration = Duration::from_millis(300);
/// Settle time between filling a text input and looking for submit.
pub const TEXT_SETTLE: Duration = Duration::from_millis(200);
/// Wait before the single retry on a disabled submit control.
pub const SUBMIT_RETRY_WAIT: Duration = Duration::from_millis(500);
const ANSWER_PREVIEW_CHARS: usize = 30;

/// `base + uniform(-100, +100)` clamped to `floor`.
pub fn humanized_delay<R: Rng + ?Sized>(base_ms: u64, floor_ms: u64, rng: &mut R) -> Duration {
    let jitter = rng.gen_range(-JITTER_MS..=JITTER_MS);
    let base = i64::try_from(base_ms).unwrap_or(i64::MAX);
    let delayed = base.saturating_add(jitter).max(0);
    let millis = u64::try_from(delayed).unwrap_or(0).max(floor_ms);
    Duration::from_millis(millis)
}

/// Drives clicks and text entry on one page.
pub struct InteractionDriver<S: QuizSurface> {
    surface: S,
    rng: Mutex<StdRng>,
    logger: VisionLogger,
}

impl<S: QuizSurface> InteractionDriver<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            rng: Mutex::new(StdRng::from_entropy()),
            logger: VisionLogger::default(),
        }
    }

    /// Deterministic jitter, for tests and replays.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_logger(mut self, logger: VisionLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    fn next_delay(&self, base_ms: u64, floor_ms: u64) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        humanized_delay(base_ms, floor_ms, &mut *rng)
    }

    /// Click a matched option after the humanized delay.
    pub async fn activate(
        &self,
        outcome: &MatchOutcome<'_, S::Element>,
        base_delay_ms: u64,
    ) -> Result<ActivationResult, SurfaceError> {
        match outcome {
            MatchOutcome::Matched {
                option,
                strategy,
                target,
            } => {
                sleep(self.next_delay(base_delay_ms, CLICK_DELAY_FLOOR_MS)).await;
                self.surface.activate(&option.element).await?;
                self.logger.debug(
                    format!("Clicked option {}", preview(&option.label)),
                    Some("driver"),
                    Some(json!({ "target": target, "strategy": strategy.as_str() })),
                );
                Ok(ActivationResult::clicked(target.clone()))
            }
            MatchOutcome::Unmatched { token, reason } => {
                self.logger.debug(
                    format!("No match found for: {token}"),
                    Some("driver"),
                    None,
                );
                Ok(ActivationResult::failure(*reason))
            }
        }
    }

    /// Fill a free-text input and submit it.
    pub async fn fill_text(
        &self,
        element: &S::Element,
        answer: &str,
        base_delay_ms: u64,
        show_notification: bool,
    ) -> Result<ActivationResult, SurfaceError> {
        sleep(self.next_delay(base_delay_ms, TEXT_DELAY_FLOOR_MS)).await;
        self.surface.set_value(element, answer).await?;
        self.surface.emit_change_signals(element).await?;
        self.logger
            .debug(format!("Text filled: {}", preview(answer)), Some("driver"), None);

        sleep(TEXT_SETTLE).await;

        let Some(submit) = self.surface.find_submit().await? else {
            self.logger
                .info("Submit button not found", Some("driver"), None);
            return Ok(ActivationResult::failure(FailureReason::NoSubmitButton));
        };

        let mut pending = self.surface.is_disabled(&submit).await?;
        if pending {
            sleep(SUBMIT_RETRY_WAIT).await;
            pending = self.surface.is_disabled(&submit).await?;
        }

        if pending {
            self.notify(show_notification, "📝 Đã nhập (chờ nộp)").await;
        } else {
            self.surface.activate(&submit).await?;
            self.notify(show_notification, "📝 Đã nhập").await;
        }
        Ok(ActivationResult::answered(preview(answer), pending))
    }

    /// Answer the question currently shown on the page.
    ///
    /// Option buttons take priority over text inputs. A page outside the
    /// supported platform is rejected before any element is queried.
    pub async fn auto_answer(
        &self,
        request: &AutoClickRequest,
    ) -> Result<ActivationResult, SurfaceError> {
        let hostname = self.surface.hostname().await?;
        if !is_supported_host(&hostname) {
            self.logger.info(
                format!("Not a supported quiz page ({hostname}), skipping"),
                Some("driver"),
                None,
            );
            return Ok(ActivationResult::failure(FailureReason::NotQuizizzPage));
        }

        let options = self.surface.enumerate_options().await?;
        if !options.is_empty() {
            let multi_select = self.surface.is_multi_select().await?;
            let answer = FinalAnswer::new(request.answer.as_str());
            let mut clicked = Vec::new();

            for token in answer.tokens() {
                let outcome = match_option(token, &options);
                let result = self.activate(&outcome, request.delay).await?;
                if let Some(target) = result.clicked {
                    clicked.push(target);
                }
            }

            if clicked.is_empty() {
                return Ok(ActivationResult::failure(FailureReason::NoMatch));
            }

            if multi_select {
                sleep(MULTI_SELECT_SETTLE).await;
                if let Some(submit) = self.surface.find_submit().await? {
                    if !self.surface.is_disabled(&submit).await? {
                        self.surface.activate(&submit).await?;
                        self.logger
                            .debug("Multi-select submitted", Some("driver"), None);
                    }
                }
            }

            let joined = clicked.join(", ");
            self.notify(request.show_notification, &format!("Đã chọn: {joined}"))
                .await;
            self.logger.info(
                "Auto-click complete",
                Some("driver"),
                Some(json!({ "clicked": joined, "multiSelect": multi_select })),
            );
            return Ok(ActivationResult::clicked(joined));
        }

        if let Some(input) = self.surface.enumerate_text_surfaces().await?.first() {
            return self
                .fill_text(
                    input,
                    &request.answer,
                    request.delay,
                    request.show_notification,
                )
                .await;
        }

        self.logger
            .info("No option buttons or text input found", Some("driver"), None);
        Ok(ActivationResult::failure(FailureReason::NoOptionsFound))
    }

    async fn notify(&self, enabled: bool, message: &str) {
        if !enabled {
            return;
        }
        if let Err(err) = self.surface.notify(message).await {
            self.logger.debug(
                format!("Notification failed: {err}"),
                Some("driver"),
                None,
            );
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(ANSWER_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use crate::types::{ActivationKind, QuizOption};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Node {
        Option(usize),
        Text(usize),
        Submit,
    }

    #[derive(Default)]
    struct FakePage {
        hostname: String,
        labels: Vec<&'static str>,
        text_inputs: usize,
        multi_select: bool,
        submit: bool,
        /// Number of `is_disabled` checks that report disabled.
        disabled_checks: Mutex<u32>,
        log: Mutex<Vec<(Node, Instant)>>,
        values: Mutex<Vec<String>>,
        notifications: Mutex<Vec<String>>,
    }

    impl FakePage {
        fn quiz(labels: &[&'static str]) -> Self {
            Self {
                hostname: "quizizz.com".into(),
                labels: labels.to_vec(),
                submit: true,
                ..Default::default()
            }
        }

        fn clicks(&self) -> Vec<Node> {
            self.log.lock().unwrap().iter().map(|(node, _)| *node).collect()
        }
    }

    #[async_trait]
    impl QuizSurface for FakePage {
        type Element = Node;

        async fn hostname(&self) -> Result<String, SurfaceError> {
            Ok(self.hostname.clone())
        }

        async fn enumerate_options(&self) -> Result<Vec<QuizOption<Node>>, SurfaceError> {
            Ok(self
                .labels
                .iter()
                .enumerate()
                .map(|(i, label)| QuizOption::new(Node::Option(i), *label, None, i))
                .collect())
        }

        async fn enumerate_text_surfaces(&self) -> Result<Vec<Node>, SurfaceError> {
            Ok((0..self.text_inputs).map(Node::Text).collect())
        }

        async fn is_multi_select(&self) -> Result<bool, SurfaceError> {
            Ok(self.multi_select)
        }

        async fn find_submit(&self) -> Result<Option<Node>, SurfaceError> {
            Ok(self.submit.then_some(Node::Submit))
        }

        async fn is_disabled(&self, _element: &Node) -> Result<bool, SurfaceError> {
            let mut remaining = self.disabled_checks.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn activate(&self, element: &Node) -> Result<(), SurfaceError> {
            self.log.lock().unwrap().push((*element, Instant::now()));
            Ok(())
        }

        async fn set_value(&self, _element: &Node, text: &str) -> Result<(), SurfaceError> {
            self.values.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn emit_change_signals(&self, _element: &Node) -> Result<(), SurfaceError> {
            Ok(())
        }

        async fn notify(&self, message: &str) -> Result<(), SurfaceError> {
            self.notifications.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn request(answer: &str) -> AutoClickRequest {
        AutoClickRequest {
            answer: answer.into(),
            delay: 300,
            show_notification: true,
        }
    }

    #[test]
    fn delay_stays_within_jitter_band() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let delay = humanized_delay(300, CLICK_DELAY_FLOOR_MS, &mut rng);
            assert!(delay >= Duration::from_millis(200) && delay <= Duration::from_millis(400));
        }
    }

    #[test]
    fn delay_respects_floor() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1_000 {
            assert!(humanized_delay(0, CLICK_DELAY_FLOOR_MS, &mut rng) >= Duration::from_millis(100));
            assert!(humanized_delay(50, TEXT_DELAY_FLOOR_MS, &mut rng) <= Duration::from_millis(150));
        }
    }

    #[test]
    fn delay_is_jittered_not_constant() {
        let mut rng = StdRng::seed_from_u64(11);
        let samples: std::collections::HashSet<_> = (0..50)
            .map(|_| humanized_delay(300, CLICK_DELAY_FLOOR_MS, &mut rng))
            .collect();
        assert!(samples.len() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_unsupported_host_before_querying() {
        let page = FakePage {
            hostname: "example.com".into(),
            labels: vec!["A. x"],
            ..Default::default()
        };
        let driver = InteractionDriver::new(page).with_seed(1);
        let result = driver.auto_answer(&request("A")).await.unwrap();
        assert_eq!(result.reason, Some(FailureReason::NotQuizizzPage));
        assert!(driver.surface().clicks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn click_waits_humanized_delay() {
        let driver = InteractionDriver::new(FakePage::quiz(&["A. x", "B. y"])).with_seed(5);
        let started = Instant::now();
        let result = driver.auto_answer(&request("B")).await.unwrap();

        assert!(result.success);
        assert_eq!(result.clicked.as_deref(), Some("B"));
        let log = driver.surface().log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, Node::Option(1));
        let waited = log[0].1 - started;
        assert!(waited >= Duration::from_millis(200) && waited <= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn multi_select_submits_once_after_all_tokens() {
        let mut page = FakePage::quiz(&["A. one", "B. two", "C. three"]);
        page.multi_select = true;
        let driver = InteractionDriver::new(page).with_seed(9);

        let result = driver.auto_answer(&request("A, B")).await.unwrap();

        assert_eq!(result.clicked.as_deref(), Some("A, B"));
        assert_eq!(
            driver.surface().clicks(),
            vec![Node::Option(0), Node::Option(1), Node::Submit]
        );
        let log = driver.surface().log.lock().unwrap();
        assert!(log[2].1 - log[1].1 >= MULTI_SELECT_SETTLE);
        assert_eq!(
            driver.surface().notifications.lock().unwrap().as_slice(),
            ["Đã chọn: A, B"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn single_select_never_submits() {
        let driver = InteractionDriver::new(FakePage::quiz(&["A. one", "B. two"])).with_seed(2);
        driver.auto_answer(&request("A")).await.unwrap();
        assert_eq!(driver.surface().clicks(), vec![Node::Option(0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn multi_select_skips_disabled_submit() {
        let mut page = FakePage::quiz(&["A. one", "B. two"]);
        page.multi_select = true;
        page.disabled_checks = Mutex::new(1);
        let driver = InteractionDriver::new(page).with_seed(2);
        let result = driver.auto_answer(&request("B")).await.unwrap();
        assert!(result.success);
        assert_eq!(driver.surface().clicks(), vec![Node::Option(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn unmatched_tokens_report_no_match() {
        let mut page = FakePage::quiz(&["A. one", "B. two"]);
        page.multi_select = true;
        let driver = InteractionDriver::new(page).with_seed(4);
        let result = driver.auto_answer(&request("D")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.reason, Some(FailureReason::NoMatch));
        assert!(driver.surface().clicks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn text_input_submits_when_enabled() {
        let page = FakePage {
            hostname: "wayground.com".into(),
            text_inputs: 1,
            submit: true,
            ..Default::default()
        };
        let driver = InteractionDriver::new(page).with_seed(8);
        let answer = "Quang hợp là quá trình tổng hợp chất hữu cơ từ ánh sáng";
        let result = driver.auto_answer(&request(answer)).await.unwrap();

        assert!(result.success);
        assert_eq!(result.kind, Some(ActivationKind::TextInput));
        assert_eq!(result.answered.as_deref().map(|s| s.chars().count()), Some(30));
        assert_eq!(driver.surface().values.lock().unwrap().as_slice(), [answer]);
        assert_eq!(driver.surface().clicks(), vec![Node::Submit]);
        assert_eq!(
            driver.surface().notifications.lock().unwrap().as_slice(),
            ["📝 Đã nhập"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn text_input_retries_disabled_submit_once() {
        let page = FakePage {
            hostname: "quizizz.com".into(),
            text_inputs: 1,
            submit: true,
            disabled_checks: Mutex::new(1),
            ..Default::default()
        };
        let driver = InteractionDriver::new(page).with_seed(8);
        let result = driver.auto_answer(&request("42")).await.unwrap();
        assert_eq!(result.kind, Some(ActivationKind::TextInput));
        assert!(!result.pending);
        assert_eq!(driver.surface().clicks(), vec![Node::Submit]);
    }

    #[tokio::test(start_paused = true)]
    async fn text_input_pending_when_submit_stays_disabled() {
        let page = FakePage {
            hostname: "quizizz.com".into(),
            text_inputs: 1,
            submit: true,
            disabled_checks: Mutex::new(2),
            ..Default::default()
        };
        let driver = InteractionDriver::new(page).with_seed(8);
        let result = driver.auto_answer(&request("42")).await.unwrap();
        assert!(result.success);
        assert!(result.pending);
        assert_eq!(result.kind, Some(ActivationKind::TextInputPending));
        assert!(driver.surface().clicks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn text_input_without_submit_fails() {
        let page = FakePage {
            hostname: "quizizz.com".into(),
            text_inputs: 1,
            ..Default::default()
        };
        let driver = InteractionDriver::new(page).with_seed(8);
        let result = driver.auto_answer(&request("42")).await.unwrap();
        assert_eq!(result.reason, Some(FailureReason::NoSubmitButton));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_page_reports_no_options() {
        let page = FakePage {
            hostname: "quizizz.com".into(),
            ..Default::default()
        };
        let driver = InteractionDriver::new(page).with_seed(8);
        let result = driver.auto_answer(&request("A")).await.unwrap();
        assert_eq!(result.reason, Some(FailureReason::NoOptionsFound));
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_can_be_disabled() {
        let driver = InteractionDriver::new(FakePage::quiz(&["A. one"])).with_seed(8);
        let mut req = request("A");
        req.show_notification = false;
        driver.auto_answer(&req).await.unwrap();
        assert!(driver.surface().notifications.lock().unwrap().is_empty());
    }
}
