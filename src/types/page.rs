use std::fmt;

use serde::{Deserialize, Serialize};

/// A live interactive option on the quiz page paired with its visible label
/// and 1-based visible ordinal.
///
/// Options are enumerated fresh on every interaction attempt; the element
/// handle is only valid for the attempt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizOption<E> {
    pub element: E,
    pub label: String,
    /// Visible position marker as rendered by the page (`"1"`, `"2"`, ...).
    pub position: String,
    /// Enumeration index (0-based).
    pub index: usize,
}

impl<E> QuizOption<E> {
    /// Build an option, defaulting a missing position to `index + 1`.
    pub fn new(element: E, label: impl Into<String>, position: Option<String>, index: usize) -> Self {
        let position = position
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| (index + 1).to_string());
        Self {
            element,
            label: label.into().trim().to_string(),
            position,
            index,
        }
    }

    pub fn label_upper(&self) -> String {
        self.label.to_uppercase()
    }
}

/// Strategy that resolved an answer token to an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    LabelPrefix,
    ExactText,
    PartialText,
    Position,
    DirectNumeric,
}

impl MatchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategy::LabelPrefix => "label_prefix",
            MatchStrategy::ExactText => "exact_text",
            MatchStrategy::PartialText => "partial_text",
            MatchStrategy::Position => "position",
            MatchStrategy::DirectNumeric => "direct_numeric",
        }
    }
}

/// Result of resolving one answer token against the enumerated options.
#[derive(Debug, PartialEq)]
pub enum MatchOutcome<'a, E> {
    Matched {
        option: &'a QuizOption<E>,
        strategy: MatchStrategy,
        /// Normalised target letter/text used for reporting.
        target: String,
    },
    Unmatched {
        token: String,
        reason: FailureReason,
    },
}

impl<E> MatchOutcome<'_, E> {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }

    pub fn strategy(&self) -> Option<MatchStrategy> {
        match self {
            MatchOutcome::Matched { strategy, .. } => Some(*strategy),
            MatchOutcome::Unmatched { .. } => None,
        }
    }
}

/// Machine-readable reason attached to unsuccessful activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NotQuizizzPage,
    NoMatch,
    NoSubmitButton,
    NoOptionsFound,
    RestrictedPage,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::NotQuizizzPage => "not_quizizz_page",
            FailureReason::NoMatch => "no_match",
            FailureReason::NoSubmitButton => "no_submit_button",
            FailureReason::NoOptionsFound => "no_options_found",
            FailureReason::RestrictedPage => "restricted_page",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an activation was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Click,
    TextInput,
    TextInputPending,
}

/// Structured outcome reported by the interaction driver.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivationResult {
    pub success: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ActivationKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clicked: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActivationResult {
    pub fn failure(reason: FailureReason) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn clicked(letters: impl Into<String>) -> Self {
        Self {
            success: true,
            kind: Some(ActivationKind::Click),
            clicked: Some(letters.into()),
            ..Default::default()
        }
    }

    pub fn answered(preview: impl Into<String>, pending: bool) -> Self {
        Self {
            success: true,
            kind: Some(if pending {
                ActivationKind::TextInputPending
            } else {
                ActivationKind::TextInput
            }),
            answered: Some(preview.into()),
            pending,
            ..Default::default()
        }
    }
}

/// Request to auto-answer the question currently displayed on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoClickRequest {
    pub answer: String,
    #[serde(default = "default_delay_ms")]
    pub delay: u64,
    #[serde(default = "default_show_notification")]
    pub show_notification: bool,
}

fn default_delay_ms() -> u64 {
    300
}

fn default_show_notification() -> bool {
    true
}

/// Messages accepted by the page messaging surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PageMessage {
    StartSelection,
    CancelSelection,
    Ping,
    AutoClickAnswer(AutoClickRequest),
}

/// Replies produced by the page messaging surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageResponse {
    Pong { status: String },
    Activation(ActivationResult),
}

impl PageResponse {
    pub fn pong() -> Self {
        PageResponse::Pong {
            status: "pong".to_string(),
        }
    }

    pub fn ok() -> Self {
        PageResponse::Activation(ActivationResult {
            success: true,
            ..Default::default()
        })
    }
}
