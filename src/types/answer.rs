use std::fmt;

use serde::{Deserialize, Serialize};

/// Answering mode selected by the user; controls the prompt and the model's
/// generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AnswerMode {
    #[default]
    #[serde(rename = "tracNghiem", alias = "multipleChoice")]
    MultipleChoice,
    #[serde(rename = "tuLuan", alias = "essay")]
    Essay,
}

impl AnswerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerMode::MultipleChoice => "tracNghiem",
            AnswerMode::Essay => "tuLuan",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "tracNghiem" | "multipleChoice" | "multiple-choice" | "mcq" => {
                Some(AnswerMode::MultipleChoice)
            }
            "tuLuan" | "essay" => Some(AnswerMode::Essay),
            _ => None,
        }
    }
}

impl fmt::Display for AnswerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single extracted answer unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerToken {
    /// Letter answer (always uppercase `A`..=`D`) for question `question`.
    Letter { question: u64, letter: char },
    FreeText(String),
}

impl AnswerToken {
    pub fn as_text(&self) -> String {
        match self {
            AnswerToken::Letter { letter, .. } => letter.to_string(),
            AnswerToken::FreeText(text) => text.clone(),
        }
    }
}

/// Canonical answer string derived from model output: letters joined with
/// `", "` in question order, or a single free-text answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalAnswer(String);

impl FinalAnswer {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn from_tokens(tokens: &[AnswerToken]) -> Self {
        let joined = tokens
            .iter()
            .map(AnswerToken::as_text)
            .collect::<Vec<_>>()
            .join(", ");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Split the answer into the per-question tokens consumed by the option
    /// matcher (`"A, B"` -> `["A", "B"]`). Empty pieces are dropped.
    pub fn tokens(&self) -> Vec<&str> {
        self.0
            .split(',')
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .collect()
    }
}

impl fmt::Display for FinalAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FinalAnswer {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_serializes_with_storage_names() {
        let value = serde_json::to_value(AnswerMode::Essay).expect("serialize");
        assert_eq!(value, serde_json::json!("tuLuan"));

        let parsed: AnswerMode =
            serde_json::from_value(serde_json::json!("multipleChoice")).expect("alias");
        assert_eq!(parsed, AnswerMode::MultipleChoice);
    }

    #[test]
    fn final_answer_splits_into_tokens() {
        let answer = FinalAnswer::new("A, B ,, C");
        assert_eq!(answer.tokens(), vec!["A", "B", "C"]);
    }

    #[test]
    fn final_answer_joins_letter_tokens() {
        let tokens = vec![
            AnswerToken::Letter {
                question: 1,
                letter: 'A',
            },
            AnswerToken::Letter {
                question: 2,
                letter: 'D',
            },
        ];
        assert_eq!(FinalAnswer::from_tokens(&tokens).as_str(), "A, D");
    }
}
