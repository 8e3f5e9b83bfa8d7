//! Answer extraction from free-form vision model output.
//!
//! Strategies run in a fixed order and the first one that produces an answer
//! wins. The letter-list strategies search the `ĐÁP ÁN:` section first and the
//! whole response second. A response with no recognisable answer yields
//! `None`, which is an expected outcome rather than an error.
//!
//! The line shapes recognised here are the ones requested by
//! [`crate::llm::prompts::build_prompt`]; both sides must change together.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{AnswerToken, FinalAnswer};

static ANSWER_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:đáp|dap)\s*(?:án|an)\s*:?\s*").expect("answer header pattern")
});

static QUESTION_LETTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:câu|cau)\s*(\d+)\s*[:.)]\s*\**([a-d])\b")
        .expect("question letter pattern")
});

static NUMBERED_LETTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(\d+)[ \t]*[:.)][ \t]*([a-d])[ \t]*$")
        .expect("numbered letter pattern")
});

static FINAL_SINGLE_LETTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)FINAL_ANSWERS?:[ \t]*([a-d])[ \t]*(?:\n|$)")
        .expect("final answer letter pattern")
});

static FINAL_FREE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\*{0,2}FINAL_ANSWERS?\*{0,2}:?\*{0,2}\s*(.+?)(?:\n[ \t]*\n|$)")
        .expect("final answer text pattern")
});

static ANSWER_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:đáp|dap)\s*(?:án|an)[:\s]+([a-d])\b").expect("answer phrase pattern")
});

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("blank line pattern"));

/// Strategy that produced a parsed answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// `Câu N: X` lines.
    QuestionList,
    /// `N. X` lines.
    NumberedList,
    /// `FINAL_ANSWER: X`
    FinalLetter,
    /// `FINAL_ANSWER: <text>`
    FinalText,
    /// `Đáp án: X`
    AnswerPhrase,
}

impl ParseStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseStrategy::QuestionList => "question_list",
            ParseStrategy::NumberedList => "numbered_list",
            ParseStrategy::FinalLetter => "final_letter",
            ParseStrategy::FinalText => "final_text",
            ParseStrategy::AnswerPhrase => "answer_phrase",
        }
    }
}

/// Detailed parse result for callers that need more than the joined string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnswer {
    pub answer: FinalAnswer,
    pub tokens: Vec<AnswerToken>,
    pub strategy: ParseStrategy,
}

/// Extract the final answer from raw model text.
pub fn parse(text: &str) -> Option<FinalAnswer> {
    parse_detailed(text).map(|parsed| parsed.answer)
}

/// Like [`parse`] but also reports the tokens and the winning strategy.
pub fn parse_detailed(text: &str) -> Option<ParsedAnswer> {
    let text = text.replace("\r\n", "\n");
    let section = answer_section(&text);
    let scopes: Vec<&str> = section.into_iter().chain([text.as_str()]).collect();

    for (pattern, strategy) in [
        (&*QUESTION_LETTER, ParseStrategy::QuestionList),
        (&*NUMBERED_LETTER, ParseStrategy::NumberedList),
    ] {
        for scope in &scopes {
            let tokens = collect_ordered_letters(pattern, scope);
            if !tokens.is_empty() {
                return Some(ParsedAnswer {
                    answer: FinalAnswer::from_tokens(&tokens),
                    tokens,
                    strategy,
                });
            }
        }
    }

    if let Some(letter) = first_letter(&FINAL_SINGLE_LETTER, &text) {
        return Some(single_letter(letter, ParseStrategy::FinalLetter));
    }

    if let Some(answer) = final_free_text(&text) {
        return Some(ParsedAnswer {
            answer: FinalAnswer::new(answer.clone()),
            tokens: vec![AnswerToken::FreeText(answer)],
            strategy: ParseStrategy::FinalText,
        });
    }

    first_letter(&ANSWER_PHRASE, &text)
        .map(|letter| single_letter(letter, ParseStrategy::AnswerPhrase))
}

/// Text after the answer header up to the next blank line or end of text.
fn answer_section(text: &str) -> Option<&str> {
    let header = ANSWER_HEADER.find(text)?;
    let rest = &text[header.end()..];
    let end = BLANK_LINE.find(rest).map_or(rest.len(), |blank| blank.start());
    Some(&rest[..end])
}

/// All `(number, letter)` pairs in `scope`, ordered by question number.
fn collect_ordered_letters(pattern: &Regex, scope: &str) -> Vec<AnswerToken> {
    let mut pairs: Vec<(u64, char)> = pattern
        .captures_iter(scope)
        .filter_map(|caps| {
            let question = caps.get(1)?.as_str().parse::<u64>().ok()?;
            let letter = caps.get(2)?.as_str().chars().next()?.to_ascii_uppercase();
            Some((question, letter))
        })
        .collect();
    pairs.sort_by_key(|(question, _)| *question);
    pairs
        .into_iter()
        .map(|(question, letter)| AnswerToken::Letter { question, letter })
        .collect()
}

fn first_letter(pattern: &Regex, text: &str) -> Option<char> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().chars().next())
        .map(|letter| letter.to_ascii_uppercase())
}

fn single_letter(letter: char, strategy: ParseStrategy) -> ParsedAnswer {
    let tokens = vec![AnswerToken::Letter {
        question: 1,
        letter,
    }];
    ParsedAnswer {
        answer: FinalAnswer::from_tokens(&tokens),
        tokens,
        strategy,
    }
}

fn final_free_text(text: &str) -> Option<String> {
    let captured = FINAL_FREE_TEXT.captures(text)?.get(1)?.as_str();
    let cleaned = captured.trim().trim_matches('*').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
