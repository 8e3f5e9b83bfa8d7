//! Resolution of one answer token against the options currently on the page.
//!
//! Strategies are tried in order and the first hit wins:
//! label prefix (`"B. cat"`), exact label text, partial label text, visible
//! position derived from the letter, and finally a bare numeric position.

use crate::types::{FailureReason, MatchOutcome, MatchStrategy, QuizOption};

/// Target letter (or full uppercased text) for a raw token.
///
/// `"b. receptionist"` becomes `"B"`; anything not starting with `A`..=`D`
/// is returned uppercased in full.
pub fn normalize_token(token: &str) -> String {
    let upper = token.trim().to_uppercase();
    match upper.chars().next() {
        Some(first @ 'A'..='D') => first.to_string(),
        _ => upper,
    }
}

/// Visible ordinal assumed for a letter when options carry no letter prefix.
pub fn position_for_letter(target: &str) -> Option<&'static str> {
    match target {
        "A" => Some("1"),
        "B" => Some("2"),
        "C" => Some("3"),
        "D" => Some("4"),
        _ => None,
    }
}

/// Letter announced at the start of a label such as `"C) fish"`.
fn label_letter(label: &str) -> Option<char> {
    let mut chars = label.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let separator = chars.next()?;
    let is_separator = matches!(separator, '.' | ':' | ')') || separator.is_whitespace();
    (matches!(letter, 'A'..='D') && is_separator).then_some(letter)
}

/// Resolve `token` to one of `options`.
pub fn match_option<'a, E>(token: &str, options: &'a [QuizOption<E>]) -> MatchOutcome<'a, E> {
    let token_upper = token.trim().to_uppercase();
    let target = normalize_token(token);
    let target_position = position_for_letter(&target);
    let target_letter = target.chars().next().filter(|_| target.chars().count() == 1);

    let matched = |option: &'a QuizOption<E>, strategy: MatchStrategy| MatchOutcome::Matched {
        option,
        strategy,
        target: target.clone(),
    };

    if let Some(letter) = target_letter {
        if let Some(option) = options
            .iter()
            .find(|option| label_letter(&option.label) == Some(letter))
        {
            return matched(option, MatchStrategy::LabelPrefix);
        }
    }

    if let Some(option) = options
        .iter()
        .find(|option| option.label_upper() == token_upper)
    {
        return matched(option, MatchStrategy::ExactText);
    }

    if token_upper.chars().count() > 2 {
        if let Some(option) = options.iter().find(|option| {
            let label = option.label_upper();
            !label.is_empty() && (label.contains(&token_upper) || token_upper.contains(&label))
        }) {
            return matched(option, MatchStrategy::PartialText);
        }
    }

    if let Some(position) = target_position {
        if let Some(option) = options.iter().find(|option| option.position == position) {
            return matched(option, MatchStrategy::Position);
        }
    }

    if !token_upper.is_empty() && token_upper.chars().all(|c| c.is_ascii_digit()) {
        if let Some(option) = options.iter().find(|option| option.position == token_upper) {
            return matched(option, MatchStrategy::DirectNumeric);
        }
    }

    MatchOutcome::Unmatched {
        token: token.trim().to_string(),
        reason: FailureReason::NoMatch,
    }
}
