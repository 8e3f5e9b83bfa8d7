//! Browser adapters implementing [`QuizSurface`](crate::page::QuizSurface).

pub mod chromiumoxide;

pub use self::chromiumoxide::{ChromiumConnection, ChromiumQuizSurface, ElementKind, PageElement};
