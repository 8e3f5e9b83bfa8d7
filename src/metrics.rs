//! Counters and latency accounting for analyses.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::types::AnswerMode;

/// Aggregated analysis metrics, split by answer mode where it matters.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisMetrics {
    pub multiple_choice_analyses: u64,
    pub multiple_choice_inference_time_ms: u64,

    pub essay_analyses: u64,
    pub essay_inference_time_ms: u64,

    pub total_analyses: u64,
    pub total_inference_time_ms: u64,

    /// Completed analyses whose text yielded no answer.
    pub parse_misses: u64,
    pub auto_answer_attempts: u64,
    pub auto_answer_successes: u64,
}

impl AnalysisMetrics {
    /// Merge the values from another metrics instance into this one.
    pub fn merge(&mut self, other: &AnalysisMetrics) {
        self.multiple_choice_analyses += other.multiple_choice_analyses;
        self.multiple_choice_inference_time_ms += other.multiple_choice_inference_time_ms;

        self.essay_analyses += other.essay_analyses;
        self.essay_inference_time_ms += other.essay_inference_time_ms;

        self.total_analyses += other.total_analyses;
        self.total_inference_time_ms += other.total_inference_time_ms;

        self.parse_misses += other.parse_misses;
        self.auto_answer_attempts += other.auto_answer_attempts;
        self.auto_answer_successes += other.auto_answer_successes;
    }

    /// Record one model call for `mode` and update cumulative totals.
    pub fn record_inference(&mut self, mode: AnswerMode, inference_time_ms: u64) {
        match mode {
            AnswerMode::MultipleChoice => {
                self.multiple_choice_analyses += 1;
                self.multiple_choice_inference_time_ms += inference_time_ms;
            }
            AnswerMode::Essay => {
                self.essay_analyses += 1;
                self.essay_inference_time_ms += inference_time_ms;
            }
        }

        self.total_analyses += 1;
        self.total_inference_time_ms += inference_time_ms;
    }

    pub fn record_parse_miss(&mut self) {
        self.parse_misses += 1;
    }

    pub fn record_auto_answer(&mut self, success: bool) {
        self.auto_answer_attempts += 1;
        if success {
            self.auto_answer_successes += 1;
        }
    }
}

/// Start an inference timer using [`Instant::now`].
pub fn start_inference_timer() -> Instant {
    Instant::now()
}

/// Return the elapsed milliseconds since the provided start instant.
pub fn get_inference_time_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn record_updates_totals() {
        let mut metrics = AnalysisMetrics::default();
        metrics.record_inference(AnswerMode::MultipleChoice, 100);
        metrics.record_inference(AnswerMode::MultipleChoice, 40);
        metrics.record_inference(AnswerMode::Essay, 20);
        metrics.record_parse_miss();

        assert_eq!(metrics.multiple_choice_analyses, 2);
        assert_eq!(metrics.multiple_choice_inference_time_ms, 140);
        assert_eq!(metrics.essay_inference_time_ms, 20);
        assert_eq!(metrics.total_analyses, 3);
        assert_eq!(metrics.total_inference_time_ms, 160);
        assert_eq!(metrics.parse_misses, 1);
    }

    #[test]
    fn merge_combines_two_instances() {
        let mut a = AnalysisMetrics::default();
        a.record_inference(AnswerMode::Essay, 50);
        a.record_auto_answer(true);

        let mut b = AnalysisMetrics::default();
        b.record_inference(AnswerMode::Essay, 20);
        b.record_auto_answer(false);

        a.merge(&b);
        assert_eq!(a.essay_analyses, 2);
        assert_eq!(a.essay_inference_time_ms, 70);
        assert_eq!(a.auto_answer_attempts, 2);
        assert_eq!(a.auto_answer_successes, 1);
    }

    #[test]
    fn timer_reports_elapsed_millis() {
        let start = start_inference_timer();
        std::thread::sleep(Duration::from_millis(10));
        assert!(get_inference_time_ms(start) >= 10);
    }
}
