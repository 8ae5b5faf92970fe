//! Feature extraction from a bounded window of quiz telemetry.
//!
//! The [`FeatureExtractor`] turns the most recent attempts and sessions of one
//! user into a fixed [`FeatureVector`]. Every output is a pure function of the
//! window, and every ratio is rounded to 3 decimal places (millisecond fields
//! to integers) so repeated runs over the same snapshot are bit-identical.
//!
//! ## Window
//!
//! ```text
//! attempts (most recent first, ≤ max_attempts)  ─┐
//!                                                 ├─► FeatureVector
//! sessions (most recent first, ≤ max_sessions)  ─┘
//! ```
//!
//! Fewer than `min_attempts` attempts yields [`CadenceError::InsufficientData`].
//! Timing-derived signals additionally need `min_attempts_for_timing_signals`
//! attempts and read as zero below that.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::error::{CadenceError, Result};
use crate::numeric::{mean, population_std_dev, population_variance, ratio, round3, round_ms};
use crate::types::{QuestionAttempt, SessionLog, TopicId};

/// Correct/total counts for one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicAccuracy {
    pub correct: u32,
    pub total: u32,
}

impl TopicAccuracy {
    /// Accuracy in `0.0..=1.0`, 0 for an empty topic.
    pub fn accuracy(&self) -> f64 {
        ratio(f64::from(self.correct), f64::from(self.total))
    }

    fn record(&mut self, is_correct: bool) {
        self.total += 1;
        if is_correct {
            self.correct += 1;
        }
    }
}

/// Behavioral features for one user, derived from one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub avg_response_time_ms: u64,
    /// Population variance of response times (ms²), rounded to an integer.
    pub response_time_variance: u64,
    pub retry_ratio: f64,
    pub error_frequency: f64,
    pub hint_usage_rate: f64,
    pub abandonment_rate: f64,
    pub overall_accuracy: f64,
    pub session_improvement_rate: f64,
    /// Standard deviation of per-session accuracy. Lower is more consistent.
    pub consistency_index: f64,
    pub topic_accuracy: BTreeMap<TopicId, TopicAccuracy>,
    pub weak_topics: Vec<TopicId>,
    pub weak_topic_count: usize,
    /// Raw count of response times above twice the window mean.
    pub hesitation_burst_count: u32,
    pub total_attempts: usize,
    pub total_sessions: usize,
}

/// Computes [`FeatureVector`]s.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: AnalysisConfig,
}

impl FeatureExtractor {
    /// Create a new extractor with the given configuration.
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// The configuration in effect.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Truncate inputs to the configured window sizes.
    pub fn window<'a>(
        &self,
        attempts: &'a [QuestionAttempt],
        sessions: &'a [SessionLog],
    ) -> (&'a [QuestionAttempt], &'a [SessionLog]) {
        let attempts = &attempts[..attempts.len().min(self.config.max_attempts)];
        let sessions = &sessions[..sessions.len().min(self.config.max_sessions)];
        (attempts, sessions)
    }

    /// Extract features from attempts and sessions, both most recent first.
    pub fn extract(
        &self,
        attempts: &[QuestionAttempt],
        sessions: &[SessionLog],
    ) -> Result<FeatureVector> {
        let (attempts, sessions) = self.window(attempts, sessions);

        if attempts.len() < self.config.min_attempts {
            return Err(CadenceError::InsufficientData {
                available: attempts.len(),
                required: self.config.min_attempts,
            });
        }

        let n = attempts.len() as f64;
        let samples = response_samples(attempts);
        let avg_response = mean(&samples);
        let variance = population_variance(&samples);

        let correct = attempts.iter().filter(|a| a.is_correct).count() as f64;
        let retries: f64 = attempts
            .iter()
            .map(|a| f64::from(a.number_of_retries))
            .sum();
        let hints = attempts.iter().filter(|a| a.hint_used).count() as f64;
        let abandoned = attempts.iter().filter(|a| a.abandonment_flag).count() as f64;

        let topic_accuracy = topic_accuracy(attempts);
        let weak_topics: Vec<TopicId> = topic_accuracy
            .iter()
            .filter(|(_, t)| t.total > 0 && t.accuracy() < self.config.weak_topic_threshold)
            .map(|(id, _)| id.clone())
            .collect();

        let session_accuracies = session_accuracies(sessions);

        let hesitation_burst_count = if attempts.len() >= self.config.min_attempts_for_timing_signals
        {
            hesitation_bursts(&samples, avg_response)
        } else {
            0
        };

        Ok(FeatureVector {
            avg_response_time_ms: round_ms(avg_response),
            response_time_variance: round_ms(variance),
            retry_ratio: round3(retries / n),
            error_frequency: round3((n - correct) / n),
            hint_usage_rate: round3(hints / n),
            abandonment_rate: round3(abandoned / n),
            overall_accuracy: round3(correct / n),
            session_improvement_rate: round3(improvement_rate(&session_accuracies)),
            consistency_index: round3(population_std_dev(&session_accuracies)),
            weak_topic_count: weak_topics.len(),
            topic_accuracy,
            weak_topics,
            hesitation_burst_count,
            total_attempts: attempts.len(),
            total_sessions: sessions.len(),
        })
    }
}

/// Response times usable as timing samples, in window order.
pub(crate) fn response_samples(attempts: &[QuestionAttempt]) -> Vec<f64> {
    attempts
        .iter()
        .filter_map(QuestionAttempt::timing_sample)
        .map(|ms| ms as f64)
        .collect()
}

/// Number of samples strictly above twice the mean.
pub(crate) fn hesitation_bursts(samples: &[f64], avg: f64) -> u32 {
    samples.iter().filter(|t| **t > avg * 2.0).count() as u32
}

fn topic_accuracy(attempts: &[QuestionAttempt]) -> BTreeMap<TopicId, TopicAccuracy> {
    let mut topics: BTreeMap<TopicId, TopicAccuracy> = BTreeMap::new();
    for attempt in attempts {
        topics
            .entry(attempt.topic_id.clone())
            .or_default()
            .record(attempt.is_correct);
    }
    topics
}

/// Per-session accuracy of sessions with at least one attempt, recency order kept.
fn session_accuracies(sessions: &[SessionLog]) -> Vec<f64> {
    sessions.iter().filter_map(SessionLog::accuracy).collect()
}

/// Mean accuracy of the recent half minus the older half.
///
/// The recent half takes `ceil(n / 2)` sessions, so an odd count gives the
/// extra session to it. Zero when either half is empty.
fn improvement_rate(accuracies: &[f64]) -> f64 {
    if accuracies.len() < 2 {
        return 0.0;
    }
    let half = accuracies.len().div_ceil(2);
    let (recent, older) = accuracies.split_at(half);
    mean(recent) - mean(older)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 10, 0, 0).unwrap()
    }

    fn attempt(topic: &str, correct: bool, retries: u32, ms: u64) -> QuestionAttempt {
        QuestionAttempt::new("user-1", "s-1", topic, correct, base())
            .with_retries(retries)
            .with_response_time(ms)
    }

    fn session(id: &str, attempted: u32, correct: u32, minutes_ago: i64) -> SessionLog {
        let mut s = SessionLog::start(id, "user-1", "algebra", base() - Duration::minutes(minutes_ago));
        s.finish(attempted, correct, 0, base());
        s
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(AnalysisConfig::default())
    }

    #[test]
    fn below_minimum_is_insufficient_data() {
        let attempts = vec![attempt("a", true, 0, 1000), attempt("a", true, 0, 1000)];
        let err = extractor().extract(&attempts, &[]).unwrap_err();
        assert!(matches!(
            err,
            CadenceError::InsufficientData {
                available: 2,
                required: 3
            }
        ));
    }

    #[test]
    fn ratio_scenario() {
        let attempts = vec![
            attempt("a", true, 0, 1000),
            attempt("a", true, 0, 1000),
            attempt("a", false, 1, 1000),
            attempt("a", true, 0, 1000),
            attempt("a", false, 2, 1000),
        ];
        let features = extractor().extract(&attempts, &[]).unwrap();

        assert_eq!(features.overall_accuracy, 0.6);
        assert_eq!(features.retry_ratio, 0.6);
        assert_eq!(features.error_frequency, 0.4);
        assert_eq!(features.total_attempts, 5);
    }

    #[test]
    fn timing_statistics_use_population_variance() {
        let attempts = vec![
            attempt("a", true, 0, 1000),
            attempt("a", true, 0, 2000),
            attempt("a", true, 0, 3000),
        ];
        let features = extractor().extract(&attempts, &[]).unwrap();

        assert_eq!(features.avg_response_time_ms, 2000);
        // ((1000² + 0 + 1000²) / 3) = 666_666.67
        assert_eq!(features.response_time_variance, 666_667);
    }

    #[test]
    fn missing_timings_are_skipped() {
        let attempts = vec![
            attempt("a", true, 0, 1000),
            QuestionAttempt::new("user-1", "s-1", "a", true, base()),
            attempt("a", true, 0, 3000),
        ];
        let features = extractor().extract(&attempts, &[]).unwrap();
        assert_eq!(features.avg_response_time_ms, 2000);
    }

    #[test]
    fn hint_and_abandonment_rates() {
        let attempts = vec![
            attempt("a", true, 0, 1000).with_hint(),
            attempt("a", true, 0, 1000),
            attempt("a", true, 0, 1000).abandoned(),
            attempt("a", true, 0, 1000),
        ];
        let features = extractor().extract(&attempts, &[]).unwrap();
        assert_eq!(features.hint_usage_rate, 0.25);
        assert_eq!(features.abandonment_rate, 0.25);
        assert_eq!(features.overall_accuracy, 0.75);
    }

    #[test]
    fn weak_topics_are_strictly_below_threshold() {
        let attempts = vec![
            attempt("algebra", true, 0, 1000),
            attempt("algebra", false, 0, 1000),
            attempt("geometry", false, 0, 1000),
            attempt("geometry", false, 0, 1000),
            attempt("geometry", true, 0, 1000),
        ];
        let features = extractor().extract(&attempts, &[]).unwrap();

        assert_eq!(
            features.topic_accuracy[&TopicId::from("algebra")],
            TopicAccuracy {
                correct: 1,
                total: 2
            }
        );
        // algebra sits exactly at 0.5 and is not weak
        assert_eq!(features.weak_topics, vec![TopicId::from("geometry")]);
        assert_eq!(features.weak_topic_count, 1);
    }

    #[test]
    fn improvement_rate_scenario() {
        let attempts = vec![attempt("a", true, 0, 1000); 3];
        let sessions = vec![session("recent", 10, 9, 10), session("older", 10, 5, 100)];
        let features = extractor().extract(&attempts, &sessions).unwrap();

        assert_eq!(features.session_improvement_rate, 0.4);
        assert_eq!(features.consistency_index, 0.2);
    }

    #[test]
    fn odd_session_count_gives_extra_to_recent_half() {
        // recent half: [1.0, 0.5] -> 0.75, older half: [0.0]
        assert_eq!(improvement_rate(&[1.0, 0.5, 0.0]), 0.75);
    }

    #[test]
    fn empty_sessions_are_ignored() {
        let attempts = vec![attempt("a", true, 0, 1000); 3];
        let sessions = vec![
            session("a", 0, 0, 5),
            session("b", 4, 4, 10),
            session("c", 0, 0, 20),
        ];
        let features = extractor().extract(&attempts, &sessions).unwrap();

        assert_eq!(features.session_improvement_rate, 0.0);
        assert_eq!(features.consistency_index, 0.0);
        assert_eq!(features.total_sessions, 3);
    }

    #[test]
    fn hesitation_bursts_need_enough_attempts() {
        let few = vec![
            attempt("a", true, 0, 1000),
            attempt("a", true, 0, 1000),
            attempt("a", true, 0, 9000),
        ];
        assert_eq!(extractor().extract(&few, &[]).unwrap().hesitation_burst_count, 0);

        let many = vec![
            attempt("a", true, 0, 1000),
            attempt("a", true, 0, 1000),
            attempt("a", true, 0, 1000),
            attempt("a", true, 0, 1000),
            attempt("a", true, 0, 9000),
        ];
        // mean = 2600, 9000 > 5200
        assert_eq!(extractor().extract(&many, &[]).unwrap().hesitation_burst_count, 1);
    }

    #[test]
    fn window_is_capped() {
        let config = AnalysisConfig {
            max_attempts: 4,
            ..Default::default()
        };
        let mut attempts = vec![attempt("a", true, 0, 1000); 4];
        attempts.extend(vec![attempt("a", false, 0, 1000); 10]);

        let features = FeatureExtractor::new(config).extract(&attempts, &[]).unwrap();
        assert_eq!(features.total_attempts, 4);
        assert_eq!(features.overall_accuracy, 1.0);
    }

    #[test]
    fn extraction_is_idempotent() {
        let attempts = vec![
            attempt("a", true, 0, 1234),
            attempt("b", false, 3, 4321),
            attempt("a", true, 1, 999),
            attempt("c", false, 0, 15000),
        ];
        let sessions = vec![session("x", 7, 3, 5), session("y", 3, 2, 50)];
        let first = extractor().extract(&attempts, &sessions).unwrap();
        let second = extractor().extract(&attempts, &sessions).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
