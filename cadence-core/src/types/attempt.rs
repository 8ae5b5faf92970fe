//! Quiz telemetry records.
//!
//! Both records are read-only from the analyzers' perspective: attempts are
//! written once per answer or skip, sessions once at start and once at finish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{QuestionId, SessionId, TopicId, UserId};

/// One recorded answer (or skip) to one question by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAttempt {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub topic_id: TopicId,
    /// Question difficulty, 1 to 5.
    pub difficulty_level: u8,
    /// Time to answer. `None` (or zero) means no timing was captured.
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    #[serde(default)]
    pub number_of_retries: u32,
    /// Time since the previous try; only meaningful when retries > 0.
    #[serde(default)]
    pub time_between_attempts_ms: Option<u64>,
    pub is_correct: bool,
    #[serde(default)]
    pub hint_used: bool,
    #[serde(default)]
    pub abandonment_flag: bool,
    #[serde(default)]
    pub selected_answer: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl QuestionAttempt {
    /// Create an attempt with no timing, retries, hints or answer recorded.
    pub fn new(
        user_id: impl Into<UserId>,
        session_id: impl Into<SessionId>,
        topic_id: impl Into<TopicId>,
        is_correct: bool,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            question_id: QuestionId::new(uuid::Uuid::new_v4().to_string()),
            topic_id: topic_id.into(),
            difficulty_level: 1,
            response_time_ms: None,
            number_of_retries: 0,
            time_between_attempts_ms: None,
            is_correct,
            hint_used: false,
            abandonment_flag: false,
            selected_answer: None,
            attempted_at,
        }
    }

    /// Set the response time.
    #[must_use]
    pub fn with_response_time(mut self, ms: u64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    /// Set the retry count.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.number_of_retries = retries;
        self
    }

    /// Set the time between tries.
    #[must_use]
    pub fn with_time_between(mut self, ms: u64) -> Self {
        self.time_between_attempts_ms = Some(ms);
        self
    }

    /// Mark the hint as used.
    #[must_use]
    pub fn with_hint(mut self) -> Self {
        self.hint_used = true;
        self
    }

    /// Mark the question as skipped.
    #[must_use]
    pub fn abandoned(mut self) -> Self {
        self.abandonment_flag = true;
        self.is_correct = false;
        self
    }

    /// Set the selected answer.
    #[must_use]
    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.selected_answer = Some(answer.into());
        self
    }

    /// Set the question id and difficulty.
    #[must_use]
    pub fn with_question(mut self, question_id: impl Into<String>, difficulty: u8) -> Self {
        self.question_id = QuestionId::new(question_id);
        self.difficulty_level = difficulty.clamp(1, 5);
        self
    }

    /// Response time usable as a timing sample.
    pub fn timing_sample(&self) -> Option<u64> {
        self.response_time_ms.filter(|ms| *ms > 0)
    }

    /// Retry timing, only when the attempt was actually retried.
    pub fn retry_timing(&self) -> Option<u64> {
        self.time_between_attempts_ms.filter(|ms| *ms > 0)
    }
}

/// One quiz session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub id: SessionId,
    pub user_id: UserId,
    pub topic_id: TopicId,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_questions_attempted: u32,
    #[serde(default)]
    pub total_correct: u32,
    #[serde(default)]
    pub total_retries: u32,
    #[serde(default)]
    pub session_duration_seconds: Option<u64>,
}

impl SessionLog {
    /// Start a new, empty session.
    pub fn start(
        id: impl Into<SessionId>,
        user_id: impl Into<UserId>,
        topic_id: impl Into<TopicId>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            topic_id: topic_id.into(),
            started_at,
            ended_at: None,
            total_questions_attempted: 0,
            total_correct: 0,
            total_retries: 0,
            session_duration_seconds: None,
        }
    }

    /// Finalize the session counts.
    ///
    /// Counts only ever grow; a finish with smaller counts keeps the larger ones.
    pub fn finish(&mut self, attempted: u32, correct: u32, retries: u32, ended_at: DateTime<Utc>) {
        self.total_questions_attempted = self.total_questions_attempted.max(attempted);
        self.total_correct = self.total_correct.max(correct).min(self.total_questions_attempted);
        self.total_retries = self.total_retries.max(retries);
        self.ended_at = Some(ended_at);
        let elapsed = (ended_at - self.started_at).num_seconds().max(0);
        self.session_duration_seconds = Some(elapsed as u64);
    }

    /// Session accuracy, `None` when nothing was attempted.
    ///
    /// Correct answers are capped at the attempt count.
    pub fn accuracy(&self) -> Option<f64> {
        if self.total_questions_attempted == 0 {
            None
        } else {
            let correct = self.total_correct.min(self.total_questions_attempted);
            Some(f64::from(correct) / f64::from(self.total_questions_attempted))
        }
    }

    /// Whether the session has been finalized.
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, minute, 0).unwrap()
    }

    #[test]
    fn zero_response_time_is_not_a_sample() {
        let attempt = QuestionAttempt::new("u", "s", "t", true, at(0)).with_response_time(0);
        assert_eq!(attempt.timing_sample(), None);

        let attempt = attempt.with_response_time(1200);
        assert_eq!(attempt.timing_sample(), Some(1200));
    }

    #[test]
    fn abandoned_attempt_is_incorrect() {
        let attempt = QuestionAttempt::new("u", "s", "t", true, at(0)).abandoned();
        assert!(attempt.abandonment_flag);
        assert!(!attempt.is_correct);
    }

    #[test]
    fn session_accuracy_requires_attempts() {
        let mut session = SessionLog::start("s-1", "u", "t", at(0));
        assert_eq!(session.accuracy(), None);
        assert!(!session.is_finished());

        session.finish(4, 3, 1, at(10));
        assert_eq!(session.accuracy(), Some(0.75));
        assert_eq!(session.session_duration_seconds, Some(600));
        assert!(session.is_finished());
    }

    #[test]
    fn session_counts_never_shrink() {
        let mut session = SessionLog::start("s-1", "u", "t", at(0));
        session.finish(5, 4, 2, at(5));
        session.finish(3, 1, 0, at(6));
        assert_eq!(session.total_questions_attempted, 5);
        assert_eq!(session.total_correct, 4);
        assert_eq!(session.total_retries, 2);
    }

    #[test]
    fn attempt_deserializes_with_defaults() {
        let json = r#"{
            "user_id": "u-1",
            "session_id": "s-1",
            "question_id": "q-1",
            "topic_id": "algebra",
            "difficulty_level": 3,
            "is_correct": true,
            "attempted_at": "2026-03-02T09:00:00Z"
        }"#;
        let attempt: QuestionAttempt = serde_json::from_str(json).unwrap();
        assert_eq!(attempt.number_of_retries, 0);
        assert!(attempt.response_time_ms.is_none());
        assert!(!attempt.hint_used);
    }

    #[test]
    fn inconsistent_session_counts_cap_accuracy() {
        let mut session = SessionLog::start("s-1", "u", "t", at(0));
        session.total_questions_attempted = 5;
        session.total_correct = 7;
        assert_eq!(session.accuracy(), Some(1.0));
    }
}
