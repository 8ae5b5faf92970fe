//! Points, streaks and badges.
//!
//! [`GamificationLedger::apply`] is a pure reducer: one quiz completion in,
//! the next state out. Points and `longest_streak` never decrease and the
//! badge set only grows.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GamificationConfig;
use crate::types::QuestionAttempt;

/// Badges a learner can earn, each at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Badge {
    #[serde(rename = "First Quiz")]
    FirstQuiz,
    #[serde(rename = "Perfect Score")]
    PerfectScore,
    #[serde(rename = "Streak Master")]
    StreakMaster,
    #[serde(rename = "Topic Explorer")]
    TopicExplorer,
}

impl Badge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstQuiz => "First Quiz",
            Self::PerfectScore => "Perfect Score",
            Self::StreakMaster => "Streak Master",
            Self::TopicExplorer => "Topic Explorer",
        }
    }
}

impl std::fmt::Display for Badge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-user gamification row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamificationState {
    pub total_points: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    #[serde(default)]
    pub last_activity_date: Option<NaiveDate>,
    #[serde(default)]
    pub badges: BTreeSet<Badge>,
    pub quizzes_completed: u32,
}

/// Final tally of one quiz, as reported at completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizCompletion {
    pub correct: u32,
    pub total: u32,
    /// Points accumulated per answer during the quiz.
    pub points: u64,
}

impl QuizCompletion {
    pub fn new(correct: u32, total: u32, points: u64) -> Self {
        Self {
            correct: correct.min(total),
            total,
            points,
        }
    }

    /// Tally a finished quiz from its attempts.
    pub fn from_attempts(attempts: &[QuestionAttempt], config: &GamificationConfig) -> Self {
        let correct = attempts.iter().filter(|a| a.is_correct).count() as u32;
        let points = attempts
            .iter()
            .map(|a| answer_points(a.is_correct, a.number_of_retries, config))
            .sum();
        Self::new(correct, attempts.len() as u32, points)
    }

    pub fn is_perfect(&self) -> bool {
        self.total > 0 && self.correct == self.total
    }
}

/// Points for one answer: base for a correct answer plus the first-try bonus.
pub fn answer_points(is_correct: bool, retries: u32, config: &GamificationConfig) -> u64 {
    if !is_correct {
        return 0;
    }
    if retries == 0 {
        config.points_per_correct + config.first_try_bonus
    } else {
        config.points_per_correct
    }
}

/// How the streak moved on a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
    /// Played yesterday; the streak grew by one.
    Extended,
    /// Already played today.
    Unchanged,
    /// First activity or a gap; the streak restarted at one.
    Started,
}

/// Result of applying one completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub state: GamificationState,
    pub points_awarded: u64,
    pub streak_change: StreakChange,
    pub streak_bonus: u64,
    pub new_badges: Vec<Badge>,
}

/// Applies quiz completions to [`GamificationState`].
#[derive(Debug, Clone, Default)]
pub struct GamificationLedger {
    config: GamificationConfig,
}

impl GamificationLedger {
    pub fn new(config: GamificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GamificationConfig {
        &self.config
    }

    /// Compute the next state after one quiz completion on `today`.
    ///
    /// A `last_activity_date` after `today` is treated as today.
    pub fn apply(
        &self,
        state: &GamificationState,
        completion: &QuizCompletion,
        today: NaiveDate,
    ) -> CompletionOutcome {
        let mut next = state.clone();
        let mut points = completion.points;

        if completion.is_perfect() {
            points += self.config.perfect_quiz_bonus;
        }

        let yesterday = today.pred_opt();
        let (streak_change, streak) = match state.last_activity_date {
            Some(last) if last >= today => (StreakChange::Unchanged, state.current_streak.max(1)),
            Some(last) if Some(last) == yesterday => {
                (StreakChange::Extended, state.current_streak.saturating_add(1))
            }
            _ => (StreakChange::Started, 1),
        };

        let streak_bonus = if streak_change == StreakChange::Extended && streak > 1 {
            self.config.streak_bonus
        } else {
            0
        };
        points += streak_bonus;

        if streak_change == StreakChange::Started && state.current_streak > 1 {
            debug!(previous = state.current_streak, "Streak reset");
        }

        next.current_streak = streak;
        next.longest_streak = state.longest_streak.max(streak);
        next.last_activity_date = Some(state.last_activity_date.map_or(today, |d| d.max(today)));
        next.quizzes_completed = state.quizzes_completed.saturating_add(1);
        next.total_points = state.total_points.saturating_add(points);

        let earned = [
            (Badge::FirstQuiz, next.quizzes_completed == 1),
            (Badge::PerfectScore, completion.is_perfect()),
            (
                Badge::StreakMaster,
                next.current_streak >= self.config.streak_master_days,
            ),
            (
                Badge::TopicExplorer,
                next.quizzes_completed >= self.config.explorer_sessions,
            ),
        ];
        let mut new_badges = Vec::new();
        for (badge, _) in earned.into_iter().filter(|(_, earned)| *earned) {
            if next.badges.insert(badge) {
                debug!(badge = %badge, "Badge awarded");
                new_badges.push(badge);
            }
        }

        CompletionOutcome {
            state: next,
            points_awarded: points,
            streak_change,
            streak_bonus,
            new_badges,
        }
    }
}
