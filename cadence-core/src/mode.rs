//! Live cognitive mode detection during a quiz.
//!
//! [`RealtimeModeDetector::detect`] is a pure priority chain evaluated after
//! every answer. [`ModeTracker`] hosts it for one session: it accumulates
//! attempts and publishes the current [`ModeState`] on a `watch` channel,
//! updating subscribers only when the mode actually changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::config::RealtimeConfig;
use crate::numeric::mean;

/// The learner's current mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveMode {
    #[default]
    Focused,
    Struggling,
    Fatigue,
    Analytical,
}

impl CognitiveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Focused => "focused",
            Self::Struggling => "struggling",
            Self::Fatigue => "fatigue",
            Self::Analytical => "analytical",
        }
    }

    /// Indicator label shown to the learner.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Focused => "Focused Mode",
            Self::Struggling => "Struggling Mode",
            Self::Fatigue => "Fatigue Mode",
            Self::Analytical => "Analytical Mode",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Focused => "You're in the zone!",
            Self::Struggling => "Take a breath, you've got this",
            Self::Fatigue => "Consider taking a break",
            Self::Analytical => "Deep thinking detected",
        }
    }
}

impl std::fmt::Display for CognitiveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session-so-far inputs to mode detection.
#[derive(Debug, Clone, Copy)]
pub struct ModeInputs<'a> {
    /// Response times so far, oldest first.
    pub response_times_ms: &'a [u64],
    pub retries: u32,
    pub correct: u32,
    pub total: u32,
    pub session_minutes: f64,
}

impl ModeInputs<'_> {
    /// Correct over total for the whole session so far; 1.0 before any answer.
    ///
    /// This is session-wide, not a trailing window.
    pub fn session_accuracy(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            f64::from(self.correct) / f64::from(self.total)
        }
    }
}

/// Classifies the current mode from session-so-far inputs.
#[derive(Debug, Clone, Default)]
pub struct RealtimeModeDetector {
    config: RealtimeConfig,
}

impl RealtimeModeDetector {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }

    /// First matching rule wins: fatigue, struggling, analytical, focused.
    pub fn detect(&self, inputs: &ModeInputs<'_>) -> CognitiveMode {
        let c = &self.config;
        let accuracy = inputs.session_accuracy();

        let all: Vec<f64> = inputs.response_times_ms.iter().map(|ms| *ms as f64).collect();
        let overall_avg = mean(&all);
        let trailing = &all[all.len().saturating_sub(c.trailing_window)..];
        let trailing_avg = mean(trailing);

        if inputs.session_minutes > c.fatigue_after_minutes
            && (accuracy < c.fatigue_accuracy || trailing_avg > overall_avg * c.slowdown_factor)
        {
            return CognitiveMode::Fatigue;
        }

        if inputs.total >= c.struggling_min_answered
            && (accuracy < c.struggling_accuracy || inputs.retries > inputs.total)
        {
            return CognitiveMode::Struggling;
        }

        if accuracy >= c.analytical_accuracy && overall_avg > c.analytical_min_response_ms {
            return CognitiveMode::Analytical;
        }

        CognitiveMode::Focused
    }
}

/// One answer during the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptEvent {
    pub response_time_ms: Option<u64>,
    pub retries: u32,
    pub is_correct: bool,
    pub at: DateTime<Utc>,
}

/// Published state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeState {
    pub mode: CognitiveMode,
    /// Whether this update changed the mode.
    pub changed: bool,
    pub answered: u32,
    pub session_accuracy: f64,
}

/// Tracks one active quiz session and notifies on mode changes.
#[derive(Debug)]
pub struct ModeTracker {
    detector: RealtimeModeDetector,
    started_at: DateTime<Utc>,
    response_times_ms: Vec<u64>,
    retries: u32,
    correct: u32,
    total: u32,
    mode: CognitiveMode,
    state_tx: watch::Sender<ModeState>,
}

impl ModeTracker {
    /// Start tracking a session in focused mode.
    pub fn new(detector: RealtimeModeDetector, started_at: DateTime<Utc>) -> Self {
        let (state_tx, _) = watch::channel(ModeState {
            mode: CognitiveMode::Focused,
            changed: false,
            answered: 0,
            session_accuracy: 1.0,
        });
        Self {
            detector,
            started_at,
            response_times_ms: Vec::new(),
            retries: 0,
            correct: 0,
            total: 0,
            mode: CognitiveMode::Focused,
            state_tx,
        }
    }

    /// Subscribe to mode changes.
    pub fn subscribe(&self) -> watch::Receiver<ModeState> {
        self.state_tx.subscribe()
    }

    /// Current mode.
    pub fn mode(&self) -> CognitiveMode {
        self.mode
    }

    /// Record one answer and re-evaluate the mode.
    pub fn on_attempt(&mut self, event: AttemptEvent) -> ModeState {
        if let Some(ms) = event.response_time_ms.filter(|ms| *ms > 0) {
            self.response_times_ms.push(ms);
        }
        self.retries = self.retries.saturating_add(event.retries);
        self.total = self.total.saturating_add(1);
        if event.is_correct {
            self.correct = self.correct.saturating_add(1);
        }

        let elapsed = event.at - self.started_at;
        let inputs = ModeInputs {
            response_times_ms: &self.response_times_ms,
            retries: self.retries,
            correct: self.correct,
            total: self.total,
            session_minutes: elapsed.num_milliseconds().max(0) as f64 / 60_000.0,
        };
        let mode = self.detector.detect(&inputs);
        let changed = mode != self.mode;

        let state = ModeState {
            mode,
            changed,
            answered: self.total,
            session_accuracy: inputs.session_accuracy(),
        };

        if changed {
            debug!(from = %self.mode, to = %mode, answered = self.total, "Cognitive mode changed");
            self.mode = mode;
            self.state_tx.send_replace(state);
        } else {
            trace!(mode = %mode, answered = self.total, "Cognitive mode unchanged");
        }

        state
    }
}
