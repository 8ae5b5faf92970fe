//! Configuration for the cadence analysis pipeline.
//!
//! Every threshold and weight the analyzers use is a field here so operators
//! can tune them without code changes. The [`ThresholdConfig`] section is the
//! admin-settable surface: at-risk accuracy, drift sensitivity, breakthrough
//! threshold and session fatigue threshold.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};

/// Main configuration for cadence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Window sizes and data floors.
    pub analysis: AnalysisConfig,
    /// Admin-settable thresholds.
    pub thresholds: ThresholdConfig,
    /// Cognitive Stability Index weights and label cutoffs.
    pub stability: StabilityConfig,
    /// Energy curve and fatigue detection.
    pub energy: EnergyConfig,
    /// Points, bonuses and badge rules.
    pub gamification: GamificationConfig,
    /// Live mode detection during a quiz.
    pub realtime: RealtimeConfig,
    /// External classifier gateway.
    pub classifier: ClassifierConfig,
}

impl CadenceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| CadenceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CadenceError::Serialization(e.to_string()))
    }

    /// Check every section for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        self.thresholds.validate()?;
        self.stability.validate()?;
        self.energy.validate()?;
        self.gamification.validate()?;
        self.realtime.validate()?;
        self.classifier.validate()?;
        Ok(())
    }
}

/// Window sizes and minimum data requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Most recent attempts considered per run.
    pub max_attempts: usize,
    /// Most recent sessions considered per run.
    pub max_sessions: usize,
    /// Most recent classification snapshots considered per run.
    pub max_history: usize,
    /// Below this many attempts nothing is computed.
    pub min_attempts: usize,
    /// Timing-derived signals degrade to zero below this many attempts.
    pub min_attempts_for_timing_signals: usize,
    /// A topic is weak when its accuracy is strictly below this.
    pub weak_topic_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_attempts: 300,
            max_sessions: 50,
            max_history: 20,
            min_attempts: 3,
            min_attempts_for_timing_signals: 5,
            weak_topic_threshold: 0.5,
        }
    }
}

impl AnalysisConfig {
    fn validate(&self) -> Result<()> {
        if self.min_attempts == 0 {
            return Err(CadenceError::Config(
                "analysis.min_attempts must be at least 1".into(),
            ));
        }
        if self.max_attempts < self.min_attempts {
            return Err(CadenceError::Config(
                "analysis.max_attempts must not be below analysis.min_attempts".into(),
            ));
        }
        check_unit("analysis.weak_topic_threshold", self.weak_topic_threshold)
    }
}

/// Admin-settable thresholds injected into the analyzers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Overall accuracy below which a learner is flagged at-risk (0.0 to 1.0).
    pub risk_threshold: f64,
    /// CSI deduction per cognitive type change.
    pub drift_sensitivity: f64,
    /// Predicted error probability above which a correct answer is a breakthrough.
    pub breakthrough_threshold: f64,
    /// Second-half accuracy drop that marks a fatigue point.
    pub session_fatigue_threshold: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 0.4,
            drift_sensitivity: 15.0,
            breakthrough_threshold: 0.6,
            session_fatigue_threshold: 0.15,
        }
    }
}

impl ThresholdConfig {
    /// Reject values outside their meaningful range.
    pub fn validate(&self) -> Result<()> {
        check_unit("thresholds.risk_threshold", self.risk_threshold)?;
        check_unit(
            "thresholds.breakthrough_threshold",
            self.breakthrough_threshold,
        )?;
        check_unit(
            "thresholds.session_fatigue_threshold",
            self.session_fatigue_threshold,
        )?;
        if !(0.0..=100.0).contains(&self.drift_sensitivity) {
            return Err(CadenceError::Config(format!(
                "thresholds.drift_sensitivity must be within 0..=100, got {}",
                self.drift_sensitivity
            )));
        }
        Ok(())
    }
}

/// Weights and cutoffs for the Cognitive Stability Index.
///
/// The per-type-change penalty is `ThresholdConfig::drift_sensitivity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Score before penalties.
    pub base_score: f64,
    /// Multiplier applied to the consistency index.
    pub consistency_weight: f64,
    /// Flat penalty when response time variance exceeds `variance_limit`.
    pub variance_penalty: f64,
    /// Response time variance (ms²) above which `variance_penalty` applies.
    pub variance_limit: f64,
    /// CSI at or above this is "Stable Thinker".
    pub stable_cutoff: f64,
    /// CSI at or above this (and below `stable_cutoff`) is "Moderately Stable".
    pub moderate_cutoff: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            base_score: 100.0,
            consistency_weight: 50.0,
            variance_penalty: 20.0,
            variance_limit: 50_000.0,
            stable_cutoff: 75.0,
            moderate_cutoff: 45.0,
        }
    }
}

impl StabilityConfig {
    fn validate(&self) -> Result<()> {
        if self.moderate_cutoff > self.stable_cutoff {
            return Err(CadenceError::Config(
                "stability.moderate_cutoff must not exceed stability.stable_cutoff".into(),
            ));
        }
        Ok(())
    }
}

/// Energy curve and fatigue detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// Offset from UTC used to derive the learner's local hour.
    pub utc_offset_minutes: i32,
    /// Most recent sessions inspected for fatigue.
    pub fatigue_sessions: usize,
    /// Sessions with fewer attempts are skipped.
    pub min_session_attempts: usize,
    /// Best hour reported when there are no attempts.
    pub default_best_hour: u32,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            fatigue_sessions: 10,
            min_session_attempts: 4,
            default_best_hour: 12,
        }
    }
}

impl EnergyConfig {
    fn validate(&self) -> Result<()> {
        if !(-720..=840).contains(&self.utc_offset_minutes) {
            return Err(CadenceError::Config(format!(
                "energy.utc_offset_minutes must be within -720..=840, got {}",
                self.utc_offset_minutes
            )));
        }
        if self.default_best_hour >= 24 {
            return Err(CadenceError::Config(format!(
                "energy.default_best_hour must be below 24, got {}",
                self.default_best_hour
            )));
        }
        if self.fatigue_sessions == 0 {
            return Err(CadenceError::Config(
                "energy.fatigue_sessions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Points and badge rules for the gamification ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GamificationConfig {
    pub points_per_correct: u64,
    pub first_try_bonus: u64,
    pub perfect_quiz_bonus: u64,
    pub streak_bonus: u64,
    /// Streak length that earns "Streak Master".
    pub streak_master_days: u32,
    /// Completed sessions that earn "Topic Explorer".
    pub explorer_sessions: u32,
}

impl Default for GamificationConfig {
    fn default() -> Self {
        Self {
            points_per_correct: 10,
            first_try_bonus: 5,
            perfect_quiz_bonus: 20,
            streak_bonus: 15,
            streak_master_days: 7,
            explorer_sessions: 5,
        }
    }
}

impl GamificationConfig {
    fn validate(&self) -> Result<()> {
        if self.streak_master_days == 0 || self.explorer_sessions == 0 {
            return Err(CadenceError::Config(
                "gamification.streak_master_days and gamification.explorer_sessions must be at least 1"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Rules for live cognitive mode detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Elapsed session minutes after which fatigue can fire.
    pub fatigue_after_minutes: f64,
    /// Session accuracy below which a long session counts as fatigued.
    pub fatigue_accuracy: f64,
    /// Trailing mean / overall mean ratio that counts as slowing down.
    pub slowdown_factor: f64,
    /// Number of trailing response times compared against the overall mean.
    pub trailing_window: usize,
    /// Answers needed before struggling can fire.
    pub struggling_min_answered: u32,
    /// Session accuracy below which the learner is struggling.
    pub struggling_accuracy: f64,
    /// Session accuracy at or above which slow answers read as analytical.
    pub analytical_accuracy: f64,
    /// Mean response time (ms) above which accurate answers read as analytical.
    pub analytical_min_response_ms: f64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            fatigue_after_minutes: 20.0,
            fatigue_accuracy: 0.5,
            slowdown_factor: 1.5,
            trailing_window: 3,
            struggling_min_answered: 2,
            struggling_accuracy: 0.4,
            analytical_accuracy: 0.7,
            analytical_min_response_ms: 15_000.0,
        }
    }
}

impl RealtimeConfig {
    fn validate(&self) -> Result<()> {
        check_unit("realtime.fatigue_accuracy", self.fatigue_accuracy)?;
        check_unit("realtime.struggling_accuracy", self.struggling_accuracy)?;
        check_unit("realtime.analytical_accuracy", self.analytical_accuracy)?;
        if self.trailing_window == 0 {
            return Err(CadenceError::Config(
                "realtime.trailing_window must be at least 1".into(),
            ));
        }
        if self.slowdown_factor < 1.0 {
            return Err(CadenceError::Config(format!(
                "realtime.slowdown_factor must be at least 1.0, got {}",
                self.slowdown_factor
            )));
        }
        if self.fatigue_after_minutes < 0.0 || self.analytical_min_response_ms < 0.0 {
            return Err(CadenceError::Config(
                "realtime.fatigue_after_minutes and realtime.analytical_min_response_ms must not be negative"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// External classifier gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Whether classification calls are made at all.
    pub enabled: bool,
    /// Base URL of an OpenAI-compatible chat completions gateway.
    pub base_url: String,
    /// Model requested from the gateway.
    pub model: String,
    /// Environment variable holding the gateway API key.
    pub api_key_env: String,
    /// Timeout for one classifier call in seconds.
    pub timeout_seconds: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://ai.gateway.lovable.dev/v1".to_string(),
            model: "google/gemini-3-flash-preview".to_string(),
            api_key_env: "CADENCE_GATEWAY_API_KEY".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl ClassifierConfig {
    fn validate(&self) -> Result<()> {
        if self.enabled && self.timeout_seconds == 0 {
            return Err(CadenceError::Config(
                "classifier.timeout_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CadenceError::Config(format!(
            "{name} must be within 0.0..=1.0, got {value}"
        )))
    }
}
