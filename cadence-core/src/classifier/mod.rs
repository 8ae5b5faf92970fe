//! The external classifier boundary.
//!
//! cadence computes every behavioral metric locally and hands the merged
//! payload to a [`Classifier`], a black box that returns a cognitive type
//! plus recommendations, predictability, misconceptions and events. The
//! production implementation is [`GatewayClassifier`], which talks to an
//! OpenAI-compatible chat completions gateway using forced tool calls.
//!
//! ```text
//! FeatureVector ─┐
//! Stability     ─┼─► FeaturePayload ─► ClassifierPayload ─► classify() ─► Classification
//! Energy        ─┤                                                         │
//! Fingerprint   ─┘                                                     validate()
//! ```
//!
//! A response that is missing, unparseable or out of range is a
//! [`ClassifierError::Malformed`] error for that run.

pub mod gateway;
pub mod mock;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::energy::{EnergyCurvePoint, EnergyReport};
use crate::features::FeatureVector;
use crate::fingerprint::{FingerprintInsight, FingerprintSignals};
use crate::stability::StabilityReport;
use crate::types::{
    CognitiveEventType, CognitiveHistorySnapshot, CognitiveType, CpiLabel, StabilityLabel,
    TopicId,
};

pub use gateway::GatewayClassifier;
pub use mock::StaticClassifier;

/// History entries summarized into the payload.
pub const HISTORY_SUMMARY_LEN: usize = 5;

/// Error type for classifier calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    /// Classification is disabled in configuration.
    #[error("classifier is disabled")]
    Disabled,
    /// No API key was found in the configured environment variable.
    #[error("missing API key: set {0}")]
    MissingApiKey(String),
    /// The gateway rejected the call with HTTP 429.
    #[error("rate limited, try again later")]
    RateLimited,
    /// The gateway rejected the call with HTTP 402.
    #[error("classifier credits exhausted")]
    QuotaExhausted,
    /// Any other non-success status.
    #[error("gateway returned status {status}: {body}")]
    Http { status: u16, body: String },
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The call exceeded its deadline.
    #[error("classifier timed out after {0} seconds")]
    Timeout(u32),
    /// The caller cancelled the run.
    #[error("classifier call cancelled")]
    Cancelled,
    /// The response had no tool call, bad JSON or out-of-range values.
    #[error("malformed classifier response: {0}")]
    Malformed(String),
}

impl ClassifierError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Self::QuotaExhausted)
    }
}

/// Locally computed context sent to the classifier.
///
/// The feature vector is flattened in; everything else is derived context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePayload {
    #[serde(flatten)]
    pub features: FeatureVector,
    /// CSI rounded to one decimal.
    pub cognitive_stability_index: f64,
    pub stability_label: StabilityLabel,
    pub type_changes_count: usize,
    pub best_performance_hour: u32,
    pub avg_fatigue_point_minutes: Option<u64>,
    /// Raw burst count; the fingerprint stores the normalized frequency.
    pub hesitation_burst_frequency: u32,
    pub energy_curve: Vec<EnergyCurvePoint>,
    pub error_clustering: BTreeMap<TopicId, u32>,
    /// Selected answers of incorrect attempts, per topic.
    pub wrong_answer_groups: BTreeMap<TopicId, Vec<String>>,
    pub at_risk: bool,
}

impl FeaturePayload {
    /// Merge the per-analyzer results into one payload.
    pub fn assemble(
        features: &FeatureVector,
        stability: &StabilityReport,
        energy: &EnergyReport,
        signals: &FingerprintSignals,
        wrong_answer_groups: BTreeMap<TopicId, Vec<String>>,
        at_risk: bool,
    ) -> Self {
        Self {
            features: features.clone(),
            cognitive_stability_index: stability.csi_display(),
            stability_label: stability.label,
            type_changes_count: stability.drift.type_changes,
            best_performance_hour: energy.best_performance_hour,
            avg_fatigue_point_minutes: energy.avg_session_fatigue_point_minutes,
            hesitation_burst_frequency: signals.hesitation_bursts,
            energy_curve: energy.energy_curve.clone(),
            error_clustering: signals.error_clustering.clone(),
            wrong_answer_groups,
            at_risk,
        }
    }
}

/// Full classification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierPayload {
    pub feature_vector: FeaturePayload,
    /// "Type (YYYY-MM-DD)" lines, most recent first.
    pub cognitive_history_summary: Vec<String>,
}

impl ClassifierPayload {
    /// Build a payload; `history` is oldest first and only the latest entries are summarized.
    pub fn new(feature_vector: FeaturePayload, history: &[CognitiveHistorySnapshot]) -> Self {
        let cognitive_history_summary = history
            .iter()
            .rev()
            .take(HISTORY_SUMMARY_LEN)
            .map(CognitiveHistorySnapshot::summary_line)
            .collect();
        Self {
            feature_vector,
            cognitive_history_summary,
        }
    }
}

/// A misconception cluster reported by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisconceptionCluster {
    #[serde(rename = "type")]
    pub misconception_type: String,
    pub description: String,
    #[serde(default)]
    pub frequency: Option<u32>,
}

/// The classifier's view of the learner's energy pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyAnalysis {
    pub optimal_study_time: String,
    pub recommended_session_duration_minutes: u32,
    #[serde(default)]
    pub fatigue_warning: Option<String>,
    #[serde(default)]
    pub accuracy_decay_rate: Option<f64>,
}

/// A notable moment the classifier detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEvent {
    pub event_type: CognitiveEventType,
    pub description: String,
}

/// Full classifier result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub cognitive_type: CognitiveType,
    pub confidence_score: f64,
    pub reasoning: String,
    pub recommended_difficulty: u8,
    pub practice_type: String,
    #[serde(default)]
    pub time_limit_mode: Option<String>,
    pub learning_strategy_summary: String,
    pub cognitive_predictability_index: f64,
    pub cpi_label: CpiLabel,
    pub drift_detected: bool,
    #[serde(default)]
    pub drift_description: Option<String>,
    pub misconception_clusters: Vec<MisconceptionCluster>,
    pub energy_analysis: EnergyAnalysis,
    pub behavioral_signature: String,
    pub detected_events: Vec<DetectedEvent>,
}

impl Classification {
    /// Reject values outside their documented ranges.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        check_range("confidence_score", self.confidence_score, 0.0, 1.0)?;
        check_range(
            "cognitive_predictability_index",
            self.cognitive_predictability_index,
            0.0,
            100.0,
        )?;
        if !(1..=5).contains(&self.recommended_difficulty) {
            return Err(ClassifierError::Malformed(format!(
                "recommended_difficulty must be 1..=5, got {}",
                self.recommended_difficulty
            )));
        }
        if let Some(rate) = self.energy_analysis.accuracy_decay_rate
            && !rate.is_finite()
        {
            return Err(ClassifierError::Malformed(
                "accuracy_decay_rate is not finite".into(),
            ));
        }
        Ok(())
    }

    /// Time limit mode, "untimed" when the classifier gave none.
    pub fn time_limit_mode(&self) -> &str {
        self.time_limit_mode
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or("untimed")
    }

    /// The parts of this classification stored on the fingerprint.
    pub fn fingerprint_insight(&self) -> FingerprintInsight {
        FingerprintInsight {
            cognitive_predictability_index: self.cognitive_predictability_index,
            cpi_label: self.cpi_label,
            signature_summary: self.behavioral_signature.clone(),
        }
    }
}

/// The question about to be shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingQuestion {
    pub topic_id: TopicId,
    pub difficulty_level: u8,
    pub has_hint: bool,
}

/// Shadow prediction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    pub feature_vector: FeaturePayload,
    pub upcoming_question: UpcomingQuestion,
}

/// Shadow prediction for the upcoming question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_response_time_ms: u64,
    pub predicted_retry_probability: f64,
    pub predicted_error_probability: f64,
    pub predicted_mistake_type: String,
    pub predicted_hesitation_risk: f64,
    pub confidence_instability: f64,
}

impl Prediction {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        check_range(
            "predicted_retry_probability",
            self.predicted_retry_probability,
            0.0,
            1.0,
        )?;
        check_range(
            "predicted_error_probability",
            self.predicted_error_probability,
            0.0,
            1.0,
        )?;
        check_range(
            "predicted_hesitation_risk",
            self.predicted_hesitation_risk,
            0.0,
            1.0,
        )?;
        check_range("confidence_instability", self.confidence_instability, 0.0, 1.0)
    }
}

/// Black-box cognitive classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Classify a learner. One call per pipeline run; callers do not retry.
    async fn classify(&self, payload: &ClassifierPayload) -> Result<Classification, ClassifierError>;

    /// Predict behavior on the upcoming question.
    async fn predict(&self, request: &PredictionRequest) -> Result<Prediction, ClassifierError>;
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ClassifierError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ClassifierError::Malformed(format!(
            "{field} must be within {min}..={max}, got {value}"
        )))
    }
}
