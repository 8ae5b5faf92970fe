//! Classification vocabulary and the append-only classification history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The eight cognitive learner types a classifier may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CognitiveType {
    #[serde(rename = "Fast & Accurate Learner")]
    FastAccurate,
    #[serde(rename = "Fast but Careless Learner")]
    FastCareless,
    #[serde(rename = "Slow but Accurate Learner")]
    SlowAccurate,
    #[serde(rename = "Trial-and-Error Learner")]
    TrialAndError,
    #[serde(rename = "Concept Gap Learner")]
    ConceptGap,
    #[serde(rename = "High Cognitive Load Learner")]
    HighCognitiveLoad,
    #[serde(rename = "Inconsistent Performer")]
    InconsistentPerformer,
    #[serde(rename = "Struggling Retention Learner")]
    StrugglingRetention,
}

impl CognitiveType {
    /// All types, in presentation order.
    pub const ALL: [CognitiveType; 8] = [
        Self::FastAccurate,
        Self::FastCareless,
        Self::SlowAccurate,
        Self::TrialAndError,
        Self::ConceptGap,
        Self::HighCognitiveLoad,
        Self::InconsistentPerformer,
        Self::StrugglingRetention,
    ];

    /// Display name, identical to the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FastAccurate => "Fast & Accurate Learner",
            Self::FastCareless => "Fast but Careless Learner",
            Self::SlowAccurate => "Slow but Accurate Learner",
            Self::TrialAndError => "Trial-and-Error Learner",
            Self::ConceptGap => "Concept Gap Learner",
            Self::HighCognitiveLoad => "High Cognitive Load Learner",
            Self::InconsistentPerformer => "Inconsistent Performer",
            Self::StrugglingRetention => "Struggling Retention Learner",
        }
    }
}

impl std::fmt::Display for CognitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CognitiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown cognitive type: {s}"))
    }
}

/// Categorical label for the Cognitive Stability Index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StabilityLabel {
    #[serde(rename = "Stable Thinker")]
    Stable,
    #[serde(rename = "Moderately Stable")]
    ModeratelyStable,
    #[serde(rename = "Unstable Cognitive Pattern")]
    Unstable,
}

impl StabilityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "Stable Thinker",
            Self::ModeratelyStable => "Moderately Stable",
            Self::Unstable => "Unstable Cognitive Pattern",
        }
    }
}

impl std::fmt::Display for StabilityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Label for the externally computed Cognitive Predictability Index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpiLabel {
    #[serde(rename = "Highly Predictable")]
    HighlyPredictable,
    #[serde(rename = "Predictable")]
    Predictable,
    #[serde(rename = "Moderate")]
    Moderate,
    #[serde(rename = "Unpredictable")]
    Unpredictable,
    #[serde(rename = "Highly Unpredictable")]
    HighlyUnpredictable,
}

impl CpiLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighlyPredictable => "Highly Predictable",
            Self::Predictable => "Predictable",
            Self::Moderate => "Moderate",
            Self::Unpredictable => "Unpredictable",
            Self::HighlyUnpredictable => "Highly Unpredictable",
        }
    }
}

impl std::fmt::Display for CpiLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One past classification. Append-only; never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveHistorySnapshot {
    pub cognitive_type: CognitiveType,
    pub confidence_score: f64,
    pub stability_index: f64,
    pub stability_label: StabilityLabel,
    /// Audit copy of the payload the classification was made from.
    #[serde(default)]
    pub feature_vector: Option<serde_json::Value>,
    #[serde(default)]
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CognitiveHistorySnapshot {
    /// Short "Type (YYYY-MM-DD)" form used in classifier payloads.
    pub fn summary_line(&self) -> String {
        format!(
            "{} ({})",
            self.cognitive_type,
            self.created_at.date_naive().format("%Y-%m-%d")
        )
    }
}
