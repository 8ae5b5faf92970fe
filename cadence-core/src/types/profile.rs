//! Per-user rows written by the analysis pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CognitiveType, TopicId, UserId};

/// A type the user held before being reclassified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousType {
    #[serde(rename = "type")]
    pub cognitive_type: CognitiveType,
    pub changed_at: DateTime<Utc>,
}

/// Current classification for a user. One row per user, upserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveProfile {
    pub user_id: UserId,
    pub cognitive_type: CognitiveType,
    pub confidence_score: f64,
    pub feature_vector: serde_json::Value,
    pub reasoning: String,
    #[serde(default)]
    pub previous_types: Vec<PreviousType>,
    pub last_evaluated: DateTime<Utc>,
}

impl CognitiveProfile {
    /// Merge a fresh classification into the existing row.
    ///
    /// The old type is appended to `previous_types` only when it changes.
    pub fn merge(
        existing: Option<&CognitiveProfile>,
        user_id: &UserId,
        cognitive_type: CognitiveType,
        confidence_score: f64,
        reasoning: impl Into<String>,
        feature_vector: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        let mut previous_types = existing
            .map(|p| p.previous_types.clone())
            .unwrap_or_default();
        if let Some(prev) = existing
            && prev.cognitive_type != cognitive_type
        {
            previous_types.push(PreviousType {
                cognitive_type: prev.cognitive_type,
                changed_at: now,
            });
        }

        Self {
            user_id: user_id.clone(),
            cognitive_type,
            confidence_score,
            feature_vector,
            reasoning: reasoning.into(),
            previous_types,
            last_evaluated: now,
        }
    }
}

/// A study recommendation. At most one is active per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub user_id: UserId,
    pub cognitive_type: CognitiveType,
    pub recommended_difficulty: u8,
    pub focus_topics: Vec<TopicId>,
    pub practice_type: String,
    pub time_limit_mode: String,
    pub learning_strategy_summary: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Aggregated performance of one user on one topic, upserted by (user, topic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicPerformance {
    pub user_id: UserId,
    pub topic_id: TopicId,
    pub total_attempts: u32,
    pub total_correct: u32,
    pub avg_response_time_ms: Option<f64>,
    pub avg_retries: Option<f64>,
    pub accuracy_rate: f64,
    pub last_updated: DateTime<Utc>,
}

/// Kind of notable moment detected in a learner's behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveEventType {
    Breakthrough,
    Stress,
    Shift,
    Fatigue,
}

impl CognitiveEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breakthrough => "breakthrough",
            Self::Stress => "stress",
            Self::Shift => "shift",
            Self::Fatigue => "fatigue",
        }
    }
}

impl std::fmt::Display for CognitiveEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An inserted cognitive event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveEvent {
    pub id: Uuid,
    pub user_id: UserId,
    pub event_type: CognitiveEventType,
    pub description: String,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CognitiveEvent {
    /// Create a new event with a time-ordered id.
    pub fn new(
        user_id: UserId,
        event_type: CognitiveEventType,
        description: impl Into<String>,
        event_data: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            event_type,
            description: description.into(),
            event_data,
            created_at,
        }
    }
}

/// An inserted misconception cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisconceptionPattern {
    pub id: Uuid,
    pub user_id: UserId,
    pub misconception_type: String,
    pub frequency: u32,
    pub confusion_cluster: Vec<String>,
    pub created_at: DateTime<Utc>,
}
