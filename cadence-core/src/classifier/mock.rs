//! Scripted classifier for tests and offline runs.
//!
//! `StaticClassifier` returns a fixed classification. Queue errors with
//! [`StaticClassifier::queue_error`]; each call consumes one queued error
//! before falling back to the fixed result.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    Classification, Classifier, ClassifierError, ClassifierPayload, DetectedEvent,
    EnergyAnalysis, FeaturePayload, MisconceptionCluster, Prediction, PredictionRequest,
};
use crate::features::FeatureVector;
use crate::types::{CognitiveEventType, CognitiveType, CpiLabel, StabilityLabel};

/// Classifier returning scripted results.
pub struct StaticClassifier {
    classification: Classification,
    prediction: Option<Prediction>,
    errors: Mutex<VecDeque<ClassifierError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticClassifier {
    /// Always answer with `classification`.
    pub fn new(classification: Classification) -> Self {
        Self {
            classification,
            prediction: None,
            errors: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer with [`sample_classification`] for the given type.
    pub fn with_type(cognitive_type: CognitiveType) -> Self {
        Self::new(sample_classification(cognitive_type))
    }

    /// Answer predictions with `prediction`; without one, predictions fail.
    #[must_use]
    pub fn with_prediction(mut self, prediction: Prediction) -> Self {
        self.prediction = Some(prediction);
        self
    }

    /// Sleep before answering, to exercise timeouts and cancellation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next call with `error`.
    pub fn queue_error(&self, error: ClassifierError) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push_back(error);
        }
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) -> Result<(), ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.errors.lock().ok().and_then(|mut e| e.pop_front());
        match queued {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Classifier for StaticClassifier {
    fn name(&self) -> &str {
        "static"
    }

    async fn classify(&self, _payload: &ClassifierPayload) -> Result<Classification, ClassifierError> {
        self.begin_call().await?;
        Ok(self.classification.clone())
    }

    async fn predict(&self, _request: &PredictionRequest) -> Result<Prediction, ClassifierError> {
        self.begin_call().await?;
        self.prediction
            .clone()
            .ok_or_else(|| ClassifierError::Malformed("no scripted prediction".into()))
    }
}

/// A plausible, valid classification of the given type.
pub fn sample_classification(cognitive_type: CognitiveType) -> Classification {
    Classification {
        cognitive_type,
        confidence_score: 0.8,
        reasoning: format!("Behavior matches the {cognitive_type} profile"),
        recommended_difficulty: 3,
        practice_type: "mixed review".to_string(),
        time_limit_mode: None,
        learning_strategy_summary: "Alternate weak topics with mastered ones".to_string(),
        cognitive_predictability_index: 64.0,
        cpi_label: CpiLabel::Moderate,
        drift_detected: false,
        drift_description: None,
        misconception_clusters: vec![MisconceptionCluster {
            misconception_type: "procedural slip".to_string(),
            description: "skips the final simplification step".to_string(),
            frequency: None,
        }],
        energy_analysis: EnergyAnalysis {
            optimal_study_time: "late morning".to_string(),
            recommended_session_duration_minutes: 25,
            fatigue_warning: None,
            accuracy_decay_rate: None,
        },
        behavioral_signature: "steady pace with occasional long pauses".to_string(),
        detected_events: vec![DetectedEvent {
            event_type: CognitiveEventType::Shift,
            description: "pace picked up in recent sessions".to_string(),
        }],
    }
}

/// A minimal payload for exercising classifiers without running the analyzers.
pub fn sample_payload() -> FeaturePayload {
    FeaturePayload {
        features: FeatureVector {
            avg_response_time_ms: 6000,
            response_time_variance: 1_000_000,
            retry_ratio: 0.2,
            error_frequency: 0.3,
            hint_usage_rate: 0.1,
            abandonment_rate: 0.0,
            overall_accuracy: 0.7,
            session_improvement_rate: 0.05,
            consistency_index: 0.1,
            topic_accuracy: BTreeMap::new(),
            weak_topics: Vec::new(),
            weak_topic_count: 0,
            hesitation_burst_count: 1,
            total_attempts: 10,
            total_sessions: 2,
        },
        cognitive_stability_index: 75.0,
        stability_label: StabilityLabel::Stable,
        type_changes_count: 0,
        best_performance_hour: 10,
        avg_fatigue_point_minutes: None,
        hesitation_burst_frequency: 1,
        energy_curve: Vec::new(),
        error_clustering: BTreeMap::new(),
        wrong_answer_groups: BTreeMap::new(),
        at_risk: false,
    }
}
