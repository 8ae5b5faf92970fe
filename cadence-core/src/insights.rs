//! Rows derived from one analysis run.
//!
//! Small, pure helpers that turn features and a classification into the
//! records the pipeline persists, plus the local at-risk and breakthrough
//! checks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::classifier::{Classification, Prediction};
use crate::config::ThresholdConfig;
use crate::features::FeatureVector;
use crate::numeric::{mean, round3};
use crate::types::{
    CognitiveEvent, CognitiveEventType, MisconceptionPattern, QuestionAttempt, Recommendation,
    TopicId, TopicPerformance, UserId,
};

/// Overall accuracy below the admin risk threshold.
pub fn is_at_risk(features: &FeatureVector, thresholds: &ThresholdConfig) -> bool {
    features.overall_accuracy < thresholds.risk_threshold
}

/// Selected answers of incorrect attempts, grouped by topic.
pub fn wrong_answer_groups(attempts: &[QuestionAttempt]) -> BTreeMap<TopicId, Vec<String>> {
    let mut groups: BTreeMap<TopicId, Vec<String>> = BTreeMap::new();
    for attempt in attempts.iter().filter(|a| !a.is_correct) {
        if let Some(answer) = attempt.selected_answer.as_deref()
            && !answer.is_empty()
        {
            groups
                .entry(attempt.topic_id.clone())
                .or_default()
                .push(answer.to_string());
        }
    }
    groups
}

/// Per-topic performance rows for every topic in the window.
pub fn topic_performance(
    user_id: &UserId,
    attempts: &[QuestionAttempt],
    now: DateTime<Utc>,
) -> Vec<TopicPerformance> {
    let mut by_topic: BTreeMap<&TopicId, Vec<&QuestionAttempt>> = BTreeMap::new();
    for attempt in attempts {
        by_topic.entry(&attempt.topic_id).or_default().push(attempt);
    }

    by_topic
        .into_iter()
        .map(|(topic_id, rows)| {
            let total = rows.len() as u32;
            let correct = rows.iter().filter(|a| a.is_correct).count() as u32;
            let timings: Vec<f64> = rows
                .iter()
                .filter_map(|a| a.timing_sample())
                .map(|ms| ms as f64)
                .collect();
            let retries: Vec<f64> = rows
                .iter()
                .map(|a| f64::from(a.number_of_retries))
                .collect();

            TopicPerformance {
                user_id: user_id.clone(),
                topic_id: topic_id.clone(),
                total_attempts: total,
                total_correct: correct,
                avg_response_time_ms: (!timings.is_empty()).then(|| mean(&timings).round()),
                avg_retries: (!retries.is_empty()).then(|| round3(mean(&retries))),
                accuracy_rate: if total > 0 {
                    round3(f64::from(correct) / f64::from(total))
                } else {
                    0.0
                },
                last_updated: now,
            }
        })
        .collect()
}

/// The recommendation to activate for a classification.
pub fn recommendation(
    user_id: &UserId,
    classification: &Classification,
    features: &FeatureVector,
    now: DateTime<Utc>,
) -> Recommendation {
    Recommendation {
        id: Uuid::now_v7(),
        user_id: user_id.clone(),
        cognitive_type: classification.cognitive_type,
        recommended_difficulty: classification.recommended_difficulty,
        focus_topics: features.weak_topics.clone(),
        practice_type: classification.practice_type.clone(),
        time_limit_mode: classification.time_limit_mode().to_string(),
        learning_strategy_summary: classification.learning_strategy_summary.clone(),
        is_active: true,
        created_at: now,
    }
}

/// One pattern per reported cluster; a missing frequency counts once.
pub fn misconception_patterns(
    user_id: &UserId,
    classification: &Classification,
    now: DateTime<Utc>,
) -> Vec<MisconceptionPattern> {
    classification
        .misconception_clusters
        .iter()
        .map(|cluster| MisconceptionPattern {
            id: Uuid::now_v7(),
            user_id: user_id.clone(),
            misconception_type: cluster.misconception_type.clone(),
            frequency: cluster.frequency.filter(|f| *f > 0).unwrap_or(1),
            confusion_cluster: vec![cluster.description.clone()],
            created_at: now,
        })
        .collect()
}

/// Events reported by the classifier, tagged with the run's CSI and CPI.
pub fn detected_events(
    user_id: &UserId,
    classification: &Classification,
    csi: f64,
    now: DateTime<Utc>,
) -> Vec<CognitiveEvent> {
    let data = json!({
        "stability_index": csi,
        "cpi": classification.cognitive_predictability_index,
    });
    classification
        .detected_events
        .iter()
        .map(|event| {
            CognitiveEvent::new(
                user_id.clone(),
                event.event_type,
                event.description.clone(),
                data.clone(),
                now,
            )
        })
        .collect()
}

/// A correct answer the shadow prediction expected to be wrong.
///
/// Fires when the predicted error probability is strictly above `threshold`.
pub fn detect_breakthrough(
    prediction: &Prediction,
    attempt: &QuestionAttempt,
    threshold: f64,
) -> Option<CognitiveEvent> {
    if !attempt.is_correct || prediction.predicted_error_probability <= threshold {
        return None;
    }
    Some(CognitiveEvent::new(
        attempt.user_id.clone(),
        CognitiveEventType::Breakthrough,
        format!(
            "Answered correctly despite a {:.0}% predicted error probability",
            prediction.predicted_error_probability * 100.0
        ),
        json!({
            "predicted_error_probability": prediction.predicted_error_probability,
            "predicted_mistake_type": prediction.predicted_mistake_type,
            "topic_id": attempt.topic_id,
            "question_id": attempt.question_id,
            "response_time_ms": attempt.response_time_ms,
        }),
        attempt.attempted_at,
    ))
}
