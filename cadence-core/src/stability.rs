//! Cognitive Stability Index (CSI) scoring and drift flags.
//!
//! ```text
//! CSI = max(0, base
//!              − drift_sensitivity · type_changes
//!              − consistency_weight · consistency_index
//!              − (variance_penalty if response_time_variance > variance_limit))
//! ```
//!
//! With the default weights this is
//! `100 − 15·changes − 50·consistency − (20 if variance > 50000)`.
//! Scoring is pure: the same features and history always produce the same
//! report.

use serde::{Deserialize, Serialize};

use crate::config::{StabilityConfig, ThresholdConfig};
use crate::features::FeatureVector;
use crate::numeric::round1;
use crate::types::{CognitiveHistorySnapshot, StabilityLabel};

/// Drift indicators derived alongside the CSI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftFlags {
    /// Adjacent history pairs whose cognitive type differs.
    pub type_changes: usize,
    /// The two most recent snapshots disagree on the type.
    pub recent_shift: bool,
    /// The variance penalty was applied.
    pub high_timing_variance: bool,
}

impl DriftFlags {
    /// Whether any type change appears in the history.
    pub fn drift_detected(&self) -> bool {
        self.type_changes > 0
    }
}

/// Result of scoring one user's stability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    /// Unrounded index in `0.0..=base_score`.
    pub csi: f64,
    pub label: StabilityLabel,
    pub drift: DriftFlags,
}

impl StabilityReport {
    /// CSI rounded to one decimal place, for display and payloads.
    pub fn csi_display(&self) -> f64 {
        round1(self.csi)
    }
}

/// Scores the Cognitive Stability Index.
#[derive(Debug, Clone)]
pub struct StabilityScorer {
    config: StabilityConfig,
    drift_sensitivity: f64,
}

impl Default for StabilityScorer {
    fn default() -> Self {
        Self::new(StabilityConfig::default(), &ThresholdConfig::default())
    }
}

impl StabilityScorer {
    /// Create a scorer; the per-change penalty comes from the admin thresholds.
    pub fn new(config: StabilityConfig, thresholds: &ThresholdConfig) -> Self {
        Self {
            config,
            drift_sensitivity: thresholds.drift_sensitivity,
        }
    }

    /// Score features against the classification history (oldest first).
    pub fn score(
        &self,
        features: &FeatureVector,
        history: &[CognitiveHistorySnapshot],
    ) -> StabilityReport {
        let type_changes = count_type_changes(history);
        let high_timing_variance =
            features.response_time_variance as f64 > self.config.variance_limit;

        let mut csi = self.config.base_score
            - self.drift_sensitivity * type_changes as f64
            - self.config.consistency_weight * features.consistency_index;
        if high_timing_variance {
            csi -= self.config.variance_penalty;
        }
        let csi = csi.clamp(0.0, self.config.base_score.max(0.0));

        let recent_shift = history.len() >= 2
            && history[history.len() - 1].cognitive_type
                != history[history.len() - 2].cognitive_type;

        StabilityReport {
            csi,
            label: self.label_for(csi),
            drift: DriftFlags {
                type_changes,
                recent_shift,
                high_timing_variance,
            },
        }
    }

    /// Label for a CSI value. Both cutoffs are inclusive on their low side.
    pub fn label_for(&self, csi: f64) -> StabilityLabel {
        if csi >= self.config.stable_cutoff {
            StabilityLabel::Stable
        } else if csi >= self.config.moderate_cutoff {
            StabilityLabel::ModeratelyStable
        } else {
            StabilityLabel::Unstable
        }
    }
}

/// Count adjacent pairs whose cognitive type differs.
///
/// Independent of direction, so history may be in either order.
pub fn count_type_changes(history: &[CognitiveHistorySnapshot]) -> usize {
    history
        .windows(2)
        .filter(|pair| pair[0].cognitive_type != pair[1].cognitive_type)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CognitiveType;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn features(consistency: f64, variance: u64) -> FeatureVector {
        FeatureVector {
            avg_response_time_ms: 4000,
            response_time_variance: variance,
            retry_ratio: 0.0,
            error_frequency: 0.0,
            hint_usage_rate: 0.0,
            abandonment_rate: 0.0,
            overall_accuracy: 1.0,
            session_improvement_rate: 0.0,
            consistency_index: consistency,
            topic_accuracy: BTreeMap::new(),
            weak_topics: Vec::new(),
            weak_topic_count: 0,
            hesitation_burst_count: 0,
            total_attempts: 10,
            total_sessions: 2,
        }
    }

    fn history(types: &[CognitiveType]) -> Vec<CognitiveHistorySnapshot> {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        types
            .iter()
            .enumerate()
            .map(|(i, t)| CognitiveHistorySnapshot {
                cognitive_type: *t,
                confidence_score: 0.8,
                stability_index: 80.0,
                stability_label: StabilityLabel::Stable,
                feature_vector: None,
                reasoning: None,
                created_at: start + Duration::days(i as i64),
            })
            .collect()
    }

    #[test]
    fn perfect_stability_scores_base() {
        let report = StabilityScorer::default().score(&features(0.0, 0), &[]);
        assert_eq!(report.csi, 100.0);
        assert_eq!(report.label, StabilityLabel::Stable);
        assert!(!report.drift.drift_detected());
    }

    #[test]
    fn penalties_combine() {
        use CognitiveType::*;
        let history = history(&[ConceptGap, SlowAccurate, SlowAccurate, ConceptGap]);
        let report = StabilityScorer::default().score(&features(0.2, 60_000), &history);

        // 100 - 2*15 - 0.2*50 - 20
        assert!((report.csi - 40.0).abs() < 1e-9);
        assert_eq!(report.label, StabilityLabel::Unstable);
        assert_eq!(report.drift.type_changes, 2);
        assert!(report.drift.recent_shift);
        assert!(report.drift.high_timing_variance);
    }

    #[test]
    fn variance_at_limit_is_not_penalized() {
        let report = StabilityScorer::default().score(&features(0.0, 50_000), &[]);
        assert_eq!(report.csi, 100.0);
        assert!(!report.drift.high_timing_variance);
    }

    #[test]
    fn csi_is_clamped_at_zero() {
        let types: Vec<CognitiveType> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    CognitiveType::FastCareless
                } else {
                    CognitiveType::ConceptGap
                }
            })
            .collect();
        let report = StabilityScorer::default().score(&features(1.0, 90_000), &history(&types));
        assert_eq!(report.csi, 0.0);
        assert_eq!(report.label, StabilityLabel::Unstable);
    }

    #[test]
    fn label_boundaries() {
        let scorer = StabilityScorer::default();
        assert_eq!(scorer.label_for(75.0), StabilityLabel::Stable);
        assert_eq!(scorer.label_for(74.999), StabilityLabel::ModeratelyStable);
        assert_eq!(scorer.label_for(45.0), StabilityLabel::ModeratelyStable);
        assert_eq!(scorer.label_for(44.999), StabilityLabel::Unstable);
    }

    #[test]
    fn drift_sensitivity_is_injected() {
        use CognitiveType::*;
        let thresholds = ThresholdConfig {
            drift_sensitivity: 5.0,
            ..Default::default()
        };
        let scorer = StabilityScorer::new(StabilityConfig::default(), &thresholds);
        let report = scorer.score(&features(0.0, 0), &history(&[ConceptGap, SlowAccurate]));
        assert_eq!(report.csi, 95.0);
    }

    #[test]
    fn type_changes_ignore_order() {
        use CognitiveType::*;
        let mut h = history(&[ConceptGap, ConceptGap, FastAccurate, SlowAccurate]);
        assert_eq!(count_type_changes(&h), 2);
        h.reverse();
        assert_eq!(count_type_changes(&h), 2);
        assert_eq!(count_type_changes(&[]), 0);
    }

    #[test]
    fn scoring_is_idempotent() {
        use CognitiveType::*;
        let history = history(&[ConceptGap, SlowAccurate]);
        let f = features(0.137, 51_000);
        let scorer = StabilityScorer::default();
        assert_eq!(scorer.score(&f, &history), scorer.score(&f, &history));
    }
}
