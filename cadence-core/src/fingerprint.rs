//! Behavioral fingerprint signatures.
//!
//! A fingerprint is one row per user carrying timing and error signatures.
//! Its `fingerprint_id` is assigned on the first build and carried forward
//! on every later build; [`FingerprintBuilder::build`] takes the existing row
//! and only generates an id when there is none.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::{FeatureVector, response_samples};
use crate::numeric::{mean, ratio, round3, round_ms};
use crate::types::{CpiLabel, QuestionAttempt, TopicId, UserId};

const RHYTHM_LEN: usize = 20;
const RETRY_TIMING_LEN: usize = 20;
const FLUCTUATION_LEN: usize = 30;

/// One timing sample by position in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhythmPoint {
    pub index: usize,
    pub ms: u64,
}

/// Absolute distance of one response time from the window mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationPoint {
    pub index: usize,
    pub deviation: u64,
}

/// Locally computed signatures for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintSignals {
    pub response_rhythm: Vec<RhythmPoint>,
    pub retry_timing: Vec<RhythmPoint>,
    /// Incorrect attempts per topic.
    pub error_clustering: BTreeMap<TopicId, u32>,
    /// Raw hesitation burst count, the same figure the feature vector carries.
    pub hesitation_bursts: u32,
    pub total_attempts: usize,
    pub speed_fluctuation: Vec<DeviationPoint>,
}

impl FingerprintSignals {
    /// Hesitation bursts per attempt, the normalization stored on the fingerprint.
    pub fn hesitation_burst_frequency(&self) -> f64 {
        round3(ratio(
            f64::from(self.hesitation_bursts),
            self.total_attempts.max(1) as f64,
        ))
    }
}

/// Classifier-provided parts of a fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintInsight {
    pub cognitive_predictability_index: f64,
    pub cpi_label: CpiLabel,
    pub signature_summary: String,
}

/// Stored fingerprint row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralFingerprint {
    pub user_id: UserId,
    /// Assigned once; never changes for the user.
    pub fingerprint_id: String,
    pub response_rhythm_pattern: Vec<RhythmPoint>,
    pub retry_timing_pattern: Vec<RhythmPoint>,
    pub error_clustering_behavior: BTreeMap<TopicId, u32>,
    /// Normalized by total attempts.
    pub hesitation_burst_frequency: f64,
    pub speed_fluctuation_pattern: Vec<DeviationPoint>,
    #[serde(default)]
    pub cognitive_predictability_index: Option<f64>,
    #[serde(default)]
    pub cpi_label: Option<CpiLabel>,
    #[serde(default)]
    pub signature_summary: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Derives fingerprint signals and merges them into the stored row.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintBuilder;

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Compute signals from the same window the features were extracted from.
    pub fn signals(&self, attempts: &[QuestionAttempt], features: &FeatureVector) -> FingerprintSignals {
        let samples = response_samples(attempts);
        let avg = mean(&samples);

        let response_rhythm = samples
            .iter()
            .take(RHYTHM_LEN)
            .enumerate()
            .map(|(index, ms)| RhythmPoint {
                index,
                ms: round_ms(*ms),
            })
            .collect();

        let retry_timing = attempts
            .iter()
            .filter_map(QuestionAttempt::retry_timing)
            .take(RETRY_TIMING_LEN)
            .enumerate()
            .map(|(index, ms)| RhythmPoint { index, ms })
            .collect();

        let mut error_clustering: BTreeMap<TopicId, u32> = BTreeMap::new();
        for attempt in attempts.iter().filter(|a| !a.is_correct) {
            *error_clustering.entry(attempt.topic_id.clone()).or_default() += 1;
        }

        let speed_fluctuation = samples
            .iter()
            .take(FLUCTUATION_LEN)
            .enumerate()
            .map(|(index, ms)| DeviationPoint {
                index,
                deviation: round_ms((ms - avg).abs()),
            })
            .collect();

        FingerprintSignals {
            response_rhythm,
            retry_timing,
            error_clustering,
            hesitation_bursts: features.hesitation_burst_count,
            total_attempts: attempts.len(),
            speed_fluctuation,
        }
    }

    /// Merge fresh signals into the stored fingerprint.
    ///
    /// The existing `fingerprint_id` is always reused. Without a new insight
    /// the previous predictability fields are kept.
    pub fn build(
        &self,
        existing: Option<&BehavioralFingerprint>,
        user_id: &UserId,
        signals: &FingerprintSignals,
        insight: Option<&FingerprintInsight>,
        now: DateTime<Utc>,
    ) -> BehavioralFingerprint {
        let fingerprint_id = existing
            .map(|fp| fp.fingerprint_id.clone())
            .unwrap_or_else(|| generate_fingerprint_id(user_id, now));

        let (cpi, cpi_label, signature_summary) = match (insight, existing) {
            (Some(i), _) => (
                Some(i.cognitive_predictability_index),
                Some(i.cpi_label),
                Some(i.signature_summary.clone()),
            ),
            (None, Some(fp)) => (
                fp.cognitive_predictability_index,
                fp.cpi_label,
                fp.signature_summary.clone(),
            ),
            (None, None) => (None, None, None),
        };

        BehavioralFingerprint {
            user_id: user_id.clone(),
            fingerprint_id,
            response_rhythm_pattern: signals.response_rhythm.clone(),
            retry_timing_pattern: signals.retry_timing.clone(),
            error_clustering_behavior: signals.error_clustering.clone(),
            hesitation_burst_frequency: signals.hesitation_burst_frequency(),
            speed_fluctuation_pattern: signals.speed_fluctuation.clone(),
            cognitive_predictability_index: cpi,
            cpi_label,
            signature_summary,
            last_updated: now,
        }
    }
}

/// `CF-{first 8 chars of the user id}-{base36 millis}`, uppercased.
pub fn generate_fingerprint_id(user_id: &UserId, now: DateTime<Utc>) -> String {
    let prefix: String = user_id.as_str().chars().take(8).collect();
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    format!(
        "CF-{}-{}",
        prefix.to_uppercase(),
        to_base36(millis).to_uppercase()
    )
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
