//! Energy curve and in-session fatigue detection.
//!
//! Attempts are bucketed by local hour of day into an accuracy curve. Each of
//! the most recent sessions with enough attempts is split in half by attempt
//! time; a second half that is clearly worse marks a fatigue point at the
//! elapsed minute where the second half begins.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::EnergyAnalysis;
use crate::config::EnergyConfig;
use crate::numeric::{mean, round3};
use crate::types::{QuestionAttempt, SessionId, SessionLog, UserId};

/// Accuracy for one hour of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyCurvePoint {
    pub hour: u32,
    /// Integer percentage, 0 to 100.
    pub accuracy: u32,
    pub attempts: u32,
}

/// A session whose second half was measurably worse than its first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatiguePoint {
    pub session_id: SessionId,
    pub minute: u64,
    pub first_half_accuracy: f64,
    pub second_half_accuracy: f64,
}

/// Locally computed energy analysis for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyReport {
    pub energy_curve: Vec<EnergyCurvePoint>,
    pub best_performance_hour: u32,
    pub fatigue_points: Vec<FatiguePoint>,
    pub avg_session_fatigue_point_minutes: Option<u64>,
    /// Mean first-half minus second-half accuracy over fatigued sessions.
    pub accuracy_decay_rate: f64,
}

/// Stored energy profile row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyProfile {
    pub user_id: UserId,
    pub best_performance_hour: u32,
    #[serde(default)]
    pub avg_session_fatigue_point_minutes: Option<u64>,
    pub accuracy_decay_rate: f64,
    pub energy_curve: Vec<EnergyCurvePoint>,
    #[serde(default)]
    pub optimal_time_slots: Vec<String>,
    #[serde(default)]
    pub session_duration_recommendation_minutes: Option<u32>,
    pub last_updated: DateTime<Utc>,
}

impl EnergyProfile {
    /// Combine the local report with the classifier's energy analysis, if any.
    ///
    /// Local measurements win; the classifier fills the fatigue point when no
    /// session showed fatigue (or fatigue set in within the first minute) and supplies the decay rate when it has one.
    pub fn from_report(
        user_id: &UserId,
        report: &EnergyReport,
        analysis: Option<&EnergyAnalysis>,
        now: DateTime<Utc>,
    ) -> Self {
        let recommended = analysis.map(|a| a.recommended_session_duration_minutes);
        Self {
            user_id: user_id.clone(),
            best_performance_hour: report.best_performance_hour,
            avg_session_fatigue_point_minutes: report
                .avg_session_fatigue_point_minutes
                .filter(|minutes| *minutes > 0)
                .or(recommended.map(u64::from)),
            accuracy_decay_rate: analysis
                .and_then(|a| a.accuracy_decay_rate)
                .unwrap_or(report.accuracy_decay_rate),
            energy_curve: report.energy_curve.clone(),
            optimal_time_slots: analysis
                .map(|a| vec![a.optimal_study_time.clone()])
                .unwrap_or_default(),
            session_duration_recommendation_minutes: recommended,
            last_updated: now,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct HourBucket {
    correct: u32,
    total: u32,
}

/// Computes [`EnergyReport`]s.
#[derive(Debug, Clone)]
pub struct EnergyAnalyzer {
    config: EnergyConfig,
    fatigue_threshold: f64,
}

impl Default for EnergyAnalyzer {
    fn default() -> Self {
        Self::new(EnergyConfig::default(), 0.15)
    }
}

impl EnergyAnalyzer {
    /// `fatigue_threshold` is the admin session-fatigue threshold.
    pub fn new(config: EnergyConfig, fatigue_threshold: f64) -> Self {
        Self {
            config,
            fatigue_threshold,
        }
    }

    /// Analyze attempts and sessions, both most recent first.
    pub fn analyze(&self, attempts: &[QuestionAttempt], sessions: &[SessionLog]) -> EnergyReport {
        let (energy_curve, best_performance_hour) = self.energy_curve(attempts);
        let fatigue_points = self.fatigue_points(attempts, sessions);

        let minutes: Vec<f64> = fatigue_points.iter().map(|p| p.minute as f64).collect();
        let avg_session_fatigue_point_minutes =
            (!minutes.is_empty()).then(|| mean(&minutes).round() as u64);

        let decays: Vec<f64> = fatigue_points
            .iter()
            .map(|p| p.first_half_accuracy - p.second_half_accuracy)
            .collect();

        EnergyReport {
            energy_curve,
            best_performance_hour,
            fatigue_points,
            avg_session_fatigue_point_minutes,
            accuracy_decay_rate: round3(mean(&decays)),
        }
    }

    fn energy_curve(&self, attempts: &[QuestionAttempt]) -> (Vec<EnergyCurvePoint>, u32) {
        let mut buckets: BTreeMap<u32, HourBucket> = BTreeMap::new();
        for attempt in attempts {
            let bucket = buckets
                .entry(self.local_hour(attempt.attempted_at))
                .or_default();
            bucket.total += 1;
            if attempt.is_correct {
                bucket.correct += 1;
            }
        }

        // Strictly greater keeps the earliest hour on ties; buckets iterate in hour order.
        let mut best: Option<(u32, HourBucket)> = None;
        for (hour, bucket) in &buckets {
            let better = match best {
                None => true,
                Some((_, b)) => {
                    u64::from(bucket.correct) * u64::from(b.total)
                        > u64::from(b.correct) * u64::from(bucket.total)
                }
            };
            if better {
                best = Some((*hour, *bucket));
            }
        }

        let curve = buckets
            .into_iter()
            .map(|(hour, b)| EnergyCurvePoint {
                hour,
                accuracy: (f64::from(b.correct) / f64::from(b.total) * 100.0).round() as u32,
                attempts: b.total,
            })
            .collect();

        (
            curve,
            best.map(|(hour, _)| hour)
                .unwrap_or(self.config.default_best_hour),
        )
    }

    fn fatigue_points(
        &self,
        attempts: &[QuestionAttempt],
        sessions: &[SessionLog],
    ) -> Vec<FatiguePoint> {
        let mut points = Vec::new();
        for session in sessions.iter().take(self.config.fatigue_sessions) {
            let mut in_session: Vec<&QuestionAttempt> = attempts
                .iter()
                .filter(|a| a.session_id == session.id)
                .collect();
            if in_session.len() < self.config.min_session_attempts.max(2) {
                continue;
            }
            in_session.sort_by_key(|a| a.attempted_at);

            let half = in_session.len().div_ceil(2);
            let (first, second) = in_session.split_at(half);
            let first_acc = accuracy(first);
            let second_acc = accuracy(second);

            if second_acc < first_acc - self.fatigue_threshold {
                let elapsed = in_session[half].attempted_at - in_session[0].attempted_at;
                let minute = (elapsed.num_milliseconds().max(0) as f64 / 60_000.0).round() as u64;
                points.push(FatiguePoint {
                    session_id: session.id.clone(),
                    minute,
                    first_half_accuracy: first_acc,
                    second_half_accuracy: second_acc,
                });
            }
        }
        points
    }

    fn local_hour(&self, at: DateTime<Utc>) -> u32 {
        (at + Duration::minutes(i64::from(self.config.utc_offset_minutes))).hour()
    }
}

fn accuracy(attempts: &[&QuestionAttempt]) -> f64 {
    if attempts.is_empty() {
        return 0.0;
    }
    attempts.iter().filter(|a| a.is_correct).count() as f64 / attempts.len() as f64
}
