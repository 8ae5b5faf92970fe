//! Per-user analysis pipeline.
//!
//! [`LocalAnalyzer`] runs the deterministic analyzers over an
//! [`AnalysisWindow`] with no I/O. [`CognitivePipeline`] wraps it with the
//! storage and classifier boundaries: it fetches the window, calls the
//! classifier once, and persists the merged results.
//!
//! Runs for the same user are serialized by an in-process lock. Versioned
//! rows are additionally written with compare-and-swap, so a writer in
//! another process surfaces as [`CadenceError::PersistenceConflict`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{
    Classification, Classifier, ClassifierError, ClassifierPayload, FeaturePayload, Prediction,
    PredictionRequest, UpcomingQuestion,
};
use crate::config::{CadenceConfig, ThresholdConfig};
use crate::energy::{EnergyAnalyzer, EnergyProfile, EnergyReport};
use crate::error::{CadenceError, Result};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::fingerprint::{BehavioralFingerprint, FingerprintBuilder, FingerprintSignals};
use crate::gamification::{CompletionOutcome, GamificationLedger, QuizCompletion};
use crate::insights;
use crate::stability::{StabilityReport, StabilityScorer};
use crate::store::{AttemptSource, ProfileStore, version_of};
use crate::types::{
    CognitiveEvent, CognitiveHistorySnapshot, CognitiveProfile, QuestionAttempt, Recommendation,
    SessionLog, TopicId, UserId,
};

/// Everything the analyzers read for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    /// Most recent first.
    pub attempts: Vec<QuestionAttempt>,
    /// Most recent first.
    pub sessions: Vec<SessionLog>,
    /// Oldest first.
    pub history: Vec<CognitiveHistorySnapshot>,
}

impl AnalysisWindow {
    /// Build a window from rows as the store returns them (all most recent first).
    pub fn from_recent(
        attempts: Vec<QuestionAttempt>,
        sessions: Vec<SessionLog>,
        mut history: Vec<CognitiveHistorySnapshot>,
    ) -> Self {
        history.reverse();
        Self {
            attempts,
            sessions,
            history,
        }
    }
}

/// Output of the deterministic analyzers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalAnalysis {
    pub features: FeatureVector,
    pub stability: StabilityReport,
    pub signals: FingerprintSignals,
    pub energy: EnergyReport,
    pub wrong_answer_groups: BTreeMap<TopicId, Vec<String>>,
    pub at_risk: bool,
}

impl LocalAnalysis {
    /// The merged feature payload sent to the classifier.
    pub fn payload(&self) -> FeaturePayload {
        FeaturePayload::assemble(
            &self.features,
            &self.stability,
            &self.energy,
            &self.signals,
            self.wrong_answer_groups.clone(),
            self.at_risk,
        )
    }
}

/// The analyzers, configured once.
#[derive(Debug, Clone)]
pub struct LocalAnalyzer {
    extractor: FeatureExtractor,
    scorer: StabilityScorer,
    fingerprints: FingerprintBuilder,
    energy: EnergyAnalyzer,
    thresholds: ThresholdConfig,
}

impl LocalAnalyzer {
    pub fn new(config: &CadenceConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(config.analysis.clone()),
            scorer: StabilityScorer::new(config.stability.clone(), &config.thresholds),
            fingerprints: FingerprintBuilder::new(),
            energy: EnergyAnalyzer::new(
                config.energy.clone(),
                config.thresholds.session_fatigue_threshold,
            ),
            thresholds: config.thresholds.clone(),
        }
    }

    /// Run every analyzer over the window.
    ///
    /// Fails only with [`CadenceError::InsufficientData`].
    pub fn compute(&self, window: &AnalysisWindow) -> Result<LocalAnalysis> {
        let (attempts, sessions) = self.extractor.window(&window.attempts, &window.sessions);
        let features = self.extractor.extract(attempts, sessions)?;
        let stability = self.scorer.score(&features, &window.history);
        let signals = self.fingerprints.signals(attempts, &features);
        let energy = self.energy.analyze(attempts, sessions);

        Ok(LocalAnalysis {
            wrong_answer_groups: insights::wrong_answer_groups(attempts),
            at_risk: insights::is_at_risk(&features, &self.thresholds),
            features,
            stability,
            signals,
            energy,
        })
    }

    pub fn fingerprints(&self) -> &FingerprintBuilder {
        &self.fingerprints
    }
}

/// Everything one completed analysis produced.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub user_id: UserId,
    pub classification: Classification,
    pub local: LocalAnalysis,
    pub profile: CognitiveProfile,
    pub fingerprint: BehavioralFingerprint,
    pub energy_profile: EnergyProfile,
    pub recommendation: Recommendation,
    pub events: Vec<CognitiveEvent>,
}

impl AnalysisReport {
    /// Drift reported by the classifier or seen in the local history.
    pub fn drift_detected(&self) -> bool {
        self.classification.drift_detected || self.local.stability.drift.drift_detected()
    }
}

/// Result of [`CognitivePipeline::analyze`].
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// Too few attempts; nothing was classified or written.
    InsufficientData { available: usize, required: usize },
    Completed(Box<AnalysisReport>),
}

impl AnalysisOutcome {
    pub fn report(&self) -> Option<&AnalysisReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::InsufficientData { .. } => None,
        }
    }
}

/// Orchestrates analysis runs for many users.
pub struct CognitivePipeline {
    config: CadenceConfig,
    local: LocalAnalyzer,
    ledger: GamificationLedger,
    source: Arc<dyn AttemptSource>,
    store: Arc<dyn ProfileStore>,
    classifier: Arc<dyn Classifier>,
    user_locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for CognitivePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CognitivePipeline")
            .field("classifier", &self.classifier.name())
            .finish_non_exhaustive()
    }
}

impl CognitivePipeline {
    /// Create a pipeline; the configuration is validated first.
    pub fn new(
        config: CadenceConfig,
        source: Arc<dyn AttemptSource>,
        store: Arc<dyn ProfileStore>,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            local: LocalAnalyzer::new(&config),
            ledger: GamificationLedger::new(config.gamification.clone()),
            config,
            source,
            store,
            classifier,
            user_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &CadenceConfig {
        &self.config
    }

    /// Run the deterministic analyzers over an explicit window.
    pub fn compute_local(&self, window: &AnalysisWindow) -> Result<LocalAnalysis> {
        self.local.compute(window)
    }

    /// Fetch the user's current window from the source.
    pub async fn fetch_window(&self, user_id: &UserId) -> Result<AnalysisWindow> {
        let analysis = &self.config.analysis;
        let attempts = self
            .source
            .recent_attempts(user_id, analysis.max_attempts)
            .await?;
        let sessions = self
            .source
            .recent_sessions(user_id, analysis.max_sessions)
            .await?;
        let history = self
            .source
            .recent_history(user_id, analysis.max_history)
            .await?;
        Ok(AnalysisWindow::from_recent(attempts, sessions, history))
    }

    /// Classify a user and persist the results.
    ///
    /// The classifier is called once. Cancelling `cancel` while it runs
    /// aborts the run before anything is written.
    pub async fn analyze(
        &self,
        user_id: &UserId,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome> {
        let lock = self.user_lock(user_id)?;
        let _guard = lock.lock().await;
        debug!(user_id = %user_id, classifier = self.classifier.name(), "Starting analysis");

        let window = self.fetch_window(user_id).await?;
        let local = match self.local.compute(&window) {
            Ok(local) => local,
            Err(CadenceError::InsufficientData {
                available,
                required,
            }) => {
                info!(user_id = %user_id, available, required, "Not enough attempts to analyze");
                return Ok(AnalysisOutcome::InsufficientData {
                    available,
                    required,
                });
            }
            Err(e) => return Err(e),
        };

        let payload = ClassifierPayload::new(local.payload(), &window.history);
        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(ClassifierError::Cancelled),
            result = self.classifier.classify(&payload) => {
                result.and_then(|c| c.validate().map(|()| c))
            }
        };
        let classification = result.inspect_err(|e| {
            warn!(
                user_id = %user_id,
                error = %e,
                rate_limited = e.is_rate_limited(),
                quota_exhausted = e.is_quota_exhausted(),
                "Classification failed"
            );
        })?;

        let report = self
            .persist(user_id, &window, local, payload.feature_vector, classification)
            .await
            .inspect_err(|e| {
                if e.is_conflict() {
                    warn!(user_id = %user_id, error = %e, "Concurrent write while persisting analysis");
                }
            })?;

        debug!(
            user_id = %user_id,
            cognitive_type = %report.classification.cognitive_type,
            csi = report.local.stability.csi_display(),
            "Analysis complete"
        );
        Ok(AnalysisOutcome::Completed(Box::new(report)))
    }

    /// Write one run's results.
    ///
    /// Versioned rows are read first and compare-and-swapped before any
    /// insert-only row is written. A conflict leaves no insert-only rows behind.
    async fn persist(
        &self,
        user_id: &UserId,
        window: &AnalysisWindow,
        local: LocalAnalysis,
        payload: FeaturePayload,
        classification: Classification,
    ) -> Result<AnalysisReport> {
        let now = Utc::now();
        let csi = local.stability.csi_display();
        let feature_json = serde_json::to_value(&payload)?;

        let stored_profile = self.store.cognitive_profile(user_id).await?;
        let stored_fingerprint = self.store.fingerprint(user_id).await?;
        let stored_energy = self.store.energy_profile(user_id).await?;

        let profile = CognitiveProfile::merge(
            stored_profile.as_ref().map(|v| &v.value),
            user_id,
            classification.cognitive_type,
            classification.confidence_score,
            classification.reasoning.clone(),
            feature_json.clone(),
            now,
        );
        let fingerprint = self.local.fingerprints().build(
            stored_fingerprint.as_ref().map(|v| &v.value),
            user_id,
            &local.signals,
            Some(&classification.fingerprint_insight()),
            now,
        );
        let energy_profile = EnergyProfile::from_report(
            user_id,
            &local.energy,
            Some(&classification.energy_analysis),
            now,
        );
        let recommendation = insights::recommendation(user_id, &classification, &local.features, now);
        let snapshot = CognitiveHistorySnapshot {
            cognitive_type: classification.cognitive_type,
            confidence_score: classification.confidence_score,
            stability_index: csi,
            stability_label: local.stability.label,
            feature_vector: Some(feature_json),
            reasoning: Some(classification.reasoning.clone()),
            created_at: now,
        };
        let patterns = insights::misconception_patterns(user_id, &classification, now);
        let events = insights::detected_events(user_id, &classification, csi, now);
        let (attempts, _) = self.local.extractor.window(&window.attempts, &window.sessions);
        let topic_rows = insights::topic_performance(user_id, attempts, now);

        // Versioned rows
        self.store
            .upsert_cognitive_profile(user_id, profile.clone(), version_of(&stored_profile))
            .await?;
        self.store
            .upsert_fingerprint(user_id, fingerprint.clone(), version_of(&stored_fingerprint))
            .await?;
        self.store
            .upsert_energy_profile(user_id, energy_profile.clone(), version_of(&stored_energy))
            .await?;

        // Insert-only rows
        self.store
            .replace_recommendation(recommendation.clone())
            .await?;
        self.store.append_history(user_id, snapshot).await?;
        for pattern in patterns {
            self.store.insert_misconception(pattern).await?;
        }
        for event in &events {
            self.store.insert_event(event.clone()).await?;
        }
        for row in topic_rows {
            self.store.upsert_topic_performance(row).await?;
        }

        Ok(AnalysisReport {
            user_id: user_id.clone(),
            classification,
            local,
            profile,
            fingerprint,
            energy_profile,
            recommendation,
            events,
        })
    }

    /// Best-effort shadow prediction for the upcoming question.
    ///
    /// Every failure, including too little data, yields `None`.
    pub async fn predict(&self, user_id: &UserId, question: UpcomingQuestion) -> Option<Prediction> {
        match self.try_predict(user_id, question).await {
            Ok(prediction) => Some(prediction),
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "Shadow prediction unavailable");
                None
            }
        }
    }

    async fn try_predict(&self, user_id: &UserId, question: UpcomingQuestion) -> Result<Prediction> {
        let window = self.fetch_window(user_id).await?;
        let local = self.local.compute(&window)?;
        let request = PredictionRequest {
            feature_vector: local.payload(),
            upcoming_question: question,
        };
        let prediction = self.classifier.predict(&request).await?;
        prediction.validate()?;
        Ok(prediction)
    }

    /// Compare an answered question against its shadow prediction.
    ///
    /// Records and returns a breakthrough event when one is detected.
    pub async fn observe_outcome(
        &self,
        prediction: &Prediction,
        attempt: &QuestionAttempt,
    ) -> Result<Option<CognitiveEvent>> {
        let threshold = self.config.thresholds.breakthrough_threshold;
        let Some(event) = insights::detect_breakthrough(prediction, attempt, threshold) else {
            return Ok(None);
        };
        debug!(user_id = %attempt.user_id, "Breakthrough detected");
        self.store.insert_event(event.clone()).await?;
        Ok(Some(event))
    }

    /// Apply one quiz completion to the user's gamification row.
    ///
    /// Read, reduce, then compare-and-swap. A concurrent completion surfaces
    /// as [`CadenceError::PersistenceConflict`]; retry with a fresh call.
    pub async fn record_quiz_completion(
        &self,
        user_id: &UserId,
        completion: &QuizCompletion,
        today: NaiveDate,
    ) -> Result<CompletionOutcome> {
        let existing = self.store.gamification(user_id).await?;
        let state = existing
            .as_ref()
            .map(|v| v.value.clone())
            .unwrap_or_default();

        let outcome = self.ledger.apply(&state, completion, today);
        self.store
            .upsert_gamification(user_id, outcome.state.clone(), version_of(&existing))
            .await
            .inspect_err(|e| {
                if e.is_conflict() {
                    warn!(user_id = %user_id, "Concurrent quiz completion; caller should retry");
                }
            })?;

        debug!(
            user_id = %user_id,
            points = outcome.points_awarded,
            streak = outcome.state.current_streak,
            "Quiz completion recorded"
        );
        Ok(outcome)
    }

    fn user_lock(&self, user_id: &UserId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .user_locks
            .lock()
            .map_err(|_| CadenceError::Storage("user lock table poisoned".into()))?;
        locks.retain(|id, lock| id == user_id || Arc::strong_count(lock) > 1);
        Ok(locks.entry(user_id.clone()).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::StaticClassifier;
    use crate::store::InMemoryStore;
    use crate::types::CognitiveType;
    use chrono::{DateTime, Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn window(n: usize) -> AnalysisWindow {
        let attempts = (0..n)
            .rev()
            .map(|i| {
                QuestionAttempt::new("u-1", "s-1", "algebra", i % 3 != 0, at(i as i64))
                    .with_response_time(4000 + 500 * i as u64)
            })
            .collect();
        AnalysisWindow {
            attempts,
            sessions: Vec::new(),
            history: Vec::new(),
        }
    }

    #[test]
    fn from_recent_reverses_history_only() {
        let snapshot = |t, m| CognitiveHistorySnapshot {
            cognitive_type: t,
            confidence_score: 0.5,
            stability_index: 70.0,
            stability_label: crate::types::StabilityLabel::ModeratelyStable,
            feature_vector: None,
            reasoning: None,
            created_at: at(m),
        };
        let window = AnalysisWindow::from_recent(
            Vec::new(),
            Vec::new(),
            vec![
                snapshot(CognitiveType::SlowAccurate, 2),
                snapshot(CognitiveType::ConceptGap, 1),
            ],
        );
        assert_eq!(window.history[0].cognitive_type, CognitiveType::ConceptGap);
    }

    #[test]
    fn local_analysis_is_deterministic() {
        let analyzer = LocalAnalyzer::new(&CadenceConfig::default());
        let w = window(8);
        let first = analyzer.compute(&w).unwrap();
        let second = analyzer.compute(&w).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.payload().features.total_attempts, 8);
    }

    #[test]
    fn local_analysis_rejects_tiny_windows() {
        let analyzer = LocalAnalyzer::new(&CadenceConfig::default());
        let err = analyzer.compute(&window(2)).unwrap_err();
        assert!(err.is_insufficient_data());
    }

    fn pipeline() -> CognitivePipeline {
        let store = Arc::new(InMemoryStore::new());
        CognitivePipeline::new(
            CadenceConfig::default(),
            store.clone(),
            store,
            Arc::new(StaticClassifier::with_type(CognitiveType::ConceptGap)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn user_locks_are_shared_per_user() {
        let pipeline = pipeline();

        let a = pipeline.user_lock(&UserId::from("u-1")).unwrap();
        let b = pipeline.user_lock(&UserId::from("u-1")).unwrap();
        let c = pipeline.user_lock(&UserId::from("u-2")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn idle_user_locks_are_pruned() {
        let pipeline = pipeline();

        let held = pipeline.user_lock(&UserId::from("u-1")).unwrap();
        drop(pipeline.user_lock(&UserId::from("u-2")).unwrap());
        let _third = pipeline.user_lock(&UserId::from("u-3")).unwrap();

        let locks = pipeline.user_locks.lock().unwrap();
        assert_eq!(locks.len(), 2);
        assert!(locks.contains_key(&UserId::from("u-1")));
        assert!(!locks.contains_key(&UserId::from("u-2")));
        drop(held);
    }
}
