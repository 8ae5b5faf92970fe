//! End-to-end pipeline runs against the in-memory store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use cadence_core::classifier::mock::sample_classification;
use cadence_core::classifier::{Classification, Classifier, ClassifierPayload, PredictionRequest};
use cadence_core::{
    AnalysisOutcome, Badge, BehavioralFingerprint, CadenceConfig, CadenceError, ClassifierError,
    CognitiveEvent, CognitiveEventType, CognitiveHistorySnapshot, CognitivePipeline,
    CognitiveProfile, CognitiveType, EnergyProfile, GamificationState, InMemoryStore,
    MisconceptionPattern, Prediction, ProfileStore, QuestionAttempt, QuizCompletion,
    Recommendation, SessionLog, StaticClassifier, TopicPerformance, UpcomingQuestion, UserId,
    Versioned,
};
use cadence_core::store::version_of;

const USER: &str = "a1b2c3d4-learner";

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 9, 10, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn seed(store: &InMemoryStore, attempts: usize) {
    for session in 0..2 {
        let start = at(session * 60);
        let mut log = SessionLog::start(format!("s-{session}"), USER, "algebra", start);
        let mut correct = 0;
        let per_session = attempts / 2 + attempts % 2 * (1 - session as usize);
        for i in 0..per_session {
            let is_correct = i % 3 != 2;
            correct += u32::from(is_correct);
            let mut attempt = QuestionAttempt::new(
                USER,
                format!("s-{session}"),
                if i % 2 == 0 { "algebra" } else { "fractions" },
                is_correct,
                start + Duration::minutes(i as i64 * 2),
            )
            .with_response_time(5000 + 700 * i as u64)
            .with_retries(u32::from(!is_correct));
            if !is_correct {
                attempt = attempt.with_answer(format!("wrong-{i}"));
            }
            store.record_attempt(attempt).unwrap();
        }
        log.finish(
            per_session as u32,
            correct,
            0,
            start + Duration::minutes(per_session as i64 * 2),
        );
        store.record_session(log).unwrap();
    }
}

fn pipeline(store: &Arc<InMemoryStore>, classifier: StaticClassifier) -> CognitivePipeline {
    CognitivePipeline::new(
        CadenceConfig::default(),
        store.clone(),
        store.clone(),
        Arc::new(classifier),
    )
    .unwrap()
}

fn prediction(error_probability: f64) -> Prediction {
    Prediction {
        predicted_response_time_ms: 9000,
        predicted_retry_probability: 0.4,
        predicted_error_probability: error_probability,
        predicted_mistake_type: "sign error".into(),
        predicted_hesitation_risk: 0.3,
        confidence_instability: 0.2,
    }
}

#[tokio::test]
async fn insufficient_data_writes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, 2);
    let classifier = StaticClassifier::with_type(CognitiveType::ConceptGap);
    let pipeline = pipeline(&store, classifier);
    let user = UserId::from(USER);

    let outcome = pipeline
        .analyze(&user, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        AnalysisOutcome::InsufficientData {
            available: 2,
            required: 3
        }
    ));
    assert_eq!(store.history_len(&user).unwrap(), 0);
    assert!(store.active_recommendation(&user).unwrap().is_none());
}

#[tokio::test]
async fn analysis_persists_every_result() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, 12);
    let pipeline = pipeline(&store, StaticClassifier::with_type(CognitiveType::ConceptGap));
    let user = UserId::from(USER);

    let outcome = pipeline
        .analyze(&user, &CancellationToken::new())
        .await
        .unwrap();
    let report = outcome.report().expect("analysis should complete");

    assert_eq!(report.classification.cognitive_type, CognitiveType::ConceptGap);
    assert_eq!(report.local.features.total_attempts, 12);
    assert!(report.fingerprint.fingerprint_id.starts_with("CF-A1B2C3D4-"));
    assert_eq!(report.fingerprint.cognitive_predictability_index, Some(64.0));
    assert_eq!(report.energy_profile.optimal_time_slots, vec!["late morning"]);
    assert_eq!(report.recommendation.time_limit_mode, "untimed");

    assert_eq!(store.history_len(&user).unwrap(), 1);
    assert!(store.active_recommendation(&user).unwrap().is_some());
    assert_eq!(store.events(&user).unwrap().len(), 1);
    assert_eq!(store.misconceptions(&user).unwrap().len(), 1);
    assert_eq!(store.topic_performance(&user).unwrap().len(), 2);

    let profile = store.cognitive_profile(&user).await.unwrap().unwrap();
    assert_eq!(profile.version, 1);
    assert!(profile.value.previous_types.is_empty());
}

#[tokio::test]
async fn reanalysis_preserves_fingerprint_and_tracks_type_changes() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, 12);
    let user = UserId::from(USER);
    let cancel = CancellationToken::new();

    let first = pipeline(&store, StaticClassifier::with_type(CognitiveType::ConceptGap))
        .analyze(&user, &cancel)
        .await
        .unwrap();
    let second = pipeline(&store, StaticClassifier::with_type(CognitiveType::SlowAccurate))
        .analyze(&user, &cancel)
        .await
        .unwrap();

    let first = first.report().unwrap();
    let second = second.report().unwrap();
    assert_eq!(
        first.fingerprint.fingerprint_id,
        second.fingerprint.fingerprint_id
    );

    let profile = store.cognitive_profile(&user).await.unwrap().unwrap();
    assert_eq!(profile.version, 2);
    assert_eq!(profile.value.cognitive_type, CognitiveType::SlowAccurate);
    assert_eq!(
        profile.value.previous_types[0].cognitive_type,
        CognitiveType::ConceptGap
    );

    // the second run scored against the first run's snapshot only
    assert_eq!(second.local.stability.drift.type_changes, 0);

    let recommendations = store.recommendations(&user).unwrap();
    assert_eq!(recommendations.len(), 2);
    assert_eq!(recommendations.iter().filter(|r| r.is_active).count(), 1);
    assert_eq!(store.history_len(&user).unwrap(), 2);
}

#[tokio::test]
async fn classifier_failure_is_surfaced_and_nothing_is_written() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, 10);
    let classifier = StaticClassifier::with_type(CognitiveType::ConceptGap);
    classifier.queue_error(ClassifierError::RateLimited);
    let pipeline = pipeline(&store, classifier);
    let user = UserId::from(USER);

    let err = pipeline
        .analyze(&user, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        CadenceError::Classifier(e) => assert!(e.is_rate_limited()),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.history_len(&user).unwrap(), 0);
    assert!(store.fingerprint(&user).await.unwrap().is_none());
}

#[tokio::test]
async fn out_of_range_classification_is_malformed() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, 10);
    let mut classification = sample_classification(CognitiveType::ConceptGap);
    classification.confidence_score = 1.4;
    let pipeline = pipeline(&store, StaticClassifier::new(classification));

    let err = pipeline
        .analyze(&UserId::from(USER), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CadenceError::Classifier(ClassifierError::Malformed(_))
    ));
}

#[tokio::test]
async fn cancellation_aborts_before_persisting() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, 10);
    let classifier = StaticClassifier::with_type(CognitiveType::ConceptGap)
        .with_delay(StdDuration::from_secs(30));
    let pipeline = pipeline(&store, classifier);
    let user = UserId::from(USER);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline.analyze(&user, &cancel).await.unwrap_err();

    assert!(matches!(
        err,
        CadenceError::Classifier(ClassifierError::Cancelled)
    ));
    assert_eq!(store.history_len(&user).unwrap(), 0);
}

#[tokio::test]
async fn prediction_is_best_effort() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, 10);
    let user = UserId::from(USER);
    let question = UpcomingQuestion {
        topic_id: "algebra".into(),
        difficulty_level: 3,
        has_hint: true,
    };

    let without = pipeline(&store, StaticClassifier::with_type(CognitiveType::ConceptGap));
    assert!(without.predict(&user, question.clone()).await.is_none());

    let with = pipeline(
        &store,
        StaticClassifier::with_type(CognitiveType::ConceptGap).with_prediction(prediction(0.7)),
    );
    let predicted = with.predict(&user, question.clone()).await.unwrap();
    assert_eq!(predicted.predicted_response_time_ms, 9000);

    let stranger = UserId::from("nobody");
    assert!(with.predict(&stranger, question).await.is_none());
}

#[tokio::test]
async fn correct_answer_against_pessimistic_prediction_is_a_breakthrough() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = pipeline(&store, StaticClassifier::with_type(CognitiveType::ConceptGap));
    let user = UserId::from(USER);
    let attempt = QuestionAttempt::new(USER, "s-9", "algebra", true, at(0));

    let event = pipeline
        .observe_outcome(&prediction(0.75), &attempt)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, CognitiveEventType::Breakthrough);

    let none = pipeline
        .observe_outcome(&prediction(0.2), &attempt)
        .await
        .unwrap();
    assert!(none.is_none());
    assert_eq!(store.events(&user).unwrap().len(), 1);
}

#[tokio::test]
async fn quiz_completion_extends_streak() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = pipeline(&store, StaticClassifier::with_type(CognitiveType::ConceptGap));
    let user = UserId::from(USER);
    let today = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();

    let prior = GamificationState {
        total_points: 200,
        current_streak: 3,
        longest_streak: 3,
        last_activity_date: today.pred_opt(),
        quizzes_completed: 6,
        ..GamificationState::default()
    };
    store.upsert_gamification(&user, prior, None).await.unwrap();

    let completion = QuizCompletion::new(5, 5, 75);
    let outcome = pipeline
        .record_quiz_completion(&user, &completion, today)
        .await
        .unwrap();

    assert_eq!(outcome.state.current_streak, 4);
    assert_eq!(outcome.state.longest_streak, 4);
    assert_eq!(outcome.streak_bonus, 15);
    // 75 earned + 20 perfect + 15 streak
    assert_eq!(outcome.state.total_points, 310);
    assert!(outcome.new_badges.contains(&Badge::PerfectScore));

    let stored = store.gamification(&user).await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.value, outcome.state);
}

/// Delegates to an [`InMemoryStore`], with scripted interference.
struct InterferingStore {
    inner: Arc<InMemoryStore>,
    profile_conflicts: AtomicUsize,
    rival_gamification: Mutex<Option<GamificationState>>,
}

impl InterferingStore {
    fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            profile_conflicts: AtomicUsize::new(0),
            rival_gamification: Mutex::new(None),
        }
    }

    /// Reject the next `n` cognitive profile writes.
    fn fail_profile_writes(self, n: usize) -> Self {
        self.profile_conflicts.store(n, Ordering::SeqCst);
        self
    }

    /// Write `state` right after the next gamification read.
    fn race_gamification(self, state: GamificationState) -> Self {
        *self.rival_gamification.lock().unwrap() = Some(state);
        self
    }
}

#[async_trait]
impl ProfileStore for InterferingStore {
    async fn fingerprint(
        &self,
        user_id: &UserId,
    ) -> cadence_core::Result<Option<Versioned<BehavioralFingerprint>>> {
        self.inner.fingerprint(user_id).await
    }

    async fn upsert_fingerprint(
        &self,
        user_id: &UserId,
        fingerprint: BehavioralFingerprint,
        expected_version: Option<u64>,
    ) -> cadence_core::Result<u64> {
        self.inner
            .upsert_fingerprint(user_id, fingerprint, expected_version)
            .await
    }

    async fn energy_profile(
        &self,
        user_id: &UserId,
    ) -> cadence_core::Result<Option<Versioned<EnergyProfile>>> {
        self.inner.energy_profile(user_id).await
    }

    async fn upsert_energy_profile(
        &self,
        user_id: &UserId,
        profile: EnergyProfile,
        expected_version: Option<u64>,
    ) -> cadence_core::Result<u64> {
        self.inner
            .upsert_energy_profile(user_id, profile, expected_version)
            .await
    }

    async fn cognitive_profile(
        &self,
        user_id: &UserId,
    ) -> cadence_core::Result<Option<Versioned<CognitiveProfile>>> {
        self.inner.cognitive_profile(user_id).await
    }

    async fn upsert_cognitive_profile(
        &self,
        user_id: &UserId,
        profile: CognitiveProfile,
        expected_version: Option<u64>,
    ) -> cadence_core::Result<u64> {
        let pending = self.profile_conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.profile_conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(CadenceError::PersistenceConflict {
                user_id: user_id.clone(),
                entity: "cognitive_profile",
            });
        }
        self.inner
            .upsert_cognitive_profile(user_id, profile, expected_version)
            .await
    }

    async fn gamification(
        &self,
        user_id: &UserId,
    ) -> cadence_core::Result<Option<Versioned<GamificationState>>> {
        let read = self.inner.gamification(user_id).await?;
        let rival = self.rival_gamification.lock().unwrap().take();
        if let Some(rival) = rival {
            self.inner
                .upsert_gamification(user_id, rival, version_of(&read))
                .await?;
        }
        Ok(read)
    }

    async fn upsert_gamification(
        &self,
        user_id: &UserId,
        state: GamificationState,
        expected_version: Option<u64>,
    ) -> cadence_core::Result<u64> {
        self.inner
            .upsert_gamification(user_id, state, expected_version)
            .await
    }

    async fn append_history(
        &self,
        user_id: &UserId,
        snapshot: CognitiveHistorySnapshot,
    ) -> cadence_core::Result<()> {
        self.inner.append_history(user_id, snapshot).await
    }

    async fn insert_event(&self, event: CognitiveEvent) -> cadence_core::Result<()> {
        self.inner.insert_event(event).await
    }

    async fn insert_misconception(&self, pattern: MisconceptionPattern) -> cadence_core::Result<()> {
        self.inner.insert_misconception(pattern).await
    }

    async fn replace_recommendation(&self, recommendation: Recommendation) -> cadence_core::Result<()> {
        self.inner.replace_recommendation(recommendation).await
    }

    async fn upsert_topic_performance(&self, row: TopicPerformance) -> cadence_core::Result<()> {
        self.inner.upsert_topic_performance(row).await
    }
}

fn pipeline_over(
    store: &Arc<InMemoryStore>,
    profiles: InterferingStore,
    classifier: Arc<dyn Classifier>,
) -> CognitivePipeline {
    CognitivePipeline::new(
        CadenceConfig::default(),
        store.clone(),
        Arc::new(profiles),
        classifier,
    )
    .unwrap()
}

#[tokio::test]
async fn conflicting_profile_write_leaves_no_partial_run() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, 12);
    let user = UserId::from(USER);
    let cancel = CancellationToken::new();
    let pipeline = pipeline_over(
        &store,
        InterferingStore::new(store.clone()).fail_profile_writes(1),
        Arc::new(StaticClassifier::with_type(CognitiveType::ConceptGap)),
    );

    let err = pipeline.analyze(&user, &cancel).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(store.history_len(&user).unwrap(), 0);
    assert!(store.events(&user).unwrap().is_empty());
    assert!(store.misconceptions(&user).unwrap().is_empty());
    assert!(store.topic_performance(&user).unwrap().is_empty());
    assert!(store.active_recommendation(&user).unwrap().is_none());
    assert!(store.fingerprint(&user).await.unwrap().is_none());

    let retried = pipeline.analyze(&user, &cancel).await.unwrap();
    assert!(retried.report().is_some());
    assert_eq!(store.history_len(&user).unwrap(), 1);
    assert_eq!(store.events(&user).unwrap().len(), 1);
    assert_eq!(store.recommendations(&user).unwrap().len(), 1);
    let profile = store.cognitive_profile(&user).await.unwrap().unwrap();
    assert_eq!(profile.version, 1);
}

/// Hands out scripted types in order and tracks overlapping calls.
struct SequencedClassifier {
    types: Mutex<VecDeque<CognitiveType>>,
    in_flight: AtomicUsize,
    overlapped: AtomicBool,
    history_seen: Mutex<Vec<usize>>,
}

impl SequencedClassifier {
    fn new(types: impl IntoIterator<Item = CognitiveType>) -> Self {
        Self {
            types: Mutex::new(types.into_iter().collect()),
            in_flight: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
            history_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Classifier for SequencedClassifier {
    fn name(&self) -> &str {
        "sequenced"
    }

    async fn classify(&self, payload: &ClassifierPayload) -> Result<Classification, ClassifierError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.history_seen
            .lock()
            .unwrap()
            .push(payload.cognitive_history_summary.len());
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let cognitive_type = self
            .types
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ClassifierError::Malformed("script exhausted".into()))?;
        Ok(sample_classification(cognitive_type))
    }

    async fn predict(&self, _request: &PredictionRequest) -> Result<Prediction, ClassifierError> {
        Err(ClassifierError::Malformed("no predictions".into()))
    }
}

#[tokio::test]
async fn concurrent_runs_for_one_user_are_serialized() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, 12);
    let user = UserId::from(USER);
    let cancel = CancellationToken::new();
    let classifier = Arc::new(SequencedClassifier::new([
        CognitiveType::ConceptGap,
        CognitiveType::SlowAccurate,
    ]));
    let pipeline = pipeline_over(
        &store,
        InterferingStore::new(store.clone()),
        classifier.clone(),
    );

    let (first, second) = tokio::join!(
        pipeline.analyze(&user, &cancel),
        pipeline.analyze(&user, &cancel)
    );
    assert!(first.unwrap().report().is_some());
    assert!(second.unwrap().report().is_some());

    assert!(!classifier.overlapped.load(Ordering::SeqCst));
    // the later run saw the earlier run's snapshot
    assert_eq!(*classifier.history_seen.lock().unwrap(), vec![0, 1]);

    let profile = store.cognitive_profile(&user).await.unwrap().unwrap();
    assert_eq!(profile.version, 2);
    assert_eq!(profile.value.previous_types.len(), 1);
    assert_eq!(store.history_len(&user).unwrap(), 2);
}

#[tokio::test]
async fn concurrent_quiz_completion_surfaces_conflict() {
    let store = Arc::new(InMemoryStore::new());
    let user = UserId::from(USER);
    let today = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();

    let prior = GamificationState {
        total_points: 100,
        current_streak: 2,
        longest_streak: 2,
        last_activity_date: today.pred_opt(),
        quizzes_completed: 3,
        ..GamificationState::default()
    };
    store.upsert_gamification(&user, prior, None).await.unwrap();

    let rival = GamificationState {
        total_points: 140,
        current_streak: 3,
        longest_streak: 3,
        last_activity_date: Some(today),
        quizzes_completed: 4,
        ..GamificationState::default()
    };
    let pipeline = pipeline_over(
        &store,
        InterferingStore::new(store.clone()).race_gamification(rival.clone()),
        Arc::new(StaticClassifier::with_type(CognitiveType::ConceptGap)),
    );

    let err = pipeline
        .record_quiz_completion(&user, &QuizCompletion::new(4, 5, 40), today)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let stored = store.gamification(&user).await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.value, rival);

    // a fresh call builds on the rival's write
    let outcome = pipeline
        .record_quiz_completion(&user, &QuizCompletion::new(4, 5, 40), today)
        .await
        .unwrap();
    assert_eq!(outcome.state.total_points, 180);
    assert_eq!(outcome.state.current_streak, 3);
    assert_eq!(outcome.state.quizzes_completed, 5);
}
