//! In-memory storage for tests and offline runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{AttemptSource, ProfileStore, Versioned};
use crate::energy::EnergyProfile;
use crate::error::{CadenceError, Result};
use crate::fingerprint::BehavioralFingerprint;
use crate::gamification::GamificationState;
use crate::types::{
    CognitiveEvent, CognitiveHistorySnapshot, CognitiveProfile, MisconceptionPattern,
    QuestionAttempt, Recommendation, SessionLog, TopicId, TopicPerformance, UserId,
};

#[derive(Debug, Default)]
struct UserRows {
    attempts: Vec<QuestionAttempt>,
    sessions: Vec<SessionLog>,
    history: Vec<CognitiveHistorySnapshot>,
    fingerprint: Option<Versioned<BehavioralFingerprint>>,
    energy: Option<Versioned<EnergyProfile>>,
    profile: Option<Versioned<CognitiveProfile>>,
    gamification: Option<Versioned<GamificationState>>,
    events: Vec<CognitiveEvent>,
    misconceptions: Vec<MisconceptionPattern>,
    recommendations: Vec<Recommendation>,
    topic_performance: BTreeMap<TopicId, TopicPerformance>,
}

/// In-memory implementation of both storage traits.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<UserId, UserRows>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt.
    pub fn record_attempt(&self, attempt: QuestionAttempt) -> Result<()> {
        self.write()?
            .entry(attempt.user_id.clone())
            .or_default()
            .attempts
            .push(attempt);
        Ok(())
    }

    /// Record a session, replacing an existing one with the same id.
    pub fn record_session(&self, session: SessionLog) -> Result<()> {
        let mut users = self.write()?;
        let sessions = &mut users.entry(session.user_id.clone()).or_default().sessions;
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session,
            None => sessions.push(session),
        }
        Ok(())
    }

    /// Active recommendation of a user, if any.
    pub fn active_recommendation(&self, user_id: &UserId) -> Result<Option<Recommendation>> {
        Ok(self.with_user(user_id, |rows| {
            rows.recommendations.iter().find(|r| r.is_active).cloned()
        })?
        .flatten())
    }

    /// All recommendations of a user, oldest first.
    pub fn recommendations(&self, user_id: &UserId) -> Result<Vec<Recommendation>> {
        Ok(self
            .with_user(user_id, |rows| rows.recommendations.clone())?
            .unwrap_or_default())
    }

    pub fn events(&self, user_id: &UserId) -> Result<Vec<CognitiveEvent>> {
        Ok(self
            .with_user(user_id, |rows| rows.events.clone())?
            .unwrap_or_default())
    }

    pub fn misconceptions(&self, user_id: &UserId) -> Result<Vec<MisconceptionPattern>> {
        Ok(self
            .with_user(user_id, |rows| rows.misconceptions.clone())?
            .unwrap_or_default())
    }

    /// Topic performance rows ordered by topic.
    pub fn topic_performance(&self, user_id: &UserId) -> Result<Vec<TopicPerformance>> {
        Ok(self
            .with_user(user_id, |rows| {
                rows.topic_performance.values().cloned().collect()
            })?
            .unwrap_or_default())
    }

    /// Number of history snapshots stored for a user.
    pub fn history_len(&self, user_id: &UserId) -> Result<usize> {
        Ok(self
            .with_user(user_id, |rows| rows.history.len())?
            .unwrap_or(0))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<UserId, UserRows>>> {
        self.users
            .read()
            .map_err(|_| CadenceError::Storage("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<UserId, UserRows>>> {
        self.users
            .write()
            .map_err(|_| CadenceError::Storage("store lock poisoned".into()))
    }

    fn with_user<R>(&self, user_id: &UserId, f: impl FnOnce(&UserRows) -> R) -> Result<Option<R>> {
        Ok(self.read()?.get(user_id).map(f))
    }

    fn with_user_mut<R>(&self, user_id: &UserId, f: impl FnOnce(&mut UserRows) -> R) -> Result<R> {
        let mut users = self.write()?;
        Ok(f(users.entry(user_id.clone()).or_default()))
    }
}

/// Replace `slot` if its version matches `expected`.
fn compare_and_swap<T>(
    slot: &mut Option<Versioned<T>>,
    value: T,
    expected: Option<u64>,
    user_id: &UserId,
    entity: &'static str,
) -> Result<u64> {
    let current = slot.as_ref().map(|v| v.version);
    if current != expected {
        return Err(CadenceError::PersistenceConflict {
            user_id: user_id.clone(),
            entity,
        });
    }
    let version = current.map_or(1, |v| v + 1);
    *slot = Some(Versioned::new(version, value));
    Ok(version)
}

fn most_recent<T: Clone, K: Ord>(rows: &[T], limit: usize, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut sorted = rows.to_vec();
    sorted.sort_by_key(|row| std::cmp::Reverse(key(row)));
    sorted.truncate(limit);
    sorted
}

#[async_trait]
impl AttemptSource for InMemoryStore {
    async fn recent_attempts(&self, user_id: &UserId, limit: usize) -> Result<Vec<QuestionAttempt>> {
        Ok(self
            .with_user(user_id, |rows| {
                most_recent(&rows.attempts, limit, |a| a.attempted_at)
            })?
            .unwrap_or_default())
    }

    async fn recent_sessions(&self, user_id: &UserId, limit: usize) -> Result<Vec<SessionLog>> {
        Ok(self
            .with_user(user_id, |rows| {
                most_recent(&rows.sessions, limit, |s| s.started_at)
            })?
            .unwrap_or_default())
    }

    async fn recent_history(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<CognitiveHistorySnapshot>> {
        Ok(self
            .with_user(user_id, |rows| {
                most_recent(&rows.history, limit, |h| h.created_at)
            })?
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn fingerprint(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Versioned<BehavioralFingerprint>>> {
        Ok(self
            .with_user(user_id, |rows| rows.fingerprint.clone())?
            .flatten())
    }

    async fn upsert_fingerprint(
        &self,
        user_id: &UserId,
        fingerprint: BehavioralFingerprint,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        self.with_user_mut(user_id, |rows| {
            compare_and_swap(
                &mut rows.fingerprint,
                fingerprint,
                expected_version,
                user_id,
                "fingerprint",
            )
        })?
    }

    async fn energy_profile(&self, user_id: &UserId) -> Result<Option<Versioned<EnergyProfile>>> {
        Ok(self.with_user(user_id, |rows| rows.energy.clone())?.flatten())
    }

    async fn upsert_energy_profile(
        &self,
        user_id: &UserId,
        profile: EnergyProfile,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        self.with_user_mut(user_id, |rows| {
            compare_and_swap(
                &mut rows.energy,
                profile,
                expected_version,
                user_id,
                "energy_profile",
            )
        })?
    }

    async fn cognitive_profile(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Versioned<CognitiveProfile>>> {
        Ok(self.with_user(user_id, |rows| rows.profile.clone())?.flatten())
    }

    async fn upsert_cognitive_profile(
        &self,
        user_id: &UserId,
        profile: CognitiveProfile,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        self.with_user_mut(user_id, |rows| {
            compare_and_swap(
                &mut rows.profile,
                profile,
                expected_version,
                user_id,
                "cognitive_profile",
            )
        })?
    }

    async fn gamification(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Versioned<GamificationState>>> {
        Ok(self
            .with_user(user_id, |rows| rows.gamification.clone())?
            .flatten())
    }

    async fn upsert_gamification(
        &self,
        user_id: &UserId,
        state: GamificationState,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        self.with_user_mut(user_id, |rows| {
            compare_and_swap(
                &mut rows.gamification,
                state,
                expected_version,
                user_id,
                "gamification",
            )
        })?
    }

    async fn append_history(
        &self,
        user_id: &UserId,
        snapshot: CognitiveHistorySnapshot,
    ) -> Result<()> {
        self.with_user_mut(user_id, |rows| rows.history.push(snapshot))
    }

    async fn insert_event(&self, event: CognitiveEvent) -> Result<()> {
        let user_id = event.user_id.clone();
        self.with_user_mut(&user_id, |rows| rows.events.push(event))
    }

    async fn insert_misconception(&self, pattern: MisconceptionPattern) -> Result<()> {
        let user_id = pattern.user_id.clone();
        self.with_user_mut(&user_id, |rows| rows.misconceptions.push(pattern))
    }

    async fn replace_recommendation(&self, recommendation: Recommendation) -> Result<()> {
        let user_id = recommendation.user_id.clone();
        self.with_user_mut(&user_id, |rows| {
            for existing in rows.recommendations.iter_mut() {
                existing.is_active = false;
            }
            rows.recommendations.push(Recommendation {
                is_active: true,
                ..recommendation
            });
        })
    }

    async fn upsert_topic_performance(&self, row: TopicPerformance) -> Result<()> {
        let user_id = row.user_id.clone();
        self.with_user_mut(&user_id, |rows| {
            rows.topic_performance.insert(row.topic_id.clone(), row);
        })
    }
}
