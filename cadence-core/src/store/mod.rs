//! Storage boundary.
//!
//! The analyzers never touch storage directly. The pipeline reads a window
//! through [`AttemptSource`] and writes results through [`ProfileStore`]:
//!
//! - Per-user rows (fingerprint, energy profile, cognitive profile,
//!   gamification) are versioned. Writes are compare-and-swap against the
//!   version that was read; a stale version fails with
//!   [`CadenceError::PersistenceConflict`](crate::CadenceError::PersistenceConflict).
//! - History, events and misconceptions are insert-only.
//! - Recommendations are replaced: all active rows are deactivated before
//!   the new one is inserted.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::energy::EnergyProfile;
use crate::error::Result;
use crate::fingerprint::BehavioralFingerprint;
use crate::gamification::GamificationState;
use crate::types::{
    CognitiveEvent, CognitiveHistorySnapshot, CognitiveProfile, MisconceptionPattern,
    QuestionAttempt, Recommendation, SessionLog, TopicPerformance, UserId,
};

/// A stored row and the version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }
}

/// Version to pass as `expected_version` when writing over `row`.
pub fn version_of<T>(row: &Option<Versioned<T>>) -> Option<u64> {
    row.as_ref().map(|v| v.version)
}

/// Read-only source of telemetry and classification history.
///
/// Every method returns rows for one user, most recent first, at most `limit`.
#[async_trait]
pub trait AttemptSource: Send + Sync {
    async fn recent_attempts(&self, user_id: &UserId, limit: usize) -> Result<Vec<QuestionAttempt>>;

    async fn recent_sessions(&self, user_id: &UserId, limit: usize) -> Result<Vec<SessionLog>>;

    async fn recent_history(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<CognitiveHistorySnapshot>>;
}

/// Per-user result storage.
///
/// `expected_version` is the version previously read, or `None` when the row
/// must not exist yet. Upserts return the new version.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fingerprint(&self, user_id: &UserId)
    -> Result<Option<Versioned<BehavioralFingerprint>>>;

    async fn upsert_fingerprint(
        &self,
        user_id: &UserId,
        fingerprint: BehavioralFingerprint,
        expected_version: Option<u64>,
    ) -> Result<u64>;

    async fn energy_profile(&self, user_id: &UserId) -> Result<Option<Versioned<EnergyProfile>>>;

    async fn upsert_energy_profile(
        &self,
        user_id: &UserId,
        profile: EnergyProfile,
        expected_version: Option<u64>,
    ) -> Result<u64>;

    async fn cognitive_profile(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Versioned<CognitiveProfile>>>;

    async fn upsert_cognitive_profile(
        &self,
        user_id: &UserId,
        profile: CognitiveProfile,
        expected_version: Option<u64>,
    ) -> Result<u64>;

    async fn gamification(&self, user_id: &UserId)
    -> Result<Option<Versioned<GamificationState>>>;

    async fn upsert_gamification(
        &self,
        user_id: &UserId,
        state: GamificationState,
        expected_version: Option<u64>,
    ) -> Result<u64>;

    /// Append a classification snapshot.
    async fn append_history(&self, user_id: &UserId, snapshot: CognitiveHistorySnapshot)
    -> Result<()>;

    async fn insert_event(&self, event: CognitiveEvent) -> Result<()>;

    async fn insert_misconception(&self, pattern: MisconceptionPattern) -> Result<()>;

    /// Deactivate every active recommendation of the user, then insert this one.
    async fn replace_recommendation(&self, recommendation: Recommendation) -> Result<()>;

    /// Upsert by (user, topic).
    async fn upsert_topic_performance(&self, row: TopicPerformance) -> Result<()>;
}
