//! JSON snapshot of one user's telemetry.

use std::path::Path;

use anyhow::{Context, Result, bail};
use cadence_core::store::ProfileStore;
use cadence_core::{
    AnalysisWindow, CognitiveHistorySnapshot, InMemoryStore, QuestionAttempt, SessionLog, UserId,
};
use serde::Deserialize;

/// Attempts, sessions and history for one user, in any order.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub user_id: Option<UserId>,
    pub attempts: Vec<QuestionAttempt>,
    pub sessions: Vec<SessionLog>,
    pub history: Vec<CognitiveHistorySnapshot>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))
    }

    /// The user to analyze: `requested`, else the snapshot's own user id,
    /// else the only user present in the attempts.
    pub fn resolve_user(&self, requested: Option<&str>) -> Result<UserId> {
        if let Some(id) = requested {
            return Ok(UserId::from(id));
        }
        if let Some(id) = &self.user_id {
            return Ok(id.clone());
        }
        let mut users: Vec<&UserId> = self.attempts.iter().map(|a| &a.user_id).collect();
        users.sort();
        users.dedup();
        match users.as_slice() {
            [only] => Ok((*only).clone()),
            [] => bail!("Snapshot has no attempts; pass --user"),
            _ => bail!("Snapshot holds {} users; pass --user", users.len()),
        }
    }

    /// The analysis window for one user, ordered the way the analyzers expect.
    pub fn window_for(&self, user_id: &UserId) -> AnalysisWindow {
        let mut attempts: Vec<QuestionAttempt> = self
            .attempts
            .iter()
            .filter(|a| &a.user_id == user_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| std::cmp::Reverse(a.attempted_at));

        let mut sessions: Vec<SessionLog> = self
            .sessions
            .iter()
            .filter(|s| &s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.started_at));

        let mut history = self.history.clone();
        history.sort_by_key(|h| h.created_at);

        AnalysisWindow {
            attempts,
            sessions,
            history,
        }
    }

    /// Load the snapshot into a fresh in-memory store.
    pub async fn seed(&self, user_id: &UserId) -> Result<InMemoryStore> {
        let store = InMemoryStore::new();
        for attempt in &self.attempts {
            store.record_attempt(attempt.clone())?;
        }
        for session in &self.sessions {
            store.record_session(session.clone())?;
        }
        for snapshot in &self.history {
            store.append_history(user_id, snapshot.clone()).await?;
        }
        Ok(store)
    }
}
