//! Mission store contract. Missions are owned by an external manager; the
//! core only fetches them by id and appends history entries.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use outpost_protocol::HistoryEntry;
use outpost_protocol::Mission;
use outpost_protocol::MissionId;

use crate::error::AgentErr;
use crate::error::Result;

#[async_trait]
pub trait MissionStore: Send + Sync {
    /// Fetch a mission by id. Fetched fresh for every request; the core
    /// never caches mission data across requests.
    async fn get_mission(&self, id: &MissionId) -> Result<Mission>;

    /// Append one audit entry to the mission's command history.
    ///
    /// A failure here is fatal for admission: the manager stops accepting
    /// new sessions until the store recovers.
    async fn append_history(&self, id: &MissionId, entry: HistoryEntry) -> Result<()>;
}

/// In-memory store for embedding and tests.
#[derive(Default)]
pub struct InMemoryMissionStore {
    inner: Mutex<HashMap<MissionId, MissionRecord>>,
}

struct MissionRecord {
    mission: Mission,
    history: Vec<HistoryEntry>,
}

impl InMemoryMissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a mission, keeping any existing history.
    pub fn upsert(&self, mission: Mission) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get_mut(&mission.id) {
            Some(record) => record.mission = mission,
            None => {
                inner.insert(
                    mission.id.clone(),
                    MissionRecord {
                        mission,
                        history: Vec::new(),
                    },
                );
            }
        }
    }

    pub fn remove(&self, id: &MissionId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(id);
    }

    pub fn history(&self, id: &MissionId) -> Vec<HistoryEntry> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .get(id)
            .map(|record| record.history.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MissionStore for InMemoryMissionStore {
    async fn get_mission(&self, id: &MissionId) -> Result<Mission> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .get(id)
            .map(|record| record.mission.clone())
            .ok_or_else(|| AgentErr::MissionNotFound(id.clone()))
    }

    async fn append_history(&self, id: &MissionId, entry: HistoryEntry) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let record = inner
            .get_mut(id)
            .ok_or_else(|| AgentErr::MissionNotFound(id.clone()))?;
        record.history.push(entry);
        Ok(())
    }
}
