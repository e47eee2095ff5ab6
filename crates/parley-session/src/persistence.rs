use crate::state::SessionData;
use parley_bus::{session_key, Bus, SESSION_LIST_KEY};
use parley_core::{ParleyError, ParleyResult};
use std::sync::Arc;
use tracing::{debug, error, info};

/// JSON snapshot persistence: `session:<id>` in the bus KV store plus
/// membership of the `sessions:list` set.
#[derive(Clone)]
pub struct SessionStore {
    bus: Arc<dyn Bus>,
}

impl SessionStore {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    pub async fn save(&self, data: &SessionData) -> ParleyResult<()> {
        let payload = serde_json::to_string(data)?;
        self.bus.kv_set(&session_key(&data.id), &payload).await?;
        self.bus.set_add(SESSION_LIST_KEY, &data.id).await?;
        debug!(session_id = %data.id, "session snapshot saved");
        Ok(())
    }

    pub async fn load(&self, session_id: &str) -> ParleyResult<SessionData> {
        let raw = self
            .bus
            .kv_get(&session_key(session_id))
            .await?
            .ok_or_else(|| ParleyError::NotFound(format!("session {}", session_id)))?;
        serde_json::from_str(&raw)
            .map_err(|e| ParleyError::Session(format!("corrupt snapshot for {}: {}", session_id, e)))
    }

    /// Loads every session in the live set. Individual failures are logged
    /// and skipped so one corrupt snapshot cannot poison the batch.
    pub async fn load_all(&self) -> ParleyResult<Vec<SessionData>> {
        let ids = self.bus.set_members(SESSION_LIST_KEY).await?;
        let mut sessions = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.load(id).await {
                Ok(data) => sessions.push(data),
                Err(e) => error!(session_id = %id, error = %e, "failed to load session"),
            }
        }
        info!(loaded = sessions.len(), total = ids.len(), "sessions restored");
        Ok(sessions)
    }

    pub async fn delete(&self, session_id: &str) -> ParleyResult<()> {
        self.bus.kv_del(&session_key(session_id)).await?;
        self.bus.set_remove(SESSION_LIST_KEY, session_id).await?;
        debug!(session_id = %session_id, "session snapshot deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionState;
    use parley_bus::MemoryBus;
    use parley_modes::{ModeConfig, ModeState};

    fn sample(id: &str) -> SessionData {
        SessionData::from_state(
            &SessionState::new(id),
            "free_discussion".into(),
            ModeConfig::named("free_discussion"),
            ModeState::fresh(),
        )
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let store = SessionStore::new(Arc::new(MemoryBus::new()));
        store.save(&sample("sess_1")).await.unwrap();

        let loaded = store.load("sess_1").await.unwrap();
        assert_eq!(loaded.id, "sess_1");

        store.delete("sess_1").await.unwrap();
        assert!(store.load("sess_1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_load_all_isolates_corrupt_snapshots() {
        let bus = Arc::new(MemoryBus::new());
        let store = SessionStore::new(bus.clone());
        store.save(&sample("sess_ok")).await.unwrap();

        // A registered id whose snapshot is garbage must not poison the rest.
        bus.kv_set(&session_key("sess_bad"), "{garbage").await.unwrap();
        bus.set_add(SESSION_LIST_KEY, "sess_bad").await.unwrap();

        let sessions = store.load_all().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "sess_ok");
    }

    #[tokio::test]
    async fn test_save_registers_in_live_set() {
        let bus = Arc::new(MemoryBus::new());
        let store = SessionStore::new(bus.clone());
        store.save(&sample("sess_1")).await.unwrap();
        store.save(&sample("sess_1")).await.unwrap();
        let members = bus.set_members(SESSION_LIST_KEY).await.unwrap();
        assert_eq!(members, vec!["sess_1"]);
    }
}
