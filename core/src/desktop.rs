//! Desktop action gate: every UI automation request passes the mission's
//! capability predicate before the backend is invoked. A denied action
//! never reaches the automation layer.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use outpost_protocol::DesktopRequest;
use outpost_protocol::DesktopResult;

use crate::config::AgentConfig;
use crate::error::Result;
use crate::permissions::PermissionSet;
use crate::store::MissionStore;

/// Backend that actually drives the desktop. Implementations live outside
/// this crate; the gate only cares that a call either yields a payload or
/// an error.
#[async_trait]
pub trait DesktopAutomation: Send + Sync {
    async fn perform(
        &self,
        action: &outpost_protocol::DesktopAction,
    ) -> Result<Option<serde_json::Value>>;
}

pub struct DesktopGate {
    config: AgentConfig,
    store: Arc<dyn MissionStore>,
    automation: Arc<dyn DesktopAutomation>,
}

impl DesktopGate {
    pub fn new(
        config: AgentConfig,
        store: Arc<dyn MissionStore>,
        automation: Arc<dyn DesktopAutomation>,
    ) -> Self {
        Self {
            config,
            store,
            automation,
        }
    }

    /// Check the mission's capability flags and, only if they hold, invoke
    /// the backend once. No retries: a flaky click is the caller's problem
    /// to re-issue.
    pub async fn dispatch(&self, request: DesktopRequest) -> DesktopResult {
        let started = Instant::now();

        let mission = match self.store.get_mission(&request.mission_id).await {
            Ok(mission) => mission,
            Err(err) => return self.failure(&request, started, err.to_string()),
        };
        let perms = PermissionSet::resolve(&mission, &self.config);

        if let Err(reason) = perms.check_capability(request.action.capability()) {
            tracing::warn!(
                mission = %request.mission_id,
                action = request.action.name(),
                "desktop action denied: {reason}"
            );
            return self.failure(&request, started, reason);
        }

        match self.automation.perform(&request.action).await {
            Ok(data) => DesktopResult {
                request_id: request.id.clone(),
                mission_id: request.mission_id.clone(),
                action: request.action.name().to_string(),
                success: true,
                data,
                error: None,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(err) => self.failure(&request, started, err.to_string()),
        }
    }

    fn failure(&self, request: &DesktopRequest, started: Instant, error: String) -> DesktopResult {
        DesktopResult {
            request_id: request.id.clone(),
            mission_id: request.mission_id.clone(),
            action: request.action.name().to_string(),
            success: false,
            data: None,
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Mutex;

    use outpost_protocol::DesktopAction;
    use outpost_protocol::Mission;
    use pretty_assertions::assert_eq;

    use crate::store::InMemoryMissionStore;

    /// Records every action that reaches the backend.
    #[derive(Default)]
    struct RecordingAutomation {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DesktopAutomation for RecordingAutomation {
        async fn perform(
            &self,
            action: &DesktopAction,
        ) -> Result<Option<serde_json::Value>> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(action.name().to_string());
            Ok(Some(serde_json::json!({ "ok": true })))
        }
    }

    fn gate_with(mission: Mission) -> (DesktopGate, Arc<RecordingAutomation>) {
        let store = Arc::new(InMemoryMissionStore::new());
        store.upsert(mission);
        let automation = Arc::new(RecordingAutomation::default());
        let gate = DesktopGate::new(AgentConfig::default(), store, Arc::clone(&automation) as _);
        (gate, automation)
    }

    fn request(mission: &str, action: DesktopAction) -> DesktopRequest {
        DesktopRequest {
            id: "req-1".to_string(),
            mission_id: outpost_protocol::MissionId::new(mission),
            action,
        }
    }

    #[tokio::test]
    async fn read_only_action_reaches_the_backend() {
        let (gate, automation) = gate_with(Mission::new("m1", "test"));
        let result = gate
            .dispatch(request("m1", DesktopAction::Screenshot { region: None }))
            .await;
        assert!(result.success);
        assert_eq!(result.action, "screenshot");
        assert_eq!(automation.calls.lock().unwrap().as_slice(), ["screenshot"]);
    }

    #[tokio::test]
    async fn safe_only_denies_input_without_invoking_backend() {
        let mut mission = Mission::new("m1", "test");
        mission.safe_only = true;
        let (gate, automation) = gate_with(mission);

        let result = gate
            .dispatch(request("m1", DesktopAction::Click { x: 10, y: 20 }))
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("safe_only"));
        assert!(automation.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn window_mgmt_flag_gates_focus() {
        let mut mission = Mission::new("m1", "test");
        mission.allow_window_mgmt = false;
        let (gate, automation) = gate_with(mission);

        let result = gate
            .dispatch(request(
                "m1",
                DesktopAction::FocusWindow {
                    title: "editor".to_string(),
                },
            ))
            .await;
        assert!(!result.success);
        assert!(automation.calls.lock().unwrap().is_empty());

        // Read-only enumeration is still fine on the same mission.
        let result = gate.dispatch(request("m1", DesktopAction::ListWindows)).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn unknown_mission_fails_closed() {
        let (gate, automation) = gate_with(Mission::new("m1", "test"));
        let result = gate
            .dispatch(request("ghost", DesktopAction::CursorPosition))
            .await;
        assert!(!result.success);
        assert!(automation.calls.lock().unwrap().is_empty());
    }
}
