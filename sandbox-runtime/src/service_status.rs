//! Per-sandbox bring-up status (component C).
//!
//! Persisted as a JSON file inside the container at [`SERVICE_STATUS_PATH`]
//! so the host can read it even if the actor process dies. The actor is the
//! sole writer; it advances a phase by writing the whole object back
//! (rename-into-place on the worker filesystem, done by the worker's own
//! file-write contract — this module only models the value, not the write
//! mechanics, which live in [`crate::worker_client`]).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Well-known in-container path the actor writes to and the host reads from
/// via a worker `read_file` call.
pub const SERVICE_STATUS_PATH: &str = "/var/run/rock/service_status.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PhaseState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl PhaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseState::Succeeded | PhaseState::Failed)
    }
}

/// Ordered phase map with deterministic serialization (insertion order is
/// preserved by [`IndexMap`], matching the bring-up sequence
/// `image_pull -> docker_run -> gateway_ready`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStatus {
    phases: IndexMap<String, PhaseState>,
}

impl ServiceStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance `phase` to `state`. Enforces the "phases only advance"
    /// invariant: a terminal phase cannot be overwritten, and
    /// `Succeeded`/`Failed` cannot regress to `Pending`/`Running`.
    pub fn advance(&mut self, phase: &str, state: PhaseState) {
        if let Some(current) = self.phases.get(phase) {
            if current.is_terminal() {
                return;
            }
        }
        self.phases.insert(phase.to_string(), state);
    }

    pub fn phase(&self, phase: &str) -> Option<PhaseState> {
        self.phases.get(phase).copied()
    }

    pub fn phases(&self) -> &IndexMap<String, PhaseState> {
        &self.phases
    }

    /// True once every recorded phase succeeded and at least one phase exists.
    pub fn all_succeeded(&self) -> bool {
        !self.phases.is_empty() && self.phases.values().all(|s| *s == PhaseState::Succeeded)
    }

    /// True if any phase failed — a failure is terminal for the whole sandbox.
    pub fn any_failed(&self) -> bool {
        self.phases.values().any(|s| *s == PhaseState::Failed)
    }
}

/// Resolve `alive` from a `ServiceStatus` snapshot and a host-side container
/// liveness check, per the tie-break rule in §4.C: if the host-side check
/// says the container or gateway is gone, `alive = false` wins even if the
/// last observed phase was `RUNNING`.
pub fn resolve_alive(status: &ServiceStatus, host_side_alive: bool) -> bool {
    if !host_side_alive || status.any_failed() {
        return false;
    }
    status.phase("gateway_ready") == Some(PhaseState::Succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order() {
        let mut status = ServiceStatus::new();
        status.advance("image_pull", PhaseState::Running);
        status.advance("image_pull", PhaseState::Succeeded);
        status.advance("docker_run", PhaseState::Running);
        let names: Vec<_> = status.phases().keys().cloned().collect();
        assert_eq!(names, vec!["image_pull", "docker_run"]);
        assert_eq!(status.phase("image_pull"), Some(PhaseState::Succeeded));
    }

    #[test]
    fn failed_phase_is_terminal() {
        let mut status = ServiceStatus::new();
        status.advance("docker_run", PhaseState::Failed);
        status.advance("docker_run", PhaseState::Running);
        assert_eq!(status.phase("docker_run"), Some(PhaseState::Failed));
        assert!(status.any_failed());
    }

    #[test]
    fn alive_tie_break_prefers_host_side_false() {
        let mut status = ServiceStatus::new();
        status.advance("gateway_ready", PhaseState::Succeeded);
        assert!(resolve_alive(&status, true));
        assert!(!resolve_alive(&status, false));
    }
}
