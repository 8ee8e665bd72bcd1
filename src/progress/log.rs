//! The `Log` layout (spec §4.6): one structured JSON line per
//! notification, for CI / non-TTY contexts. Reuses the logging facade's
//! envelope rather than printing directly, so `Log`-mode progress and
//! the event log share one sink.

use std::time::SystemTime;

use serde_json::json;

use crate::identity::TaskIdentity;
use crate::logging::emit;
use crate::observer::Observer;
use crate::registry::TaskState;

use super::ProgressLayout;

pub struct LogLayout;

impl LogLayout {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for LogLayout {
    fn on_ready(&self, root: &TaskIdentity) {
        emit("progress.ready", Some(root.class()), json!({}));
    }

    fn on_phase_started(&self, phase: &str) {
        emit("progress.phase_started", None, json!({ "phase": phase }));
    }

    fn on_phase_completed(&self, phase: &str) {
        emit("progress.phase_completed", None, json!({ "phase": phase }));
    }

    fn on_task_updated(
        &self,
        identity: &TaskIdentity,
        prev: &TaskState,
        next: &TaskState,
        _at: SystemTime,
    ) {
        emit(
            "progress.task_updated",
            Some(identity.class()),
            json!({ "prev": prev.label(), "next": next.label() }),
        );
    }

    fn on_group_started(&self, identity: &TaskIdentity, group: &str) {
        emit(
            "progress.group_started",
            Some(identity.class()),
            json!({ "group": group }),
        );
    }

    fn on_group_completed(&self, identity: &TaskIdentity, group: &str) {
        emit(
            "progress.group_completed",
            Some(identity.class()),
            json!({ "group": group }),
        );
    }
}

impl ProgressLayout for LogLayout {}
