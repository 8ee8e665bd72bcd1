//! The observer bus (spec §4.5): typed notifications dispatched, in
//! registration order, to every registered observer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::identity::TaskIdentity;
use crate::registry::TaskState;

/// A consumer of structured state-change notifications (spec GLOSSARY).
/// Every method has a default no-op body so observers only implement
/// what they care about — progress layouts (§4.6) implement all of them;
/// a logging-only observer might implement just `on_task_updated`.
pub trait Observer: Send + Sync {
    fn on_ready(&self, _root: &TaskIdentity) {}
    fn on_phase_started(&self, _phase: &str) {}
    fn on_phase_completed(&self, _phase: &str) {}
    fn on_task_updated(
        &self,
        _identity: &TaskIdentity,
        _prev: &TaskState,
        _next: &TaskState,
        _at: SystemTime,
    ) {
    }
    fn on_group_started(&self, _identity: &TaskIdentity, _group: &str) {}
    fn on_group_completed(&self, _identity: &TaskIdentity, _group: &str) {}
}

/// Holds the ordered observer list for one run and fans out notifications
/// to it. Every dispatch runs under a recover barrier: a panicking
/// observer is caught, logged, and dropped rather than propagated or
/// allowed to wedge the scheduler (spec §4.5).
#[derive(Default)]
pub struct ObserverBus {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observers are mutated only outside notification dispatch (spec
    /// §5); callers must not call `add_observer` from inside an observer
    /// callback.
    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.write().push(observer);
    }

    fn dispatch(&self, label: &str, f: impl Fn(&dyn Observer)) {
        let observers = self.observers.read();
        for observer in observers.iter() {
            let observer = observer.as_ref();
            let result = catch_unwind(AssertUnwindSafe(|| f(observer)));
            if let Err(panic) = result {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                tracing::error!(target: "taski::observer", notification = label, %msg, "observer panicked; dropping");
            }
        }
    }

    pub fn ready(&self, root: &TaskIdentity) {
        self.dispatch("on_ready", |o| o.on_ready(root));
    }

    pub fn phase_started(&self, phase: &str) {
        self.dispatch("on_phase_started", |o| o.on_phase_started(phase));
    }

    pub fn phase_completed(&self, phase: &str) {
        self.dispatch("on_phase_completed", |o| o.on_phase_completed(phase));
    }

    pub fn task_updated(
        &self,
        identity: &TaskIdentity,
        prev: &TaskState,
        next: &TaskState,
        at: SystemTime,
    ) {
        self.dispatch("on_task_updated", |o| {
            o.on_task_updated(identity, prev, next, at)
        });
    }

    pub fn group_started(&self, identity: &TaskIdentity, group: &str) {
        self.dispatch("on_group_started", |o| o.on_group_started(identity, group));
    }

    pub fn group_completed(&self, identity: &TaskIdentity, group: &str) {
        self.dispatch("on_group_completed", |o| {
            o.on_group_completed(identity, group)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);
    impl Observer for Counter {
        fn on_ready(&self, _root: &TaskIdentity) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicky;
    impl Observer for Panicky {
        fn on_ready(&self, _root: &TaskIdentity) {
            panic!("boom");
        }
    }

    #[test]
    fn panicking_observer_does_not_stop_the_rest() {
        let bus = ObserverBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.add_observer(Arc::new(Panicky));
        bus.add_observer(Arc::new(Counter(Arc::clone(&count))));

        let id = TaskIdentity::new("Root", json!({}));
        bus.ready(&id);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
