//! The task registry (spec §4.1): a concurrent map from identity to
//! `TaskWrapper`, plus the wrapper type itself.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::errors::TaskError;
use crate::export::Export;
use crate::identity::TaskIdentity;

/// A completed task's instance, type-erased two ways from the same
/// allocation: `export` for attribute lookup by name (spec §9's "static
/// export table"), `any` so `RunContext::require::<D>` can hand the
/// caller back a concretely-typed `Arc<D::Output>`.
#[derive(Clone)]
pub struct CompletedOutput {
    any: Arc<dyn Any + Send + Sync>,
    export: Arc<dyn Export>,
}

impl CompletedOutput {
    pub fn new<O: Export + Send + Sync + 'static>(output: O) -> Self {
        let arc = Arc::new(output);
        Self {
            any: arc.clone(),
            export: arc,
        }
    }

    pub fn downcast<O: 'static>(&self) -> Option<Arc<O>> {
        Arc::clone(&self.any).downcast::<O>().ok()
    }

    pub fn export(&self) -> &Arc<dyn Export> {
        &self.export
    }
}

/// A wrapper's type-erased `Task::clean` call, captured at creation time
/// (when `T` is still known to the generic caller) so the clean phase
/// (spec §3) can walk a heterogeneous registry without itself being
/// generic over every task class in it. Tasks are stateless dispatch
/// structs (`Default`), so there is no instance to keep alive between
/// `run` and `clean` — rebuilding `T::default()` inside the closure is
/// exactly as valid as holding on to the original.
pub type CleanFn =
    Box<dyn Fn(Option<&CompletedOutput>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A wrapper's lifecycle state (spec §3). Monotonic except the explicit
/// `pending -> ready -> running -> {completed|failed}` chain; a `reset!`
/// replaces the wrapper outright rather than rewinding its state.
#[derive(Clone)]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Completed(CompletedOutput),
    Failed(Arc<TaskError>),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed(_) | TaskState::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Completed(_) => "completed",
            TaskState::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Debug for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The engine's record of one task's state, instance, dependencies, and
/// completion latch (spec §3).
pub struct TaskWrapper {
    pub identity: TaskIdentity,
    /// `completed`/`failed` is the "latch": `tokio::sync::watch` retains
    /// its last value, so a waiter that subscribes *after* the latch
    /// fired observes the fired state immediately instead of blocking
    /// forever — exactly the "one-shot, late-joiners-see-it" semantics
    /// spec §4.1/§5 require.
    state_tx: watch::Sender<TaskState>,
    pub state_rx: watch::Receiver<TaskState>,
    pub static_deps: Vec<TaskIdentity>,
    pub dynamic_deps: Mutex<Vec<TaskIdentity>>,
    pub started_at: Mutex<Option<Instant>>,
    pub completed_at: Mutex<Option<Instant>>,
    pub group: Option<&'static str>,
    /// Set once the fiber driving this wrapper has reached a terminal
    /// state through the normal path; used to distinguish a clean
    /// terminal transition from a dropped/aborted fiber (spec §7
    /// `RunAborted`).
    pub(crate) settled: AtomicBool,
    clean: CleanFn,
}

impl TaskWrapper {
    fn new(
        identity: TaskIdentity,
        static_deps: Vec<TaskIdentity>,
        group: Option<&'static str>,
        clean: CleanFn,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(TaskState::Pending);
        Self {
            identity,
            state_tx,
            state_rx,
            static_deps,
            dynamic_deps: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
            completed_at: Mutex::new(None),
            group,
            settled: AtomicBool::new(false),
            clean,
        }
    }

    /// Run this wrapper's `Task::clean` hook (spec §3 "clean phase", §6
    /// `T.clean`), passing its completed output if it has one and `None`
    /// otherwise — "must be safe to call without prior build" (spec §9
    /// Open Question b).
    pub async fn run_clean(&self) {
        let output = match self.state() {
            TaskState::Completed(output) => Some(output),
            _ => None,
        };
        (self.clean)(output.as_ref()).await;
    }

    pub fn state(&self) -> TaskState {
        self.state_rx.borrow().clone()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        let terminal = state.is_terminal();
        let _ = self.state_tx.send(state);
        if terminal {
            self.settled.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn record_dynamic_dep(&self, dep: TaskIdentity) {
        let mut deps = self.dynamic_deps.lock();
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }

    /// The union of static and dynamic deps observed so far (spec §3
    /// "observed dependency edge set").
    pub fn observed_deps(&self) -> Vec<TaskIdentity> {
        let mut out = self.static_deps.clone();
        for dep in self.dynamic_deps.lock().iter() {
            if !out.contains(dep) {
                out.push(dep.clone());
            }
        }
        out
    }

    /// Fire the latch with `RunAborted` unless it has already settled —
    /// called from the scope guard that wraps every spawned fiber (spec
    /// §4.4 "Termination", §7 `RunAborted`).
    pub(crate) fn abort_if_unsettled(&self) {
        if !self.settled.swap(true, Ordering::SeqCst) {
            let err = TaskError::aborted(self.identity.clone());
            let _ = self.state_tx.send(TaskState::Failed(Arc::new(err)));
        }
    }
}

/// Concurrent map from identity to wrapper (spec §4.1). Backed by
/// `DashMap`, the same lock-free map the teacher uses for its provider
/// cache (`executor.rs::get_provider`) — its sharded-mutex internals
/// satisfy spec §4.1's "single internal mutex... waiters never hold the
/// registry lock" at a finer grain than a single global mutex would.
#[derive(Default)]
pub struct TaskRegistry {
    wrappers: DashMap<TaskIdentity, Arc<TaskWrapper>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic get-or-create. `created` is `true` exactly on the call that
    /// inserted the wrapper (spec §4.1). `clean` is only used on the
    /// creating call — an already-present wrapper keeps the `clean` hook
    /// captured by whichever `require::<T>()` call created it.
    pub fn get_or_create(
        &self,
        identity: TaskIdentity,
        static_deps: Vec<TaskIdentity>,
        group: Option<&'static str>,
        clean: CleanFn,
    ) -> (Arc<TaskWrapper>, bool) {
        use dashmap::mapref::entry::Entry;

        match self.wrappers.entry(identity.clone()) {
            Entry::Occupied(e) => (Arc::clone(e.get()), false),
            Entry::Vacant(e) => {
                let wrapper = Arc::new(TaskWrapper::new(identity, static_deps, group, clean));
                e.insert(Arc::clone(&wrapper));
                (wrapper, true)
            }
        }
    }

    pub fn get(&self, identity: &TaskIdentity) -> Option<Arc<TaskWrapper>> {
        self.wrappers.get(identity).map(|e| Arc::clone(e.value()))
    }

    /// A consistent point-in-time snapshot, used for the `clean` phase and
    /// for progress rendering.
    pub fn all(&self) -> Vec<Arc<TaskWrapper>> {
        self.wrappers.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Remove a wrapper, waiting for any in-flight fiber on it to reach a
    /// terminal state first so no fiber is ever orphaned (spec §4.1).
    pub async fn remove(&self, identity: &TaskIdentity) {
        if let Some(wrapper) = self.get(identity) {
            let mut rx = wrapper.state_rx.clone();
            let _ = rx.wait_for(|s| s.is_terminal()).await;
        }
        self.wrappers.remove(identity);
    }

    /// Clear the entire registry (spec §6 `Taski::Task.reset!`).
    pub fn clear(&self) {
        self.wrappers.clear();
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }
}
