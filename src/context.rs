//! `ExecutionContext` (spec §4.2): process/ambient state for one
//! top-level `run` — the observer list, the message queue, the output
//! capture lifecycle, and the fiber-local "current" slot that lets
//! library code (`taski::message`, logging) find the active run without
//! a process-wide singleton.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::errors::TaskError;
use crate::identity::TaskIdentity;
use crate::observer::ObserverBus;
use crate::router::{OutputSink, RealStdout, TaskOutputRouter, TaskWriter};
use crate::scheduler::Engine;
use crate::task::Task;

/// Ambient state shared by every fiber scheduled within one top-level
/// `run` (spec §4.2).
pub struct ExecutionContext {
    pub observers: ObserverBus,
    pub config: EngineConfig,
    messages: Mutex<VecDeque<String>>,
    router: Mutex<Option<Arc<TaskOutputRouter>>>,
    capture_active: AtomicBool,
}

impl ExecutionContext {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            observers: ObserverBus::new(),
            config,
            messages: Mutex::new(VecDeque::new()),
            router: Mutex::new(None),
            capture_active: AtomicBool::new(false),
        })
    }

    /// Swap process stdout to a router sinking to `sink` (spec §4.2
    /// "setup_output_capture").
    pub fn setup_output_capture(&self, sink: Arc<dyn OutputSink>) -> Arc<TaskOutputRouter> {
        let router = Arc::new(TaskOutputRouter::start(sink));
        *self.router.lock() = Some(Arc::clone(&router));
        self.capture_active.store(true, Ordering::SeqCst);
        router
    }

    /// Restore stdout and assert every pipe has drained (spec §4.2
    /// "teardown_output_capture").
    pub async fn teardown_output_capture(&self) {
        let router = self.router.lock().take();
        self.capture_active.store(false, Ordering::SeqCst);
        if let Some(router) = router {
            router.close_all().await;
        }
    }

    pub fn capture_active(&self) -> bool {
        self.capture_active.load(Ordering::SeqCst)
    }

    pub fn router(&self) -> Option<Arc<TaskOutputRouter>> {
        self.router.lock().clone()
    }

    /// FIFO buffer of user-facing lines that must appear after the active
    /// progress display has rendered (spec §4.2/§4.3, §8 S8).
    pub fn queue_message(&self, line: String) {
        self.messages.lock().push_back(line);
    }

    /// Drain the queue to `out`, one line per call to `out` — a second
    /// flush with nothing queued is a no-op (spec §8 S8: "a second flush
    /// yields the empty string").
    pub fn flush_messages(&self, mut out: impl FnMut(&str)) {
        let mut queue = self.messages.lock();
        while let Some(line) = queue.pop_front() {
            out(&line);
        }
    }
}

/// What a spawned fiber makes available to the task-local "current" slot:
/// enough to route a `taski::message` call and nothing that would let
/// code outside the scheduler reach into engine internals.
#[derive(Clone)]
pub(crate) struct CurrentFiber {
    pub(crate) context: Weak<ExecutionContext>,
    pub(crate) identity: TaskIdentity,
    pub(crate) writer: Arc<TaskWriter>,
}

tokio::task_local! {
    pub(crate) static CURRENT: CurrentFiber;
}

/// Degrade-gracefully version of `taski::message` used both by the free
/// function and by `RunContext::message`.
pub(crate) fn message_impl(line: String) {
    let routed = CURRENT
        .try_with(|cur| {
            if let Some(context) = cur.context.upgrade() {
                if context.capture_active() {
                    context.queue_message(line.clone());
                    return true;
                }
            }
            false
        })
        .unwrap_or(false);

    if !routed {
        println!("{line}");
    }
}

/// `Taski.message(s)` (spec §4.3): if no run is active, or capture is not
/// active, writes directly to real stdout; otherwise the line is queued
/// and released by `flush_messages` after the run's progress display has
/// stopped.
pub fn message(line: impl fmt::Display) {
    message_impl(line.to_string());
}

/// Default sink used when no progress display has been configured.
pub fn default_sink() -> Arc<dyn OutputSink> {
    Arc::new(RealStdout)
}

/// What a task's `run` sees (spec GLOSSARY: "the running/completed task
/// object" plus everything `need_dep` and `Taski.message` need). One
/// `RunContext` is built per fiber and handed to `Task::run` by
/// reference; it is the `cx` of `RunContext::require::<D>(args).await`.
pub struct RunContext {
    engine: Arc<Engine>,
    identity: TaskIdentity,
    writer: Arc<TaskWriter>,
}

impl RunContext {
    pub(crate) fn new(engine: Arc<Engine>, identity: TaskIdentity, writer: Arc<TaskWriter>) -> Self {
        Self {
            engine,
            identity,
            writer,
        }
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    /// `need_dep(D, args)` (spec §4.4 step 3): suspends this fiber at the
    /// `.await` until `D`'s wrapper reaches a terminal state, resolving
    /// or scheduling it first if this is the first request for that
    /// identity.
    pub async fn require<D: Task>(&self, args: Value) -> Result<Arc<D::Output>, TaskError> {
        self.engine.require::<D>(args).await
    }

    /// Write one line of this task's own stdout through the router
    /// (spec §4.3); silently dropped if the router has already closed,
    /// matching `TaskWriter::finish`'s tolerance for a reader that raced
    /// ahead of teardown.
    pub fn print(&self, line: impl fmt::Display) {
        let _ = self.writer.line(line);
    }

    /// `Taski.message(s)` called from inside this task (spec §4.3, §8
    /// S8).
    pub fn message(&self, line: impl fmt::Display) {
        message_impl(line.to_string());
    }
}
