//! `FiberExecutor` (spec §4.4): the scheduler. Owns the registry, a
//! bounded worker pool, and the waits-on graph used for cycle detection.
//! Every task runs as a native `tokio` task; a suspension at `.await`
//! inside `Task::run` *is* the spec's `[:need_dep, ...]` yield, so there
//! is no separate fiber/coroutine runtime to implement — see
//! SPEC_FULL.md §1–3.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::config::EngineConfig;
use crate::context::{default_sink, CurrentFiber, ExecutionContext, RunContext, CURRENT};
use crate::errors::{AggregateError, CircularDependencyError, TaskError, TaskFailure};
use crate::identity::TaskIdentity;
use crate::logging::{emit, events};
use crate::observer::Observer;
use crate::progress::{self, ProgressLayout};
use crate::registry::{CleanFn, CompletedOutput, TaskRegistry, TaskState, TaskWrapper};
use crate::task::Task;

/// Default worker count: CPU count, at least one (spec §4.4 "default N
/// = CPU count or 1").
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// The scheduler (spec §4.4). One `Engine` backs one top-level `run`;
/// `require` is both the internal dependency-resolution path and the
/// implementation behind `RunContext::require`.
pub struct Engine {
    registry: TaskRegistry,
    context: Arc<ExecutionContext>,
    permits: Semaphore,
    /// `waiter -> [awaited, ...]`, every edge currently parked on by that
    /// fiber. A fiber that fans out several sibling `require()` calls
    /// concurrently (e.g. via `tokio::join!`) holds more than one edge at
    /// once, so a single `TaskIdentity` per waiter would silently drop
    /// all but the last-inserted one and let `detect_cycle` miss a cycle
    /// through the dropped edge (spec §4.4 step 3c).
    waits_on: DashMap<TaskIdentity, Vec<TaskIdentity>>,
    failures: parking_lot::Mutex<Vec<TaskFailure>>,
    /// The active progress layout, if any (spec §4.6). `None` means
    /// `TASKI_PROGRESS_MODE=plain` or an equivalent explicit disable.
    layout: Option<Arc<dyn ProgressLayout>>,
}

impl Engine {
    /// Build an idle engine. Call `add_observer` any number of times —
    /// e.g. to install an additional progress layout — before the first
    /// `run`; a router backed by `RealStdout` is installed immediately so
    /// that `Taski.message` queueing (spec §4.3, §8 S8) is well-defined
    /// even before any task has been scheduled. The default progress
    /// layout is resolved from `config` here and started immediately
    /// (spec §4.6/§6): this is the one place `TASKI_PROGRESS_MODE`/
    /// `TASKI_FORCE_PROGRESS` take effect on the real execution path.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let selected = progress::select(&config);
        let context = ExecutionContext::new(config);
        context.setup_output_capture(default_sink());

        let layout = selected.as_ref().map(|s| Arc::clone(&s.layout));
        if let Some(selected) = selected {
            context.observers.add_observer(selected.observer);
            selected.layout.start();
        }

        Arc::new(Self {
            registry: TaskRegistry::new(),
            context,
            permits: Semaphore::new(default_worker_count().max(1)),
            waits_on: DashMap::new(),
            failures: parking_lot::Mutex::new(Vec::new()),
            layout,
        })
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Register an observer for the lifetime of this engine (spec §4.5).
    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.context.observers.add_observer(observer);
    }

    /// Whether a progress layout is currently active (spec §4.6). Used by
    /// tests to confirm `TASKI_PROGRESS_MODE`/`plain` actually reach the
    /// real execution path rather than only the standalone layout types.
    pub fn has_progress_layout(&self) -> bool {
        self.layout.is_some()
    }

    /// Top-level entry point (spec §4.4 "Termination", §6 `T.run`).
    /// Schedules `T` with `args`, waits for the full transitive graph to
    /// settle, and raises `AggregateError` if anything failed. Intended
    /// to be called once per engine; scheduling a second root after the
    /// first has drained reuses the same registry, matching spec §6's
    /// `T.run` caching across separate top-level calls.
    pub async fn run<T: Task>(self: &Arc<Self>, args: Value) -> Result<Arc<T::Output>, AggregateError> {
        let root = TaskIdentity::new(T::class_name(), args.clone());
        self.context.observers.ready(&root);
        self.context.observers.phase_started("run");

        let result = self.require::<T>(args).await;

        self.context.observers.phase_completed("run");
        self.drain().await;

        let failures = std::mem::take(&mut *self.failures.lock());
        if !failures.is_empty() {
            return Err(AggregateError::new(failures));
        }

        match result {
            Ok(output) => Ok(output),
            // Every path that fails a fiber records a `TaskFailure`
            // before firing its latch, so a failed `result` with an
            // empty `failures` list would mean the scheduler itself is
            // inconsistent; kept total rather than panicking on that.
            Err(err) => Err(AggregateError::new(vec![TaskFailure {
                identity: err.identity.clone(),
                error: Arc::new(err),
                timestamp: std::time::SystemTime::now(),
            }])),
        }
    }

    /// Tear down output capture, stop the active progress layout, and
    /// flush any queued `Taski.message` lines to real stdout. Separate
    /// from `run` so a caller that keeps a progress display mounted
    /// across several `run` calls controls when teardown happens.
    pub async fn shutdown(&self) {
        if let Some(layout) = &self.layout {
            layout.stop();
        }
        self.context.teardown_output_capture().await;
        self.context.flush_messages(|line| println!("{line}"));
    }

    /// Wait for every wrapper currently in the registry to reach a
    /// terminal state (spec §4.4 "the scheduler also waits for every
    /// transitively-scheduled task").
    async fn drain(&self) {
        loop {
            let pending: Vec<_> = self
                .registry
                .all()
                .into_iter()
                .filter(|w| !w.state().is_terminal())
                .collect();
            if pending.is_empty() {
                break;
            }
            for wrapper in pending {
                let mut rx = wrapper.state_rx.clone();
                let _ = rx.wait_for(|s| s.is_terminal()).await;
            }
        }
    }

    /// Resolve a dependency on `T` with `args`, scheduling it if this is
    /// the first request for that identity (spec §4.4 steps 3a–4).
    /// Called both from `execute` (no enclosing fiber) and from
    /// `RunContext::require` (an enclosing fiber waiting on it).
    pub async fn require<T: Task>(
        self: &Arc<Self>,
        args: Value,
    ) -> Result<Arc<T::Output>, TaskError> {
        let identity = TaskIdentity::new(T::class_name(), args.clone());

        if let Some(waiter) = current_identity() {
            // A fiber requiring its own identity is the degenerate
            // one-node cycle (spec §4.4 "Reentrancy": "recursive calls
            // from the same fiber onto itself are a cycle"); waiting on
            // its own wrapper would otherwise park forever since only
            // this fiber can ever complete it.
            let cycle = if waiter == identity {
                Some(vec![waiter.class().into(), waiter.class().into()])
            } else {
                self.detect_cycle(&waiter, &identity)
            };
            if let Some(cycle) = cycle {
                let err = TaskError::circular(waiter.clone(), CircularDependencyError::new(cycle));
                emit(
                    events::DEPENDENCY_CIRCULAR,
                    Some(waiter.class()),
                    serde_json::json!({ "error": err.to_string() }),
                );
                return Err(err);
            }
            self.waits_on.entry(waiter.clone()).or_default().push(identity.clone());
            if let Some(owner) = self.registry.get(&waiter) {
                owner.record_dynamic_dep(identity.clone());
            }
        }

        let clean: CleanFn = Box::new(|output| {
            let output = output.and_then(|o| o.downcast::<T::Output>());
            Box::pin(async move {
                let instance = T::default();
                instance.clean(output.as_deref()).await;
            })
        });

        let (wrapper, created) = self.registry.get_or_create(
            identity.clone(),
            T::static_deps(),
            T::group(),
            clean,
        );

        if created {
            wrapper.set_state(TaskState::Ready);
            self.context.observers.task_updated(
                &identity,
                &TaskState::Pending,
                &TaskState::Ready,
                std::time::SystemTime::now(),
            );
            if let Some(group) = T::group() {
                self.context.observers.group_started(&identity, group);
            }
            self.spawn::<T>(Arc::clone(&wrapper), args);
        }

        let mut rx = wrapper.state_rx.clone();
        let _ = rx.wait_for(|s| s.is_terminal()).await;

        if let Some(waiter) = current_identity() {
            // Targeted removal: only the edge this call resolved. A
            // sibling `require` still in flight on the same waiter (via
            // `tokio::join!`) keeps its own edge live.
            if let Some(mut edges) = self.waits_on.get_mut(&waiter) {
                edges.retain(|e| *e != identity);
            }
        }

        match wrapper.state() {
            TaskState::Completed(output) => Ok(downcast_output::<T>(output)),
            TaskState::Failed(err) => Err((*err).clone()),
            _ => unreachable!("wait_for only returns on a terminal state"),
        }
    }

    /// Walk the waits-on graph starting at `to`; if it ever reaches
    /// `from`, resolving `from -> to` would close a cycle (spec §4.4 step
    /// 3c). `to` may itself be waiting on several dependencies at once
    /// (concurrent sibling `require` calls via `tokio::join!`), so this is
    /// a DFS over all of a node's current edges, not a single chain walk.
    /// Returns the full path on detection.
    fn detect_cycle(&self, from: &TaskIdentity, to: &TaskIdentity) -> Option<Vec<Arc<str>>> {
        let mut visited: HashSet<TaskIdentity> = HashSet::new();
        visited.insert(from.clone());
        let mut stack: Vec<(TaskIdentity, Vec<Arc<str>>)> =
            vec![(to.clone(), vec![from.class().into(), to.class().into()])];

        while let Some((cursor, path)) = stack.pop() {
            if cursor == *from {
                return Some(path);
            }
            if !visited.insert(cursor.clone()) {
                continue;
            }
            if let Some(edges) = self.waits_on.get(&cursor) {
                for next in edges.iter() {
                    let mut next_path = path.clone();
                    next_path.push(next.class().into());
                    stack.push((next.clone(), next_path));
                }
            }
        }
        None
    }

    fn spawn<T: Task>(self: &Arc<Self>, wrapper: Arc<crate::registry::TaskWrapper>, args: Value) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = engine.permits.acquire().await.expect("semaphore never closed");

            let identity = wrapper.identity.clone();
            let router = engine
                .context
                .router()
                .expect("Engine::new always installs an output router");
            let writer = Arc::new(router.start_capture(identity.clone()));

            let prev = wrapper.state();
            wrapper.set_state(TaskState::Running);
            *wrapper.started_at.lock() = Some(Instant::now());
            engine.context.observers.task_updated(
                &identity,
                &prev,
                &TaskState::Running,
                std::time::SystemTime::now(),
            );
            emit(events::TASK_STARTED, Some(identity.class()), serde_json::json!({}));

            let fiber = CurrentFiber {
                context: Arc::downgrade(&engine.context),
                identity: identity.clone(),
                writer: Arc::clone(&writer),
            };

            let task_instance = T::default();
            let cx = RunContext::new(Arc::clone(&engine), identity.clone(), Arc::clone(&writer));
            let result = CURRENT
                .scope(fiber, task_instance.run(&cx, &args))
                .await;

            writer.finish();
            *wrapper.completed_at.lock() = Some(Instant::now());
            let started = *wrapper.started_at.lock();
            let completed = *wrapper.completed_at.lock();
            let duration_ms = started
                .zip(completed)
                .map(|(s, e)| e.duration_since(s).as_secs_f64() * 1000.0)
                .unwrap_or(0.0);

            let prev = wrapper.state();
            match result {
                Ok(output) => {
                    let next = TaskState::Completed(CompletedOutput::new(output));
                    wrapper.set_state(next.clone());
                    engine.context.observers.task_updated(
                        &identity,
                        &prev,
                        &next,
                        std::time::SystemTime::now(),
                    );
                    emit(
                        events::TASK_COMPLETED,
                        Some(identity.class()),
                        serde_json::json!({ "duration_ms": duration_ms }),
                    );
                }
                Err(err) => {
                    emit(
                        events::TASK_ERROR_DETAIL,
                        Some(identity.class()),
                        serde_json::json!({ "message": err.message }),
                    );
                    let failure = TaskFailure {
                        identity: identity.clone(),
                        error: Arc::new(err.clone()),
                        timestamp: std::time::SystemTime::now(),
                    };
                    engine.failures.lock().push(failure);
                    let next = TaskState::Failed(Arc::new(err));
                    wrapper.set_state(next.clone());
                    engine.context.observers.task_updated(
                        &identity,
                        &prev,
                        &next,
                        std::time::SystemTime::now(),
                    );
                    emit(
                        events::TASK_FAILED,
                        Some(identity.class()),
                        serde_json::json!({ "duration_ms": duration_ms }),
                    );
                }
            }

            if let Some(group) = T::group() {
                engine.context.observers.group_completed(&identity, group);
            }
        });
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// The clean phase (spec §3 "Lifecycle", §6 `Taski::Task.reset!`):
    /// walk every wrapper currently in the registry in reverse
    /// topological order (dependents before their dependencies) and
    /// invoke each one's `Task::clean` hook. Does not remove wrappers —
    /// a subsequent `require` for the same identity still observes the
    /// already-completed output; pair with `reset`/`reset_all` to also
    /// forget it.
    pub async fn clean(&self) {
        emit(events::TASK_CLEAN_STARTED, None, serde_json::json!({}));
        for wrapper in reverse_topological_order(&self.registry) {
            wrapper.run_clean().await;
        }
        emit(events::TASK_CLEAN_COMPLETED, None, serde_json::json!({}));
    }

    /// `Taski::Task.reset!` on a single identity (spec §6): clean it, then
    /// remove it from the registry so the next `require` for that
    /// identity rebuilds it from scratch. Waits for an in-flight fiber to
    /// settle first (`TaskRegistry::remove`), so a reset can never orphan
    /// a still-running task.
    pub async fn reset(&self, identity: &TaskIdentity) {
        if let Some(wrapper) = self.registry.get(identity) {
            wrapper.run_clean().await;
        }
        self.registry.remove(identity).await;
    }

    /// `Taski::Task.reset!` with no argument (spec §6): clean the whole
    /// registry, then clear it.
    pub async fn reset_all(&self) {
        self.clean().await;
        self.registry.clear();
    }
}

/// Kahn's algorithm over `observed_deps()` edges, computing
/// dependency-first ("normal execution") order and then reversing it —
/// the clean phase (spec §3) needs dependents cleaned before the
/// dependencies they read from. Any wrapper not reached by the forward
/// pass (only possible if the registry somehow holds an unresolved
/// cycle, which the scheduler's own cycle detection should have already
/// rejected) is appended before reversing rather than silently dropped.
fn reverse_topological_order(registry: &TaskRegistry) -> Vec<Arc<TaskWrapper>> {
    let wrappers = registry.all();
    let mut in_degree: std::collections::HashMap<TaskIdentity, usize> =
        std::collections::HashMap::new();
    let by_identity: std::collections::HashMap<TaskIdentity, Arc<TaskWrapper>> = wrappers
        .iter()
        .map(|w| (w.identity.clone(), Arc::clone(w)))
        .collect();

    for wrapper in &wrappers {
        in_degree.entry(wrapper.identity.clone()).or_insert(0);
        for dep in wrapper.observed_deps() {
            if by_identity.contains_key(&dep) {
                *in_degree.entry(wrapper.identity.clone()).or_insert(0) += 1;
            }
        }
    }

    let mut queue: std::collections::VecDeque<TaskIdentity> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| id.clone())
        .collect();

    let mut order = Vec::with_capacity(wrappers.len());
    let mut seen: HashSet<TaskIdentity> = HashSet::new();

    while let Some(identity) = queue.pop_front() {
        if !seen.insert(identity.clone()) {
            continue;
        }
        if let Some(wrapper) = by_identity.get(&identity) {
            order.push(Arc::clone(wrapper));
        }
        for wrapper in &wrappers {
            if seen.contains(&wrapper.identity) {
                continue;
            }
            if wrapper.observed_deps().contains(&identity) {
                let deg = in_degree.entry(wrapper.identity.clone()).or_insert(0);
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    queue.push_back(wrapper.identity.clone());
                }
            }
        }
    }

    for wrapper in &wrappers {
        if seen.insert(wrapper.identity.clone()) {
            order.push(Arc::clone(wrapper));
        }
    }

    order.reverse();
    order
}

fn current_identity() -> Option<TaskIdentity> {
    CURRENT.try_with(|cur| cur.identity.clone()).ok()
}

fn downcast_output<T: Task>(output: CompletedOutput) -> Arc<T::Output> {
    output
        .downcast::<T::Output>()
        .expect("CompletedOutput type always matches the Task that produced it")
}

/// `T.run(args?)` (spec §6): build a one-shot engine from environment
/// configuration, run `T` to completion, and tear down output capture.
/// Equivalent to constructing an `Engine` directly when the caller wants
/// to install observers or reuse the registry across multiple roots.
pub async fn run<T: Task>(args: Value) -> Result<Arc<T::Output>, AggregateError> {
    let engine = Engine::new(EngineConfig::from_env());
    let result = engine.run::<T>(args).await;
    engine.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Export;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct Leaf;

    #[derive(Clone)]
    struct LeafOutput(String);
    impl Export for LeafOutput {
        fn export_names(&self) -> &'static [&'static str] {
            &["v"]
        }
        fn export(&self, name: &str) -> Option<Value> {
            (name == "v").then(|| json!(self.0))
        }
    }

    #[async_trait]
    impl Task for Leaf {
        type Output = LeafOutput;
        fn class_name() -> &'static str {
            "Leaf"
        }
        async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            Ok(LeafOutput("leaf".into()))
        }
    }

    #[derive(Default)]
    struct Chain;

    struct ChainOutput(String);
    impl Export for ChainOutput {
        fn export_names(&self) -> &'static [&'static str] {
            &["v"]
        }
        fn export(&self, name: &str) -> Option<Value> {
            (name == "v").then(|| json!(self.0))
        }
    }

    #[async_trait]
    impl Task for Chain {
        type Output = ChainOutput;
        fn class_name() -> &'static str {
            "Chain"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            let leaf = cx.require::<Leaf>(Value::Null).await?;
            Ok(ChainOutput(format!("Chain->{}", leaf.0)))
        }
    }

    #[derive(Default)]
    struct SelfRecursive;

    #[async_trait]
    impl Task for SelfRecursive {
        type Output = ();
        fn class_name() -> &'static str {
            "SelfRecursive"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            cx.require::<SelfRecursive>(Value::Null).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn dependency_chain_resolves_value() {
        let output = run::<Chain>(Value::Null).await.expect("run succeeds");
        assert_eq!(output.0, "Chain->leaf");
    }

    #[tokio::test]
    async fn same_identity_is_scheduled_once() {
        let engine = Engine::new(EngineConfig::default());
        let a = engine.require::<Leaf>(json!({"x": 1})).await.unwrap();
        let b = engine.require::<Leaf>(json!({"x": 1})).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn self_requiring_task_fails_as_circular() {
        let result = run::<SelfRecursive>(Value::Null).await;
        let err = result.expect_err("self-recursion must fail");
        assert_eq!(err.errors.len(), 1);
        assert!(err.errors[0].error.message.contains("Circular dependency detected!"));
    }

    #[derive(Default)]
    struct DiamondA;
    #[derive(Clone)]
    struct CountingOutput(i64);
    impl Export for CountingOutput {
        fn export_names(&self) -> &'static [&'static str] {
            &["n"]
        }
        fn export(&self, name: &str) -> Option<Value> {
            (name == "n").then(|| json!(self.0))
        }
    }
    #[async_trait]
    impl Task for DiamondA {
        type Output = CountingOutput;
        fn class_name() -> &'static str {
            "DiamondA"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            let shared = cx.require::<DiamondShared>(Value::Null).await?;
            Ok(CountingOutput(shared.0 + 1))
        }
    }

    #[derive(Default)]
    struct DiamondB;
    #[async_trait]
    impl Task for DiamondB {
        type Output = CountingOutput;
        fn class_name() -> &'static str {
            "DiamondB"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            let shared = cx.require::<DiamondShared>(Value::Null).await?;
            Ok(CountingOutput(shared.0 + 10))
        }
    }

    #[derive(Default)]
    struct DiamondRoot;
    #[async_trait]
    impl Task for DiamondRoot {
        type Output = CountingOutput;
        fn class_name() -> &'static str {
            "DiamondRoot"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            let a = cx.require::<DiamondA>(Value::Null).await?;
            let b = cx.require::<DiamondB>(Value::Null).await?;
            Ok(CountingOutput(a.0 + b.0))
        }
    }

    #[derive(Default)]
    struct DiamondShared;
    static SHARED_RUNS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
    #[async_trait]
    impl Task for DiamondShared {
        type Output = CountingOutput;
        fn class_name() -> &'static str {
            "DiamondShared"
        }
        async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            SHARED_RUNS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(CountingOutput(100))
        }
    }

    #[tokio::test]
    async fn diamond_shared_dependency_runs_exactly_once() {
        let output = run::<DiamondRoot>(Value::Null).await.expect("run succeeds");
        // 100+1 + 100+10 = 211, only possible if DiamondShared's output
        // was observed identically by both branches.
        assert_eq!(output.0, 211);
        assert_eq!(SHARED_RUNS.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct CycleA;
    #[async_trait]
    impl Task for CycleA {
        type Output = ();
        fn class_name() -> &'static str {
            "CycleA"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            cx.require::<CycleB>(Value::Null).await?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct CycleB;
    #[async_trait]
    impl Task for CycleB {
        type Output = ();
        fn class_name() -> &'static str {
            "CycleB"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            cx.require::<CycleA>(Value::Null).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn two_class_cycle_is_detected() {
        let result = run::<CycleA>(Value::Null).await;
        let err = result.expect_err("mutual cycle must fail");
        let message = &err.errors[0].error.message;
        assert!(message.contains("Circular dependency detected!"));
        assert!(message.contains("CycleA"));
        assert!(message.contains("CycleB"));
    }

    #[derive(Default)]
    struct Failing;
    #[async_trait]
    impl Task for Failing {
        type Output = ();
        fn class_name() -> &'static str {
            "Failing"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            Err(TaskError::new(cx.identity().clone(), "dep failed deliberately"))
        }
    }

    #[derive(Default)]
    struct DependsOnFailing;
    #[async_trait]
    impl Task for DependsOnFailing {
        type Output = ();
        fn class_name() -> &'static str {
            "DependsOnFailing"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            cx.require::<Failing>(Value::Null).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn failure_propagates_into_aggregate_error() {
        let result = run::<DependsOnFailing>(Value::Null).await;
        let err = result.expect_err("dependency failure must fail the run");
        assert!(err
            .errors
            .iter()
            .any(|f| f.error.message.contains("dep failed deliberately")));
    }

    #[derive(Default)]
    struct DynamicOnly;
    #[async_trait]
    impl Task for DynamicOnly {
        type Output = ();
        fn class_name() -> &'static str {
            "DynamicOnly"
        }
        async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Picker;
    #[async_trait]
    impl Task for Picker {
        type Output = ();
        fn class_name() -> &'static str {
            "Picker"
        }
        async fn run(&self, cx: &RunContext, args: &Value) -> Result<Self::Output, TaskError> {
            if args.get("take_branch").and_then(|v| v.as_bool()).unwrap_or(false) {
                cx.require::<DynamicOnly>(Value::Null).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn dynamic_dependency_not_declared_statically_is_still_recorded() {
        let engine = Engine::new(EngineConfig::default());
        engine
            .require::<Picker>(json!({"take_branch": true}))
            .await
            .unwrap();
        let picker_id = TaskIdentity::new("Picker", json!({"take_branch": true}));
        let wrapper = engine.registry().get(&picker_id).unwrap();
        assert!(wrapper
            .observed_deps()
            .iter()
            .any(|d| d.class() == "DynamicOnly"));
        assert!(engine
            .registry()
            .get(&TaskIdentity::new("DynamicOnly", Value::Null))
            .is_some());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn branch_not_taken_never_schedules_the_dependency() {
        let engine = Engine::new(EngineConfig::default());
        engine
            .require::<Picker>(json!({"take_branch": false}))
            .await
            .unwrap();
        assert!(engine
            .registry()
            .get(&TaskIdentity::new("DynamicOnly", Value::Null))
            .is_none());
        engine.shutdown().await;
    }

    #[derive(Default)]
    struct CleanableLeaf;
    #[derive(Clone)]
    struct CleanableOutput(i64);
    impl Export for CleanableOutput {
        fn export_names(&self) -> &'static [&'static str] {
            &["n"]
        }
        fn export(&self, name: &str) -> Option<Value> {
            (name == "n").then(|| json!(self.0))
        }
    }
    static LEAF_CLEAN_SEEN: std::sync::atomic::AtomicI64 = std::sync::atomic::AtomicI64::new(-1);
    #[async_trait]
    impl Task for CleanableLeaf {
        type Output = CleanableOutput;
        fn class_name() -> &'static str {
            "CleanableLeaf"
        }
        async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            Ok(CleanableOutput(42))
        }
        async fn clean(&self, output: Option<&Self::Output>) {
            LEAF_CLEAN_SEEN.store(output.map(|o| o.0).unwrap_or(-1), std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CleanableRoot;
    static ROOT_CLEANED_BEFORE_LEAF: std::sync::atomic::AtomicBool =
        std::sync::atomic::AtomicBool::new(false);
    #[async_trait]
    impl Task for CleanableRoot {
        type Output = ();
        fn class_name() -> &'static str {
            "CleanableRoot"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            cx.require::<CleanableLeaf>(Value::Null).await?;
            Ok(())
        }
        async fn clean(&self, _output: Option<&Self::Output>) {
            // If the leaf had already been cleaned (and thus its observed
            // output forgotten) by the time this runs, reverse-topological
            // ordering would be violated.
            ROOT_CLEANED_BEFORE_LEAF.store(
                LEAF_CLEAN_SEEN.load(std::sync::atomic::Ordering::SeqCst) == -1,
                std::sync::atomic::Ordering::SeqCst,
            );
        }
    }

    #[tokio::test]
    async fn clean_phase_invokes_completed_instance_hook_in_reverse_topological_order() {
        let engine = Engine::new(EngineConfig::default());
        engine.require::<CleanableRoot>(Value::Null).await.unwrap();
        engine.clean().await;
        assert_eq!(LEAF_CLEAN_SEEN.load(std::sync::atomic::Ordering::SeqCst), 42);
        assert!(ROOT_CLEANED_BEFORE_LEAF.load(std::sync::atomic::Ordering::SeqCst));
        engine.shutdown().await;
    }

    #[derive(Default)]
    struct FailsButCleans;
    static FAILING_CLEAN_SAW_NONE: std::sync::atomic::AtomicBool =
        std::sync::atomic::AtomicBool::new(false);
    #[async_trait]
    impl Task for FailsButCleans {
        type Output = ();
        fn class_name() -> &'static str {
            "FailsButCleans"
        }
        async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
            Err(TaskError::new(cx.identity().clone(), "deliberate failure"))
        }
        async fn clean(&self, output: Option<&Self::Output>) {
            FAILING_CLEAN_SAW_NONE.store(output.is_none(), std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn clean_receives_none_when_task_never_completed() {
        let engine = Engine::new(EngineConfig::default());
        let _ = engine.require::<FailsButCleans>(Value::Null).await;
        engine.clean().await;
        assert!(FAILING_CLEAN_SAW_NONE.load(std::sync::atomic::Ordering::SeqCst));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn reset_removes_wrapper_so_next_request_rebuilds() {
        static RUNS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
        #[derive(Default)]
        struct Counted;
        #[async_trait]
        impl Task for Counted {
            type Output = ();
            fn class_name() -> &'static str {
                "ResetCounted"
            }
            async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
                RUNS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        }

        let engine = Engine::new(EngineConfig::default());
        engine.require::<Counted>(Value::Null).await.unwrap();
        assert_eq!(RUNS.load(std::sync::atomic::Ordering::SeqCst), 1);

        let identity = TaskIdentity::new("ResetCounted", Value::Null);
        engine.reset(&identity).await;
        assert!(engine.registry().get(&identity).is_none());

        engine.require::<Counted>(Value::Null).await.unwrap();
        assert_eq!(RUNS.load(std::sync::atomic::Ordering::SeqCst), 2);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn reset_all_clears_every_wrapper() {
        let engine = Engine::new(EngineConfig::default());
        engine.require::<Leaf>(Value::Null).await.unwrap();
        engine.require::<Chain>(Value::Null).await.unwrap();
        assert!(!engine.registry().is_empty());

        engine.reset_all().await;
        assert!(engine.registry().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn progress_layout_is_wired_from_config() {
        let mut disabled = EngineConfig::default();
        disabled.progress_mode = Some(crate::config::ProgressMode::Plain);
        let engine = Engine::new(disabled);
        assert!(!engine.has_progress_layout());
        engine.shutdown().await;

        let mut enabled = EngineConfig::default();
        enabled.progress_mode = Some(crate::config::ProgressMode::Log);
        let engine = Engine::new(enabled);
        assert!(engine.has_progress_layout());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_sibling_requires_both_record_their_wait_edge() {
        // Regression test for the waits_on race: two sibling `require`
        // calls from the same fiber via `tokio::join!` must not overwrite
        // each other's edge while both are in flight.
        #[derive(Default)]
        struct SlowSibling;
        #[async_trait]
        impl Task for SlowSibling {
            type Output = ();
            fn class_name() -> &'static str {
                "SlowSibling"
            }
            async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
                tokio::task::yield_now().await;
                Ok(())
            }
        }

        #[derive(Default)]
        struct JoinsTwoSiblings;
        #[async_trait]
        impl Task for JoinsTwoSiblings {
            type Output = ();
            fn class_name() -> &'static str {
                "JoinsTwoSiblings"
            }
            async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
                let a = cx.require::<SlowSibling>(json!({"side": "a"}));
                let b = cx.require::<SlowSibling>(json!({"side": "b"}));
                let (a, b) = tokio::join!(a, b);
                a?;
                b?;
                Ok(())
            }
        }

        let output = run::<JoinsTwoSiblings>(Value::Null).await;
        assert!(output.is_ok());
    }
}
