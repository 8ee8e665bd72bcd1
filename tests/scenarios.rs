//! Integration tests against the public API.
//!
//! Each test exercises one full `run::<T>()` invocation rather than
//! reaching into engine internals, the way the per-module unit tests do.
//!
//! ## Test categories
//!
//! 1. Linear chain resolution and output propagation
//! 2. Independent tasks actually run concurrently, not sequentially
//! 3. Per-task output never interleaves under real concurrency

use async_trait::async_trait;
use serde_json::Value;
use taski::{run, Engine, EngineConfig, Export, RunContext, Task, TaskError};

#[derive(Clone)]
struct Text(String);

impl Export for Text {
    fn export_names(&self) -> &'static [&'static str] {
        &["value"]
    }
    fn export(&self, name: &str) -> Option<Value> {
        (name == "value").then(|| Value::String(self.0.clone()))
    }
}

#[derive(Default)]
struct Source;

#[async_trait]
impl Task for Source {
    type Output = Text;
    fn class_name() -> &'static str {
        "Source"
    }
    async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        Ok(Text("source".to_string()))
    }
}

#[derive(Default)]
struct Transform;

#[async_trait]
impl Task for Transform {
    type Output = Text;
    fn class_name() -> &'static str {
        "Transform"
    }
    async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        let source = cx.require::<Source>(Value::Null).await?;
        Ok(Text(format!("{}-transformed", source.0)))
    }
}

#[tokio::test]
async fn linear_chain_propagates_output_end_to_end() {
    let output = run::<Transform>(Value::Null).await.expect("run succeeds");
    assert_eq!(output.0, "source-transformed");
}

#[derive(Default)]
struct SleepyA;

#[async_trait]
impl Task for SleepyA {
    type Output = ();
    fn class_name() -> &'static str {
        "SleepyA"
    }
    async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok(())
    }
}

#[derive(Default)]
struct SleepyB;

#[async_trait]
impl Task for SleepyB {
    type Output = ();
    fn class_name() -> &'static str {
        "SleepyB"
    }
    async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok(())
    }
}

#[derive(Default)]
struct BothSleepers;

#[async_trait]
impl Task for BothSleepers {
    type Output = ();
    fn class_name() -> &'static str {
        "BothSleepers"
    }
    async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        let a = cx.require::<SleepyA>(Value::Null);
        let b = cx.require::<SleepyB>(Value::Null);
        let (a, b) = tokio::join!(a, b);
        a?;
        b?;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn independent_dependencies_run_concurrently_not_sequentially() {
    let start = tokio::time::Instant::now();
    run::<BothSleepers>(Value::Null).await.expect("run succeeds");
    // Both sleepers block for 100ms; if they ran sequentially this would
    // take ~200ms of virtual time instead.
    assert!(tokio::time::Instant::now() - start < std::time::Duration::from_millis(150));
}

#[derive(Default)]
struct Chatty;

#[async_trait]
impl Task for Chatty {
    type Output = ();
    fn class_name() -> &'static str {
        "Chatty"
    }
    async fn run(&self, cx: &RunContext, args: &Value) -> Result<Self::Output, TaskError> {
        let marker = args.get("marker").and_then(|v| v.as_str()).unwrap_or("?");
        for i in 0..10 {
            cx.print(format!("{marker}{i}"));
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

#[derive(Default)]
struct ChattyPair;

#[async_trait]
impl Task for ChattyPair {
    type Output = ();
    fn class_name() -> &'static str {
        "ChattyPair"
    }
    async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        let left = cx.require::<Chatty>(Value::Null);
        let right = cx.require::<Chatty>(serde_json::json!({"marker": "r"}));
        let (left, right) = tokio::join!(left, right);
        left?;
        right?;
        Ok(())
    }
}

#[tokio::test]
async fn concurrent_task_output_never_interleaves_mid_line() {
    let engine = Engine::new(EngineConfig::default());
    engine
        .run::<ChattyPair>(Value::Null)
        .await
        .expect("run succeeds");
    engine.shutdown().await;
    // Nothing to assert on directly here beyond "it completed": the
    // line-buffering guarantee that makes this safe is covered at the
    // unit level in router.rs, where the sink records each routed line.
}

static RESET_LEAF_RUNS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

#[derive(Default)]
struct ResetLeaf;

#[async_trait]
impl Task for ResetLeaf {
    type Output = Text;
    fn class_name() -> &'static str {
        "ResetLeaf"
    }
    async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        RESET_LEAF_RUNS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Text("leaf".to_string()))
    }
}

#[tokio::test]
async fn reset_then_require_again_reruns_the_task() {
    let engine = Engine::new(EngineConfig::default());
    engine.require::<ResetLeaf>(Value::Null).await.expect("first run succeeds");
    assert_eq!(RESET_LEAF_RUNS.load(std::sync::atomic::Ordering::SeqCst), 1);

    engine.clean().await;

    let identity = taski::TaskIdentity::new("ResetLeaf", Value::Null);
    engine.reset(&identity).await;
    assert!(engine.registry().get(&identity).is_none());

    engine.require::<ResetLeaf>(Value::Null).await.expect("rebuilt run succeeds");
    assert_eq!(RESET_LEAF_RUNS.load(std::sync::atomic::Ordering::SeqCst), 2);
    engine.shutdown().await;
}
