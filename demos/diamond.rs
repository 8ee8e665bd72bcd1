//! A diamond dependency graph: `Root` requires both `Left` and `Right`,
//! each of which requires the same `Shared` task. `Shared` still runs
//! exactly once — both branches observe the one completed instance.

use async_trait::async_trait;
use serde_json::Value;
use taski::{Engine, EngineConfig, Export, RunContext, Task, TaskError};

#[derive(Clone)]
struct Count(i64);

impl Export for Count {
    fn export_names(&self) -> &'static [&'static str] {
        &["n"]
    }
    fn export(&self, name: &str) -> Option<Value> {
        (name == "n").then(|| Value::from(self.0))
    }
}

#[derive(Default)]
struct Shared;

#[async_trait]
impl Task for Shared {
    type Output = Count;
    fn class_name() -> &'static str {
        "Shared"
    }
    async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        cx.print("Shared running (should happen exactly once)");
        Ok(Count(1))
    }
    async fn clean(&self, output: Option<&Self::Output>) {
        match output {
            Some(count) => println!("Shared cleaned (last value was {})", count.0),
            None => println!("Shared cleaned (never completed)"),
        }
    }
}

#[derive(Default)]
struct Left;

#[async_trait]
impl Task for Left {
    type Output = Count;
    fn class_name() -> &'static str {
        "Left"
    }
    async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        let shared = cx.require::<Shared>(Value::Null).await?;
        Ok(Count(shared.0 + 10))
    }
}

#[derive(Default)]
struct Right;

#[async_trait]
impl Task for Right {
    type Output = Count;
    fn class_name() -> &'static str {
        "Right"
    }
    async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        let shared = cx.require::<Shared>(Value::Null).await?;
        Ok(Count(shared.0 + 100))
    }
}

#[derive(Default)]
struct Root;

#[async_trait]
impl Task for Root {
    type Output = Count;
    fn class_name() -> &'static str {
        "Root"
    }
    async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        let left = cx.require::<Left>(Value::Null).await?;
        let right = cx.require::<Right>(Value::Null).await?;
        Ok(Count(left.0 + right.0))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Built directly rather than via the `run::<T>()` free function so
    // this demo can also exercise the clean phase and a targeted reset
    // after the graph has settled.
    let engine = Engine::new(EngineConfig::from_env());
    let output = engine.run::<Root>(Value::Null).await?;
    println!("result: {}", output.0);

    engine.clean().await;

    let shared = taski::TaskIdentity::new("Shared", Value::Null);
    engine.reset(&shared).await;
    println!("Shared reset: a subsequent require would rebuild it from scratch");

    engine.shutdown().await;
    Ok(())
}
