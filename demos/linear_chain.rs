//! Three tasks in a straight line: `C` requires `B` requires `A`. Each
//! prints its own name as it runs; the router it prints through keeps
//! that output from interleaving even though every task shares the same
//! worker pool.

use async_trait::async_trait;
use serde_json::Value;
use taski::{run, Export, RunContext, Task, TaskError};

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
struct A;

#[async_trait]
impl Task for A {
    type Output = Text;
    fn class_name() -> &'static str {
        "A"
    }
    async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        cx.print("A running");
        Ok(Text("a".to_string()))
    }
}

#[derive(Default)]
struct B;

#[async_trait]
impl Task for B {
    type Output = Text;
    fn class_name() -> &'static str {
        "B"
    }
    async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        let a = cx.require::<A>(Value::Null).await?;
        cx.print("B running");
        Ok(Text(format!("b<-{}", a.0)))
    }
}

#[derive(Default)]
struct C;

#[async_trait]
impl Task for C {
    type Output = Text;
    fn class_name() -> &'static str {
        "C"
    }
    async fn run(&self, cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
        let b = cx.require::<B>(Value::Null).await?;
        cx.print("C running");
        Ok(Text(format!("c<-{}", b.0)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let output = run::<C>(Value::Null).await?;
    println!("result: {}", output.0);
    Ok(())
}
