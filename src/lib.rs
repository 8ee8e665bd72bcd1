//! # taski
//!
//! A task-graph execution engine for Rust: typed tasks declare their
//! static dependencies up front and may additionally discover further
//! dependencies at run time by `require`-ing other tasks from inside
//! their own `run`. The engine schedules the resulting graph
//! cooperatively on a bounded worker pool, deduplicates identical
//! requests (same class, same arguments) to a single execution, detects
//! cycles that would otherwise deadlock, and routes each task's stdout
//! through a per-task writer so concurrent output never interleaves.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use taski::{run, RunContext, Task, TaskError, Export};
//! use async_trait::async_trait;
//! use serde_json::Value;
//!
//! #[derive(Default)]
//! struct Greet;
//!
//! impl Export for String {
//!     fn export_names(&self) -> &'static [&'static str] { &["text"] }
//!     fn export(&self, name: &str) -> Option<Value> {
//!         (name == "text").then(|| Value::String(self.clone()))
//!     }
//! }
//!
//! #[async_trait]
//! impl Task for Greet {
//!     type Output = String;
//!     fn class_name() -> &'static str { "Greet" }
//!     async fn run(&self, _cx: &RunContext, _args: &Value) -> Result<Self::Output, TaskError> {
//!         Ok("hello".to_string())
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let output = run::<Greet>(Value::Null).await?;
//! println!("{}", output);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`task`] - The `Task` trait: static deps, grouping, typed output
//! - [`section`] - Run-time implementation selection over a `Task`
//! - [`scheduler`] - The `Engine`: scheduling, dynamic `require`, cycles
//! - [`registry`] - Per-identity task state and completion latches
//! - [`identity`] - Canonical `(class, args)` identity and dedup key
//! - [`context`] - Per-fiber `RunContext`, output capture, messages
//! - [`router`] - Per-task stdout capture so output never interleaves
//! - [`observer`] - Scheduler event hooks consumed by progress layouts
//! - [`progress`] - Built-in `Simple`/`Tree`/`Log` progress layouts
//! - [`errors`] - `TaskError`, circular-dependency and aggregate errors
//! - [`export`] - The `Export` trait backing attribute-style lookup
//! - [`config`] - `EngineConfig`, including env-driven defaults
//! - [`logging`] - The structured event-log facade

pub mod config;
pub mod context;
pub mod errors;
pub mod export;
pub mod identity;
pub mod logging;
pub mod observer;
pub mod progress;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod section;
pub mod task;

pub use config::{EngineConfig, ProgressMode};
pub use context::RunContext;
pub use errors::{AggregateError, CircularDependencyError, TaskError, TaskFailure};
pub use export::Export;
pub use identity::TaskIdentity;
pub use observer::Observer;
pub use scheduler::{run, Engine};
pub use section::{Section, SectionImpl};
pub use task::Task;
