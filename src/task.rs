//! The `Task` trait: a declarative class exposing a `run` routine, a set
//! of exported attributes, and an identity under arguments (spec
//! GLOSSARY).

use async_trait::async_trait;
use serde_json::Value;

use crate::context::RunContext;
use crate::errors::TaskError;
use crate::export::Export;
use crate::identity::TaskIdentity;

/// A task class. Implementors are zero-sized dispatch types — all actual
/// state lives in the `Output` produced by `run`, keyed by the wrapper's
/// identity, matching spec §3's separation between the registry-owned
/// `TaskWrapper` and the instance it owns.
#[async_trait]
pub trait Task: Default + Send + Sync + 'static {
    /// The attribute set this task exposes once completed.
    type Output: Export + Send + Sync + 'static;

    /// Stable name used as the registry key's class component.
    fn class_name() -> &'static str
    where
        Self: Sized;

    /// Dependency edges pre-seeded by the (external) static analyzer.
    /// The scheduler treats this purely as a hint: an empty vec is
    /// always valid, and omissions are filled in by `need_dep` at run
    /// time (spec §4.4, §8 property 4).
    fn static_deps() -> Vec<TaskIdentity>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Optional sectioning label used by progress layouts (spec §3
    /// `group`).
    fn group() -> Option<&'static str>
    where
        Self: Sized,
    {
        None
    }

    /// Run this task to completion, discovering dependencies via
    /// `cx.require::<D>(args)` as needed. A suspension at `.await` *is*
    /// the spec's `[:need_dep, ...]` yield (spec §9).
    async fn run(&self, cx: &RunContext, args: &Value) -> Result<Self::Output, TaskError>;

    /// Invoked by the `clean` phase, in reverse topological order over
    /// the observed dependency graph (spec §3 "Lifecycle"). Receives
    /// `None` when the wrapper was never built (spec §9 Open Question b).
    async fn clean(&self, _output: Option<&Self::Output>) {}
}
