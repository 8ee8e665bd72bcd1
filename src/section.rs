//! The section abstraction (spec §4.8): a declaration-side construct
//! that lets one wrapper expose one of several implementations chosen
//! at run time. Specified here only at the interface boundary the
//! scheduler consumes — picking `impl` is the declaration surface's
//! job, out of scope for this crate (spec §1).

use async_trait::async_trait;
use serde_json::Value;

use crate::context::RunContext;
use crate::errors::TaskError;
use crate::export::Export;
use crate::task::Task;

/// What a section's `impl` selector resolves to: a task-like value that
/// can be run and whose declared interfaces can be read back out.
#[async_trait]
pub trait SectionImpl: Send + Sync {
    type Output: Export + Send + Sync + 'static;

    async fn run(&self, cx: &RunContext, args: &Value) -> Result<Self::Output, TaskError>;
}

/// Error raised when a section's `impl` selector does not resolve to an
/// implementation (spec §4.8: `"does not have an implementation"`).
#[derive(Debug, Clone, thiserror::Error)]
#[error("does not have an implementation")]
pub struct MissingImplementation;

// Spec §4.8's other section error — "Subclasses must implement the impl
// method" — fires when a declaration never overrides `impl`. `Section`
// gives `select` no default body, so the equivalent failure here is a
// compile error at the call site instead of a runtime one; there is
// nothing left to model at this layer.

/// A task class backed by a section: at scheduling time it expands into
/// a single task whose `run` invokes `select` and forwards the chosen
/// implementation's output (spec §4.8).
///
/// Implementors provide `select`; `Section::output` and the blanket
/// `Task` bridge are generated from it, so a section participates in
/// the graph exactly like any other task — it contributes one wrapper,
/// one identity, one completion latch.
#[async_trait]
pub trait Section: Default + Send + Sync + 'static {
    type Output: Export + Send + Sync + 'static;

    fn class_name() -> &'static str
    where
        Self: Sized;

    /// Choose (or build) the implementation to run this invocation,
    /// given this section's own arguments. Returning `None` fails the
    /// wrapper with [`MissingImplementation`].
    async fn select(
        &self,
        cx: &RunContext,
        args: &Value,
    ) -> Option<Box<dyn SelectedImpl<Output = Self::Output>>>;
}

/// Type-erased view of a chosen implementation, so `select` can return
/// any concrete `SectionImpl` without `Section` itself being generic
/// over it.
#[async_trait]
pub trait SelectedImpl: Send + Sync {
    type Output;

    async fn run(&self, cx: &RunContext, args: &Value) -> Result<Self::Output, TaskError>;
}

#[async_trait]
impl<S> SelectedImpl for S
where
    S: SectionImpl,
{
    type Output = S::Output;

    async fn run(&self, cx: &RunContext, args: &Value) -> Result<Self::Output, TaskError> {
        SectionImpl::run(self, cx, args).await
    }
}

/// Bridges any `Section` into the scheduler's `Task` trait: the
/// generated wrapper's `run` is exactly `select` followed by delegating
/// to the chosen implementation (spec §4.8 "contributes one task to the
/// graph").
#[async_trait]
impl<S: Section> Task for S {
    type Output = S::Output;

    fn class_name() -> &'static str {
        S::class_name()
    }

    async fn run(&self, cx: &RunContext, args: &Value) -> Result<Self::Output, TaskError> {
        let identity = cx.identity().clone();
        match self.select(cx, args).await {
            Some(chosen) => chosen.run(cx, args).await,
            None => Err(TaskError::new(identity, MissingImplementation.to_string())),
        }
    }
}
