//! Error taxonomy (spec §7): `TaskError`, `CircularDependencyError`,
//! `AggregateError`, `RunAborted`, and the `TaskFailure` record they
//! accumulate into.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;

use crate::identity::TaskIdentity;

/// Wraps whatever a task's `run` raised. Carries the failing identity so
/// the scheduler can attribute the failure without re-deriving it.
#[derive(Error, Debug, Clone)]
#[error("task {identity} failed: {message}")]
pub struct TaskError {
    pub identity: TaskIdentity,
    pub message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl TaskError {
    pub fn new(identity: TaskIdentity, message: impl Into<String>) -> Self {
        Self {
            identity,
            message: message.into(),
            source: None,
        }
    }

    pub fn from_source(
        identity: TaskIdentity,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: source.to_string(),
            identity,
            source: Some(Arc::new(source)),
        }
    }

    /// The abort sentinel used to unblock waiters on external interruption
    /// (spec §4.4 "Cancellation and timeouts", §7 `RunAborted`).
    pub fn aborted(identity: TaskIdentity) -> Self {
        Self {
            message: "RunAborted: task was interrupted before reaching a terminal state"
                .to_string(),
            identity,
            source: None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.message.starts_with("RunAborted")
    }

    pub fn circular(identity: TaskIdentity, err: CircularDependencyError) -> Self {
        Self {
            message: err.to_string(),
            identity,
            source: Some(Arc::new(err)),
        }
    }
}

/// Raised when a `need_dep` request would close a waits-on cycle (spec
/// §4.4 step 3c, §7).
///
/// The message format is part of the contract (spec §4 invariants / §8
/// S4): it must contain the literal substring `Circular dependency
/// detected!`, an arrow `→` between path entries, and the phrase `The
/// runtime chain is:`.
#[derive(Debug, Clone)]
pub struct CircularDependencyError {
    /// Ordered cycle path, e.g. `[A, B, A]`.
    pub path: Vec<Arc<str>>,
}

impl std::error::Error for CircularDependencyError {}

impl CircularDependencyError {
    pub fn new(path: Vec<Arc<str>>) -> Self {
        Self { path }
    }
}

impl fmt::Display for CircularDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain = self
            .path
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join(" → ");
        write!(
            f,
            "Circular dependency detected! The runtime chain is: {chain}"
        )
    }
}

/// One task's terminal failure, timestamped for reporting (spec §7).
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub identity: TaskIdentity,
    pub error: Arc<TaskError>,
    pub timestamp: SystemTime,
}

/// Terminal wrapper for one top-level `run` (spec §7). Always raised if
/// any scheduled task failed, even if the root itself succeeded by
/// catching a dependency's error.
#[derive(Debug, Clone)]
pub struct AggregateError {
    pub errors: Vec<TaskFailure>,
}

impl std::error::Error for AggregateError {}

impl AggregateError {
    pub fn new(errors: Vec<TaskFailure>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} task(s) failed: ",
            self.errors.len()
        )?;
        for (i, failure) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{} ({})", failure.identity, failure.error.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_message_contains_required_substrings() {
        let err = CircularDependencyError::new(vec!["A".into(), "B".into(), "A".into()]);
        let msg = err.to_string();
        assert!(msg.contains("Circular dependency detected!"));
        assert!(msg.contains('→'));
        assert!(msg.contains("The runtime chain is:"));
        assert!(msg.contains('A'));
        assert!(msg.contains('B'));
    }
}
