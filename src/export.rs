//! The static export table (spec §9): a task's completed instance exposes
//! a fixed set of named attributes, looked up by name rather than by
//! metaprogramming.

use serde_json::Value;

/// Implemented by every `Task::Output`. `T.<attr>` (spec §6) is
/// `output.export(attr)` — a lookup into a fixed table, not dynamic
/// method dispatch.
pub trait Export: Send + Sync {
    /// Names this output exposes, in declaration order.
    fn export_names(&self) -> &'static [&'static str];

    /// Look up one exported attribute by name.
    fn export(&self, name: &str) -> Option<Value>;
}

/// Blanket no-export impl for tasks whose only interesting effect is
/// side-effecting (e.g. a `clean`-only task, or a leaf task consumed only
/// for its completion signal).
impl Export for () {
    fn export_names(&self) -> &'static [&'static str] {
        &[]
    }

    fn export(&self, _name: &str) -> Option<Value> {
        None
    }
}
