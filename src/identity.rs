//! Task identity: `(class, normalized arguments)`.
//!
//! The registry is keyed on identity (spec §3). Argument maps compare
//! structurally — `{}` and `{value: null}` are distinct identities, and key
//! order never matters — so identity carries both the original JSON value
//! (for `RunContext` access) and a canonical string derived from it (for
//! hashing/equality).

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// `(task class, normalized argument map)` — the registry's key.
#[derive(Clone)]
pub struct TaskIdentity {
    pub(crate) class: Arc<str>,
    pub(crate) args: Arc<Value>,
    canonical: Arc<str>,
}

impl TaskIdentity {
    /// Build an identity for task class `class` with argument map `args`.
    ///
    /// `args` is typically `serde_json::json!({...})`; `Value::Null` is
    /// treated as "no arguments" and normalizes to the same identity as
    /// `Value::Object(Map::new())` would not — per spec §3, `{}` and
    /// `{value: null}` are distinct, so we never silently coerce one into
    /// the other here.
    pub fn new(class: impl Into<Arc<str>>, args: Value) -> Self {
        let class = class.into();
        let mut canonical = String::with_capacity(64);
        canonical.push_str(&class);
        canonical.push('\0');
        write_canonical(&args, &mut canonical);
        Self {
            class,
            args: Arc::new(args),
            canonical: canonical.into(),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn args(&self) -> &Value {
        &self.args
    }
}

impl PartialEq for TaskIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}
impl Eq for TaskIdentity {}

impl std::hash::Hash for TaskIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.class, self.args)
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class)
    }
}

/// Write a canonical, key-order-independent serialization of `value` into
/// `out`. Object keys are sorted; this is the structural-comparison
/// mechanism required by spec §3 and tested by §8 property 3.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push('"');
                out.push_str(key);
                out.push_str("\":");
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}
