//! Engine configuration from environment variables (spec §6).
//!
//! Three knobs, read directly with `std::env` — the teacher reads simple
//! env-driven knobs the same way (e.g. `limits.rs`) rather than reaching
//! for a config-file crate for a handful of flags; a full config loader
//! is explicitly out of scope (spec §1 Non-goals).

use std::env;

/// Default progress layout selector (`TASKI_PROGRESS_MODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Plain,
    Simple,
    Tree,
    Log,
}

impl ProgressMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "plain" => Some(Self::Plain),
            "simple" => Some(Self::Simple),
            "tree" => Some(Self::Tree),
            "log" => Some(Self::Log),
            _ => None,
        }
    }
}

/// Engine-wide configuration resolved once per run from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub progress_mode: Option<ProgressMode>,
    pub force_progress: bool,
    pub no_color: bool,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            progress_mode: env::var("TASKI_PROGRESS_MODE")
                .ok()
                .and_then(|v| ProgressMode::parse(&v)),
            force_progress: env_flag("TASKI_FORCE_PROGRESS"),
            no_color: env::var("NO_COLOR").is_ok(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progress_mode: None,
            force_progress: false,
            no_color: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => !matches!(v.as_str(), "" | "0" | "false" | "no"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_mode_parses_case_insensitively() {
        assert_eq!(ProgressMode::parse("Tree"), Some(ProgressMode::Tree));
        assert_eq!(ProgressMode::parse("bogus"), None);
    }
}
