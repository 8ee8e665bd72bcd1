//! Progress layouts (spec §4.6): observers that render task state to a
//! terminal or to structured log lines. `select` resolves the active
//! layout from `EngineConfig`, mirroring `Taski.progress_display=`'s
//! env-driven default.

pub mod log;
pub mod simple;
pub mod tree;

use std::sync::Arc;

use crossterm::tty::IsTty;

use crate::config::{EngineConfig, ProgressMode};
use crate::observer::Observer;

pub use log::LogLayout;
pub use simple::SimpleLayout;
pub use tree::TreeLayout;

/// A progress layout is an `Observer` with an explicit `start`/`stop`
/// lifecycle (spec §4.6: "assigning a new [layout] first calls `stop`
/// on the previous"). `start`/`stop` nest via a reference count so a
/// layout can be (de)activated from more than one call site without
/// tearing down early.
pub trait ProgressLayout: Observer {
    fn start(&self) {}
    fn stop(&self) {}
}

/// True if real stdout is attached to a terminal, or progress display
/// was forced on regardless (spec §6 `TASKI_FORCE_PROGRESS`).
pub fn stdout_is_live(config: &EngineConfig) -> bool {
    config.force_progress || std::io::stdout().is_tty()
}

/// A resolved layout, exposed as two independently-coerced views of the
/// same allocation: `layout` for `start`/`stop`, `observer` for
/// registration on the `ObserverBus`. Built from the still-concrete,
/// sized type so each coercion is an ordinary single-trait unsize, never
/// a cast between two already-erased trait objects.
pub struct SelectedProgress {
    pub layout: Arc<dyn ProgressLayout>,
    pub observer: Arc<dyn Observer>,
}

fn wrap<T: ProgressLayout + Observer + 'static>(inner: Arc<T>) -> SelectedProgress {
    SelectedProgress {
        layout: Arc::clone(&inner) as Arc<dyn ProgressLayout>,
        observer: inner as Arc<dyn Observer>,
    }
}

/// Resolve the layout named by `TASKI_PROGRESS_MODE`, falling back to
/// `Simple` on a live terminal or `Log` otherwise — `Plain` and an
/// explicit absence of a live terminal both disable rendering (spec
/// §4.6 "Assigning nil disables display"). Called by `Engine::new` so
/// `TASKI_PROGRESS_MODE`/`TASKI_FORCE_PROGRESS` take effect on the real
/// execution path, not just in this module's own unit tests.
pub fn select(config: &EngineConfig) -> Option<SelectedProgress> {
    let live = stdout_is_live(config);
    match config.progress_mode {
        Some(ProgressMode::Plain) => None,
        Some(ProgressMode::Simple) => Some(wrap(Arc::new(SimpleLayout::new(config.no_color, live)))),
        Some(ProgressMode::Tree) => Some(wrap(Arc::new(TreeLayout::new(config.no_color, live)))),
        Some(ProgressMode::Log) => Some(wrap(Arc::new(LogLayout::new()))),
        None if live => Some(wrap(Arc::new(SimpleLayout::new(config.no_color, live)))),
        None => Some(wrap(Arc::new(LogLayout::new()))),
    }
}

/// Terminal width in columns, defaulting to 80 when it cannot be
/// determined (piped stdout, `TERM` unset, etc.).
pub(crate) fn terminal_width() -> u16 {
    crossterm::terminal::size().map(|(w, _)| w).unwrap_or(80)
}

const SPINNER_FRAMES: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

pub(crate) fn spinner_frame(tick: usize) -> char {
    SPINNER_FRAMES[tick % SPINNER_FRAMES.len()]
}

/// Truncate `line` to fit within `width - 1` columns (spec §4.6
/// "respects terminal width (truncate to width-1)"), counting chars
/// rather than bytes so multi-byte UTF-8 (the spinner glyphs above)
/// truncates cleanly.
pub(crate) fn truncate_to_width(line: &str, width: u16) -> String {
    let max = width.saturating_sub(1) as usize;
    if line.chars().count() <= max {
        line.to_string()
    } else {
        line.chars().take(max).collect()
    }
}
