//! The `Simple` layout (spec §4.6): a single-line live status line on a
//! TTY, silent off-TTY.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::time::SystemTime;

use crossterm::{cursor, execute, terminal};

use crate::identity::TaskIdentity;
use crate::observer::Observer;
use crate::registry::TaskState;

use super::{spinner_frame, terminal_width, truncate_to_width, ProgressLayout};

/// `[done/total] spinner TaskName` overwritten in place via carriage
/// return. Reference-counted `start`/`stop` so nested callers don't tear
/// the cursor state down early (spec §4.6 "Nested start/stop are
/// reference-counted").
pub struct SimpleLayout {
    live: bool,
    no_color: bool,
    refs: AtomicUsize,
    done: AtomicUsize,
    total: AtomicUsize,
    tick: AtomicUsize,
    current: Mutex<String>,
}

impl SimpleLayout {
    pub fn new(no_color: bool, live: bool) -> Self {
        Self {
            live,
            no_color,
            refs: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            tick: AtomicUsize::new(0),
            current: Mutex::new(String::new()),
        }
    }

    fn render(&self) {
        if !self.live {
            return;
        }
        let done = self.done.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        let tick = self.tick.fetch_add(1, Ordering::SeqCst);
        let name = self.current.lock().clone();
        let spinner = spinner_frame(tick);
        let line = if self.no_color {
            format!("[{done}/{total}] {spinner} {name}")
        } else {
            format!("\x1b[2m[{done}/{total}]\x1b[0m {spinner} \x1b[1m{name}\x1b[0m")
        };
        let line = truncate_to_width(&line, terminal_width());
        let mut stdout = std::io::stdout();
        let _ = execute!(
            stdout,
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine)
        );
        let _ = write!(stdout, "{line}");
        let _ = stdout.flush();
    }
}

impl Observer for SimpleLayout {
    fn on_task_updated(
        &self,
        identity: &TaskIdentity,
        prev: &TaskState,
        next: &TaskState,
        _at: SystemTime,
    ) {
        if matches!(prev, TaskState::Pending) && matches!(next, TaskState::Ready) {
            self.total.fetch_add(1, Ordering::SeqCst);
        }
        if matches!(next, TaskState::Running) {
            *self.current.lock() = identity.class().to_string();
        }
        if next.is_terminal() {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
        self.render();
    }
}

impl ProgressLayout for SimpleLayout {
    fn start(&self) {
        if self.refs.fetch_add(1, Ordering::SeqCst) == 0 && self.live {
            let _ = execute!(std::io::stdout(), cursor::Hide);
        }
    }

    fn stop(&self) {
        if self.refs.fetch_sub(1, Ordering::SeqCst) == 1 && self.live {
            let mut stdout = std::io::stdout();
            let _ = execute!(
                stdout,
                cursor::MoveToColumn(0),
                terminal::Clear(terminal::ClearType::CurrentLine),
                cursor::Show
            );
            let _ = writeln!(stdout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_advance_and_track_the_running_task() {
        let layout = SimpleLayout::new(true, false);
        let id = TaskIdentity::new("Foo", json!({}));
        let now = SystemTime::now();
        layout.on_task_updated(&id, &TaskState::Pending, &TaskState::Ready, now);
        layout.on_task_updated(&id, &TaskState::Ready, &TaskState::Running, now);
        assert_eq!(layout.total.load(Ordering::SeqCst), 1);
        assert_eq!(*layout.current.lock(), "Foo");
        assert_eq!(layout.done.load(Ordering::SeqCst), 0);
    }
}
