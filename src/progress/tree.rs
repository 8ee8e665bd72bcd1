//! The `Tree` layout (spec §4.6): a multi-line indented view of every
//! known task, redrawn in place.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::time::SystemTime;

use crossterm::{cursor, execute, terminal};

use crate::identity::TaskIdentity;
use crate::observer::Observer;
use crate::registry::TaskState;

use super::{terminal_width, truncate_to_width, ProgressLayout};

/// One line of the rendered tree: `group` sorts siblings under their
/// section heading, `order` preserves first-seen order within a group.
struct Row {
    order: usize,
    group: Option<String>,
    label: &'static str,
}

pub struct TreeLayout {
    live: bool,
    no_color: bool,
    refs: AtomicUsize,
    seq: AtomicUsize,
    rendered_lines: AtomicUsize,
    rows: Mutex<BTreeMap<String, Row>>,
}

impl TreeLayout {
    pub fn new(no_color: bool, live: bool) -> Self {
        Self {
            live,
            no_color,
            refs: AtomicUsize::new(0),
            seq: AtomicUsize::new(0),
            rendered_lines: AtomicUsize::new(0),
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    fn label_for(&self, state: &TaskState) -> &'static str {
        match state {
            TaskState::Pending => " ",
            TaskState::Ready => "·",
            TaskState::Running => "»",
            TaskState::Completed(_) => if self.no_color { "x" } else { "\x1b[32mx\x1b[0m" },
            TaskState::Failed(_) => if self.no_color { "!" } else { "\x1b[31m!\x1b[0m" },
        }
    }

    fn render(&self) {
        if !self.live {
            return;
        }
        let rows = self.rows.lock();
        let mut grouped: BTreeMap<Option<String>, Vec<(&usize, &str)>> = BTreeMap::new();
        for (name, row) in rows.iter() {
            grouped
                .entry(row.group.clone())
                .or_default()
                .push((&row.order, name.as_str()));
        }

        let mut lines = Vec::new();
        for (group, mut entries) in grouped {
            entries.sort_by_key(|(order, _)| **order);
            if let Some(group) = &group {
                lines.push(format!("{group}:"));
            }
            for (_, name) in entries {
                let row = &rows[name];
                let indent = if group.is_some() { "  " } else { "" };
                lines.push(format!("{indent}[{}] {name}", row.label));
            }
        }
        drop(rows);

        let width = terminal_width();
        let mut stdout = std::io::stdout();
        let previous = self.rendered_lines.swap(lines.len(), Ordering::SeqCst);
        if previous > 0 {
            let _ = execute!(stdout, cursor::MoveUp(previous as u16));
        }
        for line in &lines {
            let _ = execute!(
                stdout,
                cursor::MoveToColumn(0),
                terminal::Clear(terminal::ClearType::CurrentLine)
            );
            let _ = writeln!(stdout, "{}", truncate_to_width(line, width));
        }
        let _ = stdout.flush();
    }
}

impl Observer for TreeLayout {
    fn on_task_updated(
        &self,
        identity: &TaskIdentity,
        prev: &TaskState,
        next: &TaskState,
        _at: SystemTime,
    ) {
        if matches!(prev, TaskState::Pending) && matches!(next, TaskState::Ready) {
            let order = self.seq.fetch_add(1, Ordering::SeqCst);
            self.rows.lock().insert(
                identity.class().to_string(),
                Row {
                    order,
                    group: None,
                    label: self.label_for(next),
                },
            );
        } else if let Some(row) = self.rows.lock().get_mut(identity.class()) {
            row.label = self.label_for(next);
        }
        self.render();
    }

    fn on_group_started(&self, identity: &TaskIdentity, group: &str) {
        if let Some(row) = self.rows.lock().get_mut(identity.class()) {
            row.group = Some(group.to_string());
        }
    }
}

impl ProgressLayout for TreeLayout {
    fn start(&self) {
        if self.refs.fetch_add(1, Ordering::SeqCst) == 0 && self.live {
            let _ = execute!(std::io::stdout(), cursor::Hide);
        }
    }

    fn stop(&self) {
        if self.refs.fetch_sub(1, Ordering::SeqCst) == 1 && self.live {
            let _ = execute!(std::io::stdout(), cursor::Show);
        }
    }
}
