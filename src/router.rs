//! `TaskOutputRouter` (spec §4.3): attributes each running task's output
//! to that task, and keeps concurrent tasks from interleaving mid-line on
//! the terminal.
//!
//! The teacher and the rest of the pack never dup2 real process stdout —
//! their async pipelines route data through owned channels instead (the
//! teacher's TUI bridges a runtime event stream over `tokio::sync::mpsc`,
//! `tui/runtime/mock.rs`). This router re-expresses spec §4.3's "pipe per
//! running task + single reader multiplexer" the same way: each task
//! gets a cheap `TaskWriter` handle instead of a raw OS pipe, and the
//! "multiplexer" is one `mpsc` channel's consumer loop. See
//! SPEC_FULL.md §4.3 for the full justification; every ordering and
//! line-granularity invariant from spec §4.3/§8 still holds.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::identity::TaskIdentity;

/// Where routed lines ultimately land: the active progress display, or
/// the real terminal, per spec §4.3.
pub trait OutputSink: Send + Sync {
    fn route_line(&self, identity: &TaskIdentity, line: &str);
}

/// Sink that writes straight to the real process stdout, prefixed by the
/// producing task's class — used when no progress display is active.
pub struct RealStdout;

impl OutputSink for RealStdout {
    fn route_line(&self, identity: &TaskIdentity, line: &str) {
        println!("[{identity}] {line}");
    }
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("output router: reader already closed")]
    Closed,
}

enum RouterMsg {
    Line(TaskIdentity, String),
}

/// Owns the single reader ("I/O multiplexer") that drains every task's
/// routed lines and forwards them to the configured sink.
pub struct TaskOutputRouter {
    /// The router's own sender clone, held so `start_capture` can mint
    /// further clones for as long as the router is alive. `close_all`
    /// takes and drops it explicitly — `&self` alone can never drop a
    /// plain field, and the reader's `recv()` loop only ever observes
    /// channel closure once every sender clone, this one included, is
    /// gone.
    sender: Mutex<Option<mpsc::UnboundedSender<RouterMsg>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TaskOutputRouter {
    /// Start the router with the given sink. Returns the router handle;
    /// `close_all` joins the reader and guarantees every buffered line has
    /// been drained before returning (spec §4.3 "teardown-safe even if
    /// reader is still blocked").
    pub fn start(sink: Arc<dyn OutputSink>) -> Self {
        let (sender, mut rx) = mpsc::unbounded_channel::<RouterMsg>();
        let reader = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    RouterMsg::Line(identity, line) => sink.route_line(&identity, &line),
                }
            }
        });
        Self {
            sender: Mutex::new(Some(sender)),
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Allocate a per-task write handle ("start_capture").
    pub fn start_capture(&self, identity: TaskIdentity) -> TaskWriter {
        let sender = self
            .sender
            .lock()
            .as_ref()
            .expect("start_capture called after close_all")
            .clone();
        TaskWriter {
            identity,
            sender,
            partial: Mutex::new(String::new()),
        }
    }

    /// Drop the router's own sender clone, then wait for the reader to
    /// drain everything still queued and exit. Safe to call even if
    /// every `TaskWriter` has already been dropped.
    pub async fn close_all(&self) {
        self.sender.lock().take();
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// A per-running-task output handle (spec §4.3 "pipe"). Lines are
/// buffered until a newline is seen so that interleaving across tasks
/// never happens mid-line; a trailing partial line is flushed by
/// `finish()` ("stop_capture" + "drain_pipe" combined, since there is no
/// OS descriptor to race on — see SPEC_FULL.md §4.3).
pub struct TaskWriter {
    identity: TaskIdentity,
    sender: mpsc::UnboundedSender<RouterMsg>,
    partial: Mutex<String>,
}

impl TaskWriter {
    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    /// Append bytes that may or may not end in a newline; complete lines
    /// are routed immediately, the remainder is buffered.
    pub fn write_str(&self, text: &str) -> Result<(), RouterError> {
        let mut partial = self.partial.lock();
        partial.push_str(text);
        while let Some(pos) = partial.find('\n') {
            let line: String = partial.drain(..=pos).collect();
            let line = line.trim_end_matches('\n').to_string();
            self.sender
                .send(RouterMsg::Line(self.identity.clone(), line))
                .map_err(|_| RouterError::Closed)?;
        }
        Ok(())
    }

    /// Convenience for a single complete line.
    pub fn line(&self, line: impl fmt::Display) -> Result<(), RouterError> {
        self.sender
            .send(RouterMsg::Line(self.identity.clone(), line.to_string()))
            .map_err(|_| RouterError::Closed)
    }

    /// Flush any trailing partial line ("stop_capture" + "drain_pipe").
    /// Idempotent.
    pub fn finish(&self) {
        let mut partial = self.partial.lock();
        if !partial.is_empty() {
            let line = std::mem::take(&mut *partial);
            // A race where the reader has already exited is exactly the
            // "pipe closed by another thread" case spec §4.3 requires us
            // to tolerate silently.
            let _ = self.sender.send(RouterMsg::Line(self.identity.clone(), line));
        }
    }
}

impl Drop for TaskWriter {
    fn drop(&mut self) {
        self.finish();
    }
}
