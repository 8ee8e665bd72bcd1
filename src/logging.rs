//! The logging facade (spec §4.7): nil-tolerant structured events with a
//! fixed envelope (`timestamp`, `event`, `thread_id`, `task`, `data`).
//!
//! Built on `tracing`, the teacher's logging crate (used throughout
//! `executor.rs` via `#[instrument]`, and the structural cousin of the
//! teacher's own `event_log.rs` envelope). "Nil-tolerant" falls out of
//! `tracing` directly: every macro call here is a no-op unless a
//! subscriber has been installed, so the core never needs an
//! `Option<Logger>` plumbed through it.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

/// Minimum required event names (spec §4.7).
pub mod events {
    pub const EXECUTION_STARTED: &str = "execution.started";
    pub const EXECUTION_COMPLETED: &str = "execution.completed";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_CLEAN_STARTED: &str = "task.clean_started";
    pub const TASK_CLEAN_COMPLETED: &str = "task.clean_completed";
    pub const TASK_ERROR_DETAIL: &str = "task.error_detail";
    pub const DEPENDENCY_CIRCULAR: &str = "dependency.circular";
}

fn iso8601_now() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    // Minimal RFC3339-ish stamp without pulling in a datetime crate the
    // teacher's own engine core doesn't otherwise need; millisecond
    // precision is all spec §6's schema requires.
    let secs = since_epoch.as_secs();
    let millis = since_epoch.subsec_millis();
    let days = secs / 86_400;
    let (y, m, d) = civil_from_days(days as i64);
    let time_of_day = secs % 86_400;
    format!(
        "{y:04}-{m:02}-{d:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        time_of_day / 3600,
        (time_of_day / 60) % 60,
        time_of_day % 60
    )
}

/// Howard Hinnant's days-from-civil algorithm, inverted; avoids a chrono
/// dependency for a log timestamp the rest of this crate never parses
/// back.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn thread_id_string() -> String {
    format!("{:?}", std::thread::current().id())
}

/// Emit one structured log event matching spec §6's schema:
/// `{"timestamp":"…","event":"task.completed","thread_id":"…","task":"Foo","data":{...}}`.
pub fn emit(event: &'static str, task: Option<&str>, data: Value) {
    let timestamp = iso8601_now();
    let thread_id = thread_id_string();
    tracing::info!(
        target: "taski::event",
        timestamp = %timestamp,
        event,
        thread_id = %thread_id,
        task = task.unwrap_or_default(),
        data = %data,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_round_trips_a_known_day() {
        // 2026-07-28 is day 20_662 since the epoch.
        let (y, m, d) = civil_from_days(20_662);
        assert_eq!((y, m, d), (2026, 7, 28));
    }

    #[test]
    fn emit_does_not_panic_without_subscriber() {
        emit(events::TASK_STARTED, Some("Foo"), serde_json::json!({}));
    }
}
