//! Screen lifecycle timing: hosts record how long each screen spent in its
//! create/start/resume phases, and the server renders the aggregate into a
//! report. Delivery runs on a detached thread through a [`ReportSink`] so a
//! slow transport never stalls a caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Screens whose phases add up past this are flagged in the report.
pub const SLOW_SCREEN_MS: u64 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Create,
    Start,
    Resume,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Create => "create",
            LifecyclePhase::Start => "start",
            LifecyclePhase::Resume => "resume",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PhaseTimes {
    create_ms: u64,
    start_ms: u64,
    resume_ms: u64,
}

impl PhaseTimes {
    fn total_ms(&self) -> u64 {
        self.create_ms + self.start_ms + self.resume_ms
    }

    fn as_row(&self, screen: &str) -> ScreenReportRow {
        ScreenReportRow {
            screen: screen.to_string(),
            create_ms: self.create_ms,
            start_ms: self.start_ms,
            resume_ms: self.resume_ms,
            total_ms: self.total_ms(),
            slow: self.total_ms() > SLOW_SCREEN_MS,
        }
    }
}

/// One screen's line in the rendered report and in the JSON listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenReportRow {
    pub screen: String,
    pub create_ms: u64,
    pub start_ms: u64,
    pub resume_ms: u64,
    pub total_ms: u64,
    pub slow: bool,
}

/// Per-screen phase durations, keyed by screen name. Host lifecycle
/// callbacks write, report rendering reads; any thread, any time.
#[derive(Default)]
pub struct ScreenTimings {
    inner: Mutex<HashMap<String, PhaseTimes>>,
}

impl ScreenTimings {
    pub fn new() -> ScreenTimings {
        ScreenTimings::default()
    }

    /// Records the elapsed time of one phase, replacing an earlier
    /// measurement of the same phase for that screen.
    pub fn record_phase(&self, screen: &str, phase: LifecyclePhase, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        let mut inner = self.inner.lock();
        let times = inner.entry(screen.to_string()).or_default();
        match phase {
            LifecyclePhase::Create => times.create_ms = ms,
            LifecyclePhase::Start => times.start_ms = ms,
            LifecyclePhase::Resume => times.resume_ms = ms,
        }
    }

    /// Report rows sorted by total duration, slowest last so they sit at
    /// the bottom of the rendered report. Ties sort by screen name.
    pub fn rows(&self) -> Vec<ScreenReportRow> {
        let mut rows: Vec<ScreenReportRow> = self
            .inner
            .lock()
            .iter()
            .map(|(screen, times)| times.as_row(screen))
            .collect();
        rows.sort_by(|a, b| {
            a.total_ms
                .cmp(&b.total_ms)
                .then_with(|| a.screen.cmp(&b.screen))
        });
        rows
    }

    /// One screen's row, or None when nothing was recorded for it.
    pub fn row(&self, screen: &str) -> Option<ScreenReportRow> {
        self.inner
            .lock()
            .get(screen)
            .map(|times| times.as_row(screen))
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

pub fn render_report(rows: &[ScreenReportRow]) -> String {
    let mut out = String::new();
    for row in rows {
        out.push_str(&format!(
            "{}ms {} create={} start={} resume={}",
            row.total_ms, row.screen, row.create_ms, row.start_ms, row.resume_ms
        ));
        if row.slow {
            out.push_str(" SLOW");
        }
        out.push('\n');
    }
    out
}

/// Where a rendered timing report goes. The stock sink logs it; embedders
/// that mail or upload reports swap in their own.
pub trait ReportSink: Send + Sync {
    fn deliver(&self, report: &str) -> Result<(), ServerError>;
}

pub struct LogSink;

impl ReportSink for LogSink {
    fn deliver(&self, report: &str) -> Result<(), ServerError> {
        for line in report.lines() {
            info!("screen timing: {}", line);
        }
        Ok(())
    }
}

/// Renders and delivers on a detached thread; delivery failures are logged
/// and the caller never hears about them.
pub(crate) fn dispatch_report(rows: Vec<ScreenReportRow>, sink: Arc<dyn ReportSink>) {
    thread::spawn(move || {
        let report = render_report(&rows);
        if let Err(e) = sink.deliver(&report) {
            error!("timing report delivery failed: {}", e);
        }
    });
}
