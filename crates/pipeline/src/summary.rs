//! End-of-run accounting.

use serde::Serialize;

use crate::{EntityKind, RunId, Timestamp};

/// A window that could not be completed. Listed so the user can re-run just
/// that range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedWindow {
    pub kind: EntityKind,
    /// `YYYY-MM-DD..YYYY-MM-DD`, inclusive.
    pub range: String,
    pub reason: String,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    Completed,
    /// Stopped by an external signal after flushing completed windows.
    Cancelled,
    /// Stopped by a fatal error after flushing completed windows.
    Aborted(String),
}

/// Counters reported at the end of every run, however it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub termination: Termination,
    pub keywords: Vec<String>,

    pub windows_planned: usize,
    pub windows_completed: usize,
    pub failed_windows: Vec<FailedWindow>,

    pub hits_found: usize,
    pub hits_accepted: usize,
    pub rejected_no_matching_file: usize,
    pub rejected_ai: usize,
    pub duplicates: usize,

    pub ai_calls: usize,
    pub ai_skipped: usize,
    pub ai_failed: usize,

    /// Records in the output file after the final flush.
    pub records_written: usize,
}

impl RunSummary {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            started_at: Timestamp::now(),
            finished_at: None,
            termination: Termination::Completed,
            keywords: Vec::new(),
            windows_planned: 0,
            windows_completed: 0,
            failed_windows: Vec::new(),
            hits_found: 0,
            hits_accepted: 0,
            rejected_no_matching_file: 0,
            rejected_ai: 0,
            duplicates: 0,
            ai_calls: 0,
            ai_skipped: 0,
            ai_failed: 0,
            records_written: 0,
        }
    }

    pub fn windows_failed(&self) -> usize {
        self.failed_windows.len()
    }

    pub fn hits_rejected(&self) -> usize {
        self.rejected_no_matching_file + self.rejected_ai
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.termination {
            Termination::Completed => "completed".to_string(),
            Termination::Cancelled => "cancelled".to_string(),
            Termination::Aborted(reason) => format!("aborted: {reason}"),
        };
        writeln!(f, "Run {} {}", self.run_id, state)?;
        writeln!(
            f,
            "  windows: {} planned, {} completed, {} failed",
            self.windows_planned,
            self.windows_completed,
            self.windows_failed()
        )?;
        writeln!(
            f,
            "  hits:    {} found, {} accepted, {} rejected ({} no_matching_file, {} ai_rejected), {} duplicates",
            self.hits_found,
            self.hits_accepted,
            self.hits_rejected(),
            self.rejected_no_matching_file,
            self.rejected_ai,
            self.duplicates
        )?;
        writeln!(
            f,
            "  ai:      {} calls, {} skipped, {} failed",
            self.ai_calls, self.ai_skipped, self.ai_failed
        )?;
        write!(f, "  records: {} written", self.records_written)?;
        for failed in &self.failed_windows {
            write!(f, "\n  failed window: {} {} ({})", failed.kind, failed.range, failed.reason)?;
        }
        Ok(())
    }
}
