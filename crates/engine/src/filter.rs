//! Filter stage runner.
//!
//! Stage order, short-circuiting on the first rejection:
//!
//! 1. file filter (`no_matching_file`)
//! 2. size guard: oversized diffs skip judgment and are kept as uncertain
//! 3. relevance judgment (`ai_rejected`, or kept as passed / uncertain)
//!
//! The language constraint is not a stage here: it is a query qualifier on
//! pull-request windows and does not exist for commit search.

use pipeline::{
    assemble_diff, AssembledDiff, Checked, DiffLimits, FileFilter, JudgeRequest, RawHit,
    Rejection, RelevanceOracle, Verdict,
};
use tracing::{debug, info, warn};

/// Result of running one hit through the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Accepted(Checked),
    Rejected(Rejection),
}

/// Oracle usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub ai_calls: usize,
    pub ai_skipped: usize,
    pub ai_failed: usize,
}

pub struct FilterPipeline<'a> {
    files: FileFilter,
    limits: DiffLimits,
    oracle: Option<&'a dyn RelevanceOracle>,
    topic: String,
    judgment: String,
    stats: FilterStats,
}

impl<'a> FilterPipeline<'a> {
    /// `judgment` falls back to the topic when blank.
    pub fn new(
        files: FileFilter,
        limits: DiffLimits,
        oracle: Option<&'a dyn RelevanceOracle>,
        topic: &str,
        judgment: &str,
    ) -> Self {
        let judgment = if judgment.trim().is_empty() {
            topic
        } else {
            judgment
        };
        Self {
            files,
            limits,
            oracle,
            topic: topic.to_string(),
            judgment: judgment.to_string(),
            stats: FilterStats::default(),
        }
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    pub async fn accept(&mut self, hit: &RawHit) -> FilterOutcome {
        if !self.files.admits(&hit.files) {
            debug!(entity = %hit.entity, "no changed file matches the file filter");
            return FilterOutcome::Rejected(Rejection::NoMatchingFile);
        }

        let diff = match assemble_diff(&hit.files, &self.files, self.limits) {
            AssembledDiff::Oversized { chars, files } => {
                info!(entity = %hit.entity, chars, files, "diff over size limit; skipping judgment");
                self.stats.ai_skipped += 1;
                return FilterOutcome::Accepted(Checked::Uncertain);
            }
            AssembledDiff::Empty => None,
            AssembledDiff::Text(text) => Some(text),
        };

        let Some(oracle) = self.oracle else {
            self.stats.ai_skipped += 1;
            return FilterOutcome::Accepted(Checked::Unreviewed);
        };
        let Some(diff) = diff else {
            debug!(entity = %hit.entity, "no patch text to judge");
            self.stats.ai_skipped += 1;
            return FilterOutcome::Accepted(Checked::Uncertain);
        };

        let paths: Vec<String> = hit.files.iter().map(|f| f.path.clone()).collect();
        let request = JudgeRequest {
            topic: &self.topic,
            judgment: &self.judgment,
            title: &hit.title,
            message: &hit.message,
            url: &hit.url,
            files: &paths,
            diff: &diff,
        };

        self.stats.ai_calls += 1;
        match oracle.judge(&request).await {
            Ok(Verdict::Match) => FilterOutcome::Accepted(Checked::Passed),
            Ok(Verdict::NoMatch) => FilterOutcome::Rejected(Rejection::AiRejected),
            Ok(Verdict::Uncertain) => FilterOutcome::Accepted(Checked::Uncertain),
            Err(e) => {
                warn!(entity = %hit.entity, error = %e, "judgment failed; marking uncertain");
                self.stats.ai_failed += 1;
                FilterOutcome::Accepted(Checked::Uncertain)
            }
        }
    }
}
