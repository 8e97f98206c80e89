//! The run driver: plan, search, filter, aggregate, persist.
//!
//! Records are committed one window at a time. A window's accepted hits are
//! buffered while it is being paged; the buffer is merged into the aggregator
//! and checkpointed to the result store only when the window completes. A
//! window that fails or is interrupted by cancellation contributes nothing,
//! so the output never holds a partial window.

use std::collections::HashSet;

use pipeline::{
    Clock, CredentialPool, CredentialStore, DiffLimits, EntityId, FailedWindow, FileFilter,
    PlanStrategy, QueryPlanner, QueryWindow, Rejection, RelevanceOracle, ResultAggregator,
    ResultRecord, ResultStore, RunId, RunSummary, SearchConfig, SearchError, SearchTerms,
    SearchTransport, Termination, Timestamp,
};
use tracing::{debug_span, info, info_span, warn, Instrument};

use crate::{
    CancellationToken, ExecutorSettings, FilterOutcome, FilterPipeline, SearchExecutor,
    WindowCursor,
};

/// Tunables for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSettings {
    pub planner: PlanStrategy,
    pub executor: ExecutorSettings,
    pub limits: DiffLimits,
}

/// Hit counters for one window, folded into the summary on commit.
#[derive(Debug, Default)]
struct WindowTally {
    found: usize,
    accepted: usize,
    no_matching_file: usize,
    ai_rejected: usize,
    duplicates: usize,
}

#[derive(Debug, Default)]
struct WindowBatch {
    seen: HashSet<EntityId>,
    records: Vec<(EntityId, ResultRecord)>,
    tally: WindowTally,
}

enum WindowOutcome {
    Completed(WindowBatch),
    Cancelled,
    Failed(SearchError),
}

/// Drives one search run against the configured ports.
///
/// ```ignore
/// let run = SearchRun::new(&github, &tokens, &results, &clock)
///     .with_oracle(Some(&oracle))
///     .with_cancellation(cancel.clone());
/// let summary = run.execute(&config).await?;
/// ```
pub struct SearchRun<'a> {
    transport: &'a dyn SearchTransport,
    oracle: Option<&'a dyn RelevanceOracle>,
    credentials: &'a dyn CredentialStore,
    results: &'a dyn ResultStore,
    clock: &'a dyn Clock,
    settings: RunSettings,
    cancel: CancellationToken,
}

impl<'a> SearchRun<'a> {
    pub fn new(
        transport: &'a dyn SearchTransport,
        credentials: &'a dyn CredentialStore,
        results: &'a dyn ResultStore,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            transport,
            oracle: None,
            credentials,
            results,
            clock,
            settings: RunSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Without an oracle, keywords fall back to the topic and accepted hits
    /// stay unreviewed.
    pub fn with_oracle(mut self, oracle: Option<&'a dyn RelevanceOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the whole search and writes the result file.
    ///
    /// Returns `Err` only when the run cannot start (invalid configuration,
    /// no credentials, unreadable result file) or when the final write fails.
    /// Everything else ends in a [`RunSummary`] whose [`Termination`] says how
    /// the run stopped.
    pub async fn execute(&self, config: &SearchConfig) -> Result<RunSummary, SearchError> {
        let files = validate(config)?;
        let pool = self.load_pool()?;
        let aggregator = if config.fresh {
            ResultAggregator::new()
        } else {
            ResultAggregator::seeded(self.results.load(&config.output)?)
        };

        let summary = RunSummary::new(RunId::new_random());
        let span = info_span!(
            "run",
            run_id = %summary.run_id,
            profile = %config.profile,
            range = %config.range,
            output = %config.output,
        );
        self.drive(config, files, pool, aggregator, summary)
            .instrument(span)
            .await
    }

    /// Plans the windows for every configured kind without fetching results.
    pub async fn plan_only(&self, config: &SearchConfig) -> Result<Vec<QueryWindow>, SearchError> {
        validate(config)?;
        let pool = self.load_pool()?;
        let terms = self.terms(config).await;
        let mut executor = self.executor(pool);

        let planned = self.plan(config, &terms, &mut executor).await;
        self.persist_credentials(executor.into_pool());
        planned
    }

    async fn drive(
        &self,
        config: &SearchConfig,
        files: FileFilter,
        pool: CredentialPool,
        mut aggregator: ResultAggregator,
        mut summary: RunSummary,
    ) -> Result<RunSummary, SearchError> {
        let existing = aggregator.len();
        info!(existing, kinds = ?config.kinds, "run started");

        let terms = self.terms(config).await;
        summary.keywords = terms.keywords.clone();

        let mut executor = self.executor(pool);
        let mut filter = FilterPipeline::new(
            files,
            self.settings.limits,
            self.oracle,
            &config.topic,
            &terms.judgment,
        );

        match self.plan(config, &terms, &mut executor).await {
            Ok(windows) => {
                summary.windows_planned = windows.len();
                info!(windows = windows.len(), "planning finished");
                summary.termination = self
                    .search_windows(
                        config,
                        windows,
                        &mut executor,
                        &mut filter,
                        &mut aggregator,
                        &mut summary,
                    )
                    .await;
            }
            Err(SearchError::Cancelled) => {
                info!("cancelled while planning; no windows searched");
                summary.termination = Termination::Cancelled;
            }
            Err(e) => {
                warn!(error = %e, "planning aborted");
                summary.termination = Termination::Aborted(e.to_string());
            }
        }

        let stats = filter.stats();
        summary.ai_calls = stats.ai_calls;
        summary.ai_skipped = stats.ai_skipped;
        summary.ai_failed = stats.ai_failed;

        let traffic = executor.stats();
        let records = aggregator.records();
        let saved = self.results.save(&config.output, &records);
        self.persist_credentials(executor.into_pool());
        saved?;

        summary.records_written = records.len();
        summary.finished_at = Some(Timestamp::now());
        info!(
            records = summary.records_written,
            new = summary.records_written.saturating_sub(existing),
            termination = ?summary.termination,
            requests = traffic.requests,
            rate_limited = traffic.rate_limited,
            transient_retries = traffic.transient_retries,
            quota_waits = traffic.waits,
            "run finished"
        );
        Ok(summary)
    }

    async fn search_windows(
        &self,
        config: &SearchConfig,
        windows: Vec<QueryWindow>,
        executor: &mut SearchExecutor<'_>,
        filter: &mut FilterPipeline<'_>,
        aggregator: &mut ResultAggregator,
        summary: &mut RunSummary,
    ) -> Termination {
        for window in windows {
            if self.cancel.is_cancelled() {
                return Termination::Cancelled;
            }

            let span = info_span!("window", kind = %window.kind, range = %window.range);
            let failed = FailedWindow {
                kind: window.kind,
                range: window.range.to_string(),
                reason: String::new(),
            };
            let outcome = self
                .search_window(window, executor, filter, aggregator)
                .instrument(span)
                .await;

            match outcome {
                WindowOutcome::Completed(batch) => {
                    let tally = batch.tally;
                    for (entity, record) in batch.records {
                        aggregator.push(entity, record);
                    }
                    summary.windows_completed += 1;
                    summary.hits_found += tally.found;
                    summary.hits_accepted += tally.accepted;
                    summary.rejected_no_matching_file += tally.no_matching_file;
                    summary.rejected_ai += tally.ai_rejected;
                    summary.duplicates += tally.duplicates;

                    if tally.accepted > 0 {
                        if let Err(e) = self.results.save(&config.output, &aggregator.records()) {
                            warn!(error = %e, "checkpoint write failed");
                            return Termination::Aborted(e.to_string());
                        }
                    }
                }
                WindowOutcome::Cancelled => return Termination::Cancelled,
                WindowOutcome::Failed(e) if e.is_fatal() => {
                    warn!(error = %e, "run aborted");
                    return Termination::Aborted(e.to_string());
                }
                WindowOutcome::Failed(e) => {
                    warn!(window = %failed.range, error = %e, "window skipped");
                    let reason = match e {
                        SearchError::WindowFailed { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    summary.failed_windows.push(FailedWindow { reason, ..failed });
                }
            }
        }
        Termination::Completed
    }

    async fn search_window(
        &self,
        window: QueryWindow,
        executor: &mut SearchExecutor<'_>,
        filter: &mut FilterPipeline<'_>,
        aggregator: &ResultAggregator,
    ) -> WindowOutcome {
        let mut cursor = WindowCursor::new(window);
        let mut batch = WindowBatch::default();
        let mut page = 1u32;

        loop {
            let fetched = executor
                .next_page(&mut cursor)
                .instrument(debug_span!("page", number = page))
                .await;
            page += 1;

            let hits = match fetched {
                Ok(Some(hits)) => hits,
                Ok(None) => break,
                Err(_) if self.cancel.is_cancelled() => return WindowOutcome::Cancelled,
                Err(e) => return WindowOutcome::Failed(e),
            };

            for hit in hits {
                batch.tally.found += 1;
                if aggregator.contains(&hit.entity) || !batch.seen.insert(hit.entity.clone()) {
                    batch.tally.duplicates += 1;
                    continue;
                }
                match filter.accept(&hit).await {
                    FilterOutcome::Accepted(checked) => {
                        batch.tally.accepted += 1;
                        let record = ResultRecord::from_hit(&hit, checked);
                        batch.records.push((hit.entity, record));
                    }
                    FilterOutcome::Rejected(Rejection::NoMatchingFile) => {
                        batch.tally.no_matching_file += 1;
                    }
                    FilterOutcome::Rejected(Rejection::AiRejected) => {
                        batch.tally.ai_rejected += 1;
                    }
                }
            }

            if self.cancel.is_cancelled() {
                info!(
                    discarded = batch.records.len(),
                    "cancelled mid-window; discarding its hits"
                );
                return WindowOutcome::Cancelled;
            }
            if cursor.is_done() {
                break;
            }
        }

        info!(
            found = batch.tally.found,
            accepted = batch.tally.accepted,
            "window complete"
        );
        WindowOutcome::Completed(batch)
    }

    async fn plan(
        &self,
        config: &SearchConfig,
        terms: &SearchTerms,
        executor: &mut SearchExecutor<'_>,
    ) -> Result<Vec<QueryWindow>, SearchError> {
        let planner = QueryPlanner::new(self.settings.planner);
        let mut windows = Vec::new();
        for &kind in &config.kinds {
            windows.extend(planner.plan(kind, config, &terms.keywords, &mut *executor).await?);
        }
        Ok(windows)
    }

    /// Keywords and judgment for the run: from the profile when present,
    /// otherwise from the oracle, otherwise the topic itself.
    async fn terms(&self, config: &SearchConfig) -> SearchTerms {
        if let Some(terms) = config.terms.as_ref().filter(|t| has_keywords(t)) {
            return terms.clone();
        }
        let fallback = SearchTerms {
            keywords: vec![config.topic.trim().to_string()],
            judgment: config.topic.clone(),
        };
        let Some(oracle) = self.oracle else {
            return fallback;
        };
        match oracle.keywords(&config.topic, config.language.as_deref()).await {
            Ok(terms) if has_keywords(&terms) => {
                info!(keywords = ?terms.keywords, "keywords generated");
                terms
            }
            Ok(_) => {
                warn!("oracle produced no keywords; searching for the topic itself");
                fallback
            }
            Err(e) => {
                warn!(error = %e, "keyword generation failed; searching for the topic itself");
                fallback
            }
        }
    }

    fn load_pool(&self) -> Result<CredentialPool, SearchError> {
        let pool = CredentialPool::new(self.credentials.list()?);
        if pool.is_empty() {
            return Err(SearchError::CredentialExhausted { credentials: 0 });
        }
        Ok(pool)
    }

    fn executor(&self, pool: CredentialPool) -> SearchExecutor<'a> {
        SearchExecutor::new(
            self.transport,
            self.clock,
            pool,
            self.settings.executor,
            self.cancel.clone(),
        )
    }

    fn persist_credentials(&self, pool: CredentialPool) {
        if let Err(e) = self.credentials.persist(&pool.snapshot()) {
            warn!(error = %e, "could not persist credential quota state");
        }
    }
}

/// Checks everything that can be checked before the first request.
fn validate(config: &SearchConfig) -> Result<FileFilter, SearchError> {
    if config.kinds.is_empty() {
        return Err(SearchError::config("no entity kinds selected"));
    }
    let has_terms = config.terms.as_ref().is_some_and(has_keywords);
    if config.topic.trim().is_empty() && !has_terms {
        return Err(SearchError::config("topic is empty and no search keywords are configured"));
    }
    FileFilter::parse(config.file_filter.as_deref())
}

fn has_keywords(terms: &SearchTerms) -> bool {
    terms.keywords.iter().any(|k| !k.trim().is_empty())
}
