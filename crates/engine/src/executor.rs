//! Search executor: runs paginated window queries through the credential pool.
//!
//! Every request goes through one loop that acquires a credential, issues the
//! call and reacts to the outcome:
//!
//! | Outcome | Reaction |
//! |---------|----------|
//! | success | report quota, return |
//! | rate limited | mark the credential's bucket exhausted, rotate (bounded) |
//! | unauthorized | revoke credential, rotate (bounded) |
//! | transient | back off and retry the same request (bounded) |
//! | rejected | give up on the request |
//! | pool cooling down | sleep the hinted duration, capped (bounded) |
//!
//! Search requests and changed-files fetches draw from separate GitHub
//! quotas, so the pool is always asked for a credential in the bucket the
//! request will spend.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    jitter_sample, Acquire, BackoffPolicy, ChangeSet, Clock, CountProbe, CredentialPool, EntityId,
    QueryWindow, QuotaResource, RateLimitMeta, RawHit, RetryPolicy, SearchError, SearchPage,
    SearchRequest, SearchTransport, TransportError, SEARCH_RESULT_CAP,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounds for the executor's retry loops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorSettings {
    /// Results per search page (GitHub allows up to 100).
    pub per_page: u32,
    /// Credential rotations allowed for one request before it fails.
    pub max_rotations: u32,
    /// Pool waits allowed for one request before it fails.
    pub max_waits: u32,
    /// Transient-failure schedule; `max_delay` also caps pool waits.
    pub backoff: BackoffPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            per_page: 100,
            max_rotations: 5,
            max_waits: 3,
            backoff: BackoffPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(900),
                jitter: 0.2,
            },
        }
    }
}

impl ExecutorSettings {
    /// Last page the API will serve for one query.
    pub fn max_pages(&self) -> u32 {
        let per_page = u64::from(self.per_page.max(1));
        u32::try_from(SEARCH_RESULT_CAP.div_ceil(per_page)).unwrap_or(u32::MAX)
    }
}

/// Request counters, logged when the run finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub requests: usize,
    pub rate_limited: usize,
    pub transient_retries: usize,
    pub waits: usize,
}

enum Call<'q> {
    Search(SearchRequest<'q>),
    Changes(&'q EntityId),
}

impl Call<'_> {
    fn resource(&self) -> QuotaResource {
        match self {
            Self::Search(_) => QuotaResource::Search,
            Self::Changes(_) => QuotaResource::Core,
        }
    }
}

enum Reply {
    Page(SearchPage),
    Changes(ChangeSet),
}

impl Reply {
    fn rate(&self) -> RateLimitMeta {
        match self {
            Self::Page(page) => page.rate,
            Self::Changes(changes) => changes.rate,
        }
    }

    fn into_page(self) -> Result<SearchPage, SearchError> {
        match self {
            Self::Page(page) => Ok(page),
            Self::Changes(_) => Err(mismatched("search")),
        }
    }

    fn into_changes(self) -> Result<ChangeSet, SearchError> {
        match self {
            Self::Changes(changes) => Ok(changes),
            Self::Page(_) => Err(mismatched("changed-files")),
        }
    }
}

fn mismatched(call: &str) -> SearchError {
    SearchError::TransportTransient {
        message: format!("{call} request answered with the wrong payload"),
    }
}

/// Pagination state for one window. Restartable only from scratch.
#[derive(Debug, Clone)]
pub struct WindowCursor {
    window: QueryWindow,
    query: String,
    page: u32,
    done: bool,
}

impl WindowCursor {
    pub fn new(window: QueryWindow) -> Self {
        let query = window.query_string();
        Self {
            window,
            query,
            page: 1,
            done: false,
        }
    }

    pub fn window(&self) -> &QueryWindow {
        &self.window
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Issues GitHub requests on behalf of a run.
///
/// Owns the credential pool for the duration of the run; hand it back with
/// [`SearchExecutor::into_pool`] to persist quota state.
pub struct SearchExecutor<'a> {
    transport: &'a dyn SearchTransport,
    clock: &'a dyn Clock,
    pool: CredentialPool,
    settings: ExecutorSettings,
    cancel: CancellationToken,
    stats: ExecutorStats,
}

impl<'a> SearchExecutor<'a> {
    pub fn new(
        transport: &'a dyn SearchTransport,
        clock: &'a dyn Clock,
        pool: CredentialPool,
        settings: ExecutorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            clock,
            pool,
            settings,
            cancel,
            stats: ExecutorStats::default(),
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats
    }

    pub fn into_pool(self) -> CredentialPool {
        self.pool
    }

    /// Fetches the next page of `cursor`, with changed files attached to each
    /// hit. Returns `Ok(None)` once the window is exhausted.
    ///
    /// Non-fatal failures are reported as [`SearchError::WindowFailed`].
    pub async fn next_page(
        &mut self,
        cursor: &mut WindowCursor,
    ) -> Result<Option<Vec<RawHit>>, SearchError> {
        if cursor.done {
            return Ok(None);
        }
        if cursor.page > self.settings.max_pages() {
            cursor.done = true;
            return Ok(None);
        }

        let request = SearchRequest {
            kind: cursor.window.kind,
            query: &cursor.query,
            page: cursor.page,
            per_page: self.settings.per_page,
        };
        let page = match self.call(&Call::Search(request)).await.and_then(Reply::into_page) {
            Ok(page) => page,
            Err(e) => return Err(window_failure(&cursor.window, e)),
        };

        let served = u64::from(cursor.page) * u64::from(self.settings.per_page);
        cursor.done = !page.has_next
            || page.hits.is_empty()
            || served >= page.total_count.min(SEARCH_RESULT_CAP);
        debug!(
            window = %cursor.window,
            page = cursor.page,
            hits = page.hits.len(),
            total = page.total_count,
            "page fetched"
        );
        cursor.page += 1;

        let mut hits = page.hits;
        for hit in &mut hits {
            let changes = self
                .call(&Call::Changes(&hit.entity))
                .await
                .and_then(Reply::into_changes);
            match changes {
                Ok(changes) => hit.files = changes.files,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(entity = %hit.entity, error = %e, "could not fetch changed files; continuing without them");
                }
            }
        }
        Ok(Some(hits))
    }

    /// Runs one request to completion, rotating and retrying as needed.
    async fn call(&mut self, call: &Call<'_>) -> Result<Reply, SearchError> {
        let resource = call.resource();
        let mut rotations = 0u32;
        let mut waits = 0u32;
        let mut failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SearchError::Cancelled);
            }
            let handle = match self.pool.acquire(resource, self.clock.now())? {
                Acquire::Ready(handle) => handle,
                Acquire::Wait(hint) => {
                    waits += 1;
                    if waits > self.settings.max_waits {
                        return Err(SearchError::TransportTransient {
                            message: format!(
                                "{resource} quota still exhausted after {} waits",
                                waits - 1
                            ),
                        });
                    }
                    let wait = self.settings.backoff.cap(hint);
                    info!(%resource, wait_secs = wait.as_secs(), "all credentials rate limited; waiting for reset");
                    self.stats.waits += 1;
                    self.pause(wait).await?;
                    continue;
                }
            };

            self.stats.requests += 1;
            let outcome = match call {
                Call::Search(request) => self
                    .transport
                    .search(request, &handle)
                    .await
                    .map(Reply::Page),
                Call::Changes(entity) => self
                    .transport
                    .changes(entity, &handle)
                    .await
                    .map(Reply::Changes),
            };
            let now = self.clock.now();

            let error = match outcome {
                Ok(reply) => {
                    let rate = reply.rate();
                    self.pool.report_success(
                        &handle,
                        rate.resource.unwrap_or(resource),
                        rate.remaining,
                        rate.reset_at,
                        now,
                    );
                    return Ok(reply);
                }
                Err(error) => error,
            };

            let rotate = match &error {
                TransportError::RateLimited {
                    resource: bucket,
                    reset_at,
                    ..
                } => {
                    self.stats.rate_limited += 1;
                    self.pool
                        .report_rate_limited(&handle, bucket.unwrap_or(resource), *reset_at, now);
                    true
                }
                TransportError::Unauthorized { .. } => {
                    self.pool.report_revoked(&handle);
                    true
                }
                TransportError::Transient { .. } | TransportError::Rejected { .. } => false,
            };

            let hinted = match error.retry_policy() {
                RetryPolicy::NonRetryable => {
                    return Err(SearchError::TransportTransient {
                        message: error.to_string(),
                    });
                }
                RetryPolicy::Retryable { after } => after,
            };

            if rotate {
                rotations += 1;
                if rotations > self.settings.max_rotations {
                    return Err(SearchError::TransportTransient {
                        message: format!("{error} (after {rotations} credential rotations)"),
                    });
                }
                debug!(slot = handle.slot(), rotations, error = %error, "rotating credential");
                continue;
            }

            failures += 1;
            if !self.settings.backoff.allows_retry(failures) {
                return Err(SearchError::TransportTransient {
                    message: format!("{error} (after {failures} attempts)"),
                });
            }
            let delay = match hinted {
                Some(hint) => self.settings.backoff.cap(hint),
                None => self.settings.backoff.delay_for(failures, jitter_sample()),
            };
            debug!(attempt = failures, delay_ms = delay.as_millis() as u64, error = %error, "transient failure; backing off");
            self.stats.transient_retries += 1;
            self.pause(delay).await?;
        }
    }

    /// Sleeps unless the run is cancelled first.
    async fn pause(&self, duration: Duration) -> Result<(), SearchError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(SearchError::Cancelled),
        }
    }
}

#[async_trait]
impl CountProbe for SearchExecutor<'_> {
    async fn count(&mut self, window: &QueryWindow) -> Result<u64, SearchError> {
        let query = window.query_string();
        let request = SearchRequest {
            kind: window.kind,
            query: &query,
            page: 1,
            per_page: 1,
        };
        self.call(&Call::Search(request))
            .await
            .and_then(Reply::into_page)
            .map(|page| page.total_count)
            .map_err(|e| window_failure(window, e))
    }
}

fn window_failure(window: &QueryWindow, error: SearchError) -> SearchError {
    if error.is_fatal() {
        return error;
    }
    SearchError::WindowFailed {
        window: window.to_string(),
        reason: match error {
            SearchError::TransportTransient { message } => message,
            other => other.to_string(),
        },
    }
}
