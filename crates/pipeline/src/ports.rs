//! Port traits implemented by infrastructure crates.
//!
//! | Port | Implemented by |
//! |------|----------------|
//! | [`SearchTransport`] | `github::GitHubClient` |
//! | [`RelevanceOracle`] | `llm::ChatOracle` |
//! | [`CredentialStore`] | `store::JsonCredentialStore` |
//! | [`ResultStore`] | `store::JsonResultStore` |
//! | [`Clock`] | [`SystemClock`], `engine::MonotonicClock` |
//! | [`CountProbe`] | `engine::SearchExecutor` |
//!
//! Async ports use `async_trait` so they stay dyn-compatible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    ChangedFile, CredentialHandle, CredentialState, EntityId, EntityKind, OracleError,
    OutputName, QueryWindow, QuotaResource, RawHit, ResultRecord, SearchError, SearchTerms, StoreError,
    TransportError, Verdict,
};

// ---------------------------------------------------------------------------
// GitHub transport
// ---------------------------------------------------------------------------

/// Rate-limit information attached to every successful response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitMeta {
    /// Bucket named by the response; `None` when the header is absent.
    pub resource: Option<QuotaResource>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// One page of a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRequest<'a> {
    pub kind: EntityKind,
    /// Fully rendered `q` parameter.
    pub query: &'a str,
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
}

/// A page of search results.
///
/// Hits come back without changed files; those are fetched separately through
/// [`SearchTransport::changes`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub hits: Vec<RawHit>,
    /// Total matches reported by the API for the whole query.
    pub total_count: u64,
    /// Whether the API advertises a further page.
    pub has_next: bool,
    pub rate: RateLimitMeta,
}

/// Files changed by one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub files: Vec<ChangedFile>,
    pub rate: RateLimitMeta,
}

/// Access to the GitHub search API with an explicit credential per request.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn search(
        &self,
        request: &SearchRequest<'_>,
        credential: &CredentialHandle,
    ) -> Result<SearchPage, TransportError>;

    async fn changes(
        &self,
        entity: &EntityId,
        credential: &CredentialHandle,
    ) -> Result<ChangeSet, TransportError>;
}

// ---------------------------------------------------------------------------
// Relevance oracle
// ---------------------------------------------------------------------------

/// Everything the oracle sees about one candidate.
#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    pub topic: &'a str,
    /// Judgment criterion produced alongside the keywords.
    pub judgment: &'a str,
    pub title: &'a str,
    pub message: &'a str,
    pub url: &'a str,
    pub files: &'a [String],
    pub diff: &'a str,
}

/// AI capability consumed by the engine.
#[async_trait]
pub trait RelevanceOracle: Send + Sync {
    /// Derives GitHub search keywords and a judgment predicate from a topic.
    async fn keywords(
        &self,
        topic: &str,
        language: Option<&str>,
    ) -> Result<SearchTerms, OracleError>;

    /// Decides whether a diff is relevant to the topic.
    async fn judge(&self, request: &JudgeRequest<'_>) -> Result<Verdict, OracleError>;
}

// ---------------------------------------------------------------------------
// Durable state
// ---------------------------------------------------------------------------

/// Source of credentials and sink for quota checkpoints.
pub trait CredentialStore: Send + Sync {
    fn list(&self) -> Result<Vec<CredentialState>, StoreError>;

    fn persist(&self, states: &[CredentialState]) -> Result<(), StoreError>;
}

/// Named result files.
pub trait ResultStore: Send + Sync {
    /// Returns the records in `name`, or an empty vector if it does not exist.
    fn load(&self, name: &OutputName) -> Result<Vec<ResultRecord>, StoreError>;

    /// Replaces the content of `name` with `records`.
    fn save(&self, name: &OutputName, records: &[ResultRecord]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Time and probing
// ---------------------------------------------------------------------------

/// Wall-clock source for quota bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cheap result-count estimate for a window, used by the planner.
#[async_trait]
pub trait CountProbe: Send {
    async fn count(&mut self, window: &QueryWindow) -> Result<u64, SearchError>;
}
