//! Core search domain for Sift.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type and error type used by the search engine, plus the pure parts of the
//! engine itself: credential rotation, query planning, filter rules and
//! aggregation. Infrastructure crates implement the port traits defined here;
//! they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers and [`EntityId`] |
//! | [`types`] | Value types (`SearchConfig`, `QueryWindow`, `RawHit`, `ResultRecord`, ...) |
//! | [`errors`] | [`SearchError`], port errors, [`RetryPolicy`] |
//! | [`retry`] | [`BackoffPolicy`], the one back-off schedule used everywhere |
//! | [`credentials`] | [`CredentialPool`] and quota state |
//! | [`planner`] | [`QueryPlanner`] |
//! | [`filter`] | File filter, diff assembly, size guard |
//! | [`aggregate`] | [`ResultAggregator`] |
//! | [`summary`] | [`RunSummary`] |
//! | [`ports`] | Traits implemented by infrastructure crates |

pub mod aggregate;
pub mod credentials;
pub mod errors;
pub mod filter;
pub mod identifiers;
pub mod planner;
pub mod ports;
pub mod retry;
pub mod summary;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use aggregate::ResultAggregator;
pub use credentials::{
    Acquire, CredentialHandle, CredentialPool, CredentialState, Quota, QuotaResource, SecretToken,
    DEFAULT_COOLDOWN,
};
pub use errors::{OracleError, RetryPolicy, SearchError, StoreError, TransportError};
pub use filter::{assemble_diff, AssembledDiff, DiffLimits, FileFilter, Rejection};
pub use identifiers::{
    CommitSha, EntityId, LocalId, OutputName, ProfileName, PullRequestNumber, RepositoryName,
    RunId,
};
pub use planner::{PlanStrategy, QueryPlanner, SEARCH_RESULT_CAP};
pub use ports::{
    ChangeSet, Clock, CountProbe, CredentialStore, JudgeRequest, RateLimitMeta, RelevanceOracle,
    ResultStore, SearchPage, SearchRequest, SearchTransport, SystemClock,
};
pub use retry::{jitter_sample, BackoffPolicy};
pub use summary::{FailedWindow, RunSummary, Termination};
pub use types::{
    ChangedFile, Checked, DateRange, EntityKind, QueryWindow, RawHit, ResultRecord, SearchConfig,
    SearchTerms, Timestamp, Verdict,
};
