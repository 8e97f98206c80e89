//! Sift orchestration: the search executor, the filter stage runner and the
//! run driver.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** This crate sequences calls between the business
//! logic in the [`pipeline`] crate and the port traits it defines (GitHub
//! transport, relevance oracle, durable stores). It contains no domain rules
//! of its own and performs no I/O except through those ports.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`executor`] | [`SearchExecutor`]: pagination, credential rotation, back-off |
//! | [`filter`] | [`FilterPipeline`]: file filter, size guard, relevance judgment |
//! | [`run`] | [`SearchRun`]: planning, window-level commit, summary |
//! | [`clock`] | [`MonotonicClock`] |

pub mod clock;
pub mod executor;
pub mod filter;
pub mod run;

pub use clock::MonotonicClock;
pub use executor::{ExecutorSettings, ExecutorStats, SearchExecutor, WindowCursor};
pub use filter::{FilterOutcome, FilterPipeline, FilterStats};
pub use run::{RunSettings, SearchRun};

/// Cancellation handle accepted by [`SearchRun::with_cancellation`].
pub use tokio_util::sync::CancellationToken;
