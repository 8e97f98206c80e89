//! Shared value types for the Sift search domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. a [`DateRange`] never ends before it
//! starts) and participate in domain computations.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityId, LocalId, OutputName, ProfileName, RepositoryName};

// ---------------------------------------------------------------------------
// Entity kinds
// ---------------------------------------------------------------------------

/// Which GitHub search space a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Commit,
    PullRequest,
}

impl EntityKind {
    /// Wire name used in persisted records and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::PullRequest => "pull_request",
        }
    }

    /// Returns `true` when the search API for this kind supports a
    /// `language:` qualifier. Commit search has none.
    pub fn supports_language(self) -> bool {
        matches!(self, Self::PullRequest)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Date ranges
// ---------------------------------------------------------------------------

/// An inclusive range of calendar days, `start..=end`.
///
/// Day granularity is the planner's floor: a one-day range cannot be split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Creates a range, returning `None` if `end` precedes `start`.
    #[must_use]
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// First day in the range.
    pub fn start(self) -> NaiveDate {
        self.start
    }

    /// Last day in the range (inclusive).
    pub fn end(self) -> NaiveDate {
        self.end
    }

    /// Number of days covered, always at least 1.
    pub fn days(self) -> u64 {
        // `end >= start` is an invariant, so the difference is never negative.
        (self.end - self.start).num_days().unsigned_abs() + 1
    }

    /// Returns `true` if `day` falls inside the range.
    pub fn contains(self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Splits the range at its midpoint into two adjacent, non-overlapping
    /// halves. Returns `None` for a single-day range.
    pub fn bisect(self) -> Option<(Self, Self)> {
        if self.days() < 2 {
            return None;
        }
        let left_end = self.start.checked_add_days(Days::new((self.days() - 1) / 2))?;
        let right_start = left_end.succ_opt()?;
        Some((
            Self {
                start: self.start,
                end: left_end,
            },
            Self {
                start: right_start,
                end: self.end,
            },
        ))
    }

    /// Splits the range into consecutive spans of at most `days` days.
    ///
    /// Returns an empty vector when `days` is zero.
    pub fn spans(self, days: u64) -> Vec<Self> {
        let mut out = Vec::new();
        if days == 0 {
            return out;
        }
        let mut cursor = self.start;
        while cursor <= self.end {
            let span_end = cursor
                .checked_add_days(Days::new(days - 1))
                .map_or(self.end, |d| d.min(self.end));
            out.push(Self {
                start: cursor,
                end: span_end,
            });
            match span_end.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        out
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Search terms derived from a topic: the GitHub keywords to query and the
/// predicate the relevance oracle judges candidates against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTerms {
    pub keywords: Vec<String>,
    /// Natural-language judgment criterion handed to the oracle with each diff.
    pub judgment: String,
}

/// Immutable per-run search settings.
///
/// Built by the caller (the CLI merges a saved profile with a date range) and
/// only ever read by the engine.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub profile: ProfileName,
    /// Natural-language description of what the user is looking for.
    pub topic: String,
    /// Search spaces to query, in order.
    pub kinds: Vec<EntityKind>,
    /// Language qualifier, applied to pull-request queries only.
    pub language: Option<String>,
    /// `;`-separated file-path regexes; every one must match a changed file.
    pub file_filter: Option<String>,
    pub range: DateRange,
    pub output: OutputName,
    /// Pre-generated terms from the profile. When absent the oracle is asked.
    pub terms: Option<SearchTerms>,
    /// Discard the existing output file instead of merging into it.
    pub fresh: bool,
}

// ---------------------------------------------------------------------------
// Query windows
// ---------------------------------------------------------------------------

/// One bounded search query: a kind, a time window and the keyword terms.
///
/// Produced by the planner, consumed once by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryWindow {
    pub kind: EntityKind,
    pub range: DateRange,
    pub language: Option<String>,
    pub keywords: Vec<String>,
}

impl QueryWindow {
    /// Creates a window. The language constraint is dropped for kinds whose
    /// search API has no language qualifier.
    pub fn new(
        kind: EntityKind,
        range: DateRange,
        language: Option<&str>,
        keywords: &[String],
    ) -> Self {
        let language = language
            .map(str::trim)
            .filter(|l| !l.is_empty() && kind.supports_language())
            .map(str::to_string);
        Self {
            kind,
            range,
            language,
            keywords: keywords.to_vec(),
        }
    }

    /// Returns the same query restricted to a different date range.
    pub fn with_range(&self, range: DateRange) -> Self {
        Self {
            range,
            ..self.clone()
        }
    }

    /// Renders the GitHub search `q` parameter for this window.
    pub fn query_string(&self) -> String {
        let mut parts = Vec::new();

        let terms: Vec<String> = self
            .keywords
            .iter()
            .map(|k| k.replace('"', "").trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| {
                if k.contains(char::is_whitespace) {
                    format!("\"{k}\"")
                } else {
                    k
                }
            })
            .collect();
        if !terms.is_empty() {
            parts.push(terms.join(" OR "));
        }

        let start = self.range.start().format("%Y-%m-%d");
        let end = self.range.end().format("%Y-%m-%d");
        match self.kind {
            EntityKind::Commit => parts.push(format!("committer-date:{start}..{end}")),
            EntityKind::PullRequest => {
                parts.push("type:pr".to_string());
                if let Some(language) = &self.language {
                    parts.push(format!("language:{language}"));
                }
                parts.push(format!("created:{start}..{end}"));
            }
        }
        parts.join(" ")
    }
}

impl std::fmt::Display for QueryWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.range)
    }
}

// ---------------------------------------------------------------------------
// Hits
// ---------------------------------------------------------------------------

/// A file touched by a commit or pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    /// Unified diff hunk text; `None` for binary or oversized files.
    pub patch: Option<String>,
}

/// One search result as returned by the transport, before filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub entity: EntityId,
    pub title: String,
    /// Full commit message or pull-request body.
    pub message: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub author: String,
    pub files: Vec<ChangedFile>,
}

impl RawHit {
    pub fn repository(&self) -> &RepositoryName {
        self.entity.repository()
    }

    pub fn kind(&self) -> EntityKind {
        self.entity.kind()
    }
}

// ---------------------------------------------------------------------------
// Judgment and review state
// ---------------------------------------------------------------------------

/// The relevance oracle's call on one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Match,
    NoMatch,
    Uncertain,
}

/// Review state of a persisted record, stored as `0`, `1` or `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Checked {
    /// Not reviewed by the oracle (or review failed).
    #[default]
    Unreviewed,
    /// The oracle confirmed the match.
    Passed,
    /// Judgment skipped or ambiguous; needs a human.
    Uncertain,
}

impl From<Checked> for u8 {
    fn from(value: Checked) -> Self {
        match value {
            Checked::Unreviewed => 0,
            Checked::Passed => 1,
            Checked::Uncertain => 2,
        }
    }
}

impl TryFrom<u8> for Checked {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unreviewed),
            1 => Ok(Self::Passed),
            2 => Ok(Self::Uncertain),
            other => Err(format!("checked must be 0, 1 or 2, got {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// One element of a result file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: LocalId,
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub repository: String,
    pub date: String,
    pub author: String,
    #[serde(default)]
    pub checked: Checked,
    #[serde(default)]
    pub note: String,
}

impl ResultRecord {
    /// Builds an unnumbered record from an accepted hit. The aggregator assigns
    /// the final id; `note` always starts empty.
    pub fn from_hit(hit: &RawHit, checked: Checked) -> Self {
        Self {
            id: LocalId::new(0),
            title: hit.title.clone(),
            url: hit.url.clone(),
            kind: hit.kind(),
            repository: hit.repository().to_string(),
            date: hit.created_at.to_rfc3339(),
            author: hit.author.clone(),
            checked,
            note: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so summaries never expose `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
