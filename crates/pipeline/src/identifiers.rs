//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example, a
//! [`PullRequestNumber`] with a [`LocalId`] even though both are `u64` under the
//! hood.
//!
//! [`EntityId`] is the dedup key for everything the engine emits: one GitHub
//! commit or pull request, identified by kind, repository and natural key.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EntityKind;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for u64-wrapped newtypes.
// Generates: struct (Copy), new(), as_u64(), Display.
// ---------------------------------------------------------------------------
macro_rules! u64_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new identifier from a raw integer.
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the underlying integer value.
            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: integer-backed
// ---------------------------------------------------------------------------

u64_id! {
    /// Number of a GitHub pull request within its repository.
    PullRequestNumber
}

u64_id! {
    /// Local, 1-based position of a record inside one result file.
    ///
    /// Assigned by the aggregator in final emission order; dense within a file.
    LocalId
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one invocation of the search engine.
///
/// Generated fresh for every run and attached to the `run` span so all activity
/// from a single run can be correlated in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed
// ---------------------------------------------------------------------------

string_id! {
    /// A GitHub repository in `"owner/repo"` format.
    RepositoryName
}

string_id! {
    /// A Git commit SHA (40-character lowercase hex string).
    CommitSha
}

string_id! {
    /// Name of a saved search profile (file stem under the profiles directory).
    ProfileName
}

string_id! {
    /// Name of a result file (e.g. `"serde_results.json"`).
    OutputName
}

// ---------------------------------------------------------------------------
// Entity identity
// ---------------------------------------------------------------------------

/// Globally unique identity of one search hit.
///
/// Two hits with equal `EntityId` are the same GitHub object and must never
/// receive two local ids in one output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityId {
    Commit {
        repository: RepositoryName,
        sha: CommitSha,
    },
    PullRequest {
        repository: RepositoryName,
        number: PullRequestNumber,
    },
}

impl EntityId {
    /// Returns which search space the entity belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Commit { .. } => EntityKind::Commit,
            Self::PullRequest { .. } => EntityKind::PullRequest,
        }
    }

    /// Returns the repository the entity lives in.
    pub fn repository(&self) -> &RepositoryName {
        match self {
            Self::Commit { repository, .. } | Self::PullRequest { repository, .. } => repository,
        }
    }

    /// Recovers the identity from a GitHub HTML URL.
    ///
    /// Accepts `https://<host>/<owner>/<repo>/commit/<sha>` and
    /// `https://<host>/<owner>/<repo>/pull/<number>`. Persisted records only
    /// carry the URL, so this is how existing output files are re-keyed.
    pub fn from_html_url(url: &str) -> Option<Self> {
        let path = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url);
        let mut segments = path.split('/').filter(|s| !s.is_empty()).skip(1);

        let owner = segments.next()?;
        let repo = segments.next()?;
        let kind = segments.next()?;
        let key = segments.next()?;
        let repository = RepositoryName::new(format!("{owner}/{repo}"))?;

        match kind {
            "commit" => Some(Self::Commit {
                repository,
                sha: CommitSha::new(key.to_ascii_lowercase())?,
            }),
            "pull" => key.parse().ok().map(|n| Self::PullRequest {
                repository,
                number: PullRequestNumber::new(n),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Commit { repository, sha } => write!(f, "{repository}@{sha}"),
            Self::PullRequest { repository, number } => write!(f, "{repository}#{number}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_ids_are_rejected() {
        assert!(RepositoryName::new("").is_none());
        assert_eq!(
            RepositoryName::new("serde-rs/serde").map(|r| r.to_string()),
            Some("serde-rs/serde".to_string())
        );
    }

    #[test]
    fn entity_id_from_commit_url() {
        let id = EntityId::from_html_url(
            "https://github.com/serde-rs/serde/commit/ABCDEF0123456789abcdef0123456789abcdef01",
        )
        .unwrap();
        assert_eq!(id.kind(), EntityKind::Commit);
        assert_eq!(id.repository().as_str(), "serde-rs/serde");
        assert_eq!(
            id.to_string(),
            "serde-rs/serde@abcdef0123456789abcdef0123456789abcdef01"
        );
    }

    #[test]
    fn entity_id_from_pull_url() {
        let id = EntityId::from_html_url("https://github.com/tokio-rs/tokio/pull/6512").unwrap();
        assert_eq!(
            id,
            EntityId::PullRequest {
                repository: RepositoryName::new("tokio-rs/tokio").unwrap(),
                number: PullRequestNumber::new(6512),
            }
        );
    }

    #[test]
    fn entity_id_rejects_other_urls() {
        assert!(EntityId::from_html_url("https://github.com/tokio-rs/tokio").is_none());
        assert!(EntityId::from_html_url("https://github.com/tokio-rs/tokio/issues/1").is_none());
        assert!(EntityId::from_html_url("https://github.com/tokio-rs/tokio/pull/abc").is_none());
    }
}
