//! Wire shapes of the GitHub REST responses the client reads.
//!
//! Only the fields Sift uses are declared; everything else is ignored.

use chrono::{DateTime, Utc};
use pipeline::{ChangedFile, EntityId, RawHit};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct SearchResponse<T> {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct UserRef {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct GitActor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetail {
    pub message: String,
    #[serde(default)]
    pub author: Option<GitActor>,
    #[serde(default)]
    pub committer: Option<GitActor>,
}

/// One item of `GET /search/commits`.
#[derive(Debug, Deserialize)]
pub struct CommitItem {
    pub sha: String,
    pub html_url: String,
    pub commit: CommitDetail,
    /// The GitHub account linked to the commit author, when there is one.
    #[serde(default)]
    pub author: Option<UserRef>,
}

/// One item of `GET /search/issues`.
#[derive(Debug, Deserialize)]
pub struct IssueItem {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user: Option<UserRef>,
    /// Present only when the issue is a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct FileItem {
    pub filename: String,
    #[serde(default)]
    pub patch: Option<String>,
}

/// `GET /repos/{owner}/{repo}/commits/{sha}`, files only.
#[derive(Debug, Deserialize)]
pub struct CommitWithFiles {
    #[serde(default)]
    pub files: Vec<FileItem>,
}

impl From<FileItem> for ChangedFile {
    fn from(file: FileItem) -> Self {
        Self {
            path: file.filename,
            patch: file.patch,
        }
    }
}

impl CommitItem {
    /// Converts to a hit. Returns `None` for items whose URL or date is
    /// missing or unrecognisable.
    pub fn into_hit(self) -> Option<RawHit> {
        let entity = EntityId::from_html_url(&self.html_url)?;
        if !matches!(entity, EntityId::Commit { .. }) {
            warn!(url = %self.html_url, "commit search returned a non-commit URL");
            return None;
        }
        let date = self
            .commit
            .committer
            .as_ref()
            .and_then(|c| c.date)
            .or_else(|| self.commit.author.as_ref().and_then(|a| a.date));
        let Some(created_at) = date else {
            warn!(sha = %self.sha, "commit without a date; skipped");
            return None;
        };
        let author = self
            .commit
            .author
            .and_then(|a| a.name)
            .or_else(|| self.author.map(|u| u.login))
            .unwrap_or_default();
        let title = self.commit.message.lines().next().unwrap_or_default().to_string();

        Some(RawHit {
            entity,
            title,
            message: self.commit.message,
            url: self.html_url,
            created_at,
            author,
            files: Vec::new(),
        })
    }
}

impl IssueItem {
    /// Converts to a hit. Returns `None` for plain issues.
    pub fn into_hit(self) -> Option<RawHit> {
        self.pull_request.as_ref()?;
        let entity = EntityId::from_html_url(&self.html_url)?;
        Some(RawHit {
            entity,
            title: self.title,
            message: self.body.unwrap_or_default(),
            url: self.html_url,
            created_at: self.created_at,
            author: self.user.map(|u| u.login).unwrap_or_default(),
            files: Vec::new(),
        })
    }
}
