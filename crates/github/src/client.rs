//! REST client implementing [`SearchTransport`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pipeline::{
    ChangeSet, ChangedFile, CredentialHandle, EntityId, EntityKind, RateLimitMeta, RawHit,
    SearchPage, SearchRequest, SearchTransport, TransportError,
};
use reqwest::header::{HeaderMap, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{CommitItem, CommitWithFiles, FileItem, IssueItem, SearchResponse};
use crate::rate_limit::{classify, has_next_page, rate_limit_meta};

const API_VERSION: &str = "2022-11-28";
const MEDIA_TYPE: &str = "application/vnd.github+json";

/// The pull-request files endpoint serves at most 3000 files, 100 per page.
const MAX_FILE_PAGES: u32 = 30;

/// Errors raised while constructing the client. Request failures are
/// reported as [`TransportError`] instead.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Connection settings for [`GitHubClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubConfig {
    /// REST base URL, without a trailing slash.
    pub api_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("sift/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// GitHub REST API client.
///
/// Stateless apart from the connection pool: the credential for each request
/// is supplied by the caller, and quota headers are handed back untouched.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    user_agent: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        credential: &CredentialHandle,
    ) -> Result<(T, HeaderMap), TransportError> {
        let url = format!("{}{}", self.api_url, path);
        debug!(%url, slot = credential.slot(), "GET");

        let response = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(credential.token().expose())
            .header(ACCEPT, MEDIA_TYPE)
            .header(USER_AGENT, &self.user_agent)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await
            .map_err(transient)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(transient)?;

        if !status.is_success() {
            return Err(classify(status, &headers, &body, Utc::now()));
        }
        let parsed = serde_json::from_str(&body).map_err(|e| TransportError::Transient {
            message: format!("malformed response from {path}: {e}"),
            retry_after: None,
        })?;
        Ok((parsed, headers))
    }

    async fn search_commits(
        &self,
        request: &SearchRequest<'_>,
        credential: &CredentialHandle,
    ) -> Result<SearchPage, TransportError> {
        let (page, headers): (SearchResponse<CommitItem>, _) = self
            .get_json("/search/commits", &search_params(request), credential)
            .await?;
        Ok(search_page(
            page.total_count,
            page.incomplete_results,
            page.items.into_iter().filter_map(CommitItem::into_hit).collect(),
            &headers,
        ))
    }

    async fn search_pull_requests(
        &self,
        request: &SearchRequest<'_>,
        credential: &CredentialHandle,
    ) -> Result<SearchPage, TransportError> {
        let (page, headers): (SearchResponse<IssueItem>, _) = self
            .get_json("/search/issues", &search_params(request), credential)
            .await?;
        Ok(search_page(
            page.total_count,
            page.incomplete_results,
            page.items.into_iter().filter_map(IssueItem::into_hit).collect(),
            &headers,
        ))
    }

    async fn pull_request_files(
        &self,
        repository: &str,
        number: u64,
        credential: &CredentialHandle,
    ) -> Result<ChangeSet, TransportError> {
        let path = format!("/repos/{repository}/pulls/{number}/files");
        let mut files = Vec::new();
        let mut rate = RateLimitMeta::default();

        for page in 1..=MAX_FILE_PAGES {
            let params = [("per_page", "100".to_string()), ("page", page.to_string())];
            let (batch, headers): (Vec<FileItem>, _) =
                self.get_json(&path, &params, credential).await?;
            rate = rate_limit_meta(&headers);
            files.extend(batch.into_iter().map(ChangedFile::from));
            if !has_next_page(&headers) {
                break;
            }
        }
        Ok(ChangeSet { files, rate })
    }
}

#[async_trait]
impl SearchTransport for GitHubClient {
    async fn search(
        &self,
        request: &SearchRequest<'_>,
        credential: &CredentialHandle,
    ) -> Result<SearchPage, TransportError> {
        match request.kind {
            EntityKind::Commit => self.search_commits(request, credential).await,
            EntityKind::PullRequest => self.search_pull_requests(request, credential).await,
        }
    }

    async fn changes(
        &self,
        entity: &EntityId,
        credential: &CredentialHandle,
    ) -> Result<ChangeSet, TransportError> {
        match entity {
            EntityId::Commit { repository, sha } => {
                let path = format!("/repos/{repository}/commits/{sha}");
                let (detail, headers): (CommitWithFiles, _) =
                    self.get_json(&path, &[], credential).await?;
                Ok(ChangeSet {
                    files: detail.files.into_iter().map(ChangedFile::from).collect(),
                    rate: rate_limit_meta(&headers),
                })
            }
            EntityId::PullRequest { repository, number } => {
                self.pull_request_files(repository.as_str(), number.as_u64(), credential)
                    .await
            }
        }
    }
}

fn search_params(request: &SearchRequest<'_>) -> Vec<(&'static str, String)> {
    vec![
        ("q", request.query.to_string()),
        ("page", request.page.to_string()),
        ("per_page", request.per_page.to_string()),
    ]
}

fn search_page(total_count: u64, incomplete: bool, hits: Vec<RawHit>, headers: &HeaderMap) -> SearchPage {
    if incomplete {
        warn!(total_count, "search timed out on GitHub's side; results may be incomplete");
    }
    SearchPage {
        hits,
        total_count,
        has_next: has_next_page(headers),
        rate: rate_limit_meta(headers),
    }
}

fn transient(error: reqwest::Error) -> TransportError {
    TransportError::Transient {
        message: error.to_string(),
        retry_after: None,
    }
}
