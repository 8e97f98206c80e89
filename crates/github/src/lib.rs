//! Sift GitHub infrastructure adapter.
//!
//! Implements [`pipeline::SearchTransport`] against the GitHub REST API:
//! commit search, issue search restricted to pull requests, and the
//! commit-detail and pull-request-files endpoints for changed files.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules.
//! HTTP details (headers, status codes, rate-limit headers, `Link`
//! pagination) are handled here and surfaced to the engine only as
//! [`pipeline::TransportError`] and [`pipeline::RateLimitMeta`]. Credential
//! selection, rotation and back-off belong to the engine.

pub mod client;
pub mod models;
pub mod rate_limit;

pub use client::{GitHubClient, GitHubConfig, GitHubError};
