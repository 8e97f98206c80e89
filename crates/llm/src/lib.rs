//! Sift LLM infrastructure adapter.
//!
//! Implements [`pipeline::RelevanceOracle`] against any OpenAI-compatible
//! `/chat/completions` endpoint. Keyword generation and relevance judgment
//! are each one chat completion; prompts live in [`prompts`] and response
//! interpretation in [`parse`].
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting, response parsing
//! and provider retries live here. The engine sees only
//! [`pipeline::RelevanceOracle`] and [`pipeline::OracleError`].

pub mod client;
pub mod parse;
pub mod prompts;

pub use client::{ChatOracle, LlmConfig, LlmError};
