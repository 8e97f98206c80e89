//! Sift file-backed stores.
//!
//! | Store | Port | File |
//! |-------|------|------|
//! | [`ProfileStore`] | (none; read by the CLI) | `configs/<name>.json` |
//! | [`JsonCredentialStore`] | [`pipeline::CredentialStore`] | `github_tokens.json` |
//! | [`JsonResultStore`] | [`pipeline::ResultStore`] | `results/<result_file>` |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File formats and atomic replacement live here; the
//! engine sees only the port traits and [`pipeline::StoreError`].

mod fs;

pub mod credentials;
pub mod profiles;
pub mod results;

pub use credentials::JsonCredentialStore;
pub use profiles::{Profile, ProfileStore};
pub use results::JsonResultStore;
