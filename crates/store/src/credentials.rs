//! GitHub tokens and their last known quota.
//!
//! File format:
//!
//! ```json
//! {
//!   "tokens": ["ghp_...", "ghp_..."],
//!   "quota": {
//!     "ghp_...": {
//!       "search": { "remaining": 0, "reset_at": "2024-01-01T12:34:56Z" },
//!       "core": { "remaining": 4812 }
//!     }
//!   }
//! }
//! ```
//!
//! `tokens` is edited by hand. `quota` is rewritten after every run so the
//! next run starts with credentials that are still cooling down skipped.
//! Search and core quotas are kept apart, as GitHub meters them separately.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pipeline::{CredentialState, CredentialStore, Quota, SecretToken, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::fs::{read_json, write_json_atomic};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    quota: BTreeMap<String, TokenQuota>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TokenQuota {
    #[serde(default, skip_serializing_if = "Quota::is_unknown")]
    search: Quota,
    #[serde(default, skip_serializing_if = "Quota::is_unknown")]
    core: Quota,
}

/// Token file backing the credential pool.
///
/// Revocation is not persisted: a token rejected in one run is tried again in
/// the next, since the user may have fixed its scopes in between.
#[derive(Debug, Clone)]
pub struct JsonCredentialStore {
    path: PathBuf,
}

impl JsonCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<TokenFile, StoreError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }
}

impl CredentialStore for JsonCredentialStore {
    fn list(&self) -> Result<Vec<CredentialState>, StoreError> {
        let file = self.read()?;
        if file.tokens.is_empty() {
            warn!(path = %self.path.display(), "no GitHub tokens configured");
        }
        let states: Vec<CredentialState> = file
            .tokens
            .iter()
            .filter_map(|raw| {
                let token = SecretToken::new(raw.as_str())?;
                let quota = file.quota.get(token.expose()).copied().unwrap_or_default();
                Some(CredentialState {
                    search: quota.search,
                    core: quota.core,
                    ..CredentialState::new(token)
                })
            })
            .collect();
        info!(count = states.len(), "GitHub tokens loaded");
        Ok(states)
    }

    fn persist(&self, states: &[CredentialState]) -> Result<(), StoreError> {
        let mut file = self.read()?;
        for state in states {
            let quota = TokenQuota {
                search: state.search,
                core: state.core,
            };
            let key = state.token.expose().to_string();
            if quota == TokenQuota::default() {
                file.quota.remove(&key);
            } else {
                file.quota.insert(key, quota);
            }
        }
        // Drop quota for tokens the user has since removed.
        let known: Vec<String> = file.tokens.iter().map(|t| t.trim().to_string()).collect();
        file.quota.retain(|token, _| known.contains(token));
        write_json_atomic(&self.path, &file)
    }
}
