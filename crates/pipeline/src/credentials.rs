//! Credential pool with per-token quota tracking.
//!
//! The pool is an owned value mutated only through its methods; it never reads
//! the clock itself. Every operation that depends on time takes `now`, which
//! keeps rotation logic deterministic under test.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::SearchError;

/// Cooldown applied when GitHub reports a rate limit without a reset time
/// (secondary limits) or reports zero remaining calls without one.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

fn cooldown_end(now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::seconds(DEFAULT_COOLDOWN.as_secs() as i64)
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// A GitHub access token. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretToken(String);

impl SecretToken {
    /// Wraps a raw token, returning `None` for blank input.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into().trim().to_string();
        if v.is_empty() {
            None
        } else {
            Some(Self(v))
        }
    }

    /// Returns the raw token for use in an `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// A short form safe for logs: first and last four characters.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "****".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretToken({})", self.masked())
    }
}

// ---------------------------------------------------------------------------
// Quota state
// ---------------------------------------------------------------------------

/// Rate-limit bucket a request draws from.
///
/// GitHub meters search separately from the rest of the REST API (30 requests
/// a minute against 5000 an hour), so one token can be out of search calls
/// while still able to fetch commit and pull-request files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    Search,
    Core,
}

impl QuotaResource {
    /// Parses an `x-ratelimit-resource` header value. Buckets this engine
    /// never draws from yield `None`.
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim() {
            "search" => Some(Self::Search),
            "core" => Some(Self::Core),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Core => "core",
        }
    }
}

impl std::fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is known about one rate-limit bucket of one token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Calls left in the current rate-limit window; `None` when unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    /// When the current rate-limit window ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,
}

impl Quota {
    pub fn is_unknown(&self) -> bool {
        *self == Self::default()
    }

    fn is_usable(&self) -> bool {
        self.remaining != Some(0)
    }

    /// Clears exhaustion once the reset time has passed.
    fn refresh(&mut self, now: DateTime<Utc>) {
        if let Some(reset_at) = self.reset_at {
            if reset_at <= now {
                self.reset_at = None;
                if self.remaining == Some(0) {
                    self.remaining = None;
                }
            }
        }
    }
}

/// One credential and what is known about its quotas.
///
/// This is also the persisted form: the credential store checkpoints a
/// snapshot of these between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialState {
    pub token: SecretToken,
    #[serde(default)]
    pub search: Quota,
    #[serde(default)]
    pub core: Quota,
    /// Confirmed invalid by an authentication failure.
    #[serde(default)]
    pub revoked: bool,
}

impl CredentialState {
    /// A fresh credential with unknown quota.
    pub fn new(token: SecretToken) -> Self {
        Self {
            token,
            search: Quota::default(),
            core: Quota::default(),
            revoked: false,
        }
    }

    pub fn quota(&self, resource: QuotaResource) -> &Quota {
        match resource {
            QuotaResource::Search => &self.search,
            QuotaResource::Core => &self.core,
        }
    }

    fn quota_mut(&mut self, resource: QuotaResource) -> &mut Quota {
        match resource {
            QuotaResource::Search => &mut self.search,
            QuotaResource::Core => &mut self.core,
        }
    }

    fn is_usable(&self, resource: QuotaResource) -> bool {
        !self.revoked && self.quota(resource).is_usable()
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        self.search.refresh(now);
        self.core.refresh(now);
    }
}

/// A credential handed out by [`CredentialPool::acquire`].
///
/// Carries its pool slot so outcome reports land on the right entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialHandle {
    slot: usize,
    token: SecretToken,
}

impl CredentialHandle {
    pub fn token(&self) -> &SecretToken {
        &self.token
    }

    /// Position of the credential in the pool, for log fields.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Result of asking the pool for a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    /// Use this credential now.
    Ready(CredentialHandle),
    /// Nothing is usable yet; the earliest reset is this far away.
    Wait(Duration),
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Rotating set of credentials.
#[derive(Debug, Clone, Default)]
pub struct CredentialPool {
    credentials: Vec<CredentialState>,
    cursor: usize,
}

impl CredentialPool {
    /// Builds a pool, dropping duplicate tokens (first occurrence wins).
    pub fn new(states: impl IntoIterator<Item = CredentialState>) -> Self {
        let mut credentials: Vec<CredentialState> = Vec::new();
        for state in states {
            if credentials.iter().any(|c| c.token == state.token) {
                continue;
            }
            credentials.push(state);
        }
        Self {
            credentials,
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Picks the next credential with quota left in `resource`, in round-robin
    /// order.
    ///
    /// A credential whose remaining quota in that bucket is known to be zero is
    /// never returned before its reset time.
    pub fn acquire(
        &mut self,
        resource: QuotaResource,
        now: DateTime<Utc>,
    ) -> Result<Acquire, SearchError> {
        for credential in &mut self.credentials {
            credential.refresh(now);
        }

        let n = self.credentials.len();
        for offset in 0..n {
            let slot = (self.cursor + offset) % n;
            let credential = &self.credentials[slot];
            if credential.is_usable(resource) {
                self.cursor = (slot + 1) % n;
                return Ok(Acquire::Ready(CredentialHandle {
                    slot,
                    token: credential.token.clone(),
                }));
            }
        }

        let earliest = self
            .credentials
            .iter()
            .filter(|c| !c.revoked)
            .filter_map(|c| c.quota(resource).reset_at)
            .min();

        match earliest {
            Some(reset_at) => {
                let wait = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
                debug!(%resource, wait_secs = wait.as_secs(), "all credentials cooling down");
                Ok(Acquire::Wait(wait))
            }
            None => Err(SearchError::CredentialExhausted {
                credentials: self.credentials.len(),
            }),
        }
    }

    /// Records quota information from a successful response drawn from
    /// `resource`. The other bucket is left untouched.
    pub fn report_success(
        &mut self,
        handle: &CredentialHandle,
        resource: QuotaResource,
        remaining: Option<u32>,
        reset_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let Some(credential) = self.slot_mut(handle) else {
            return;
        };
        let quota = credential.quota_mut(resource);
        if remaining.is_some() {
            quota.remaining = remaining;
        } else if let Some(r) = quota.remaining {
            quota.remaining = Some(r.saturating_sub(1));
        }
        if reset_at.is_some() {
            quota.reset_at = reset_at;
        }
        if quota.remaining == Some(0) && quota.reset_at.is_none() {
            quota.reset_at = Some(cooldown_end(now));
        }
    }

    /// Marks one bucket of a credential exhausted until `reset_at` (or a
    /// default cooldown).
    pub fn report_rate_limited(
        &mut self,
        handle: &CredentialHandle,
        resource: QuotaResource,
        reset_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let Some(credential) = self.slot_mut(handle) else {
            return;
        };
        let quota = credential.quota_mut(resource);
        quota.remaining = Some(0);
        quota.reset_at = Some(reset_at.filter(|r| *r > now).unwrap_or_else(|| cooldown_end(now)));
        debug!(
            slot = handle.slot,
            %resource,
            reset_at = %quota.reset_at.map(|r| r.to_rfc3339()).unwrap_or_default(),
            "credential rate limited"
        );
    }

    /// Permanently removes a credential from rotation for this run.
    pub fn report_revoked(&mut self, handle: &CredentialHandle) {
        let Some(credential) = self.slot_mut(handle) else {
            return;
        };
        if !credential.revoked {
            warn!(token = %credential.token.masked(), "credential rejected; removing from rotation");
        }
        credential.revoked = true;
    }

    /// Current state of every credential, in pool order.
    pub fn snapshot(&self) -> Vec<CredentialState> {
        self.credentials.clone()
    }

    fn slot_mut(&mut self, handle: &CredentialHandle) -> Option<&mut CredentialState> {
        self.credentials
            .get_mut(handle.slot)
            .filter(|c| c.token == handle.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SEARCH: QuotaResource = QuotaResource::Search;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn pool(tokens: &[&str]) -> CredentialPool {
        CredentialPool::new(
            tokens
                .iter()
                .map(|t| CredentialState::new(SecretToken::new(*t).unwrap())),
        )
    }

    fn ready(a: Acquire) -> CredentialHandle {
        match a {
            Acquire::Ready(h) => h,
            Acquire::Wait(d) => panic!("expected a credential, got wait {d:?}"),
        }
    }

    #[test]
    fn rotates_round_robin() {
        let mut p = pool(&["ghp_aaaaaaaaaa", "ghp_bbbbbbbbbb"]);
        let a = ready(p.acquire(SEARCH, t0()).unwrap());
        let b = ready(p.acquire(SEARCH, t0()).unwrap());
        let c = ready(p.acquire(SEARCH, t0()).unwrap());
        assert_eq!(a.slot(), 0);
        assert_eq!(b.slot(), 1);
        assert_eq!(c.slot(), 0);
    }

    #[test]
    fn duplicate_tokens_are_collapsed() {
        let p = pool(&["ghp_aaaaaaaaaa", "ghp_aaaaaaaaaa"]);
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn rate_limited_credential_is_skipped_without_waiting() {
        let mut p = pool(&["ghp_aaaaaaaaaa", "ghp_bbbbbbbbbb"]);
        let a = ready(p.acquire(SEARCH, t0()).unwrap());
        p.report_rate_limited(&a, SEARCH, Some(t0() + chrono::Duration::seconds(60)), t0());

        for _ in 0..3 {
            let next = ready(p.acquire(SEARCH, t0()).unwrap());
            assert_eq!(next.slot(), 1);
        }
    }

    #[test]
    fn exhausted_pool_yields_wait_hint_then_recovers() {
        let mut p = pool(&["ghp_aaaaaaaaaa"]);
        let a = ready(p.acquire(SEARCH, t0()).unwrap());
        p.report_success(&a, SEARCH, Some(0), Some(t0() + chrono::Duration::seconds(30)), t0());

        assert_eq!(
            p.acquire(SEARCH, t0()).unwrap(),
            Acquire::Wait(Duration::from_secs(30))
        );

        let later = t0() + chrono::Duration::seconds(31);
        let again = ready(p.acquire(SEARCH, later).unwrap());
        assert_eq!(again.slot(), 0);
        assert_eq!(p.snapshot()[0].search.remaining, None);
    }

    #[test]
    fn zero_remaining_without_reset_gets_default_cooldown() {
        let mut p = pool(&["ghp_aaaaaaaaaa"]);
        let a = ready(p.acquire(SEARCH, t0()).unwrap());
        p.report_success(&a, SEARCH, Some(0), None, t0());
        assert_eq!(p.acquire(SEARCH, t0()).unwrap(), Acquire::Wait(DEFAULT_COOLDOWN));
    }

    #[test]
    fn revoked_everywhere_is_fatal() {
        let mut p = pool(&["ghp_aaaaaaaaaa", "ghp_bbbbbbbbbb"]);
        let a = ready(p.acquire(SEARCH, t0()).unwrap());
        let b = ready(p.acquire(SEARCH, t0()).unwrap());
        p.report_revoked(&a);
        p.report_revoked(&a);
        p.report_revoked(&b);
        assert!(matches!(
            p.acquire(SEARCH, t0()),
            Err(SearchError::CredentialExhausted { credentials: 2 })
        ));
    }

    #[test]
    fn empty_pool_is_fatal() {
        let mut p = CredentialPool::default();
        assert!(matches!(
            p.acquire(SEARCH, t0()),
            Err(SearchError::CredentialExhausted { credentials: 0 })
        ));
    }

    #[test]
    fn reports_are_idempotent() {
        let mut p = pool(&["ghp_aaaaaaaaaa"]);
        let a = ready(p.acquire(SEARCH, t0()).unwrap());
        let reset = Some(t0() + chrono::Duration::seconds(10));
        p.report_rate_limited(&a, SEARCH, reset, t0());
        let once = p.snapshot();
        p.report_rate_limited(&a, SEARCH, reset, t0());
        assert_eq!(p.snapshot(), once);
    }

    #[test]
    fn success_without_headers_decrements_known_quota() {
        let mut p = pool(&["ghp_aaaaaaaaaa"]);
        let a = ready(p.acquire(SEARCH, t0()).unwrap());
        p.report_success(&a, SEARCH, Some(2), None, t0());
        p.report_success(&a, SEARCH, None, None, t0());
        assert_eq!(p.snapshot()[0].search.remaining, Some(1));
    }

    #[test]
    fn exhausted_search_quota_leaves_core_calls_available() {
        let mut p = pool(&["ghp_aaaaaaaaaa"]);
        let a = ready(p.acquire(SEARCH, t0()).unwrap());
        p.report_success(&a, SEARCH, Some(0), Some(t0() + chrono::Duration::seconds(300)), t0());

        assert_eq!(
            p.acquire(SEARCH, t0()).unwrap(),
            Acquire::Wait(Duration::from_secs(300))
        );
        let core = ready(p.acquire(QuotaResource::Core, t0()).unwrap());
        assert_eq!(core.slot(), 0);

        p.report_success(&core, QuotaResource::Core, Some(4999), None, t0());
        let state = &p.snapshot()[0];
        assert_eq!(state.search.remaining, Some(0));
        assert_eq!(state.core.remaining, Some(4999));
    }

    #[test]
    fn resource_header_values() {
        assert_eq!(QuotaResource::from_header("search"), Some(QuotaResource::Search));
        assert_eq!(QuotaResource::from_header(" core "), Some(QuotaResource::Core));
        assert_eq!(QuotaResource::from_header("graphql"), None);
    }

    #[test]
    fn token_debug_is_masked() {
        let token = SecretToken::new("ghp_1234567890abcdef").unwrap();
        assert_eq!(format!("{token:?}"), "SecretToken(ghp_...cdef)");
        assert!(SecretToken::new("   ").is_none());
    }
}
