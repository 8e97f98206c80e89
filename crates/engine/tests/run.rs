//! End-to-end runs of the engine against in-memory ports.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use engine::{CancellationToken, MonotonicClock, RunSettings, SearchRun};
use pipeline::{
    ChangeSet, ChangedFile, Checked, CommitSha, CredentialHandle, CredentialState,
    CredentialStore, DateRange, EntityId, EntityKind, JudgeRequest, OracleError, OutputName,
    PlanStrategy, ProfileName, Quota, QuotaResource, RateLimitMeta, RawHit, RelevanceOracle, RepositoryName,
    ResultRecord, ResultStore, SearchConfig, SearchError, SearchPage, SearchRequest,
    SearchTerms, SearchTransport, SecretToken, StoreError, Termination, TransportError, Verdict,
};
use pretty_assertions::assert_eq;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn commit(sha: &str, d: u32) -> RawHit {
    RawHit {
        entity: EntityId::Commit {
            repository: RepositoryName::new("acme/api").unwrap(),
            sha: CommitSha::new(sha).unwrap(),
        },
        title: format!("commit {sha}"),
        message: format!("commit {sha}\n\nbody"),
        url: format!("https://github.com/acme/api/commit/{sha}"),
        created_at: Utc.from_utc_datetime(&day(d).and_hms_opt(12, 0, 0).unwrap()),
        author: "octocat".into(),
        files: Vec::new(),
    }
}

/// Parses the date qualifier back out of a rendered query.
fn query_range(query: &str) -> (NaiveDate, NaiveDate) {
    let qualifier = query
        .split_whitespace()
        .find_map(|part| {
            part.strip_prefix("committer-date:")
                .or_else(|| part.strip_prefix("created:"))
        })
        .expect("query carries a date qualifier");
    let (start, end) = qualifier.split_once("..").unwrap();
    (
        NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap(),
        NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap(),
    )
}

#[derive(Default)]
struct FakeGitHub {
    hits: Vec<RawHit>,
    /// Tokens that answer every request with a 429.
    throttled: Vec<String>,
    /// Windows whose search always fails with a 422.
    broken_from: Option<NaiveDate>,
    /// Cancels the run when a search for a window starting on this day arrives.
    cancel_on: Option<(NaiveDate, CancellationToken)>,
    tokens_used: Mutex<Vec<String>>,
}

impl FakeGitHub {
    fn with_hits(hits: Vec<RawHit>) -> Self {
        Self {
            hits,
            ..Self::default()
        }
    }

    fn tokens_used(&self) -> Vec<String> {
        self.tokens_used.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchTransport for FakeGitHub {
    async fn search(
        &self,
        request: &SearchRequest<'_>,
        credential: &CredentialHandle,
    ) -> Result<SearchPage, TransportError> {
        let token = credential.token().expose().to_string();
        self.tokens_used.lock().unwrap().push(token.clone());
        if self.throttled.contains(&token) {
            return Err(TransportError::RateLimited {
                resource: None,
                reset_at: Some(Utc::now() + Duration::seconds(60)),
                message: "API rate limit exceeded".into(),
            });
        }

        let (start, end) = query_range(request.query);
        if Some(start) == self.broken_from {
            return Err(TransportError::Rejected {
                status: 422,
                message: "Validation Failed".into(),
            });
        }
        if let Some((trigger, cancel)) = &self.cancel_on {
            if *trigger == start {
                cancel.cancel();
            }
        }

        let matching: Vec<RawHit> = self
            .hits
            .iter()
            .filter(|h| {
                let d = h.created_at.date_naive();
                d >= start && d <= end
            })
            .cloned()
            .collect();
        let per_page = request.per_page as usize;
        let offset = (request.page as usize - 1) * per_page;
        let page: Vec<RawHit> = matching.iter().skip(offset).take(per_page).cloned().collect();
        Ok(SearchPage {
            has_next: offset + page.len() < matching.len(),
            total_count: matching.len() as u64,
            hits: page,
            rate: RateLimitMeta {
                resource: Some(QuotaResource::Search),
                remaining: Some(29),
                reset_at: None,
            },
        })
    }

    async fn changes(
        &self,
        entity: &EntityId,
        _credential: &CredentialHandle,
    ) -> Result<ChangeSet, TransportError> {
        Ok(ChangeSet {
            files: vec![ChangedFile {
                path: "app/loader.py".into(),
                patch: Some(format!("+# change for {entity}")),
            }],
            rate: RateLimitMeta::default(),
        })
    }
}

/// Answers by commit URL; anything unlisted is a match.
#[derive(Default)]
struct ScriptedOracle {
    verdicts: HashMap<String, Verdict>,
    judged: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    fn answering(verdicts: impl IntoIterator<Item = (String, Verdict)>) -> Self {
        Self {
            verdicts: verdicts.into_iter().collect(),
            ..Self::default()
        }
    }

    fn judged(&self) -> Vec<String> {
        self.judged.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelevanceOracle for ScriptedOracle {
    async fn keywords(&self, _: &str, _: Option<&str>) -> Result<SearchTerms, OracleError> {
        Ok(SearchTerms {
            keywords: vec!["deserialization".into(), "pickle loads".into()],
            judgment: "fixes unsafe deserialization".into(),
        })
    }

    async fn judge(&self, request: &JudgeRequest<'_>) -> Result<Verdict, OracleError> {
        self.judged.lock().unwrap().push(request.url.to_string());
        Ok(self
            .verdicts
            .get(request.url)
            .copied()
            .unwrap_or(Verdict::Match))
    }
}

struct MemoryCredentials {
    states: Mutex<Vec<CredentialState>>,
}

impl MemoryCredentials {
    fn new(tokens: &[&str]) -> Self {
        Self {
            states: Mutex::new(
                tokens
                    .iter()
                    .map(|t| CredentialState::new(SecretToken::new(*t).unwrap()))
                    .collect(),
            ),
        }
    }
}

impl CredentialStore for MemoryCredentials {
    fn list(&self) -> Result<Vec<CredentialState>, StoreError> {
        Ok(self.states.lock().unwrap().clone())
    }

    fn persist(&self, states: &[CredentialState]) -> Result<(), StoreError> {
        *self.states.lock().unwrap() = states.to_vec();
        Ok(())
    }
}

#[derive(Default)]
struct MemoryResults {
    files: Mutex<HashMap<String, Vec<ResultRecord>>>,
}

impl MemoryResults {
    fn get(&self, name: &str) -> Vec<ResultRecord> {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl ResultStore for MemoryResults {
    fn load(&self, name: &OutputName) -> Result<Vec<ResultRecord>, StoreError> {
        Ok(self.get(name.as_str()))
    }

    fn save(&self, name: &OutputName, records: &[ResultRecord]) -> Result<(), StoreError> {
        self.files
            .lock()
            .unwrap()
            .insert(name.as_str().to_string(), records.to_vec());
        Ok(())
    }
}

fn config(first: u32, last: u32) -> SearchConfig {
    SearchConfig {
        profile: ProfileName::new("deser").unwrap(),
        topic: "fix deserialization vulnerability".into(),
        kinds: vec![EntityKind::Commit],
        language: None,
        file_filter: Some(r"\.py$".into()),
        range: DateRange::new(day(first), day(last)).unwrap(),
        output: OutputName::new("deser.json").unwrap(),
        terms: None,
        fresh: false,
    }
}

fn daily() -> RunSettings {
    RunSettings {
        planner: PlanStrategy::FixedSpan { days: 1 },
        ..RunSettings::default()
    }
}

fn urls(records: &[ResultRecord]) -> Vec<String> {
    records.iter().map(|r| r.url.clone()).collect()
}

fn ids(records: &[ResultRecord]) -> Vec<u64> {
    records.iter().map(|r| r.id.as_u64()).collect()
}

fn anchor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rate_limited_credential_rotates_without_sleeping() {
    let mut github = FakeGitHub::with_hits(vec![commit("aaa111", 1)]);
    github.throttled = vec!["token-a".into()];
    let tokens = MemoryCredentials::new(&["token-a", "token-b"]);
    let results = MemoryResults::default();
    let clock = MonotonicClock::new();

    let started = tokio::time::Instant::now();
    let summary = SearchRun::new(&github, &tokens, &results, &clock)
        .with_settings(daily())
        .execute(&config(1, 1))
        .await
        .unwrap();

    assert!(started.elapsed() < std::time::Duration::from_secs(60));
    assert_eq!(summary.termination, Termination::Completed);
    let used = github.tokens_used();
    assert_eq!(&used[..2], &["token-a".to_string(), "token-b".to_string()]);
    assert_eq!(results.get("deser.json").len(), 1);

    let persisted = tokens.list().unwrap();
    assert_eq!(persisted[0].search.remaining, Some(0));
    assert!(persisted[0].search.reset_at.is_some());
    assert_eq!(persisted[0].core, Quota::default());
    assert_eq!(persisted[1].search.remaining, Some(29));
}

#[tokio::test]
async fn oracle_verdicts_decide_inclusion_and_checked_state() {
    let github = FakeGitHub::with_hits(vec![commit("aaa111", 1), commit("bbb222", 1), commit("ccc333", 2)]);
    let oracle = ScriptedOracle::answering([
        ("https://github.com/acme/api/commit/bbb222".to_string(), Verdict::NoMatch),
        ("https://github.com/acme/api/commit/ccc333".to_string(), Verdict::Uncertain),
    ]);
    let tokens = MemoryCredentials::new(&["token-a"]);
    let results = MemoryResults::default();
    let clock = MonotonicClock::starting_at(anchor());

    let summary = SearchRun::new(&github, &tokens, &results, &clock)
        .with_oracle(Some(&oracle))
        .with_settings(daily())
        .execute(&config(1, 2))
        .await
        .unwrap();

    let records = results.get("deser.json");
    assert_eq!(
        urls(&records),
        vec![
            "https://github.com/acme/api/commit/aaa111".to_string(),
            "https://github.com/acme/api/commit/ccc333".to_string(),
        ]
    );
    assert_eq!(records[0].checked, Checked::Passed);
    assert_eq!(records[1].checked, Checked::Uncertain);
    assert_eq!(ids(&records), vec![1, 2]);
    assert_eq!(summary.rejected_ai, 1);
    assert_eq!(summary.ai_calls, 3);
    assert_eq!(summary.keywords, vec!["deserialization", "pickle loads"]);
}

#[tokio::test]
async fn cancellation_keeps_only_completed_windows() {
    let hits: Vec<RawHit> = (1..=5)
        .flat_map(|d| [commit(&format!("{d}aaaaa"), d), commit(&format!("{d}bbbbb"), d)])
        .collect();
    let cancel = CancellationToken::new();
    let mut github = FakeGitHub::with_hits(hits);
    github.cancel_on = Some((day(4), cancel.clone()));
    let tokens = MemoryCredentials::new(&["token-a"]);
    let results = MemoryResults::default();
    let clock = MonotonicClock::starting_at(anchor());

    let summary = SearchRun::new(&github, &tokens, &results, &clock)
        .with_settings(daily())
        .with_cancellation(cancel)
        .execute(&config(1, 5))
        .await
        .unwrap();

    assert_eq!(summary.termination, Termination::Cancelled);
    assert_eq!(summary.windows_planned, 5);
    assert_eq!(summary.windows_completed, 3);
    let records = results.get("deser.json");
    assert_eq!(ids(&records), vec![1, 2, 3, 4, 5, 6]);
    assert!(records
        .iter()
        .all(|r| !r.url.contains("/4aaaaa") && !r.url.contains("/4bbbbb")));
    assert_eq!(summary.records_written, 6);
}

#[tokio::test]
async fn failed_window_is_listed_and_the_run_continues() {
    let mut github = FakeGitHub::with_hits(vec![commit("aaa111", 1), commit("bbb222", 2), commit("ccc333", 3)]);
    github.broken_from = Some(day(2));
    let tokens = MemoryCredentials::new(&["token-a"]);
    let results = MemoryResults::default();
    let clock = MonotonicClock::starting_at(anchor());

    let summary = SearchRun::new(&github, &tokens, &results, &clock)
        .with_settings(daily())
        .execute(&config(1, 3))
        .await
        .unwrap();

    assert_eq!(summary.termination, Termination::Completed);
    assert_eq!(summary.windows_completed, 2);
    assert_eq!(summary.failed_windows.len(), 1);
    assert_eq!(summary.failed_windows[0].range, "2024-01-02..2024-01-02");
    assert_eq!(results.get("deser.json").len(), 2);
}

#[tokio::test]
async fn merge_mode_deduplicates_against_the_existing_file() {
    let github = FakeGitHub::with_hits(vec![commit("aaa111", 1), commit("bbb222", 2)]);
    let tokens = MemoryCredentials::new(&["token-a"]);
    let results = MemoryResults::default();
    let clock = MonotonicClock::starting_at(anchor());

    let mut reviewed = ResultRecord::from_hit(&commit("aaa111", 1), Checked::Passed);
    reviewed.id = pipeline::LocalId::new(7);
    reviewed.note = "verified".into();
    results
        .save(&OutputName::new("deser.json").unwrap(), &[reviewed])
        .unwrap();

    let summary = SearchRun::new(&github, &tokens, &results, &clock)
        .with_settings(daily())
        .execute(&config(1, 2))
        .await
        .unwrap();

    let records = results.get("deser.json");
    assert_eq!(ids(&records), vec![1, 2]);
    assert_eq!(records[0].note, "verified");
    assert_eq!(records[1].url, "https://github.com/acme/api/commit/bbb222");
    assert_eq!(records[1].checked, Checked::Unreviewed);
    assert_eq!(summary.duplicates, 1);
}

#[tokio::test]
async fn file_filter_rejects_hits_without_matching_paths() {
    let github = FakeGitHub::with_hits(vec![commit("aaa111", 1)]);
    let tokens = MemoryCredentials::new(&["token-a"]);
    let results = MemoryResults::default();
    let clock = MonotonicClock::starting_at(anchor());
    let mut cfg = config(1, 1);
    cfg.file_filter = Some(r"\.java$".into());

    let summary = SearchRun::new(&github, &tokens, &results, &clock)
        .with_settings(daily())
        .execute(&cfg)
        .await
        .unwrap();

    assert_eq!(summary.rejected_no_matching_file, 1);
    assert!(results.get("deser.json").is_empty());
}

#[tokio::test]
async fn empty_credential_store_fails_before_searching() {
    let github = FakeGitHub::default();
    let tokens = MemoryCredentials::new(&[]);
    let results = MemoryResults::default();
    let clock = MonotonicClock::starting_at(anchor());

    let err = SearchRun::new(&github, &tokens, &results, &clock)
        .execute(&config(1, 1))
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::CredentialExhausted { .. }));
    assert!(github.tokens_used().is_empty());
}

#[tokio::test]
async fn plan_only_probes_without_fetching_changes() {
    let hits: Vec<RawHit> = (1..=4).map(|d| commit(&format!("{d}ccccc"), d)).collect();
    let github = FakeGitHub::with_hits(hits);
    let tokens = MemoryCredentials::new(&["token-a"]);
    let results = MemoryResults::default();
    let clock = MonotonicClock::starting_at(anchor());

    let windows = SearchRun::new(&github, &tokens, &results, &clock)
        .with_settings(RunSettings {
            planner: PlanStrategy::Probe { cap: 2 },
            ..RunSettings::default()
        })
        .plan_only(&config(1, 4))
        .await
        .unwrap();

    let ranges: Vec<String> = windows.iter().map(|w| w.range.to_string()).collect();
    assert_eq!(ranges, vec!["2024-01-01..2024-01-02", "2024-01-03..2024-01-04"]);
    assert!(results.get("deser.json").is_empty());
}

#[tokio::test]
async fn cancelling_during_planning_stops_count_queries() {
    let hits: Vec<RawHit> = (0..40u32)
        .map(|i| commit(&format!("{i:02}dddd"), 1 + i % 31))
        .collect();
    let cancel = CancellationToken::new();
    let mut github = FakeGitHub::with_hits(hits);
    github.cancel_on = Some((day(1), cancel.clone()));
    let tokens = MemoryCredentials::new(&["token-a"]);
    let results = MemoryResults::default();
    let clock = MonotonicClock::starting_at(anchor());

    let summary = SearchRun::new(&github, &tokens, &results, &clock)
        .with_settings(RunSettings {
            planner: PlanStrategy::Probe { cap: 10 },
            ..RunSettings::default()
        })
        .with_cancellation(cancel)
        .execute(&config(1, 31))
        .await
        .unwrap();

    assert_eq!(summary.termination, Termination::Cancelled);
    assert_eq!(github.tokens_used().len(), 1);
    assert_eq!(summary.windows_planned, 0);
    assert!(results.get("deser.json").is_empty());
}

#[tokio::test]
async fn repeated_hit_in_one_window_is_judged_once() {
    let github = FakeGitHub::with_hits(vec![commit("bbb222", 1), commit("bbb222", 1)]);
    let oracle = ScriptedOracle::answering([(
        "https://github.com/acme/api/commit/bbb222".to_string(),
        Verdict::NoMatch,
    )]);
    let tokens = MemoryCredentials::new(&["token-a"]);
    let results = MemoryResults::default();
    let clock = MonotonicClock::starting_at(anchor());

    let summary = SearchRun::new(&github, &tokens, &results, &clock)
        .with_oracle(Some(&oracle))
        .with_settings(daily())
        .execute(&config(1, 1))
        .await
        .unwrap();

    assert_eq!(oracle.judged().len(), 1);
    assert_eq!(summary.hits_found, 2);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.rejected_ai, 1);
    assert!(results.get("deser.json").is_empty());
}
