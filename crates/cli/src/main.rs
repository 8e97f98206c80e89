//! Sift CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `sift.toml` (optional) and the named
//!    search profile, and combine them with the dates given on the command line.
//! 2. **Wire observability**: configure `tracing-subscriber` and, when
//!    `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: create the GitHub client, the LLM oracle
//!    (when an API key is available) and the file stores, and inject them
//!    into [`engine::SearchRun`].
//! 4. **Handle signals**: Ctrl-C cancels the run gracefully; completed
//!    windows are still written.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sift run --profile NAME --from DATE --to DATE` | Search, filter and write results |
//! | `sift plan --profile NAME --from DATE --to DATE` | Print the planned query windows |
//! | `sift profiles` | List saved profiles |

mod config;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use engine::{CancellationToken, MonotonicClock, SearchRun};
use github::GitHubClient;
use llm::ChatOracle;
use pipeline::{DateRange, EntityKind, RelevanceOracle, SearchConfig, SearchError, Termination};
use store::{JsonCredentialStore, JsonResultStore, ProfileStore};
use tracing::{info, warn};

use crate::config::Settings;
use crate::telemetry::LogFormat;

/// Search GitHub commits and pull requests, filter them by changed files and
/// an LLM relevance check, and collect the matches in a JSON file.
#[derive(Debug, Parser)]
#[command(name = "sift", version)]
struct Cli {
    /// Settings file. Defaults to `./sift.toml` when it exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of search profiles (overrides `paths.profiles`).
    #[arg(long, global = true)]
    profiles_dir: Option<PathBuf>,

    /// Directory for result files (overrides `paths.results`).
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// GitHub token file (overrides `paths.tokens`).
    #[arg(long, global = true)]
    tokens: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Human)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a search and merge the matches into the profile's result file.
    Run(RunArgs),
    /// Show the query windows a run would use, without fetching results.
    Plan(SearchArgs),
    /// List saved search profiles.
    Profiles,
}

#[derive(Debug, Args)]
struct SearchArgs {
    /// Profile name (file stem under the profiles directory).
    #[arg(long)]
    profile: String,

    /// First day of the range, inclusive (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    from: NaiveDate,

    /// Last day of the range, inclusive (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    to: NaiveDate,

    #[arg(long, value_enum, default_value_t = KindArg::Both)]
    kind: KindArg,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    search: SearchArgs,

    /// Overwrite the result file instead of merging into it.
    #[arg(long)]
    fresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Commit,
    PullRequest,
    Both,
}

impl KindArg {
    fn kinds(self) -> Vec<EntityKind> {
        match self {
            Self::Commit => vec![EntityKind::Commit],
            Self::PullRequest => vec![EntityKind::PullRequest],
            Self::Both => vec![EntityKind::Commit, EntityKind::PullRequest],
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

/// Ports shared by `run` and `plan`.
struct Wiring {
    github: GitHubClient,
    oracle: Option<ChatOracle>,
    tokens: JsonCredentialStore,
    results: JsonResultStore,
    clock: MonotonicClock,
}

impl Wiring {
    /// `cancel` also interrupts the oracle's retry back-off.
    fn build(settings: &Settings, cancel: &CancellationToken) -> Result<Self> {
        let github = GitHubClient::new(&settings.github_config())
            .context("Failed to create GitHub client")?;
        let oracle = match settings.llm_config() {
            Some(config) => {
                let oracle = ChatOracle::new(config)
                    .context("Failed to create LLM client")?
                    .with_cancellation(cancel.clone());
                info!(model = oracle.model(), "relevance checks enabled");
                Some(oracle)
            }
            None => {
                warn!(
                    var = %settings.llm.api_key_env,
                    "LLM API key not set; relevance checks disabled and results left unreviewed"
                );
                None
            }
        };
        Ok(Self {
            github,
            oracle,
            tokens: JsonCredentialStore::new(&settings.paths.tokens),
            results: JsonResultStore::new(&settings.paths.results),
            clock: MonotonicClock::new(),
        })
    }

    fn search_run(&self, settings: &Settings) -> SearchRun<'_> {
        SearchRun::new(&self.github, &self.tokens, &self.results, &self.clock)
            .with_oracle(self.oracle.as_ref().map(|o| o as &dyn RelevanceOracle))
            .with_settings(settings.run_settings())
    }
}

fn search_config(settings: &Settings, args: &SearchArgs, fresh: bool) -> Result<SearchConfig> {
    let Some(range) = DateRange::new(args.from, args.to) else {
        return Err(SearchError::config(format!(
            "--from {} is after --to {}",
            args.from, args.to
        ))
        .into());
    };
    let profile = ProfileStore::new(&settings.paths.profiles)
        .load(&args.profile)
        .context("Failed to load profile")?;
    Ok(profile.to_search_config(range, args.kind.kinds(), fresh)?)
}

async fn run(settings: &Settings, args: &RunArgs) -> Result<ExitCode> {
    let config = search_config(settings, &args.search, args.fresh)?;
    let cancel = CancellationToken::new();
    let wiring = Wiring::build(settings, &cancel)?;

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current request and saving completed windows");
            on_signal.cancel();
        }
    });

    let summary = wiring
        .search_run(settings)
        .with_cancellation(cancel)
        .execute(&config)
        .await?;

    println!("{summary}");
    println!(
        "Results: {}",
        wiring.results.path_of(&config.output).display()
    );
    Ok(match summary.termination {
        Termination::Completed => ExitCode::SUCCESS,
        Termination::Cancelled => ExitCode::from(130),
        Termination::Aborted(_) => ExitCode::FAILURE,
    })
}

async fn plan(settings: &Settings, args: &SearchArgs) -> Result<ExitCode> {
    let config = search_config(settings, args, false)?;
    let wiring = Wiring::build(settings, &CancellationToken::new())?;
    let windows = wiring.search_run(settings).plan_only(&config).await?;

    for window in &windows {
        println!("{window}\t{}", window.query_string());
    }
    println!("{} window(s)", windows.len());
    Ok(ExitCode::SUCCESS)
}

fn profiles(settings: &Settings) -> Result<ExitCode> {
    let store = ProfileStore::new(&settings.paths.profiles);
    let names = store.list()?;
    if names.is_empty() {
        println!("No profiles in {}", store.dir().display());
    }
    for name in names {
        match store.load(name.as_str()) {
            Ok(profile) => println!("{name}\t{}", profile.filter_description),
            Err(e) => println!("{name}\t(unreadable: {e})"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.profiles_dir {
        settings.paths.profiles = dir;
    }
    if let Some(dir) = cli.results_dir {
        settings.paths.results = dir;
    }
    if let Some(file) = cli.tokens {
        settings.paths.tokens = file;
    }

    match &cli.command {
        Command::Run(args) => run(&settings, args).await,
        Command::Plan(args) => plan(&settings, args).await,
        Command::Profiles => profiles(&settings),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let telemetry = match telemetry::init(cli.log_format) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    };

    telemetry.shutdown();
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "sift", "run", "--profile", "deser", "--from", "2024-01-01", "--to", "2024-01-31",
            "--kind", "pull-request", "--fresh",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.fresh);
        assert_eq!(args.search.kind.kinds(), vec![EntityKind::PullRequest]);
        assert_eq!(args.search.from, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn bad_dates_are_rejected() {
        assert!(Cli::try_parse_from([
            "sift", "plan", "--profile", "x", "--from", "01/02/2024", "--to", "2024-01-31",
        ])
        .is_err());
    }

    #[test]
    fn inverted_range_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.paths.profiles = dir.path().to_path_buf();
        let args = SearchArgs {
            profile: "x".into(),
            from: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            kind: KindArg::Both,
        };
        let err = search_config(&settings, &args, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SearchError>(),
            Some(SearchError::ConfigInvalid { .. })
        ));
    }
}
