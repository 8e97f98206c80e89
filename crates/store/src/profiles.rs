//! Saved search profiles.
//!
//! A profile is one JSON file per search, named after the profile:
//!
//! ```json
//! {
//!   "name": "deser",
//!   "language": "python",
//!   "filter_description": "fix deserialization vulnerability",
//!   "search_keywords": ["pickle loads", "yaml.load"],
//!   "ai_prompt": "The change replaces unsafe deserialization",
//!   "file_filter_regex": "\\.py$",
//!   "result_file": "deser.json"
//! }
//! ```

use std::path::{Path, PathBuf};

use pipeline::{
    DateRange, EntityKind, OutputName, ProfileName, SearchConfig, SearchTerms, StoreError,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fs::read_json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Language qualifier; empty for none.
    #[serde(default)]
    pub language: String,
    /// Natural-language description of the wanted changes.
    pub filter_description: String,
    /// Pre-generated keywords; empty to have them generated per run.
    #[serde(default)]
    pub search_keywords: Vec<String>,
    /// Judgment criterion matching `search_keywords`.
    #[serde(default)]
    pub ai_prompt: String,
    #[serde(default)]
    pub file_filter_regex: String,
    /// Output file name; defaults to `<name>.json`.
    #[serde(default)]
    pub result_file: String,
}

impl Profile {
    /// Saved terms, if the profile carries any keywords.
    pub fn terms(&self) -> Option<SearchTerms> {
        let keywords: Vec<String> = self
            .search_keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return None;
        }
        Some(SearchTerms {
            keywords,
            judgment: self.ai_prompt.trim().to_string(),
        })
    }

    /// Combines the profile with per-run choices into a run configuration.
    pub fn to_search_config(
        &self,
        range: DateRange,
        kinds: Vec<EntityKind>,
        fresh: bool,
    ) -> Result<SearchConfig, StoreError> {
        let invalid = |message: &str| StoreError::Format {
            path: PathBuf::from(format!("{}.json", self.name)),
            message: message.to_string(),
        };
        let profile = ProfileName::new(self.name.trim()).ok_or_else(|| invalid("profile name is empty"))?;
        let output_file = if self.result_file.trim().is_empty() {
            format!("{}.json", profile)
        } else {
            self.result_file.trim().to_string()
        };
        if output_file.contains(['/', '\\']) {
            return Err(invalid("result_file must be a plain file name"));
        }
        let output = OutputName::new(output_file).ok_or_else(|| invalid("result_file is empty"))?;

        Ok(SearchConfig {
            profile,
            topic: self.filter_description.trim().to_string(),
            kinds,
            language: non_empty(&self.language),
            file_filter: non_empty(&self.file_filter_regex),
            range,
            output,
            terms: self.terms(),
            fresh,
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Directory of profile files.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self, name: &str) -> Result<Profile, StoreError> {
        let path = self.dir.join(format!("{name}.json"));
        read_json(&path)?.ok_or_else(|| StoreError::NotFound {
            name: format!("profile '{name}' ({})", path.display()),
        })
    }

    /// Profile names in alphabetical order. A missing directory has none.
    pub fn list(&self) -> Result<Vec<ProfileName>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source: e,
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io {
                path: self.dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).and_then(|s| ProfileName::new(s)) {
                Some(name) => names.push(name),
                None => warn!(path = %path.display(), "skipping profile with unusable file name"),
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    const DESER: &str = r#"{
        "name": "deser",
        "language": "python",
        "filter_description": "fix deserialization vulnerability",
        "search_keywords": ["pickle loads", " "],
        "ai_prompt": "The change replaces unsafe deserialization",
        "file_filter_regex": "\\.py$",
        "result_file": "deser_results.json"
    }"#;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn loads_and_lists_profiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deser.json"), DESER).unwrap();
        std::fs::write(dir.path().join("b.json"), DESER).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = ProfileStore::new(dir.path());
        let names: Vec<String> = store.list().unwrap().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["b", "deser"]);

        let profile = store.load("deser").unwrap();
        assert_eq!(profile.language, "python");
        assert_eq!(profile.search_keywords.len(), 2);
    }

    #[test]
    fn missing_profile_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(StoreError::NotFound { .. })));
        assert!(ProfileStore::new(dir.path().join("absent")).list().unwrap().is_empty());
    }

    #[test]
    fn profile_becomes_search_config() {
        let profile: Profile = serde_json::from_str(DESER).unwrap();
        let config = profile
            .to_search_config(range(), vec![EntityKind::PullRequest], false)
            .unwrap();
        assert_eq!(config.output.as_str(), "deser_results.json");
        assert_eq!(config.language.as_deref(), Some("python"));
        assert_eq!(config.file_filter.as_deref(), Some(r"\.py$"));
        let terms = config.terms.unwrap();
        assert_eq!(terms.keywords, vec!["pickle loads"]);
        assert_eq!(terms.judgment, "The change replaces unsafe deserialization");
    }

    #[test]
    fn sparse_profile_uses_defaults() {
        let profile: Profile = serde_json::from_str(
            r#"{"name": "csrf", "filter_description": "add CSRF protection"}"#,
        )
        .unwrap();
        let config = profile
            .to_search_config(range(), vec![EntityKind::Commit], true)
            .unwrap();
        assert_eq!(config.output.as_str(), "csrf.json");
        assert_eq!(config.language, None);
        assert_eq!(config.terms, None);
        assert!(config.fresh);
    }

    #[test]
    fn result_file_cannot_escape_the_results_directory() {
        let mut profile: Profile = serde_json::from_str(DESER).unwrap();
        profile.result_file = "../elsewhere.json".into();
        assert!(profile
            .to_search_config(range(), vec![EntityKind::Commit], false)
            .is_err());
    }
}
