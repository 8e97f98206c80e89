//! Filtering rules that do not need I/O: file-path matching, diff assembly,
//! and the size guard. The stage runner that consults the oracle lives in the
//! `engine` crate.

use regex::Regex;

use crate::{ChangedFile, SearchError};

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why a hit was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// A configured path pattern matched none of the changed files.
    NoMatchingFile,
    /// The oracle judged the hit irrelevant.
    AiRejected,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoMatchingFile => "no_matching_file",
            Self::AiRejected => "ai_rejected",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// File filter
// ---------------------------------------------------------------------------

/// A set of path patterns parsed from a `;`-separated string.
///
/// A hit is admitted when every pattern matches at least one changed path, so
/// `\.java$;pom\.xml$` requires both a Java file and a `pom.xml`. An empty
/// filter admits everything.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    patterns: Vec<Regex>,
}

impl FileFilter {
    /// Compiles the patterns. A malformed regex is a configuration error.
    pub fn parse(source: Option<&str>) -> Result<Self, SearchError> {
        let mut patterns = Vec::new();
        for raw in source.unwrap_or_default().split(';') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let regex = Regex::new(raw).map_err(|e| {
                SearchError::config(format!("invalid file filter pattern '{raw}': {e}"))
            })?;
            patterns.push(regex);
        }
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns `true` if every pattern matches at least one file.
    pub fn admits(&self, files: &[ChangedFile]) -> bool {
        self.patterns
            .iter()
            .all(|p| files.iter().any(|f| p.is_match(&f.path)))
    }

    /// Returns `true` if `path` is of interest for diff assembly.
    pub fn selects(&self, path: &str) -> bool {
        self.is_empty() || self.patterns.iter().any(|p| p.is_match(path))
    }
}

// ---------------------------------------------------------------------------
// Diff assembly and size guard
// ---------------------------------------------------------------------------

/// Bounds on what is sent to the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffLimits {
    /// Combined diff length (in characters) above which judgment is skipped.
    pub max_diff_chars: usize,
    /// Patches longer than this are left out of the assembled diff.
    pub max_file_patch_chars: usize,
    /// More selected files than this counts as oversized.
    pub max_diff_files: usize,
}

impl Default for DiffLimits {
    fn default() -> Self {
        Self {
            max_diff_chars: 10_000,
            max_file_patch_chars: 5_000,
            max_diff_files: 50,
        }
    }
}

/// Outcome of assembling a hit's diff for judgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembledDiff {
    /// Ready to be judged.
    Text(String),
    /// Too large to judge; skip the oracle.
    Oversized { chars: usize, files: usize },
    /// No patch text available (binary files, or every patch over the per-file
    /// limit).
    Empty,
}

/// Concatenates the patches of the files selected by `filter`.
///
/// The size guard looks at the full selected patch volume, including patches
/// that are individually too long to include.
pub fn assemble_diff(files: &[ChangedFile], filter: &FileFilter, limits: DiffLimits) -> AssembledDiff {
    let selected: Vec<&ChangedFile> = files.iter().filter(|f| filter.selects(&f.path)).collect();

    let total_chars: usize = selected
        .iter()
        .filter_map(|f| f.patch.as_deref())
        .map(|p| p.chars().count())
        .sum();

    if selected.len() > limits.max_diff_files || total_chars > limits.max_diff_chars {
        return AssembledDiff::Oversized {
            chars: total_chars,
            files: selected.len(),
        };
    }

    let mut text = String::new();
    for file in selected {
        let Some(patch) = file.patch.as_deref() else {
            continue;
        };
        if patch.is_empty() || patch.chars().count() > limits.max_file_patch_chars {
            continue;
        }
        text.push_str("\n--- ");
        text.push_str(&file.path);
        text.push_str(" ---\n");
        text.push_str(patch);
    }

    if text.is_empty() {
        AssembledDiff::Empty
    } else {
        AssembledDiff::Text(text)
    }
}
