//! Prompt text for the two oracle calls.

/// Commit messages and PR bodies beyond this many characters are cut.
const MAX_MESSAGE_CHARS: usize = 2_000;

pub const KEYWORDS_SYSTEM: &str = "You are an expert at searching GitHub. \
Given a description of the commits or pull requests a user is looking for, produce \
GitHub search keywords and a judgment criterion.

Respond with a single JSON object and nothing else:
{\"keywords\": [\"...\"], \"judgment\": \"...\"}

Keyword rules:
1. 3 to 5 English keywords or short phrases suitable for GitHub search.
2. Specific enough to avoid unrelated results; technical terms, library names and \
function names are welcome.

Judgment rules:
1. One paragraph stating exactly what a matching change must do.
2. It will be used to review individual diffs, so describe observable code changes.";

pub fn keywords_user(topic: &str, language: Option<&str>) -> String {
    let mut prompt = format!("Description: {topic}");
    if let Some(language) = language.filter(|l| !l.trim().is_empty()) {
        prompt.push_str(&format!("\nProgramming language: {language}"));
    }
    prompt.push_str("\n\nGenerate the keywords and the judgment criterion.");
    prompt
}

pub fn judge_system(topic: &str, judgment: &str) -> String {
    format!(
        "You are a code reviewer deciding whether a commit or pull request matches a search.\n\n\
         Search topic: {topic}\n\
         Criterion: {judgment}\n\n\
         Analyse the change below strictly against the criterion. \
         Answer with exactly one word: yes, no, or uncertain."
    )
}

pub fn judge_user(title: &str, message: &str, files: &[String], diff: &str) -> String {
    let message: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
    format!(
        "Title: {title}\n\nMessage:\n{message}\n\nChanged files:\n{}\n\nDiff:{diff}",
        files.join("\n")
    )
}
