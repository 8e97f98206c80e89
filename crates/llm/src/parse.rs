//! Interpreting model output.

use pipeline::{OracleError, SearchTerms, Verdict};
use serde::Deserialize;
use tracing::debug;

/// Keywords beyond this many are dropped; GitHub ORs them all into one query.
const MAX_KEYWORDS: usize = 5;

#[derive(Debug, Deserialize)]
struct TermsPayload {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default, alias = "ai_prompt")]
    judgment: String,
}

/// Extracts [`SearchTerms`] from a completion that should contain one JSON
/// object, possibly wrapped in prose or a code fence.
pub fn parse_terms(content: &str) -> Result<SearchTerms, OracleError> {
    let json = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => {
            return Err(OracleError::InvalidResponse {
                message: format!("no JSON object in keyword response: {}", preview(content)),
            })
        }
    };
    let payload: TermsPayload =
        serde_json::from_str(json).map_err(|e| OracleError::InvalidResponse {
            message: format!("keyword response is not valid JSON: {e}"),
        })?;

    let keywords: Vec<String> = payload
        .keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .take(MAX_KEYWORDS)
        .collect();
    if keywords.is_empty() {
        return Err(OracleError::InvalidResponse {
            message: "keyword response has no keywords".to_string(),
        });
    }
    Ok(SearchTerms {
        keywords,
        judgment: payload.judgment.trim().to_string(),
    })
}

/// Reads a yes / no / uncertain answer. Anything unrecognised is uncertain.
///
/// Chinese answers (是 / 否 / 不确定) are accepted as well.
pub fn parse_verdict(content: &str) -> Verdict {
    let answer = content
        .trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();

    let verdict = if answer.starts_with("不确定") {
        Verdict::Uncertain
    } else if answer.starts_with('否') || answer.starts_with("不是") {
        Verdict::NoMatch
    } else if answer.starts_with('是') {
        Verdict::Match
    } else {
        let word: String = answer.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        match word.as_str() {
            "yes" => Verdict::Match,
            "no" => Verdict::NoMatch,
            _ => Verdict::Uncertain,
        }
    };
    debug!(answer = %preview(content), ?verdict, "verdict parsed");
    verdict
}

fn preview(content: &str) -> String {
    content.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn terms_are_extracted_from_fenced_json() {
        let content = "```json\n{\"keywords\": [\"pickle loads\", \" \", \"yaml.load\"], \"judgment\": \"Replaces unsafe deserialization\"}\n```";
        let terms = parse_terms(content).unwrap();
        assert_eq!(terms.keywords, vec!["pickle loads", "yaml.load"]);
        assert_eq!(terms.judgment, "Replaces unsafe deserialization");
    }

    #[test]
    fn legacy_prompt_field_is_accepted() {
        let terms = parse_terms(r#"{"keywords": ["csrf"], "ai_prompt": "Adds CSRF protection"}"#).unwrap();
        assert_eq!(terms.judgment, "Adds CSRF protection");
    }

    #[test]
    fn keyword_count_is_capped() {
        let terms = parse_terms(r#"{"keywords": ["a","b","c","d","e","f","g"], "judgment": ""}"#).unwrap();
        assert_eq!(terms.keywords.len(), 5);
    }

    #[test]
    fn responses_without_keywords_are_invalid() {
        assert!(matches!(
            parse_terms("I cannot help with that."),
            Err(OracleError::InvalidResponse { .. })
        ));
        assert!(matches!(
            parse_terms(r#"{"keywords": []}"#),
            Err(OracleError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn verdict_words() {
        assert_eq!(parse_verdict("Yes."), Verdict::Match);
        assert_eq!(parse_verdict("  no"), Verdict::NoMatch);
        assert_eq!(parse_verdict("\"NO\""), Verdict::NoMatch);
        assert_eq!(parse_verdict("uncertain"), Verdict::Uncertain);
        assert_eq!(parse_verdict("not sure"), Verdict::Uncertain);
        assert_eq!(parse_verdict("是"), Verdict::Match);
        assert_eq!(parse_verdict("否"), Verdict::NoMatch);
        assert_eq!(parse_verdict("不是"), Verdict::NoMatch);
        assert_eq!(parse_verdict(""), Verdict::Uncertain);
    }
}
