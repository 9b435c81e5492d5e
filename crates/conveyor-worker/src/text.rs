//! Built-in text transformation handler.

use async_trait::async_trait;
use serde_json::{json, Value};

use conveyor_models::Artifact;

use crate::handler::{Handler, HandlerError};

const MAX_TEXT_LEN: usize = 1_000_000;

/// Transforms a text payload and emits the result as a downloadable file.
///
/// Payload shape:
/// ```json
/// {"text": "...", "operation": "uppercase", "format": "txt"}
/// ```
/// Operations: `uppercase`, `lowercase`, `reverse`, `title`, `count_vowels`,
/// `stats`, `all`. Formats: `txt`, `json`, `md`. Both `operation` and the
/// shorter `op` key are accepted; operation defaults to `stats`, format
/// to `txt`.
pub struct TextHandler;

#[async_trait]
impl Handler for TextHandler {
    async fn run(&self, payload: &Value) -> Result<Artifact, HandlerError> {
        let text = payload
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::validation("payload must contain a string 'text' field"))?;

        if text.is_empty() {
            return Err(HandlerError::validation("'text' must not be empty"));
        }
        if text.len() > MAX_TEXT_LEN {
            return Err(HandlerError::validation(format!(
                "'text' exceeds the {} byte limit",
                MAX_TEXT_LEN
            )));
        }

        let operation = payload
            .get("operation")
            .or_else(|| payload.get("op"))
            .and_then(Value::as_str)
            .unwrap_or("stats")
            .to_ascii_lowercase();

        let format = payload
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or("txt")
            .to_ascii_lowercase();

        let result = apply_operation(text, &operation)?;
        render(&result, &operation, &format)
    }
}

enum Transformed {
    Text(String),
    VowelCount(usize),
    Stats(TextStats),
    All {
        uppercase: String,
        lowercase: String,
        reversed: String,
        stats: TextStats,
    },
}

struct TextStats {
    characters: usize,
    words: usize,
    lines: usize,
    unique_words: usize,
}

impl TextStats {
    fn of(text: &str) -> Self {
        let unique_words = text
            .to_lowercase()
            .split_whitespace()
            .collect::<std::collections::HashSet<_>>()
            .len();
        Self {
            characters: text.chars().count(),
            words: text.split_whitespace().count(),
            lines: text.lines().count(),
            unique_words,
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "characters": self.characters,
            "words": self.words,
            "lines": self.lines,
            "unique_words": self.unique_words,
        })
    }

    fn lines_with(&self, prefix: &str) -> String {
        format!(
            "{p}characters: {}\n{p}words: {}\n{p}lines: {}\n{p}unique words: {}\n",
            self.characters,
            self.words,
            self.lines,
            self.unique_words,
            p = prefix
        )
    }
}

fn title_case(text: &str) -> String {
    text.split_inclusive(char::is_whitespace)
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}

fn count_vowels(text: &str) -> usize {
    text.chars()
        .filter(|c| matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u'))
        .count()
}

fn apply_operation(text: &str, operation: &str) -> Result<Transformed, HandlerError> {
    match operation {
        "uppercase" => Ok(Transformed::Text(text.to_uppercase())),
        "lowercase" => Ok(Transformed::Text(text.to_lowercase())),
        "reverse" => Ok(Transformed::Text(text.chars().rev().collect())),
        "title" => Ok(Transformed::Text(title_case(text))),
        "count_vowels" => Ok(Transformed::VowelCount(count_vowels(text))),
        "stats" => Ok(Transformed::Stats(TextStats::of(text))),
        "all" => Ok(Transformed::All {
            uppercase: text.to_uppercase(),
            lowercase: text.to_lowercase(),
            reversed: text.chars().rev().collect(),
            stats: TextStats::of(text),
        }),
        other => Err(HandlerError::validation(format!(
            "unknown operation '{}' (expected uppercase, lowercase, reverse, title, \
             count_vowels, stats, or all)",
            other
        ))),
    }
}

fn render(result: &Transformed, operation: &str, format: &str) -> Result<Artifact, HandlerError> {
    match format {
        "txt" => Ok(Artifact::new(
            render_plain(result).into_bytes(),
            "text/plain; charset=utf-8",
            "result.txt",
        )),
        "json" => {
            let body = json!({
                "operation": operation,
                "result": render_json(result),
            });
            let data = serde_json::to_vec_pretty(&body)
                .map_err(|e| HandlerError::transient(format!("JSON encoding failed: {}", e)))?;
            Ok(Artifact::new(data, "application/json", "result.json"))
        }
        "md" => Ok(Artifact::new(
            render_markdown(result, operation).into_bytes(),
            "text/markdown; charset=utf-8",
            "result.md",
        )),
        other => Err(HandlerError::validation(format!(
            "unknown format '{}' (expected txt, json, or md)",
            other
        ))),
    }
}

fn render_plain(result: &Transformed) -> String {
    match result {
        Transformed::Text(s) => s.clone(),
        Transformed::VowelCount(n) => format!("vowel count: {}\n", n),
        Transformed::Stats(stats) => stats.lines_with(""),
        Transformed::All {
            uppercase,
            lowercase,
            reversed,
            stats,
        } => format!(
            "uppercase: {}\nlowercase: {}\nreversed: {}\n{}",
            uppercase,
            lowercase,
            reversed,
            stats.lines_with("")
        ),
    }
}

fn render_json(result: &Transformed) -> Value {
    match result {
        Transformed::Text(s) => json!(s),
        Transformed::VowelCount(n) => json!({"vowel_count": n}),
        Transformed::Stats(stats) => stats.to_json(),
        Transformed::All {
            uppercase,
            lowercase,
            reversed,
            stats,
        } => json!({
            "uppercase": uppercase,
            "lowercase": lowercase,
            "reversed": reversed,
            "stats": stats.to_json(),
        }),
    }
}

fn render_markdown(result: &Transformed, operation: &str) -> String {
    let mut out = format!("# Text result: {}\n\n", operation);
    match result {
        Transformed::Text(s) => {
            out.push_str("```\n");
            out.push_str(s);
            out.push_str("\n```\n");
        }
        Transformed::VowelCount(n) => {
            out.push_str(&format!("- vowel count: {}\n", n));
        }
        Transformed::Stats(stats) => {
            out.push_str(&stats.lines_with("- "));
        }
        Transformed::All {
            uppercase,
            lowercase,
            reversed,
            stats,
        } => {
            out.push_str(&format!("## Uppercase\n\n```\n{}\n```\n\n", uppercase));
            out.push_str(&format!("## Lowercase\n\n```\n{}\n```\n\n", lowercase));
            out.push_str(&format!("## Reversed\n\n```\n{}\n```\n\n", reversed));
            out.push_str("## Stats\n\n");
            out.push_str(&stats.lines_with("- "));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stats_by_default() {
        let artifact = TextHandler.run(&json!({"text": "one two one"})).await.unwrap();
        let body = String::from_utf8(artifact.data).unwrap();
        assert!(body.contains("words: 3"));
        assert!(body.contains("unique words: 2"));
        assert_eq!(artifact.filename, "result.txt");
    }

    #[tokio::test]
    async fn uppercase_operation() {
        let artifact = TextHandler
            .run(&json!({"text": "hi", "operation": "uppercase"}))
            .await
            .unwrap();
        assert_eq!(artifact.data, b"HI");
        assert!(artifact.content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn accepts_short_op_key_and_mixed_case() {
        let artifact = TextHandler
            .run(&json!({"text": "AbC", "op": "Lowercase"}))
            .await
            .unwrap();
        assert_eq!(artifact.data, b"abc");
    }

    #[tokio::test]
    async fn reverse_respects_char_boundaries() {
        let artifact = TextHandler
            .run(&json!({"text": "héllo", "operation": "reverse"}))
            .await
            .unwrap();
        assert_eq!(artifact.data, "olléh".as_bytes());
    }

    #[tokio::test]
    async fn title_case_operation() {
        let artifact = TextHandler
            .run(&json!({"text": "hello WORLD again", "operation": "title"}))
            .await
            .unwrap();
        assert_eq!(artifact.data, b"Hello World Again");
    }

    #[tokio::test]
    async fn count_vowels_operation() {
        let artifact = TextHandler
            .run(&json!({"text": "Hello World", "operation": "count_vowels", "format": "json"}))
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&artifact.data).unwrap();
        assert_eq!(body["result"]["vowel_count"], 3);
    }

    #[tokio::test]
    async fn stats_as_json_include_unique_words() {
        let artifact = TextHandler
            .run(&json!({"text": "One two\none", "operation": "stats", "format": "json"}))
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&artifact.data).unwrap();
        assert_eq!(body["result"]["words"], 3);
        assert_eq!(body["result"]["lines"], 2);
        assert_eq!(body["result"]["unique_words"], 2);
        assert_eq!(artifact.content_type, "application/json");
    }

    #[tokio::test]
    async fn missing_text_is_a_validation_error() {
        let err = TextHandler.run(&json!({"operation": "uppercase"})).await.unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_operation_is_a_validation_error() {
        let err = TextHandler
            .run(&json!({"text": "hi", "operation": "rot13"}))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn markdown_all_sections() {
        let artifact = TextHandler
            .run(&json!({"text": "Hi", "operation": "all", "format": "md"}))
            .await
            .unwrap();
        assert!(artifact.content_type.starts_with("text/markdown"));
        let body = String::from_utf8(artifact.data).unwrap();
        assert!(body.contains("## Uppercase"));
        assert!(body.contains("## Reversed"));
        assert!(body.contains("unique words"));
        assert_eq!(artifact.filename, "result.md");
    }

    #[tokio::test]
    async fn declared_content_types_agree_with_filename_hints() {
        for format in ["txt", "json", "md"] {
            let artifact = TextHandler
                .run(&json!({"text": "hi there", "operation": "all", "format": format}))
                .await
                .unwrap();
            assert!(
                artifact.hint_agrees(),
                "format {}: {} vs {}",
                format,
                artifact.content_type,
                artifact.filename
            );
        }
    }
}
