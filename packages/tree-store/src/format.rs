//! Per-file serialization formats, selected by extension.

use agentdeck_adapter::{AdapterError, Value};

const FRONT_MATTER_FENCE: &str = "---";

/// How a file's contents map to a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    /// `.json`: the value verbatim.
    Json,
    /// `.md`: optional `---` YAML front-matter plus a body. Parses to an
    /// object carrying the metadata fields and the body under `content`.
    Markdown,
    /// Anything else: the whole file as one string value.
    Text,
}

impl DocFormat {
    pub fn from_extension(ext: &str) -> DocFormat {
        match ext {
            "json" => DocFormat::Json,
            "md" | "markdown" => DocFormat::Markdown,
            _ => DocFormat::Text,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocFormat::Json => "json",
            DocFormat::Markdown => "md",
            DocFormat::Text => "txt",
        }
    }

    /// Extensions the store probes when resolving a key to a file.
    pub fn known_extensions() -> &'static [&'static str] {
        &["json", "md", "markdown", "txt"]
    }

    pub fn parse(&self, raw: &str, origin: &str) -> Result<Value, AdapterError> {
        match self {
            DocFormat::Json => {
                serde_json::from_str(raw).map_err(|e| AdapterError::serialization(origin, e))
            }
            DocFormat::Markdown => parse_markdown(raw, origin),
            DocFormat::Text => Ok(Value::String(raw.to_string())),
        }
    }

    pub fn render(&self, value: &Value) -> Result<String, AdapterError> {
        match self {
            DocFormat::Json => serde_json::to_string_pretty(value)
                .map_err(|e| AdapterError::serialization("<render>", e)),
            DocFormat::Markdown => render_markdown(value),
            DocFormat::Text => Ok(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        }
    }
}

fn parse_markdown(raw: &str, origin: &str) -> Result<Value, AdapterError> {
    let mut metadata = serde_json::Map::new();
    let body;

    if let Some(rest) = raw.strip_prefix(&format!("{}\n", FRONT_MATTER_FENCE)) {
        // Front-matter closes at the next fence on its own line.
        let close = rest
            .find(&format!("\n{}\n", FRONT_MATTER_FENCE))
            .map(|i| (i, i + FRONT_MATTER_FENCE.len() + 2))
            .or_else(|| {
                rest.strip_suffix(&format!("\n{}", FRONT_MATTER_FENCE))
                    .map(|head| (head.len(), rest.len()))
            });

        match close {
            Some((yaml_end, body_start)) => {
                let yaml = &rest[..yaml_end];
                let parsed: Value = serde_yaml::from_str(yaml)
                    .map_err(|e| AdapterError::serialization(origin, e))?;
                if let Value::Object(map) = parsed {
                    metadata = map;
                }
                body = rest[body_start.min(rest.len())..].to_string();
            }
            None => {
                // Unterminated fence: treat the whole document as body.
                body = raw.to_string();
            }
        }
    } else {
        body = raw.to_string();
    }

    metadata.insert("content".to_string(), Value::String(body));
    Ok(Value::Object(metadata))
}

fn render_markdown(value: &Value) -> Result<String, AdapterError> {
    let Value::Object(map) = value else {
        return Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    };

    let body = map
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let mut metadata = map.clone();
    metadata.remove("content");

    if metadata.is_empty() {
        return Ok(body.to_string());
    }

    let yaml = serde_yaml::to_string(&Value::Object(metadata))
        .map_err(|e| AdapterError::serialization("<render>", e))?;
    Ok(format!(
        "{fence}\n{yaml}{fence}\n{body}",
        fence = FRONT_MATTER_FENCE,
        yaml = yaml,
        body = body
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extension_selects_format() {
        assert_eq!(DocFormat::from_extension("json"), DocFormat::Json);
        assert_eq!(DocFormat::from_extension("md"), DocFormat::Markdown);
        assert_eq!(DocFormat::from_extension("log"), DocFormat::Text);
    }

    #[test]
    fn json_round_trip() {
        let value = json!({"a": [1, 2], "b": "x"});
        let rendered = DocFormat::Json.render(&value).unwrap();
        let back = DocFormat::Json.parse(&rendered, "t.json").unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn markdown_with_front_matter() {
        let raw = "---\ntitle: Standup notes\npriority: 2\n---\nAll agents reported in.\n";
        let value = DocFormat::Markdown.parse(raw, "notes.md").unwrap();
        assert_eq!(value["title"], json!("Standup notes"));
        assert_eq!(value["priority"], json!(2));
        assert_eq!(value["content"], json!("All agents reported in.\n"));
    }

    #[test]
    fn markdown_without_front_matter() {
        let value = DocFormat::Markdown.parse("plain body", "n.md").unwrap();
        assert_eq!(value, json!({"content": "plain body"}));
    }

    #[test]
    fn markdown_render_round_trip() {
        let value = json!({"title": "Notes", "content": "body text"});
        let rendered = DocFormat::Markdown.render(&value).unwrap();
        let back = DocFormat::Markdown.parse(&rendered, "n.md").unwrap();
        assert_eq!(back["title"], json!("Notes"));
        assert_eq!(back["content"], json!("body text"));
    }

    #[test]
    fn text_is_verbatim() {
        let value = DocFormat::Text.parse("hello\nworld", "a.txt").unwrap();
        assert_eq!(value, json!("hello\nworld"));
        assert_eq!(DocFormat::Text.render(&value).unwrap(), "hello\nworld");
    }

    #[test]
    fn malformed_json_is_serialization_error() {
        let err = DocFormat::Json.parse("{not json", "bad.json").unwrap_err();
        assert!(matches!(
            err,
            agentdeck_adapter::AdapterError::Serialization { .. }
        ));
    }
}
