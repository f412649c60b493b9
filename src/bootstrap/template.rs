//! Template engine boundary and the default interpolation engine.
//!
//! The default engine understands `{{ path }}` (HTML-escaped) and
//! `{{{ path }}}` (raw) where `path` is a dotted lookup into the JSON data.
//! Missing values render as empty strings.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("template compilation failed at byte {offset}: {reason}")]
    Compile { offset: usize, reason: String },
    #[error("template execution failed: {0}")]
    Execute(String),
}

/// Compiles template sources.
pub trait TemplateEngine: Send + Sync {
    fn compile(&self, source: &str) -> Result<Box<dyn CompiledTemplate>, RenderError>;
}

/// A compiled template ready to render against data.
pub trait CompiledTemplate: Send + Sync {
    fn render(&self, data: &Value) -> Result<String, RenderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Escaped(Vec<String>),
    Raw(Vec<String>),
}

/// Mustache-style `{{ }}` interpolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpolationEngine;

impl TemplateEngine for InterpolationEngine {
    fn compile(&self, source: &str) -> Result<Box<dyn CompiledTemplate>, RenderError> {
        Ok(Box::new(Interpolation {
            segments: parse(source)?,
        }))
    }
}

#[derive(Debug)]
struct Interpolation {
    segments: Vec<Segment>,
}

impl CompiledTemplate for Interpolation {
    fn render(&self, data: &Value) -> Result<String, RenderError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Escaped(path) => escape_into(&mut out, &stringify(lookup(data, path))),
                Segment::Raw(path) => out.push_str(&stringify(lookup(data, path))),
            }
        }
        Ok(out)
    }
}

fn parse(source: &str) -> Result<Vec<Segment>, RenderError> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let tag_offset = offset + start;
        let (raw, open, close) = if rest[start..].starts_with("{{{") {
            (true, 3, "}}}")
        } else {
            (false, 2, "}}")
        };

        let body_start = start + open;
        let Some(len) = rest[body_start..].find(close) else {
            return Err(RenderError::Compile {
                offset: tag_offset,
                reason: format!("unterminated tag, expected `{close}`"),
            });
        };

        let expr = rest[body_start..body_start + len].trim();
        if expr.is_empty() {
            return Err(RenderError::Compile {
                offset: tag_offset,
                reason: "empty tag".into(),
            });
        }
        let path: Vec<String> = expr.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(RenderError::Compile {
                offset: tag_offset,
                reason: format!("invalid path `{expr}`"),
            });
        }
        segments.push(if raw {
            Segment::Raw(path)
        } else {
            Segment::Escaped(path)
        });

        let consumed = body_start + len + close.len();
        offset += consumed;
        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

fn lookup<'a>(data: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(data, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    })
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn escape_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn render(source: &str, data: Value) -> Result<String, RenderError> {
        InterpolationEngine.compile(source)?.render(&data)
    }

    #[test]
    fn interpolates_fields() {
        let out = render("<html>{{name}}</html>", json!({ "name": "Ada" })).unwrap();
        assert_eq!(out, "<html>Ada</html>");
    }

    #[test]
    fn escapes_unless_triple_braced() {
        let data = json!({ "config": "<script>\"x\"</script>" });
        assert_eq!(
            render("{{ config }}", data.clone()).unwrap(),
            "&lt;script&gt;&quot;x&quot;&lt;/script&gt;"
        );
        assert_eq!(render("{{{ config }}}", data).unwrap(), "<script>\"x\"</script>");
    }

    #[test]
    fn resolves_dotted_paths_and_non_strings() {
        let data = json!({ "app": { "build": 42, "flags": [true, false] }, "none": null });
        let out = render("{{app.build}}/{{app.flags.1}}/{{none}}/{{missing.deep}}", data).unwrap();
        assert_eq!(out, "42/false//");
    }

    #[test]
    fn unterminated_tag_is_a_compile_error() {
        let err = render("<p>{{name</p>", json!({})).unwrap_err();
        assert_eq!(
            err,
            RenderError::Compile {
                offset: 3,
                reason: "unterminated tag, expected `}}`".into(),
            }
        );
    }

    #[test]
    fn empty_and_malformed_tags_are_rejected() {
        assert!(matches!(
            render("{{ }}", json!({})),
            Err(RenderError::Compile { offset: 0, .. })
        ));
        assert!(matches!(
            render("ok {{a..b}}", json!({})),
            Err(RenderError::Compile { offset: 3, .. })
        ));
    }

    #[test]
    fn text_without_tags_passes_through() {
        assert_eq!(render("plain } { text", json!({})).unwrap(), "plain } { text");
    }
}
