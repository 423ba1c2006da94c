//! Tag templates: HTML-like tag declarations with `{{ option }}`
//! placeholders, rendered against an integration's resolved options.
//!
//! Supported forms:
//!
//! - `<script src="//tag.example.com/{{ siteId }}.js">`
//! - `<img src="https://px.example.com/{{ pixelId }}.gif">`
//! - `<iframe src="https://example.com/frame?id={{ id }}">`
//! - `<script>window.vendor = window.vendor || [];</script>` (inline snippet)

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{TagError, TagResult};
use crate::types::ResolvedOptions;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Script,
    Img,
    Iframe,
}

impl TagKind {
    fn parse(name: &str) -> TagResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "script" => Ok(TagKind::Script),
            "img" => Ok(TagKind::Img),
            "iframe" => Ok(TagKind::Iframe),
            other => Err(TagError::Template(format!("unsupported tag <{other}>"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Script => "script",
            TagKind::Img => "img",
            TagKind::Iframe => "iframe",
        }
    }
}

/// A parsed, not yet rendered, tag declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct TagTemplate {
    source: String,
    kind: TagKind,
    attributes: Vec<(String, String)>,
    body: Option<String>,
    placeholders: Vec<String>,
}

impl TagTemplate {
    pub fn parse(source: &str) -> TagResult<Self> {
        let trimmed = source.trim();
        let rest = trimmed
            .strip_prefix('<')
            .ok_or_else(|| TagError::Template(format!("tag must start with '<': {source}")))?;

        let name_end = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let kind = TagKind::parse(&rest[..name_end])?;

        let close = rest
            .find('>')
            .ok_or_else(|| TagError::Template(format!("unterminated tag: {source}")))?;
        let attributes = parse_attributes(rest[name_end..close].trim_end_matches('/'))?;

        let after = &rest[close + 1..];
        let body = match kind {
            TagKind::Script => after
                .find("</script>")
                .map(|end| after[..end].trim())
                .filter(|b| !b.is_empty())
                .map(str::to_string),
            _ => None,
        };

        let mut placeholders = Vec::new();
        for value in attributes
            .iter()
            .map(|(_, v)| v.as_str())
            .chain(body.as_deref())
        {
            for name in scan_placeholders(value)? {
                if !placeholders.contains(&name) {
                    placeholders.push(name);
                }
            }
        }

        if kind != TagKind::Script && !attributes.iter().any(|(k, _)| k == "src") {
            return Err(TagError::Template(format!(
                "<{}> requires a src attribute",
                kind.as_str()
            )));
        }
        if kind == TagKind::Script && body.is_none() && !attributes.iter().any(|(k, _)| k == "src")
        {
            return Err(TagError::Template(
                "<script> requires a src attribute or an inline body".into(),
            ));
        }

        Ok(Self {
            source: trimmed.to_string(),
            kind,
            attributes,
            body,
            placeholders,
        })
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in first-appearance order.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Substitute resolved option values into every placeholder.
    pub fn render(&self, options: &ResolvedOptions) -> TagResult<RenderedTag> {
        let attributes = self
            .attributes
            .iter()
            .map(|(k, v)| Ok((k.clone(), substitute(v, options)?)))
            .collect::<TagResult<BTreeMap<_, _>>>()?;
        let body = self
            .body
            .as_deref()
            .map(|b| substitute(b, options))
            .transpose()?;

        Ok(RenderedTag {
            kind: self.kind,
            attributes,
            body,
        })
    }
}

/// Script-tag-equivalent instruction handed to the environment for injection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderedTag {
    pub kind: TagKind,
    pub attributes: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl RenderedTag {
    pub fn src(&self) -> Option<&str> {
        self.attributes.get("src").map(String::as_str)
    }

    /// Inline scripts execute on injection and never fire a load event.
    pub fn is_inline(&self) -> bool {
        self.kind == TagKind::Script && self.src().is_none()
    }

    /// Absolute URL of the tag. Protocol-relative sources resolve to https.
    pub fn url(&self) -> TagResult<Option<Url>> {
        match self.src() {
            None => Ok(None),
            Some(src) if src.starts_with("//") => Ok(Some(Url::parse(&format!("https:{src}"))?)),
            Some(src) => Ok(Some(Url::parse(src)?)),
        }
    }
}

impl fmt::Display for RenderedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.kind.as_str())?;
        for (key, value) in &self.attributes {
            write!(f, " {key}=\"{value}\"")?;
        }
        write!(f, ">")?;
        match (&self.body, self.kind) {
            (Some(body), _) => write!(f, "{body}</{}>", self.kind.as_str()),
            (None, TagKind::Script | TagKind::Iframe) => write!(f, "</{}>", self.kind.as_str()),
            (None, TagKind::Img) => Ok(()),
        }
    }
}

fn parse_attributes(input: &str) -> TagResult<Vec<(String, String)>> {
    let mut attributes = Vec::new();
    let mut rest = input.trim_start();

    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        if name.is_empty() {
            return Err(TagError::Template(format!("malformed attribute near '{rest}'")));
        }
        rest = rest[name_end..].trim_start();

        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            match after_eq.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let inner = &after_eq[1..];
                    let end = inner.find(quote).ok_or_else(|| {
                        TagError::Template(format!("unterminated value for attribute '{name}'"))
                    })?;
                    rest = &inner[end + 1..];
                    inner[..end].to_string()
                }
                _ => {
                    let end = after_eq
                        .find(char::is_whitespace)
                        .unwrap_or(after_eq.len());
                    rest = &after_eq[end..];
                    after_eq[..end].to_string()
                }
            }
        } else {
            String::new()
        };

        attributes.push((name, value));
        rest = rest.trim_start();
    }

    Ok(attributes)
}

fn scan_placeholders(input: &str) -> TagResult<Vec<String>> {
    let mut names = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| TagError::Template(format!("unterminated placeholder in '{input}'")))?;
        let name = after[..end].trim();
        if name.is_empty() {
            return Err(TagError::Template(format!("empty placeholder in '{input}'")));
        }
        names.push(name.to_string());
        rest = &after[end + 2..];
    }
    Ok(names)
}

fn substitute(input: &str, options: &ResolvedOptions) -> TagResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| TagError::Template(format!("unterminated placeholder in '{input}'")))?;
        let name = after[..end].trim();
        let value = options
            .as_map()
            .get(name)
            .ok_or_else(|| TagError::Template(format!("no option value for '{{{{ {name} }}}}'")))?;
        out.push_str(&placeholder_text(name, value)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn placeholder_text(name: &str, value: &Value) -> TagResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        Value::Array(_) | Value::Object(_) => Err(TagError::Template(format!(
            "option '{name}' cannot be embedded in a tag"
        ))),
    }
}
