//! Structured-output recovery from raw model text.
//!
//! Models are asked for a JSON object but routinely wrap it in Markdown,
//! prefix it with prose, or stop before the closing brace. Extraction is a
//! chain: strict JSON first, then pattern matching on the `"html"`/`"css"`
//! fields.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::models::SectionKey;

/// Whatever could be recovered from one completion. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedTheme {
    pub html: Option<String>,
    pub css: Option<String>,
    pub sections: BTreeMap<SectionKey, String>,
    pub message: Option<String>,
}

impl ExtractedTheme {
    /// True when no template content was recovered. A message alone does not count.
    pub fn is_empty(&self) -> bool {
        self.html.is_none() && self.css.is_none() && self.sections.is_empty()
    }
}

pub trait ThemeExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when this extractor recovers nothing usable.
    fn extract(&self, text: &str) -> Option<ExtractedTheme>;
}

/// Parses the completion (or its outermost `{...}` span) as a JSON object.
pub struct StrictJsonExtractor;

impl ThemeExtractor for StrictJsonExtractor {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extract(&self, text: &str) -> Option<ExtractedTheme> {
        let object = parse_object(text).or_else(|| {
            let start = text.find('{')?;
            let end = text.rfind('}')?;
            (start < end).then(|| parse_object(&text[start..=end])).flatten()
        })?;

        let mut theme = ExtractedTheme::default();
        read_object(&object, &mut theme);
        if let Some(Value::Object(nested)) = object.get("sections") {
            read_object(nested, &mut theme);
        }
        (!theme.is_empty()).then_some(theme)
    }
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn read_object(map: &Map<String, Value>, theme: &mut ExtractedTheme) {
    if theme.html.is_none() {
        theme.html = non_empty_str(map, "html")
            .or_else(|| non_empty_str(map, "html_template"))
            .map(str::to_string);
    }
    if theme.css.is_none() {
        theme.css = non_empty_str(map, "css")
            .or_else(|| non_empty_str(map, "custom_css"))
            .map(str::to_string);
    }
    if theme.message.is_none() {
        theme.message = non_empty_str(map, "message").map(str::to_string);
    }
    for key in SectionKey::ALL {
        if key == SectionKey::CustomCss {
            continue;
        }
        if let Some(markup) = non_empty_str(map, key.as_str()) {
            theme.sections.entry(key).or_insert_with(|| markup.to_string());
        }
    }
}

/// Regex recovery of the `"html"` and `"css"` string fields from broken JSON.
pub struct PatternExtractor;

fn html_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)"(?:html_template|html)"\s*:\s*"(.*?)(?:"\s*,\s*"(?:custom_css|css|message)|"\s*\})"#)
            .expect("valid html field regex")
    })
}

fn css_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)"(?:custom_css|css)"\s*:\s*"(.*?)(?:"\s*\}|"\s*,|"?\s*$)"#)
            .expect("valid css field regex")
    })
}

impl ThemeExtractor for PatternExtractor {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn extract(&self, text: &str) -> Option<ExtractedTheme> {
        let capture = |re: &Regex| {
            re.captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| unescape_json_fragment(m.as_str()))
                .filter(|s| !s.trim().is_empty())
        };

        let theme = ExtractedTheme {
            html: capture(html_field_regex()),
            css: capture(css_field_regex()),
            ..ExtractedTheme::default()
        };
        (!theme.is_empty()).then_some(theme)
    }
}

/// Undo the JSON string escapes a model typically emits.
fn unescape_json_fragment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Extractors tried in order; the first that recovers anything wins.
pub struct ExtractorChain {
    extractors: Vec<Box<dyn ThemeExtractor>>,
}

impl Default for ExtractorChain {
    fn default() -> Self {
        Self::new(vec![Box::new(StrictJsonExtractor), Box::new(PatternExtractor)])
    }
}

impl ExtractorChain {
    pub fn new(extractors: Vec<Box<dyn ThemeExtractor>>) -> Self {
        Self { extractors }
    }

    /// Returns the name of the extractor that succeeded along with its result.
    pub fn extract(&self, text: &str) -> Option<(&'static str, ExtractedTheme)> {
        self.extractors.iter().find_map(|extractor| {
            let theme = extractor.extract(text)?;
            Some((extractor.name(), theme))
        })
    }
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[A-Za-z]*[ \t]*\r?\n?|\r?\n?```").expect("valid fence regex"))
}

/// Drop control characters (keeping newlines, carriage returns and tabs) and
/// Markdown code fences.
pub fn clean_completion(raw: &str) -> String {
    let printable: String = raw
        .chars()
        .filter(|c| matches!(c, '\n' | '\r' | '\t') || !c.is_control())
        .collect();
    fence_regex().replace_all(&printable, "").trim().to_string()
}
