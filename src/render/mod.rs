//! Render pipeline: template engine, content sanitizer and CSS scoper.
//!
//! Every function here is total over arbitrary string input. Rendered output
//! is recomputed per request and never stored.

pub mod css;
pub mod sanitize;
pub mod template;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;
use std::sync::OnceLock;

use crate::models::{SkinContent, SkinDocument, TemplateContext};

pub use css::{neutralize, scope};
pub use sanitize::sanitize;
pub use template::{escape_html, render};

/// Sandbox tokens for the frame hosting a rendered skin. Neither scripts nor
/// same-origin access are granted.
pub const FRAME_SANDBOX: &str = "allow-popups allow-popups-to-escape-sandbox";

/// Base styles of the preview frame, applied before the skin's own CSS.
const FRAME_RESET_CSS: &str = "*,*::before,*::after{box-sizing:border-box;}\
html,body{margin:0;padding:0;min-height:100vh;}\
a{color:inherit;text-decoration:none;}\
img{max-width:100%;height:auto;}";

/// Sanitized markup plus scoped stylesheet, ready for the rendering surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedArtifact {
    pub html: String,
    pub css: String,
}

/// Render a stored skin for one page view.
pub fn render_skin(
    content: &SkinContent,
    context: &TemplateContext,
    container: &str,
) -> RenderedArtifact {
    let document = content.to_document(context.page_kind());
    render_document(&document, &context.to_value(), container)
}

/// Template, then sanitize the markup and scope the stylesheet.
pub fn render_document(
    document: &SkinDocument,
    context: &Value,
    container: &str,
) -> RenderedArtifact {
    let markup = render(&document.html, context, &document.partials);
    RenderedArtifact {
        html: sanitize(&markup),
        css: scope(&document.css, container),
    }
}

fn style_close_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</style").expect("valid style close regex"))
}

/// Standalone page for an isolated frame (`srcdoc`), meant to be hosted with
/// [`FRAME_SANDBOX`]. The skin markup sits inside the scope container.
pub fn frame_document(artifact: &RenderedArtifact, container: &str, title: &str) -> String {
    let css = style_close_regex().replace_all(&artifact.css, "<\\/style");
    let mut html = String::new();
    // Writing into a String cannot fail.
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta http-equiv="Content-Security-Policy" content="default-src 'none'; img-src * data:; style-src 'unsafe-inline'; font-src *">
<title>{}</title>
<style>{}{}</style>
</head>
<body>
<div {}>{}</div>
</body>
</html>
"#,
        escape_html(title),
        FRAME_RESET_CSS,
        css,
        container_attribute(container),
        artifact.html
    );
    html
}

/// Attribute that makes an element match a simple `.class` or `#id` selector.
fn container_attribute(container: &str) -> String {
    match container.strip_prefix('#') {
        Some(id) => format!("id=\"{}\"", escape_html(id)),
        None => format!(
            "class=\"{}\"",
            escape_html(container.trim_start_matches('.'))
        ),
    }
}
