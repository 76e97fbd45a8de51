//! Stylesheet hardening and scoping.
//!
//! `scope` confines every rule of an untrusted stylesheet to one container
//! selector. This is a permissive brace-aware scan, not a CSS parser: chunks
//! it cannot make sense of are copied through unchanged after the dangerous
//! constructs have been neutralized.

use regex::Regex;
use std::sync::OnceLock;

const BLOCKED: &str = "/* blocked */";

fn dangerous_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)expression\s*\(",
            r"(?i)javascript\s*:",
            r"(?i)vbscript\s*:",
            r"(?i)behavior\s*:",
            r"(?i)-moz-binding\s*:",
            r"(?i)@import[^;{}]*;?",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid css pattern"))
        .collect()
    })
}

/// Replace script-capable constructs with a comment.
pub fn neutralize(css: &str) -> String {
    let mut out = css.to_string();
    for pattern in dangerous_patterns() {
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, BLOCKED).into_owned();
        }
    }
    out
}

/// Neutralize `css` and prefix every selector with `container`.
///
/// `body`, `html` and `:root` map onto the container itself, `*` becomes
/// `container *`, and rules nested in `@media`/`@supports` are scoped too.
/// Other at-rules (`@keyframes`, `@font-face`, ...) pass through unchanged.
pub fn scope(css: &str, container: &str) -> String {
    let safe = neutralize(css);
    let mut out = String::with_capacity(safe.len() + safe.len() / 4);
    scope_rules(&safe, container, &mut out);
    out
}

fn scope_rules(css: &str, container: &str, out: &mut String) {
    let mut pos = 0;
    while pos < css.len() {
        let trivia = leading_trivia(&css[pos..]);
        out.push_str(&css[pos..pos + trivia]);
        pos += trivia;
        if pos >= css.len() {
            break;
        }

        let rest = &css[pos..];
        let Some((end, terminator)) = prelude_end(rest) else {
            out.push_str(rest);
            break;
        };
        if terminator != b'{' {
            // Statement at-rule or stray brace.
            out.push_str(&rest[..=end]);
            pos += end + 1;
            continue;
        }

        let Some(close) = block_end(rest, end) else {
            out.push_str(rest);
            break;
        };
        let prelude = &rest[..end];
        let at_rule = prelude.trim_start().to_ascii_lowercase();

        if at_rule.starts_with("@media") || at_rule.starts_with("@supports") {
            out.push_str(prelude);
            out.push('{');
            scope_rules(&rest[end + 1..close], container, out);
            out.push('}');
        } else if at_rule.starts_with('@') {
            out.push_str(&rest[..=close]);
        } else {
            match scope_selector_list(prelude, container) {
                Some(selectors) => out.push_str(&selectors),
                None => out.push_str(prelude),
            }
            out.push_str(&rest[end..=close]);
        }
        pos += close + 1;
    }
}

fn scope_selector_list(prelude: &str, container: &str) -> Option<String> {
    let selectors: Vec<String> = split_top_level(prelude, b',')
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| scope_selector(s, container))
        .collect();
    if selectors.is_empty() {
        None
    } else {
        Some(selectors.join(", "))
    }
}

fn scope_selector(selector: &str, container: &str) -> String {
    if is_prefixed(selector, container) {
        return selector.to_string();
    }
    if selector == "*" {
        return format!("{} *", container);
    }

    let mut rest = selector;
    let mut stripped = false;
    while let Some(remainder) = strip_document_root(rest) {
        stripped = true;
        rest = remainder;
        let next = remainder.trim_start();
        if strip_document_root(next).is_none() {
            break;
        }
        rest = next;
    }

    if stripped {
        format!("{}{}", container, rest)
    } else {
        format!("{} {}", container, selector)
    }
}

/// Starts with the container as a whole compound: `.scope`, `.scope .a`,
/// `.scope:hover` and `.scope.dark` match, `.scope-other` does not.
fn is_prefixed(selector: &str, container: &str) -> bool {
    selector
        .strip_prefix(container)
        .is_some_and(|rest| !rest.starts_with(is_name_char))
}

/// Remainder after a leading `html`, `body` or `:root` compound.
fn strip_document_root(selector: &str) -> Option<&str> {
    ["html", "body", ":root"].iter().find_map(|root| {
        let head = selector.get(..root.len())?;
        if !head.eq_ignore_ascii_case(root) {
            return None;
        }
        let rest = &selector[root.len()..];
        (!rest.starts_with(is_name_char)).then_some(rest)
    })
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Whitespace and comments at the start of `s`.
fn leading_trivia(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    loop {
        while bytes.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
            i += 1;
        }
        if s[i..].starts_with("/*") {
            i = s[i + 2..].find("*/").map_or(s.len(), |end| i + 2 + end + 2);
        } else {
            return i;
        }
    }
}

/// Index of the next `{`, `;` or `}` outside strings, comments and parentheses.
fn prelude_end(s: &str) -> Option<(usize, u8)> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_comment(s, i),
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            b @ (b'{' | b';' | b'}') if depth == 0 => return Some((i, b)),
            _ => i += 1,
        }
    }
    None
}

/// Index of the `}` matching the `{` at `open`.
fn block_end(s: &str, open: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_comment(s, i),
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_comment(s: &str, start: usize) -> usize {
    s[start + 2..]
        .find("*/")
        .map_or(s.len(), |end| start + 2 + end + 2)
}

fn split_top_level(s: &str, separator: u8) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b if b == separator && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&s[start.min(s.len())..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scope_maps_body_and_prefixes_lists() {
        assert_eq!(
            scope("body{color:red} .a,.b{x:1}", ".scope"),
            ".scope{color:red} .scope .a, .scope .b{x:1}"
        );
    }

    #[test]
    fn test_javascript_url_neutralized() {
        let out = scope("a{background:url(javascript:alert(1))}", ".scope");
        assert!(!out.to_lowercase().contains("javascript:"));
        assert_eq!(out, ".scope a{background:url(/* blocked */alert(1))}");
    }

    #[test]
    fn test_other_dangerous_constructs_neutralized() {
        let out = scope(
            "@import url('evil.css');\np{width:expression(alert(1));behavior: url(x.htc)}",
            ".s",
        );
        assert!(!out.contains("@import"));
        assert!(!out.contains("expression("));
        assert!(!out.contains("behavior:"));
        assert!(out.contains(".s p{"));
    }

    #[test]
    fn test_neutralize_is_stable() {
        let once = neutralize("x{a:JavaScript :1; b: Expression (2)} @IMPORT 'y.css';");
        assert_eq!(neutralize(&once), once);
    }

    #[test]
    fn test_media_rules_scoped() {
        assert_eq!(
            scope("@media (max-width: 768px) { .a { x:1 } body{y:2} }", ".scope"),
            "@media (max-width: 768px) { .scope .a{ x:1 } .scope{y:2} }"
        );
    }

    #[test]
    fn test_keyframes_and_font_face_verbatim() {
        let css = "@keyframes spin { from { a:1 } to { a:2 } } @font-face{font-family:x}";
        assert_eq!(scope(css, ".scope"), css);
    }

    #[test]
    fn test_universal_and_already_scoped() {
        assert_eq!(
            scope("* {m:0} .scope .x{} .scope{} .scope-other{}", ".scope"),
            ".scope *{m:0} .scope .x{} .scope{} .scope .scope-other{}"
        );
    }

    #[test]
    fn test_prefix_match_stops_at_name_boundary() {
        assert_eq!(
            scope(".scope:hover{} .scope.dark{} .scope>p{} .scope[data-x]{} .scope_2{}", ".scope"),
            ".scope:hover{} .scope.dark{} .scope>p{} .scope[data-x]{} .scope .scope_2{}"
        );
    }

    #[test]
    fn test_document_roots_collapse_into_container() {
        assert_eq!(
            scope("html body .x{} :root{--a:1} body.dark p{} bodyguard{}", ".s"),
            ".s .x{} .s{--a:1} .s.dark p{} .s bodyguard{}"
        );
    }

    #[test]
    fn test_commas_inside_functions_are_not_split() {
        assert_eq!(
            scope(":is(.a,.b) p, a[title=\"x,y\"]{c:1}", ".s"),
            ".s :is(.a,.b) p, .s a[title=\"x,y\"]{c:1}"
        );
    }

    #[test]
    fn test_comments_and_strings_preserved() {
        assert_eq!(
            scope("/* hi */ .a::before{content:\"}\"} p{}", ".s"),
            "/* hi */ .s .a::before{content:\"}\"} .s p{}"
        );
    }

    #[test]
    fn test_malformed_input_copied_through() {
        assert_eq!(scope(".a{color:red", ".s"), ".a{color:red");
        assert_eq!(scope("} p{}", ".s"), "} .s p{}");
        assert_eq!(scope("@charset \"utf-8\"; p{}", ".s"), "@charset \"utf-8\"; .s p{}");
        assert_eq!(scope("", ".s"), "");
    }
}
