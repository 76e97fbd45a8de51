//! Allow-list HTML cleaner for rendered skins and post bodies.
//! No script, no event handlers, no foreign embeds; only structure and styles.
//!
//! Output is stable under re-sanitizing: tags are re-emitted in a canonical
//! form and text never gains a `<` that could open a new tag.

use super::css::neutralize;

const ALLOWED_TAGS: &[&str] = &[
    "div", "span", "p", "a", "img", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "br",
    "hr", "strong", "em", "b", "i", "u", "header", "footer", "nav", "main", "aside", "article",
    "section", "figure", "figcaption", "blockquote", "pre", "code", "table", "thead", "tbody",
    "tr", "th", "td", "button", "svg", "path",
];

/// Canonical spelling; matching is case-insensitive.
const ALLOWED_ATTRS: &[&str] = &[
    "class",
    "id",
    "href",
    "src",
    "alt",
    "title",
    "style",
    "data-post-id",
    "data-blog-id",
    "data-category-id",
    "target",
    "rel",
    "width",
    "height",
    "loading",
    "viewBox",
    "fill",
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "d",
];

/// Removed together with everything up to their closing tag.
const DROP_CONTENT_TAGS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "template", "noscript", "textarea", "title",
    "xmp", "noembed", "noframes",
];

#[derive(Debug)]
struct ParsedTag {
    name: String,
    closing: bool,
    self_closing: bool,
    attrs: Vec<(String, Option<String>)>,
    /// Bytes consumed including `<` and `>`
    len: usize,
}

/// Strip everything outside the allow-lists from `html`.
pub fn sanitize(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    while pos < html.len() {
        let rest = &html[pos..];
        let Some(offset) = rest.find('<') else {
            push_text(&mut out, rest);
            break;
        };
        push_text(&mut out, &rest[..offset]);
        pos += offset;
        let rest = &html[pos..];

        if rest.starts_with("<!--") {
            pos += rest.find("-->").map_or(rest.len(), |end| end + 3);
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            pos += rest.find('>').map_or(rest.len(), |end| end + 1);
            continue;
        }

        let Some(tag) = parse_tag(rest) else {
            out.push_str("&lt;");
            pos += 1;
            continue;
        };
        pos += tag.len;

        if DROP_CONTENT_TAGS.contains(&tag.name.as_str()) {
            if !tag.closing && !tag.self_closing {
                pos += skip_raw_content(&html[pos..], &tag.name);
            }
            continue;
        }

        if ALLOWED_TAGS.contains(&tag.name.as_str()) {
            emit_tag(&mut out, &tag);
        }
    }

    out
}

fn push_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn emit_tag(out: &mut String, tag: &ParsedTag) {
    if tag.closing {
        out.push_str("</");
        out.push_str(&tag.name);
        out.push('>');
        return;
    }

    out.push('<');
    out.push_str(&tag.name);
    let mut seen: Vec<&str> = Vec::new();
    for (name, value) in &tag.attrs {
        let Some(canonical) = ALLOWED_ATTRS
            .iter()
            .copied()
            .find(|allowed| allowed.eq_ignore_ascii_case(name))
        else {
            continue;
        };
        if seen.contains(&canonical) {
            continue;
        }
        seen.push(canonical);

        let decoded = decode_entities(value.as_deref().unwrap_or_default());
        let value = match canonical {
            "href" | "src" if !is_safe_url(canonical, &decoded) => continue,
            "style" => neutralize(&decoded),
            _ => decoded,
        };
        out.push(' ');
        out.push_str(canonical);
        out.push_str("=\"");
        push_attr_value(out, &value);
        out.push('"');
    }
    out.push_str(if tag.self_closing { " />" } else { ">" });
}

fn push_attr_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn is_safe_url(attr: &str, value: &str) -> bool {
    let normalized: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    if normalized.starts_with("javascript:") || normalized.starts_with("vbscript:") {
        return false;
    }
    if normalized.starts_with("data:") {
        return attr == "src" && normalized.starts_with("data:image/");
    }
    true
}

/// Parse a tag at the start of `s`. `None` when `s` does not open a well-formed tag.
fn parse_tag(s: &str) -> Option<ParsedTag> {
    let bytes = s.as_bytes();
    let mut i = 1;
    let closing = bytes.get(i) == Some(&b'/');
    if closing {
        i += 1;
    }

    let name_start = i;
    if !bytes.get(i).is_some_and(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    while bytes
        .get(i)
        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'-')
    {
        i += 1;
    }
    let name = s[name_start..i].to_ascii_lowercase();

    let mut attrs = Vec::new();
    let mut self_closing = false;
    loop {
        while bytes.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
            i += 1;
        }
        match bytes.get(i)? {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                i += 1;
                if bytes.get(i) == Some(&b'>') {
                    self_closing = true;
                    i += 1;
                    break;
                }
                continue;
            }
            _ => {}
        }

        let attr_start = i;
        while bytes
            .get(i)
            .is_some_and(|b| !b.is_ascii_whitespace() && !matches!(b, b'=' | b'>' | b'/'))
        {
            i += 1;
        }
        let attr_name = s[attr_start..i].to_ascii_lowercase();

        while bytes.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
            i += 1;
        }
        let mut value = None;
        if bytes.get(i) == Some(&b'=') {
            i += 1;
            while bytes.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
                i += 1;
            }
            match bytes.get(i)? {
                quote @ (b'"' | b'\'') => {
                    let quote = *quote as char;
                    let end = s[i + 1..].find(quote)?;
                    value = Some(s[i + 1..i + 1 + end].to_string());
                    i += end + 2;
                }
                _ => {
                    let start = i;
                    while bytes
                        .get(i)
                        .is_some_and(|b| !b.is_ascii_whitespace() && *b != b'>')
                    {
                        i += 1;
                    }
                    value = Some(s[start..i].to_string());
                }
            }
        }
        if !attr_name.is_empty() {
            attrs.push((attr_name, value));
        }
    }

    Some(ParsedTag {
        name,
        closing,
        self_closing,
        attrs,
        len: i,
    })
}

/// Length of the raw content plus its closing tag; the whole rest if unclosed.
fn skip_raw_content(s: &str, name: &str) -> usize {
    let lower = s.to_ascii_lowercase();
    let needle = format!("</{}", name);
    let mut from = 0;
    while let Some(found) = lower[from..].find(&needle) {
        let at = from + found;
        let after = at + needle.len();
        let boundary = lower.as_bytes().get(after);
        if boundary.map_or(true, |b| b.is_ascii_whitespace() || matches!(b, b'>' | b'/')) {
            return lower[after..].find('>').map_or(s.len(), |end| after + end + 1);
        }
        from = after;
    }
    s.len()
}

/// Decode the entities an attribute value can use to hide a scheme.
fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match decode_one(rest) {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_one(s: &str) -> Option<(char, usize)> {
    let end = s.find(';').filter(|&end| end <= 10)?;
    let entity = &s[1..end];
    let c = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "colon" => ':',
        "tab" => '\t',
        "newline" => '\n',
        _ => {
            let digits = entity.strip_prefix('#')?;
            let hex = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X'));
            let code = match hex {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse::<u32>().ok()?,
            };
            char::from_u32(code)?
        }
    };
    Some((c, end + 1))
}
