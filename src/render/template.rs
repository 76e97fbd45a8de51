//! Logic-light template engine for custom skins.
//!
//! Supported syntax:
//! - `{{name}}` escaped interpolation, `{{{name}}}` raw interpolation
//! - `{{#list}}...{{/list}}` repeats per element (a `true` boolean renders once)
//! - `{{#if flag}}...{{/if}}` truthiness conditional
//! - `{{> partial}}` named fragment lookup
//! - `{{! comment}}`
//!
//! Rendering is total: malformed input degrades to literal text and the
//! result is always a string.

use serde_json::Value;

use crate::models::Partials;

/// Bound on nested `{{> partial}}` expansion.
const MAX_PARTIAL_DEPTH: usize = 8;

/// Rendering stops once the output grows past this many bytes.
const MAX_OUTPUT_BYTES: usize = 2 * 1024 * 1024;

/// Rendering stops after this many node evaluations.
const MAX_NODE_VISITS: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Section,
    If,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var { name: String, escape: bool },
    Block { kind: BlockKind, name: String, children: Vec<Node> },
    Partial(String),
}

#[derive(Debug)]
enum Token<'a> {
    Text(&'a str),
    Var { name: &'a str, escape: bool },
    Open { kind: BlockKind, name: &'a str, raw: &'a str },
    Close { kind: BlockKind, name: &'a str, raw: &'a str },
    Partial(&'a str),
    Comment,
}

/// Render `template` against `context`, resolving `{{> name}}` from `partials`.
///
/// A partial never expands inside itself, and total work is bounded: past the
/// budget the rest of the template is skipped.
pub fn render(template: &str, context: &Value, partials: &Partials) -> String {
    let mut out = String::with_capacity(template.len());
    let mut scope = vec![context];
    let mut renderer = Renderer::new(partials);
    renderer.render_source(template, &mut scope, &mut out);
    out
}

/// Escape text for HTML element and attribute content.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Per-call evaluation state: partials being expanded and the work spent.
struct Renderer<'p> {
    partials: &'p Partials,
    active: Vec<String>,
    visits: usize,
    exhausted: bool,
}

impl<'p> Renderer<'p> {
    fn new(partials: &'p Partials) -> Self {
        Self {
            partials,
            active: Vec::new(),
            visits: 0,
            exhausted: false,
        }
    }

    fn within_budget(&mut self, out: &str) -> bool {
        if self.exhausted {
            return false;
        }
        self.visits += 1;
        if self.visits > MAX_NODE_VISITS || out.len() > MAX_OUTPUT_BYTES {
            tracing::warn!(
                "Template render truncated after {} nodes ({} bytes)",
                self.visits,
                out.len()
            );
            self.exhausted = true;
        }
        !self.exhausted
    }

    fn render_source<'v>(&mut self, source: &str, scope: &mut Vec<&'v Value>, out: &mut String) {
        let nodes = parse(source);
        self.render_nodes(&nodes, scope, out);
    }

    fn render_nodes<'v>(&mut self, nodes: &[Node], scope: &mut Vec<&'v Value>, out: &mut String) {
        for node in nodes {
            if !self.within_budget(out) {
                return;
            }
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Var { name, escape } => {
                    let text = lookup(scope, name).map(display_value).unwrap_or_default();
                    if *escape {
                        out.push_str(&escape_html(&text));
                    } else {
                        out.push_str(&text);
                    }
                }
                Node::Block {
                    kind: BlockKind::If,
                    name,
                    children,
                } => {
                    if is_truthy(lookup(scope, name)) {
                        self.render_nodes(children, scope, out);
                    }
                }
                Node::Block {
                    kind: BlockKind::Section,
                    name,
                    children,
                } => match lookup(scope, name) {
                    Some(Value::Array(items)) => {
                        for item in items {
                            if self.exhausted {
                                return;
                            }
                            scope.push(item);
                            self.render_nodes(children, scope, out);
                            scope.pop();
                        }
                    }
                    Some(Value::Bool(true)) => self.render_nodes(children, scope, out),
                    _ => {}
                },
                Node::Partial(name) => {
                    if self.active.iter().any(|active| active == name) {
                        tracing::debug!("Partial {} skipped: already being expanded", name);
                        continue;
                    }
                    if self.active.len() >= MAX_PARTIAL_DEPTH {
                        tracing::debug!("Partial {} skipped: nesting limit reached", name);
                        continue;
                    }
                    let partials = self.partials;
                    if let Some(source) = partials.get(name) {
                        self.active.push(name.clone());
                        self.render_source(source, scope, out);
                        self.active.pop();
                    }
                }
            }
        }
    }
}

/// Innermost scope wins; `.` is the current loop element.
fn lookup<'v>(scope: &[&'v Value], name: &str) -> Option<&'v Value> {
    if name == "." {
        return scope.last().copied();
    }
    scope
        .iter()
        .rev()
        .find_map(|frame| frame.as_object().and_then(|map| map.get(name)))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(_)) => true,
    }
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(&rest[..start]));
        }
        let tail = &rest[start..];
        match read_tag(tail) {
            Some((token, len)) => {
                tokens.push(token);
                rest = &tail[len..];
            }
            None => {
                tokens.push(Token::Text(tail));
                rest = "";
            }
        }
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }
    tokens
}

/// Read one tag from a string starting with `{{`. `None` when it is never closed.
fn read_tag(s: &str) -> Option<(Token<'_>, usize)> {
    if let Some(inner) = s.strip_prefix("{{{") {
        if let Some(end) = inner.find("}}}") {
            let len = end + 6;
            let name = inner[..end].trim();
            let token = if is_name(name) {
                Token::Var {
                    name,
                    escape: false,
                }
            } else {
                Token::Text(&s[..len])
            };
            return Some((token, len));
        }
    }

    let body = &s[2..];
    let end = body.find("}}")?;
    let len = end + 4;
    let raw = &s[..len];
    let inner = body[..end].trim();

    let token = if let Some(open) = inner.strip_prefix('#') {
        let open = open.trim();
        match open.split_once(char::is_whitespace) {
            Some(("if", flag)) if is_name(flag.trim()) => Token::Open {
                kind: BlockKind::If,
                name: flag.trim(),
                raw,
            },
            None if is_name(open) => Token::Open {
                kind: BlockKind::Section,
                name: open,
                raw,
            },
            _ => Token::Text(raw),
        }
    } else if let Some(close) = inner.strip_prefix('/') {
        let close = close.trim();
        if close == "if" {
            Token::Close {
                kind: BlockKind::If,
                name: close,
                raw,
            }
        } else if is_name(close) {
            Token::Close {
                kind: BlockKind::Section,
                name: close,
                raw,
            }
        } else {
            Token::Text(raw)
        }
    } else if let Some(partial) = inner.strip_prefix('>') {
        let partial = partial.trim();
        if is_name(partial) {
            Token::Partial(partial)
        } else {
            Token::Text(raw)
        }
    } else if inner.starts_with('!') {
        Token::Comment
    } else if is_name(inner) {
        Token::Var {
            name: inner,
            escape: true,
        }
    } else {
        Token::Text(raw)
    };

    Some((token, len))
}

struct Frame<'a> {
    open: Option<(BlockKind, &'a str, &'a str)>,
    children: Vec<Node>,
}

impl Frame<'_> {
    fn push_text(&mut self, text: &str) {
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    fn push(&mut self, node: Node) {
        match node {
            Node::Text(text) => self.push_text(&text),
            other => self.children.push(other),
        }
    }
}

/// Build the node tree. Unmatched openers and closers become literal text.
fn parse(source: &str) -> Vec<Node> {
    let mut stack = vec![Frame {
        open: None,
        children: Vec::new(),
    }];

    for token in tokenize(source) {
        match token {
            Token::Text(text) => top(&mut stack).push_text(text),
            Token::Comment => {}
            Token::Var { name, escape } => top(&mut stack).push(Node::Var {
                name: name.to_string(),
                escape,
            }),
            Token::Partial(name) => top(&mut stack).push(Node::Partial(name.to_string())),
            Token::Open { kind, name, raw } => stack.push(Frame {
                open: Some((kind, name, raw)),
                children: Vec::new(),
            }),
            Token::Close { kind, name, raw } => {
                let matching = stack.iter().rposition(|frame| match frame.open {
                    Some((open_kind, open_name, _)) => {
                        open_kind == kind && (kind == BlockKind::If || open_name == name)
                    }
                    None => false,
                });
                match matching {
                    Some(index) => {
                        while stack.len() > index + 1 {
                            unwind(&mut stack);
                        }
                        if let Some(frame) = stack.pop() {
                            if let Some((kind, name, _)) = frame.open {
                                top(&mut stack).push(Node::Block {
                                    kind,
                                    name: name.to_string(),
                                    children: frame.children,
                                });
                            }
                        }
                    }
                    None => top(&mut stack).push_text(raw),
                }
            }
        }
    }

    while stack.len() > 1 {
        unwind(&mut stack);
    }
    stack.pop().map(|root| root.children).unwrap_or_default()
}

fn top<'s, 'a>(stack: &'s mut [Frame<'a>]) -> &'s mut Frame<'a> {
    let last = stack.len() - 1;
    &mut stack[last]
}

/// Dissolve the innermost open block into its parent as literal text.
fn unwind(stack: &mut Vec<Frame<'_>>) {
    if stack.len() < 2 {
        return;
    }
    if let Some(frame) = stack.pop() {
        let parent = top(stack);
        if let Some((_, _, raw)) = frame.open {
            parent.push_text(raw);
        }
        for child in frame.children {
            parent.push(child);
        }
    }
}
