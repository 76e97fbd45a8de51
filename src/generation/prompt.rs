//! System prompts for theme generation and design chat.

use std::fmt::Write;

use crate::models::defaults::{DEFAULT_CSS, TEMPLATE_VARIABLES};
use crate::models::{ChatMessage, ChatRole, EditTarget, SectionKey, SkinContent};

/// One step of the two-stage theme pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeStage {
    Html,
    Css,
}

impl ThemeStage {
    pub const ALL: [ThemeStage; 2] = [ThemeStage::Html, ThemeStage::Css];

    pub fn label(&self) -> &'static str {
        match self {
            ThemeStage::Html => "Generating page structure",
            ThemeStage::Css => "Generating stylesheet",
        }
    }
}

/// Template the model should start from: the current one if any, else the starter.
pub fn base_template(current: &SkinContent) -> String {
    match current.unified_template() {
        Some(template) => template.to_string(),
        None if !current.is_empty() => current.migrate_to_unified().html_template.unwrap_or_default(),
        None => SkinContent::starter().html_template.unwrap_or_default(),
    }
}

/// Stylesheet the model should start from.
pub fn base_css(current: &SkinContent) -> &str {
    if current.custom_css.trim().is_empty() {
        DEFAULT_CSS
    } else {
        &current.custom_css
    }
}

fn json_rules(keys: &[&str]) -> String {
    let quoted: Vec<String> = keys.iter().map(|k| format!("\"{}\"", k)).collect();
    format!(
        "=== RESPONSE FORMAT ===\n\
1. Reply with a single JSON object and nothing else. Do not wrap it in Markdown fences.\n\
2. Keys: \"message\" (one short sentence for the user), {}.\n\
3. Escape newlines inside strings as \\n and double quotes as \\\".\n\
4. Return complete content for every key, never a diff.\n",
        quoted.join(", ")
    )
}

fn template_rules() -> String {
    format!(
        "=== TEMPLATE LANGUAGE ===\n\
Keep the template logic working: loops, conditions and partials must stay balanced.\n\
Never add <script>, inline event handlers or external embeds; they are stripped at render time.\n\
{}",
        TEMPLATE_VARIABLES.describe()
    )
}

/// System prompt of the single-call generator, tailored to the edit target.
pub fn theme_system_prompt(target: EditTarget, current: &SkinContent) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "You are a senior web designer. Modify the provided blog theme to match the user's request."
    );
    let _ = writeln!(prompt, "Edit target: {}\n", target.describe());

    match target {
        EditTarget::Unified => {
            let _ = writeln!(prompt, "=== BASE HTML ===\n{}\n", base_template(current));
            let _ = writeln!(prompt, "=== BASE CSS ===\n{}\n", base_css(current));
            prompt.push_str(&template_rules());
            prompt.push('\n');
            prompt.push_str(&json_rules(&["html", "css"]));
        }
        EditTarget::Section(SectionKey::CustomCss) => {
            let _ = writeln!(prompt, "=== MARKUP (read only) ===\n{}\n", base_template(current));
            let _ = writeln!(prompt, "=== CURRENT CSS ===\n{}\n", base_css(current));
            prompt.push_str(&json_rules(&["css"]));
        }
        EditTarget::Section(key) => {
            let _ = writeln!(
                prompt,
                "=== CURRENT {} ===\n{}\n",
                key.label().to_uppercase(),
                current.section(key)
            );
            let _ = writeln!(prompt, "=== CURRENT CSS ===\n{}\n", base_css(current));
            prompt.push_str(&template_rules());
            prompt.push('\n');
            prompt.push_str(&json_rules(&[key.as_str(), "css"]));
        }
    }
    prompt
}

/// System prompt for one stage of the two-stage pipeline. The CSS stage sees
/// the markup produced by the HTML stage.
pub fn stage_system_prompt(stage: ThemeStage, draft: &SkinContent) -> String {
    let mut prompt = String::from(
        "You are a senior web designer working on a blog theme in two steps.\n",
    );
    match stage {
        ThemeStage::Html => {
            let _ = writeln!(
                prompt,
                "Step 1: rewrite the page template. Keep the class names meaningful so the stylesheet can target them.\n"
            );
            let _ = writeln!(prompt, "=== BASE HTML ===\n{}\n", base_template(draft));
            prompt.push_str(&template_rules());
            prompt.push('\n');
            prompt.push_str(&json_rules(&["html"]));
        }
        ThemeStage::Css => {
            let _ = writeln!(
                prompt,
                "Step 2: write the stylesheet for the template below. Style every class it uses.\n"
            );
            let _ = writeln!(prompt, "=== TEMPLATE ===\n{}\n", base_template(draft));
            let _ = writeln!(prompt, "=== PREVIOUS CSS ===\n{}\n", base_css(draft));
            prompt.push_str(&json_rules(&["css"]));
        }
    }
    prompt
}

/// System prompt for free-form design chat about one section.
pub fn chat_system_prompt(target: EditTarget, current_code: &str) -> String {
    let mut prompt = String::from(
        "You are a friendly web design assistant helping a blogger customize their blog skin.\n\
Answer briefly. When you propose code, put it in a single fenced block containing the complete new content.\n\n",
    );
    let _ = writeln!(prompt, "The user is editing: {}\n", target.describe());
    if !current_code.trim().is_empty() {
        let _ = writeln!(prompt, "=== CURRENT CODE ===\n{}\n", current_code);
    }
    prompt.push_str(&template_rules());
    prompt
}

pub fn theme_user_prompt(request: &str) -> String {
    format!("Generate a theme for: \"{}\"", request)
}

/// Client turns without any system messages, cut to the most recent `limit`.
pub fn trim_history(messages: &[ChatMessage], limit: usize) -> Vec<ChatMessage> {
    let turns: Vec<&ChatMessage> = messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .collect();
    let skip = turns.len().saturating_sub(limit);
    turns.into_iter().skip(skip).cloned().collect()
}
