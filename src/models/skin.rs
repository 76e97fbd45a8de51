//! Custom skin model: section keys, stored template content and the canonical
//! unified document every render goes through.

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::defaults::{DEFAULT_CSS, DEFAULT_HTML_TEMPLATE, DEFAULT_POST_ITEM};

/// Named fragment templates resolved by `{{> name}}`.
pub type Partials = HashMap<String, String>;

/// Name under which the post item section is exposed as a partial.
pub const POST_ITEM_PARTIAL: &str = "post_item";

/// One editable section of a skin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKey {
    HtmlHead,
    HtmlHeader,
    HtmlPostList,
    HtmlPostItem,
    HtmlPostDetail,
    HtmlSidebar,
    HtmlFooter,
    CustomCss,
}

impl SectionKey {
    pub const ALL: [SectionKey; 8] = [
        SectionKey::HtmlHead,
        SectionKey::HtmlHeader,
        SectionKey::HtmlPostList,
        SectionKey::HtmlPostItem,
        SectionKey::HtmlPostDetail,
        SectionKey::HtmlSidebar,
        SectionKey::HtmlFooter,
        SectionKey::CustomCss,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKey::HtmlHead => "html_head",
            SectionKey::HtmlHeader => "html_header",
            SectionKey::HtmlPostList => "html_post_list",
            SectionKey::HtmlPostItem => "html_post_item",
            SectionKey::HtmlPostDetail => "html_post_detail",
            SectionKey::HtmlSidebar => "html_sidebar",
            SectionKey::HtmlFooter => "html_footer",
            SectionKey::CustomCss => "custom_css",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        SectionKey::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Human wording used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            SectionKey::HtmlHead => "document head",
            SectionKey::HtmlHeader => "blog header",
            SectionKey::HtmlPostList => "post list",
            SectionKey::HtmlPostItem => "post list item (the post_item partial)",
            SectionKey::HtmlPostDetail => "post detail page",
            SectionKey::HtmlSidebar => "sidebar",
            SectionKey::HtmlFooter => "footer",
            SectionKey::CustomCss => "stylesheet",
        }
    }

    pub fn is_markup(&self) -> bool {
        !matches!(self, SectionKey::CustomCss)
    }
}

/// What a generation request is editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTarget {
    /// The merged `html_template` + `custom_css` pair
    Unified,
    Section(SectionKey),
}

impl EditTarget {
    /// Resolve the optional `activeSection` request field. Unknown names fall back to unified mode.
    pub fn from_request(active_section: Option<&str>) -> Self {
        match active_section.map(str::trim) {
            None | Some("") | Some("unified") | Some("html_template") => EditTarget::Unified,
            Some(name) => SectionKey::parse(name)
                .map(EditTarget::Section)
                .unwrap_or(EditTarget::Unified),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            EditTarget::Unified => "unified (the whole page template and stylesheet)".to_string(),
            EditTarget::Section(key) => format!("{} ({})", key.as_str(), key.label()),
        }
    }
}

/// Which page a render produces. Only the legacy section layout cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageKind {
    #[default]
    PostList,
    PostDetail,
}

/// Raw skin source as stored and edited. Either representation may be populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkinContent {
    #[serde(default)]
    pub html_head: String,
    #[serde(default)]
    pub html_header: String,
    #[serde(default)]
    pub html_post_list: String,
    #[serde(default)]
    pub html_post_item: String,
    #[serde(default)]
    pub html_post_detail: String,
    #[serde(default)]
    pub html_sidebar: String,
    #[serde(default)]
    pub html_footer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_template: Option<String>,
    #[serde(default)]
    pub custom_css: String,
}

impl SkinContent {
    /// Unified skin holding the built-in template and stylesheet.
    pub fn starter() -> Self {
        let html = inline_partial(DEFAULT_HTML_TEMPLATE, POST_ITEM_PARTIAL, DEFAULT_POST_ITEM);
        Self {
            html_template: Some(html),
            custom_css: DEFAULT_CSS.to_string(),
            ..Self::default()
        }
    }

    pub fn section(&self, key: SectionKey) -> &str {
        match key {
            SectionKey::HtmlHead => &self.html_head,
            SectionKey::HtmlHeader => &self.html_header,
            SectionKey::HtmlPostList => &self.html_post_list,
            SectionKey::HtmlPostItem => &self.html_post_item,
            SectionKey::HtmlPostDetail => &self.html_post_detail,
            SectionKey::HtmlSidebar => &self.html_sidebar,
            SectionKey::HtmlFooter => &self.html_footer,
            SectionKey::CustomCss => &self.custom_css,
        }
    }

    pub fn set_section(&mut self, key: SectionKey, value: String) {
        let slot = match key {
            SectionKey::HtmlHead => &mut self.html_head,
            SectionKey::HtmlHeader => &mut self.html_header,
            SectionKey::HtmlPostList => &mut self.html_post_list,
            SectionKey::HtmlPostItem => &mut self.html_post_item,
            SectionKey::HtmlPostDetail => &mut self.html_post_detail,
            SectionKey::HtmlSidebar => &mut self.html_sidebar,
            SectionKey::HtmlFooter => &mut self.html_footer,
            SectionKey::CustomCss => &mut self.custom_css,
        };
        *slot = value;
    }

    /// Non-empty sections in key order.
    pub fn sections(&self) -> BTreeMap<SectionKey, String> {
        SectionKey::ALL
            .into_iter()
            .filter(|k| !self.section(*k).trim().is_empty())
            .map(|k| (k, self.section(k).to_string()))
            .collect()
    }

    pub fn unified_template(&self) -> Option<&str> {
        self.html_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn is_unified(&self) -> bool {
        self.unified_template().is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.is_unified() && SectionKey::ALL.iter().all(|k| self.section(*k).trim().is_empty())
    }

    /// Canonical document for rendering a page of the given kind.
    pub fn to_document(&self, page: PageKind) -> SkinDocument {
        let mut partials = Partials::new();
        if !self.html_post_item.trim().is_empty() {
            partials.insert(POST_ITEM_PARTIAL.to_string(), self.html_post_item.clone());
        }

        let html = match self.unified_template() {
            Some(template) => template.to_string(),
            None => {
                let main = match page {
                    PageKind::PostList => self.html_post_list.as_str(),
                    PageKind::PostDetail => self.html_post_detail.as_str(),
                };
                compose_sections(self, main)
            }
        };

        SkinDocument {
            html,
            css: self.custom_css.clone(),
            partials,
        }
    }

    /// Fold legacy per-section markup into a single `html_template`.
    ///
    /// The list and detail bodies are selected with the `is_post_list` /
    /// `is_post_detail` context flags and the `post_item` partial is inlined,
    /// so the result renders identically without any partial map.
    pub fn migrate_to_unified(&self) -> SkinContent {
        if self.is_unified() {
            return self.clone();
        }

        let mut main = String::new();
        if !self.html_post_detail.trim().is_empty() {
            main.push_str("{{#if is_post_detail}}");
            main.push_str(&self.html_post_detail);
            main.push_str("{{/if}}{{#if is_post_list}}");
            main.push_str(&self.html_post_list);
            main.push_str("{{/if}}");
        } else {
            main.push_str(&self.html_post_list);
        }

        let composed = compose_sections(self, &main);
        let html = inline_partial(&composed, POST_ITEM_PARTIAL, &self.html_post_item);

        SkinContent {
            html_template: Some(html),
            custom_css: self.custom_css.clone(),
            ..SkinContent::default()
        }
    }
}

/// Lay legacy sections out as header, two-column main and footer.
fn compose_sections(content: &SkinContent, main: &str) -> String {
    format!(
        "{head}{header}<main style=\"max-width: 1280px; margin: 0 auto; padding: 2rem 1.5rem;\">\
<div style=\"display: flex; gap: 2rem;\"><div style=\"flex: 1;\">{main}</div>\
<aside style=\"width: 280px; flex-shrink: 0;\">{sidebar}</aside></div></main>{footer}",
        head = content.html_head,
        header = content.html_header,
        main = main,
        sidebar = content.html_sidebar,
        footer = content.html_footer,
    )
}

fn partial_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{>\s*([A-Za-z0-9_\-]+)\s*\}\}").expect("valid partial regex"))
}

/// Replace every `{{> name}}` call with the partial's markup.
fn inline_partial(template: &str, name: &str, markup: &str) -> String {
    partial_call_regex()
        .replace_all(template, |caps: &regex::Captures| {
            if &caps[1] == name {
                markup.to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Canonical render input: one template, its stylesheet and the partials it may call.
#[derive(Debug, Clone, Default)]
pub struct SkinDocument {
    pub html: String,
    pub css: String,
    pub partials: Partials,
}

/// A blog's stored custom skin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkinTemplate {
    pub blog_id: String,
    #[serde(flatten)]
    pub content: SkinContent,
    pub is_active: bool,
    pub updated_at: String,
    /// Incremented on every write
    #[serde(default)]
    pub version: i64,
}

/// Request body for a wholesale save. Omitted sections are stored empty.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSkinRequest {
    #[serde(flatten)]
    pub content: SkinContent,
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Optimistic concurrency check against the stored version
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request body for replacing a single section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceSectionRequest {
    pub content: String,
}

/// Request body for activating or deactivating a skin.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveRequest {
    pub is_active: bool,
}
