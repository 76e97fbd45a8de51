//! Render context assembled from collaborator records.
//!
//! Blog, post and category data live in an external store; these records are
//! the shape in which callers hand that data to the render pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use super::skin::PageKind;
use crate::render::sanitize::sanitize;

/// Maximum excerpt length in characters.
const EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// RFC 3339 timestamp or a plain `YYYY-MM-DD` date
    pub created_at: String,
    #[serde(default)]
    pub view_count: Option<i64>,
    #[serde(default)]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub category: Option<CategoryRecord>,
}

/// Everything the collaborators supply for one page view.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSource {
    pub blog: BlogRecord,
    #[serde(default)]
    pub profile: Option<ProfileRecord>,
    /// Newest first
    #[serde(default)]
    pub posts: Vec<PostRecord>,
    #[serde(default)]
    pub categories: Vec<CategoryRecord>,
    #[serde(default)]
    pub subscriber_count: Option<i64>,
    #[serde(default)]
    pub visitor_count: Option<i64>,
    /// Set when rendering a single post page
    #[serde(default)]
    pub post: Option<PostRecord>,
}

/// A post as seen by list templates.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PostView {
    pub post_id: String,
    pub post_title: String,
    pub post_excerpt: String,
    pub post_date: String,
    pub post_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub view_count: i64,
    pub like_count: i64,
    pub blog_id: String,
    pub category_name: String,
}

/// The post shown on a detail page; its fields sit at the top level of the context.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PostDetailView {
    pub post_id: String,
    pub post_title: String,
    pub post_date: String,
    /// Sanitized body HTML, meant for `{{{post_content}}}`
    pub post_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_thumbnail_url: Option<String>,
    pub post_view_count: i64,
    pub post_like_count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryView {
    pub category_id: String,
    pub category_name: String,
}

/// Read-only input of a single render pass. Scalars are never absent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TemplateContext {
    pub blog_id: String,
    pub blog_name: String,
    pub blog_description: String,
    pub profile_name: String,
    pub profile_image: String,
    pub post_count: i64,
    pub subscriber_count: i64,
    pub visitor_count: i64,
    pub current_year: i32,
    pub no_posts: bool,
    pub is_post_list: bool,
    pub is_post_detail: bool,
    pub posts: Vec<PostView>,
    pub categories: Vec<CategoryView>,
    #[serde(flatten)]
    pub post: Option<PostDetailView>,
}

impl TemplateContext {
    /// Build the context for one page view. `current_year` is passed in so the
    /// render stays a pure function of its inputs.
    pub fn assemble(source: &ContextSource, current_year: i32) -> Self {
        let blog = &source.blog;
        let posts: Vec<PostView> = source
            .posts
            .iter()
            .map(|p| PostView {
                post_id: p.id.clone(),
                post_title: p.title.clone(),
                post_excerpt: excerpt_of(p),
                post_date: format_post_date(&p.created_at),
                post_url: post_url(&blog.id, &p.id),
                thumbnail_url: p.thumbnail_url.clone().filter(|u| !u.is_empty()),
                view_count: p.view_count.unwrap_or(0),
                like_count: p.like_count.unwrap_or(0),
                blog_id: blog.id.clone(),
                category_name: p
                    .category
                    .as_ref()
                    .map(|c| c.name.clone())
                    .unwrap_or_default(),
            })
            .collect();

        let post = source.post.as_ref().map(|p| PostDetailView {
            post_id: p.id.clone(),
            post_title: p.title.clone(),
            post_date: format_post_date(&p.created_at),
            post_content: sanitize(p.content.as_deref().unwrap_or_default()),
            post_thumbnail_url: p.thumbnail_url.clone().filter(|u| !u.is_empty()),
            post_view_count: p.view_count.unwrap_or(0),
            post_like_count: p.like_count.unwrap_or(0),
        });

        let profile_name = source
            .profile
            .as_ref()
            .and_then(|p| p.nickname.clone())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| blog.name.clone());

        let profile_image = source
            .profile
            .as_ref()
            .and_then(|p| p.profile_image_url.clone())
            .or_else(|| blog.thumbnail_url.clone())
            .unwrap_or_default();

        Self {
            blog_id: blog.id.clone(),
            blog_name: blog.name.clone(),
            blog_description: blog.description.clone().unwrap_or_default(),
            profile_name,
            profile_image,
            post_count: posts.len() as i64,
            subscriber_count: source.subscriber_count.unwrap_or(0),
            visitor_count: source.visitor_count.unwrap_or(0),
            current_year,
            no_posts: posts.is_empty(),
            is_post_list: post.is_none(),
            is_post_detail: post.is_some(),
            categories: source
                .categories
                .iter()
                .map(|c| CategoryView {
                    category_id: c.id.clone(),
                    category_name: c.name.clone(),
                })
                .collect(),
            posts,
            post,
        }
    }

    pub fn page_kind(&self) -> PageKind {
        if self.is_post_detail {
            PageKind::PostDetail
        } else {
            PageKind::PostList
        }
    }

    /// JSON view the template engine walks.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn post_url(blog_id: &str, post_id: &str) -> String {
    format!("/blog/{}/post/{}", blog_id, post_id)
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"))
}

/// Explicit excerpt if given, otherwise the tag-stripped body cut to 100 characters.
fn excerpt_of(post: &PostRecord) -> String {
    if let Some(excerpt) = post.excerpt.as_deref().filter(|e| !e.trim().is_empty()) {
        return excerpt.to_string();
    }
    let body = post.content.as_deref().unwrap_or_default();
    let text = tag_regex().replace_all(body, "");
    text.trim().chars().take(EXCERPT_CHARS).collect()
}

/// Format a timestamp as `YYYY.MM.DD`; unparsable input is passed through.
pub fn format_post_date(raw: &str) -> String {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc).format("%Y.%m.%d").to_string();
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.format("%Y.%m.%d").to_string();
    }
    raw.to_string()
}
