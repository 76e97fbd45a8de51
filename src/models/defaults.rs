//! Built-in starting skin and the template vocabulary exposed to authors.
//!
//! The default skin doubles as the structural example embedded in generation
//! prompts and as the last-resort fallback when a generated field is unusable.

use serde::Serialize;

/// Default unified template. Uses every construct of the template language once.
pub const DEFAULT_HTML_TEMPLATE: &str = r#"<div class="skin-root">
  <header class="blog-header">
    <div class="header-inner">
      <div class="header-left">
        <a href="/" class="logo">Snuggle</a>
        <span class="divider">/</span>
        <a href="/blog/{{blog_id}}" class="blog-name">{{blog_name}}</a>
      </div>
      <nav class="header-nav">
        <a href="/" class="nav-link">Home</a>
        <a href="/feed" class="nav-link">Feed</a>
      </nav>
    </div>
  </header>

  <div class="blog-container">
    <main class="blog-main">
      {{#if is_post_detail}}
        <article class="post-detail">
          <h1 class="post-detail-title">{{post_title}}</h1>
          <time class="post-detail-date">{{post_date}}</time>
          <div class="post-detail-content">{{{post_content}}}</div>
        </article>
      {{/if}}
      {{#if is_post_list}}
        <div class="post-list-area">
          {{#posts}}
            {{> post_item}}
          {{/posts}}
          {{#if no_posts}}<p class="post-empty">No posts yet.</p>{{/if}}
        </div>
      {{/if}}
    </main>

    <aside class="blog-sidebar">
      <div class="profile-card">
        {{#if profile_image}}<img src="{{profile_image}}" class="profile-img" alt="{{blog_name}}" />{{/if}}
        <h3 class="profile-name">{{profile_name}}</h3>
        <p class="profile-desc">{{blog_description}}</p>
        <div class="profile-stats">
          <div class="stat"><span>Posts</span><strong>{{post_count}}</strong></div>
          <div class="stat"><span>Visitors</span><strong>{{visitor_count}}</strong></div>
        </div>
      </div>
      <ul class="category-list">
        {{#categories}}<li class="category-item" data-category-id="{{category_id}}">{{category_name}}</li>{{/categories}}
      </ul>
    </aside>
  </div>

  <footer class="blog-footer">
    <p>&copy; {{current_year}} {{blog_name}}</p>
  </footer>
</div>"#;

/// Markup of the `post_item` partial used by [`DEFAULT_HTML_TEMPLATE`].
pub const DEFAULT_POST_ITEM: &str = r#"<article class="post-card" data-post-id="{{post_id}}">
  <a href="{{post_url}}" class="post-link">
    {{#if thumbnail_url}}<div class="thumbnail-wrap"><img src="{{thumbnail_url}}" class="post-thumb" alt="" loading="lazy" /></div>{{/if}}
    <div class="post-content">
      <h2 class="post-title">{{post_title}}</h2>
      <p class="post-excerpt">{{post_excerpt}}</p>
      <div class="post-meta">
        <span>{{post_date}}</span>
        <span>Views {{view_count}}</span>
      </div>
    </div>
  </a>
</article>"#;

/// Default stylesheet matching the class names of [`DEFAULT_HTML_TEMPLATE`].
pub const DEFAULT_CSS: &str = r#":root {
  --bg: #fafafa;
  --card: #ffffff;
  --text: #18181b;
  --text-secondary: #71717a;
  --accent: #7c3aed;
  --border: #e4e4e7;
  --shadow: rgba(0,0,0,0.05);
}

.skin-root {
  background: var(--bg);
  color: var(--text);
  min-height: 100vh;
  font-family: -apple-system, BlinkMacSystemFont, sans-serif;
}

.blog-header { background: var(--card); border-bottom: 1px solid var(--border); padding: 1rem 0; }
.header-inner { max-width: 1024px; margin: 0 auto; display: flex; justify-content: space-between; align-items: center; padding: 0 1.5rem; }
.header-left { display: flex; align-items: center; gap: 0.5rem; }
.logo { font-weight: 700; font-size: 1.125rem; }
.divider { color: var(--border); }
.blog-name { color: var(--text-secondary); }
.header-nav { display: flex; gap: 1rem; }
.nav-link { font-size: 0.875rem; color: var(--text-secondary); }
.nav-link:hover { color: var(--accent); }

.blog-container { max-width: 1024px; margin: 2rem auto; padding: 0 1.5rem; display: grid; grid-template-columns: 1fr 280px; gap: 2rem; }
.blog-main { min-width: 0; }

.post-list-area { display: flex; flex-direction: column; gap: 1.5rem; }
.post-card { background: var(--card); border: 1px solid var(--border); border-radius: 12px; overflow: hidden; transition: transform 0.2s; }
.post-card:hover { transform: translateY(-2px); box-shadow: 0 4px 12px var(--shadow); }
.post-link { display: block; text-decoration: none; color: inherit; }
.post-content { padding: 1.5rem; }
.post-title { margin: 0 0 0.5rem; font-size: 1.25rem; font-weight: 700; }
.post-excerpt { color: var(--text-secondary); font-size: 0.9375rem; line-height: 1.6; margin-bottom: 1rem; }
.post-meta { display: flex; gap: 0.75rem; font-size: 0.75rem; color: var(--text-secondary); }
.post-detail-title { font-size: 2rem; font-weight: 800; margin-bottom: 0.5rem; }
.post-detail-content { line-height: 1.8; margin-top: 2rem; }

.profile-card { background: var(--card); border: 1px solid var(--border); border-radius: 12px; padding: 1.5rem; text-align: center; }
.profile-img { width: 80px; height: 80px; border-radius: 50%; margin: 0 auto 1rem; object-fit: cover; }
.profile-name { margin: 0 0 0.5rem; font-weight: 700; }
.profile-desc { font-size: 0.875rem; color: var(--text-secondary); margin-bottom: 1.5rem; }
.profile-stats { display: flex; justify-content: center; gap: 1.5rem; border-top: 1px solid var(--border); padding-top: 1rem; }
.stat { display: flex; flex-direction: column; font-size: 0.75rem; color: var(--text-secondary); }
.stat strong { font-size: 1rem; color: var(--text); font-weight: 600; margin-top: 0.25rem; }

.blog-footer { text-align: center; padding: 3rem 0; color: var(--text-secondary); font-size: 0.875rem; }

@media (max-width: 768px) {
  .blog-container { grid-template-columns: 1fr; }
  .blog-sidebar { order: -1; }
}
"#;

/// One entry of the template vocabulary.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TemplateVariable {
    pub name: &'static str,
    pub description: &'static str,
}

/// Variables, loops and partials a skin author can use, grouped for display.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TemplateVocabulary {
    pub blog: &'static [TemplateVariable],
    pub post: &'static [TemplateVariable],
    pub loop_syntax: &'static [TemplateVariable],
}

const fn var(name: &'static str, description: &'static str) -> TemplateVariable {
    TemplateVariable { name, description }
}

pub const TEMPLATE_VARIABLES: TemplateVocabulary = TemplateVocabulary {
    blog: &[
        var("blog_id", "Blog identifier"),
        var("blog_name", "Blog name"),
        var("blog_description", "Blog description"),
        var("profile_name", "Owner nickname, or the blog name when unset"),
        var("profile_image", "Owner profile image URL"),
        var("post_count", "Number of posts"),
        var("subscriber_count", "Number of subscribers"),
        var("visitor_count", "Number of visitors"),
        var("current_year", "Current year"),
        var("no_posts", "True when the blog has no posts"),
        var("is_post_list", "True on the post list page"),
        var("is_post_detail", "True on a single post page"),
    ],
    post: &[
        var("post_id", "Post identifier"),
        var("post_title", "Post title"),
        var("post_excerpt", "Plain-text excerpt (100 characters)"),
        var("post_date", "Formatted publication date"),
        var("post_url", "Link to the post"),
        var("thumbnail_url", "Thumbnail image URL, may be absent"),
        var("view_count", "View count"),
        var("like_count", "Like count"),
        var("category_name", "Category of the post"),
        var("{{{post_content}}}", "Post body HTML, inserted unescaped (detail page)"),
    ],
    loop_syntax: &[
        var("{{#posts}}...{{/posts}}", "Repeat for every post"),
        var("{{#categories}}...{{/categories}}", "Repeat for every category (category_id, category_name)"),
        var("{{#if name}}...{{/if}}", "Render only when the value is truthy"),
        var("{{> post_item}}", "Insert the post_item partial"),
    ],
};

impl TemplateVocabulary {
    /// Flatten the vocabulary into prompt-ready lines.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (title, group) in [
            ("Blog variables", self.blog),
            ("Post variables (inside {{#posts}})", self.post),
            ("Loops, conditions and partials", self.loop_syntax),
        ] {
            out.push_str(title);
            out.push_str(":\n");
            for entry in group {
                if entry.name.starts_with('{') {
                    out.push_str(&format!("- {}: {}\n", entry.name, entry.description));
                } else {
                    out.push_str(&format!("- {{{{{}}}}}: {}\n", entry.name, entry.description));
                }
            }
        }
        out
    }
}
