//! Skin storage and rendering endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::defaults::{TemplateVocabulary, TEMPLATE_VARIABLES};
use crate::models::{
    ContextSource, EditTarget, ReplaceSectionRequest, SaveSkinRequest, SectionKey, SetActiveRequest,
    SkinContent, SkinTemplate, TemplateContext,
};
use crate::render::{frame_document, render_skin, RenderedArtifact, FRAME_SANDBOX};
use crate::AppState;

/// Body of the stored-skin render route.
#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    pub source: ContextSource,
    /// Render an inactive skin too
    #[serde(default)]
    pub preview: bool,
}

/// Body of the unsaved-skin preview route.
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(flatten)]
    pub content: SkinContent,
    #[serde(default)]
    pub source: ContextSource,
}

/// Rendered skin plus everything needed to host it in an isolated frame.
#[derive(Debug, Serialize)]
pub struct RenderResponse {
    #[serde(flatten)]
    pub artifact: RenderedArtifact,
    pub container: String,
    pub sandbox: &'static str,
    pub document: String,
}

/// Built-in starter skin and the template vocabulary.
#[derive(Debug, Serialize)]
pub struct SkinDefaults {
    #[serde(flatten)]
    pub content: SkinContent,
    pub vocabulary: TemplateVocabulary,
}

/// GET /api/blogs/:blog_id/skin - Get the stored skin.
pub async fn get_skin(
    State(state): State<AppState>,
    Path(blog_id): Path<String>,
) -> ApiResult<SkinTemplate> {
    let skin = state
        .repo
        .get_skin(&blog_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Skin for blog {} not found", blog_id)))?;
    success(skin)
}

/// PUT /api/blogs/:blog_id/skin - Overwrite the whole skin.
pub async fn save_skin(
    State(state): State<AppState>,
    Path(blog_id): Path<String>,
    Json(request): Json<SaveSkinRequest>,
) -> ApiResult<SkinTemplate> {
    if request.is_active == Some(true) && request.content.is_empty() {
        return Err(AppError::Validation(
            "Cannot activate an empty skin".to_string(),
        ));
    }

    let skin = state.repo.save_skin(&blog_id, &request).await?;
    tracing::info!("Saved skin for blog {} (version {})", blog_id, skin.version);
    success(skin)
}

/// PUT /api/blogs/:blog_id/skin/sections/:section - Replace one section.
pub async fn replace_section(
    State(state): State<AppState>,
    Path((blog_id, section)): Path<(String, String)>,
    Json(request): Json<ReplaceSectionRequest>,
) -> ApiResult<SkinTemplate> {
    let target = parse_section(&section)?;
    let skin = state
        .repo
        .replace_section(&blog_id, target, request.content)
        .await?;
    success(skin)
}

/// POST /api/blogs/:blog_id/skin/active - Activate or deactivate.
pub async fn set_skin_active(
    State(state): State<AppState>,
    Path(blog_id): Path<String>,
    Json(request): Json<SetActiveRequest>,
) -> ApiResult<SkinTemplate> {
    if request.is_active {
        let empty = state
            .repo
            .get_skin(&blog_id)
            .await?
            .is_some_and(|s| s.content.is_empty());
        if empty {
            return Err(AppError::Validation(
                "Cannot activate an empty skin".to_string(),
            ));
        }
    }

    let skin = state.repo.set_active(&blog_id, request.is_active).await?;
    success(skin)
}

/// DELETE /api/blogs/:blog_id/skin - Clear and deactivate.
pub async fn reset_skin(
    State(state): State<AppState>,
    Path(blog_id): Path<String>,
) -> ApiResult<SkinTemplate> {
    let skin = state.repo.reset_skin(&blog_id).await?;
    tracing::info!("Reset skin for blog {}", blog_id);
    success(skin)
}

/// POST /api/blogs/:blog_id/skin/render - Render the stored skin for one page view.
pub async fn render_stored_skin(
    State(state): State<AppState>,
    Path(blog_id): Path<String>,
    Json(request): Json<RenderRequest>,
) -> ApiResult<RenderResponse> {
    let skin = state
        .repo
        .get_skin(&blog_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Skin for blog {} not found", blog_id)))?;

    if !skin.is_active && !request.preview {
        return Err(AppError::NotFound(format!(
            "No active skin for blog {}",
            blog_id
        )));
    }

    let content = if skin.content.is_empty() {
        SkinContent::starter()
    } else {
        skin.content
    };
    success(render_for(&state, &content, &request.source))
}

/// POST /api/skins/preview - Render an unsaved skin.
pub async fn preview_skin(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<RenderResponse> {
    if request.content.is_empty() {
        return Err(AppError::Validation(
            "Nothing to preview: template and stylesheet are empty".to_string(),
        ));
    }
    success(render_for(&state, &request.content, &request.source))
}

/// GET /api/skins/defaults - Built-in starter skin and vocabulary.
pub async fn get_skin_defaults() -> ApiResult<SkinDefaults> {
    success(SkinDefaults {
        content: SkinContent::starter(),
        vocabulary: TEMPLATE_VARIABLES,
    })
}

fn render_for(state: &AppState, content: &SkinContent, source: &ContextSource) -> RenderResponse {
    let container = state.config.scope_selector.as_str();
    let context = TemplateContext::assemble(source, Utc::now().year());
    let artifact = render_skin(content, &context, container);
    let document = frame_document(&artifact, container, &context.blog_name);

    RenderResponse {
        artifact,
        container: container.to_string(),
        sandbox: FRAME_SANDBOX,
        document,
    }
}

/// Strict section name: unknown names are rejected rather than defaulted.
fn parse_section(name: &str) -> Result<EditTarget, AppError> {
    if name == "html_template" {
        return Ok(EditTarget::Unified);
    }
    SectionKey::parse(name)
        .map(EditTarget::Section)
        .ok_or_else(|| AppError::Validation(format!("Unknown section: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_section_is_strict() {
        assert_eq!(parse_section("html_template").unwrap(), EditTarget::Unified);
        assert_eq!(
            parse_section("custom_css").unwrap(),
            EditTarget::Section(SectionKey::CustomCss)
        );
        assert!(matches!(
            parse_section("html_banner"),
            Err(AppError::Validation(_))
        ));
    }
}
