//! Database repository for skin operations.
//!
//! Every write bumps the row version; conditional updates on the previous
//! version detect concurrent modification.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::errors::AppError;
use crate::models::{EditTarget, SaveSkinRequest, SkinContent, SkinTemplate};

const SKIN_COLUMNS: &str = "blog_id, html_head, html_header, html_post_list, html_post_item, \
html_post_detail, html_sidebar, html_footer, html_template, custom_css, is_active, updated_at, version";

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the stored skin of a blog.
    pub async fn get_skin(&self, blog_id: &str) -> Result<Option<SkinTemplate>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM custom_skins WHERE blog_id = ?",
            SKIN_COLUMNS
        ))
        .bind(blog_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(skin_from_row))
    }

    /// Overwrite the whole skin. Omitted sections are stored empty.
    pub async fn save_skin(
        &self,
        blog_id: &str,
        request: &SaveSkinRequest,
    ) -> Result<SkinTemplate, AppError> {
        let existing = self.get_skin(blog_id).await?;

        // Check version for optimistic concurrency
        if let Some(expected) = request.expected_version {
            let current = existing.as_ref().map(|s| s.version).unwrap_or(0);
            if current != expected {
                return Err(AppError::Conflict {
                    message: format!(
                        "Version mismatch: expected {}, current {}",
                        expected, current
                    ),
                    current_version: current,
                });
            }
        }

        let is_active = request
            .is_active
            .or(existing.as_ref().map(|s| s.is_active))
            .unwrap_or(false);

        self.write_skin(
            blog_id,
            &request.content,
            is_active,
            existing.map(|s| s.version),
        )
        .await
    }

    /// Replace one section (or the unified template) wholesale.
    pub async fn replace_section(
        &self,
        blog_id: &str,
        target: EditTarget,
        markup: String,
    ) -> Result<SkinTemplate, AppError> {
        let existing = self.get_skin(blog_id).await?;
        let (mut content, is_active, version) = match existing {
            Some(skin) => (skin.content, skin.is_active, Some(skin.version)),
            None => (SkinContent::default(), false, None),
        };

        match target {
            EditTarget::Unified => content.html_template = Some(markup),
            EditTarget::Section(key) => content.set_section(key, markup),
        }

        self.write_skin(blog_id, &content, is_active, version).await
    }

    /// Activate or deactivate a stored skin.
    pub async fn set_active(
        &self,
        blog_id: &str,
        is_active: bool,
    ) -> Result<SkinTemplate, AppError> {
        let existing = self
            .get_skin(blog_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Skin for blog {} not found", blog_id)))?;

        self.write_skin(blog_id, &existing.content, is_active, Some(existing.version))
            .await
    }

    /// Clear every section and deactivate. The row itself is kept.
    pub async fn reset_skin(&self, blog_id: &str) -> Result<SkinTemplate, AppError> {
        let existing = self
            .get_skin(blog_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Skin for blog {} not found", blog_id)))?;

        self.write_skin(
            blog_id,
            &SkinContent::default(),
            false,
            Some(existing.version),
        )
        .await
    }

    /// Fold every legacy per-section skin into the unified representation.
    /// Returns the number of skins converted.
    pub async fn migrate_legacy_skins(&self) -> Result<usize, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM custom_skins WHERE html_template IS NULL OR trim(html_template) = ''",
            SKIN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut migrated = 0;
        for skin in rows.iter().map(skin_from_row) {
            if skin.content.is_empty() {
                continue;
            }
            let unified = skin.content.migrate_to_unified();
            self.write_skin(&skin.blog_id, &unified, skin.is_active, Some(skin.version))
                .await?;
            migrated += 1;
        }

        if migrated > 0 {
            info!("Migrated {} legacy skins to the unified template", migrated);
        }
        Ok(migrated)
    }

    async fn write_skin(
        &self,
        blog_id: &str,
        content: &SkinContent,
        is_active: bool,
        previous_version: Option<i64>,
    ) -> Result<SkinTemplate, AppError> {
        let now = Utc::now().to_rfc3339();
        let new_version = previous_version.map(|v| v + 1).unwrap_or(1);

        let result = match previous_version {
            None => {
                sqlx::query(
                    "INSERT INTO custom_skins (blog_id, html_head, html_header, html_post_list, html_post_item, html_post_detail, html_sidebar, html_footer, html_template, custom_css, is_active, updated_at, version) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1) ON CONFLICT(blog_id) DO NOTHING"
                )
                .bind(blog_id)
                .bind(&content.html_head)
                .bind(&content.html_header)
                .bind(&content.html_post_list)
                .bind(&content.html_post_item)
                .bind(&content.html_post_detail)
                .bind(&content.html_sidebar)
                .bind(&content.html_footer)
                .bind(&content.html_template)
                .bind(&content.custom_css)
                .bind(is_active as i32)
                .bind(&now)
                .execute(&self.pool)
                .await?
            }
            Some(version) => {
                // Use conditional UPDATE with version check to prevent race conditions
                sqlx::query(
                    "UPDATE custom_skins SET html_head = ?, html_header = ?, html_post_list = ?, html_post_item = ?, html_post_detail = ?, html_sidebar = ?, html_footer = ?, html_template = ?, custom_css = ?, is_active = ?, updated_at = ?, version = ? \
                     WHERE blog_id = ? AND version = ?"
                )
                .bind(&content.html_head)
                .bind(&content.html_header)
                .bind(&content.html_post_list)
                .bind(&content.html_post_item)
                .bind(&content.html_post_detail)
                .bind(&content.html_sidebar)
                .bind(&content.html_footer)
                .bind(&content.html_template)
                .bind(&content.custom_css)
                .bind(is_active as i32)
                .bind(&now)
                .bind(new_version)
                .bind(blog_id)
                .bind(version)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            // Race condition - version changed between read and write
            let current = self.get_skin(blog_id).await?;
            return Err(AppError::Conflict {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|s| s.version).unwrap_or(0),
            });
        }

        Ok(SkinTemplate {
            blog_id: blog_id.to_string(),
            content: content.clone(),
            is_active,
            updated_at: now,
            version: new_version,
        })
    }
}

fn skin_from_row(row: &sqlx::sqlite::SqliteRow) -> SkinTemplate {
    let is_active: i32 = row.get("is_active");
    SkinTemplate {
        blog_id: row.get("blog_id"),
        content: SkinContent {
            html_head: row.get("html_head"),
            html_header: row.get("html_header"),
            html_post_list: row.get("html_post_list"),
            html_post_item: row.get("html_post_item"),
            html_post_detail: row.get("html_post_detail"),
            html_sidebar: row.get("html_sidebar"),
            html_footer: row.get("html_footer"),
            html_template: row.get("html_template"),
            custom_css: row.get("custom_css"),
        },
        is_active: is_active != 0,
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}
