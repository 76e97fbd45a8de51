//! Theme generation service.
//!
//! Builds prompts around the current skin, invokes the model and turns its
//! free-form answer into a template/stylesheet pair. Output is returned raw:
//! sanitizing and scoping happen at render time.

pub mod extract;
pub mod prompt;
pub mod provider;

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::models::{
    defaults::DEFAULT_CSS, ChatMessage, EditTarget, GeneratedSections, GeneratedTheme, SectionKey,
    SkinContent,
};
use extract::{clean_completion, ExtractedTheme, ExtractorChain};
use prompt::{ThemeStage, stage_system_prompt, theme_system_prompt, theme_user_prompt, trim_history};
pub use provider::{CompletionProvider, CompletionRequest, CompletionStream, OllamaProvider, ProviderHealth};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("The AI model could not be reached: {0}")]
    Unreachable(String),

    #[error("The AI model returned status {status}")]
    UpstreamStatus { status: u16, body: String },

    #[error("The AI model reported an error: {0}")]
    Backend(String),

    #[error("The AI model returned an empty response")]
    EmptyCompletion,

    #[error("No template or stylesheet could be recovered from the AI response")]
    Unparsable,

    #[error("The AI model response was malformed: {0}")]
    Decode(String),
}

/// Sampling parameters and history bound applied to every call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub num_predict: u32,
    pub history_limit: usize,
}

impl From<&ModelConfig> for GenerationOptions {
    fn from(config: &ModelConfig) -> Self {
        Self {
            temperature: config.temperature,
            num_predict: config.num_predict,
            history_limit: config.history_limit,
        }
    }
}

pub struct ThemeGenerator {
    provider: Arc<dyn CompletionProvider>,
    options: GenerationOptions,
    extractors: ExtractorChain,
}

impl ThemeGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>, options: GenerationOptions) -> Self {
        Self {
            provider,
            options,
            extractors: ExtractorChain::default(),
        }
    }

    pub fn options(&self) -> GenerationOptions {
        self.options
    }

    pub async fn health(&self) -> ProviderHealth {
        self.provider.health().await
    }

    fn request(&self, messages: Vec<ChatMessage>, json: bool) -> CompletionRequest {
        CompletionRequest {
            messages,
            json,
            temperature: self.options.temperature,
            num_predict: self.options.num_predict,
        }
    }

    /// Single-call generation for `target`.
    pub async fn generate(
        &self,
        user_request: &str,
        target: EditTarget,
        current: &SkinContent,
    ) -> Result<GeneratedTheme, GenerationError> {
        info!("Theme request for {}: \"{}\"", target.describe(), user_request);

        let messages = vec![
            ChatMessage::system(theme_system_prompt(target, current)),
            ChatMessage::user(theme_user_prompt(user_request)),
        ];
        let raw = self.provider.complete(&self.request(messages, true)).await?;
        let extracted = self.extract(&raw)?;
        let theme = assemble_theme(extracted, target, current, user_request);

        info!(
            "Generation done: html {} chars, css {} chars",
            theme.sections.html_template.as_deref().map_or(0, str::len),
            theme.sections.custom_css.len()
        );
        Ok(theme)
    }

    /// Run one stage of the two-stage pipeline and fold its output into `draft`.
    pub async fn generate_stage(
        &self,
        stage: ThemeStage,
        user_request: &str,
        draft: &SkinContent,
    ) -> Result<SkinContent, GenerationError> {
        info!("Theme stage {:?} for \"{}\"", stage, user_request);

        let messages = vec![
            ChatMessage::system(stage_system_prompt(stage, draft)),
            ChatMessage::user(theme_user_prompt(user_request)),
        ];
        let raw = self.provider.complete(&self.request(messages, true)).await?;
        let extracted = self.extract(&raw)?;

        let mut next = draft.clone();
        match stage {
            ThemeStage::Html => {
                let html = extracted
                    .html
                    .ok_or(GenerationError::Unparsable)?;
                next.html_template = Some(html);
            }
            ThemeStage::Css => {
                let css = extracted.css.ok_or(GenerationError::Unparsable)?;
                next.custom_css = css;
            }
        }
        Ok(next)
    }

    /// Open a streamed design-chat completion over the trimmed history.
    pub async fn stream_chat(
        &self,
        system_prompt: String,
        history: &[ChatMessage],
    ) -> Result<CompletionStream, GenerationError> {
        let mut messages = vec![ChatMessage::system(system_prompt)];
        messages.extend(trim_history(history, self.options.history_limit));
        self.provider.stream(&self.request(messages, false)).await
    }

    fn extract(&self, raw: &str) -> Result<ExtractedTheme, GenerationError> {
        let cleaned = clean_completion(raw);
        if cleaned.is_empty() {
            return Err(GenerationError::EmptyCompletion);
        }
        match self.extractors.extract(&cleaned) {
            Some((path, theme)) => {
                info!("Extracted theme via {} extractor", path);
                Ok(theme)
            }
            None => {
                warn!("Unparsable model output ({} chars)", cleaned.len());
                Err(GenerationError::Unparsable)
            }
        }
    }
}

/// Fill whatever the model left out from the current skin, then the defaults.
fn assemble_theme(
    extracted: ExtractedTheme,
    target: EditTarget,
    current: &SkinContent,
    user_request: &str,
) -> GeneratedTheme {
    let fallback_css = || {
        if current.custom_css.trim().is_empty() {
            DEFAULT_CSS.to_string()
        } else {
            current.custom_css.clone()
        }
    };

    let message = extracted.message.clone();
    let sections = match target {
        EditTarget::Unified => GeneratedSections {
            html_template: Some(
                extracted
                    .html
                    .unwrap_or_else(|| prompt::base_template(current)),
            ),
            custom_css: extracted.css.unwrap_or_else(fallback_css),
            sections: Default::default(),
        },
        EditTarget::Section(SectionKey::CustomCss) => GeneratedSections {
            html_template: None,
            custom_css: extracted.css.unwrap_or_else(fallback_css),
            sections: Default::default(),
        },
        EditTarget::Section(key) => {
            let markup = extracted
                .sections
                .get(&key)
                .cloned()
                .or(extracted.html)
                .unwrap_or_else(|| current.section(key).to_string());
            GeneratedSections {
                html_template: None,
                custom_css: extracted.css.unwrap_or_else(fallback_css),
                sections: [(key.as_str().to_string(), markup)].into_iter().collect(),
            }
        }
    };

    GeneratedTheme {
        message: message.unwrap_or_else(|| match target {
            EditTarget::Unified => format!(
                "\"{}\" theme is ready. The HTML structure and CSS were generated together.",
                user_request
            ),
            EditTarget::Section(key) => {
                format!("Updated the {} for \"{}\".", key.label(), user_request)
            }
        }),
        sections,
    }
}
