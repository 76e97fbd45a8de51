//! Request and response shapes of the theme generation endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::skin::{SectionKey, SkinContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Body of every generation endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub active_section: Option<String>,
    /// Either a JSON object of section key to markup, or the raw code of the active section
    #[serde(default)]
    pub current_code: Option<String>,
    /// Conversation to continue; a new one is opened when absent
    #[serde(default)]
    pub session_id: Option<String>,
}

impl GenerateRequest {
    /// Latest user turn, which is the design request proper.
    pub fn latest_user_request(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.trim())
            .filter(|c| !c.is_empty())
    }

    /// Interpret `currentCode` as the template snapshot the user is editing.
    pub fn current_sections(&self, active: Option<SectionKey>) -> SkinContent {
        let Some(code) = self.current_code.as_deref().filter(|c| !c.trim().is_empty()) else {
            return SkinContent::default();
        };

        if let Ok(map) = serde_json::from_str::<BTreeMap<String, serde_json::Value>>(code) {
            let mut content = SkinContent::default();
            for (key, value) in map {
                let Some(text) = value.as_str() else { continue };
                if key == "html_template" {
                    content.html_template = Some(text.to_string());
                } else if let Some(section) = SectionKey::parse(&key) {
                    content.set_section(section, text.to_string());
                }
            }
            return content;
        }

        let mut content = SkinContent::default();
        match active {
            Some(section) => content.set_section(section, code.to_string()),
            None => content.html_template = Some(code.to_string()),
        }
        content
    }
}

/// Sections produced by a generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSections {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_template: Option<String>,
    #[serde(default)]
    pub custom_css: String,
    /// Per-section markup when a single legacy section was edited
    #[serde(flatten)]
    pub sections: BTreeMap<String, String>,
}

/// Non-streaming generation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedTheme {
    pub message: String,
    pub sections: GeneratedSections,
}
