use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ── Caption API ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CaptionRequest<'a> {
    pub image: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CaptionResponse {
    #[serde(default)]
    pub caption: Option<String>,
}

// ── Chat API ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Option<Vec<ChatChoice>>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

// ── Per-item outcome ─────────────────────────────────────────────────────────

/// Broad class of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Input,
    Transport,
    Decode,
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Saved { sidecar: PathBuf },
    Failed { kind: FailureKind },
}

/// What happened to a single image. The CLI decides how to render it.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub image: PathBuf,
    pub status: ItemStatus,
    pub message: String,
}

impl ItemOutcome {
    pub fn saved(image: &Path, sidecar: PathBuf) -> Self {
        let message = format!("Caption saved to {}", sidecar.display());
        Self {
            image: image.to_path_buf(),
            status: ItemStatus::Saved { sidecar },
            message,
        }
    }

    pub fn failed(image: &Path, kind: FailureKind, message: String) -> Self {
        Self {
            image: image.to_path_buf(),
            status: ItemStatus::Failed { kind },
            message,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, ItemStatus::Failed { .. })
    }
}
