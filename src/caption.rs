use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use url::Url;

use crate::config::Settings;
use crate::models::{
    CaptionRequest, CaptionResponse, ChatMessage, ChatRequest, ChatResponse, FailureKind,
    ItemOutcome,
};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = concat!("easy-caption/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SIDECAR_EXTENSION: &str = "txt";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Caption,
    Chat,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Endpoint::Caption => "caption",
            Endpoint::Chat => "chat",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("File not found")]
    NotFound,
    #[error("Caption file would overwrite the image itself")]
    SidecarIsImage,
    #[error("Failed to read image: {0}")]
    Read(#[source] std::io::Error),
    #[error("{endpoint} API returned {status}")]
    Status {
        endpoint: Endpoint,
        status: reqwest::StatusCode,
    },
    #[error("{endpoint} API request failed: {detail}")]
    Request { endpoint: Endpoint, detail: String },
    #[error("{endpoint} API response could not be decoded: {source}")]
    Decode {
        endpoint: Endpoint,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to get caption from the API.")]
    EmptyCaption,
    #[error("Failed to get modified caption from the API.")]
    NoChoices,
    #[error("chat API returned a choice without message content")]
    EmptyRecaption,
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaptionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CaptionError::NotFound | CaptionError::SidecarIsImage => FailureKind::Input,
            CaptionError::Status { .. } | CaptionError::Request { .. } => FailureKind::Transport,
            CaptionError::Decode { .. }
            | CaptionError::EmptyCaption
            | CaptionError::NoChoices
            | CaptionError::EmptyRecaption => FailureKind::Decode,
            CaptionError::Read(_) | CaptionError::Write { .. } => FailureKind::Unexpected,
        }
    }
}

// ── Run-level options ────────────────────────────────────────────────────────

/// Strings collected once per run and applied to every image.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    trigger_word: Option<String>,
    general_theme: Option<String>,
}

impl RunOptions {
    pub fn new(trigger_word: &str, general_theme: &str) -> Self {
        Self {
            trigger_word: non_blank(trigger_word).map(str::to_string),
            general_theme: non_blank(general_theme).map(str::to_string),
        }
    }

    pub fn trigger_word(&self) -> Option<&str> {
        self.trigger_word.as_deref()
    }

    pub fn general_theme(&self) -> Option<&str> {
        self.general_theme.as_deref()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchMode {
    /// Report failures and move on to the next image.
    #[default]
    Continue,
    /// Stop the batch at the first failed image.
    StopOnError,
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub struct Captioner {
    client: reqwest::Client,
    settings: Settings,
}

impl Captioner {
    pub fn new(settings: Settings) -> Result<Self, reqwest::Error> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(settings.request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, settings })
    }

    /// Captions every image in order, calling `report` as each one finishes.
    pub async fn run_batch<F>(
        &self,
        images: &[PathBuf],
        run: &RunOptions,
        mode: BatchMode,
        mut report: F,
    ) -> Vec<ItemOutcome>
    where
        F: FnMut(&ItemOutcome),
    {
        tracing::info!(
            images = images.len(),
            skip_recaption = self.settings.skip_recaption(),
            "captioning batch"
        );

        let mut outcomes = Vec::with_capacity(images.len());
        for image in images {
            let outcome = match self.caption_image(image, run).await {
                Ok(sidecar) => ItemOutcome::saved(image, sidecar),
                Err(e) => {
                    tracing::debug!(image = %image.display(), error = ?e, "captioning failed");
                    ItemOutcome::failed(image, e.kind(), e.to_string())
                }
            };
            report(&outcome);

            let stop = mode == BatchMode::StopOnError && outcome.is_failure();
            outcomes.push(outcome);
            if stop {
                tracing::warn!("stopping batch after first failure");
                break;
            }
        }
        outcomes
    }

    /// Captions one image and returns the path of the caption file written.
    pub async fn caption_image(
        &self,
        image: &Path,
        run: &RunOptions,
    ) -> Result<PathBuf, CaptionError> {
        if !is_file(image).await {
            return Err(CaptionError::NotFound);
        }
        let sidecar = sidecar_path(image)?;

        let encoded = encode_image(image).await?;
        let mut caption = self.request_caption(&encoded).await?;
        tracing::debug!(image = %image.display(), %caption, "received caption");

        if let Some(recaption) = &self.settings.recaption {
            let prompt = effective_system_prompt(&recaption.system_prompt, run.general_theme());
            caption = self
                .request_recaption(&recaption.chat_api_url, &prompt, &caption)
                .await?;
            tracing::debug!(image = %image.display(), %caption, "received rewritten caption");
        }

        let caption = apply_trigger_word(&caption, run.trigger_word());
        tokio::fs::write(&sidecar, caption.as_bytes())
            .await
            .map_err(|source| CaptionError::Write {
                path: sidecar.clone(),
                source,
            })?;
        Ok(sidecar)
    }

    async fn request_caption(&self, image_base64: &str) -> Result<String, CaptionError> {
        let body = self
            .post_json(
                Endpoint::Caption,
                &self.settings.caption_api_url,
                &CaptionRequest {
                    image: image_base64,
                },
            )
            .await?;
        let result: CaptionResponse =
            serde_json::from_str(&body).map_err(|source| CaptionError::Decode {
                endpoint: Endpoint::Caption,
                source,
            })?;

        match result.caption {
            Some(caption) if !caption.trim().is_empty() => Ok(caption),
            _ => Err(CaptionError::EmptyCaption),
        }
    }

    async fn request_recaption(
        &self,
        chat_api_url: &Url,
        system_prompt: &str,
        caption: &str,
    ) -> Result<String, CaptionError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: caption,
                },
            ],
        };
        let body = self.post_json(Endpoint::Chat, chat_api_url, &request).await?;
        let result: ChatResponse =
            serde_json::from_str(&body).map_err(|source| CaptionError::Decode {
                endpoint: Endpoint::Chat,
                source,
            })?;

        if let Some(usage) = &result.usage {
            tracing::debug!(
                model = result.model.as_deref().unwrap_or("unknown"),
                prompt_tokens = ?usage.prompt_tokens,
                completion_tokens = ?usage.completion_tokens,
                total_tokens = ?usage.total_tokens,
                "chat completion usage"
            );
        }

        let choice = result
            .choices
            .and_then(|choices| choices.into_iter().next())
            .ok_or(CaptionError::NoChoices)?;
        choice.message.content.ok_or(CaptionError::EmptyRecaption)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint,
        url: &Url,
        body: &T,
    ) -> Result<String, CaptionError> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaptionError::Status { endpoint, status });
        }

        response.text().await.map_err(|e| request_error(endpoint, e))
    }
}

fn request_error(endpoint: Endpoint, e: reqwest::Error) -> CaptionError {
    let detail = if e.is_timeout() {
        format!("TimeoutError: {}", e)
    } else if e.is_connect() {
        format!("ConnectError: {}", e)
    } else {
        format!("RequestError: {}", e)
    };
    CaptionError::Request { endpoint, detail }
}

// ── File helpers ─────────────────────────────────────────────────────────────

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

async fn encode_image(path: &Path) -> Result<String, CaptionError> {
    let bytes = tokio::fs::read(path).await.map_err(CaptionError::Read)?;
    Ok(STANDARD.encode(bytes))
}

/// `photo.png` → `photo.txt`, in the same directory.
///
/// A `.txt` input is rejected rather than overwritten. A dotfile with no
/// extension keeps its name, so `dir/.hidden` maps to `dir/.hidden.txt`.
pub fn sidecar_path(image: &Path) -> Result<PathBuf, CaptionError> {
    let is_text = image
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SIDECAR_EXTENSION));
    if is_text {
        return Err(CaptionError::SidecarIsImage);
    }
    Ok(image.with_extension(SIDECAR_EXTENSION))
}

// ── Caption text ─────────────────────────────────────────────────────────────

pub fn effective_system_prompt<'a>(prompt: &'a str, general_theme: Option<&str>) -> Cow<'a, str> {
    match general_theme.and_then(non_blank) {
        Some(theme) => Cow::Owned(format!(
            "{prompt} Please update the caption accordingly bearing in mind that the general theme of the image is {theme}."
        )),
        None => Cow::Borrowed(prompt),
    }
}

pub fn apply_trigger_word(caption: &str, trigger_word: Option<&str>) -> String {
    match trigger_word.and_then(non_blank) {
        Some(trigger) => format!("{trigger}, {caption}"),
        None => caption.to_string(),
    }
}

fn non_blank(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
