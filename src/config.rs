use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

// ── Constants ────────────────────────────────────────────────────────────────

pub const SETTINGS_FILE_NAME: &str = "appsettings.json";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 100;

const KEY_CAPTION_API_URL: &str = "ApiEndpoints:CaptionApiUrl";
const KEY_CHAT_API_URL: &str = "ApiEndpoints:ChatApiUrl";
const KEY_SYSTEM_PROMPT: &str = "Prompts:SystemPrompt";
const KEY_SKIP_RECAPTION: &str = "AppSettings:SkipRecaption";
const KEY_REQUEST_TIMEOUT: &str = "AppSettings:RequestTimeoutSecs";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing setting {0}")]
    Missing(&'static str),
    #[error("setting {key} is not a valid absolute http(s) URL: {value}")]
    InvalidUrl { key: &'static str, value: String },
    #[error("setting {key} must be \"true\" or \"false\", got {value}")]
    InvalidBool { key: &'static str, value: String },
    #[error("setting {key} must be a positive whole number of seconds, got {value}")]
    InvalidNumber { key: &'static str, value: String },
}

// ── Settings file shape ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSettings {
    #[serde(default)]
    api_endpoints: RawApiEndpoints,
    #[serde(default)]
    prompts: RawPrompts,
    #[serde(default)]
    app_settings: RawAppSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawApiEndpoints {
    caption_api_url: Option<String>,
    chat_api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPrompts {
    system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawAppSettings {
    skip_recaption: Option<Value>,
    request_timeout_secs: Option<Value>,
}

// ── Validated settings ───────────────────────────────────────────────────────

/// Chat endpoint and prompt used to rewrite captions.
#[derive(Debug, Clone)]
pub struct RecaptionSettings {
    pub chat_api_url: Url,
    pub system_prompt: String,
}

/// Immutable runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub caption_api_url: Url,
    /// `None` when recaptioning is switched off.
    pub recaption: Option<RecaptionSettings>,
    pub request_timeout: Duration,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: RawSettings = serde_json::from_str(text)?;

        let caption_api_url = parse_url(
            KEY_CAPTION_API_URL,
            raw.api_endpoints
                .caption_api_url
                .as_deref()
                .ok_or(ConfigError::Missing(KEY_CAPTION_API_URL))?,
        )?;

        let skip_recaption = parse_bool(
            KEY_SKIP_RECAPTION,
            raw.app_settings
                .skip_recaption
                .as_ref()
                .ok_or(ConfigError::Missing(KEY_SKIP_RECAPTION))?,
        )?;

        // A configured chat URL is validated even when it goes unused.
        let chat_api_url = raw
            .api_endpoints
            .chat_api_url
            .as_deref()
            .map(|value| parse_url(KEY_CHAT_API_URL, value))
            .transpose()?;

        let recaption = if skip_recaption {
            None
        } else {
            Some(RecaptionSettings {
                chat_api_url: chat_api_url.ok_or(ConfigError::Missing(KEY_CHAT_API_URL))?,
                system_prompt: raw
                    .prompts
                    .system_prompt
                    .ok_or(ConfigError::Missing(KEY_SYSTEM_PROMPT))?,
            })
        };

        let request_timeout = match raw.app_settings.request_timeout_secs.as_ref() {
            Some(value) => parse_timeout(KEY_REQUEST_TIMEOUT, value)?,
            None => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        Ok(Self {
            caption_api_url,
            recaption,
            request_timeout,
        })
    }

    pub fn skip_recaption(&self) -> bool {
        self.recaption.is_none()
    }
}

/// `appsettings.json` beside the executable, else in the working directory.
pub fn default_settings_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(SETTINGS_FILE_NAME)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE_NAME))
}

// ── Value parsing ────────────────────────────────────────────────────────────

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::InvalidUrl {
        key,
        value: value.to_string(),
    };
    let url = Url::parse(value.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    Ok(url)
}

fn parse_bool(key: &'static str, value: &Value) -> Result<bool, ConfigError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::String(text) if text.trim().eq_ignore_ascii_case("true") => Ok(true),
        Value::String(text) if text.trim().eq_ignore_ascii_case("false") => Ok(false),
        other => Err(ConfigError::InvalidBool {
            key,
            value: other.to_string(),
        }),
    }
}

fn parse_timeout(key: &'static str, value: &Value) -> Result<Duration, ConfigError> {
    let secs = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    match secs {
        Some(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "ApiEndpoints": {
            "CaptionApiUrl": "http://localhost:5000/caption",
            "ChatApiUrl": "http://localhost:5001/v1/chat/completions"
        },
        "Prompts": { "SystemPrompt": "Rewrite the caption." },
        "AppSettings": { "SkipRecaption": "false" }
    }"#;

    #[test]
    fn loads_full_settings() {
        let settings = Settings::from_json(FULL).unwrap();
        assert_eq!(
            settings.caption_api_url.as_str(),
            "http://localhost:5000/caption"
        );
        let recaption = settings.recaption.as_ref().unwrap();
        assert_eq!(
            recaption.chat_api_url.as_str(),
            "http://localhost:5001/v1/chat/completions"
        );
        assert_eq!(recaption.system_prompt, "Rewrite the caption.");
        assert!(!settings.skip_recaption());
        assert_eq!(settings.request_timeout, Duration::from_secs(100));
    }

    #[test]
    fn skip_recaption_accepts_text_and_json_booleans() {
        for value in [r#""True""#, r#"" true ""#, "true"] {
            let json = format!(
                r#"{{"ApiEndpoints": {{"CaptionApiUrl": "https://example.com/c"}},
                    "AppSettings": {{"SkipRecaption": {value}}}}}"#
            );
            let settings = Settings::from_json(&json).unwrap();
            assert!(settings.skip_recaption(), "value {value}");
        }

        let settings = Settings::from_json(&FULL.replace(r#""false""#, "false")).unwrap();
        assert!(!settings.skip_recaption());
    }

    #[test]
    fn skip_recaption_is_parsed_strictly() {
        for value in [r#""yes""#, r#""1""#, "1", r#""""#] {
            let json = FULL.replace(r#""false""#, value);
            let err = Settings::from_json(&json).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidBool { key, .. } if key == KEY_SKIP_RECAPTION),
                "value {value}: {err}"
            );
        }
    }

    #[test]
    fn skip_recaption_is_required() {
        let json = r#"{"ApiEndpoints": {"CaptionApiUrl": "https://example.com/c"}}"#;
        let err = Settings::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(KEY_SKIP_RECAPTION)));
    }

    #[test]
    fn chat_settings_only_required_when_recaptioning() {
        let json = r#"{
            "ApiEndpoints": { "CaptionApiUrl": "https://example.com/c" },
            "AppSettings": { "SkipRecaption": "false" }
        }"#;
        let err = Settings::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(KEY_CHAT_API_URL)));

        let json = r#"{
            "ApiEndpoints": { "CaptionApiUrl": "https://example.com/c", "ChatApiUrl": "https://example.com/chat" },
            "AppSettings": { "SkipRecaption": "false" }
        }"#;
        let err = Settings::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(KEY_SYSTEM_PROMPT)));

        let json = r#"{
            "ApiEndpoints": { "CaptionApiUrl": "https://example.com/c" },
            "AppSettings": { "SkipRecaption": "true" }
        }"#;
        let settings = Settings::from_json(json).unwrap();
        assert!(settings.recaption.is_none());
    }

    #[test]
    fn rejects_relative_and_non_http_urls() {
        for url in ["/caption", "localhost:5000", "ftp://example.com/caption"] {
            let json = FULL.replace("http://localhost:5000/caption", url);
            let err = Settings::from_json(&json).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidUrl { key, .. } if key == KEY_CAPTION_API_URL),
                "url {url}: {err}"
            );
        }
    }

    #[test]
    fn unused_chat_url_is_still_validated() {
        let json = r#"{
            "ApiEndpoints": { "CaptionApiUrl": "https://example.com/c", "ChatApiUrl": "not a url" },
            "AppSettings": { "SkipRecaption": true }
        }"#;
        let err = Settings::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { key, .. } if key == KEY_CHAT_API_URL));
    }

    #[test]
    fn request_timeout_override() {
        let json = FULL.replace(
            r#""SkipRecaption": "false""#,
            r#""SkipRecaption": "false", "RequestTimeoutSecs": "30""#,
        );
        let settings = Settings::from_json(&json).unwrap();
        assert_eq!(settings.request_timeout, Duration::from_secs(30));

        let json = FULL.replace(
            r#""SkipRecaption": "false""#,
            r#""SkipRecaption": "false", "RequestTimeoutSecs": 0"#,
        );
        assert!(matches!(
            Settings::from_json(&json).unwrap_err(),
            ConfigError::InvalidNumber { .. }
        ));
    }

    #[test]
    fn load_reads_file_and_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, FULL).unwrap();
        assert!(Settings::load(&path).is_ok());

        let err = Settings::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            Settings::from_json("{ not json").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }
}
