//! Descriptive attribute enrichment
//!
//! A language model with web search is asked to identify the track behind a
//! source reference. [`Enricher`] is the seam; [`GeminiEnricher`] talks to
//! the Gemini `generateContent` REST endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::TrackMetadata;
use crate::services::source::SourceInfo;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Characters of the source description included in the prompt
const DESCRIPTION_PREVIEW_CHARS: usize = 200;

const NOT_AVAILABLE: &str = "N/A";

const SYSTEM_INSTRUCTION: &str = r#"You identify music tracks and reply with JSON only.
Given a source URL and hints scraped from its page, search the web for every
field below. The hints may be wrong or noisy; correct them.

Rules:
- title: the song name only, without "(Official Video)", "Lyric Video" or similar.
- artist: exactly one primary artist in its most common spelling, no featured artists.
- album: the album name only (no "EP" or "Single" suffix); "Unknown Album" when unknown.
- trackNumber / discNumber: integers; discNumber is 1 when unknown.
- bpm: the tempo in beats per minute.
- mood: one word for the emotional tone, e.g. "Energetic" or "Melancholic".
- genre: a standard genre with only the first word capitalized (e.g. "Arabic hip-hop");
  "Podcast" for podcasts.
- language: ISO 639-1 code.

Reply with a single raw JSON object, no markdown and no commentary:
{"title": string, "artist": string, "album": string|null, "trackNumber": integer|null,
 "discNumber": integer|null, "bpm": integer|null, "mood": string|null, "genre": string|null,
 "tags": string[]|null, "language": string|null}"#;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("GEMINI_API_KEY not configured")]
    NotConfigured,

    /// Deadline exceeded; classified as transient
    #[error("Enrichment request timeout after {0}s")]
    Timeout(u64),

    #[error("Enrichment request failed: {0}")]
    Request(String),

    #[error("Enrichment API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Enrichment response contained no text")]
    EmptyResponse,

    /// Output did not match the attribute schema; permanent
    #[error("API did not return valid JSON: {0}")]
    MalformedResponse(String),
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Send `prompt` and return the raw response text
    async fn enrich(&self, prompt: &str, deadline: Duration) -> Result<String, EnrichError>;
}

/// Build the user prompt from the reference and the source hints
pub fn build_prompt(reference: &str, info: &SourceInfo) -> String {
    let or_na = |value: Option<&str>| {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(NOT_AVAILABLE)
            .to_string()
    };

    let description: Option<String> = info
        .description
        .as_deref()
        .map(|d| d.chars().take(DESCRIPTION_PREVIEW_CHARS).collect());
    let tags = if info.tags.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        info.tags.join(", ")
    };
    let release_year = info
        .release_year
        .map(|y| y.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    format!(
        "Source URL: {}\n\
         Hints attached to the source (may be inaccurate):\n\
         Title: {}\n\
         Track: {}\n\
         Channel: {}\n\
         Artist: {}\n\
         Description (first {} characters): {}\n\
         Tags: {}\n\
         Release Year: {}\n",
        reference,
        or_na(Some(info.title.as_str())),
        or_na(info.track.as_deref()),
        or_na(info.uploader.as_deref()),
        or_na(info.artist.as_deref()),
        DESCRIPTION_PREVIEW_CHARS,
        or_na(description.as_deref()),
        tags,
        release_year,
    )
}

/// Attribute object as the model emits it; numbers may arrive as strings
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawAttributes {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    track_number: Option<Value>,
    disc_number: Option<Value>,
    bpm: Option<Value>,
    mood: Option<String>,
    genre: Option<String>,
    tags: Option<Value>,
    language: Option<String>,
}

fn number(value: Option<Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn positive_integer(value: Option<Value>) -> Option<u32> {
    number(value)
        .filter(|n| *n >= 1.0 && n.fract() == 0.0 && *n <= f64::from(u32::MAX))
        .map(|n| n as u32)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn tag_list(value: Option<Value>) -> Option<Vec<String>> {
    let tags: Vec<String> = match value? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => non_blank(Some(s)),
                _ => None,
            })
            .collect(),
        Value::String(s) => s.split(',').filter_map(|t| non_blank(Some(t.to_string()))).collect(),
        _ => return None,
    };
    Some(tags)
}

/// Remove markdown code fences and a leading `json` language tag
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix("```").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();
    trimmed
        .strip_prefix("json")
        .or_else(|| trimmed.strip_prefix("JSON"))
        .unwrap_or(trimmed)
        .trim()
}

/// Parse model output into attributes.
///
/// Output without a usable title and artist is a `MalformedResponse`.
pub fn parse_enrichment_response(text: &str) -> Result<TrackMetadata, EnrichError> {
    let body = strip_code_fences(text);

    let raw: RawAttributes =
        serde_json::from_str(body).map_err(|_| EnrichError::MalformedResponse(body.to_string()))?;

    let (Some(title), Some(artist)) = (non_blank(raw.title), non_blank(raw.artist)) else {
        return Err(EnrichError::MalformedResponse(body.to_string()));
    };

    Ok(TrackMetadata {
        album: non_blank(raw.album),
        track_number: positive_integer(raw.track_number),
        disc_number: positive_integer(raw.disc_number),
        bpm: number(raw.bpm).filter(|b| *b > 0.0),
        mood: non_blank(raw.mood),
        genre: non_blank(raw.genre),
        tags: tag_list(raw.tags),
        language: non_blank(raw.language),
        ..TrackMetadata::new(title, artist)
    })
}

/// Gemini REST client
pub struct GeminiEnricher {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiErrorDetail {
    message: String,
}

impl GeminiEnricher {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Point the client at a different endpoint root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(prompt: &str) -> Value {
        json!({
            "system_instruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "tools": [{ "google_search": {} }],
        })
    }
}

/// Error text including every source in the chain
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn request_error(err: reqwest::Error, deadline: Duration) -> EnrichError {
    if err.is_timeout() {
        EnrichError::Timeout(deadline.as_secs())
    } else if err.is_connect() {
        EnrichError::Request(format!("network error: {}", error_chain(&err)))
    } else {
        EnrichError::Request(error_chain(&err))
    }
}

#[async_trait]
impl Enricher for GeminiEnricher {
    async fn enrich(&self, prompt: &str, deadline: Duration) -> Result<String, EnrichError> {
        let api_key = self.api_key.as_deref().ok_or(EnrichError::NotConfigured)?;
        let url = format!("{}/{}:generateContent", self.base_url, self.model);

        debug!(model = %self.model, "Sending enrichment request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .timeout(deadline)
            .json(&Self::request_body(prompt))
            .send()
            .await
            .map_err(|e| request_error(e, deadline))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(EnrichError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| request_error(e, deadline))?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(EnrichError::EmptyResponse);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::retry::is_transient_network_error;

    #[test]
    fn test_parse_fenced_response() {
        let text = "```json\n{\"title\": \"Problems\", \"artist\": \"Lil Wayne\", \"album\": \"Tha Carter V\", \"trackNumber\": 22, \"bpm\": \"140\", \"tags\": [\"Hip hop\", \"\"], \"language\": \"en\"}\n```";
        let meta = parse_enrichment_response(text).unwrap();

        assert_eq!(meta.title, "Problems");
        assert_eq!(meta.album.as_deref(), Some("Tha Carter V"));
        assert_eq!(meta.track_number, Some(22));
        assert_eq!(meta.bpm, Some(140.0));
        assert_eq!(meta.tags, Some(vec!["Hip hop".to_string()]));
        assert_eq!(meta.disc_number, None);
    }

    #[test]
    fn test_missing_artist_is_malformed() {
        let err = parse_enrichment_response(r#"{"title": "Only title"}"#).unwrap_err();
        assert!(matches!(err, EnrichError::MalformedResponse(_)));
        assert!(!is_transient_network_error(&err.to_string()));
    }

    #[test]
    fn test_prose_is_malformed() {
        let err = parse_enrichment_response("I could not find this song.").unwrap_err();
        assert!(err.to_string().starts_with("API did not return valid JSON"));
    }

    #[test]
    fn test_timeout_is_transient() {
        assert!(is_transient_network_error(&EnrichError::Timeout(30).to_string()));
    }

    #[test]
    fn test_prompt_defaults_missing_hints() {
        let info = SourceInfo {
            title: "Coldplay - Hymn for the Weekend (Official Video)".to_string(),
            description: Some("x".repeat(500)),
            ..Default::default()
        };
        let prompt = build_prompt("https://www.youtube.com/watch?v=1", &info);

        assert!(prompt.contains("Title: Coldplay - Hymn for the Weekend (Official Video)"));
        assert!(prompt.contains("Artist: N/A"));
        assert!(prompt.contains("Tags: N/A"));
        assert!(prompt.contains(&format!("{}\n", "x".repeat(200))));
        assert!(!prompt.contains(&"x".repeat(201)));
    }

    #[tokio::test]
    async fn test_unconfigured_key_fails_fast() {
        let enricher = GeminiEnricher::new(None, "gemini-2.5-flash");
        let err = enricher.enrich("prompt", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, EnrichError::NotConfigured));
    }
}
