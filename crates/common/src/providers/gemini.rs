//! Gemini API client (Nano Banana image model)
//!
//! Talks to `generateContent` directly rather than through Replicate,
//! exchanging images as base64 `inlineData` parts.

use super::{GeneratedMedia, ImageBackend};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const IMAGE_MODEL: &str = "gemini-2.5-flash-image";

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    async fn generate_content(&self, parts: Value) -> Result<GeneratedMedia> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, IMAGE_MODEL
        );

        let body = json!({ "contents": [{ "parts": parts }] });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AppError::ProviderAuth {
                provider: "gemini".to_string(),
                message: "Invalid or missing Gemini API key".to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderGeneration {
                provider: "gemini".to_string(),
                message: format!("API error {}: {}", status, body),
                explanation: None,
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        extract_image(&parsed)
    }
}

/// Pull the first inline image part out of a response. Text-only
/// responses mean the model declined to produce an image; its text is
/// the most useful error we can surface.
fn extract_image(response: &GenerateContentResponse) -> Result<GeneratedMedia> {
    let parts = response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| c.parts.as_slice())
        .unwrap_or_default();

    for part in parts {
        if let Some(ref inline) = part.inline_data {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&inline.data)
                .map_err(|e| AppError::ProviderGeneration {
                    provider: "gemini".to_string(),
                    message: format!("Invalid base64 image data: {}", e),
                    explanation: None,
                })?;

            return Ok(GeneratedMedia {
                bytes,
                mime_type: inline.mime_type.clone(),
            });
        }
    }

    let refusal = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join(" ");

    Err(AppError::ProviderGeneration {
        provider: "gemini".to_string(),
        message: if refusal.is_empty() {
            "No image data in response".to_string()
        } else {
            refusal
        },
        explanation: None,
    })
}

#[async_trait]
impl ImageBackend for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<GeneratedMedia> {
        self.generate_content(json!([{ "text": prompt }])).await
    }

    async fn edit(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<GeneratedMedia> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let parts = json!([
            {
                "inlineData": {
                    "mimeType": mime_type,
                    "data": encoded,
                }
            },
            { "text": instruction },
        ]);
        self.generate_content(parts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_image_decodes_inline_data() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Here is your image" },
                        { "inlineData": { "mimeType": "image/png", "data": "cG5n" } }
                    ]
                }
            }]
        }))
        .unwrap();

        let media = extract_image(&response).unwrap();
        assert_eq!(media.bytes, b"png");
        assert_eq!(media.mime_type, "image/png");
    }

    #[test]
    fn test_text_only_response_surfaces_refusal() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "parts": [{ "text": "I cannot generate that image." }]
                }
            }]
        }))
        .unwrap();

        let err = extract_image(&response).unwrap_err();
        match err {
            AppError::ProviderGeneration { message, .. } => {
                assert!(message.contains("cannot generate"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
