//! Replicate REST client
//!
//! Drives all Replicate-hosted models over `api.replicate.com/v1`:
//! synchronous image models, Veo 3.1 video predictions (webhook or
//! poll), and Grounded SAM segmentation. Output shapes vary per model,
//! so URL extraction is best-effort over the documented variants.

use super::{
    GeneratedMedia, ImageBackend, JobPoll, RemoteStatus, SegmentMask, Segmenter, VideoBackend,
    VideoJob, VideoRequest,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

/// Pinned Grounded SAM version
const GROUNDED_SAM_VERSION: &str =
    "ee871c19efb1941f55f66a3d7d960428c8a5afcb77449547fe8e5a3ab9ebc21c";

/// Budget for synchronous image model runs
const IMAGE_RUN_BUDGET: Duration = Duration::from_secs(120);
const IMAGE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Budget for segmentation, sized for Replicate queue delays
const SEGMENT_BUDGET_SECS: u64 = 180;
const SEGMENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Prediction envelope as returned by the predictions API
#[derive(Debug, Deserialize)]
pub struct PredictionEnvelope {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl PredictionEnvelope {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "Unknown error".to_string(),
        }
    }
}

/// Low-level Replicate API client, shared across backends
pub struct ReplicateClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ReplicateClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
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

    async fn post_prediction(&self, url: &str, body: Value, wait: bool) -> Result<PredictionEnvelope> {
        let mut request = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body);

        if wait {
            request = request.header("Prefer", "wait");
        }

        let response = request.send().await?;
        self.parse_envelope(response).await
    }

    /// Create a prediction against an official model endpoint
    pub async fn create_model_prediction(
        &self,
        model: &str,
        input: Value,
        webhook: Option<&str>,
        wait: bool,
    ) -> Result<PredictionEnvelope> {
        let mut body = json!({ "input": input });

        if let Some(webhook_url) = webhook {
            body["webhook"] = json!(webhook_url);
            body["webhook_events_filter"] = json!(["completed"]);
        }

        let url = format!("{}/models/{}/predictions", self.base_url, model);
        self.post_prediction(&url, body, wait).await
    }

    /// Create a prediction against a pinned version (community models)
    pub async fn create_version_prediction(
        &self,
        version: &str,
        input: Value,
    ) -> Result<PredictionEnvelope> {
        let body = json!({ "version": version, "input": input });
        let url = format!("{}/predictions", self.base_url);
        self.post_prediction(&url, body, false).await
    }

    /// Fetch the current state of a prediction
    pub async fn get_prediction(&self, id: &str) -> Result<PredictionEnvelope> {
        let url = format!("{}/predictions/{}", self.base_url, id);
        let response = self.http.get(&url).bearer_auth(&self.api_key).send().await?;
        self.parse_envelope(response).await
    }

    async fn parse_envelope(&self, response: reqwest::Response) -> Result<PredictionEnvelope> {
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AppError::ProviderAuth {
                provider: "replicate".to_string(),
                message: "Invalid or missing Replicate API key".to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderGeneration {
                provider: "replicate".to_string(),
                message: format!("API error {}: {}", status, body),
                explanation: None,
            });
        }

        response.json().await.map_err(Into::into)
    }

    /// Run a model to completion, polling past the server-side wait
    /// window when needed. No retries: a failed run surfaces as-is.
    pub async fn run(&self, model: &str, input: Value) -> Result<Value> {
        let mut envelope = self
            .create_model_prediction(model, input, None, true)
            .await?;

        let deadline = tokio::time::Instant::now() + IMAGE_RUN_BUDGET;

        while !envelope.is_terminal() {
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::ProviderTimeout {
                    provider: model.to_string(),
                    budget_secs: IMAGE_RUN_BUDGET.as_secs(),
                });
            }
            tokio::time::sleep(IMAGE_POLL_INTERVAL).await;
            envelope = self.get_prediction(&envelope.id).await?;
        }

        if envelope.status != "succeeded" {
            return Err(AppError::ProviderGeneration {
                provider: model.to_string(),
                message: envelope.error_message(),
                explanation: None,
            });
        }

        envelope.output.ok_or_else(|| AppError::ProviderGeneration {
            provider: model.to_string(),
            message: "Prediction succeeded with no output".to_string(),
            explanation: None,
        })
    }

    /// Download content produced by a prediction
    pub async fn fetch(&self, url: &str) -> Result<GeneratedMedia> {
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::ProviderGeneration {
                provider: "replicate".to_string(),
                message: format!("Failed to download content: {}", response.status()),
                explanation: None,
            });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = response.bytes().await?.to_vec();

        Ok(GeneratedMedia { bytes, mime_type })
    }
}

/// Best-effort extraction of a downloadable URL from Replicate outputs.
/// Models return strings, arrays, or objects with `url`/`path` fields.
pub fn extract_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(extract_output_url),
        Value::Object(map) => {
            if let Some(Value::String(url)) = map.get("url") {
                return Some(url.clone());
            }
            if let Some(Value::String(path)) = map.get("path") {
                if path.starts_with("http") {
                    return Some(path.clone());
                }
                let sep = if path.starts_with('/') { "" } else { "/" };
                return Some(format!("https://replicate.delivery{}{}", sep, path));
            }
            None
        }
        _ => None,
    }
}

/// Pick the pure mask from Grounded SAM output, which interleaves
/// annotated previews with the actual mask.
pub fn select_mask_url(output: &Value) -> Option<String> {
    match output {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let urls: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
            urls.iter()
                .find(|u| u.contains("mask") && !u.contains("annotated"))
                .or(urls.last())
                .map(|u| u.to_string())
        }
        _ => None,
    }
}

fn data_uri(bytes: &[u8], mime_type: &str) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Replicate-hosted image models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicateImageModel {
    Imagen4Ultra,
    QwenImageEditPlus,
    SeedEdit3,
    Seedream4,
}

impl ReplicateImageModel {
    pub fn slug(&self) -> &'static str {
        match self {
            ReplicateImageModel::Imagen4Ultra => "google/imagen-4-ultra",
            ReplicateImageModel::QwenImageEditPlus => "qwen/qwen-image-edit-plus",
            ReplicateImageModel::SeedEdit3 => "bytedance/seededit-3.0",
            ReplicateImageModel::Seedream4 => "bytedance/seedream-4",
        }
    }

    /// Input payload for text-to-image, when the model supports it
    fn generate_input(&self, prompt: &str) -> Option<Value> {
        match self {
            ReplicateImageModel::Imagen4Ultra => Some(json!({
                "prompt": prompt,
                "aspect_ratio": "1:1",
                "output_format": "png",
            })),
            ReplicateImageModel::Seedream4 => Some(json!({ "prompt": prompt })),
            ReplicateImageModel::QwenImageEditPlus | ReplicateImageModel::SeedEdit3 => None,
        }
    }

    /// Input payload for instruction edits, when the model supports it
    fn edit_input(&self, image_uri: &str, instruction: &str) -> Option<Value> {
        match self {
            ReplicateImageModel::QwenImageEditPlus | ReplicateImageModel::SeedEdit3 => {
                Some(json!({ "image": image_uri, "prompt": instruction }))
            }
            ReplicateImageModel::Seedream4 => Some(json!({
                "image_input": [image_uri],
                "prompt": instruction,
            })),
            ReplicateImageModel::Imagen4Ultra => None,
        }
    }
}

/// Image backend over one Replicate model
pub struct ReplicateImageBackend {
    client: Arc<ReplicateClient>,
    model: ReplicateImageModel,
}

impl ReplicateImageBackend {
    pub fn new(client: Arc<ReplicateClient>, model: ReplicateImageModel) -> Self {
        Self { client, model }
    }

    async fn run_and_fetch(&self, input: Value) -> Result<GeneratedMedia> {
        let output = self.client.run(self.model.slug(), input).await?;

        let url = extract_output_url(&output).ok_or_else(|| AppError::ProviderGeneration {
            provider: self.model.slug().to_string(),
            message: "Unable to resolve image URL from model output".to_string(),
            explanation: None,
        })?;

        self.client.fetch(&url).await
    }
}

#[async_trait]
impl ImageBackend for ReplicateImageBackend {
    async fn generate(&self, prompt: &str) -> Result<GeneratedMedia> {
        let input = self.model.generate_input(prompt).ok_or_else(|| {
            AppError::Validation {
                message: format!("{} does not support text-to-image", self.model.slug()),
                field: Some("provider".to_string()),
            }
        })?;

        self.run_and_fetch(input).await
    }

    async fn edit(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<GeneratedMedia> {
        let uri = data_uri(image, mime_type);
        let input = self.model.edit_input(&uri, instruction).ok_or_else(|| {
            AppError::Validation {
                message: format!("{} does not support image editing", self.model.slug()),
                field: Some("provider".to_string()),
            }
        })?;

        self.run_and_fetch(input).await
    }
}

/// Veo 3.1 video backend
pub struct ReplicateVideoBackend {
    client: Arc<ReplicateClient>,
}

impl ReplicateVideoBackend {
    pub const MODEL: &'static str = "google/veo-3.1";

    pub fn new(client: Arc<ReplicateClient>) -> Self {
        Self { client }
    }

    fn build_input(request: &VideoRequest) -> Value {
        let mut input = json!({
            "prompt": request.prompt,
            "duration": request.duration_secs,
            "resolution": request.resolution,
            "generate_audio": request.generate_audio,
        });

        if let Some(ref frame) = request.first_frame {
            input["image"] = json!(data_uri(frame, "image/png"));
        }

        if let Some(ref frame) = request.last_frame {
            input["last_frame"] = json!(data_uri(frame, "image/png"));
        }

        if !request.reference_images.is_empty() {
            // Reference images require a fixed 16:9 aspect ratio
            input["aspect_ratio"] = json!("16:9");
            let uris: Vec<String> = request
                .reference_images
                .iter()
                .take(3)
                .map(|bytes| data_uri(bytes, "image/png"))
                .collect();
            input["reference_images"] = json!(uris);
        }

        input
    }
}

#[async_trait]
impl VideoBackend for ReplicateVideoBackend {
    async fn start(&self, request: &VideoRequest, webhook: Option<&str>) -> Result<VideoJob> {
        let input = Self::build_input(request);

        let envelope = self
            .client
            .create_model_prediction(Self::MODEL, input, webhook, false)
            .await?;

        tracing::info!(
            external_id = %envelope.id,
            webhook = webhook.is_some(),
            "Video generation started"
        );

        Ok(VideoJob {
            external_id: envelope.id,
        })
    }

    async fn poll(&self, external_id: &str) -> Result<JobPoll> {
        let envelope = self.client.get_prediction(external_id).await?;

        let status = match envelope.status.as_str() {
            "succeeded" => RemoteStatus::Succeeded,
            "failed" | "canceled" => RemoteStatus::Failed,
            _ => RemoteStatus::Pending,
        };

        let output_url = envelope.output.as_ref().and_then(extract_output_url);
        let error = match status {
            RemoteStatus::Failed => Some(envelope.error_message()),
            _ => None,
        };

        Ok(JobPoll {
            status,
            output_url,
            error,
        })
    }

    async fn download(&self, url: &str) -> Result<GeneratedMedia> {
        let mut media = self.client.fetch(url).await?;
        if media.mime_type == "application/octet-stream" {
            media.mime_type = "video/mp4".to_string();
        }
        Ok(media)
    }
}

#[async_trait]
impl Segmenter for ReplicateClient {
    async fn segment(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
        negative_prompt: Option<&str>,
    ) -> Result<SegmentMask> {
        let input = json!({
            "image": data_uri(image, mime_type),
            "mask_prompt": prompt,
            "negative_mask_prompt": negative_prompt.unwrap_or(""),
            "adjustment_factor": 0,
        });

        let mut envelope = self
            .create_version_prediction(GROUNDED_SAM_VERSION, input)
            .await?;

        let mut elapsed = 0u64;
        while !envelope.is_terminal() {
            if elapsed >= SEGMENT_BUDGET_SECS {
                return Err(AppError::ProviderTimeout {
                    provider: "grounded-sam".to_string(),
                    budget_secs: SEGMENT_BUDGET_SECS,
                });
            }
            tokio::time::sleep(SEGMENT_POLL_INTERVAL).await;
            elapsed += SEGMENT_POLL_INTERVAL.as_secs();
            envelope = self.get_prediction(&envelope.id).await?;
        }

        if envelope.status != "succeeded" {
            let raw = envelope.error_message();
            // Grounded SAM reports an empty-tensor reshape when nothing matched
            let message = if raw.contains("cannot reshape tensor of 0 elements") {
                format!(
                    "No objects matching \"{}\" were found in the image. \
                     Try a different prompt or check if the object is clearly visible.",
                    prompt
                )
            } else {
                format!("Mask generation failed: {}", raw)
            };
            return Err(AppError::ProviderGeneration {
                provider: "grounded-sam".to_string(),
                message,
                explanation: None,
            });
        }

        let output = envelope.output.as_ref().ok_or_else(|| {
            AppError::ProviderGeneration {
                provider: "grounded-sam".to_string(),
                message: "No output from segmentation prediction".to_string(),
                explanation: None,
            }
        })?;

        let mask_url = select_mask_url(output).ok_or_else(|| AppError::ProviderGeneration {
            provider: "grounded-sam".to_string(),
            message: "Invalid output format from segmentation prediction".to_string(),
            explanation: None,
        })?;

        Ok(SegmentMask {
            mask_url,
            external_id: envelope.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_output_url_variants() {
        assert_eq!(
            extract_output_url(&json!("https://replicate.delivery/a.png")),
            Some("https://replicate.delivery/a.png".to_string())
        );
        assert_eq!(
            extract_output_url(&json!(["https://replicate.delivery/a.png", "b"])),
            Some("https://replicate.delivery/a.png".to_string())
        );
        assert_eq!(
            extract_output_url(&json!({"url": "https://replicate.delivery/a.png"})),
            Some("https://replicate.delivery/a.png".to_string())
        );
        assert_eq!(
            extract_output_url(&json!({"path": "xyz/a.png"})),
            Some("https://replicate.delivery/xyz/a.png".to_string())
        );
        assert_eq!(extract_output_url(&json!(42)), None);
    }

    #[test]
    fn test_select_mask_prefers_pure_mask() {
        let output = json!([
            "https://replicate.delivery/x/annotated_mask.png",
            "https://replicate.delivery/x/mask.png",
        ]);
        assert_eq!(
            select_mask_url(&output),
            Some("https://replicate.delivery/x/mask.png".to_string())
        );

        // Falls back to the last output when no pure mask is present
        let output = json!([
            "https://replicate.delivery/x/first.png",
            "https://replicate.delivery/x/second.png",
        ]);
        assert_eq!(
            select_mask_url(&output),
            Some("https://replicate.delivery/x/second.png".to_string())
        );
    }

    #[test]
    fn test_video_input_reference_images_force_aspect_ratio() {
        let request = VideoRequest {
            prompt: "a red bicycle rolling downhill".to_string(),
            reference_images: vec![vec![1, 2, 3]],
            ..Default::default()
        };
        let input = ReplicateVideoBackend::build_input(&request);
        assert_eq!(input["aspect_ratio"], "16:9");
        assert_eq!(input["duration"], 8);
        assert_eq!(input["generate_audio"], true);
    }

    #[test]
    fn test_imagen4_rejects_edit() {
        assert!(ReplicateImageModel::Imagen4Ultra
            .edit_input("data:image/png;base64,AA==", "add a hat")
            .is_none());
        assert!(ReplicateImageModel::QwenImageEditPlus
            .generate_input("a cat")
            .is_none());
    }
}
