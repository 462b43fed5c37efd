//! External generation provider gateway
//!
//! Uniform interface over heterogeneous backends:
//! - Replicate-hosted models (Imagen 4 Ultra, Nano Banana, Qwen Image
//!   Edit Plus, SeedEdit 3.0, Seedream 4, Veo 3.1, Grounded SAM)
//! - Gemini API (Nano Banana direct)
//! - AWS Bedrock (Nova Canvas, Claude advisor)
//!
//! Dispatch is an enum-keyed strategy table: the gateway maps a
//! `Provider` tag to a backend object, so adding a provider is a table
//! insertion at construction, not a new branch.

pub mod advisor;
pub mod bedrock;
pub mod gemini;
pub mod replicate;

use crate::config::ProvidersConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Supported generation providers. The string form is the tag recorded
/// on asset rows and used in client payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Provider {
    GoogleImagen4,
    GeminiNanoBanana,
    QwenImageEditPlus,
    SeedEdit3,
    Seedream4,
    NovaCanvas,
    GoogleVeo31,
    /// Sentinel for user uploads; never dispatched
    LocalUpload,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GoogleImagen4 => "google-imagen4",
            Provider::GeminiNanoBanana => "gemini-nano-banana",
            Provider::QwenImageEditPlus => "qwen-image-edit-plus",
            Provider::SeedEdit3 => "seededit-3.0",
            Provider::Seedream4 => "seedream-4",
            Provider::NovaCanvas => "amazon-nova-canvas",
            Provider::GoogleVeo31 => "google-veo-3.1",
            Provider::LocalUpload => "local-fs",
        }
    }

    pub fn parse(s: &str) -> Option<Provider> {
        match s {
            "google-imagen4" => Some(Provider::GoogleImagen4),
            "gemini-nano-banana" => Some(Provider::GeminiNanoBanana),
            "qwen-image-edit-plus" => Some(Provider::QwenImageEditPlus),
            "seededit-3.0" => Some(Provider::SeedEdit3),
            "seedream-4" => Some(Provider::Seedream4),
            "amazon-nova-canvas" => Some(Provider::NovaCanvas),
            "google-veo-3.1" => Some(Provider::GoogleVeo31),
            "local-fs" => Some(Provider::LocalUpload),
            _ => None,
        }
    }

    /// All providers the usage aggregator reports on
    pub fn billable() -> &'static [Provider] {
        &[
            Provider::GoogleImagen4,
            Provider::GeminiNanoBanana,
            Provider::QwenImageEditPlus,
            Provider::SeedEdit3,
            Provider::Seedream4,
            Provider::NovaCanvas,
            Provider::GoogleVeo31,
        ]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Provider {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Provider::parse(&s).ok_or_else(|| format!("unknown provider: {}", s))
    }
}

impl From<Provider> for String {
    fn from(p: Provider) -> Self {
        p.as_str().to_string()
    }
}

/// Raw bytes plus mime type returned by a synchronous generation call
#[derive(Debug, Clone)]
pub struct GeneratedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Parameters for a video generation job
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub prompt: String,
    /// Image-to-video anchor frame
    pub first_frame: Option<Vec<u8>>,
    /// Ending anchor frame
    pub last_frame: Option<Vec<u8>>,
    /// Up to 3 reference images for subject consistency
    pub reference_images: Vec<Vec<u8>>,
    pub duration_secs: u32,
    pub resolution: String,
    pub generate_audio: bool,
}

impl Default for VideoRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            first_frame: None,
            last_frame: None,
            reference_images: Vec::new(),
            duration_secs: 8,
            resolution: "1080p".to_string(),
            generate_audio: true,
        }
    }
}

/// Handle for a dispatched asynchronous job
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub external_id: String,
}

/// Remote job status as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    Succeeded,
    Failed,
}

/// One observation of a remote job
#[derive(Debug, Clone)]
pub struct JobPoll {
    pub status: RemoteStatus,
    pub output_url: Option<String>,
    pub error: Option<String>,
}

/// Result of a segmentation request
#[derive(Debug, Clone)]
pub struct SegmentMask {
    /// URL of the raw (non-inverted) mask image
    pub mask_url: String,
    /// Provider-side job id, recorded for audit
    pub external_id: String,
}

/// Synchronous image generation backend
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Generate an image from a text prompt
    async fn generate(&self, prompt: &str) -> Result<GeneratedMedia>;

    /// Edit an existing image following an instruction
    async fn edit(&self, image: &[u8], mime_type: &str, instruction: &str)
        -> Result<GeneratedMedia>;

    /// Edit constrained by an explicit mask image. Only backends with
    /// native inpainting override this.
    async fn edit_with_mask(
        &self,
        _image: &[u8],
        _mime_type: &str,
        _mask_png: &[u8],
        instruction: &str,
    ) -> Result<GeneratedMedia> {
        let _ = instruction;
        Err(AppError::Validation {
            message: "this provider does not support mask-guided editing".to_string(),
            field: Some("mask_asset_id".to_string()),
        })
    }
}

/// Asynchronous video generation backend
#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Dispatch a job, optionally registering a completion webhook
    async fn start(&self, request: &VideoRequest, webhook: Option<&str>) -> Result<VideoJob>;

    /// Observe the current status of a job
    async fn poll(&self, external_id: &str) -> Result<JobPoll>;

    /// Download produced content from the provider
    async fn download(&self, url: &str) -> Result<GeneratedMedia>;
}

/// Segmentation backend (Grounded SAM)
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Generate a segmentation mask for the described region
    async fn segment(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
        negative_prompt: Option<&str>,
    ) -> Result<SegmentMask>;
}

/// Gateway over all configured providers
#[derive(Clone)]
pub struct Gateway {
    images: HashMap<Provider, Arc<dyn ImageBackend>>,
    video: Option<Arc<dyn VideoBackend>>,
    segmenter: Option<Arc<dyn Segmenter>>,
    advisor: Option<Arc<advisor::ClaudeAdvisor>>,
}

impl Gateway {
    /// Build the strategy table from explicit configuration. Providers
    /// without credentials are simply absent from the table; invoking
    /// them surfaces `ProviderAuth` without any external call.
    pub async fn from_config(config: &ProvidersConfig) -> Result<Gateway> {
        let mut images: HashMap<Provider, Arc<dyn ImageBackend>> = HashMap::new();
        let mut video: Option<Arc<dyn VideoBackend>> = None;
        let mut segmenter: Option<Arc<dyn Segmenter>> = None;
        let mut advisor: Option<Arc<advisor::ClaudeAdvisor>> = None;

        if let Some(ref api_key) = config.replicate.api_key {
            let client = Arc::new(replicate::ReplicateClient::new(
                api_key.clone(),
                config.replicate.api_base.clone(),
            )?);

            images.insert(
                Provider::GoogleImagen4,
                Arc::new(replicate::ReplicateImageBackend::new(
                    client.clone(),
                    replicate::ReplicateImageModel::Imagen4Ultra,
                )),
            );
            images.insert(
                Provider::QwenImageEditPlus,
                Arc::new(replicate::ReplicateImageBackend::new(
                    client.clone(),
                    replicate::ReplicateImageModel::QwenImageEditPlus,
                )),
            );
            images.insert(
                Provider::SeedEdit3,
                Arc::new(replicate::ReplicateImageBackend::new(
                    client.clone(),
                    replicate::ReplicateImageModel::SeedEdit3,
                )),
            );
            images.insert(
                Provider::Seedream4,
                Arc::new(replicate::ReplicateImageBackend::new(
                    client.clone(),
                    replicate::ReplicateImageModel::Seedream4,
                )),
            );

            video = Some(Arc::new(replicate::ReplicateVideoBackend::new(client.clone())));
            segmenter = Some(client);
        }

        if let Some(ref api_key) = config.gemini.api_key {
            images.insert(
                Provider::GeminiNanoBanana,
                Arc::new(gemini::GeminiClient::new(
                    api_key.clone(),
                    config.gemini.api_base.clone(),
                )?),
            );
        }

        if config.bedrock.enabled {
            let canvas = bedrock::NovaCanvasBackend::new(&config.bedrock).await;
            images.insert(Provider::NovaCanvas, Arc::new(canvas));
            advisor = Some(Arc::new(advisor::ClaudeAdvisor::new(&config.bedrock).await));
        }

        Ok(Gateway {
            images,
            video,
            segmenter,
            advisor,
        })
    }

    /// Build a gateway directly from backend tables (used by tests)
    pub fn from_parts(
        images: HashMap<Provider, Arc<dyn ImageBackend>>,
        video: Option<Arc<dyn VideoBackend>>,
        segmenter: Option<Arc<dyn Segmenter>>,
    ) -> Gateway {
        Gateway {
            images,
            video,
            segmenter,
            advisor: None,
        }
    }

    /// Provider tags with a registered image backend
    pub fn enabled_image_providers(&self) -> Vec<Provider> {
        let mut providers: Vec<_> = self.images.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }

    /// Whether any video backend is configured
    pub fn video_enabled(&self) -> bool {
        self.video.is_some()
    }

    /// Look up the image backend for a provider
    pub fn image_backend(&self, provider: Provider) -> Result<&Arc<dyn ImageBackend>> {
        self.images.get(&provider).ok_or_else(|| AppError::ProviderAuth {
            provider: provider.to_string(),
            message: "provider is not configured (missing credentials)".to_string(),
        })
    }

    /// Look up the video backend
    pub fn video_backend(&self) -> Result<&Arc<dyn VideoBackend>> {
        self.video.as_ref().ok_or_else(|| AppError::ProviderAuth {
            provider: Provider::GoogleVeo31.to_string(),
            message: "video generation requires a Replicate API key".to_string(),
        })
    }

    /// Best-effort advisor, absent unless Bedrock is enabled
    pub fn advisor(&self) -> Option<&Arc<advisor::ClaudeAdvisor>> {
        self.advisor.as_ref()
    }

    /// Look up the segmentation backend
    pub fn segmenter(&self) -> Result<&Arc<dyn Segmenter>> {
        self.segmenter.as_ref().ok_or_else(|| AppError::ProviderAuth {
            provider: "grounded-sam".to_string(),
            message: "mask generation requires a Replicate API key".to_string(),
        })
    }
}

pub mod testing {
    //! Mock backends for orchestrator and completion tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Image backend returning fixed bytes
    pub struct MockImageBackend {
        pub calls: AtomicUsize,
        /// Mask bytes received by the last `edit_with_mask` call
        pub last_mask: Mutex<Option<Vec<u8>>>,
    }

    impl MockImageBackend {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                last_mask: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ImageBackend for MockImageBackend {
        async fn generate(&self, _prompt: &str) -> Result<GeneratedMedia> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GeneratedMedia {
                bytes: b"mock image bytes".to_vec(),
                mime_type: "image/png".to_string(),
            })
        }

        async fn edit(
            &self,
            _image: &[u8],
            _mime_type: &str,
            _instruction: &str,
        ) -> Result<GeneratedMedia> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GeneratedMedia {
                bytes: b"mock edited bytes".to_vec(),
                mime_type: "image/png".to_string(),
            })
        }

        async fn edit_with_mask(
            &self,
            _image: &[u8],
            _mime_type: &str,
            mask_png: &[u8],
            _instruction: &str,
        ) -> Result<GeneratedMedia> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_mask.lock().unwrap() = Some(mask_png.to_vec());
            Ok(GeneratedMedia {
                bytes: b"mock edited bytes".to_vec(),
                mime_type: "image/png".to_string(),
            })
        }
    }

    /// Video backend replaying a scripted sequence of polls
    pub struct MockVideoBackend {
        pub polls: Mutex<Vec<JobPoll>>,
    }

    impl MockVideoBackend {
        pub fn with_polls(polls: Vec<JobPoll>) -> Self {
            Self {
                polls: Mutex::new(polls),
            }
        }
    }

    #[async_trait]
    impl VideoBackend for MockVideoBackend {
        async fn start(&self, _request: &VideoRequest, _webhook: Option<&str>) -> Result<VideoJob> {
            Ok(VideoJob {
                external_id: "mock-job-1".to_string(),
            })
        }

        async fn poll(&self, _external_id: &str) -> Result<JobPoll> {
            let mut polls = self.polls.lock().unwrap();
            if polls.is_empty() {
                Ok(JobPoll {
                    status: RemoteStatus::Pending,
                    output_url: None,
                    error: None,
                })
            } else {
                Ok(polls.remove(0))
            }
        }

        async fn download(&self, _url: &str) -> Result<GeneratedMedia> {
            Ok(GeneratedMedia {
                bytes: b"mock video bytes".to_vec(),
                mime_type: "video/mp4".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trip() {
        for provider in Provider::billable() {
            assert_eq!(Provider::parse(provider.as_str()), Some(*provider));
        }
        assert_eq!(Provider::parse("local-fs"), Some(Provider::LocalUpload));
        assert_eq!(Provider::parse("nonsense"), None);
    }

    #[test]
    fn test_unconfigured_provider_is_auth_error() {
        let gateway = Gateway::from_parts(HashMap::new(), None, None);
        let err = gateway.image_backend(Provider::GoogleImagen4).err().unwrap();
        assert!(matches!(err, AppError::ProviderAuth { .. }));
        assert!(gateway.video_backend().is_err());
    }
}
