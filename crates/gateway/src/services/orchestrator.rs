//! Generation orchestrator
//!
//! Owns the synchronous generation flows: dispatch to a provider
//! backend, persist the produced bytes, record the asset row, append
//! the audit action. Ordering is fixed: provider first, then file,
//! then rows. A provider failure therefore leaves no partial state,
//! and a database failure at worst strands a file, never a row
//! pointing at nothing.

use crate::AppState;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use visualneurons_common::{
    db::models::{ActionKind, AssetKind, MediaAsset, Prediction},
    db::NewAsset,
    errors::{AppError, Result},
    masking, metrics, pricing,
    providers::{GeneratedMedia, Provider, RemoteStatus, VideoRequest},
    storage, Gateway, MediaStore, Repository, UPLOAD_PROVIDER,
};

/// Outcome of a video generation request, shaped by completion mode
pub enum VideoOutcome {
    /// Webhook mode: a processing prediction the client can poll
    Accepted(Prediction),
    /// Polling mode: the finished asset
    Completed(MediaAsset),
}

pub struct Orchestrator {
    repo: Repository,
    store: MediaStore,
    gateway: Arc<Gateway>,
    http: reqwest::Client,
}

impl Orchestrator {
    pub fn new(repo: Repository, store: MediaStore, gateway: Arc<Gateway>) -> Self {
        Self {
            repo,
            store,
            gateway,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            Repository::new(state.db.clone()),
            state.store.clone(),
            state.gateway.clone(),
        )
    }

    /// Generate an image from a text prompt
    pub async fn generate_image(
        &self,
        owner: Uuid,
        provider: Provider,
        prompt: &str,
    ) -> Result<MediaAsset> {
        let backend = self.gateway.image_backend(provider)?;

        let timer = metrics::GenerationTimer::start(provider.as_str());
        let media = match backend.generate(prompt).await {
            Ok(media) => media,
            Err(e) => {
                timer.finish("error");
                return Err(self.enrich(e).await);
            }
        };
        timer.finish("ok");

        let asset = self
            .persist_image(owner, provider, media, prompt, None)
            .await?;

        self.repo
            .append_action(
                owner,
                ActionKind::Create,
                Some(asset.id),
                json!({ "provider": provider.as_str(), "prompt": prompt }),
            )
            .await?;

        tracing::info!(
            asset_id = %asset.id,
            provider = provider.as_str(),
            "Image generated"
        );

        Ok(asset)
    }

    /// Edit an owned image, optionally constrained by a mask asset
    pub async fn edit_image(
        &self,
        owner: Uuid,
        provider: Provider,
        source_id: Uuid,
        instruction: &str,
        mask_id: Option<Uuid>,
    ) -> Result<MediaAsset> {
        let source = self.owned_asset(owner, source_id).await?;
        let source_bytes = self.store.read(&source.path).await?;
        let mime = mime_for_path(&source.path);

        let backend = self.gateway.image_backend(provider)?;

        let timer = metrics::GenerationTimer::start(provider.as_str());
        let result = match mask_id {
            Some(mask_id) => {
                let mask = self.owned_asset(owner, mask_id).await?;
                // Mask assets are stored in the inpainting convention
                // (black = editable); pass them through untouched.
                let mask_bytes = self.store.read(&mask.path).await?;
                backend
                    .edit_with_mask(&source_bytes, mime, &mask_bytes, instruction)
                    .await
            }
            None => backend.edit(&source_bytes, mime, instruction).await,
        };

        let media = match result {
            Ok(media) => media,
            Err(e) => {
                timer.finish("error");
                return Err(self.enrich(e).await);
            }
        };
        timer.finish("ok");

        let asset = self
            .persist_image(owner, provider, media, instruction, Some(source_id))
            .await?;

        self.repo
            .append_action(
                owner,
                ActionKind::Edit,
                Some(asset.id),
                json!({
                    "provider": provider.as_str(),
                    "instruction": instruction,
                    "source_asset_id": source_id,
                    "mask_asset_id": mask_id,
                }),
            )
            .await?;

        Ok(asset)
    }

    /// Register a user upload. Uploads are saved immediately; there is
    /// nothing ephemeral about media the user already had.
    pub async fn upload(&self, owner: Uuid, filename: &str, bytes: Vec<u8>) -> Result<MediaAsset> {
        if bytes.is_empty() {
            return Err(AppError::Validation {
                message: "Uploaded file is empty".to_string(),
                field: Some("file".to_string()),
            });
        }

        let path = self.store.save(owner, &bytes, filename).await?;
        let dims = storage::probe_dimensions(&bytes);

        let asset = self
            .repo
            .create_asset(NewAsset {
                owner,
                kind: AssetKind::Image,
                provider: UPLOAD_PROVIDER.to_string(),
                path,
                bytes: bytes.len() as i64,
                width: dims.map(|(w, _)| w as i32),
                height: dims.map(|(_, h)| h as i32),
                derived_from: None,
                metadata: json!({ "original_filename": filename }),
                saved: true,
            })
            .await?;

        self.repo
            .append_action(
                owner,
                ActionKind::Upload,
                Some(asset.id),
                json!({ "filename": filename, "bytes": asset.bytes }),
            )
            .await?;

        Ok(asset)
    }

    /// Dispatch a video generation job. In webhook mode this returns
    /// immediately with a processing prediction; in polling mode it
    /// blocks until the provider finishes or the budget runs out.
    pub async fn start_video(
        &self,
        owner: Uuid,
        request: VideoRequest,
        webhook_base_url: Option<&str>,
        poll_interval: Duration,
        budget: Duration,
    ) -> Result<VideoOutcome> {
        let backend = self.gateway.video_backend()?;
        let prompt = request.prompt.clone();

        if let Some(base) = webhook_base_url {
            let webhook_url = format!("{}/v1/webhooks/replicate", base.trim_end_matches('/'));
            let job = backend.start(&request, Some(&webhook_url)).await?;

            let prediction = self
                .repo
                .create_prediction(
                    owner,
                    &job.external_id,
                    &prompt,
                    json!({ "provider": Provider::GoogleVeo31.as_str() }),
                )
                .await?;

            metrics::record_video_job("webhook");

            return Ok(VideoOutcome::Accepted(prediction));
        }

        // Polling mode: no prediction row, the request carries the job
        // to completion itself.
        let job = backend.start(&request, None).await?;

        metrics::record_video_job("polling");

        let timer = metrics::GenerationTimer::start(Provider::GoogleVeo31.as_str());
        let deadline = tokio::time::Instant::now() + budget;

        loop {
            let poll = backend.poll(&job.external_id).await?;

            match poll.status {
                RemoteStatus::Succeeded => {
                    let url = poll.output_url.ok_or_else(|| AppError::ProviderGeneration {
                        provider: Provider::GoogleVeo31.as_str().to_string(),
                        message: "Job succeeded with no output URL".to_string(),
                        explanation: None,
                    })?;
                    let media = backend.download(&url).await?;
                    timer.finish("ok");

                    let asset = self.persist_video(owner, media, &prompt).await?;
                    return Ok(VideoOutcome::Completed(asset));
                }
                RemoteStatus::Failed => {
                    timer.finish("error");
                    let err = AppError::ProviderGeneration {
                        provider: Provider::GoogleVeo31.as_str().to_string(),
                        message: poll
                            .error
                            .unwrap_or_else(|| "Video generation failed".to_string()),
                        explanation: None,
                    };
                    return Err(self.enrich(err).await);
                }
                RemoteStatus::Pending => {
                    if tokio::time::Instant::now() + poll_interval > deadline {
                        timer.finish("timeout");
                        return Err(AppError::ProviderTimeout {
                            provider: Provider::GoogleVeo31.as_str().to_string(),
                            budget_secs: budget.as_secs(),
                        });
                    }
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    /// Generate a segmentation mask for an owned asset
    pub async fn generate_mask(
        &self,
        owner: Uuid,
        asset_id: Uuid,
        mask_prompt: Option<&str>,
        instruction: Option<&str>,
        negative_prompt: Option<&str>,
    ) -> Result<MediaAsset> {
        let source = self.owned_asset(owner, asset_id).await?;
        let bytes = self.store.read(&source.path).await?;
        let mime = mime_for_path(&source.path);

        let prompt = match (mask_prompt, instruction) {
            (Some(p), _) if !p.trim().is_empty() => p.trim().to_string(),
            (_, Some(instruction)) => masking::extract_mask_prompt(instruction),
            _ => {
                return Err(AppError::Validation {
                    message: "Either mask_prompt or instruction is required".to_string(),
                    field: Some("mask_prompt".to_string()),
                })
            }
        };

        let segmenter = self.gateway.segmenter()?;
        let mask = segmenter
            .segment(&bytes, mime, &prompt, negative_prompt)
            .await?;

        let raw_mask = self.download(&mask.mask_url).await?;
        // Grounded SAM marks the selection white; inpainting backends
        // edit the black region. Convert before storing so every
        // consumer gets the mask ready to use.
        let mask_bytes = masking::invert_mask(&raw_mask)?;
        let path = self.store.save(owner, &mask_bytes, "mask.png").await?;
        let dims = storage::probe_dimensions(&mask_bytes);

        let asset = self
            .repo
            .create_asset(NewAsset {
                owner,
                kind: AssetKind::Image,
                provider: "grounded-sam".to_string(),
                path,
                bytes: mask_bytes.len() as i64,
                width: dims.map(|(w, _)| w as i32),
                height: dims.map(|(_, h)| h as i32),
                derived_from: Some(asset_id),
                metadata: json!({
                    "mask": true,
                    "mask_prompt": prompt,
                    "external_id": mask.external_id,
                    "cost": pricing::MASK_GENERATION_COST,
                }),
                saved: false,
            })
            .await?;

        self.repo
            .append_action(
                owner,
                ActionKind::MaskGenerated,
                Some(asset.id),
                json!({ "mask_prompt": prompt, "source_asset_id": asset_id }),
            )
            .await?;

        Ok(asset)
    }

    /// Fetch an asset, requiring ownership
    pub async fn owned_asset(&self, owner: Uuid, id: Uuid) -> Result<MediaAsset> {
        self.repo
            .find_owned_asset(id, owner)
            .await?
            .ok_or_else(|| AppError::AssetNotFound { id: id.to_string() })
    }

    async fn persist_image(
        &self,
        owner: Uuid,
        provider: Provider,
        media: GeneratedMedia,
        prompt: &str,
        derived_from: Option<Uuid>,
    ) -> Result<MediaAsset> {
        let filename = format!("generated.{}", extension_for_mime(&media.mime_type));
        let path = self.store.save(owner, &media.bytes, &filename).await?;
        let dims = storage::probe_dimensions(&media.bytes);

        self.repo
            .create_asset(NewAsset {
                owner,
                kind: AssetKind::Image,
                provider: provider.as_str().to_string(),
                path,
                bytes: media.bytes.len() as i64,
                width: dims.map(|(w, _)| w as i32),
                height: dims.map(|(_, h)| h as i32),
                derived_from,
                metadata: json!({
                    "prompt": prompt,
                    "mime_type": media.mime_type,
                    "cost": pricing::unit_cost(provider),
                }),
                saved: false,
            })
            .await
    }

    async fn persist_video(
        &self,
        owner: Uuid,
        media: GeneratedMedia,
        prompt: &str,
    ) -> Result<MediaAsset> {
        let path = self.store.save_video(owner, &media.bytes).await?;

        let asset = self
            .repo
            .create_asset(polled_video_asset(owner, &media, prompt, path))
            .await?;

        self.repo
            .append_action(
                owner,
                ActionKind::CreateVideo,
                Some(asset.id),
                json!({ "prompt": prompt }),
            )
            .await?;

        Ok(asset)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::ProviderGeneration {
                provider: "replicate".to_string(),
                message: format!("Failed to download content: {}", response.status()),
                explanation: None,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Attach an advisor explanation to generation failures when one
    /// can be produced. Never changes the error otherwise.
    async fn enrich(&self, err: AppError) -> AppError {
        if let AppError::ProviderGeneration {
            provider,
            message,
            explanation: None,
        } = err
        {
            let explanation = match self.gateway.advisor() {
                Some(advisor) => advisor.explain_error(&provider, &message).await,
                None => None,
            };
            AppError::ProviderGeneration {
                provider,
                message,
                explanation,
            }
        } else {
            err
        }
    }
}

/// Asset row for a video completed inline by the polling loop. Like
/// generated images, polled videos only stay through an explicit save;
/// auto-saving is the webhook path's concern.
fn polled_video_asset(
    owner: Uuid,
    media: &GeneratedMedia,
    prompt: &str,
    path: String,
) -> NewAsset {
    NewAsset {
        owner,
        kind: AssetKind::Video,
        provider: Provider::GoogleVeo31.as_str().to_string(),
        path,
        bytes: media.bytes.len() as i64,
        width: None,
        height: None,
        derived_from: None,
        metadata: json!({
            "prompt": prompt,
            "mime_type": media.mime_type,
            "cost": pricing::unit_cost(Provider::GoogleVeo31),
        }),
        saved: false,
    }
}

/// Infer a mime type from a storage path extension
pub fn mime_for_path(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;
    use visualneurons_common::db::models::{Action, MediaAsset};
    use visualneurons_common::db::DbPool;
    use visualneurons_common::providers::testing::{MockImageBackend, MockVideoBackend};
    use visualneurons_common::providers::{ImageBackend, VideoBackend};

    fn asset_row(owner: Uuid, provider: &str, path: &str) -> MediaAsset {
        MediaAsset {
            id: Uuid::new_v4(),
            owner,
            kind: "image".to_string(),
            provider: provider.to_string(),
            path: path.to_string(),
            bytes: 16,
            width: None,
            height: None,
            derived_from: None,
            metadata: json!({}),
            saved: false,
            created_at: chrono::Utc::now().into(),
        }
    }

    fn action_row(owner: Uuid, kind: &str) -> Action {
        Action {
            id: Uuid::new_v4(),
            user_id: owner,
            action: kind.to_string(),
            asset_id: None,
            detail: json!({}),
            created_at: chrono::Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_generate_image_persists_file_and_rows() {
        let owner = Uuid::new_v4();
        let dir = TempDir::new().unwrap();

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![asset_row(owner, "google-imagen4", "s/1-generated.png")]])
            .append_query_results([vec![action_row(owner, "create")]])
            .into_connection();

        let backend = Arc::new(MockImageBackend::new());
        let mut images: HashMap<Provider, Arc<dyn ImageBackend>> = HashMap::new();
        images.insert(Provider::GoogleImagen4, backend.clone());

        let orchestrator = Orchestrator::new(
            Repository::new(DbPool::from_connection(db)),
            MediaStore::new(dir.path()),
            Arc::new(Gateway::from_parts(images, None, None)),
        );

        let asset = orchestrator
            .generate_image(owner, Provider::GoogleImagen4, "a red bicycle")
            .await
            .unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(asset.provider, "google-imagen4");

        // The generated bytes landed under the owner's directory
        let session_dir = dir.path().join(owner.to_string());
        assert_eq!(std::fs::read_dir(session_dir).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_generate_image_unconfigured_provider_writes_nothing() {
        let owner = Uuid::new_v4();
        let dir = TempDir::new().unwrap();

        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let orchestrator = Orchestrator::new(
            Repository::new(DbPool::from_connection(db)),
            MediaStore::new(dir.path()),
            Arc::new(Gateway::from_parts(HashMap::new(), None, None)),
        );

        let err = orchestrator
            .generate_image(owner, Provider::NovaCanvas, "a red bicycle")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ProviderAuth { .. }));
        assert!(!dir.path().join(owner.to_string()).exists());
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let orchestrator = Orchestrator::new(
            Repository::new(DbPool::from_connection(db)),
            MediaStore::new(dir.path()),
            Arc::new(Gateway::from_parts(HashMap::new(), None, None)),
        );

        let err = orchestrator
            .upload(Uuid::new_v4(), "empty.png", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_masked_edit_passes_stored_mask_through() {
        let owner = Uuid::new_v4();
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path());

        let source_path = store.save(owner, b"source image", "photo.png").await.unwrap();
        let mask_path = store.save(owner, b"stored mask png", "mask.png").await.unwrap();

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // source lookup, mask lookup, asset insert, action insert
            .append_query_results([vec![asset_row(owner, "local-fs", &source_path)]])
            .append_query_results([vec![asset_row(owner, "grounded-sam", &mask_path)]])
            .append_query_results([vec![asset_row(owner, "amazon-nova-canvas", "s/1-edit.png")]])
            .append_query_results([vec![action_row(owner, "edit")]])
            .into_connection();

        let backend = Arc::new(MockImageBackend::new());
        let mut images: HashMap<Provider, Arc<dyn ImageBackend>> = HashMap::new();
        images.insert(Provider::NovaCanvas, backend.clone());

        let orchestrator = Orchestrator::new(
            Repository::new(DbPool::from_connection(db)),
            store,
            Arc::new(Gateway::from_parts(images, None, None)),
        );

        orchestrator
            .edit_image(
                owner,
                Provider::NovaCanvas,
                Uuid::new_v4(),
                "remove the lamp post",
                Some(Uuid::new_v4()),
            )
            .await
            .unwrap();

        // The mask reaches the backend exactly as stored
        let seen = backend.last_mask.lock().unwrap().clone();
        assert_eq!(seen.as_deref(), Some(b"stored mask png".as_ref()));
    }

    #[test]
    fn test_polled_video_rows_start_unsaved() {
        let media = GeneratedMedia {
            bytes: b"video bytes".to_vec(),
            mime_type: "video/mp4".to_string(),
        };
        let row = polled_video_asset(
            Uuid::new_v4(),
            &media,
            "waves at dusk",
            "s/video_1.mp4".to_string(),
        );

        assert!(!row.saved);
        assert_eq!(row.provider, "google-veo-3.1");
        assert_eq!(row.bytes, 11);
    }

    #[tokio::test]
    async fn test_polling_video_times_out_within_budget() {
        let dir = TempDir::new().unwrap();
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        // The default mock poll never leaves pending
        let video: Arc<dyn VideoBackend> = Arc::new(MockVideoBackend::with_polls(Vec::new()));
        let orchestrator = Orchestrator::new(
            Repository::new(DbPool::from_connection(db)),
            MediaStore::new(dir.path()),
            Arc::new(Gateway::from_parts(HashMap::new(), Some(video), None)),
        );

        let request = VideoRequest {
            prompt: "waves at dusk".to_string(),
            ..Default::default()
        };

        let err = orchestrator
            .start_video(
                Uuid::new_v4(),
                request,
                None,
                Duration::from_millis(10),
                Duration::from_millis(5),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::ProviderTimeout { .. }));
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path("s/1-a.png"), "image/png");
        assert_eq!(mime_for_path("s/1-a.jpeg"), "image/jpeg");
        assert_eq!(mime_for_path("s/video_1.mp4"), "video/mp4");
        assert_eq!(mime_for_path("noext"), "application/octet-stream");
    }
}
