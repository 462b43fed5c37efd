//! Video generation handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::extract::AuthSession;
use crate::handlers::AssetResponse;
use crate::services::orchestrator::{Orchestrator, VideoOutcome};
use crate::AppState;
use visualneurons_common::{
    errors::{AppError, Result},
    providers::VideoRequest,
};

/// Request to generate a video
#[derive(Debug, Deserialize, Validate)]
pub struct CreateVideoRequest {
    #[validate(length(min = 1, max = 5000))]
    pub prompt: String,

    /// Owned image asset used as the opening frame
    #[serde(default)]
    pub first_frame_asset_id: Option<Uuid>,

    /// Owned image asset used as the closing frame
    #[serde(default)]
    pub last_frame_asset_id: Option<Uuid>,

    /// Up to 3 owned image assets for subject consistency
    #[serde(default)]
    pub reference_asset_ids: Vec<Uuid>,

    #[serde(default)]
    pub duration_secs: Option<u32>,

    #[serde(default)]
    pub resolution: Option<String>,

    #[serde(default)]
    pub generate_audio: Option<bool>,
}

/// Accepted response in webhook mode
#[derive(Debug, Serialize)]
pub struct VideoAcceptedResponse {
    pub prediction_id: Uuid,
    pub external_id: String,
    pub status: String,
    pub poll_url: String,
}

/// Dispatch a video generation job
pub async fn create_video(
    State(state): State<AppState>,
    session: AuthSession,
    Json(request): Json<CreateVideoRequest>,
) -> Result<Response> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    if request.reference_asset_ids.len() > 3 {
        return Err(AppError::Validation {
            message: "At most 3 reference images are supported".to_string(),
            field: Some("reference_asset_ids".to_string()),
        });
    }

    let orchestrator = Orchestrator::from_state(&state);
    let owner = session.id();

    let mut video_request = VideoRequest {
        prompt: request.prompt.clone(),
        ..Default::default()
    };
    if let Some(duration) = request.duration_secs {
        video_request.duration_secs = duration;
    }
    if let Some(resolution) = request.resolution {
        video_request.resolution = resolution;
    }
    if let Some(audio) = request.generate_audio {
        video_request.generate_audio = audio;
    }

    if let Some(id) = request.first_frame_asset_id {
        video_request.first_frame = Some(read_owned_image(&state, &orchestrator, owner, id).await?);
    }
    if let Some(id) = request.last_frame_asset_id {
        video_request.last_frame = Some(read_owned_image(&state, &orchestrator, owner, id).await?);
    }
    for id in &request.reference_asset_ids {
        video_request
            .reference_images
            .push(read_owned_image(&state, &orchestrator, owner, *id).await?);
    }

    let outcome = orchestrator
        .start_video(
            owner,
            video_request,
            state.config.video.webhook_base_url.as_deref(),
            state.config.video.poll_interval(),
            state.config.video.timeout(),
        )
        .await?;

    match outcome {
        VideoOutcome::Accepted(prediction) => Ok((
            StatusCode::ACCEPTED,
            Json(VideoAcceptedResponse {
                prediction_id: prediction.id,
                external_id: prediction.external_id,
                status: prediction.status,
                poll_url: format!("/v1/predictions/{}", prediction.id),
            }),
        )
            .into_response()),
        VideoOutcome::Completed(asset) => Ok((
            StatusCode::CREATED,
            Json(json!({ "asset": AssetResponse::from(asset) })),
        )
            .into_response()),
    }
}

async fn read_owned_image(
    state: &AppState,
    orchestrator: &Orchestrator,
    owner: Uuid,
    id: Uuid,
) -> Result<Vec<u8>> {
    let asset = orchestrator.owned_asset(owner, id).await?;
    if asset.kind != "image" {
        return Err(AppError::Validation {
            message: format!("Asset {} is not an image", id),
            field: None,
        });
    }
    state.store.read(&asset.path).await
}
