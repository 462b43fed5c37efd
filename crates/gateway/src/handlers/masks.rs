//! Segmentation mask handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::extract::AuthSession;
use crate::handlers::AssetResponse;
use crate::services::orchestrator::Orchestrator;
use crate::AppState;
use visualneurons_common::errors::{AppError, Result};

/// Request to generate a segmentation mask for an owned image
#[derive(Debug, Deserialize, Validate)]
pub struct CreateMaskRequest {
    pub asset_id: Uuid,

    /// Region description; derived from `instruction` when absent
    #[serde(default)]
    #[validate(length(max = 500))]
    pub mask_prompt: Option<String>,

    /// Edit instruction to derive the mask prompt from
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub instruction: Option<String>,

    /// Region to exclude from the mask
    #[serde(default)]
    #[validate(length(max = 500))]
    pub negative_prompt: Option<String>,
}

/// Generate a segmentation mask for an owned asset
pub async fn create_mask(
    State(state): State<AppState>,
    session: AuthSession,
    Json(request): Json<CreateMaskRequest>,
) -> Result<(StatusCode, Json<AssetResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let orchestrator = Orchestrator::from_state(&state);
    let asset = orchestrator
        .generate_mask(
            session.id(),
            request.asset_id,
            request.mask_prompt.as_deref(),
            request.instruction.as_deref(),
            request.negative_prompt.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(asset.into())))
}
