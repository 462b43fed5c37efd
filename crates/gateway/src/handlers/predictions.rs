//! Prediction status handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::extract::AuthSession;
use crate::handlers::AssetResponse;
use crate::AppState;
use visualneurons_common::{
    errors::{AppError, Result},
    Repository,
};

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub id: Uuid,
    pub external_id: String,
    pub status: String,
    pub prompt: String,
    pub error: Option<String>,
    /// Present once the prediction succeeded
    pub asset: Option<AssetResponse>,
    pub created_at: String,
    pub updated_at: String,
}

/// Get a prediction by ID. Only the owning session sees it.
pub async fn get_prediction(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<Uuid>,
) -> Result<Json<PredictionResponse>> {
    let repo = Repository::new(state.db.clone());

    let prediction = repo
        .find_prediction_by_id(id)
        .await?
        .filter(|p| p.owner == session.id())
        .ok_or_else(|| AppError::PredictionNotFound { id: id.to_string() })?;

    let asset = match prediction.asset_id {
        Some(asset_id) => repo.find_asset_by_id(asset_id).await?.map(Into::into),
        None => None,
    };

    Ok(Json(PredictionResponse {
        id: prediction.id,
        external_id: prediction.external_id,
        status: prediction.status,
        prompt: prediction.prompt,
        error: prediction.error,
        asset,
        created_at: prediction.created_at.to_rfc3339(),
        updated_at: prediction.updated_at.to_rfc3339(),
    }))
}
