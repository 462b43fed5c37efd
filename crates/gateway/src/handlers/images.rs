//! Image generation and gallery handlers

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::extract::AuthSession;
use crate::handlers::AssetResponse;
use crate::services::orchestrator::Orchestrator;
use crate::AppState;
use visualneurons_common::{
    errors::{AppError, Result},
    providers::Provider,
    Repository,
};

/// Request to generate an image from a prompt
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateImageRequest {
    pub provider: Provider,

    #[validate(length(min = 1, max = 5000))]
    pub prompt: String,
}

/// Request to edit an existing image
#[derive(Debug, Deserialize, Validate)]
pub struct EditImageRequest {
    pub provider: Provider,

    pub asset_id: Uuid,

    #[validate(length(min = 1, max = 5000))]
    pub instruction: String,

    /// Mask asset constraining the edit region
    #[serde(default)]
    pub mask_asset_id: Option<Uuid>,
}

/// Generate an image from a text prompt
pub async fn generate_image(
    State(state): State<AppState>,
    session: AuthSession,
    Json(request): Json<GenerateImageRequest>,
) -> Result<(StatusCode, Json<AssetResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    if request.provider == Provider::LocalUpload {
        return Err(AppError::Validation {
            message: "local-fs is not a generation provider".to_string(),
            field: Some("provider".to_string()),
        });
    }

    let orchestrator = Orchestrator::from_state(&state);
    let asset = orchestrator
        .generate_image(session.id(), request.provider, &request.prompt)
        .await?;

    Ok((StatusCode::CREATED, Json(asset.into())))
}

/// Edit an existing image following an instruction
pub async fn edit_image(
    State(state): State<AppState>,
    session: AuthSession,
    Json(request): Json<EditImageRequest>,
) -> Result<(StatusCode, Json<AssetResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let orchestrator = Orchestrator::from_state(&state);
    let asset = orchestrator
        .edit_image(
            session.id(),
            request.provider,
            request.asset_id,
            &request.instruction,
            request.mask_asset_id,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(asset.into())))
}

/// Upload an image file (multipart, field name "file")
pub async fn upload_image(
    State(state): State<AppState>,
    session: AuthSession,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AssetResponse>)> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Validation {
        message: format!("Invalid multipart body: {}", e),
        field: None,
    })? {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .unwrap_or("upload.png")
                .to_string();
            let bytes = field.bytes().await.map_err(|e| AppError::Validation {
                message: format!("Failed to read upload: {}", e),
                field: Some("file".to_string()),
            })?;
            upload = Some((filename, bytes.to_vec()));
        }
    }

    let (filename, bytes) = upload.ok_or_else(|| AppError::MissingField {
        field: "file".to_string(),
    })?;

    let orchestrator = Orchestrator::from_state(&state);
    let asset = orchestrator.upload(session.id(), &filename, bytes).await?;

    Ok((StatusCode::CREATED, Json(asset.into())))
}

/// Get an owned asset by ID
pub async fn get_image(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetResponse>> {
    let orchestrator = Orchestrator::from_state(&state);
    let asset = orchestrator.owned_asset(session.id(), id).await?;
    Ok(Json(asset.into()))
}

/// Save an asset to the gallery. Idempotent.
pub async fn save_image(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetResponse>> {
    let repo = Repository::new(state.db.clone());

    // Ownership check before the write
    repo.find_owned_asset(id, session.id())
        .await?
        .ok_or_else(|| AppError::AssetNotFound { id: id.to_string() })?;

    let asset = repo.mark_asset_saved(id).await?;
    Ok(Json(asset.into()))
}

/// Delete an owned asset: row first, then the file best-effort
pub async fn delete_image(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    let repo = Repository::new(state.db.clone());

    let asset = repo
        .find_owned_asset(id, session.id())
        .await?
        .ok_or_else(|| AppError::AssetNotFound { id: id.to_string() })?;

    repo.delete_asset(id).await?;

    if let Err(e) = state.store.delete(&asset.path).await {
        tracing::warn!(asset_id = %id, path = %asset.path, error = %e, "Failed to remove media file");
    }

    tracing::info!(asset_id = %id, "Asset deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// List saved assets, newest first
pub async fn gallery(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<Vec<AssetResponse>>> {
    let repo = Repository::new(state.db.clone());
    let assets = repo.list_saved_assets(session.id()).await?;
    Ok(Json(assets.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use visualneurons_common::config::AppConfig;
    use visualneurons_common::db::models::{MediaAsset, Session};
    use visualneurons_common::db::DbPool;
    use visualneurons_common::{Gateway, MediaStore};

    fn auth(owner: Uuid) -> AuthSession {
        AuthSession {
            session: Session {
                id: owner,
                identity: "anon_test".to_string(),
                created_at: Utc::now().into(),
                last_seen_at: Utc::now().into(),
            },
        }
    }

    fn state_with(db: sea_orm::DatabaseConnection, dir: &TempDir) -> AppState {
        AppState {
            config: Arc::new(AppConfig::default()),
            db: DbPool::from_connection(db),
            store: MediaStore::new(dir.path()),
            gateway: Arc::new(Gateway::from_parts(HashMap::new(), None, None)),
            jwt: None,
        }
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_file() {
        let owner = Uuid::new_v4();
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path());
        let path = store.save(owner, b"png bytes", "gen.png").await.unwrap();

        let asset = MediaAsset {
            id: Uuid::new_v4(),
            owner,
            kind: "image".to_string(),
            provider: "google-imagen4".to_string(),
            path: path.clone(),
            bytes: 9,
            width: None,
            height: None,
            derived_from: None,
            metadata: serde_json::json!({}),
            saved: true,
            created_at: Utc::now().into(),
        };

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // ownership lookup, row delete, post-delete lookup (empty)
            .append_query_results([vec![asset.clone()]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .append_query_results([Vec::<MediaAsset>::new()])
            .into_connection();

        let state = state_with(db, &dir);

        let status = delete_image(State(state.clone()), auth(owner), Path(asset.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        // The backing file is gone
        assert!(state.store.read(&path).await.is_err());

        // And a subsequent fetch no longer finds the asset
        let err = get_image(State(state), auth(owner), Path(asset.id))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::AssetNotFound { .. }));
    }
}
