//! Media serving
//!
//! Bytes are only served to the session that owns the asset row for
//! the requested path, so guessing another session's path yields the
//! same 404 as a path that does not exist.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::extract::AuthSession;
use crate::services::orchestrator::mime_for_path;
use crate::AppState;
use visualneurons_common::{
    errors::{AppError, Result},
    Repository,
};

/// Serve a stored media file by its relative path
pub async fn serve_media(
    State(state): State<AppState>,
    session: AuthSession,
    Path(path): Path<String>,
) -> Result<Response> {
    let repo = Repository::new(state.db.clone());

    let asset = repo
        .find_asset_by_path(&path, session.id())
        .await?
        .ok_or_else(|| AppError::AssetNotFound { id: path.clone() })?;

    let bytes = state.store.read(&asset.path).await.map_err(|e| {
        tracing::error!(path = %asset.path, error = %e, "Asset row exists but file is unreadable");
        AppError::AssetNotFound { id: path.clone() }
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, mime_for_path(&asset.path)),
            (header::CACHE_CONTROL, "private, max-age=31536000, immutable"),
        ],
        bytes,
    )
        .into_response())
}
