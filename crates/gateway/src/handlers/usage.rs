//! Usage reporting handler

use axum::{extract::State, Json};

use crate::extract::AuthSession;
use crate::services::usage::{compute_usage, UsageReport};
use crate::AppState;
use visualneurons_common::{errors::Result, Repository};

/// Get generation usage and estimated cost for the current session
pub async fn get_usage(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<UsageReport>> {
    let repo = Repository::new(state.db.clone());
    let report = compute_usage(&repo, session.id()).await?;
    Ok(Json(report))
}
