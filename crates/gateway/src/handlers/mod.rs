//! API handlers module

pub mod health;
pub mod images;
pub mod masks;
pub mod media;
pub mod predictions;
pub mod prompts;
pub mod usage;
pub mod videos;
pub mod webhooks;

use serde::Serialize;
use uuid::Uuid;
use visualneurons_common::db::models::MediaAsset;

/// Wire representation of a media asset
#[derive(Debug, Serialize)]
pub struct AssetResponse {
    pub id: Uuid,
    pub kind: String,
    pub provider: String,
    /// Gateway-relative URL the client fetches the bytes from
    pub url: String,
    pub bytes: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub derived_from: Option<Uuid>,
    pub saved: bool,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

impl From<MediaAsset> for AssetResponse {
    fn from(asset: MediaAsset) -> Self {
        Self {
            id: asset.id,
            kind: asset.kind,
            provider: asset.provider,
            url: format!("/v1/media/{}", asset.path),
            bytes: asset.bytes,
            width: asset.width,
            height: asset.height,
            derived_from: asset.derived_from,
            saved: asset.saved,
            metadata: asset.metadata,
            created_at: asset.created_at.to_rfc3339(),
        }
    }
}
