//! Action entity - append-only audit log row

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Action kind enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Edit,
    Upload,
    MaskGenerated,
    CreateVideo,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Edit => "edit",
            ActionKind::Upload => "upload",
            ActionKind::MaskGenerated => "mask_generated",
            ActionKind::CreateVideo => "create_video",
        }
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "actions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    /// create | edit | upload | mask_generated | create_video
    #[sea_orm(column_type = "Text")]
    pub action: String,

    pub asset_id: Option<Uuid>,

    /// Free-form detail (prompt, instruction, lineage)
    #[sea_orm(column_type = "JsonBinary")]
    pub detail: serde_json::Value,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::session::Entity",
        from = "Column::UserId",
        to = "super::session::Column::Id"
    )]
    Session,

    #[sea_orm(
        belongs_to = "super::media_asset::Entity",
        from = "Column::AssetId",
        to = "super::media_asset::Column::Id"
    )]
    MediaAsset,
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::media_asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MediaAsset.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
