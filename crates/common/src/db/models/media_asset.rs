//! Media asset entity - one generated or uploaded file plus its metadata

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Asset kind enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Video,
}

impl From<String> for AssetKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "video" => AssetKind::Video,
            _ => AssetKind::Image,
        }
    }
}

impl From<AssetKind> for String {
    fn from(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Image => "image".to_string(),
            AssetKind::Video => "video".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "media_assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning session
    pub owner: Uuid,

    /// "image" or "video"
    #[sea_orm(column_type = "Text")]
    pub kind: String,

    /// Provider tag that produced the asset, or "local-fs" for uploads
    #[sea_orm(column_type = "Text")]
    pub provider: String,

    /// Relative storage path under the media root; written once, unique
    #[sea_orm(column_type = "Text", unique)]
    pub path: String,

    pub bytes: i64,

    pub width: Option<i32>,

    pub height: Option<i32>,

    /// Source asset for edits. Weak back-reference: deleting a derived
    /// asset must not delete its ancestor, and deleting the ancestor
    /// leaves this pointer dangling rather than cascading.
    pub derived_from: Option<Uuid>,

    /// Free-form generation metadata (prompt, model, timestamps)
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: serde_json::Value,

    /// Explicit user "keep" flag; ephemeral chat output stays false
    pub saved: bool,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the asset kind as an enum
    pub fn asset_kind(&self) -> AssetKind {
        AssetKind::from(self.kind.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::session::Entity",
        from = "Column::Owner",
        to = "super::session::Column::Id"
    )]
    Session,

    #[sea_orm(has_many = "super::action::Entity")]
    Action,
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::action::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Action.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
