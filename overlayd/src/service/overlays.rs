use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};
use uuid::Uuid;

use api::overlay::{OverlayKind, Position, Size};
use api::response::Overlay;

use crate::entity::overlays::{self, Entity as Overlays};

#[derive(Debug, Clone)]
pub struct NewOverlay {
    pub kind: OverlayKind,
    pub content: String,
    pub position: Position,
    pub size: Size,
}

/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct OverlayPatch {
    pub kind: Option<OverlayKind>,
    pub content: Option<String>,
    pub position: Option<Position>,
    pub size: Option<Size>,
}

pub struct OverlaysService;

impl OverlaysService {
    pub async fn insert(db: &DatabaseConnection, overlay: NewOverlay) -> Result<overlays::Model> {
        let now = now();
        let model = overlays::ActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(overlay.kind.to_string()),
            content: Set(overlay.content),
            position_x: Set(overlay.position.x),
            position_y: Set(overlay.position.y),
            width: Set(overlay.size.width),
            height: Set(overlay.size.height),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(model.insert(db).await?)
    }

    pub async fn find_all_ordered(db: &DatabaseConnection) -> Result<Vec<overlays::Model>> {
        let overlays = Overlays::find()
            .order_by_asc(overlays::Column::CreatedAt)
            .all(db)
            .await?;
        Ok(overlays)
    }

    /// A malformed identifier cannot name a stored overlay and yields `None`.
    pub async fn find_by_id(db: &DatabaseConnection, id: &str) -> Result<Option<overlays::Model>> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        Ok(Overlays::find_by_id(id).one(db).await?)
    }

    pub async fn update_by_id(
        db: &DatabaseConnection,
        id: &str,
        patch: OverlayPatch,
    ) -> Result<Option<overlays::Model>> {
        let Some(existing) = Self::find_by_id(db, id).await? else {
            return Ok(None);
        };

        let mut active_model: overlays::ActiveModel = existing.into();
        if let Some(kind) = patch.kind {
            active_model.kind = Set(kind.to_string());
        }
        if let Some(content) = patch.content {
            active_model.content = Set(content);
        }
        if let Some(position) = patch.position {
            active_model.position_x = Set(position.x);
            active_model.position_y = Set(position.y);
        }
        if let Some(size) = patch.size {
            active_model.width = Set(size.width);
            active_model.height = Set(size.height);
        }
        active_model.updated_at = Set(now());

        Ok(Some(active_model.update(db).await?))
    }

    /// Returns the number of removed rows; deleting an absent overlay is not an error.
    pub async fn delete_by_id(db: &DatabaseConnection, id: &str) -> Result<u64> {
        let Some(id) = parse_id(id) else {
            return Ok(0);
        };
        let result = Overlays::delete_by_id(id).exec(db).await?;
        Ok(result.rows_affected)
    }
}

impl TryFrom<overlays::Model> for Overlay {
    type Error = anyhow::Error;

    fn try_from(model: overlays::Model) -> Result<Self> {
        let kind = model
            .kind
            .parse::<OverlayKind>()
            .with_context(|| format!("stored overlay {}", model.id))?;
        Ok(Overlay {
            id: model.id.to_string(),
            kind,
            content: model.content,
            position: Position {
                x: model.position_x,
                y: model.position_y,
            },
            size: Size {
                width: model.width,
                height: model.height,
            },
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

fn now() -> DateTime<FixedOffset> {
    DateTime::<FixedOffset>::from(Utc::now())
}
