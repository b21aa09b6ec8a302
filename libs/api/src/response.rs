use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::overlay::{OverlayKind, Position, Size};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Overlay {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OverlayKind,
    pub content: String,
    pub position: Position,
    pub size: Size,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Health {
    pub status: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Success {
    pub success: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StreamUrl {
    pub hls_url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StreamSession {
    pub rtsp_url: String,
    pub hls_url: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}
