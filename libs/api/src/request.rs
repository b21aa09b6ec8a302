use serde::{Deserialize, Serialize};

use crate::overlay::{Position, Size};

/// `type` stays a raw string so an unknown value can be reported
/// as a validation error instead of a body parse error.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CreateOverlay {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub content: Option<String>,
    pub position: Option<Position>,
    pub size: Option<Size>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UpdateOverlay {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct StreamRequest {
    pub rtsp_url: Option<String>,
}
