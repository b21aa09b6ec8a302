pub const HEALTH: &str = "/health";
pub const OVERLAYS: &str = "/overlays";
pub const STREAM: &str = "/stream";
pub const STREAMS: &str = "/streams";

pub fn overlay(id: &str) -> String {
    format!("/overlays/{}", id)
}

pub fn hls(token: &str, file: &str) -> String {
    format!("/hls/{}/{}", token, file)
}
