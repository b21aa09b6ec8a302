pub mod gateway;
pub mod registry;
pub mod transcoder;

pub use registry::{Registry, Session};
pub use transcoder::{FfmpegTranscoder, TranscodeProcess, Transcoder};
