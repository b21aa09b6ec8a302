use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Starts external transcoding processes.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn start(&self, args: Vec<String>) -> Result<Box<dyn TranscodeProcess>>;
}

/// A running transcoder owned by exactly one session.
#[async_trait]
pub trait TranscodeProcess: Send + Sync {
    fn id(&self) -> Option<u32>;

    /// Stops the process and reaps it. Calling it on an exited process is fine.
    async fn terminate(&mut self) -> Result<()>;
}

/// Re-encodes an RTSP source into a rolling HLS playlist.
///
/// The source is read over TCP, video goes through libx264 tuned for
/// latency, audio through AAC at 128k. Segments last 2 seconds, the
/// playlist lists the 3 most recent ones and older files are deleted.
pub fn hls_args(source_url: &str, playlist: &Path) -> Vec<String> {
    [
        "-rtsp_transport",
        "tcp",
        "-i",
        source_url,
        "-c:v",
        "libx264",
        "-preset",
        "veryfast",
        "-tune",
        "zerolatency",
        "-c:a",
        "aac",
        "-b:a",
        "128k",
        "-f",
        "hls",
        "-hls_time",
        "2",
        "-hls_list_size",
        "3",
        "-hls_flags",
        "delete_segments",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain(std::iter::once(playlist.to_string_lossy().into_owned()))
    .collect()
}

pub struct FfmpegTranscoder {
    program: String,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn start(&self, args: Vec<String>) -> Result<Box<dyn TranscodeProcess>> {
        debug!("spawn {} {:?}", self.program, args);
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        info!("{} started, pid {:?}", self.program, child.id());
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
impl TranscodeProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            debug!("transcoder already exited: {}", status);
            return Ok(());
        }

        self.child.start_kill()?;
        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                debug!("transcoder stopped: {}", status?);
            }
            Err(_) => warn!("transcoder {:?} did not exit after kill", self.child.id()),
        }
        Ok(())
    }
}
