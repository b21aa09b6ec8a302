#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use overlayd::config::Config;
use overlayd::stream::{TranscodeProcess, Transcoder};

/// Stands in for ffmpeg: writes a playlist and one segment into the
/// session directory and counts how often it was started.
#[derive(Default)]
pub struct FakeTranscoder {
    pub starts: AtomicUsize,
    pub running: Arc<AtomicUsize>,
    pub fail: AtomicBool,
}

struct FakeProcess {
    running: Arc<AtomicUsize>,
    alive: bool,
}

#[async_trait]
impl TranscodeProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        self.alive.then_some(1)
    }

    async fn terminate(&mut self) -> anyhow::Result<()> {
        if self.alive {
            self.alive = false;
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn start(&self, args: Vec<String>) -> anyhow::Result<Box<dyn TranscodeProcess>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("No such file or directory");
        }

        let playlist = std::path::PathBuf::from(args.last().expect("playlist argument"));
        let dir = playlist.parent().expect("session directory");
        std::fs::write(
            &playlist,
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.000000,\nstream0.ts\n",
        )?;
        std::fs::write(dir.join("stream0.ts"), [0x47u8; 188])?;

        self.running.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            running: self.running.clone(),
            alive: true,
        }))
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub transcoder: Arc<FakeTranscoder>,
    pub dir: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let mut cfg = Config::default();
    cfg.database.url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("overlays.db").display()
    );
    cfg.database.max_connections = 1;
    cfg.stream.output_dir = dir.path().join("hls");
    cfg.stream.public_url = format!("http://{addr}");

    let transcoder = Arc::new(FakeTranscoder::default());
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(overlayd::serve_with_transcoder(
        cfg,
        transcoder.clone(),
        listener,
        async move {
            let _ = rx.await;
        },
    ));

    TestServer {
        addr,
        transcoder,
        dir,
        shutdown: Some(tx),
    }
}
