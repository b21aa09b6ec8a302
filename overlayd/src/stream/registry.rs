use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config;
use crate::error::AppError;
use crate::result::Result;
use crate::stream::transcoder::{hls_args, TranscodeProcess, Transcoder};

/// One transcoder process plus the directory it writes into.
pub struct Session {
    pub source_url: String,
    /// Basename of `output_dir`, routes file requests back to this session.
    pub token: String,
    pub output_dir: PathBuf,
    pub public_url: String,
    pub created_at: DateTime<Utc>,

    started: Instant,
    last_access_ms: AtomicU64,
    process: Mutex<Option<Box<dyn TranscodeProcess>>>,
}

impl Session {
    fn new(
        source_url: String,
        token: String,
        output_dir: PathBuf,
        public_url: String,
        process: Box<dyn TranscodeProcess>,
    ) -> Self {
        Self {
            source_url,
            token,
            output_dir,
            public_url,
            created_at: Utc::now(),
            started: Instant::now(),
            last_access_ms: AtomicU64::new(0),
            process: Mutex::new(Some(process)),
        }
    }

    pub fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_access_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_access_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    /// Stops the process and removes the output directory. Both steps run
    /// even when the first one fails.
    async fn teardown(&self) -> anyhow::Result<()> {
        let process_result = match self.process.lock().await.take() {
            Some(mut process) => process.terminate().await,
            None => Ok(()),
        };

        let dir_result = match tokio::fs::remove_dir_all(&self.output_dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(anyhow::Error::from(e)
                .context(format!("remove {}", self.output_dir.display()))),
            _ => Ok(()),
        };

        info!(
            "Stream session {} for {} torn down",
            self.token, self.source_url
        );
        process_result.and(dir_result)
    }
}

/// Outcome of a single start attempt, shared by every caller waiting on it.
type Started = std::result::Result<Arc<Session>, Arc<anyhow::Error>>;

#[derive(Default)]
struct Entry {
    started: Arc<OnceCell<Started>>,
    /// Set under the map lock once the session is reachable by token.
    session: Option<Arc<Session>>,
}

#[derive(Default)]
struct Sessions {
    by_url: HashMap<String, Entry>,
    by_token: HashMap<String, Arc<Session>>,
}

/// Maps source URLs to their running transcoding sessions.
///
/// Each URL owns an entry whose start attempt is guarded by a `OnceCell`, so
/// concurrent requests for an unseen URL share exactly one attempt, whether it
/// succeeds or fails. The map lock is never held while a process is being
/// spawned or stopped.
pub struct Registry {
    cfg: config::Stream,
    transcoder: Arc<dyn Transcoder>,
    sessions: RwLock<Sessions>,
}

impl Registry {
    pub fn new(cfg: config::Stream, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            cfg,
            transcoder,
            sessions: RwLock::new(Sessions::default()),
        }
    }

    /// Returns the public playlist URL for `source_url` and whether this call
    /// started the session.
    pub async fn get_or_create(&self, source_url: &str) -> Result<(String, bool)> {
        if source_url.is_empty() {
            return Err(AppError::invalid_request("rtsp_url is required"));
        }

        let existing = {
            let sessions = self.sessions.read().await;
            sessions
                .by_url
                .get(source_url)
                .map(|entry| (entry.started.clone(), entry.session.clone()))
        };
        let started = match existing {
            Some((_, Some(session))) => {
                session.touch();
                return Ok((session.public_url.clone(), false));
            }
            Some((started, None)) => started,
            None => {
                let mut sessions = self.sessions.write().await;
                let entry = sessions.by_url.entry(source_url.to_string()).or_default();
                if let Some(session) = &entry.session {
                    session.touch();
                    return Ok((session.public_url.clone(), false));
                }
                entry.started.clone()
            }
        };

        let started_here = AtomicBool::new(false);
        let outcome = started
            .get_or_init(|| {
                started_here.store(true, Ordering::Relaxed);
                self.start_and_register(source_url, &started)
            })
            .await;

        match outcome {
            Ok(session) => {
                let created = started_here.load(Ordering::Relaxed);
                if !created {
                    session.touch();
                }
                Ok((session.public_url.clone(), created))
            }
            Err(e) => Err(AppError::InternalServerError(anyhow::anyhow!(
                "stream {} failed to start: {:#}",
                source_url,
                e
            ))),
        }
    }

    /// Runs the single start attempt for an entry. The session becomes
    /// visible by token before the attempt is marked complete, and a failed
    /// attempt drops its entry so a later request starts afresh.
    async fn start_and_register(
        &self,
        source_url: &str,
        started: &Arc<OnceCell<Started>>,
    ) -> Started {
        let session = match self.start_session(source_url).await {
            Ok(session) => session,
            Err(e) => {
                let mut sessions = self.sessions.write().await;
                if sessions
                    .by_url
                    .get(source_url)
                    .is_some_and(|entry| Arc::ptr_eq(&entry.started, started))
                {
                    sessions.by_url.remove(source_url);
                }
                warn!("Failed to start stream {}: {:#}", source_url, e);
                return Err(Arc::new(e));
            }
        };

        let registered = {
            let mut guard = self.sessions.write().await;
            let sessions = &mut *guard;
            match sessions.by_url.get_mut(source_url) {
                Some(entry) if Arc::ptr_eq(&entry.started, started) => {
                    entry.session = Some(session.clone());
                    sessions
                        .by_token
                        .insert(session.token.clone(), session.clone());
                    true
                }
                _ => false,
            }
        };

        if !registered {
            warn!("Stream {} was terminated while starting", source_url);
            if let Err(e) = session.teardown().await {
                error!("Failed to tear down stream {}: {:?}", source_url, e);
            }
            return Err(Arc::new(anyhow::anyhow!("terminated while starting")));
        }
        Ok(session)
    }

    /// Finds the session whose output directory is named `token`.
    pub async fn lookup_by_token(&self, token: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.by_token.get(token).cloned();
        if let Some(session) = &session {
            session.touch();
        }
        session
    }

    /// Stops the session for `source_url`. Unknown URLs are a no-op and
    /// return `false`.
    pub async fn terminate(&self, source_url: &str) -> anyhow::Result<bool> {
        let Some(session) = self.detach(source_url, None).await else {
            return Ok(false);
        };
        session.teardown().await?;
        Ok(true)
    }

    /// Terminates every session idle for at least `max_idle`, returning their source URLs.
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<String> {
        let candidates: Vec<String> = self
            .sessions
            .read()
            .await
            .by_token
            .values()
            .filter(|s| s.idle_for() >= max_idle)
            .map(|s| s.source_url.clone())
            .collect();

        let mut reaped = Vec::new();
        for source_url in candidates {
            let Some(session) = self.detach(&source_url, Some(max_idle)).await else {
                continue;
            };
            info!(
                "Reaping stream {} idle for {}ms",
                source_url,
                session.idle_for().as_millis()
            );
            if let Err(e) = session.teardown().await {
                error!("Failed to tear down stream {}: {:?}", source_url, e);
            }
            reaped.push(source_url);
        }
        reaped
    }

    /// Snapshot of the registered sessions, oldest first.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self
            .sessions
            .read()
            .await
            .by_token
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub async fn shutdown(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            sessions.by_url.clear();
            sessions.by_token.drain().map(|(_, s)| s).collect()
        };

        info!("Stopping {} stream sessions", drained.len());
        for session in drained {
            if let Err(e) = session.teardown().await {
                error!("Failed to stop stream {}: {:?}", session.source_url, e);
            }
        }
    }

    /// Removes `source_url` from both maps. With `max_idle` set, the entry is
    /// only removed if the session is still idle at that point.
    async fn detach(&self, source_url: &str, max_idle: Option<Duration>) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.by_url.get(source_url)?.session.clone();

        if let Some(max_idle) = max_idle {
            // an entry that is still starting is never idle
            if !session.as_ref().is_some_and(|s| s.idle_for() >= max_idle) {
                return None;
            }
        }

        sessions.by_url.remove(source_url);
        let session = session?;
        sessions.by_token.remove(&session.token);
        Some(session)
    }

    async fn start_session(&self, source_url: &str) -> anyhow::Result<Arc<Session>> {
        let token = Uuid::new_v4().simple().to_string();
        let output_dir = self.cfg.output_dir.join(&token);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("create {}", output_dir.display()))?;

        let args = hls_args(source_url, &output_dir.join(&self.cfg.playlist));
        let process = match self.transcoder.start(args).await {
            Ok(process) => process,
            Err(e) => {
                if let Err(e) = tokio::fs::remove_dir_all(&output_dir).await {
                    warn!("Failed to remove {}: {}", output_dir.display(), e);
                }
                return Err(e);
            }
        };

        let public_url = format!(
            "{}{}",
            self.cfg.public_url.trim_end_matches('/'),
            api::path::hls(&token, &self.cfg.playlist)
        );
        debug!("Stream {} -> {}", source_url, output_dir.display());
        info!(
            "Started stream session {} for {} (pid {:?})",
            token,
            source_url,
            process.id()
        );

        Ok(Arc::new(Session::new(
            source_url.to_string(),
            token,
            output_dir,
            public_url,
            process,
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    #[derive(Default)]
    pub(crate) struct MockTranscoder {
        pub starts: AtomicUsize,
        pub live: Arc<AtomicUsize>,
        pub fail: AtomicBool,
        /// Number of upcoming starts that fail before starts succeed again.
        pub fail_times: AtomicUsize,
        pub delay: Duration,
        pub last_args: std::sync::Mutex<Vec<String>>,
    }

    struct MockProcess {
        live: Arc<AtomicUsize>,
        running: bool,
    }

    #[async_trait]
    impl TranscodeProcess for MockProcess {
        fn id(&self) -> Option<u32> {
            self.running.then_some(4242)
        }

        async fn terminate(&mut self) -> anyhow::Result<()> {
            if self.running {
                self.running = false;
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Transcoder for MockTranscoder {
        async fn start(&self, args: Vec<String>) -> anyhow::Result<Box<dyn TranscodeProcess>> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            *self.last_args.lock().unwrap() = args;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let flaky = self
                .fail_times
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if flaky || self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("transcoder not available");
            }
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockProcess {
                live: self.live.clone(),
                running: true,
            }))
        }
    }

    pub(crate) fn stream_config(dir: &tempfile::TempDir) -> config::Stream {
        config::Stream {
            output_dir: dir.path().to_path_buf(),
            public_url: "http://localhost:5000/".to_string(),
            ..Default::default()
        }
    }

    fn registry(dir: &tempfile::TempDir, transcoder: Arc<MockTranscoder>) -> Registry {
        Registry::new(stream_config(dir), transcoder)
    }

    fn token_of(url: &str) -> String {
        url.trim_start_matches("http://localhost:5000/hls/")
            .trim_end_matches("/stream.m3u8")
            .to_string()
    }

    #[tokio::test]
    async fn test_create_then_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder::default());
        let registry = registry(&dir, transcoder.clone());

        let (url, created) = registry.get_or_create("rtsp://cam1").await.unwrap();
        assert!(created);
        assert!(url.starts_with("http://localhost:5000/hls/"));
        assert!(url.ends_with("/stream.m3u8"));

        let (again, created) = registry.get_or_create("rtsp://cam1").await.unwrap();
        assert!(!created);
        assert_eq!(url, again);
        assert_eq!(1, transcoder.starts.load(Ordering::SeqCst));

        let token = token_of(&url);
        let session = registry.lookup_by_token(&token).await.unwrap();
        assert!(session.output_dir.is_dir());
        assert_eq!(dir.path().join(&token), session.output_dir);

        let args = transcoder.last_args.lock().unwrap().clone();
        assert_eq!(Some("rtsp://cam1"), args.get(3).map(String::as_str));
        assert_eq!(
            Some(session.output_dir.join("stream.m3u8").to_string_lossy().as_ref()),
            args.last().map(String::as_str)
        );
    }

    #[tokio::test]
    async fn test_source_url_is_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder::default());
        let registry = registry(&dir, transcoder.clone());

        let (a, _) = registry.get_or_create("rtsp://cam/A").await.unwrap();
        let (b, _) = registry.get_or_create("rtsp://cam/a").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(2, transcoder.starts.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder::default());
        let registry = registry(&dir, transcoder.clone());

        let err = registry.get_or_create("").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(0, transcoder.starts.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_call_wins() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let registry = Arc::new(registry(&dir, transcoder.clone()));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create("rtsp://cam1").await.unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(1, transcoder.starts.load(Ordering::SeqCst));
        assert_eq!(1, results.iter().filter(|(_, created)| *created).count());
        assert!(results.iter().all(|(url, _)| *url == results[0].0));
        assert_eq!(1, registry.sessions().await.len());
    }

    #[tokio::test]
    async fn test_spawn_failure_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder::default());
        transcoder.fail.store(true, Ordering::SeqCst);
        let registry = registry(&dir, transcoder.clone());

        let err = registry.get_or_create("rtsp://cam1").await.unwrap_err();
        assert!(matches!(err, AppError::InternalServerError(_)));
        assert!(registry.sessions().await.is_empty());
        assert_eq!(0, std::fs::read_dir(dir.path()).unwrap().count());

        transcoder.fail.store(false, Ordering::SeqCst);
        let (_, created) = registry.get_or_create("rtsp://cam1").await.unwrap();
        assert!(created);
        assert_eq!(2, transcoder.starts.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiter_shares_failed_start() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder {
            delay: Duration::from_millis(100),
            fail_times: AtomicUsize::new(1),
            ..Default::default()
        });
        let registry = Arc::new(registry(&dir, transcoder.clone()));

        let first = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_create("rtsp://cam1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_create("rtsp://cam1").await })
        };
        tokio::time::sleep(Duration::from_millis(130)).await;

        assert!(matches!(
            first.await.unwrap(),
            Err(AppError::InternalServerError(_))
        ));
        assert!(matches!(
            waiter.await.unwrap(),
            Err(AppError::InternalServerError(_))
        ));
        assert_eq!(1, transcoder.starts.load(Ordering::SeqCst));
        assert!(registry.sessions().await.is_empty());

        let (url, created) = registry.get_or_create("rtsp://cam1").await.unwrap();
        assert!(created);
        assert_eq!(2, transcoder.starts.load(Ordering::SeqCst));
        assert_eq!(1, transcoder.live.load(Ordering::SeqCst));
        assert!(registry.lookup_by_token(&token_of(&url)).await.is_some());
        assert_eq!(1, std::fs::read_dir(dir.path()).unwrap().count());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_returned_url_resolves_by_token() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder::default());
        let registry = Arc::new(registry(&dir, transcoder.clone()));

        for round in 0..200 {
            let source_url = format!("rtsp://cam{round}");
            let mut handles = Vec::new();
            for _ in 0..2 {
                let registry = registry.clone();
                let source_url = source_url.clone();
                handles.push(tokio::spawn(async move {
                    let (url, _) = registry.get_or_create(&source_url).await.unwrap();
                    registry.lookup_by_token(&token_of(&url)).await.is_some()
                }));
            }
            for handle in handles {
                assert!(handle.await.unwrap(), "round {round}");
            }
        }
        assert_eq!(200, transcoder.starts.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_terminate_is_isolated_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder::default());
        let registry = registry(&dir, transcoder.clone());

        let (url1, _) = registry.get_or_create("rtsp://cam1").await.unwrap();
        let (url2, _) = registry.get_or_create("rtsp://cam2").await.unwrap();
        let s1 = registry.lookup_by_token(&token_of(&url1)).await.unwrap();
        let s2 = registry.lookup_by_token(&token_of(&url2)).await.unwrap();
        assert_eq!(2, transcoder.live.load(Ordering::SeqCst));

        assert!(registry.terminate("rtsp://cam1").await.unwrap());
        assert!(!s1.output_dir.exists());
        assert!(registry.lookup_by_token(&token_of(&url1)).await.is_none());
        assert_eq!(1, transcoder.live.load(Ordering::SeqCst));

        assert!(s2.output_dir.is_dir());
        assert!(registry.lookup_by_token(&token_of(&url2)).await.is_some());

        assert!(!registry.terminate("rtsp://cam1").await.unwrap());
        assert!(!registry.terminate("rtsp://unknown").await.unwrap());

        let (url3, created) = registry.get_or_create("rtsp://cam1").await.unwrap();
        assert!(created);
        assert_ne!(url1, url3);
    }

    #[tokio::test]
    async fn test_lookup_requires_exact_token() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder::default());
        let registry = registry(&dir, transcoder);

        let (url, _) = registry.get_or_create("rtsp://cam1").await.unwrap();
        let token = token_of(&url);
        assert!(registry.lookup_by_token(&token).await.is_some());
        assert!(registry.lookup_by_token(&token.to_uppercase()).await.is_none());
        assert!(registry.lookup_by_token(&token[1..]).await.is_none());
        assert!(registry.lookup_by_token("").await.is_none());
    }

    #[tokio::test]
    async fn test_reap_idle() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder::default());
        let registry = registry(&dir, transcoder.clone());

        registry.get_or_create("rtsp://idle").await.unwrap();
        registry.get_or_create("rtsp://busy").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        registry.get_or_create("rtsp://busy").await.unwrap();

        let reaped = registry.reap_idle(Duration::from_millis(50)).await;
        assert_eq!(vec!["rtsp://idle".to_string()], reaped);
        assert_eq!(1, transcoder.live.load(Ordering::SeqCst));
        assert_eq!(1, registry.sessions().await.len());
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(MockTranscoder::default());
        let registry = registry(&dir, transcoder.clone());

        registry.get_or_create("rtsp://cam1").await.unwrap();
        registry.get_or_create("rtsp://cam2").await.unwrap();
        registry.shutdown().await;

        assert_eq!(0, transcoder.live.load(Ordering::SeqCst));
        assert!(registry.sessions().await.is_empty());
        assert_eq!(0, std::fs::read_dir(dir.path()).unwrap().count());
    }
}
