use std::path::{Path, PathBuf};
use std::{env, fs, net::SocketAddr, str::FromStr};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub stream: Stream,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Http {
    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_true")]
    pub cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    /// Transcoder executable, resolved through `PATH` when not absolute.
    #[serde(default = "default_program")]
    pub program: String,
    /// Every session gets its own directory below this one.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Prefix of the `hls_url` handed back to clients.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_playlist")]
    pub playlist: String,
    /// Milliseconds without access before a session is reaped, 0 disables reaping.
    #[serde(default)]
    pub idle_timeout: u64,
    #[serde(default)]
    pub check_tick_time: CheckIdleTickTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckIdleTickTime(pub u64);

impl Default for CheckIdleTickTime {
    fn default() -> Self {
        CheckIdleTickTime(10 * 1000)
    }
}

fn default_true() -> bool {
    true
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from_str(&format!(
        "0.0.0.0:{}",
        env::var("PORT").unwrap_or(String::from("5000"))
    ))
    .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 5000)))
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

fn default_database_url() -> String {
    env::var("DATABASE_URL").unwrap_or(String::from("sqlite://overlays.db?mode=rwc"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    8
}

fn default_program() -> String {
    String::from("ffmpeg")
}

fn default_output_dir() -> PathBuf {
    env::temp_dir().join("overlay-hls")
}

fn default_public_url() -> String {
    env::var("PUBLIC_URL").unwrap_or(String::from("http://localhost:5000"))
}

fn default_playlist() -> String {
    String::from("stream.m3u8")
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
            cors: default_true(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self {
            program: default_program(),
            output_dir: default_output_dir(),
            public_url: default_public_url(),
            playlist: default_playlist(),
            idle_timeout: 0,
            check_tick_time: Default::default(),
        }
    }
}

impl Config {
    /// Loads `path`, then `overlay-hls.toml`, then `/etc/overlay-hls/overlay-hls.toml`.
    /// No file at all yields the defaults.
    pub fn parse(path: Option<String>) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.unwrap_or(String::from("overlay-hls.toml")))
            .or(fs::read_to_string("/etc/overlay-hls/overlay-hls.toml"))
            .unwrap_or_default();
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml::from_str(content).context("config parse error")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let playlist = Path::new(&self.stream.playlist);
        if self.stream.playlist.is_empty()
            || playlist.file_name() != Some(playlist.as_os_str())
        {
            return Err(anyhow!(
                "stream.playlist must be a bare file name, got '{}'",
                self.stream.playlist
            ));
        }

        if self.stream.public_url.trim().is_empty() {
            return Err(anyhow!("stream.public_url must not be empty"));
        }

        if self.stream.idle_timeout > 0 && self.stream.check_tick_time.0 == 0 {
            return Err(anyhow!(
                "stream.check_tick_time must be positive when idle_timeout is set"
            ));
        }

        Ok(())
    }
}
