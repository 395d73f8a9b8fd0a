use std::net::IpAddr;
use std::path::PathBuf;
use std::{env, fs};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub sfu: Sfu,
    #[serde(default)]
    pub rtp: RtpPorts,
    #[serde(default)]
    pub stream: StreamPolicy,
    #[serde(default)]
    pub recording: Recording,
    #[serde(default)]
    pub extraction: Extraction,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Http {
    #[serde(default = "default_http_listen")]
    pub listen: String,
    #[serde(default)]
    pub cors: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Auth {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
    /// API clients seeded at boot.
    #[serde(default)]
    pub clients: Vec<BootstrapClient>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BootstrapClient {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Database {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sfu {
    #[serde(default = "default_sfu_url")]
    pub url: String,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_max_pending_calls")]
    pub max_pending_calls: usize,
    /// IP announced to WebRTC peers in ICE candidates.
    #[serde(default)]
    pub announced_ip: Option<IpAddr>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RtpPorts {
    #[serde(default = "default_rtp_min")]
    pub min: u16,
    #[serde(default = "default_rtp_max")]
    pub max: u16,
    #[serde(default = "default_rtp_host")]
    pub host: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamPolicy {
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_ssrc_timeout")]
    pub ssrc_timeout_secs: u64,
    #[serde(default = "default_readiness_window")]
    pub readiness_window_secs: u64,
    #[serde(default = "default_restart_attempts")]
    pub restart_max_attempts: u32,
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff_secs: u64,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: u32,
    #[serde(default = "default_pending_consumer_ttl")]
    pub pending_consumer_ttl_secs: u64,
    #[serde(default = "default_stopped_ttl")]
    pub stopped_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Recording {
    #[serde(default = "default_recording_root")]
    pub root: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Extraction {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_snapshots_root")]
    pub snapshots_root: PathBuf,
    #[serde(default = "default_bookmarks_root")]
    pub bookmarks_root: PathBuf,
    #[serde(default = "default_snapshot_live_deadline")]
    pub snapshot_live_deadline_secs: u64,
    #[serde(default = "default_snapshot_historical_deadline")]
    pub snapshot_historical_deadline_secs: u64,
    #[serde(default = "default_clip_deadline")]
    pub clip_deadline_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_http_listen() -> String {
    format!("[::]:{}", env::var("PORT").unwrap_or(String::from("8550")))
}

fn default_jwt_secret() -> String {
    env::var("JWT_SECRET").unwrap_or_else(|_| String::from("change-me"))
}

fn default_access_ttl() -> u64 {
    3600
}

fn default_refresh_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_database_url() -> String {
    env::var("DATABASE_URL").unwrap_or_else(|_| String::from("sqlite://data/camgate.db"))
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_sfu_url() -> String {
    env::var("SFU_URL").unwrap_or_else(|_| String::from("ws://127.0.0.1:3001"))
}

fn default_call_timeout_ms() -> u64 {
    5000
}

fn default_max_pending_calls() -> usize {
    256
}

fn default_rtp_min() -> u16 {
    20100
}

fn default_rtp_max() -> u16 {
    20999
}

fn default_rtp_host() -> String {
    String::from("127.0.0.1")
}

fn default_start_timeout() -> u64 {
    30
}

fn default_ssrc_timeout() -> u64 {
    8
}

fn default_readiness_window() -> u64 {
    10
}

fn default_restart_attempts() -> u32 {
    3
}

fn default_restart_backoff() -> u64 {
    5
}

fn default_health_interval() -> u64 {
    10
}

fn default_stale_threshold() -> u32 {
    3
}

fn default_pending_consumer_ttl() -> u64 {
    30
}

fn default_stopped_ttl() -> u64 {
    3600
}

fn default_recording_root() -> PathBuf {
    PathBuf::from("/recordings")
}

fn default_retention_days() -> u32 {
    7
}

fn default_segment_seconds() -> u32 {
    6
}

fn default_prune_interval() -> u64 {
    3600
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_snapshots_root() -> PathBuf {
    PathBuf::from("/snapshots")
}

fn default_bookmarks_root() -> PathBuf {
    PathBuf::from("/bookmarks")
}

fn default_snapshot_live_deadline() -> u64 {
    5
}

fn default_snapshot_historical_deadline() -> u64 {
    10
}

fn default_clip_deadline() -> u64 {
    20
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

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
            cors: Default::default(),
        }
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            clients: Vec::new(),
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

impl Default for Sfu {
    fn default() -> Self {
        Self {
            url: default_sfu_url(),
            call_timeout_ms: default_call_timeout_ms(),
            max_pending_calls: default_max_pending_calls(),
            announced_ip: None,
        }
    }
}

impl Default for RtpPorts {
    fn default() -> Self {
        Self {
            min: default_rtp_min(),
            max: default_rtp_max(),
            host: default_rtp_host(),
        }
    }
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            start_timeout_secs: default_start_timeout(),
            ssrc_timeout_secs: default_ssrc_timeout(),
            readiness_window_secs: default_readiness_window(),
            restart_max_attempts: default_restart_attempts(),
            restart_backoff_secs: default_restart_backoff(),
            health_interval_secs: default_health_interval(),
            stale_threshold: default_stale_threshold(),
            pending_consumer_ttl_secs: default_pending_consumer_ttl(),
            stopped_ttl_secs: default_stopped_ttl(),
        }
    }
}

impl Default for Recording {
    fn default() -> Self {
        Self {
            root: default_recording_root(),
            retention_days: default_retention_days(),
            segment_seconds: default_segment_seconds(),
            prune_interval_secs: default_prune_interval(),
        }
    }
}

impl Default for Extraction {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            snapshots_root: default_snapshots_root(),
            bookmarks_root: default_bookmarks_root(),
            snapshot_live_deadline_secs: default_snapshot_live_deadline(),
            snapshot_historical_deadline_secs: default_snapshot_historical_deadline(),
            clip_deadline_secs: default_clip_deadline(),
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

impl Config {
    pub fn parse(path: Option<String>) -> Self {
        let result = fs::read_to_string(path.unwrap_or(String::from("camgate.toml")))
            .or(fs::read_to_string("/etc/camgate/camgate.toml"))
            .unwrap_or("".to_string());
        let cfg: Self = toml::from_str(result.as_str()).expect("config parse error");
        match cfg.validate() {
            Ok(_) => cfg,
            Err(err) => panic!("config validate [{}]", err),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rtp.min >= self.rtp.max {
            anyhow::bail!("rtp port range is empty: {}..{}", self.rtp.min, self.rtp.max);
        }
        if self.extraction.workers == 0 {
            anyhow::bail!("extraction.workers must be at least 1");
        }
        if self.recording.segment_seconds == 0 {
            anyhow::bail!("recording.segment_seconds must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.rtp.min, 20100);
        assert_eq!(cfg.recording.retention_days, 7);
        assert_eq!(cfg.stream.restart_max_attempts, 3);
    }

    #[test]
    fn rejects_empty_port_range() {
        let mut cfg = Config::default();
        cfg.rtp.min = 30000;
        cfg.rtp.max = 30000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [rtp]
            min = 40000
            max = 40999

            [recording]
            retention_days = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rtp.min, 40000);
        assert_eq!(cfg.recording.retention_days, 3);
        assert_eq!(cfg.recording.segment_seconds, 6);
    }
}
