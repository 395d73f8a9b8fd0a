use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{JobStatus, Source};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: u64,
    pub scopes: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub rtsp_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StartStream {
    pub v2_stream_id: Uuid,
    pub producers: Producers,
    pub room_id: String,
    pub stream: StreamStatus,
    pub reconnect: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Producers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StreamStatus {
    pub status: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StopStream {
    pub stopped: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Stream {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<Producer>,
    pub consumer_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Producer {
    pub id: Uuid,
    pub sfu_id: String,
    pub ssrc: u32,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StreamHealth {
    pub is_healthy: bool,
    pub bitrate_kbps: f64,
    pub fps: f64,
    pub packet_loss: f64,
    pub jitter_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConsumerAttach {
    pub consumer_id: Uuid,
    pub transport: serde_json::Value,
    pub rtp_parameters: serde_json::Value,
    pub producer_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Consumer {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub client_id: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConsumerList {
    pub consumers: Vec<Consumer>,
    pub active_consumers: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Snapshot {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Bookmark {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub center_timestamp: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: u32,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub tags: Vec<String>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Pagination {
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorEnvelope {
    pub error: String,
    pub error_description: String,
    pub status_code: u16,
    #[serde(default)]
    pub details: serde_json::Value,
    pub request_id: String,
    pub timestamp: String,
}
