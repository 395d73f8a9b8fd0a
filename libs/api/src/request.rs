use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Source;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Token {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TokenRefresh {
    pub refresh_token: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TokenRevoke {
    pub refresh_token: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CreateDevice {
    pub name: String,
    pub rtsp_url: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UpdateDevice {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rtsp_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct StreamQuery {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub camera_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AttachConsumer {
    pub client_id: String,
    pub rtp_capabilities: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConnectConsumer {
    pub dtls_parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CreateSnapshot {
    pub source: Source,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CreateBookmark {
    pub source: Source,
    #[serde(default)]
    pub center_timestamp: Option<DateTime<Utc>>,
    pub before_seconds: u32,
    pub after_seconds: u32,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UpdateBookmark {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub event_type: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MediaQuery {
    #[serde(default)]
    pub stream_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}
