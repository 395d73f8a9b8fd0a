pub const METRICS: &str = "/metrics";
pub const HEALTH_LIVE: &str = "/v2/health/live";
pub const HEALTH_READY: &str = "/v2/health/ready";

pub const TOKEN: &str = "/v2/auth/token";
pub const TOKEN_REFRESH: &str = "/v2/auth/token/refresh";
pub const TOKEN_REVOKE: &str = "/v2/auth/token/revoke";

pub fn devices(device: &str) -> String {
    if device.is_empty() {
        "/v1/devices".to_string()
    } else {
        format!("/v1/devices/{}", device)
    }
}

pub fn start_stream(device: &str) -> String {
    format!("/v1/devices/{}/start-stream", device)
}

pub fn stop_stream(device: &str) -> String {
    format!("/v1/devices/{}/stop-stream", device)
}

pub fn streams(stream: &str) -> String {
    if stream.is_empty() {
        "/v2/streams".to_string()
    } else {
        format!("/v2/streams/{}", stream)
    }
}

pub fn stream_health(stream: &str) -> String {
    format!("/v2/streams/{}/health", stream)
}

pub fn router_capabilities(stream: &str) -> String {
    format!("/v2/streams/{}/router-capabilities", stream)
}

pub fn consume(stream: &str) -> String {
    format!("/v2/streams/{}/consume", stream)
}

pub fn consumers(stream: &str) -> String {
    format!("/v2/streams/{}/consumers", stream)
}

pub fn consumer(stream: &str, consumer: &str) -> String {
    format!("/v2/streams/{}/consumers/{}", stream, consumer)
}

pub fn consumer_connect(stream: &str, consumer: &str) -> String {
    format!("/v2/streams/{}/consumers/{}/connect", stream, consumer)
}

pub fn hls_playlist(stream: &str) -> String {
    format!("/v2/streams/{}/hls/playlist.m3u8", stream)
}

pub fn hls_segment(stream: &str, segment: &str) -> String {
    format!("/v2/streams/{}/hls/{}", stream, segment)
}

pub fn stream_snapshots(stream: &str) -> String {
    format!("/v2/streams/{}/snapshots", stream)
}

pub fn stream_bookmarks(stream: &str) -> String {
    format!("/v2/streams/{}/bookmarks", stream)
}

pub fn snapshots(snapshot: &str) -> String {
    if snapshot.is_empty() {
        "/v2/snapshots".to_string()
    } else {
        format!("/v2/snapshots/{}", snapshot)
    }
}

pub fn snapshot_image(snapshot: &str) -> String {
    format!("/v2/snapshots/{}/image", snapshot)
}

pub fn bookmarks(bookmark: &str) -> String {
    if bookmark.is_empty() {
        "/v2/bookmarks".to_string()
    } else {
        format!("/v2/bookmarks/{}", bookmark)
    }
}

pub fn bookmark_video(bookmark: &str) -> String {
    format!("/v2/bookmarks/{}/video", bookmark)
}

pub fn bookmark_thumbnail(bookmark: &str) -> String {
    format!("/v2/bookmarks/{}/thumbnail", bookmark)
}
