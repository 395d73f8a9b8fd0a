use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control-plane calls understood by the SFU worker.
///
/// The wire envelope is `{"id": <u64>, "method": "...", "payload": {...}}`;
/// replies echo the id and carry either `data` or `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "payload", rename_all = "camelCase")]
pub enum SfuRequest {
    #[serde(rename_all = "camelCase")]
    GetRouterRtpCapabilities { room_id: String },
    #[serde(rename_all = "camelCase")]
    CreatePlainTransport {
        room_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    #[serde(rename_all = "camelCase")]
    ConnectPlainTransport {
        transport_id: String,
        ip: String,
        port: u16,
    },
    #[serde(rename_all = "camelCase")]
    CreateProducer {
        transport_id: String,
        kind: String,
        rtp_parameters: Value,
    },
    #[serde(rename_all = "camelCase")]
    CreateWebrtcTransport {
        room_id: String,
        /// Public address advertised in ICE candidates, when the gateway
        /// fronts a NAT.
        #[serde(skip_serializing_if = "Option::is_none")]
        announced_ip: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ConnectWebrtcTransport {
        transport_id: String,
        dtls_parameters: Value,
    },
    #[serde(rename_all = "camelCase")]
    CreateConsumer {
        transport_id: String,
        producer_id: String,
        rtp_capabilities: Value,
    },
    #[serde(rename_all = "camelCase")]
    CloseProducer { producer_id: String },
    #[serde(rename_all = "camelCase")]
    CloseTransport { transport_id: String },
    #[serde(rename_all = "camelCase")]
    CloseTransportsForRoom { room_id: String },
    #[serde(rename_all = "camelCase")]
    GetProducerStats { producer_id: String },
    #[serde(rename_all = "camelCase")]
    GetAllProducerStats {},
}

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: SfuRequest,
}

/// Inbound frames: correlated replies and uncorrelated notifications.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainTransportInfo {
    pub id: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub rtcp_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub id: String,
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebrtcTransportInfo {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    pub id: String,
    pub producer_id: String,
    pub kind: String,
    pub rtp_parameters: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerStats {
    #[serde(default)]
    pub packets_received: u64,
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(default)]
    pub bitrate: f64,
    #[serde(default)]
    pub fraction_lost: f64,
    #[serde(default)]
    pub jitter: f64,
    #[serde(default)]
    pub frames_per_second: f64,
}

/// RTP parameters handed to create-producer: the captured SSRC is mandatory,
/// the SFU cannot sniff it on a non-comedia plain transport.
pub fn video_rtp_parameters(ssrc: u32, payload_type: u8) -> Value {
    serde_json::json!({
        "codecs": [{
            "mimeType": "video/H264",
            "payloadType": payload_type,
            "clockRate": 90000,
            "parameters": {
                "packetization-mode": 1,
                "profile-level-id": "42e01f",
                "level-asymmetry-allowed": 1,
            },
            "rtcpFeedback": [
                { "type": "nack" },
                { "type": "nack", "parameter": "pli" },
                { "type": "ccm", "parameter": "fir" },
                { "type": "goog-remb" },
            ],
        }],
        "encodings": [{ "ssrc": ssrc }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_shape() {
        let env = Envelope {
            id: 7,
            request: SfuRequest::CreatePlainTransport {
                room_id: "cam-1".into(),
                port: Some(20104),
            },
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "createPlainTransport");
        assert_eq!(value["payload"]["roomId"], "cam-1");
        assert_eq!(value["payload"]["port"], 20104);
    }

    #[test]
    fn optional_port_is_omitted() {
        let env = Envelope {
            id: 1,
            request: SfuRequest::CreatePlainTransport {
                room_id: "cam-1".into(),
                port: None,
            },
        };
        let value = serde_json::to_value(&env).unwrap();
        assert!(value["payload"].get("port").is_none());
    }

    #[test]
    fn reply_frame_parses() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"id": 3, "data": {"id": "t1", "ip": "127.0.0.1", "port": 20104}}"#,
        )
        .unwrap();
        assert_eq!(frame.id, Some(3));
        assert!(frame.error.is_none());
        let info: PlainTransportInfo = serde_json::from_value(frame.data).unwrap();
        assert_eq!(info.port, 20104);
    }

    #[test]
    fn notification_frame_parses() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"type": "producerClosed", "data": {"producerId": "p1"}}"#,
        )
        .unwrap();
        assert_eq!(frame.id, None);
        assert_eq!(frame.kind.as_deref(), Some("producerClosed"));
    }

    #[test]
    fn rtp_parameters_carry_ssrc() {
        let params = video_rtp_parameters(0xdeadbeef, 96);
        assert_eq!(params["encodings"][0]["ssrc"], 0xdeadbeefu32);
        assert_eq!(params["codecs"][0]["parameters"]["profile-level-id"], "42e01f");
    }
}
