use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::Sfu as SfuConfig;

pub mod message;

use message::{
    ConsumerInfo, Envelope, InboundFrame, PlainTransportInfo, ProducerInfo, ProducerStats,
    SfuRequest, WebrtcTransportInfo,
};

#[derive(Debug)]
pub enum SfuError {
    Unavailable(String),
    Disconnected,
    Overloaded,
    Timeout,
    Remote(String),
    Codec(String),
}

impl std::fmt::Display for SfuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SfuError::Unavailable(msg) => write!(f, "sfu unavailable: {}", msg),
            SfuError::Disconnected => write!(f, "sfu control channel dropped"),
            SfuError::Overloaded => write!(f, "sfu pending-call table is full"),
            SfuError::Timeout => write!(f, "sfu call timed out"),
            SfuError::Remote(msg) => write!(f, "sfu error: {}", msg),
            SfuError::Codec(msg) => write!(f, "sfu reply decode: {}", msg),
        }
    }
}

impl std::error::Error for SfuError {}

#[derive(Debug, Clone)]
pub enum SfuEvent {
    Connected,
    Disconnected,
    ProducerClosed { producer_id: String },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, SfuError>>>>>;

/// Client side of the SFU control channel.
///
/// One writer task owns the socket sink; calls enqueue an envelope and park a
/// oneshot in the pending table keyed by correlation id. The reader task
/// resolves them and forwards uncorrelated frames as events.
#[derive(Clone)]
pub struct SfuClient {
    config: SfuConfig,
    outbound: mpsc::Sender<String>,
    pending: Pending,
    seq: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<SfuEvent>,
}

impl SfuClient {
    pub fn new(config: SfuConfig) -> Self {
        let (outbound, outbound_rx) = mpsc::channel::<String>(64);
        let (events, _) = broadcast::channel(16);
        let client = Self {
            config,
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            seq: Arc::new(AtomicU64::new(1)),
            connected: Arc::new(AtomicBool::new(false)),
            events,
        };
        tokio::spawn(client.clone().connection_loop(outbound_rx));
        client
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SfuEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn connection_loop(self, mut outbound_rx: mpsc::Receiver<String>) {
        loop {
            let stream = match connect_async(self.config.url.as_str()).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("sfu connect to {} failed: {}", self.config.url, e);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };
            info!("sfu control channel connected: {}", self.config.url);
            self.connected.store(true, Ordering::Relaxed);
            let _ = self.events.send(SfuEvent::Connected);

            let (mut sink, mut source) = stream.split();
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => {
                        match outgoing {
                            Some(text) => {
                                if let Err(e) = sink.send(Message::Text(text.into())).await {
                                    error!("sfu send failed: {}", e);
                                    break;
                                }
                            }
                            None => return,
                        }
                    }
                    incoming = source.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                            Some(Ok(Message::Close(_))) | None => {
                                warn!("sfu control channel closed by peer");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("sfu read failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }

            self.connected.store(false, Ordering::Relaxed);
            self.fail_all_pending();
            let _ = self.events.send(SfuEvent::Disconnected);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    fn dispatch(&self, text: &str) {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("sfu sent undecodable frame: {}", e);
                return;
            }
        };
        match frame.id {
            Some(id) => {
                let waiter = self.pending.lock().unwrap().remove(&id);
                match waiter {
                    Some(tx) => {
                        let result = match frame.error {
                            Some(err) => Err(SfuError::Remote(err)),
                            None => Ok(frame.data),
                        };
                        let _ = tx.send(result);
                    }
                    None => warn!("sfu reply with unknown correlation id {}, dropped", id),
                }
            }
            None => {
                if frame.kind.as_deref() == Some("producerClosed") {
                    if let Some(producer_id) =
                        frame.data.get("producerId").and_then(|v| v.as_str())
                    {
                        let _ = self.events.send(SfuEvent::ProducerClosed {
                            producer_id: producer_id.to_string(),
                        });
                    }
                } else {
                    debug!("sfu notification: {:?}", frame.kind);
                }
            }
        }
    }

    fn fail_all_pending(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(SfuError::Disconnected));
        }
    }

    pub async fn call(&self, request: SfuRequest) -> Result<Value, SfuError> {
        if !self.is_connected() {
            return Err(SfuError::Unavailable(self.config.url.clone()));
        }

        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            if pending.len() >= self.config.max_pending_calls {
                return Err(SfuError::Overloaded);
            }
            pending.insert(id, tx);
        }

        let text = serde_json::to_string(&Envelope { id, request })
            .map_err(|e| SfuError::Codec(e.to_string()))?;
        if self.outbound.send(text).await.is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(SfuError::Disconnected);
        }

        let deadline = Duration::from_millis(self.config.call_timeout_ms);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SfuError::Disconnected),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(SfuError::Timeout)
            }
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, SfuError> {
        serde_json::from_value(value).map_err(|e| SfuError::Codec(e.to_string()))
    }

    pub async fn router_rtp_capabilities(&self, room_id: &str) -> Result<Value, SfuError> {
        self.call(SfuRequest::GetRouterRtpCapabilities {
            room_id: room_id.to_string(),
        })
        .await
    }

    pub async fn create_plain_transport(
        &self,
        room_id: &str,
        port: Option<u16>,
    ) -> Result<PlainTransportInfo, SfuError> {
        let data = self
            .call(SfuRequest::CreatePlainTransport {
                room_id: room_id.to_string(),
                port,
            })
            .await?;
        Self::decode(data)
    }

    pub async fn connect_plain_transport(
        &self,
        transport_id: &str,
        ip: &str,
        port: u16,
    ) -> Result<(), SfuError> {
        self.call(SfuRequest::ConnectPlainTransport {
            transport_id: transport_id.to_string(),
            ip: ip.to_string(),
            port,
        })
        .await?;
        Ok(())
    }

    pub async fn create_producer(
        &self,
        transport_id: &str,
        kind: &str,
        rtp_parameters: Value,
    ) -> Result<ProducerInfo, SfuError> {
        let data = self
            .call(SfuRequest::CreateProducer {
                transport_id: transport_id.to_string(),
                kind: kind.to_string(),
                rtp_parameters,
            })
            .await?;
        Self::decode(data)
    }

    pub async fn create_webrtc_transport(
        &self,
        room_id: &str,
    ) -> Result<WebrtcTransportInfo, SfuError> {
        let data = self
            .call(SfuRequest::CreateWebrtcTransport {
                room_id: room_id.to_string(),
                announced_ip: self.config.announced_ip.map(|ip| ip.to_string()),
            })
            .await?;
        Self::decode(data)
    }

    pub async fn connect_webrtc_transport(
        &self,
        transport_id: &str,
        dtls_parameters: Value,
    ) -> Result<(), SfuError> {
        self.call(SfuRequest::ConnectWebrtcTransport {
            transport_id: transport_id.to_string(),
            dtls_parameters,
        })
        .await?;
        Ok(())
    }

    pub async fn create_consumer(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: Value,
    ) -> Result<ConsumerInfo, SfuError> {
        let data = self
            .call(SfuRequest::CreateConsumer {
                transport_id: transport_id.to_string(),
                producer_id: producer_id.to_string(),
                rtp_capabilities,
            })
            .await?;
        Self::decode(data)
    }

    pub async fn close_producer(&self, producer_id: &str) -> Result<(), SfuError> {
        self.call(SfuRequest::CloseProducer {
            producer_id: producer_id.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn close_transport(&self, transport_id: &str) -> Result<(), SfuError> {
        self.call(SfuRequest::CloseTransport {
            transport_id: transport_id.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn close_transports_for_room(&self, room_id: &str) -> Result<(), SfuError> {
        self.call(SfuRequest::CloseTransportsForRoom {
            room_id: room_id.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn producer_stats(&self, producer_id: &str) -> Result<ProducerStats, SfuError> {
        let data = self
            .call(SfuRequest::GetProducerStats {
                producer_id: producer_id.to_string(),
            })
            .await?;
        // Stats arrive as an array of report entries; the first is the inbound RTP report.
        match data {
            Value::Array(mut entries) if !entries.is_empty() => Self::decode(entries.remove(0)),
            other => Self::decode(other),
        }
    }

    pub async fn all_producer_stats(&self) -> Result<Value, SfuError> {
        self.call(SfuRequest::GetAllProducerStats {}).await
    }
}
