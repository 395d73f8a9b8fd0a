use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::consumer::ConsumerRegistry;
use crate::db::service::devices::DevicesService;
use crate::db::service::streams::StreamsService;
use crate::db::DatabaseService;
use crate::error::AppError;
use crate::result::Result;
use crate::sfu::{SfuClient, SfuEvent};
use crate::stream::coordinator::{
    Coordinator, HandleMap, HandleStatus, StreamCommand, StreamDeps, StreamEvent, StreamHandle,
    StreamMsg,
};
use crate::stream::ports::PortBroker;
use crate::stream::state::StreamState;

const MAILBOX_DEPTH: usize = 32;
const STOP_DEADLINE: Duration = Duration::from_secs(10);

/// Top-level facade over the per-stream coordinators.
///
/// The handle map is the compare-and-insert point that stops two concurrent
/// starts of one device; each entry owns exactly one coordinator task.
pub struct StreamManager {
    config: Arc<Config>,
    db: DatabaseService,
    sfu: SfuClient,
    ports: Arc<PortBroker>,
    consumers: Arc<ConsumerRegistry>,
    handles: HandleMap,
}

impl StreamManager {
    pub async fn new(
        config: Arc<Config>,
        db: DatabaseService,
        sfu: SfuClient,
        consumers: Arc<ConsumerRegistry>,
    ) -> Arc<Self> {
        // Rows left non-terminal by a dead process have no coordinator now.
        match StreamsService::stop_all_non_terminal(db.conn(), "gateway restarted").await {
            Ok(0) => {}
            Ok(n) => warn!("recovered {} orphaned stream rows as STOPPED", n),
            Err(e) => warn!("orphan stream recovery failed: {}", e),
        }

        let manager = Arc::new(Self {
            ports: Arc::new(PortBroker::new(config.rtp.clone())),
            config,
            db,
            sfu,
            consumers,
            handles: Arc::new(RwLock::new(HashMap::new())),
        });

        tokio::spawn(Self::sfu_watch(manager.clone()));
        tokio::spawn(Self::stopped_ttl_tick(manager.clone()));
        manager
    }

    pub fn handles(&self) -> HandleMap {
        self.handles.clone()
    }

    pub async fn handle_for_stream(&self, stream_id: Uuid) -> Option<StreamHandle> {
        self.handles.read().await.get(&stream_id).cloned()
    }

    /// A dropped SFU channel fails every pending call; the coordinators learn
    /// about it here and mark their streams ERROR.
    async fn sfu_watch(manager: Arc<Self>) {
        let mut events = manager.sfu.subscribe_events();
        loop {
            match events.recv().await {
                Ok(SfuEvent::Disconnected) => {
                    let handles: Vec<StreamHandle> =
                        manager.handles.read().await.values().cloned().collect();
                    warn!("sfu lost; notifying {} stream coordinators", handles.len());
                    for handle in handles {
                        handle.send_event(StreamEvent::SfuLost).await;
                    }
                }
                Ok(SfuEvent::ProducerClosed { producer_id }) => {
                    let handles: Vec<StreamHandle> =
                        manager.handles.read().await.values().cloned().collect();
                    for handle in handles {
                        let matches = handle
                            .status
                            .read()
                            .await
                            .producer_sfu_id
                            .as_deref()
                            .is_some_and(|id| id == producer_id);
                        if matches {
                            handle.send_event(StreamEvent::ProducerClosed).await;
                        }
                    }
                }
                Ok(SfuEvent::Connected) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn stopped_ttl_tick(manager: Arc<Self>) {
        let ttl = manager.config.stream.stopped_ttl_secs;
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            let cutoff = Utc::now() - chrono::Duration::seconds(ttl as i64);
            match StreamsService::close_stopped_older_than(manager.db.conn(), cutoff).await {
                Ok(0) => {}
                Ok(n) => info!("aged {} STOPPED streams to CLOSED", n),
                Err(e) => warn!("stopped-ttl sweep failed: {}", e),
            }
        }
    }

    /// Start a device's stream, or report the one already running.
    pub async fn start_stream(&self, device_id: Uuid) -> Result<api::response::StartStream> {
        let device = DevicesService::get(self.db.conn(), device_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("device {} not found", device_id)))?;

        // Compare-and-insert: the write lock is the only place a second start
        // of the same device can be refused without racing.
        let mut handles = self.handles.write().await;
        let existing = handles
            .values()
            .find(|handle| handle.device_id == device_id)
            .cloned();
        if let Some(handle) = existing {
            drop(handles);
            let status = handle.status.read().await;
            info!(
                "start-stream for device {} matched running stream {} ({})",
                device_id, handle.stream_id, status.state
            );
            return Ok(api::response::StartStream {
                v2_stream_id: handle.stream_id,
                producers: api::response::Producers {
                    video: status.producer_sfu_id.clone(),
                },
                room_id: device_id.to_string(),
                stream: api::response::StreamStatus {
                    status: status.state.to_string(),
                },
                reconnect: true,
            });
        }

        let row = StreamsService::create(
            self.db.conn(),
            device_id,
            serde_json::json!({
                "codec": "h264",
                "profile_level_id": "42e01f",
                "packetization_mode": 1,
                "fps": 30,
            }),
        )
        .await?;

        let (tx, rx) = mpsc::channel::<StreamMsg>(MAILBOX_DEPTH);
        let status = Arc::new(RwLock::new(HandleStatus::default()));
        let handle = StreamHandle {
            stream_id: row.id,
            device_id,
            tx: tx.clone(),
            status: status.clone(),
        };
        handles.insert(row.id, handle);
        drop(handles);

        let deps = StreamDeps {
            config: self.config.clone(),
            db: self.db.clone(),
            sfu: self.sfu.clone(),
            ports: self.ports.clone(),
            consumers: self.consumers.clone(),
            handles: self.handles.clone(),
        };
        let coordinator =
            Coordinator::new(row.id, device_id, device.rtsp_url.clone(), deps, status.clone(), tx);
        let (reply_tx, reply_rx) = oneshot::channel();
        tokio::spawn(coordinator.run(rx, reply_tx));

        let deadline = Duration::from_secs(self.config.stream.start_timeout_secs);
        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(Ok(info))) => Ok(api::response::StartStream {
                v2_stream_id: info.stream_id,
                producers: api::response::Producers {
                    video: Some(info.producer_sfu_id),
                },
                room_id: info.room_id,
                stream: api::response::StreamStatus {
                    status: StreamState::Live.to_string(),
                },
                reconnect: false,
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(AppError::InternalServerError(anyhow::anyhow!(
                "stream coordinator exited before answering"
            ))),
            Err(_) => {
                let last_error = status.read().await.last_error.clone();
                Err(AppError::TranscoderError(last_error.unwrap_or_else(|| {
                    format!("stream did not reach LIVE within {:?}", deadline)
                })))
            }
        }
    }

    /// Stop whatever the device is running. Idempotent: nothing running is
    /// still success.
    pub async fn stop_stream(&self, device_id: Uuid) -> Result<()> {
        let handle = {
            let handles = self.handles.read().await;
            handles
                .values()
                .find(|handle| handle.device_id == device_id)
                .cloned()
        };

        if let Some(handle) = handle {
            let (reply_tx, reply_rx) = oneshot::channel();
            if handle
                .tx
                .send(StreamMsg::Command(StreamCommand::Stop { reply: reply_tx }))
                .await
                .is_ok()
                && tokio::time::timeout(STOP_DEADLINE, reply_rx).await.is_err()
            {
                warn!("stream {} ignored stop for {:?}", handle.stream_id, STOP_DEADLINE);
            }
        }

        // Rows without a live coordinator (crash leftovers) stop here too.
        StreamsService::stop_non_terminal_for_device(self.db.conn(), device_id).await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        let handles: Vec<StreamHandle> = self.handles.read().await.values().cloned().collect();
        info!("shutting down {} stream coordinators", handles.len());
        for handle in handles {
            let (reply_tx, reply_rx) = oneshot::channel();
            if handle
                .tx
                .send(StreamMsg::Command(StreamCommand::Stop { reply: reply_tx }))
                .await
                .is_ok()
            {
                let _ = tokio::time::timeout(STOP_DEADLINE, reply_rx).await;
            }
        }
    }
}
