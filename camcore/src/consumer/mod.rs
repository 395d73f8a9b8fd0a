use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StreamPolicy;
use crate::db::service::consumers::{ConsumersService, STATE_CLOSED, STATE_PENDING};
use crate::db::service::streams::StreamsService;
use crate::db::DatabaseService;
use crate::error::AppError;
use crate::metrics;
use crate::result::Result;
use crate::sfu::{SfuClient, SfuError};
use crate::stream::state::StreamState;

pub const CLOSE_REASON_DETACHED: &str = "detached by client";
pub const CLOSE_REASON_DTLS_FAILED: &str = "DtlsFailed";
pub const CLOSE_REASON_CONNECT_TIMEOUT: &str = "pending connect timeout";

/// Fan-out bookkeeping: N WebRTC consumers sharing one upstream producer.
///
/// The SFU owns the transports; rows in the consumers table are the durable
/// record of who was attached and why they left.
#[derive(Clone)]
pub struct ConsumerRegistry {
    db: DatabaseService,
    sfu: SfuClient,
    policy: StreamPolicy,
}

impl ConsumerRegistry {
    pub fn new(db: DatabaseService, sfu: SfuClient, policy: StreamPolicy) -> Self {
        Self { db, sfu, policy }
    }

    /// Attach requires the parent stream LIVE; no transport is allocated on a
    /// refused attach.
    pub async fn attach(
        &self,
        stream_id: Uuid,
        client_id: &str,
        rtp_capabilities: Value,
    ) -> Result<api::response::ConsumerAttach> {
        let stream = StreamsService::get(self.db.conn(), stream_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("stream {} not found", stream_id)))?;

        let state = StreamState::from_str(&stream.state)
            .map_err(|e| AppError::InternalServerError(anyhow::anyhow!(e)))?;
        if state != StreamState::Live {
            return Err(AppError::StreamNotLive {
                stream_id,
                current_state: stream.state,
            });
        }

        if let Some(existing) =
            ConsumersService::find_open_for_client(self.db.conn(), stream_id, client_id).await?
        {
            return Err(AppError::ConsumerAlreadyExists(format!(
                "client {} already holds consumer {} on this stream",
                client_id, existing.id
            )));
        }

        let producer = StreamsService::active_producer(self.db.conn(), stream_id)
            .await?
            .ok_or_else(|| {
                AppError::InternalServerError(anyhow::anyhow!(
                    "LIVE stream {} has no active producer",
                    stream_id
                ))
            })?;

        let room_id = stream.camera_id.to_string();
        let transport = self
            .sfu
            .create_webrtc_transport(&room_id)
            .await
            .map_err(map_sfu_error)?;

        let consumer = match self
            .sfu
            .create_consumer(&transport.id, &producer.sfu_id, rtp_capabilities)
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                // Half-created transport must not leak.
                let _ = self.sfu.close_transport(&transport.id).await;
                return Err(match &e {
                    SfuError::Remote(msg)
                        if msg.to_ascii_lowercase().contains("consume")
                            || msg.to_ascii_lowercase().contains("capabilit") =>
                    {
                        AppError::IncompatibleCapabilities(msg.clone())
                    }
                    _ => map_sfu_error(e),
                });
            }
        };

        let consumer_id = Uuid::new_v4();
        ConsumersService::create(
            self.db.conn(),
            consumer_id,
            stream_id,
            client_id,
            &transport.id,
            &consumer.id,
        )
        .await?;
        metrics::CONSUMER.inc();
        info!(
            "consumer {} attached to stream {} for client {}",
            consumer_id, stream_id, client_id
        );

        Ok(api::response::ConsumerAttach {
            consumer_id,
            transport: serde_json::json!({
                "id": transport.id,
                "ice_parameters": transport.ice_parameters,
                "ice_candidates": transport.ice_candidates,
                "dtls_parameters": transport.dtls_parameters,
            }),
            rtp_parameters: consumer.rtp_parameters,
            producer_id: producer.sfu_id,
        })
    }

    /// Complete the DTLS handshake for a PENDING consumer.
    pub async fn connect(&self, consumer_id: Uuid, dtls_parameters: Value) -> Result<()> {
        let row = ConsumersService::get(self.db.conn(), consumer_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("consumer {} not found", consumer_id)))?;

        if row.state != STATE_PENDING {
            return Err(AppError::InvalidState {
                from: row.state,
                to: "CONNECTED".to_string(),
            });
        }

        match self
            .sfu
            .connect_webrtc_transport(&row.transport_ref, dtls_parameters)
            .await
        {
            Ok(()) => {
                ConsumersService::mark_connected(self.db.conn(), consumer_id).await?;
                Ok(())
            }
            Err(SfuError::Remote(msg)) => {
                // DTLS failure closes the consumer immediately.
                let _ = self.sfu.close_transport(&row.transport_ref).await;
                ConsumersService::mark_closed(self.db.conn(), consumer_id, CLOSE_REASON_DTLS_FAILED)
                    .await?;
                metrics::CONSUMER.dec();
                Err(AppError::Validation(format!("dtls connect failed: {}", msg)))
            }
            Err(e) => Err(map_sfu_error(e)),
        }
    }

    /// Detach is idempotent: closing a CLOSED consumer is a no-op.
    pub async fn detach(&self, consumer_id: Uuid) -> Result<()> {
        let Some(row) = ConsumersService::get(self.db.conn(), consumer_id).await? else {
            return Ok(());
        };
        if row.state == STATE_CLOSED {
            return Ok(());
        }
        if let Err(e) = self.sfu.close_transport(&row.transport_ref).await {
            warn!("consumer {}: close-transport: {}", consumer_id, e);
        }
        ConsumersService::mark_closed(self.db.conn(), consumer_id, CLOSE_REASON_DETACHED).await?;
        metrics::CONSUMER.dec();
        Ok(())
    }

    /// Called when the parent stream leaves LIVE: every consumer closes.
    pub async fn close_all_for_stream(&self, stream_id: Uuid, reason: &str) -> Result<u64> {
        let rows = ConsumersService::list_for_stream(self.db.conn(), stream_id).await?;
        for row in rows.iter().filter(|r| r.state != STATE_CLOSED) {
            if let Err(e) = self.sfu.close_transport(&row.transport_ref).await {
                warn!("consumer {}: close-transport: {}", row.id, e);
            }
        }
        let closed =
            ConsumersService::close_all_for_stream(self.db.conn(), stream_id, reason).await?;
        metrics::CONSUMER.sub(closed as i64);
        if closed > 0 {
            info!("closed {} consumers of stream {} ({})", closed, stream_id, reason);
        }
        Ok(closed)
    }

    /// Background sweep: PENDING consumers that never connected time out.
    pub async fn run_pending_sweep(self) {
        let ttl = chrono::Duration::seconds(self.policy.pending_consumer_ttl_secs as i64);
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let cutoff = Utc::now() - ttl;
            let stale = match ConsumersService::list_pending_older_than(self.db.conn(), cutoff)
                .await
            {
                Ok(stale) => stale,
                Err(e) => {
                    warn!("pending-consumer sweep query failed: {}", e);
                    continue;
                }
            };
            for row in stale {
                if let Err(e) = self.sfu.close_transport(&row.transport_ref).await {
                    warn!("consumer {}: close-transport: {}", row.id, e);
                }
                if ConsumersService::mark_closed(
                    self.db.conn(),
                    row.id,
                    CLOSE_REASON_CONNECT_TIMEOUT,
                )
                .await
                .is_ok()
                {
                    metrics::CONSUMER.dec();
                    info!("consumer {} timed out before connect", row.id);
                }
            }
        }
    }
}

fn map_sfu_error(e: SfuError) -> AppError {
    match e {
        SfuError::Unavailable(msg) => AppError::SfuUnavailable(msg),
        SfuError::Disconnected => AppError::SfuUnavailable("control channel dropped".to_string()),
        SfuError::Overloaded => AppError::SfuUnavailable("control channel overloaded".to_string()),
        SfuError::Timeout => AppError::SfuUnavailable("control call timed out".to_string()),
        SfuError::Remote(msg) => AppError::InternalServerError(anyhow::anyhow!("sfu: {}", msg)),
        SfuError::Codec(msg) => AppError::InternalServerError(anyhow::anyhow!("sfu reply: {}", msg)),
    }
}
