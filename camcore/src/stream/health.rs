use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::config::StreamPolicy;
use crate::sfu::message::ProducerStats;
use crate::sfu::SfuClient;
use crate::stream::coordinator::{HandleMap, HealthSnapshot, StreamEvent, StreamHandle};
use crate::stream::state::StreamState;

#[derive(Default)]
struct Counters {
    packets: u64,
    bytes: u64,
    stale: u32,
}

/// Periodic stats poller feeding the per-stream coordinators.
///
/// READY streams are probed every tick for the readiness predicate; LIVE
/// streams every `health_interval_secs` for the flatline condition. The
/// coordinators own the resulting transitions; this task only observes.
pub async fn run(policy: StreamPolicy, handles: HandleMap, sfu: SfuClient) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut counters: HashMap<Uuid, Counters> = HashMap::new();
    let mut tick: u64 = 0;

    loop {
        interval.tick().await;
        tick += 1;

        let snapshot: Vec<StreamHandle> = handles.read().await.values().cloned().collect();
        counters.retain(|stream_id, _| snapshot.iter().any(|h| h.stream_id == *stream_id));

        for handle in snapshot {
            let (state, producer_id) = {
                let status = handle.status.read().await;
                (status.state, status.producer_sfu_id.clone())
            };
            let Some(producer_id) = producer_id else {
                continue;
            };

            match state {
                StreamState::Ready => {
                    let Ok(stats) = sfu.producer_stats(&producer_id).await else {
                        continue;
                    };
                    store_snapshot(&handle, &stats).await;
                    if stats.packets_received > 0 || stats.bytes_received > 0 {
                        debug!(
                            "stream {} readiness: {} packets observed",
                            handle.stream_id, stats.packets_received
                        );
                        handle.send_event(StreamEvent::MediaConfirmed).await;
                    }
                }
                StreamState::Live if tick % policy.health_interval_secs.max(1) == 0 => {
                    let Ok(stats) = sfu.producer_stats(&producer_id).await else {
                        // Channel-level failures surface through SfuLost.
                        continue;
                    };
                    store_snapshot(&handle, &stats).await;

                    let entry = counters.entry(handle.stream_id).or_default();
                    let flat = stats.packets_received <= entry.packets
                        && stats.bytes_received <= entry.bytes;
                    if flat {
                        entry.stale += 1;
                        debug!(
                            "stream {} flat for {} checks",
                            handle.stream_id, entry.stale
                        );
                    } else {
                        entry.stale = 0;
                    }
                    entry.packets = stats.packets_received;
                    entry.bytes = stats.bytes_received;

                    if entry.stale >= policy.stale_threshold {
                        entry.stale = 0;
                        handle.send_event(StreamEvent::MediaFlatline).await;
                    }
                }
                _ => {
                    counters.remove(&handle.stream_id);
                }
            }
        }
    }
}

async fn store_snapshot(handle: &StreamHandle, stats: &ProducerStats) {
    let snapshot = HealthSnapshot {
        packets_received: stats.packets_received,
        bytes_received: stats.bytes_received,
        bitrate_kbps: stats.bitrate / 1000.0,
        fps: stats.frames_per_second,
        packet_loss: stats.fraction_lost,
        // RTP jitter arrives in 90 kHz clock units.
        jitter_ms: stats.jitter / 90.0,
    };
    handle.status.write().await.health = Some(snapshot);
}
