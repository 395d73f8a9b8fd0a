use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use sysinfo::Disks;
use tracing::{error, info, warn};

use crate::config::Recording;
use crate::hls::{segment_epoch, RecordingStore, SegmentPins};

// Disk-usage tiers for the emergency path. At 95% the archive is pruned down
// to 80%, at 90% down to 85%; 85% only warns.
const CRITICAL_USAGE_PERCENT: f64 = 95.0;
const AGGRESSIVE_USAGE_PERCENT: f64 = 90.0;
const WARN_USAGE_PERCENT: f64 = 85.0;
const CRITICAL_TARGET_PERCENT: f64 = 80.0;
const AGGRESSIVE_TARGET_PERCENT: f64 = 85.0;

/// Background retention pruner.
///
/// Every cycle checks the filesystem holding the archive first: past the
/// usage tiers above, the oldest segments across all streams are deleted
/// until usage drops below the tier's target. Then the regular pass drops
/// segments whose embedded epoch is older than retention. Pinned segments
/// are never unlinked directly; they are deferred until the extraction
/// releases them.
pub async fn run(config: Recording, store: RecordingStore, pins: SegmentPins) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.prune_interval_secs));
    loop {
        interval.tick().await;
        if let Err(e) = check_disk_space(&store, &pins).await {
            warn!("disk-usage check failed: {}", e);
        }
        if let Err(e) = prune_expired(&config, &store, &pins).await {
            warn!("retention prune failed: {}", e);
        }
    }
}

/// Used fraction of the filesystem the recording root lives on, in percent.
/// The disk with the longest matching mount point wins.
fn disk_usage_percent(root: &Path) -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| root.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .and_then(|disk| {
            let total = disk.total_space();
            if total == 0 {
                return None;
            }
            let used = total.saturating_sub(disk.available_space());
            Some(used as f64 / total as f64 * 100.0)
        })
}

async fn check_disk_space(store: &RecordingStore, pins: &SegmentPins) -> anyhow::Result<()> {
    let Some(usage) = disk_usage_percent(store.root()) else {
        return Ok(());
    };

    if usage >= CRITICAL_USAGE_PERCENT {
        error!(
            "disk usage at {:.1}%, emergency pruning toward {:.0}%",
            usage, CRITICAL_TARGET_PERCENT
        );
        emergency_prune(CRITICAL_TARGET_PERCENT, store, pins).await?;
    } else if usage >= AGGRESSIVE_USAGE_PERCENT {
        warn!(
            "disk usage at {:.1}%, aggressively pruning toward {:.0}%",
            usage, AGGRESSIVE_TARGET_PERCENT
        );
        emergency_prune(AGGRESSIVE_TARGET_PERCENT, store, pins).await?;
    } else if usage >= WARN_USAGE_PERCENT {
        warn!(
            "disk usage at {:.1}%; consider reducing retention",
            usage
        );
    }
    Ok(())
}

async fn prune_expired(
    config: &Recording,
    store: &RecordingStore,
    pins: &SegmentPins,
) -> anyhow::Result<()> {
    let cutoff = Utc::now().timestamp() - (config.retention_days as i64) * 86_400;
    let mut removed = 0u64;

    let mut streams = match tokio::fs::read_dir(store.root()).await {
        Ok(dir) => dir,
        Err(_) => return Ok(()), // nothing recorded yet
    };
    while let Some(stream_dir) = streams.next_entry().await? {
        if !stream_dir.file_type().await?.is_dir() {
            continue;
        }
        let mut segments = tokio::fs::read_dir(stream_dir.path()).await?;
        while let Some(entry) = segments.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(epoch) = segment_epoch(&name) else {
                continue;
            };
            if epoch >= cutoff {
                continue;
            }
            let path = entry.path();
            if pins.is_pinned(&path).await {
                pins.defer_delete(&path).await;
                continue;
            }
            if tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
    }

    if removed > 0 {
        info!("retention prune removed {} segments", removed);
    }
    Ok(())
}

struct AgedSegment {
    path: PathBuf,
    epoch: i64,
    size: u64,
}

async fn collect_aged(store: &RecordingStore) -> anyhow::Result<Vec<AgedSegment>> {
    let mut aged: Vec<AgedSegment> = Vec::new();
    let mut streams = match tokio::fs::read_dir(store.root()).await {
        Ok(dir) => dir,
        Err(_) => return Ok(aged),
    };
    while let Some(stream_dir) = streams.next_entry().await? {
        if !stream_dir.file_type().await?.is_dir() {
            continue;
        }
        let mut segments = tokio::fs::read_dir(stream_dir.path()).await?;
        while let Some(entry) = segments.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(epoch) = segment_epoch(&name) {
                aged.push(AgedSegment {
                    path: entry.path(),
                    epoch,
                    size: entry.metadata().await.map(|m| m.len()).unwrap_or(0),
                });
            }
        }
    }
    aged.sort_by_key(|segment| segment.epoch);
    Ok(aged)
}

async fn emergency_prune(
    target_percent: f64,
    store: &RecordingStore,
    pins: &SegmentPins,
) -> anyhow::Result<()> {
    let aged = collect_aged(store).await?;
    let root = store.root().to_path_buf();
    let (removed, freed) = prune_oldest_while(aged, pins, move || {
        disk_usage_percent(&root).is_some_and(|usage| usage > target_percent)
    })
    .await;

    match disk_usage_percent(store.root()) {
        Some(usage) if usage > target_percent => warn!(
            "emergency prune removed {} segments ({} bytes) but usage is still {:.1}%; \
             the filesystem holds more than recordings",
            removed, freed, usage
        ),
        _ => info!(
            "emergency prune removed {} segments ({} bytes)",
            removed, freed
        ),
    }
    Ok(())
}

/// Delete oldest-first while `more` says the pressure persists. Pinned
/// segments are deferred instead of unlinked. Returns (removed, bytes freed).
async fn prune_oldest_while(
    aged: Vec<AgedSegment>,
    pins: &SegmentPins,
    mut more: impl FnMut() -> bool,
) -> (u64, u64) {
    let mut removed = 0u64;
    let mut freed = 0u64;
    for segment in aged {
        if !more() {
            break;
        }
        if pins.is_pinned(&segment.path).await {
            pins.defer_delete(&segment.path).await;
            continue;
        }
        if tokio::fs::remove_file(&segment.path).await.is_ok() {
            removed += 1;
            freed += segment.size;
        }
    }
    (removed, freed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn seed(store: &RecordingStore, stream: Uuid, epoch: i64, bytes: usize) -> PathBuf {
        let dir = store.stream_dir(stream);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(format!("segment-{}.ts", epoch));
        tokio::fs::write(&path, vec![0u8; bytes]).await.unwrap();
        path
    }

    fn recording_config() -> Recording {
        Recording {
            root: PathBuf::new(),
            retention_days: 7,
            segment_seconds: 6,
            prune_interval_secs: 3600,
        }
    }

    #[tokio::test]
    async fn expired_segments_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(dir.path().to_path_buf());
        let pins = SegmentPins::default();
        let stream = Uuid::new_v4();

        let now = Utc::now().timestamp();
        let old = seed(&store, stream, now - 8 * 86_400, 4).await;
        let fresh = seed(&store, stream, now - 60, 4).await;

        prune_expired(&recording_config(), &store, &pins)
            .await
            .unwrap();
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn pinned_segment_survives_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(dir.path().to_path_buf());
        let pins = SegmentPins::default();
        let stream = Uuid::new_v4();

        let now = Utc::now().timestamp();
        let old = seed(&store, stream, now - 8 * 86_400, 4).await;
        pins.pin(&old).await;

        prune_expired(&recording_config(), &store, &pins)
            .await
            .unwrap();
        assert!(old.exists(), "pinned segment must not be unlinked");

        pins.unpin(&old).await;
        assert!(!old.exists(), "deferred delete fires on release");
    }

    #[tokio::test]
    async fn collect_aged_sorts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(dir.path().to_path_buf());
        let stream = Uuid::new_v4();

        seed(&store, stream, 3000, 10).await;
        seed(&store, stream, 1000, 10).await;
        seed(&store, stream, 2000, 10).await;

        let aged = collect_aged(&store).await.unwrap();
        let epochs: Vec<i64> = aged.iter().map(|s| s.epoch).collect();
        assert_eq!(epochs, vec![1000, 2000, 3000]);
    }

    #[tokio::test]
    async fn emergency_path_drops_oldest_until_pressure_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(dir.path().to_path_buf());
        let pins = SegmentPins::default();
        let stream = Uuid::new_v4();

        let oldest = seed(&store, stream, 1000, 1000).await;
        let middle = seed(&store, stream, 2000, 1000).await;
        let newest = seed(&store, stream, 3000, 1000).await;

        // Pressure clears after two deletions.
        let mut budget = 2;
        let aged = collect_aged(&store).await.unwrap();
        let (removed, freed) = prune_oldest_while(aged, &pins, move || {
            let go = budget > 0;
            budget -= 1;
            go
        })
        .await;

        assert_eq!(removed, 2);
        assert_eq!(freed, 2000);
        assert!(!oldest.exists());
        assert!(!middle.exists());
        assert!(newest.exists());
    }

    #[tokio::test]
    async fn emergency_path_defers_pinned_segments() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(dir.path().to_path_buf());
        let pins = SegmentPins::default();
        let stream = Uuid::new_v4();

        let pinned = seed(&store, stream, 1000, 1000).await;
        let free = seed(&store, stream, 2000, 1000).await;
        pins.pin(&pinned).await;

        let aged = collect_aged(&store).await.unwrap();
        let (removed, _) = prune_oldest_while(aged, &pins, || true).await;

        assert_eq!(removed, 1);
        assert!(pinned.exists(), "pinned segment is deferred, not unlinked");
        assert!(!free.exists());

        pins.unpin(&pinned).await;
        assert!(!pinned.exists(), "deferred delete fires on release");
    }

    #[test]
    fn disk_usage_reads_the_hosting_filesystem() {
        // Exact numbers depend on the host; the probe must at least resolve
        // the filesystem of a real directory to a sane percentage.
        if let Some(usage) = disk_usage_percent(Path::new("/")) {
            assert!((0.0..=100.0).contains(&usage), "usage {} out of range", usage);
        }
    }
}
