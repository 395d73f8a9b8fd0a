use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

pub mod pruner;

/// One media segment as listed in the rolling playlist. The start time is
/// embedded in the filename as unix-epoch seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub filename: String,
    pub start: i64,
    pub duration: f64,
}

impl SegmentEntry {
    pub fn end(&self) -> f64 {
        self.start as f64 + self.duration
    }
}

/// Epoch seconds out of `segment-<epoch>.ts`, or None for foreign filenames.
pub fn segment_epoch(filename: &str) -> Option<i64> {
    let stem = filename.strip_prefix("segment-")?.strip_suffix(".ts")?;
    stem.parse().ok()
}

/// Parse a rolling M3U8: `#EXTINF:<duration>,` followed by the segment name.
/// Unknown lines are skipped, so encoder-specific tags do not matter.
pub fn parse_playlist(text: &str) -> Vec<SegmentEntry> {
    let mut entries = Vec::new();
    let mut pending_duration: Option<f64> = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            pending_duration = rest
                .split(',')
                .next()
                .and_then(|d| d.trim().parse::<f64>().ok());
        } else if !line.is_empty() && !line.starts_with('#') {
            if let (Some(duration), Some(start)) = (pending_duration.take(), segment_epoch(line)) {
                entries.push(SegmentEntry {
                    filename: line.to_string(),
                    start,
                    duration,
                });
            }
        }
    }
    entries
}

/// The segment covering wall-clock `t`, with the decode offset inside it.
pub fn locate(entries: &[SegmentEntry], t: i64) -> Option<(usize, f64)> {
    for (idx, entry) in entries.iter().enumerate() {
        let t = t as f64;
        if entry.start as f64 <= t && t < entry.end() {
            return Some((idx, t - entry.start as f64));
        }
    }
    None
}

#[derive(Debug, PartialEq)]
pub enum CoverageError {
    /// The archive has no segment for part of the requested range.
    Hole,
    Empty,
}

/// All segments overlapping `[start, end]`, in order. A gap inside the range
/// (consecutive segments more than one nominal duration apart, or a range
/// edge not covered) is a hole, not a shorter clip.
pub fn segments_covering(
    entries: &[SegmentEntry],
    start: i64,
    end: i64,
) -> Result<Vec<SegmentEntry>, CoverageError> {
    let overlapping: Vec<SegmentEntry> = entries
        .iter()
        .filter(|e| e.end() > start as f64 && (e.start as f64) < end as f64)
        .cloned()
        .collect();

    if overlapping.is_empty() {
        return Err(CoverageError::Empty);
    }

    let first = overlapping.first().unwrap();
    let last = overlapping.last().unwrap();
    if first.start as f64 > start as f64 || last.end() < end as f64 {
        return Err(CoverageError::Hole);
    }
    for pair in overlapping.windows(2) {
        // Allow sub-second encoder jitter between consecutive segments.
        if (pair[1].start as f64) - pair[0].end() > 1.0 {
            return Err(CoverageError::Hole);
        }
    }
    Ok(overlapping)
}

/// Filesystem layout of the recording archive:
/// `<root>/<stream_id>/playlist.m3u8` plus `segment-<epoch>.ts` files.
#[derive(Clone)]
pub struct RecordingStore {
    root: PathBuf,
}

impl RecordingStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stream_dir(&self, stream_id: Uuid) -> PathBuf {
        self.root.join(stream_id.to_string())
    }

    pub fn playlist_path(&self, stream_id: Uuid) -> PathBuf {
        self.stream_dir(stream_id).join("playlist.m3u8")
    }

    pub fn segment_path(&self, stream_id: Uuid, filename: &str) -> PathBuf {
        self.stream_dir(stream_id).join(filename)
    }

    pub async fn load_index(&self, stream_id: Uuid) -> std::io::Result<Vec<SegmentEntry>> {
        let text = tokio::fs::read_to_string(self.playlist_path(stream_id)).await?;
        Ok(parse_playlist(&text))
    }
}

/// Reference counts for segments an extraction is reading. The pruner skips
/// pinned files and deletes deferred ones when the last pin drops.
#[derive(Clone, Default)]
pub struct SegmentPins {
    inner: Arc<Mutex<PinTable>>,
}

#[derive(Default)]
struct PinTable {
    pins: HashMap<PathBuf, usize>,
    deferred: std::collections::HashSet<PathBuf>,
}

impl SegmentPins {
    pub async fn pin(&self, path: &Path) {
        let mut table = self.inner.lock().await;
        *table.pins.entry(path.to_path_buf()).or_insert(0) += 1;
    }

    pub async fn unpin(&self, path: &Path) {
        let mut table = self.inner.lock().await;
        let remove = match table.pins.get_mut(path) {
            Some(count) => {
                *count -= 1;
                *count == 0
            }
            None => false,
        };
        if remove {
            table.pins.remove(path);
            if table.deferred.remove(path) {
                let _ = tokio::fs::remove_file(path).await;
            }
        }
    }

    pub async fn is_pinned(&self, path: &Path) -> bool {
        self.inner.lock().await.pins.contains_key(path)
    }

    /// Mark a pinned segment for deletion once released.
    pub async fn defer_delete(&self, path: &Path) {
        self.inner.lock().await.deferred.insert(path.to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-MEDIA-SEQUENCE:0\n\
#EXTINF:6.000,\n\
segment-1000.ts\n\
#EXTINF:6.000,\n\
segment-1006.ts\n\
#EXTINF:4.500,\n\
segment-1012.ts\n";

    #[test]
    fn parses_playlist_entries() {
        let entries = parse_playlist(PLAYLIST);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].start, 1000);
        assert_eq!(entries[0].duration, 6.0);
        assert_eq!(entries[2].filename, "segment-1012.ts");
        assert_eq!(entries[2].duration, 4.5);
    }

    #[test]
    fn epoch_extraction() {
        assert_eq!(segment_epoch("segment-1722400000.ts"), Some(1722400000));
        assert_eq!(segment_epoch("segment-abc.ts"), None);
        assert_eq!(segment_epoch("init.mp4"), None);
    }

    #[test]
    fn locate_returns_offset_inside_segment() {
        let entries = parse_playlist(PLAYLIST);
        assert_eq!(locate(&entries, 1003), Some((0, 3.0)));
        assert_eq!(locate(&entries, 1006), Some((1, 0.0)));
        assert_eq!(locate(&entries, 1016), Some((2, 4.0)));
    }

    #[test]
    fn locate_misses_outside_archive() {
        let entries = parse_playlist(PLAYLIST);
        assert_eq!(locate(&entries, 999), None);
        assert_eq!(locate(&entries, 1017), None);
    }

    #[test]
    fn covering_range_spans_segments() {
        let entries = parse_playlist(PLAYLIST);
        let segs = segments_covering(&entries, 1004, 1010).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].start, 1000);
        assert_eq!(segs[1].start, 1006);
    }

    #[test]
    fn range_before_archive_is_empty() {
        let entries = parse_playlist(PLAYLIST);
        assert_eq!(
            segments_covering(&entries, 100, 200),
            Err(CoverageError::Empty)
        );
    }

    #[test]
    fn range_edge_outside_archive_is_a_hole() {
        let entries = parse_playlist(PLAYLIST);
        assert_eq!(
            segments_covering(&entries, 998, 1004),
            Err(CoverageError::Hole)
        );
        assert_eq!(
            segments_covering(&entries, 1010, 1030),
            Err(CoverageError::Hole)
        );
    }

    #[test]
    fn restart_gap_is_a_hole() {
        let text = "#EXTINF:6.0,\nsegment-1000.ts\n#EXTINF:6.0,\nsegment-1030.ts\n";
        let entries = parse_playlist(text);
        assert_eq!(
            segments_covering(&entries, 1002, 1032),
            Err(CoverageError::Hole)
        );
    }

    #[tokio::test]
    async fn pins_count_and_defer() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("segment-1.ts");
        tokio::fs::write(&file, b"x").await.unwrap();

        let pins = SegmentPins::default();
        pins.pin(&file).await;
        pins.pin(&file).await;
        pins.defer_delete(&file).await;

        pins.unpin(&file).await;
        assert!(file.exists(), "still pinned once");

        pins.unpin(&file).await;
        assert!(!file.exists(), "deleted on last release");
        assert!(!pins.is_pinned(&file).await);
    }
}
