use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use api::Source;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Extraction;
use crate::hls::{segments_covering, CoverageError, RecordingStore, SegmentPins};
use crate::transcoder::command as ffmpeg;

#[derive(Debug, Clone)]
pub enum ExtractionJob {
    Snapshot(SnapshotJob),
    Bookmark(BookmarkJob),
}

impl ExtractionJob {
    pub fn record_id(&self) -> Uuid {
        match self {
            ExtractionJob::Snapshot(job) => job.id,
            ExtractionJob::Bookmark(job) => job.id,
        }
    }

    pub fn stream_id(&self) -> Uuid {
        match self {
            ExtractionJob::Snapshot(job) => job.stream_id,
            ExtractionJob::Bookmark(job) => job.stream_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotJob {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub source: Source,
    /// Capture point for historical snapshots; live captures stamp now.
    pub timestamp: Option<DateTime<Utc>>,
    pub rtsp_url: String,
}

#[derive(Debug, Clone)]
pub struct BookmarkJob {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub source: Source,
    /// For live bookmarks this is the submission instant; the clip window is
    /// `[center - before, center + after]` either way.
    pub center: DateTime<Utc>,
    pub before_seconds: u32,
    pub after_seconds: u32,
}

#[derive(Debug)]
pub enum JobError {
    NoRecordingData(String),
    Timeout(String),
    DiskFull(String),
    SourceStreamGone(String),
    Transcoder(String),
    Internal(String),
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            JobError::NoRecordingData(_) => "NO_RECORDING_DATA",
            JobError::Timeout(_) => "EXTRACTION_TIMEOUT",
            JobError::DiskFull(_) => "DISK_FULL",
            JobError::SourceStreamGone(_) => "SOURCE_STREAM_GONE",
            JobError::Transcoder(_) => "TRANSCODER_ERROR",
            JobError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn describe(&self) -> String {
        let msg = match self {
            JobError::NoRecordingData(m)
            | JobError::Timeout(m)
            | JobError::DiskFull(m)
            | JobError::SourceStreamGone(m)
            | JobError::Transcoder(m)
            | JobError::Internal(m) => m,
        };
        format!("{}: {}", self.code(), msg)
    }
}

#[derive(Clone)]
pub struct JobContext {
    pub config: Extraction,
    pub store: RecordingStore,
    pub pins: SegmentPins,
}

async fn run_ffmpeg(args: Vec<String>, deadline: Duration) -> Result<(), JobError> {
    debug!("extraction ffmpeg {:?}", args);
    let mut child = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| JobError::Internal(format!("spawn ffmpeg: {}", e)))?;

    let stderr = child.stderr.take();
    let output = async {
        let mut collected = String::new();
        if let Some(stderr) = stderr {
            use tokio::io::AsyncReadExt;
            let mut reader = stderr;
            let _ = reader.read_to_string(&mut collected).await;
        }
        let status = child.wait().await;
        (status, collected)
    };

    match tokio::time::timeout(deadline, output).await {
        Ok((Ok(status), _)) if status.success() => Ok(()),
        Ok((Ok(status), stderr)) => {
            if stderr.contains("No space left on device") {
                Err(JobError::DiskFull(trim_stderr(&stderr)))
            } else {
                Err(JobError::Transcoder(format!(
                    "ffmpeg exited {:?}: {}",
                    status.code(),
                    trim_stderr(&stderr)
                )))
            }
        }
        Ok((Err(e), _)) => Err(JobError::Internal(format!("ffmpeg wait: {}", e))),
        Err(_) => Err(JobError::Timeout(format!(
            "ffmpeg exceeded {:?} deadline",
            deadline
        ))),
    }
}

fn trim_stderr(stderr: &str) -> String {
    let trimmed: String = stderr.chars().rev().take(400).collect::<String>();
    trimmed.chars().rev().collect::<String>().trim().to_string()
}

fn write_classified(e: std::io::Error, what: &str) -> JobError {
    if e.raw_os_error() == Some(28) {
        JobError::DiskFull(format!("{}: {}", what, e))
    } else {
        JobError::Internal(format!("{}: {}", what, e))
    }
}

pub async fn run_snapshot(ctx: &JobContext, job: &SnapshotJob) -> Result<PathBuf, JobError> {
    let output = ctx.config.snapshots_root.join(format!("{}.jpg", job.id));
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| write_classified(e, "snapshots dir"))?;
    }

    match job.source {
        Source::Live => {
            let deadline = Duration::from_secs(ctx.config.snapshot_live_deadline_secs);
            let args = ffmpeg::live_snapshot_args(&job.rtsp_url, &output);
            match run_ffmpeg(args, deadline).await {
                Ok(()) => Ok(output),
                Err(JobError::DiskFull(m)) => Err(JobError::DiskFull(m)),
                Err(first) => {
                    // Camera unreachable for a one-shot grab: fall back to the
                    // freshest archived segment.
                    debug!("live snapshot fell back to archive: {}", first.describe());
                    snapshot_from_archive(ctx, job, Utc::now(), &output, true).await
                }
            }
        }
        Source::Historical => {
            let t = job
                .timestamp
                .ok_or_else(|| JobError::Internal("historical snapshot without timestamp".into()))?;
            snapshot_from_archive(ctx, job, t, &output, false).await
        }
    }
}

async fn snapshot_from_archive(
    ctx: &JobContext,
    job: &SnapshotJob,
    t: DateTime<Utc>,
    output: &Path,
    newest_fallback: bool,
) -> Result<PathBuf, JobError> {
    let entries = ctx
        .store
        .load_index(job.stream_id)
        .await
        .map_err(|e| JobError::NoRecordingData(format!("no playlist for stream: {}", e)))?;

    let (entry, offset) = match crate::hls::locate(&entries, t.timestamp()) {
        Some((idx, offset)) => (entries[idx].clone(), offset),
        None if newest_fallback => {
            let last = entries
                .last()
                .cloned()
                .ok_or_else(|| JobError::NoRecordingData("archive is empty".into()))?;
            // Near the tail of the newest segment, clear of the write head.
            let offset = (last.duration - 0.5).max(0.0);
            (last, offset)
        }
        None => {
            return Err(JobError::NoRecordingData(format!(
                "no segment covers {}",
                t.to_rfc3339()
            )));
        }
    };

    let segment_path = ctx.store.segment_path(job.stream_id, &entry.filename);
    ctx.pins.pin(&segment_path).await;
    let deadline = Duration::from_secs(ctx.config.snapshot_historical_deadline_secs);
    let result = run_ffmpeg(
        ffmpeg::segment_snapshot_args(&segment_path, offset, output),
        deadline,
    )
    .await;
    ctx.pins.unpin(&segment_path).await;

    result.map(|()| output.to_path_buf())
}

pub async fn run_bookmark(
    ctx: &JobContext,
    job: &BookmarkJob,
) -> Result<(PathBuf, Option<PathBuf>), JobError> {
    if job.source == Source::Live {
        // The archive is the single source of truth even for live clips; the
        // after-window (plus one segment for the writer to seal it) must pass
        // before the range exists on disk.
        let sealed_at = job.center
            + chrono::Duration::seconds(job.after_seconds as i64)
            + chrono::Duration::seconds(ctx.config.clip_margin_seconds() as i64);
        let wait = (sealed_at - Utc::now()).num_milliseconds();
        if wait > 0 {
            tokio::time::sleep(Duration::from_millis(wait as u64)).await;
        }
    }

    let start = job.center - chrono::Duration::seconds(job.before_seconds as i64);
    let end = job.center + chrono::Duration::seconds(job.after_seconds as i64);
    let duration = (job.before_seconds + job.after_seconds) as f64;

    let entries = ctx
        .store
        .load_index(job.stream_id)
        .await
        .map_err(|e| JobError::NoRecordingData(format!("no playlist for stream: {}", e)))?;

    let segments = segments_covering(&entries, start.timestamp(), end.timestamp()).map_err(
        |e| match e {
            CoverageError::Empty => JobError::NoRecordingData(format!(
                "no recording covers {} .. {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )),
            CoverageError::Hole => JobError::NoRecordingData(format!(
                "archive has a gap inside {} .. {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )),
        },
    )?;

    let video = ctx.config.bookmarks_root.join(format!("{}.mp4", job.id));
    let thumbnail = ctx.config.bookmarks_root.join(format!("{}.jpg", job.id));
    tokio::fs::create_dir_all(&ctx.config.bookmarks_root)
        .await
        .map_err(|e| write_classified(e, "bookmarks dir"))?;

    let mut pinned: Vec<PathBuf> = Vec::with_capacity(segments.len());
    for entry in &segments {
        let path = ctx.store.segment_path(job.stream_id, &entry.filename);
        ctx.pins.pin(&path).await;
        pinned.push(path);
    }

    let result = async {
        let concat = ctx.config.bookmarks_root.join(format!("{}.concat", job.id));
        let mut listing = String::new();
        for path in &pinned {
            listing.push_str(&format!("file '{}'\n", path.display()));
        }
        tokio::fs::write(&concat, listing)
            .await
            .map_err(|e| write_classified(e, "concat list"))?;

        let offset = (start.timestamp() - segments[0].start).max(0) as f64;
        let deadline = Duration::from_secs(ctx.config.clip_deadline_secs);
        let clip = run_ffmpeg(ffmpeg::clip_args(&concat, offset, duration, &video), deadline).await;
        let _ = tokio::fs::remove_file(&concat).await;
        clip?;

        // Thumbnail failure degrades the record, it does not fail the clip.
        let thumb_ok = run_ffmpeg(
            ffmpeg::thumbnail_args(&video, duration / 2.0, &thumbnail),
            Duration::from_secs(5),
        )
        .await
        .is_ok();

        info!("bookmark {} extracted from {} segments", job.id, pinned.len());
        Ok((video.clone(), thumb_ok.then(|| thumbnail.clone())))
    }
    .await;

    for path in &pinned {
        ctx.pins.unpin(path).await;
    }
    result
}

impl Extraction {
    /// Extra wait for the segment writer to seal the last covering segment.
    pub fn clip_margin_seconds(&self) -> u32 {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_error_codes() {
        assert_eq!(
            JobError::NoRecordingData("x".into()).describe(),
            "NO_RECORDING_DATA: x"
        );
        assert_eq!(JobError::Timeout("t".into()).code(), "EXTRACTION_TIMEOUT");
        assert_eq!(JobError::DiskFull("d".into()).code(), "DISK_FULL");
        assert_eq!(
            JobError::SourceStreamGone("s".into()).code(),
            "SOURCE_STREAM_GONE"
        );
    }

    #[tokio::test]
    async fn historical_snapshot_without_archive_reports_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = JobContext {
            config: Extraction {
                snapshots_root: dir.path().join("snaps"),
                bookmarks_root: dir.path().join("marks"),
                ..Default::default()
            },
            store: RecordingStore::new(dir.path().join("recordings")),
            pins: SegmentPins::default(),
        };
        let job = SnapshotJob {
            id: Uuid::new_v4(),
            stream_id: Uuid::new_v4(),
            source: Source::Historical,
            timestamp: Some(Utc::now()),
            rtsp_url: "rtsp://cam.local/1".into(),
        };
        match run_snapshot(&ctx, &job).await {
            Err(JobError::NoRecordingData(_)) => {}
            other => panic!("expected NoRecordingData, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn bookmark_outside_archive_reports_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let stream_id = Uuid::new_v4();
        let store = RecordingStore::new(dir.path().join("recordings"));
        let stream_dir = store.stream_dir(stream_id);
        tokio::fs::create_dir_all(&stream_dir).await.unwrap();
        tokio::fs::write(
            store.playlist_path(stream_id),
            "#EXTM3U\n#EXTINF:6.0,\nsegment-1000.ts\n",
        )
        .await
        .unwrap();

        let ctx = JobContext {
            config: Extraction {
                snapshots_root: dir.path().join("snaps"),
                bookmarks_root: dir.path().join("marks"),
                ..Default::default()
            },
            store,
            pins: SegmentPins::default(),
        };
        let job = BookmarkJob {
            id: Uuid::new_v4(),
            stream_id,
            source: Source::Historical,
            center: Utc::now(),
            before_seconds: 5,
            after_seconds: 5,
        };
        match run_bookmark(&ctx, &job).await {
            Err(JobError::NoRecordingData(_)) => {}
            other => panic!("expected NoRecordingData, got {:?}", other.map(|_| ())),
        }
    }
}
