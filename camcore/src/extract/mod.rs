use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Extraction;
use crate::db::service::bookmarks::BookmarksService;
use crate::db::service::snapshots::SnapshotsService;
use crate::db::service::streams::StreamsService;
use crate::db::DatabaseService;
use crate::error::AppError;
use crate::hls::{RecordingStore, SegmentPins};
use crate::metrics;
use crate::result::Result;

pub mod job;

use job::{ExtractionJob, JobContext, JobError};

/// Bounded FIFO pool for snapshot and clip jobs.
///
/// A full queue rejects at enqueue time; workers observe tombstones so a
/// deleted record's partial artifacts are removed instead of orphaned.
pub struct ExtractionPool {
    tx: mpsc::Sender<ExtractionJob>,
    tombstones: Arc<StdMutex<HashSet<Uuid>>>,
}

impl ExtractionPool {
    pub fn new(
        config: Extraction,
        db: DatabaseService,
        store: RecordingStore,
        pins: SegmentPins,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<ExtractionJob>(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let tombstones: Arc<StdMutex<HashSet<Uuid>>> = Arc::new(StdMutex::new(HashSet::new()));

        let ctx = JobContext {
            config: config.clone(),
            store,
            pins,
        };
        for worker in 0..config.workers {
            tokio::spawn(run_worker(
                worker,
                rx.clone(),
                ctx.clone(),
                db.clone(),
                tombstones.clone(),
            ));
        }

        Arc::new(Self { tx, tombstones })
    }

    pub fn enqueue(&self, job: ExtractionJob) -> Result<()> {
        match self.tx.try_send(job) {
            Ok(()) => {
                metrics::EXTRACTION_QUEUE.inc();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(AppError::Backlogged),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(AppError::InternalServerError(
                anyhow::anyhow!("extraction workers are gone"),
            )),
        }
    }

    /// Deleting a PROCESSING record cancels its job at the next observation
    /// point; the worker deletes whatever it produced.
    pub fn cancel(&self, record_id: Uuid) {
        self.tombstones.lock().unwrap().insert(record_id);
    }
}

fn is_tombstoned(tombstones: &StdMutex<HashSet<Uuid>>, id: Uuid) -> bool {
    tombstones.lock().unwrap().contains(&id)
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<ExtractionJob>>>,
    ctx: JobContext,
    db: DatabaseService,
    tombstones: Arc<StdMutex<HashSet<Uuid>>>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            return;
        };
        metrics::EXTRACTION_QUEUE.dec();
        let record_id = job.record_id();
        tracing::debug!("extraction worker {} took job {}", worker, record_id);

        if is_tombstoned(&tombstones, record_id) {
            tombstones.lock().unwrap().remove(&record_id);
            continue;
        }

        // The parent stream must still exist when the job runs.
        let stream_exists = StreamsService::get(db.conn(), job.stream_id())
            .await
            .map(|row| row.is_some())
            .unwrap_or(false);
        if !stream_exists {
            let gone = JobError::SourceStreamGone(format!("stream {} no longer exists", job.stream_id()));
            fail_record(&db, &job, &gone).await;
            continue;
        }

        match &job {
            ExtractionJob::Snapshot(snapshot) => {
                match job::run_snapshot(&ctx, snapshot).await {
                    Ok(image) => {
                        if is_tombstoned(&tombstones, record_id) {
                            tombstones.lock().unwrap().remove(&record_id);
                            let _ = tokio::fs::remove_file(&image).await;
                            continue;
                        }
                        let path = image.to_string_lossy();
                        match SnapshotsService::mark_ready(db.conn(), record_id, &path).await {
                            Ok(true) => info!("snapshot {} ready at {}", record_id, path),
                            Ok(false) => {
                                // Record finished or vanished meanwhile.
                                let _ = tokio::fs::remove_file(&image).await;
                            }
                            Err(e) => warn!("snapshot {}: status update failed: {}", record_id, e),
                        }
                    }
                    Err(error) => {
                        if is_tombstoned(&tombstones, record_id) {
                            tombstones.lock().unwrap().remove(&record_id);
                            continue;
                        }
                        fail_record(&db, &job, &error).await;
                    }
                }
            }
            ExtractionJob::Bookmark(bookmark) => {
                match job::run_bookmark(&ctx, bookmark).await {
                    Ok((video, thumbnail)) => {
                        if is_tombstoned(&tombstones, record_id) {
                            tombstones.lock().unwrap().remove(&record_id);
                            let _ = tokio::fs::remove_file(&video).await;
                            if let Some(thumb) = thumbnail {
                                let _ = tokio::fs::remove_file(&thumb).await;
                            }
                            continue;
                        }
                        let video_path = video.to_string_lossy().to_string();
                        let thumb_path = thumbnail.map(|p| p.to_string_lossy().to_string());
                        match BookmarksService::mark_ready(
                            db.conn(),
                            record_id,
                            &video_path,
                            thumb_path.as_deref(),
                        )
                        .await
                        {
                            Ok(true) => info!("bookmark {} ready at {}", record_id, video_path),
                            Ok(false) => {
                                let _ = tokio::fs::remove_file(&video_path).await;
                                if let Some(thumb) = thumb_path {
                                    let _ = tokio::fs::remove_file(&thumb).await;
                                }
                            }
                            Err(e) => warn!("bookmark {}: status update failed: {}", record_id, e),
                        }
                    }
                    Err(error) => {
                        if is_tombstoned(&tombstones, record_id) {
                            tombstones.lock().unwrap().remove(&record_id);
                            continue;
                        }
                        fail_record(&db, &job, &error).await;
                    }
                }
            }
        }
    }
}

async fn fail_record(db: &DatabaseService, job: &ExtractionJob, error: &JobError) {
    let record_id = job.record_id();
    warn!("extraction {} failed: {}", record_id, error.describe());
    let result = match job {
        ExtractionJob::Snapshot(_) => {
            SnapshotsService::mark_failed(db.conn(), record_id, &error.describe()).await
        }
        ExtractionJob::Bookmark(_) => {
            BookmarksService::mark_failed(db.conn(), record_id, &error.describe()).await
        }
    };
    if let Err(e) = result {
        warn!("extraction {}: failure status update failed: {}", record_id, e);
    }
}
