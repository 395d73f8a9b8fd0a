use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::consumer::ConsumerRegistry;
use crate::db::service::streams::StreamsService;
use crate::db::DatabaseService;
use crate::error::AppError;
use crate::metrics;
use crate::sfu::message::video_rtp_parameters;
use crate::sfu::SfuClient;
use crate::stream::ports::{PortBroker, PortError};
use crate::stream::ssrc;
use crate::stream::state::StreamState;
use crate::transcoder::{self, command::PipelineSpec, FatalKind, TranscoderEvent, TranscoderHandle};

const VIDEO_PAYLOAD_TYPE: u8 = 96;

#[derive(Debug)]
pub enum StreamCommand {
    Stop { reply: oneshot::Sender<()> },
}

#[derive(Debug)]
pub enum StreamEvent {
    Transcoder(TranscoderEvent),
    /// Health monitor observed the readiness predicate true.
    MediaConfirmed,
    /// Health monitor observed producer packets and transport bytes flat.
    MediaFlatline,
    SfuLost,
    ProducerClosed,
}

#[derive(Debug)]
pub enum StreamMsg {
    Command(StreamCommand),
    Event(StreamEvent),
}

#[derive(Debug, Clone)]
pub struct StartedInfo {
    pub stream_id: Uuid,
    pub room_id: String,
    pub producer_sfu_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub bitrate_kbps: f64,
    pub fps: f64,
    pub packet_loss: f64,
    pub jitter_ms: f64,
}

/// Runtime view of one coordinator, shared with the manager and the health
/// monitor. The database remains the durable record.
#[derive(Debug)]
pub struct HandleStatus {
    pub state: StreamState,
    pub producer_sfu_id: Option<String>,
    pub last_error: Option<String>,
    pub health: Option<HealthSnapshot>,
}

impl Default for HandleStatus {
    fn default() -> Self {
        Self {
            state: StreamState::Initializing,
            producer_sfu_id: None,
            last_error: None,
            health: None,
        }
    }
}

#[derive(Clone)]
pub struct StreamHandle {
    pub stream_id: Uuid,
    pub device_id: Uuid,
    pub tx: mpsc::Sender<StreamMsg>,
    pub status: Arc<RwLock<HandleStatus>>,
}

impl StreamHandle {
    pub async fn send_event(&self, event: StreamEvent) {
        let _ = self.tx.send(StreamMsg::Event(event)).await;
    }
}

pub type HandleMap = Arc<RwLock<HashMap<Uuid, StreamHandle>>>;

#[derive(Clone)]
pub struct StreamDeps {
    pub config: Arc<Config>,
    pub db: DatabaseService,
    pub sfu: SfuClient,
    pub ports: Arc<PortBroker>,
    pub consumers: Arc<ConsumerRegistry>,
    pub handles: HandleMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    SsrcTimeout,
    RtspConnection,
    RtspTimeout,
    Transcoder,
    Sfu,
    NoMedia,
    PortsExhausted,
    Internal,
}

#[derive(Debug, Clone)]
struct StreamFailure {
    kind: FailureKind,
    reason: String,
}

impl StreamFailure {
    fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Resource exhaustion is not retried; everything transient is.
    fn retryable(&self) -> bool {
        !matches!(self.kind, FailureKind::PortsExhausted)
    }

    fn code(&self) -> &'static str {
        match self.kind {
            FailureKind::SsrcTimeout => "SSRC_CAPTURE_FAILED",
            FailureKind::RtspConnection => "RTSP_CONNECTION_FAILED",
            FailureKind::RtspTimeout => "RTSP_TIMEOUT",
            FailureKind::Transcoder => "TRANSCODER_ERROR",
            FailureKind::Sfu => "SFU_UNAVAILABLE",
            FailureKind::NoMedia => "TRANSCODER_ERROR",
            FailureKind::PortsExhausted => "NO_PORTS_AVAILABLE",
            FailureKind::Internal => "INTERNAL_SERVER_ERROR",
        }
    }

    fn describe(&self) -> String {
        format!("{}: {}", self.code(), self.reason)
    }

    fn to_app_error(&self) -> AppError {
        match self.kind {
            FailureKind::SsrcTimeout => AppError::SsrcCaptureFailed(self.reason.clone()),
            FailureKind::RtspConnection => AppError::RtspConnectionFailed(self.reason.clone()),
            FailureKind::RtspTimeout => AppError::RtspTimeout(self.reason.clone()),
            FailureKind::Transcoder | FailureKind::NoMedia => {
                AppError::TranscoderError(self.reason.clone())
            }
            FailureKind::Sfu => AppError::SfuUnavailable(self.reason.clone()),
            FailureKind::PortsExhausted => AppError::NoPortsAvailable,
            FailureKind::Internal => {
                AppError::InternalServerError(anyhow::anyhow!(self.reason.clone()))
            }
        }
    }
}

fn failure_of(event: &StreamEvent) -> Option<StreamFailure> {
    match event {
        StreamEvent::Transcoder(TranscoderEvent::Fatal { kind, line }) => {
            let failure_kind = match kind {
                FatalKind::ConnectionRefused => FailureKind::RtspConnection,
                FatalKind::ConnectionTimeout => FailureKind::RtspTimeout,
                FatalKind::NoVideo | FatalKind::CodecNegotiation | FatalKind::Other => {
                    FailureKind::Transcoder
                }
            };
            Some(StreamFailure::new(failure_kind, line.clone()))
        }
        StreamEvent::Transcoder(TranscoderEvent::Exited { code, last_stderr }) => {
            Some(StreamFailure::new(
                FailureKind::Transcoder,
                format!(
                    "transcoder exited with code {:?}: {}",
                    code,
                    last_stderr.join(" | ")
                ),
            ))
        }
        StreamEvent::Transcoder(TranscoderEvent::Connected) => None,
        StreamEvent::MediaConfirmed => None,
        StreamEvent::MediaFlatline => Some(StreamFailure::new(
            FailureKind::NoMedia,
            "no media: producer packets and transport bytes are flat",
        )),
        StreamEvent::SfuLost => Some(StreamFailure::new(
            FailureKind::Sfu,
            "sfu control channel lost",
        )),
        StreamEvent::ProducerClosed => Some(StreamFailure::new(
            FailureKind::Sfu,
            "producer closed by the sfu",
        )),
    }
}

enum Step<T> {
    Done(T),
    Stop(Option<oneshot::Sender<()>>),
    Failed(StreamFailure),
}

/// Run a setup future to completion while staying responsive to the mailbox.
/// Stop wins over everything; fatal events abort the future.
async fn with_mailbox<T>(
    rx: &mut mpsc::Receiver<StreamMsg>,
    fut: impl Future<Output = T>,
) -> Step<T> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Step::Done(out),
            msg = rx.recv() => match msg {
                Some(StreamMsg::Command(StreamCommand::Stop { reply })) => {
                    return Step::Stop(Some(reply));
                }
                Some(StreamMsg::Event(event)) => {
                    if let Some(failure) = failure_of(&event) {
                        return Step::Failed(failure);
                    }
                }
                None => return Step::Stop(None),
            }
        }
    }
}

#[derive(Default)]
struct Resources {
    port: Option<u16>,
    transcoder: Option<TranscoderHandle>,
    plain_transport_id: Option<String>,
    producer_sfu_id: Option<String>,
}

enum AttemptOutcome {
    Live(StartedInfo),
    Stopped(Option<oneshot::Sender<()>>),
    Failed(StreamFailure),
}

/// Single owner of one stream's lifecycle. All transitions run here, in
/// mailbox order; nothing else mutates the stream row's state.
pub struct Coordinator {
    pub stream_id: Uuid,
    pub device_id: Uuid,
    pub rtsp_url: String,
    pub deps: StreamDeps,
    pub status: Arc<RwLock<HandleStatus>>,
    pub self_tx: mpsc::Sender<StreamMsg>,
    state: StreamState,
    resources: Resources,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream_id: Uuid,
        device_id: Uuid,
        rtsp_url: String,
        deps: StreamDeps,
        status: Arc<RwLock<HandleStatus>>,
        self_tx: mpsc::Sender<StreamMsg>,
    ) -> Self {
        Self {
            stream_id,
            device_id,
            rtsp_url,
            deps,
            status,
            self_tx,
            state: StreamState::Initializing,
            resources: Resources::default(),
        }
    }

    fn room_id(&self) -> String {
        self.device_id.to_string()
    }

    async fn set_state(&mut self, to: StreamState, last_error: Option<String>) {
        if self.state != to {
            metrics::STREAM
                .with_label_values(&[&self.state.to_string()])
                .dec();
            metrics::STREAM.with_label_values(&[&to.to_string()]).inc();
        }
        if let Err(invalid) = self.state.transition(to) {
            // Guard violations are a coordinator bug; log loudly and force.
            error!(
                "stream {}: forced transition {} -> {}",
                self.stream_id, invalid.from, invalid.to
            );
            self.state = to;
        }
        {
            let mut status = self.status.write().await;
            status.state = to;
            if last_error.is_some() {
                status.last_error = last_error.clone();
            }
        }
        if let Err(e) =
            StreamsService::set_state(self.deps.db.conn(), self.stream_id, to, last_error).await
        {
            error!("stream {}: state persist failed: {}", self.stream_id, e);
        }
    }

    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<StreamMsg>,
        start_reply: oneshot::Sender<Result<StartedInfo, AppError>>,
    ) {
        metrics::STREAM
            .with_label_values(&[&StreamState::Initializing.to_string()])
            .inc();
        let mut start_reply = Some(start_reply);
        let max_attempts = self.deps.config.stream.restart_max_attempts;
        let mut attempts: u32 = 0;

        'lifecycle: loop {
            match self.attempt(&mut rx).await {
                AttemptOutcome::Live(info) => {
                    attempts = 0;
                    if let Some(reply) = start_reply.take() {
                        let _ = reply.send(Ok(info));
                    }
                    match self.live_loop(&mut rx).await {
                        LiveExit::Stopped(reply) => {
                            self.finish_stopped(reply).await;
                            return;
                        }
                        LiveExit::Failed(failure) => {
                            if !self
                                .enter_error_and_wait(&mut rx, &failure, &mut attempts, max_attempts)
                                .await
                            {
                                return;
                            }
                            continue 'lifecycle;
                        }
                    }
                }
                AttemptOutcome::Stopped(reply) => {
                    if let Some(reply_tx) = start_reply.take() {
                        let _ = reply_tx.send(Err(AppError::InvalidState {
                            from: self.state.to_string(),
                            to: StreamState::Live.to_string(),
                        }));
                    }
                    self.finish_stopped(reply).await;
                    return;
                }
                AttemptOutcome::Failed(failure) => {
                    if let Some(reply) = start_reply.take() {
                        let _ = reply.send(Err(failure.to_app_error()));
                    }
                    if !self
                        .enter_error_and_wait(&mut rx, &failure, &mut attempts, max_attempts)
                        .await
                    {
                        return;
                    }
                }
            }
        }
    }

    /// ERROR entry plus the backoff wait. Returns false when the coordinator
    /// is done (closed or stopped during backoff).
    async fn enter_error_and_wait(
        &mut self,
        rx: &mut mpsc::Receiver<StreamMsg>,
        failure: &StreamFailure,
        attempts: &mut u32,
        max_attempts: u32,
    ) -> bool {
        self.teardown("stream error").await;
        self.set_state(StreamState::Error, Some(failure.describe())).await;

        if !failure.retryable() || *attempts >= max_attempts {
            warn!(
                "stream {}: giving up after {} attempts ({})",
                self.stream_id,
                attempts,
                failure.describe()
            );
            self.finish_closed().await;
            return false;
        }

        *attempts += 1;
        let backoff =
            Duration::from_secs(self.deps.config.stream.restart_backoff_secs << (*attempts - 1));
        // Each retry is a distinct audit event, never a silent loop.
        info!(
            "stream {}: restart attempt {}/{} in {:?} after {}",
            self.stream_id,
            attempts,
            max_attempts,
            backoff,
            failure.describe()
        );
        let _ = StreamsService::set_restart_attempts(self.deps.db.conn(), self.stream_id, *attempts)
            .await;

        let wake_at = tokio::time::Instant::now() + backoff;
        loop {
            match with_mailbox(rx, tokio::time::sleep_until(wake_at)).await {
                Step::Done(()) => {
                    self.set_state(StreamState::Initializing, None).await;
                    return true;
                }
                Step::Stop(reply) => {
                    self.finish_stopped(reply).await;
                    return false;
                }
                // Already in ERROR; stale fatal events do not shorten backoff.
                Step::Failed(_) => continue,
            }
        }
    }

    async fn finish_stopped(&mut self, reply: Option<oneshot::Sender<()>>) {
        self.teardown("stream stopped").await;
        self.set_state(StreamState::Stopped, None).await;
        metrics::STREAM
            .with_label_values(&[&self.state.to_string()])
            .dec();
        self.deps.handles.write().await.remove(&self.stream_id);
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
        info!("stream {} stopped", self.stream_id);
    }

    async fn finish_closed(&mut self) {
        self.set_state(StreamState::Closed, None).await;
        metrics::STREAM
            .with_label_values(&[&self.state.to_string()])
            .dec();
        self.deps.handles.write().await.remove(&self.stream_id);
        info!("stream {} closed", self.stream_id);
    }

    /// One INITIALIZING -> LIVE drive. Tears nothing down itself; the caller
    /// owns cleanup so cancellation and failure share one path.
    async fn attempt(&mut self, rx: &mut mpsc::Receiver<StreamMsg>) -> AttemptOutcome {
        // Port first; everything downstream needs it.
        let port = match self.deps.ports.reserve(self.stream_id).await {
            Ok(port) => port,
            Err(PortError::NoPortsAvailable) => {
                return AttemptOutcome::Failed(StreamFailure::new(
                    FailureKind::PortsExhausted,
                    "no udp port available for rtp ingress",
                ));
            }
        };
        self.resources.port = Some(port);

        let segment_dir = self
            .deps
            .config
            .recording
            .root
            .join(self.stream_id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&segment_dir).await {
            return AttemptOutcome::Failed(StreamFailure::new(
                FailureKind::Internal,
                format!("recording dir: {}", e),
            ));
        }

        let spec = PipelineSpec {
            rtsp_url: self.rtsp_url.clone(),
            rtp_host: self.deps.config.rtp.host.clone(),
            rtp_port: port,
            source_port: port.wrapping_add(1000).max(1024),
            segment_dir: segment_dir.clone(),
            playlist: segment_dir.join("playlist.m3u8"),
            segment_seconds: self.deps.config.recording.segment_seconds,
        };

        // The transcoder starts before the sniff so its first packet is ours.
        let event_tx = self.self_tx.clone();
        let (forward_tx, mut forward_rx) = mpsc::channel::<TranscoderEvent>(16);
        tokio::spawn(async move {
            while let Some(event) = forward_rx.recv().await {
                let _ = event_tx.send(StreamMsg::Event(StreamEvent::Transcoder(event))).await;
            }
        });
        let handle = match transcoder::spawn(self.stream_id.to_string(), spec.args(), forward_tx) {
            Ok(handle) => handle,
            Err(e) => {
                return AttemptOutcome::Failed(StreamFailure::new(
                    FailureKind::Transcoder,
                    format!("spawn: {}", e),
                ));
            }
        };
        self.resources.transcoder = Some(handle);

        // Bind-sniff-release: the SFU needs the SSRC before the producer exists.
        let host = self.deps.config.rtp.host.clone();
        let ssrc_timeout = Duration::from_secs(self.deps.config.stream.ssrc_timeout_secs);
        let capture = match with_mailbox(rx, ssrc::capture(&host, port, ssrc_timeout)).await {
            Step::Done(Ok(capture)) => capture,
            Step::Done(Err(ssrc::SsrcError::Timeout)) => {
                return AttemptOutcome::Failed(StreamFailure::new(
                    FailureKind::SsrcTimeout,
                    format!("no rtp packet on port {} within {:?}", port, ssrc_timeout),
                ));
            }
            Step::Done(Err(ssrc::SsrcError::Io(e))) => {
                return AttemptOutcome::Failed(StreamFailure::new(
                    FailureKind::Internal,
                    format!("ssrc capture socket: {}", e),
                ));
            }
            Step::Stop(reply) => return AttemptOutcome::Stopped(reply),
            Step::Failed(failure) => return AttemptOutcome::Failed(failure),
        };

        let _ = StreamsService::record_setup(
            self.deps.db.conn(),
            self.stream_id,
            Some(port),
            Some(capture.ssrc),
            None,
        )
        .await;

        // Hand the sniffed port to the SFU and point it at the transcoder.
        let sfu = self.deps.sfu.clone();
        let room = self.room_id();
        let transport = match with_mailbox(rx, sfu.create_plain_transport(&room, Some(port))).await
        {
            Step::Done(Ok(transport)) => transport,
            Step::Done(Err(e)) => {
                return AttemptOutcome::Failed(StreamFailure::new(
                    FailureKind::Sfu,
                    format!("create-plain-transport: {}", e),
                ));
            }
            Step::Stop(reply) => return AttemptOutcome::Stopped(reply),
            Step::Failed(failure) => return AttemptOutcome::Failed(failure),
        };
        self.resources.plain_transport_id = Some(transport.id.clone());

        let source_ip = capture.source_addr.ip().to_string();
        let source_port = capture.source_addr.port();
        match with_mailbox(
            rx,
            sfu.connect_plain_transport(&transport.id, &source_ip, source_port),
        )
        .await
        {
            Step::Done(Ok(())) => {}
            Step::Done(Err(e)) => {
                return AttemptOutcome::Failed(StreamFailure::new(
                    FailureKind::Sfu,
                    format!("connect-plain-transport: {}", e),
                ));
            }
            Step::Stop(reply) => return AttemptOutcome::Stopped(reply),
            Step::Failed(failure) => return AttemptOutcome::Failed(failure),
        }

        let rtp_parameters = video_rtp_parameters(capture.ssrc, VIDEO_PAYLOAD_TYPE);
        let producer = match with_mailbox(
            rx,
            sfu.create_producer(&transport.id, "video", rtp_parameters),
        )
        .await
        {
            Step::Done(Ok(producer)) => producer,
            Step::Done(Err(e)) => {
                return AttemptOutcome::Failed(StreamFailure::new(
                    FailureKind::Sfu,
                    format!("create-producer: {}", e),
                ));
            }
            Step::Stop(reply) => return AttemptOutcome::Stopped(reply),
            Step::Failed(failure) => return AttemptOutcome::Failed(failure),
        };
        self.resources.producer_sfu_id = Some(producer.id.clone());
        self.status.write().await.producer_sfu_id = Some(producer.id.clone());

        let _ = StreamsService::create_producer(
            self.deps.db.conn(),
            self.stream_id,
            &producer.id,
            capture.ssrc,
        )
        .await;
        let _ = StreamsService::record_setup(
            self.deps.db.conn(),
            self.stream_id,
            Some(port),
            Some(capture.ssrc),
            Some(producer.id.clone()),
        )
        .await;

        self.set_state(StreamState::Ready, None).await;

        // READY holds until the health monitor sees packets or the window closes.
        let readiness = Duration::from_secs(self.deps.config.stream.readiness_window_secs);
        let deadline = tokio::time::Instant::now() + readiness;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return AttemptOutcome::Failed(StreamFailure::new(
                    FailureKind::NoMedia,
                    format!("producer received no rtp within {:?}", readiness),
                ));
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(StreamMsg::Command(StreamCommand::Stop { reply }))) => {
                    return AttemptOutcome::Stopped(Some(reply));
                }
                Ok(Some(StreamMsg::Event(StreamEvent::MediaConfirmed))) => break,
                Ok(Some(StreamMsg::Event(event))) => {
                    if let Some(failure) = failure_of(&event) {
                        return AttemptOutcome::Failed(failure);
                    }
                }
                Ok(None) => return AttemptOutcome::Stopped(None),
                Err(_) => {
                    return AttemptOutcome::Failed(StreamFailure::new(
                        FailureKind::NoMedia,
                        format!("producer received no rtp within {:?}", readiness),
                    ));
                }
            }
        }

        self.set_state(StreamState::Live, None).await;
        info!(
            "stream {} live: port {} ssrc {:#010x} producer {}",
            self.stream_id, port, capture.ssrc, producer.id
        );
        AttemptOutcome::Live(StartedInfo {
            stream_id: self.stream_id,
            room_id: room,
            producer_sfu_id: producer.id,
        })
    }

    async fn live_loop(&mut self, rx: &mut mpsc::Receiver<StreamMsg>) -> LiveExit {
        loop {
            match rx.recv().await {
                Some(StreamMsg::Command(StreamCommand::Stop { reply })) => {
                    return LiveExit::Stopped(Some(reply));
                }
                Some(StreamMsg::Event(event)) => {
                    if let Some(failure) = failure_of(&event) {
                        warn!("stream {}: {}", self.stream_id, failure.describe());
                        return LiveExit::Failed(failure);
                    }
                }
                None => return LiveExit::Stopped(None),
            }
        }
    }

    /// Release everything this attempt accumulated, newest first. Safe to
    /// call with any subset present; stop cancellation reuses it.
    async fn teardown(&mut self, reason: &str) {
        let _ = self
            .deps
            .consumers
            .close_all_for_stream(self.stream_id, reason)
            .await;

        if let Some(handle) = self.resources.transcoder.take() {
            handle.stop().await;
        }
        if let Some(producer_id) = self.resources.producer_sfu_id.take() {
            if let Err(e) = self.deps.sfu.close_producer(&producer_id).await {
                warn!("stream {}: close-producer: {}", self.stream_id, e);
            }
            let _ = StreamsService::close_producers(self.deps.db.conn(), self.stream_id).await;
        }
        if let Some(transport_id) = self.resources.plain_transport_id.take() {
            if let Err(e) = self.deps.sfu.close_transport(&transport_id).await {
                warn!("stream {}: close-transport: {}", self.stream_id, e);
            }
            // Sweep the room so nothing half-created survives this stream.
            if let Err(e) = self.deps.sfu.close_transports_for_room(&self.room_id()).await {
                warn!("stream {}: close-transports-for-room: {}", self.stream_id, e);
            }
        }
        if self.resources.port.take().is_some() {
            self.deps.ports.release(self.stream_id).await;
        }
        self.status.write().await.producer_sfu_id = None;
        self.status.write().await.health = None;
    }
}

enum LiveExit {
    Stopped(Option<oneshot::Sender<()>>),
    Failed(StreamFailure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcoder_fatals_map_to_failure_kinds() {
        let refused = StreamEvent::Transcoder(TranscoderEvent::Fatal {
            kind: FatalKind::ConnectionRefused,
            line: "Connection refused".into(),
        });
        assert_eq!(failure_of(&refused).unwrap().kind, FailureKind::RtspConnection);

        let timeout = StreamEvent::Transcoder(TranscoderEvent::Fatal {
            kind: FatalKind::ConnectionTimeout,
            line: "Connection timed out".into(),
        });
        assert_eq!(failure_of(&timeout).unwrap().kind, FailureKind::RtspTimeout);
    }

    #[test]
    fn benign_events_do_not_fail() {
        assert!(failure_of(&StreamEvent::Transcoder(TranscoderEvent::Connected)).is_none());
        assert!(failure_of(&StreamEvent::MediaConfirmed).is_none());
    }

    #[test]
    fn flatline_and_sfu_loss_are_failures() {
        assert_eq!(
            failure_of(&StreamEvent::MediaFlatline).unwrap().kind,
            FailureKind::NoMedia
        );
        assert_eq!(
            failure_of(&StreamEvent::SfuLost).unwrap().kind,
            FailureKind::Sfu
        );
        assert_eq!(
            failure_of(&StreamEvent::ProducerClosed).unwrap().kind,
            FailureKind::Sfu
        );
    }

    #[test]
    fn ports_exhausted_is_not_retryable() {
        let failure = StreamFailure::new(FailureKind::PortsExhausted, "none left");
        assert!(!failure.retryable());
        assert!(StreamFailure::new(FailureKind::SsrcTimeout, "t").retryable());
    }

    #[test]
    fn failure_codes_render_screaming() {
        let failure = StreamFailure::new(FailureKind::SsrcTimeout, "no packet");
        assert_eq!(failure.describe(), "SSRC_CAPTURE_FAILED: no packet");
        assert!(matches!(
            failure.to_app_error(),
            AppError::SsrcCaptureFailed(_)
        ));
    }

    #[tokio::test]
    async fn with_mailbox_prefers_stop() {
        let (tx, mut rx) = mpsc::channel(4);
        let (stop_tx, _stop_rx) = oneshot::channel();
        tx.send(StreamMsg::Command(StreamCommand::Stop { reply: stop_tx }))
            .await
            .unwrap();
        let step = with_mailbox(&mut rx, std::future::pending::<()>()).await;
        assert!(matches!(step, Step::Stop(Some(_))));
    }

    #[tokio::test]
    async fn with_mailbox_ignores_benign_events() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(StreamMsg::Event(StreamEvent::Transcoder(
            TranscoderEvent::Connected,
        )))
        .await
        .unwrap();
        let step = with_mailbox(&mut rx, async { 42u32 }).await;
        assert!(matches!(step, Step::Done(42)));
    }

    #[tokio::test]
    async fn with_mailbox_aborts_on_fatal_event() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(StreamMsg::Event(StreamEvent::SfuLost)).await.unwrap();
        let step = with_mailbox(&mut rx, std::future::pending::<()>()).await;
        match step {
            Step::Failed(failure) => assert_eq!(failure.kind, FailureKind::Sfu),
            _ => panic!("expected failure"),
        }
    }
}
