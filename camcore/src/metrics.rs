use once_cell::sync::Lazy;
use prometheus::{IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
pub static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

pub static STREAM: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("camgate_streams", "streams by state"),
        &["state"],
    )
    .unwrap()
});

pub static CONSUMER: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("camgate_consumers", "attached consumers").unwrap());

pub static EXTRACTION_QUEUE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("camgate_extraction_queue", "queued extraction jobs").unwrap()
});

pub static TRANSCODER: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("camgate_transcoders", "running transcoder children").unwrap());
