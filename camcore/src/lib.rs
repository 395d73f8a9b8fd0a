use std::future::Future;
use std::sync::Arc;

use axum::extract::Request;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span};
use uuid::Uuid;

use auth::{validate_middleware, AuthState};

use crate::config::Config;
use crate::consumer::ConsumerRegistry;
use crate::db::DatabaseService;
use crate::extract::ExtractionPool;
use crate::hls::{RecordingStore, SegmentPins};
use crate::route::AppState;
use crate::sfu::SfuClient;
use crate::stream::manager::StreamManager;

pub mod config;
pub mod error;
pub mod result;

mod consumer;
mod convert;
mod db;
mod extract;
mod hls;
mod metrics;
mod route;
mod sfu;
mod stream;
mod transcoder;

pub async fn serve<F>(cfg: Config, listener: TcpListener, signal: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics_register();
    let config = Arc::new(cfg);

    let db = match DatabaseService::new(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!("database init failed: {}", e);
            return;
        }
    };

    if let Err(e) = bootstrap_clients(&db, &config).await {
        error!("client bootstrap failed: {}", e);
        return;
    }

    let sfu = SfuClient::new(config.sfu.clone());
    let consumers = Arc::new(ConsumerRegistry::new(
        db.clone(),
        sfu.clone(),
        config.stream.clone(),
    ));
    let streams = StreamManager::new(config.clone(), db.clone(), sfu.clone(), consumers.clone())
        .await;

    let recordings = RecordingStore::new(config.recording.root.clone());
    let pins = SegmentPins::default();
    let extractor = ExtractionPool::new(
        config.extraction.clone(),
        db.clone(),
        recordings.clone(),
        pins.clone(),
    );

    tokio::spawn(stream::health::run(
        config.stream.clone(),
        streams.handles(),
        sfu.clone(),
    ));
    tokio::spawn(consumers.as_ref().clone().run_pending_sweep());
    tokio::spawn(hls::pruner::run(
        config.recording.clone(),
        recordings.clone(),
        pins.clone(),
    ));

    let app_state = AppState {
        config: config.clone(),
        db,
        sfu,
        streams: streams.clone(),
        consumers,
        extractor,
        recordings,
    };

    let app = router(app_state)
        .layer(if config.http.cors {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        })
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %Uuid::new_v4(),
                )
            }),
        );

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap_or_else(|e| error!("Application error: {e}"));

    streams.shutdown().await;
    info!("gateway shutdown complete");
}

fn router(app_state: AppState) -> Router {
    let auth_state = AuthState::new(&app_state.config.auth.jwt_secret);
    let protected = route::device::route()
        .merge(route::stream::route())
        .merge(route::consumer::route())
        .merge(route::hls::route())
        .merge(route::snapshot::route())
        .merge(route::bookmark::route())
        .layer(middleware::from_fn_with_state(
            auth_state,
            validate_middleware,
        ));

    Router::new()
        .merge(protected)
        .merge(route::auth_token::route())
        .merge(route::health::route())
        .route(api::path::METRICS, get(metrics_text))
        .with_state(app_state)
}

/// Config-declared API clients are upserted at boot, so a fresh gateway is
/// usable without a manual credential step.
async fn bootstrap_clients(db: &DatabaseService, config: &Config) -> anyhow::Result<()> {
    use crate::db::service::clients::ClientsService;
    for client in &config.auth.clients {
        for scope in &client.scopes {
            if !auth::scope::is_known(scope) {
                tracing::warn!(
                    "client {} declares unknown scope {}",
                    client.client_id,
                    scope
                );
            }
        }
        if ClientsService::get(db.conn(), &client.client_id).await?.is_none() {
            ClientsService::create(
                db.conn(),
                &client.client_id,
                &client.client_secret,
                &client.scopes,
            )
            .await?;
            info!("bootstrapped api client {}", client.client_id);
        }
    }
    Ok(())
}

fn metrics_register() {
    metrics::REGISTRY
        .register(Box::new(metrics::STREAM.clone()))
        .unwrap();
    metrics::REGISTRY
        .register(Box::new(metrics::CONSUMER.clone()))
        .unwrap();
    metrics::REGISTRY
        .register(Box::new(metrics::EXTRACTION_QUEUE.clone()))
        .unwrap();
    metrics::REGISTRY
        .register(Box::new(metrics::TRANSCODER.clone()))
        .unwrap();
}

async fn metrics_text() -> String {
    metrics::ENCODER
        .encode_to_string(&metrics::REGISTRY.gather())
        .unwrap()
}
