use clap::Parser;
use std::env;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use camcore::config::Config;

mod signal;

#[derive(Parser)]
#[command(version)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let cfg = Config::parse(args.config);
    set_log(format!("camgate={},camcore={}", cfg.log.level, cfg.log.level));
    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let listener = tokio::net::TcpListener::bind(&cfg.http.listen)
        .await
        .unwrap();
    info!("Server listening on {}", listener.local_addr().unwrap());

    camcore::serve(cfg, listener, async {
        let msg = signal::wait_for_stop_signal().await;
        debug!("Received signal: {}", msg);
    })
    .await;
    info!("Server shutdown");
}

fn set_log(env_filter: String) {
    let _ = env::var("RUST_LOG").is_err_and(|_| {
        env::set_var("RUST_LOG", env_filter);
        true
    });
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true)
        .init();
}
