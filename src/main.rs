use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    media::{decoder::FfmpegDecoderFactory, render::DefaultSinkFactory},
    pool::SessionPool,
    session::{StreamTarget, runner::SessionContext, transport::WsConnector},
};

mod api;
mod config;
mod handler;
mod media;
mod pool;
mod session;

/// Live camera viewer: pulls raw H.264/H.265 over WebSocket and decodes it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file (falls back to $NVR_LIVE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera to start on launch, as `id` or `id:channel`; repeatable
    #[arg(long = "camera", value_parser = parse_camera)]
    cameras: Vec<StreamTarget>,
}

fn parse_camera(value: &str) -> Result<StreamTarget, String> {
    let (id, channel) = match value.split_once(':') {
        Some((id, channel)) => (
            id,
            channel
                .parse::<u32>()
                .map_err(|e| format!("invalid channel {:?}: {}", channel, e))?,
        ),
        None => (value, 0),
    };
    if id.is_empty() {
        return Err("camera id is empty".to_string());
    }
    Ok(StreamTarget::new(id, channel))
}

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_bus", log::LevelFilter::Debug)
        .filter_module("tungstenite", log::LevelFilter::Warn)
        .filter_module("tokio_tungstenite", log::LevelFilter::Warn)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    let args = Args::parse();
    init_logging();

    let config = config::init(args.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Error loading config: {:#}", e);
        std::process::exit(1);
    });
    let connector = WsConnector::new(&config.gateway_url).unwrap_or_else(|e| {
        eprintln!("Invalid gateway url {}: {:#}", config.gateway_url, e);
        std::process::exit(1);
    });
    if let Err(e) = ffmpeg_bus::init() {
        // Sessions report this per tile as platform-unsupported.
        log::error!("ffmpeg init failed: {:#}", e);
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let ctx = SessionContext {
        connector: Arc::new(connector),
        decoders: Arc::new(FfmpegDecoderFactory::new()),
        sinks: Arc::new(DefaultSinkFactory::new(
            config.snapshot_dir.clone(),
            config.snapshot_interval(),
        )),
        settings: config.session_settings(),
        events: events_tx,
    };
    let pool = Arc::new(Mutex::new(SessionPool::new(ctx, config.max_sessions)));

    let cancel = CancellationToken::new();
    let event_loop = tokio::spawn(pool::run_event_loop(
        Arc::clone(&pool),
        events_rx,
        cancel.clone(),
    ));
    let api = api::start_api_server(
        api::AppState {
            pool: Arc::clone(&pool),
            default_codec: config.default_codec,
        },
        config.listen.clone(),
        cancel.clone(),
    );

    for mut target in args.cameras {
        target.codec = config.default_codec;
        let camera = target.to_string();
        match pool.lock().await.activate(target).await {
            Ok(activation) => log::info!("{}: {:?}", camera, activation),
            Err(e) => log::warn!("{}: {:#}", camera, e),
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    pool.lock().await.shutdown().await;
    let _ = api.await;
    let _ = event_loop.await;

    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_camera() {
        let target = parse_camera("1032").unwrap();
        assert_eq!((target.camera_id.as_str(), target.channel), ("1032", 0));

        let target = parse_camera("lumi.cam:2").unwrap();
        assert_eq!((target.camera_id.as_str(), target.channel), ("lumi.cam", 2));

        assert!(parse_camera(":1").is_err());
        assert!(parse_camera("cam:x").is_err());
    }
}
