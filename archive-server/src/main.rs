use anyhow::Result;
use archive_core::broadcast::{Broadcaster, ChannelDispatcher};
use archive_core::gateway::OfflineGateway;
use archive_core::jobs::ProcessSupervisor;
use archive_core::keyvalue::KeyValueStore;
use archive_core::media::FfprobeProbe;
use archive_core::watcher::FileWatcher;
use archive_core::{Archive, ArchiveHandle, ConfigManager, Coordinator, EnvConfigOverride, Services};
use clap::Parser;
use common::StreamEvent;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(version, about = "Livestream VOD archiver")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/archiver.toml")]
    config: PathBuf,

    /// Read stream events as JSON lines from stdin
    #[arg(long)]
    events_stdin: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 加载配置
    let mut manager = ConfigManager::new(args.config.clone());
    manager.load().await?;
    let mut config = manager.get_config().clone();
    EnvConfigOverride::apply_overrides(&mut config);

    // 初始化日志 - RUST_LOG 优先于配置
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_target(false)
        .init();

    info!("🚀 VOD archiver starting...");
    info!("✓ Configuration loaded from {}", args.config.display());
    info!("  VOD root: {}", config.storage.vod_root.display());

    let config = Arc::new(config);
    let keyvalue = KeyValueStore::load(config.keyvalue_path())?;

    // 外部协作方
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (watcher, watch_rx) = FileWatcher::new();
    let dispatcher = Arc::new(ChannelDispatcher::new(config.broadcast.channel_capacity));
    let mut broadcasts = dispatcher.subscribe();
    let services = Services {
        supervisor: Arc::new(ProcessSupervisor::new()),
        probe: Arc::new(FfprobeProbe::with_path(config.media.ffprobe_path.clone())),
        watcher: watcher.clone(),
        broadcaster: Broadcaster::new(dispatcher, config.broadcast.debounce),
        events: events_tx.clone(),
        gateway: Arc::new(OfflineGateway),
    };

    let mut archive = Archive::new(config.clone(), services, keyvalue);
    let channels = archive.load_channels().await?;
    info!("✓ {} channel(s) loaded", channels);

    let cancel = CancellationToken::new();
    let handle = ArchiveHandle::new(events_tx);

    let watcher_task = watcher.spawn(config.reconcile.watcher_poll_interval, cancel.clone());
    let ticker_task = handle.spawn_reconcile_ticker(config.reconcile.reconcile_interval, cancel.clone());

    // 广播输出到日志
    tokio::spawn(async move {
        while let Ok(message) = broadcasts.recv().await {
            debug!("📺 {} {}", message.event, message.payload);
        }
    });

    if args.events_stdin {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<StreamEvent>(&line) {
                        Ok(event) => {
                            if !handle.stream_event(event) {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring malformed stream event: {}", e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
            info!("Stream event input closed");
        });
        info!("✓ Reading stream events from stdin");
    }

    let coordinator = Coordinator::new(archive, events_rx, watch_rx, cancel.clone());
    let coordinator_task = tokio::spawn(coordinator.run());

    info!("✅ VOD archiver ready!");
    info!("   Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    cancel.cancel();

    let archive = coordinator_task.await?;
    if let Err(e) = archive.persist_channels().await {
        error!("Failed to persist channels on shutdown: {}", e);
    }
    let _ = tokio::join!(watcher_task, ticker_task);

    info!("👋 VOD archiver stopped");
    Ok(())
}
