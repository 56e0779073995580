use airwave_daemon::catalog::RadioApi;
use airwave_daemon::mpv::MpvEngine;
use airwave_daemon::presentation::TracingPresentation;
use airwave_daemon::session::{DaemonEvent, SessionDeps, SessionHost};
use airwave_daemon::{http, socket, BroadcastMessage};
use airwave_proto::config::Config;
use airwave_proto::state::JsonPlaybackStore;
use airwave_proto::stores::{FavoritesStore, RecentStore, SettingsStore};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Forwards WARN and ERROR events to connected clients.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let now = chrono::Local::now();
        let mut message = format!("{} [{}] ", now.format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = airwave_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("airwaved.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,airwave_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let api = Arc::new(RadioApi::new(&config.catalog)?);

    let (engine, engine_events, backend_events) = match MpvEngine::launch(&config.mpv).await {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to start mpv: {}", e);
            return Err(e);
        }
    };

    // All external inputs funnel into the session loop
    let (event_tx, event_rx) = mpsc::channel::<DaemonEvent>(256);

    let deps = SessionDeps {
        engine,
        engine_events,
        backend_events: Some(backend_events),
        catalog: api.clone(),
        metadata: api,
        playback_store: Arc::new(JsonPlaybackStore::new(config.daemon.state_file.clone())),
        favorites: FavoritesStore::open(config.daemon.favorites_file.clone()),
        recent: RecentStore::open(config.daemon.recent_file.clone(), config.browse.recent_limit),
        settings: SettingsStore::open(config.daemon.settings_file.clone()),
        presentation: Box::new(TracingPresentation::default()),
        broadcast_tx: broadcast_tx.clone(),
        config: config.clone(),
    };
    let mut host = SessionHost::start(deps, event_tx.clone()).await;
    let state_manager = host.state_manager();

    let _socket_handle = socket::start_server(
        config.control.bind_address.clone(),
        config.control.tcp_port,
        state_manager.clone(),
        host.browse_tree(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.control.http_enabled {
        let _http_handle = http::start_server(
            config.control.bind_address.clone(),
            config.control.http_port,
            state_manager,
            host.browse_tree(),
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    host.restore().await;

    info!("Daemon initialised, running event loop");
    host.run(event_rx).await?;

    Ok(())
}
