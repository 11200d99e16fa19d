use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use fogo360::config::AppConfig;
use fogo360::session::{SessionError, SessionManager};
use fogo360::sink::LogSink;
use fogo360::transport::event_channel;
use fogo360::transport::rumqtt::RumqttTransport;
use fogo360::ui::MessageBoard;
use tokio::runtime::Handle;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = AppConfig::load().await?;
    setup_logging_env(config.log_level()?);
    info!("Loaded configuration from {}", AppConfig::default_path().display());

    let (events_tx, events_rx) = event_channel();
    let transport = Arc::new(RumqttTransport::new(config.rumqtt_settings(), events_tx));
    let manager = SessionManager::new(config.session_config(), transport, events_rx);

    start_connect(&manager);

    if config.ui.headless {
        info!("Running headless, arrived messages go to the log");
        manager.set_sink(Arc::new(LogSink));
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))?;
        info!("Interrupted");
    } else {
        info!("Starting message board");
        let board_manager = manager.clone();
        let runtime = Handle::current();
        eframe::run_native(
            "Fogo360",
            eframe::NativeOptions::default(),
            Box::new(move |cc| Ok(Box::new(MessageBoard::new(cc, board_manager, runtime)))),
        )
        .map_err(|e| eyre!("Message board failed: {}", e))?;
    }

    manager.clear_sink();
    if tokio::time::timeout(SHUTDOWN_GRACE, manager.shutdown())
        .await
        .is_err()
    {
        warn!("Broker did not confirm the disconnect in time");
    }
    info!("Bye");
    Ok(())
}

/// Kicks off the first connect and logs its outcome once it resolves.
fn start_connect(manager: &SessionManager) {
    match manager.connect() {
        Ok(pending) => {
            tokio::spawn(async move {
                match pending.await {
                    Ok(()) => info!("Session established"),
                    Err(e) => error!("Initial connect failed: {}", e),
                }
            });
        }
        Err(e @ SessionError::AlreadyConnected) => info!("{}", e),
        Err(e) => error!("Could not start connecting: {}", e),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
