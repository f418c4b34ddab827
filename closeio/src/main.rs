use clap::Parser;
use closeio::{
    Application, Config, telemetry,
    transport::install_crypto_provider,
    webhooks::{Listeners, Notification, events::EVENT_KEY},
};

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

fn log_event(notification: &Notification) {
    tracing::info!(
        model = notification.model().unwrap_or("unknown"),
        id = notification.instance().and_then(|i| i.get_str("id")).unwrap_or_default(),
        "Received Close event"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_crypto_provider();

    let args = closeio::config::Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);

    let mut listeners = Listeners::new();
    listeners.register(EVENT_KEY, log_event);

    let shutdown = shutdown_signal();
    Application::new(config, listeners)?.serve(shutdown).await
}
