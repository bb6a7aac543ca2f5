use std::sync::Arc;

use anyhow::Context as _;
use tracing::{info, warn};
use zbus::Connection;

use miracle_wfd::config::{BusKind, Config};
use miracle_wfd::credentials::BusCallerIdentity;
use miracle_wfd::engine::PassiveEngine;
use miracle_wfd::login::LoginClient;
use miracle_wfd::notify::ChannelNotifier;
use miracle_wfd::{Context, Registry, WfdService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_err) = match Config::load() {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };

    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(config.log_filter.as_str())
            .compact()
            .init();
    }

    if let Some(err) = config_err {
        warn!("Falling back to default config: {err}");
    }

    let connection = match config.bus {
        BusKind::System => Connection::system().await,
        BusKind::Session => Connection::session().await,
    }
    .context("failed to connect to the message bus")?;

    let (notifier, rx) = ChannelNotifier::new();
    let registry = Registry::new(Arc::new(notifier), Arc::new(PassiveEngine)).into_shared();
    let ctx = Context::new(
        registry.clone(),
        Arc::new(BusCallerIdentity::new(connection.clone())),
        Arc::new(LoginClient::new(connection.clone(), config.login_timeout())),
    );

    let mut service = WfdService::new(connection, ctx.clone(), rx);
    if !service.expose(&ctx, &config.service_name).await {
        warn!("Running without a bus name, remote calls will not reach us");
    }

    {
        let mut registry = registry.lock().await;
        for entry in &config.static_sinks {
            match entry.to_sink().and_then(|sink| registry.add_sink(sink)) {
                Ok(()) => info!(sink = %entry.label, "Registered static sink"),
                Err(err) => warn!(sink = %entry.label, %err, "Skipping static sink"),
            }
        }
    }

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("Interrupted, shutting down");
        }
        _ = ctx.shutdown_requested() => {}
    }

    registry.lock().await.shutdown();
    service.shutdown(&ctx).await;

    Ok(())
}
