use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use metrics_gateway::config::GatewayConfig;
use metrics_gateway::services::influx::{InfluxClient, TimeSeriesStore};
use metrics_gateway::services::metadata::{MetadataStore, SqliteMetadataStore};
use metrics_gateway::services::metadata_updater::MetadataUpdater;
use metrics_gateway::{cli, routes, state};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,metrics_gateway=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

/// Binds one listener; `setting` names the variable that configures its port.
async fn bind_listener(addr: &str, setting: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::AddrInUse {
            anyhow::anyhow!("{addr} is already in use by another process; free the port or change {setting}")
        } else {
            anyhow::Error::new(err).context(format!("failed to bind {addr}"))
        }
    })
}

/// Serves until `cancel` fires; a listener that stops on its own cancels the rest.
fn spawn_server(listener: TcpListener, app: Router, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let shutdown = cancel.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "listener failed");
        }
        cancel.cancel();
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_tracing()?;

    let config = Arc::new(GatewayConfig::from_env(args.config.clone())?);
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config.summary())?);
        return Ok(());
    }

    let metadata: Arc<dyn MetadataStore> = Arc::new(
        SqliteMetadataStore::open_in_dir(&config.data_dir)
            .context("failed to open metadata cache")?,
    );
    let store: Arc<dyn TimeSeriesStore> =
        Arc::new(InfluxClient::new(&config.influx, reqwest::Client::new()));
    let state = state::AppState::new(config.clone(), metadata.clone(), store);

    let cancel = CancellationToken::new();
    let mut servers = Vec::new();
    let mut updater_handle = None;

    if args.role.serves_updates() {
        let (queue, updater) = MetadataUpdater::new(
            metadata.clone(),
            config.metadata_queue_capacity,
            config.metadata_max_concurrency,
        );
        updater_handle = Some(updater.start());

        let app = routes::updates_router(state.clone().with_metadata_queue(queue));
        for port in &config.updates_ports {
            let addr = format!("{}:{}", config.updates_host, port);
            let listener = bind_listener(&addr, "GATEWAY_UPDATES_PORTS").await?;
            tracing::info!(addr = %addr, "updates listener ready");
            servers.push(spawn_server(listener, app.clone(), cancel.clone()));
        }
    }

    if args.role.serves_queries() {
        let app = routes::queries_router(state.clone());
        let addr = format!("{}:{}", config.queries_host, config.queries_port);
        let listener = bind_listener(&addr, "GATEWAY_QUERIES_PORT").await?;
        tracing::info!(addr = %addr, "queries listener ready");
        servers.push(spawn_server(listener, app, cancel.clone()));
    }
    drop(state);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    for server in servers {
        if let Err(err) = server.await {
            tracing::error!(error = %err, "listener task failed");
        }
    }
    // Every queue handle is gone with the listeners; wait for pending transactions.
    if let Some(handle) = updater_handle {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "metadata updater task failed");
        }
    }
    tracing::info!("metrics-gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::bind_listener;

    #[tokio::test]
    async fn busy_port_names_the_setting_to_change() {
        let Ok(taken) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
            return;
        };
        let addr = taken.local_addr().unwrap().to_string();

        for setting in ["GATEWAY_UPDATES_PORTS", "GATEWAY_QUERIES_PORT"] {
            let err = bind_listener(&addr, setting).await.unwrap_err().to_string();
            assert!(err.contains(&addr), "{err}");
            assert!(err.contains("already in use"), "{err}");
            assert!(err.contains(setting), "{err}");
        }
    }

    #[tokio::test]
    async fn free_port_binds() {
        let listener = bind_listener("127.0.0.1:0", "GATEWAY_QUERIES_PORT").await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
