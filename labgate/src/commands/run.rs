use anyhow::{anyhow, Context, Result};
use poem::listener::TcpListener;
use tracing::info;

use labgate_core::Services;
use labgate_http::build_app;

use crate::config::load_config;
use crate::Cli;

pub async fn command(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    config.validate().map_err(|e| anyhow!(e))?;

    let listen = config.http.listen.0;
    let services = Services::new(config)
        .await
        .context("Failed to initialize services")?;

    let app = build_app(services);

    info!(%listen, "Starting LabGate API server");
    poem::Server::new(TcpListener::bind(listen))
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down");
            },
            None,
        )
        .await?;

    Ok(())
}
