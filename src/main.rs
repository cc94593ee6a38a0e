use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ws_tunnel_relay::{DEFAULT_CONFIG_PATH, Server, load_config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;
    info!(
        config_file = %config_path,
        listen_ip = %config.listen.ip,
        listen_port = config.listen.port,
        tls = config.listen.tls.is_some(),
        allowed_proxy_ips = config.listen.allowed_proxy_ips.as_ref().map_or(0, Vec::len),
        "Configuration loaded"
    );

    let server = Server::bind(&config).await?;
    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
}
