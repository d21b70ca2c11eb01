use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use broadcast_hub::{Hub, HubConfig, cli::Cli};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = HubConfig::from(Cli::parse());
    let path = config.path.clone();
    let hub = Hub::bind(config).await?;
    let addr = hub.local_addr()?;
    info!("hub listening on ws://{}{}", addr, path);

    if let Err(err) = hub.run_until_ctrl_c().await {
        warn!("hub exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
