use tracing::info;
use tracing_subscriber::EnvFilter;

use trade_bionic::command::CommandControl;
use trade_bionic::config::Config;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    info!(config = ?config, "Starting trade-bionic backend");

    let command_control = CommandControl::new(config).await?;
    command_control.start().await?;

    Ok(())
}
