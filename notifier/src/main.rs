//! `notifier` binary.

use anyhow::Context;
use delayline_notifier::{Application, Config};
use delayline_runtime::config::config_path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,delayline=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = config_path();
    let config = Config::load(&path).with_context(|| format!("loading {}", path.display()))?;

    Application::build(config).await?.run().await
}
