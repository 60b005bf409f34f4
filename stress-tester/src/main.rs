mod config;
mod report;
mod runner;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::StressConfig;
use crate::runner::{benchmark_model, Runner, StressError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatekeeper_stress=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StressConfig::load()?;
    let runner = Arc::new(Runner::new(&config)?);

    tracing::info!(base_url = %config.base_url, "Checking connection");
    match runner.check_connection().await {
        Ok(models) => tracing::info!(models, "Connection OK"),
        Err(e @ StressError::Rejected(_)) => {
            tracing::error!(error = %e, "API key refused, aborting");
            return Err(e.into());
        }
        Err(e) => {
            tracing::error!(error = %e, "Could not reach the gateway");
            return Err(e.into());
        }
    }

    for (i, model) in config.models.iter().enumerate() {
        let report = benchmark_model(runner.clone(), model, &config).await;
        if report.successes() == 0 {
            tracing::error!(model = %model, "Every request failed, check the key and the gateway");
        }
        println!("{}", report);

        if i + 1 < config.models.len() {
            tracing::info!(secs = config.cooldown_secs, "Cooling down");
            tokio::time::sleep(config.cooldown()).await;
        }
    }

    Ok(())
}
