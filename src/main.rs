use pingometer::{Config, Prober};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries only the report.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pingometer=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    tracing::debug!(url = %config.target_url, timeout = ?config.timeout, "Starting probe");

    let result = match Prober::new(&config) {
        Ok(prober) => prober.probe(&config.target_url).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(record) => {
            print!("{}", record);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::debug!(code = e.code(), "Probe failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
