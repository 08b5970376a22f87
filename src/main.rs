//! featureloop CLI entry point

use clap::Parser;
use featureloop::BuilderError;
use featureloop::cli::{self, Cli};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = cli::execute(cli).await {
        std::process::exit(report(&err));
    }
}

/// Print an error for the operator and pick the exit code
fn report(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<BuilderError>() {
        Some(builder) => {
            eprintln!("error[{}]: {builder}", builder.kind());
            if let Some(index) = builder.index() {
                eprintln!("  feature: {index}");
            }
            eprintln!("  hint: {}", builder.remediation());
            builder.exit_code()
        }
        None => {
            eprintln!("error[internal]: {err:#}");
            1
        }
    }
}
