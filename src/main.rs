use std::env;
use std::error::Error;
use std::io;
use std::process;

use sandbox_pool::{run, StoreConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(err) = try_main().await {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

async fn try_main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        return Err("Usage: sandbox-pool <commands.csv>".into());
    }
    let config = StoreConfig::from_env()?;
    run(&args[1], io::stdout().lock(), config).await
}
