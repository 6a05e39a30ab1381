use anyhow::Context;
use pharma_gate::{config::AppConfig, init_tracing, serve};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Config path from the command line, falling back to built-in defaults
    // when no file is given
    let config = match env::args().nth(1) {
        Some(path) => AppConfig::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => AppConfig::default(),
    };

    serve(config).await.context("PharmaGate server error")?;

    Ok(())
}
