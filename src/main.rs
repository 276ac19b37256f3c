/// Docflow server entry point
///
/// Loads `.env` when present, reads configuration from the environment and
/// starts the HTTP server together with the background job scheduler.

use docflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Defaults to 0.0.0.0:3004 and sqlite://data/docflow.db
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
