//! CLI entry point for the chain-event compliance monitor.
//!
//! ```text
//! main.rs (runtime + tracing)
//!     ↓
//! cli::run()
//!     ↓
//! Config::from_env → EventMonitor (pool, ingestor, processor, dispatcher)
//! ```

use chain_sentinel::{cli, observability};
use tracing::error;

#[tokio::main]
async fn main() {
    // Logging is set up before configuration so config errors are logged too.
    //   RUST_LOG=chain_sentinel=debug chain-sentinel watch ...
    //   LOG_JSON=true LOG_FILE=./logs/sentinel.log chain-sentinel watch ...
    dotenvy::dotenv().ok();
    let log_level = std::env::var("RUST_LOG").ok();
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    let _guard = match observability::init_tracing(log_level, log_file, json_output) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
