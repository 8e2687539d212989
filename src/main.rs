use std::io::Read;

use anyhow::Context;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use collab_orchestrator::{
    config::{Config, LogFormat},
    CollaborationRequest, Orchestrator,
};

/// Reads one JSON `CollaborationRequest` from stdin and prints the routing
/// plan and synthesized context. No model is invoked.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Collab orchestrator starting..."
    );

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read request from stdin")?;

    let request: CollaborationRequest = match serde_json::from_str(&input) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Invalid collaboration request");
            return Err(e).context("stdin must hold one JSON CollaborationRequest");
        }
    };

    let orchestrator = Orchestrator::new(config);
    let session = orchestrator
        .get_or_create_session(&request.session_id)
        .await;
    let decision = orchestrator
        .router()
        .plan(&request, &session.user_preferences)
        .await;
    let context = orchestrator
        .knowledge()
        .synthesize_context_for_request(&request, request.max_tokens)
        .await;

    let output = json!({
        "session_id": request.session_id,
        "decision": decision,
        "context": context,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    info!("Routing plan written");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
