use axum::Router;
use std::{process::ExitCode, sync::Arc};
use techblog::{config::Config, http, logging, signals, Coordinator};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = logging::init(&config) {
        eprintln!("Failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let trigger = match signals::termination_token() {
        Ok(trigger) => trigger,
        Err(err) => {
            error!(error = %err, "Failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    info!(env = %config.server.env, "Starting Techblog server...");

    // Store and cache connections register with `with_resource`, in close order.
    let mut coordinator = Coordinator::new(config, http::app(Router::new()));

    match coordinator.run(trigger).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, state = ?coordinator.state(), "Server terminated with failure");
            ExitCode::FAILURE
        }
    }
}
