//! This file defines the ref-backend binary entry point.

use ref_backend::app;
use ref_backend::cli;
use ref_backend::metrics;
use ref_backend::server;
use ref_backend::tracing;

use std::error::Error;
use std::process::exit;

use ::tracing::{event, Level};

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    metrics::register_metrics();
    app::init(&args);
    let state = match app::state(&args) {
        Ok(state) => state,
        Err(err) => {
            event!(Level::ERROR, "failed to start: {}", err);
            let mut current = err.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source);
                current = source.source();
            }
            exit(1)
        }
    };
    let service = app::service(state);
    if let Err(err) = server::serve(&args, service).await {
        event!(Level::ERROR, "server error: {}", err);
        exit(1)
    }
}
