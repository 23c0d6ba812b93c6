use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod resources;
pub mod server;
pub mod signals;

pub use errors::{Error, Result};
pub use lifecycle::{Coordinator, State};

/// Serves `routes` behind the standard middleware stack until `trigger` is
/// cancelled, then shuts down in order.
pub async fn serve(
    config: Arc<config::Config>,
    routes: Router,
    trigger: CancellationToken,
) -> Result<()> {
    Coordinator::new(config, http::app(routes)).run(trigger).await
}
