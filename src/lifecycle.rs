//! Service lifecycle coordination.
//!
//! ```text
//! Idle ─start─▶ Starting ─▶ Running ─trigger─▶ ShuttingDown ─▶ Stopped
//!                  │           │                    │
//!                  └───────────┴────────────────────┴──────▶ ErrorStopped
//! ```
//!
//! Shutdown order is fixed: drain the listener under the drain timeout, then
//! close auxiliary resources in registration order. The whole sequence is
//! bounded by the shutdown deadline, and the drain timeout is cut short when
//! it would leave no room for a forced close inside that bound.

use crate::{
    config::Config,
    errors::{Error, Result},
    resources::{Resource, Resources},
    server::{HttpServer, ShutdownOutcome, FORCE_CLOSE_GRACE},
};
use axum::Router;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
    ErrorStopped,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Stopped | State::ErrorStopped)
    }
}

pub struct Coordinator {
    config: Arc<Config>,
    router: Option<Router>,
    resources: Resources,
    server: Option<HttpServer>,
    trigger: Option<CancellationToken>,
    state: State,
    drain_timeout: Duration,
    shutdown_deadline: Duration,
    outcome: Option<ShutdownOutcome>,
}

impl Coordinator {
    pub fn new(config: Arc<Config>, router: Router) -> Self {
        let drain_timeout = config.shutdown_timeout();
        let shutdown_deadline = config.shutdown_deadline();

        Coordinator {
            config,
            router: Some(router),
            resources: Resources::new(),
            server: None,
            trigger: None,
            state: State::Idle,
            drain_timeout,
            shutdown_deadline,
            outcome: None,
        }
    }

    /// Registers a resource closed after the listener stops. Resources close
    /// in the order they were registered.
    pub fn with_resource(mut self, resource: impl Resource + 'static) -> Self {
        self.resources.push(resource);
        self
    }

    /// Time in-flight requests get before connections are force closed.
    /// Capped at shutdown so the forced close still fits in the deadline.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline = deadline;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(HttpServer::local_addr)
    }

    /// How the listener stopped, once shutdown has run.
    pub fn outcome(&self) -> Option<ShutdownOutcome> {
        self.outcome
    }

    /// The drain timeout actually applied at shutdown.
    pub fn effective_drain_timeout(&self) -> Duration {
        self.drain_timeout
            .min(self.shutdown_deadline.saturating_sub(FORCE_CLOSE_GRACE))
    }

    /// Starts the listener and returns as soon as it accepts connections.
    pub async fn start(&mut self, trigger: CancellationToken) -> Result<SocketAddr> {
        if self.state != State::Idle {
            return Err(Error::AlreadyStarted);
        }
        let Some(router) = self.router.take() else {
            return Err(Error::AlreadyStarted);
        };

        self.state = State::Starting;
        let address = self.config.address();

        match HttpServer::start(&address, router, self.config.tls()).await {
            Ok(server) => {
                let addr = server.local_addr();
                self.server = Some(server);
                self.trigger = Some(trigger);
                self.state = State::Running;
                Ok(addr)
            }
            Err(err) => {
                self.state = State::ErrorStopped;
                error!(error = %err, address = %address, "Failed to start server");
                Err(err)
            }
        }
    }

    /// Waits for the termination trigger, then shuts down.
    ///
    /// If the accept loop dies first, resources are still closed and the
    /// serving error is returned.
    pub async fn await_and_shutdown(&mut self) -> Result<()> {
        if self.state != State::Running {
            return self.shutdown().await;
        }
        let Some(trigger) = self.trigger.clone() else {
            return self.shutdown().await;
        };
        let Some(server) = self.server.as_mut() else {
            return self.shutdown().await;
        };

        tokio::select! {
            _ = trigger.cancelled() => {
                info!("Termination triggered, shutting down");
            }
            err = server.failed() => {
                self.state = State::ErrorStopped;
                error!(error = %err, "HTTP server stopped unexpectedly");
                if let Err(close_err) = self.resources.close_all().await {
                    error!(error = %close_err, "Failed to close resources after server failure");
                }
                return Err(err);
            }
        }

        self.shutdown().await
    }

    /// Starts the listener, waits for the trigger and shuts down.
    pub async fn run(&mut self, trigger: CancellationToken) -> Result<()> {
        self.start(trigger).await?;
        self.await_and_shutdown().await
    }

    /// Ordered, deadline-bounded shutdown. A no-op unless the coordinator is running.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state != State::Running {
            return Ok(());
        }
        self.state = State::ShuttingDown;

        let deadline = self.shutdown_deadline;
        let result = match tokio::time::timeout(deadline, self.shutdown_sequence()).await {
            Ok(result) => result,
            Err(_) => {
                if let Some(server) = self.server.as_mut() {
                    server.abort();
                }
                let unclosed = self.resources.unclosed();
                if !unclosed.is_empty() {
                    error!(
                        resources = ?unclosed,
                        "Shutdown deadline passed before these resources were closed"
                    );
                }
                Err(Error::ShutdownTimedOut { deadline, unclosed })
            }
        };

        match &result {
            Ok(()) => {
                self.state = State::Stopped;
                info!("Server shutdown gracefully");
            }
            Err(err) => {
                self.state = State::ErrorStopped;
                error!(error = %err, "Shutdown failed, resources may be leaked");
            }
        }

        result
    }

    async fn shutdown_sequence(&mut self) -> Result<()> {
        let drain_timeout = self.effective_drain_timeout();
        if drain_timeout < self.drain_timeout {
            warn!(
                requested = ?self.drain_timeout,
                applied = ?drain_timeout,
                deadline = ?self.shutdown_deadline,
                "Drain timeout shortened to fit the shutdown deadline"
            );
        }

        let listener = match self.server.as_mut() {
            Some(server) => server.shutdown(drain_timeout).await,
            None => Ok(ShutdownOutcome::NotRunning),
        };

        match &listener {
            Ok(outcome) => {
                self.outcome = Some(*outcome);
                match outcome {
                    ShutdownOutcome::Graceful => info!("HTTP server drained"),
                    ShutdownOutcome::Forced { aborted } => warn!(
                        aborted,
                        "HTTP server force closed after drain timeout, in-flight requests were lost"
                    ),
                    ShutdownOutcome::NotRunning => {}
                }
            }
            Err(err) => error!(error = %err, "HTTP server did not stop cleanly"),
        }

        let resources = self.resources.close_all().await;

        listener?;
        resources
    }
}
