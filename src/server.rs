use crate::{
    config::TlsConfig,
    errors::{Error, Result},
};
use axum::Router;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use std::{io, net::SocketAddr, path::PathBuf, time::Duration};
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

/// How long an aborted accept loop gets to wind down after a forced close.
pub const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request finished before the deadline.
    Graceful,
    /// The deadline passed and the remaining connections were dropped.
    Forced { aborted: usize },
    /// The server was already stopped.
    NotRunning,
}

/// One bound listener serving a router in a background task.
pub struct HttpServer {
    handle: Handle<SocketAddr>,
    task: Option<JoinHandle<io::Result<()>>>,
    local_addr: SocketAddr,
    tls: bool,
}

async fn resolve(address: &str) -> Result<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }

    tokio::net::lookup_host(address)
        .await
        .map_err(|e| Error::invalid_address(address, e))?
        .next()
        .ok_or_else(|| Error::invalid_address(address, "no addresses resolved"))
}

fn joined(result: Result<io::Result<()>, JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Serve(e)),
        Err(e) => Err(Error::Serve(io::Error::other(e))),
    }
}

/// A serve error after the forced close is only worth a warning; the
/// connections are gone either way.
fn force_closed(
    result: Result<io::Result<()>, JoinError>,
    aborted: usize,
) -> Result<ShutdownOutcome> {
    match result {
        Ok(Ok(())) => Ok(ShutdownOutcome::Forced { aborted }),
        Ok(Err(e)) => {
            warn!(error = %e, "Accept loop failed while being force closed");
            Ok(ShutdownOutcome::Forced { aborted })
        }
        Err(e) => Err(Error::ForceCloseFailed(e.to_string())),
    }
}

impl HttpServer {
    /// Binds `address` and starts serving `router` in the background.
    ///
    /// Address, bind and TLS errors are returned before the accept loop is
    /// spawned. On success the loop is already listening.
    pub async fn start(address: &str, router: Router, tls: Option<&TlsConfig>) -> Result<Self> {
        let addr = resolve(address).await?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind {
                address: addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| Error::Bind {
            address: addr,
            source,
        })?;
        let std_listener = listener.into_std().map_err(|source| Error::Bind {
            address: local_addr,
            source,
        })?;

        let rustls = match tls {
            Some(tls) => Some(load_tls(tls).await?),
            None => None,
        };

        let handle = Handle::new();
        let server_handle = handle.clone();
        let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
        let tls_enabled = rustls.is_some();

        let task = match rustls {
            Some(tls_config) => {
                let server = axum_server::from_tcp_rustls(std_listener, tls_config).map_err(|e| {
                    Error::Bind {
                        address: local_addr,
                        source: io::Error::other(e),
                    }
                })?;
                tokio::spawn(server.handle(server_handle).serve(make_service))
            }
            None => {
                warn!("TLS is disabled. Starting insecure HTTP server.");
                let server = axum_server::from_tcp(std_listener).map_err(|e| Error::Bind {
                    address: local_addr,
                    source: io::Error::other(e),
                })?;
                tokio::spawn(server.handle(server_handle).serve(make_service))
            }
        };

        let mut server = HttpServer {
            handle,
            task: Some(task),
            local_addr,
            tls: tls_enabled,
        };

        if server.handle.listening().await.is_none() {
            return Err(server.failed().await);
        }

        info!(
            address = %local_addr,
            tls = server.tls,
            "Server is listening on {}",
            local_addr
        );

        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.handle.connection_count()
    }

    /// Resolves once the accept loop ends on its own, which is always fatal.
    ///
    /// Never resolves for a stopped server, so it can be raced against a
    /// termination trigger.
    pub async fn failed(&mut self) -> Error {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };

        let result = task.await;
        self.task = None;

        match joined(result) {
            Ok(()) => Error::ServerExited,
            Err(e) => e,
        }
    }

    /// Stops accepting connections and waits up to `deadline` for in-flight
    /// requests, then force closes whatever is left.
    ///
    /// The accept loop stays owned by the server until this returns, so a
    /// caller that gives up early can still [`abort`](Self::abort) it.
    pub async fn shutdown(&mut self, deadline: Duration) -> Result<ShutdownOutcome> {
        if self.task.is_none() {
            return Ok(ShutdownOutcome::NotRunning);
        }

        let outcome = self.drain(deadline).await;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        outcome
    }

    async fn drain(&mut self, deadline: Duration) -> Result<ShutdownOutcome> {
        let Some(task) = self.task.as_mut() else {
            return Ok(ShutdownOutcome::NotRunning);
        };

        self.handle.graceful_shutdown(None);

        if let Ok(result) = tokio::time::timeout(deadline, &mut *task).await {
            joined(result)?;
            return Ok(ShutdownOutcome::Graceful);
        }

        let aborted = self.handle.connection_count();
        warn!(
            aborted,
            deadline = ?deadline,
            "Could not stop server gracefully, forcing connections closed"
        );
        self.handle.shutdown();

        match tokio::time::timeout(FORCE_CLOSE_GRACE, task).await {
            Ok(result) => force_closed(result, aborted),
            Err(_) => Err(Error::ForceCloseFailed(format!(
                "accept loop still running {:?} after forced close",
                FORCE_CLOSE_GRACE
            ))),
        }
    }

    /// Drops every connection and the accept loop without waiting.
    pub fn abort(&mut self) {
        self.handle.shutdown();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
impl HttpServer {
    /// Ends the accept loop behind the server's back.
    pub(crate) fn stop_accepting(&self) {
        self.handle.graceful_shutdown(None);
    }

    /// Kills the accept loop task outright.
    pub(crate) fn kill_accept_loop(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn load_tls(tls: &TlsConfig) -> Result<RustlsConfig> {
    let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) else {
        return Err(Error::Tls(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cert_file and key_file are required when TLS is enabled",
        )));
    };

    RustlsConfig::from_pem_file(PathBuf::from(cert_file), PathBuf::from(key_file))
        .await
        .map_err(Error::Tls)
}
