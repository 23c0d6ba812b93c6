use std::{io, net::SocketAddr, time::Duration};
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to load TLS material: {0}")]
    Tls(#[source] io::Error),
    #[error("Server is already started")]
    AlreadyStarted,

    #[error("HTTP server failed: {0}")]
    Serve(#[source] io::Error),
    #[error("HTTP server stopped unexpectedly")]
    ServerExited,

    #[error("Could not stop server gracefully and force to close: {0}")]
    ForceCloseFailed(String),
    #[error("Failed to close {name}: {reason:#}")]
    ResourceClose { name: String, reason: anyhow::Error },
    /// `unclosed` names the resources that never got to close.
    #[error("Shutdown did not complete within {deadline:?}")]
    ShutdownTimedOut {
        deadline: Duration,
        unclosed: Vec<String>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Errors that prevent the service from ever accepting traffic.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Validation(_)
                | Error::InvalidAddress { .. }
                | Error::Bind { .. }
                | Error::Tls(_)
                | Error::AlreadyStarted
        )
    }

    /// Errors raised while stopping; resources may have been leaked.
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            Error::ForceCloseFailed(_)
                | Error::ResourceClose { .. }
                | Error::ShutdownTimedOut { .. }
        )
    }

    pub fn invalid_address(address: impl Into<String>, reason: impl ToString) -> Self {
        Error::InvalidAddress {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub fn resource_close(name: impl Into<String>, reason: impl Into<anyhow::Error>) -> Self {
        Error::ResourceClose {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display_includes_address() {
        let error = Error::Bind {
            address: "127.0.0.1:8080".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        let display = format!("{}", error);
        assert!(display.contains("127.0.0.1:8080"));
        assert!(error.is_startup());
        assert!(!error.is_shutdown());
    }

    #[test]
    fn test_resource_close_display_includes_context_chain() {
        let reason = anyhow::anyhow!("connection reset").context("closing pool");
        let error = Error::resource_close("database", reason);
        let display = format!("{}", error);
        assert!(display.contains("database"));
        assert!(display.contains("closing pool"));
        assert!(display.contains("connection reset"));
        assert!(error.is_shutdown());
    }

    #[test]
    fn test_runtime_errors_are_neither_startup_nor_shutdown() {
        let error = Error::Serve(io::Error::other("accept failed"));
        assert!(!error.is_startup());
        assert!(!error.is_shutdown());
        assert!(!Error::ServerExited.is_startup());
    }

    #[test]
    fn test_invalid_address_display() {
        let error = Error::invalid_address("localhost:http", "invalid port value");
        let display = format!("{}", error);
        assert!(display.contains("Invalid address"));
        assert!(display.contains("localhost:http"));
        assert!(error.is_startup());
    }

    #[test]
    fn test_shutdown_timed_out_display() {
        let error = Error::ShutdownTimedOut {
            deadline: Duration::from_secs(10),
            unclosed: vec!["redis".to_string()],
        };
        assert_eq!(format!("{}", error), "Shutdown did not complete within 10s");
    }
}
