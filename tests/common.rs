#![allow(dead_code)]

use axum::{extract::Path, routing::get, Router};
use std::{
    net::{SocketAddr, TcpStream},
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};
use techblog::{
    config::{Config, ServerConfig},
    resources::FnResource,
};
use tokio::sync::Notify;

pub fn local_config(port: u16) -> Arc<Config> {
    Arc::new(Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..ServerConfig::default()
        },
        ..Config::default()
    })
}

/// `/` answers immediately, `/sleep/{ms}` answers after a delay and `/hang`
/// never answers. `entered` is notified whenever a slow handler starts.
pub fn slow_routes(entered: Arc<Notify>) -> Router {
    let sleeping = entered.clone();
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/sleep/{ms}",
            get(move |Path(ms): Path<u64>| {
                let entered = sleeping.clone();
                async move {
                    entered.notify_one();
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    "done"
                }
            }),
        )
        .route(
            "/hang",
            get(move || {
                let entered = entered.clone();
                async move {
                    entered.notify_one();
                    std::future::pending::<()>().await;
                    "never"
                }
            }),
        )
}

/// Ordered record of what happened during a shutdown.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Address of the listener under test, known only after start.
#[derive(Clone, Default)]
pub struct ListenerAddr(Arc<OnceLock<SocketAddr>>);

impl ListenerAddr {
    pub fn set(&self, addr: SocketAddr) {
        let _ = self.0.set(addr);
    }

    fn accepts_connections(&self) -> bool {
        self.0
            .get()
            .is_some_and(|addr| TcpStream::connect_timeout(addr, Duration::from_millis(200)).is_ok())
    }
}

/// A resource that records its name and whether the listener still accepted
/// connections at the moment it was closed.
pub fn recording_resource(name: &'static str, events: &Events, listener: &ListenerAddr) -> FnResource {
    let events = events.clone();
    let listener = listener.clone();
    FnResource::new(name, move || {
        let events = events.clone();
        let listener = listener.clone();
        async move {
            let state = if listener.accepts_connections() {
                "listener_open"
            } else {
                "listener_closed"
            };
            events.push(format!("{name}:{state}"));
            Ok(())
        }
    })
}

pub fn failing_resource(name: &'static str, events: &Events) -> FnResource {
    let events = events.clone();
    FnResource::new(name, move || {
        let events = events.clone();
        async move {
            events.push(format!("{name}:failed"));
            Err(anyhow::anyhow!("{name} refused to close"))
        }
    })
}

pub fn slow_resource(name: &'static str, delay: Duration) -> FnResource {
    FnResource::new(name, move || async move {
        tokio::time::sleep(delay).await;
        Ok(())
    })
}
