//! Auxiliary resources closed after the HTTP listener has stopped.
//!
//! Store and cache connections register here. They are closed strictly in
//! registration order so in-flight requests are never cut off mid-query.

use crate::errors::{Error, Result};
use futures::future::BoxFuture;
use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
};
use tracing::{debug, error};

pub trait Resource: Send + Sync {
    fn name(&self) -> &str;

    fn close(&self) -> BoxFuture<'_, anyhow::Result<()>>;
}

type CloseFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A [`Resource`] backed by a closure, for collaborators without their own type.
pub struct FnResource {
    name: String,
    close: CloseFn,
}

impl FnResource {
    pub fn new<F, Fut>(name: impl Into<String>, close: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        FnResource {
            name: name.into(),
            close: Box::new(move || Box::pin(close())),
        }
    }
}

impl Resource for FnResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        (self.close)()
    }
}

#[derive(Default)]
pub struct Resources {
    entries: Vec<Box<dyn Resource>>,
    attempted: AtomicUsize,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: impl Resource + 'static) {
        self.entries.push(Box::new(resource));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|r| r.name())
    }

    /// Names of the resources `close_all` has not reached yet.
    pub fn unclosed(&self) -> Vec<String> {
        self.entries
            .iter()
            .skip(self.attempted.load(Ordering::Acquire))
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Closes every resource in registration order.
    ///
    /// A failure does not stop the remaining resources from closing; the
    /// first failure is returned.
    pub async fn close_all(&self) -> Result<()> {
        let mut first_error = None;

        for resource in &self.entries {
            match resource.close().await {
                Ok(()) => debug!(resource = resource.name(), "Resource closed"),
                Err(reason) => {
                    let message = format!("{reason:#}");
                    error!(resource = resource.name(), error = %message, "Failed to close resource");
                    first_error.get_or_insert(Error::resource_close(resource.name(), reason));
                }
            }
            self.attempted.fetch_add(1, Ordering::AcqRel);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> FnResource {
        let log = log.clone();
        FnResource::new(name, move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_close_all_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut resources = Resources::new();
        resources.push(recording("database", &log));
        resources.push(recording("redis", &log));

        assert_eq!(resources.len(), 2);
        assert_eq!(resources.names().collect::<Vec<_>>(), vec!["database", "redis"]);

        resources.close_all().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["database", "redis"]);
    }

    #[tokio::test]
    async fn test_close_all_continues_after_failure_and_reports_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut resources = Resources::new();
        resources.push(FnResource::new("database", || async {
            Err(anyhow::anyhow!("pool poisoned"))
        }));
        resources.push(FnResource::new("cache", || async {
            Err(anyhow::anyhow!("connection reset"))
        }));
        resources.push(recording("s3", &log));

        let err = resources.close_all().await.unwrap_err();

        match err {
            Error::ResourceClose { name, reason } => {
                assert_eq!(name, "database");
                assert!(reason.to_string().contains("pool poisoned"));
            }
            other => panic!("Expected ResourceClose, got {other:?}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["s3"]);
        assert!(resources.unclosed().is_empty());
    }

    #[tokio::test]
    async fn test_unclosed_tracks_interrupted_close_all() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut resources = Resources::new();
        resources.push(recording("database", &log));
        resources.push(FnResource::new("redis", || std::future::pending()));
        resources.push(recording("s3", &log));

        assert_eq!(resources.unclosed(), vec!["database", "redis", "s3"]);

        let interrupted =
            tokio::time::timeout(std::time::Duration::from_millis(50), resources.close_all()).await;

        assert!(interrupted.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["database"]);
        assert_eq!(resources.unclosed(), vec!["redis", "s3"]);
    }

    #[tokio::test]
    async fn test_close_all_without_resources_succeeds() {
        let resources = Resources::new();
        assert!(resources.is_empty());
        assert!(resources.close_all().await.is_ok());
    }
}
