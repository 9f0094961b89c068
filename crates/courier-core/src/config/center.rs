//! Configuration-center client interface and hot-reload plumbing.
//!
//! The backing store is external and opaque: it returns JSON documents whose
//! top-level object maps onto a component's configuration structure. Paths
//! follow `/config/<env>/<service>/<component>[-<module>]`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

use super::{Environment, Validate};

/// A remote key-value configuration store.
#[async_trait]
pub trait ConfigCenter: Send + Sync {
    /// Fetch the current document at `path`.
    async fn get(&self, path: &str) -> anyhow::Result<bytes::Bytes>;

    /// Subscribe to updates of the document at `path`. The stream yields the
    /// full document on every change.
    async fn watch(&self, path: &str) -> anyhow::Result<BoxStream<'static, bytes::Bytes>>;
}

/// Render the well-known path of a component's configuration document.
pub fn component_path(
    env: Environment,
    service: &str,
    component: &str,
    module: Option<&str>,
) -> String {
    let env = match env {
        Environment::Development => "development",
        Environment::Production => "production",
    };
    match module {
        Some(module) => format!("/config/{env}/{service}/{component}-{module}"),
        None => format!("/config/{env}/{service}/{component}"),
    }
}

/// A shared, atomically swappable configuration snapshot.
///
/// Readers clone an `Arc` under a short-lived lock; writers swap in a whole
/// replacement. Snapshots themselves are never mutated.
pub struct Snapshot<T> {
    current: RwLock<Arc<T>>,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        self.current.read().unwrap().clone()
    }

    /// Replace the current snapshot, returning the one it displaced.
    pub fn swap(&self, value: T) -> Arc<T> {
        let mut guard = self.current.write().unwrap();
        std::mem::replace(&mut *guard, Arc::new(value))
    }
}

/// Follow `path` on `center`, applying each parseable and valid update to
/// `snapshot`. Malformed or invalid updates are logged and skipped, so a
/// partial document from the configuration center never crashes the process.
pub fn spawn_watch<T, C>(
    center: Arc<C>,
    path: String,
    snapshot: Arc<Snapshot<T>>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    T: serde::de::DeserializeOwned + Validate + Send + Sync + 'static,
    C: ConfigCenter + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut stream = match center.watch(&path).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(%path, %error, "configuration watch failed to start");
                return;
            }
        };

        loop {
            let update = tokio::select! {
                _ = cancel.cancelled() => return,
                update = stream.next() => match update {
                    Some(update) => update,
                    None => {
                        tracing::debug!(%path, "configuration watch stream ended");
                        return;
                    }
                },
            };

            match serde_json::from_slice::<T>(&update) {
                Ok(mut value) => match value.validate() {
                    Ok(()) => {
                        snapshot.swap(value);
                        tracing::info!(%path, "applied configuration update");
                    }
                    Err(error) => {
                        tracing::warn!(%path, %error, "ignoring invalid configuration update");
                    }
                },
                Err(error) => {
                    tracing::warn!(%path, %error, "ignoring unparseable configuration update");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Error;

    #[test]
    fn component_paths() {
        assert_eq!(
            component_path(Environment::Development, "im-logic", "kafka", None),
            "/config/development/im-logic/kafka"
        );
        assert_eq!(
            component_path(Environment::Production, "im-repo", "storage", Some("sharding")),
            "/config/production/im-repo/storage-sharding"
        );
    }

    #[test]
    fn snapshot_swap_is_visible_to_readers() {
        let snapshot = Snapshot::new(1u64);
        let before = snapshot.load();
        let displaced = snapshot.swap(2);
        assert_eq!(*before, 1);
        assert_eq!(*displaced, 1);
        assert_eq!(*snapshot.load(), 2);
    }

    #[derive(Debug, serde::Deserialize)]
    struct Limited {
        limit: u32,
    }

    impl Validate for Limited {
        fn validate(&mut self) -> Result<(), Error> {
            if self.limit == 0 {
                return Err(Error::Invalid("limit must be positive".to_string()));
            }
            Ok(())
        }
    }

    struct StaticCenter {
        updates: Vec<&'static str>,
    }

    #[async_trait]
    impl ConfigCenter for StaticCenter {
        async fn get(&self, _path: &str) -> anyhow::Result<bytes::Bytes> {
            Ok(bytes::Bytes::from_static(b"{}"))
        }

        async fn watch(&self, _path: &str) -> anyhow::Result<BoxStream<'static, bytes::Bytes>> {
            let updates = self.updates.clone();
            Ok(futures::stream::iter(
                updates.into_iter().map(|u| bytes::Bytes::from_static(u.as_bytes())),
            )
            .boxed())
        }
    }

    #[tokio::test]
    async fn watch_applies_valid_updates_and_skips_bad_ones() {
        let center = Arc::new(StaticCenter {
            updates: vec![
                r#"{"limit": 7}"#,
                r#"{"limit": 0}"#,   // invalid: skipped
                r#"{"limit": oops"#, // unparseable: skipped
            ],
        });
        let snapshot = Arc::new(Snapshot::new(Limited { limit: 1 }));

        let handle = spawn_watch(
            center,
            "/config/development/demo/limits".to_string(),
            snapshot.clone(),
            CancellationToken::new(),
        );
        handle.await.unwrap();

        assert_eq!(snapshot.load().limit, 7);
    }
}
