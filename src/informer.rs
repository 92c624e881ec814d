//! Feeds a [Cache] from a kube-rs watch and forwards the resulting changes.

use std::fmt::Debug;
use std::hash::Hash;
use std::pin::pin;

use futures::Stream;
use futures::StreamExt;
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::Api;
use kube::Resource;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::UnboundedSender;

use crate::cache::Cache;
use crate::cache::ResourceEvent;

/// Watches `api`, applies every event to `cache` and sends the resulting changes on `events`.
///
/// Watch errors are retried with the watcher's default backoff, so this only returns once the
/// receiving side of `events` is gone.
pub async fn run<K>(api: Api<K>, config: watcher::Config, cache: Cache<K>, events: UnboundedSender<ResourceEvent<K>>)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    consume(watcher(api, config).default_backoff(), cache, events).await
}

/// Drains `stream` into `cache`. Errors are logged and skipped; returns when the stream ends or
/// nobody listens on `events` any more.
pub async fn consume<K, S>(stream: S, cache: Cache<K>, events: UnboundedSender<ResourceEvent<K>>)
where
    K: Resource + Clone + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    S: Stream<Item = watcher::Result<watcher::Event<K>>>,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let mut stream = pin!(stream);

    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(%kind, %error, "watch failed, retrying");
                continue;
            }
        };

        let changes = match cache.apply(event) {
            Ok(changes) => changes,
            Err(error) => {
                tracing::error!(%kind, %error, "failed to apply watch event to cache");
                continue;
            }
        };

        for change in changes {
            if events.send(change).is_err() {
                tracing::info!(%kind, "event receiver dropped, stopping informer");
                return;
            }
        }
    }
}
