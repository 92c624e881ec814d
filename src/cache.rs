//! Local read-only mirror of watched objects.
//!
//! A [Cache] wraps a kube-rs [reflector] store. The [crate::informer] feeds it [watcher::Event]s
//! and every change it applies is reported back as a [ResourceEvent], so the caller can forward
//! it to the controller over a channel. Lookups never touch the api server.
//!
//! Objects are handed out as `Arc<K>` and never mutated after insertion; anything that wants to
//! change an object builds a fresh one and writes it through a [crate::store::ResourceStore].

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use kube::runtime::reflector;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::reflector::Store;
use kube::runtime::watcher;
use kube::Resource;
use kube::ResourceExt;

use crate::error::Error;
use crate::error::Result;

/// A change observed on a watched object.
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Created(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

impl<K> ResourceEvent<K> {
    /// The object as it is after the event (or was, right before deletion).
    pub fn object(&self) -> &Arc<K> {
        match self {
            ResourceEvent::Created(object) | ResourceEvent::Deleted(object) => object,
            ResourceEvent::Updated { new, .. } => new,
        }
    }
}

/// Key of an object in the cache and in the work queue: `namespace/name`, or just `name`
/// for cluster scoped objects.
pub fn object_key<K: Resource>(object: &K) -> String {
    match object.namespace() {
        Some(namespace) if !namespace.is_empty() => format!("{namespace}/{}", object.name_any()),
        _ => object.name_any(),
    }
}

/// Splits a key produced by [object_key] into namespace and name.
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok(("", *name)),
        [namespace, name] if !name.is_empty() => Ok((*namespace, *name)),
        _ => Err(Error::MalformedKey(key.to_owned())),
    }
}

/// Cheaply cloneable handle to a shared object mirror.
///
/// The reflector [Store] answers reads. Its writer sits behind a mutex so that diffing against
/// the previous state and applying an event happen as one step.
pub struct Cache<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    reader: Store<K>,
    writer: Arc<Mutex<reflector::store::Writer<K>>>,
}

impl<K> Clone for Cache<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<K> Default for Cache<K>
where
    K: Resource + Clone + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Cache<K>
where
    K: Resource + Clone + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    pub fn new() -> Self {
        let (reader, writer) = reflector::store();
        Self {
            reader,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        let reference = if namespace.is_empty() {
            ObjectRef::new(name)
        } else {
            ObjectRef::new(name).within(namespace)
        };
        self.reader.get(&reference)
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.reader.state()
    }

    /// True once the first full list has been applied. Never goes back to false.
    pub fn synced(&self) -> bool {
        matches!(self.reader.wait_until_ready().now_or_never(), Some(Ok(())))
    }

    /// Waits until [Cache::synced] holds, failing with [Error::CacheSyncTimeout] after `timeout`.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.reader.wait_until_ready()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(Error::CacheSyncTimeout(timeout)),
        }
    }

    /// Applies one watcher event and returns the changes it caused.
    ///
    /// Objects of a relist stay invisible until `InitDone`, which then reports every listed
    /// object as created or updated and every object missing from the list as deleted.
    pub fn apply(&self, event: watcher::Event<K>) -> Result<Vec<ResourceEvent<K>>> {
        let mut writer = self.writer.lock()?;
        let changes = match &event {
            watcher::Event::Apply(object) => {
                let previous = self.reader.get(&ObjectRef::from_obj(object));
                writer.apply_watcher_event(&event);
                let current = self.current(object);
                vec![match previous {
                    Some(old) => ResourceEvent::Updated { old, new: current },
                    None => ResourceEvent::Created(current),
                }]
            }
            watcher::Event::Delete(object) => {
                let previous = self.reader.get(&ObjectRef::from_obj(object));
                writer.apply_watcher_event(&event);
                vec![ResourceEvent::Deleted(previous.unwrap_or_else(|| Arc::new(object.clone())))]
            }
            watcher::Event::Init | watcher::Event::InitApply(_) => {
                writer.apply_watcher_event(&event);
                Vec::new()
            }
            watcher::Event::InitDone => {
                let previous: HashMap<String, Arc<K>> = keyed(self.reader.state());
                writer.apply_watcher_event(&event);
                let relisted = keyed(self.reader.state());

                let mut changes = Vec::new();
                for (key, object) in &relisted {
                    match previous.get(key) {
                        Some(old) => changes.push(ResourceEvent::Updated {
                            old: Arc::clone(old),
                            new: Arc::clone(object),
                        }),
                        None => changes.push(ResourceEvent::Created(Arc::clone(object))),
                    }
                }
                for (key, object) in previous {
                    if !relisted.contains_key(&key) {
                        changes.push(ResourceEvent::Deleted(object));
                    }
                }
                changes
            }
        };

        Ok(changes)
    }

    fn current(&self, object: &K) -> Arc<K> {
        self.reader
            .get(&ObjectRef::from_obj(object))
            .unwrap_or_else(|| Arc::new(object.clone()))
    }
}

fn keyed<K: Resource>(objects: Vec<Arc<K>>) -> HashMap<String, Arc<K>> {
    objects.into_iter().map(|object| (object_key(&*object), object)).collect()
}
