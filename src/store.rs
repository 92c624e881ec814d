//! The write side of the cluster as the reconciler sees it.

use async_trait::async_trait;
use kube::Resource;

use crate::error::Result;

/// CRUD contract against the cluster store for objects of kind `K`.
///
/// Implementations must surface a missing object as [crate::error::Error::NotFound] and a
/// stale write (resource version mismatch, already existing object) as
/// [crate::error::Error::Conflict], so callers can tell them apart from other failures.
#[async_trait]
pub trait ResourceStore<K>: Send + Sync
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    async fn create(&self, object: &K) -> Result<K>;

    /// Replaces the whole object. A `metadata.resourceVersion` on `object` makes the write
    /// conditional on nobody having changed the stored object since it was read.
    async fn replace(&self, object: &K) -> Result<K>;

    /// Writes only the status of `object`, with the same version semantics as [ResourceStore::replace].
    async fn update_status(&self, object: &K) -> Result<K>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::error::Error;
    use crate::TryResource;
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Op {
        Get,
        Create,
        Replace,
        UpdateStatus,
    }

    struct State<K> {
        objects: HashMap<(String, String), K>,
        version: u64,
        calls: Vec<(Op, String)>,
        failing_writes: usize,
    }

    /// In-memory store with resource versions, call recording and injectable write failures.
    pub struct InMemoryStore<K> {
        state: Mutex<State<K>>,
    }

    impl<K> Default for InMemoryStore<K> {
        fn default() -> Self {
            Self {
                state: Mutex::new(State {
                    objects: HashMap::new(),
                    version: 0,
                    calls: Vec::new(),
                    failing_writes: 0,
                }),
            }
        }
    }

    impl<K> InMemoryStore<K>
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds an object without recording a call, as if someone else had created it.
        pub fn insert(&self, mut object: K) -> K {
            let mut state = self.state.lock().unwrap();
            state.version += 1;
            object.meta_mut().resource_version = Some(state.version.to_string());
            let key = key_of(&object).unwrap();
            state.objects.insert(key, object.clone());
            object
        }

        pub fn object(&self, namespace: &str, name: &str) -> Option<K> {
            let state = self.state.lock().unwrap();
            state.objects.get(&(namespace.to_owned(), name.to_owned())).cloned()
        }

        pub fn objects(&self) -> Vec<K> {
            self.state.lock().unwrap().objects.values().cloned().collect()
        }

        pub fn calls(&self, op: Op) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state
                .calls
                .iter()
                .filter(|(recorded, _)| *recorded == op)
                .map(|(_, name)| name.clone())
                .collect()
        }

        pub fn writes(&self) -> usize {
            let state = self.state.lock().unwrap();
            state.calls.iter().filter(|(op, _)| *op != Op::Get).count()
        }

        pub fn clear_calls(&self) {
            self.state.lock().unwrap().calls.clear();
        }

        /// Makes the next `count` writes fail with a conflict.
        pub fn fail_next_writes(&self, count: usize) {
            self.state.lock().unwrap().failing_writes = count;
        }

        fn begin_write(state: &mut State<K>, op: Op, name: &str) -> Result<()> {
            state.calls.push((op, name.to_owned()));
            if state.failing_writes > 0 {
                state.failing_writes -= 1;
                return Err(Error::Conflict(format!("{} {name:?}", K::kind(&()))));
            }
            Ok(())
        }

        fn check_version(stored: &K, object: &K, name: &str) -> Result<()> {
            match &object.meta().resource_version {
                Some(version) if Some(version) != stored.meta().resource_version.as_ref() => {
                    Err(Error::Conflict(format!("{} {name:?}", K::kind(&()))))
                }
                _ => Ok(()),
            }
        }
    }

    fn key_of<K: Resource>(object: &K) -> Result<(String, String)> {
        Ok((object.try_namespace()?, object.try_name()?.to_owned()))
    }

    #[async_trait]
    impl<K> ResourceStore<K> for InMemoryStore<K>
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        async fn get(&self, namespace: &str, name: &str) -> Result<K> {
            let mut state = self.state.lock().unwrap();
            state.calls.push((Op::Get, name.to_owned()));
            state
                .objects
                .get(&(namespace.to_owned(), name.to_owned()))
                .cloned()
                .ok_or_else(|| Error::NotFound {
                    kind: K::kind(&()).to_string(),
                    name: name.to_owned(),
                })
        }

        async fn create(&self, object: &K) -> Result<K> {
            let key = key_of(object)?;
            let mut state = self.state.lock().unwrap();
            Self::begin_write(&mut state, Op::Create, &key.1)?;
            if state.objects.contains_key(&key) {
                return Err(Error::Conflict(format!("{} {:?} already exists", K::kind(&()), key.1)));
            }
            state.version += 1;
            let mut created = object.clone();
            let meta = created.meta_mut();
            meta.resource_version = Some(state.version.to_string());
            meta.uid.get_or_insert_with(|| format!("uid-{}", key.1));
            state.objects.insert(key, created.clone());
            Ok(created)
        }

        async fn replace(&self, object: &K) -> Result<K> {
            let key = key_of(object)?;
            let mut state = self.state.lock().unwrap();
            Self::begin_write(&mut state, Op::Replace, &key.1)?;
            let stored = state.objects.get(&key).ok_or_else(|| Error::NotFound {
                kind: K::kind(&()).to_string(),
                name: key.1.clone(),
            })?;
            Self::check_version(stored, object, &key.1)?;
            let uid = stored.meta().uid.clone();
            state.version += 1;
            let mut replaced = object.clone();
            replaced.meta_mut().resource_version = Some(state.version.to_string());
            replaced.meta_mut().uid = uid;
            state.objects.insert(key, replaced.clone());
            Ok(replaced)
        }

        async fn update_status(&self, object: &K) -> Result<K> {
            let key = key_of(object)?;
            let mut state = self.state.lock().unwrap();
            Self::begin_write(&mut state, Op::UpdateStatus, &key.1)?;
            let stored = state.objects.get(&key).ok_or_else(|| Error::NotFound {
                kind: K::kind(&()).to_string(),
                name: key.1.clone(),
            })?;
            Self::check_version(stored, object, &key.1)?;

            let mut merged = serde_json::to_value(stored)?;
            let status = serde_json::to_value(object)?
                .get("status")
                .cloned()
                .unwrap_or_default();
            merged["status"] = status;
            let mut updated: K = serde_json::from_value(merged)?;
            state.version += 1;
            updated.meta_mut().resource_version = Some(state.version.to_string());
            state.objects.insert(key, updated.clone());
            Ok(updated)
        }
    }

    mod in_memory_store_tests {
        use super::*;
        use k8s_openapi::api::core::v1::ConfigMap;
        use kube::api::ObjectMeta;

        fn config_map(name: &str) -> ConfigMap {
            ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name.to_owned()),
                    namespace: Some("default".to_owned()),
                    ..Default::default()
                },
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn test_get_missing_is_not_found() {
            let store = InMemoryStore::<ConfigMap>::new();

            let result = store.get("default", "missing").await;

            assert!(result.unwrap_err().is_not_found());
        }

        #[tokio::test]
        async fn test_stale_replace_conflicts() {
            // Given: An object read at version 1, then changed by someone else
            let store = InMemoryStore::<ConfigMap>::new();
            let read = store.create(&config_map("cm")).await.unwrap();
            store.replace(&read).await.unwrap();

            // When: Writing the stale copy
            let result = store.replace(&read).await;

            // Then: The write is rejected as a conflict
            assert!(result.unwrap_err().is_conflict());
        }

        #[tokio::test]
        async fn test_create_existing_conflicts() {
            let store = InMemoryStore::<ConfigMap>::new();
            store.insert(config_map("cm"));

            let result = store.create(&config_map("cm")).await;

            assert!(result.unwrap_err().is_conflict());
        }
    }
}
