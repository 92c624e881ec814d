//! Converges the objects of one `ServerlessFunc` towards its spec.
//!
//! A pass runs these steps in order and stops at the first error, keeping whatever the earlier
//! steps already wrote:
//!
//! 1. look the function up in the cache, a missing function ends the pass successfully,
//! 2. create the deployment, or replace it when it drifted from the spec; a cache miss is
//!    confirmed against the api server before creating,
//! 3. create the service if it doesn't exist,
//! 4. route the function through the shared ingress of its namespace,
//! 5. write the available replicas of the deployment into the function status.
//!
//! Deployments and services that carry the derived names but are not controlled by the function
//! are never touched; the pass fails with [Error::OwnershipConflict] instead.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;

use crate::cache::split_key;
use crate::cache::Cache;
use crate::config::ResourceDefaults;
use crate::crd::ServerlessFunc;
use crate::crd::ServerlessFuncStatus;
use crate::diff::diff_routing_rule_set;
use crate::diff::diff_workload_runner;
use crate::diff::DiffRecord;
use crate::error::Error;
use crate::error::Result;
use crate::events::EmitEvent;
use crate::events::EventData;
use crate::events::FuncEventReason;
use crate::merge::merge_route;
use crate::naming;
use crate::resources::is_controlled_by;
use crate::resources::new_deployment;
use crate::resources::new_ingress;
use crate::resources::new_service;
use crate::store::ResourceStore;
use crate::TryResource;

/// Write access to every kind the reconciler manages.
#[derive(Clone)]
pub struct Stores {
    pub funcs: Arc<dyn ResourceStore<ServerlessFunc>>,
    pub deployments: Arc<dyn ResourceStore<Deployment>>,
    pub services: Arc<dyn ResourceStore<Service>>,
    pub ingresses: Arc<dyn ResourceStore<Ingress>>,
}

pub struct Reconciler<E>
where
    E: EmitEvent<FuncEventReason>,
{
    funcs: Cache<ServerlessFunc>,
    runners: Cache<Deployment>,
    stores: Stores,
    recorder: Arc<E>,
    defaults: Arc<ResourceDefaults>,
}

impl<E> Reconciler<E>
where
    E: EmitEvent<FuncEventReason>,
{
    pub fn new(
        funcs: Cache<ServerlessFunc>,
        runners: Cache<Deployment>,
        stores: Stores,
        recorder: Arc<E>,
        defaults: Arc<ResourceDefaults>,
    ) -> Self {
        Self {
            funcs,
            runners,
            stores,
            recorder,
            defaults,
        }
    }

    /// Runs one pass for `key` (`namespace/name`).
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, key: &str) -> Result<()> {
        let (namespace, name) = split_key(key)?;

        let Some(func) = self.funcs.get(namespace, name) else {
            tracing::info!(key, "ServerlessFunc no longer exists, nothing to do");
            return Ok(());
        };

        let deployment = self.ensure_workload_runner(&func).await?;
        self.ensure_network_endpoint(&func).await?;
        self.ensure_routing_rule_set(&func).await?;
        self.write_status(&func, &deployment).await?;

        self.recorder.emit(&*func, EventData::synced()).await;
        Ok(())
    }

    async fn ensure_workload_runner(&self, func: &ServerlessFunc) -> Result<Deployment> {
        let namespace = func.try_namespace()?;
        let name = naming::deployment_name(func.try_name()?);
        let desired = new_deployment(func, &self.defaults)?;

        let observed = match self.runners.get(&namespace, &name) {
            Some(observed) => observed,
            // The watch may not have delivered a deployment created by the previous pass yet.
            None => match self.stores.deployments.get(&namespace, &name).await {
                Ok(stored) => {
                    tracing::debug!(%namespace, %name, "deployment not cached yet, using the stored copy");
                    Arc::new(stored)
                }
                Err(e) if e.is_not_found() => {
                    tracing::info!(%namespace, %name, "creating deployment");
                    return self.stores.deployments.create(&desired).await;
                }
                Err(e) => return Err(e),
            },
        };

        if !is_controlled_by(&*observed, func) {
            return Err(self.ownership_conflict(func, &name).await);
        }

        let records = diff_workload_runner(func, &observed);
        if records.is_empty() {
            return Ok((*observed).clone());
        }

        log_diff(&namespace, &name, &records);
        let mut replacement = desired;
        replacement.metadata.resource_version = observed.metadata.resource_version.clone();
        tracing::info!(%namespace, %name, "updating deployment");
        self.stores.deployments.replace(&replacement).await
    }

    /// Services are created once and never updated afterwards, even if they drift.
    async fn ensure_network_endpoint(&self, func: &ServerlessFunc) -> Result<Service> {
        let namespace = func.try_namespace()?;
        let name = naming::service_name(func.try_name()?);

        match self.stores.services.get(&namespace, &name).await {
            Ok(service) if is_controlled_by(&service, func) => Ok(service),
            Ok(_) => Err(self.ownership_conflict(func, &name).await),
            Err(e) if e.is_not_found() => {
                tracing::info!(%namespace, %name, "creating service");
                self.stores.services.create(&new_service(func, &self.defaults)?).await
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_routing_rule_set(&self, func: &ServerlessFunc) -> Result<()> {
        let namespace = func.try_namespace()?;
        let func_name = func.try_name()?;

        let observed = match self.stores.ingresses.get(&namespace, naming::INGRESS_NAME).await {
            Ok(ingress) => ingress,
            Err(e) if e.is_not_found() => {
                tracing::info!(%namespace, name = naming::INGRESS_NAME, "creating ingress");
                self.stores.ingresses.create(&new_ingress(&namespace)).await?
            }
            Err(e) => return Err(e),
        };

        let records = diff_routing_rule_set(func, &observed);
        if records.is_empty() {
            return Ok(());
        }
        log_diff(&namespace, naming::INGRESS_NAME, &records);

        let merged = merge_route(
            &observed,
            &naming::ingress_path(func_name),
            &naming::service_name(func_name),
            self.defaults.service_port,
        );
        if merged == observed {
            tracing::warn!(
                %namespace,
                name = naming::INGRESS_NAME,
                "ingress does not have exactly one http rule, leaving it untouched"
            );
            return Ok(());
        }

        tracing::info!(%namespace, name = naming::INGRESS_NAME, path = %naming::ingress_path(func_name), "updating ingress");
        self.stores.ingresses.replace(&merged).await?;
        Ok(())
    }

    async fn write_status(&self, func: &ServerlessFunc, deployment: &Deployment) -> Result<()> {
        let available_replicas = deployment
            .status
            .as_ref()
            .and_then(|status| status.available_replicas)
            .unwrap_or(0);

        let mut updated = func.clone();
        updated.status = Some(ServerlessFuncStatus { available_replicas });
        self.stores.funcs.update_status(&updated).await?;
        Ok(())
    }

    async fn ownership_conflict(&self, func: &ServerlessFunc, name: &str) -> Error {
        tracing::warn!(name, "resource exists and is not controlled by the ServerlessFunc");
        self.recorder.emit(func, EventData::resource_exists(name)).await;
        Error::OwnershipConflict(name.to_owned())
    }
}

fn log_diff(namespace: &str, name: &str, records: &[DiffRecord]) {
    for record in records {
        tracing::info!(
            namespace,
            name,
            field = %record.field,
            expected = %record.expected,
            observed = %record.observed,
            "drift detected"
        );
    }
}
