//! Turns cache events into work queue keys and drives the reconcile workers.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;

use futures::FutureExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Resource;
use kube::ResourceExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::Interval;

use crate::cache::object_key;
use crate::cache::Cache;
use crate::cache::ResourceEvent;
use crate::config::ControllerConfig;
use crate::crd::ServerlessFunc;
use crate::error::Error;
use crate::error::Result;
use crate::events::EmitEvent;
use crate::events::FuncEventReason;
use crate::queue::rate_limit::default_controller_rate_limiter;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;

pub struct Controller<E>
where
    E: EmitEvent<FuncEventReason> + 'static,
{
    config: ControllerConfig,
    funcs: Cache<ServerlessFunc>,
    runners: Cache<Deployment>,
    queue: Arc<WorkQueue<String>>,
    reconciler: Arc<Reconciler<E>>,
}

impl<E> Controller<E>
where
    E: EmitEvent<FuncEventReason> + 'static,
{
    pub fn new(
        config: ControllerConfig,
        funcs: Cache<ServerlessFunc>,
        runners: Cache<Deployment>,
        reconciler: Reconciler<E>,
    ) -> Self {
        let queue = WorkQueue::new(default_controller_rate_limiter(&config.rate_limit));
        Self {
            config,
            funcs,
            runners,
            queue,
            reconciler: Arc::new(reconciler),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<String>> {
        &self.queue
    }

    pub fn handle_func_event(&self, event: &ResourceEvent<ServerlessFunc>) {
        match event {
            ResourceEvent::Created(func) | ResourceEvent::Updated { new: func, .. } => {
                self.queue.add(object_key(&**func));
            }
            ResourceEvent::Deleted(func) => {
                tracing::info!(key = %object_key(&**func), "ServerlessFunc deleted");
            }
        }
    }

    /// Enqueues the function controlling a changed deployment. Only active with
    /// `watch_runner_drift`; resyncs that don't change the deployment are skipped.
    pub fn handle_runner_event(&self, event: &ResourceEvent<Deployment>) {
        if !self.config.watch_runner_drift {
            return;
        }
        if let ResourceEvent::Updated { old, new } = event {
            if old.metadata.resource_version == new.metadata.resource_version {
                return;
            }
        }

        let deployment = event.object();
        let Some(owner) = deployment.owner_references().iter().find(|owner| owner.controller == Some(true)) else {
            return;
        };
        if owner.kind != ServerlessFunc::kind(&()) {
            return;
        }

        let namespace = deployment.namespace().unwrap_or_default();
        match self.funcs.get(&namespace, &owner.name) {
            Some(func) => self.queue.add(object_key(&*func)),
            None => {
                tracing::debug!(%namespace, owner = %owner.name, deployment = %deployment.name_any(), "ignoring orphaned deployment");
            }
        }
    }

    /// Enqueues every cached function. Returns how many keys were added.
    pub fn resync(&self) -> usize {
        let funcs = self.funcs.list();
        for func in &funcs {
            self.queue.add(object_key(&**func));
        }
        tracing::debug!(count = funcs.len(), "resync");
        funcs.len()
    }

    /// Processes one key from the queue. Returns false once the queue is shut down and drained.
    pub async fn process_next_work_item(&self) -> bool {
        process_next_work_item(&self.queue, &self.reconciler).await
    }

    /// Waits for both caches, starts the workers and dispatches events until `shutdown`
    /// resolves. Then stops the queue and returns after every worker finished its last key.
    ///
    /// Fails with [Error::CacheSyncTimeout] if the caches don't sync in time.
    pub async fn run(
        self,
        mut func_events: UnboundedReceiver<ResourceEvent<ServerlessFunc>>,
        mut runner_events: UnboundedReceiver<ResourceEvent<Deployment>>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let mut shutdown = pin!(shutdown);
        let timeout = self.config.cache_sync_timeout;

        tracing::info!("waiting for caches to sync");
        tokio::select! {
            synced = async {
                tokio::try_join!(self.funcs.wait_for_sync(timeout), self.runners.wait_for_sync(timeout))
            } => {
                synced?;
            }
            () = &mut shutdown => {
                tracing::info!("shutdown requested before caches synced");
                return Ok(());
            }
        }

        tracing::info!(workers = self.config.workers, "starting workers");
        let workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|_| {
                let queue = Arc::clone(&self.queue);
                let reconciler = Arc::clone(&self.reconciler);
                tokio::spawn(async move { while process_next_work_item(&queue, &reconciler).await {} })
            })
            .collect();

        let mut resync = (!self.config.resync_interval.is_zero()).then(|| {
            let period = self.config.resync_interval;
            tokio::time::interval_at(Instant::now() + period, period)
        });

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                Some(event) = func_events.recv() => self.handle_func_event(&event),
                Some(event) = runner_events.recv() => self.handle_runner_event(&event),
                () = tick(&mut resync) => {
                    self.resync();
                }
            }
        }

        tracing::info!("shutting down workers");
        self.queue.shut_down();
        for worker in workers {
            if let Err(error) = worker.await {
                tracing::error!(%error, "worker terminated abnormally");
            }
        }
        tracing::info!("all workers stopped");
        Ok(())
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn process_next_work_item<E>(queue: &Arc<WorkQueue<String>>, reconciler: &Reconciler<E>) -> bool
where
    E: EmitEvent<FuncEventReason>,
{
    let Some(key) = queue.get().await else {
        return false;
    };

    // A panicking pass must not leave the key in flight forever.
    let outcome = match AssertUnwindSafe(reconciler.reconcile(&key)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!(%key, "reconciliation panicked");
            Err(Error::ReconcilePanicked(key.clone()))
        }
    };

    match outcome {
        Ok(()) => {
            queue.forget(&key);
            tracing::info!(%key, "successfully synced");
        }
        Err(Error::MalformedKey(_)) => {
            queue.forget(&key);
            tracing::error!(%key, "dropping malformed key");
        }
        Err(error) => {
            queue.add_rate_limited(key.clone());
            tracing::warn!(%key, %error, requeues = queue.num_requeues(&key), "reconciliation failed, requeuing");
        }
    }

    queue.done(&key);
    true
}
