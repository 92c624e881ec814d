//! `serverless-controller` keeps the workloads of `ServerlessFunc` custom resources in line with
//! their spec.
//!
//! For every `ServerlessFunc` the controller maintains
//!
//! - a `Deployment` running the pilot sidecar and the rpc server of the function,
//! - a `Service` in front of the pilot port,
//! - one path in the `serverlessfunc-ingress` that all functions of a namespace share,
//!
//! and reports the available replicas of the deployment back into the resource status.
//!
//! ## Architecture
//!
//! Two informers ([informer::run]) mirror `ServerlessFunc` and `Deployment` objects into local
//! [cache::Cache]s and forward every change to the [controller::Controller]. The controller turns
//! changes into `namespace/name` keys on a deduplicating, rate limited [queue::WorkQueue]. Once
//! both caches finished their initial list, a pool of workers pulls keys and hands them to the
//! [reconciler::Reconciler], which compares desired against observed state with the [diff]
//! engine and writes the difference through [store::ResourceStore]s.
//!
//! A key is never processed by two workers at the same time, failed keys are retried with
//! exponential backoff and every cached key is requeued on a fixed resync interval.
//!
//! ## Error Handling
//!
//! All fallible operations return [error::Result]. Api failures are classified into
//! [error::Error::NotFound] and [error::Error::Conflict] where the reconciler needs to tell
//! them apart, everything else is passed through as [error::Error::Kube].

pub mod cache;
pub mod config;
pub mod controller;
pub mod crd;
pub mod diff;
pub mod error;
pub mod events;
pub mod informer;
pub mod k8s;
pub mod merge;
pub mod naming;
pub mod queue;
pub mod reconciler;
pub mod resources;
pub mod store;

use kube::Resource;
use kube::ResourceExt;

use crate::error::Error;
use crate::error::Result;

/// The TryResource trait is used to try to extract the name and the namespace of a resources
/// metadata and encapsulates the error handling.
pub trait TryResource {
    fn try_name(&self) -> Result<&str>;
    fn try_namespace(&self) -> Result<String>;
}

impl<R> TryResource for R
where
    R: Resource,
{
    fn try_name(&self) -> Result<&str> {
        self.meta().name.as_deref().ok_or(Error::UnnamedObject)
    }

    fn try_namespace(&self) -> Result<String> {
        self.namespace().ok_or(Error::UserInput({
            "Expected resource to be namespaced. Can't deploy to an unknown namespace.".to_owned()
        }))
    }
}
