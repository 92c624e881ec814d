use std::fmt::Debug;
use std::time::Duration;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Any error originating from the `kube-rs` crate that is not classified further
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },
    #[error("Write conflict on {0}, object was modified concurrently")]
    Conflict(String),
    #[error("Resource {0:?} already exists and is not managed by ServerlessFunc")]
    OwnershipConflict(String),
    #[error("Invalid resource key: {0:?}")]
    MalformedKey(String),
    #[error("Timed out after {0:?} waiting for caches to sync")]
    CacheSyncTimeout(Duration),
    #[error("{0}")]
    UserInput(String),
    #[error("Unnamed k8s object")]
    UnnamedObject,
    #[error("Object {0:?} has no uid, can't reference it as owner")]
    MissingUid(String),
    #[error("RwLock poisoned: {0}")]
    RwLockPoisoned(String),
    #[error("Failed to emit event: {0}")]
    EmitEventFailed(String),
    #[error("Failed to serialize object: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Reconciliation of {0:?} panicked")]
    ReconcilePanicked(String),
}

impl Error {
    /// Classifies a raw kube error for the object `kind/name`, separating the two signals the
    /// reconciler branches on (404 and 409) from everything else.
    pub fn from_kube(kind: &str, name: &str, error: kube::Error) -> Self {
        if let kube::Error::Api(response) = &error {
            match response.code {
                404 => {
                    return Error::NotFound {
                        kind: kind.to_owned(),
                        name: name.to_owned(),
                    }
                }
                409 => return Error::Conflict(format!("{kind} {name:?}")),
                _ => {}
            }
        }
        Error::Kube { source: error }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::RwLockPoisoned(e.to_string())
    }
}
