use std::fmt::Debug;
use std::fmt::Display;
use strum::AsRefStr;
use strum::Display as StrumDisplay;

/// Type of a Kubernetes event
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, AsRefStr)]
pub enum EventType {
    Normal,
    /// Something the owner of the object has to act on
    Warning,
}

/// Event reasons are CamelCase identifiers. Derive strum's `Display` and `AsRefStr` on an enum
/// and add an empty impl of this trait to use it with [crate::events::EmitEvent].
pub trait Reason: Debug + Display + AsRef<str> + Clone + Send + Sync + 'static {}

/// Reasons the controller reports on a `ServerlessFunc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, AsRefStr)]
pub enum FuncEventReason {
    /// All managed objects match the spec.
    Synced,
    /// A managed object name is taken by an object the function does not control.
    ErrResourceExists,
}

impl Reason for FuncEventReason {}

pub const MESSAGE_SYNCED: &str = "ServerlessFunc synced successfully";

#[derive(Debug)]
pub struct EventData<R: Reason> {
    pub type_: EventType,
    pub reason: R,
    pub message: String,
    pub action: Option<String>,
}

impl<R: Reason> EventData<R> {
    pub fn normal(reason: R, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Normal,
            reason,
            message: message.into(),
            action: None,
        }
    }

    pub fn warning(reason: R, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            reason,
            message: message.into(),
            action: None,
        }
    }

    /// Sets what the controller did, e.g. `Reconcile`.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

impl EventData<FuncEventReason> {
    pub fn synced() -> Self {
        Self::normal(FuncEventReason::Synced, MESSAGE_SYNCED).with_action("Reconcile")
    }

    /// Warning for a managed object name held by an object the function does not control.
    pub fn resource_exists(name: &str) -> Self {
        Self::warning(
            FuncEventReason::ErrResourceExists,
            format!("Resource {name:?} already exists and is not managed by ServerlessFunc"),
        )
        .with_action("Reconcile")
    }
}
