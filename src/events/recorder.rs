use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::api::core::v1::EventSource;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;
use kube::api::PostParams;
use kube::Resource;

use crate::error::Error;
use crate::error::Result;
use crate::events::types::EventData;
use crate::events::types::Reason;
use crate::events::EmitEvent;
use crate::k8s::ProvideApi;
use crate::TryResource;

/// Creates one `core/v1` [Event] per emission in the namespace of the reconciled object.
pub struct EventRecorder<P>
where
    P: ProvideApi<Event>,
{
    events: Arc<P>,
    reporter: String,
}

impl<P> EventRecorder<P>
where
    P: ProvideApi<Event>,
{
    /// `reporter` is recorded as source and reporting component, e.g. `serverless-controller`.
    pub fn new(events: Arc<P>, reporter: impl Into<String>) -> Self {
        Self {
            events,
            reporter: reporter.into(),
        }
    }
}

/// `<object>.<hex nanoseconds>`, unique for every emission on the same object.
fn event_name(object_name: &str, at: Timestamp) -> String {
    format!("{object_name}.{:x}", at.as_nanosecond())
}

fn involved_object<K>(object: &K, namespace: &str, name: &str) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    let meta = object.meta();
    ObjectReference {
        api_version: Some(K::api_version(&()).into_owned()),
        kind: Some(K::kind(&()).into_owned()),
        name: Some(name.to_owned()),
        namespace: Some(namespace.to_owned()),
        uid: meta.uid.clone(),
        resource_version: meta.resource_version.clone(),
        ..Default::default()
    }
}

/// Builds the event for `object` as seen at `at`. Fails for objects without name or namespace.
fn new_event<K, R>(object: &K, data: EventData<R>, reporter: &str, at: Timestamp) -> Result<Event>
where
    K: Resource<DynamicType = ()> + TryResource,
    R: Reason,
{
    let namespace = object.try_namespace()?;
    let name = object.try_name()?;

    Ok(Event {
        metadata: ObjectMeta {
            name: Some(event_name(name, at)),
            namespace: Some(namespace.clone()),
            ..Default::default()
        },
        involved_object: involved_object(object, &namespace, name),
        type_: Some(data.type_.to_string()),
        reason: Some(data.reason.to_string()),
        message: Some(data.message),
        action: data.action,
        first_timestamp: Some(Time(at)),
        last_timestamp: Some(Time(at)),
        count: Some(1),
        source: Some(EventSource {
            component: Some(reporter.to_owned()),
            ..Default::default()
        }),
        reporting_component: Some(reporter.to_owned()),
        ..Default::default()
    })
}

#[async_trait]
impl<P, R> EmitEvent<R> for EventRecorder<P>
where
    P: ProvideApi<Event>,
    R: Reason,
{
    async fn try_emit<K>(&self, object: &K, event: EventData<R>) -> Result<()>
    where
        K: Resource<DynamicType = ()> + TryResource + Clone + Send + Sync,
    {
        let record = new_event(object, event, &self.reporter, Timestamp::now())?;
        let namespace = record.metadata.namespace.as_deref().unwrap_or_default();
        let name = record.metadata.name.as_deref().unwrap_or_default();

        self.events
            .get(namespace)?
            .create(&PostParams::default(), &record)
            .await
            .map_err(|e| Error::EmitEventFailed(format!("{namespace}/{name}: {e}")))?;

        tracing::debug!(
            %namespace,
            event = %name,
            reason = record.reason.as_deref().unwrap_or_default(),
            "event recorded"
        );
        Ok(())
    }
}
