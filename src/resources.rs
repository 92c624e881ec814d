//! Builders for the objects managed on behalf of a [ServerlessFunc].
//!
//! Every builder returns a complete, fresh object derived only from the function and the
//! [ResourceDefaults]; nothing is copied from what currently lives in the cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::HTTPGetAction;
use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;
use k8s_openapi::api::core::v1::PodSecurityContext;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::Probe;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::api::core::v1::ServiceSpec;
use k8s_openapi::api::core::v1::Volume;
use k8s_openapi::api::core::v1::VolumeMount;
use k8s_openapi::api::networking::v1::HTTPIngressRuleValue;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::networking::v1::IngressRule;
use k8s_openapi::api::networking::v1::IngressSpec;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::Resource;

use crate::config::ContainerLimits;
use crate::config::ResourceDefaults;
use crate::crd::ServerlessFunc;
use crate::error::Error;
use crate::error::Result;
use crate::naming;
use crate::TryResource;

const WORKSPACE_VOLUME: &str = "ide-workspaces";
const FUNC_ENV: &str = "SERVERLESS_FUNC";

/// Controller owner reference pointing at `func`.
pub fn owner_reference(func: &ServerlessFunc) -> Result<OwnerReference> {
    func.controller_owner_ref(&())
        .ok_or_else(|| Error::MissingUid(func.metadata.name.clone().unwrap_or_default()))
}

/// True if `object` has a controller owner reference to exactly this `func` (matched by uid).
pub fn is_controlled_by<K: Resource>(object: &K, func: &ServerlessFunc) -> bool {
    let Some(uid) = func.metadata.uid.as_deref() else {
        return false;
    };
    object
        .meta()
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.controller == Some(true) && owner.uid == uid)
}

fn selector_labels(func_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(naming::APP_LABEL.to_owned(), naming::app_name(func_name))])
}

fn limits(limits: ContainerLimits) -> ResourceRequirements {
    let mut quantities = BTreeMap::new();
    if limits.cpu_millis > 0 {
        quantities.insert("cpu".to_owned(), Quantity(format!("{}m", limits.cpu_millis)));
    }
    if limits.memory_mib > 0 {
        quantities.insert("memory".to_owned(), Quantity(format!("{}Mi", limits.memory_mib)));
    }
    ResourceRequirements {
        limits: Some(quantities),
        ..Default::default()
    }
}

pub fn new_deployment(func: &ServerlessFunc, defaults: &ResourceDefaults) -> Result<Deployment> {
    let name = func.try_name()?;
    let namespace = func.try_namespace()?;
    let selector = selector_labels(name);
    let func_env = vec![EnvVar {
        name: FUNC_ENV.to_owned(),
        value: Some(name.to_owned()),
        ..Default::default()
    }];

    let labels = BTreeMap::from([
        (naming::APP_LABEL.to_owned(), naming::app_name(name)),
        (naming::IMAGE_LABEL.to_owned(), func.spec.image.clone()),
        (naming::VERSION_LABEL.to_owned(), func.spec.version.clone()),
    ]);

    let pilot = Container {
        name: "pilot".to_owned(),
        image: Some(defaults.pilot_image.clone()),
        env: Some(func_env.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_owned()),
            container_port: defaults.pilot_port,
            ..Default::default()
        }]),
        liveness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/ping".to_owned()),
                port: IntOrString::Int(defaults.pilot_port),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(30),
            ..Default::default()
        }),
        resources: Some(limits(defaults.pilot_limits)),
        ..Default::default()
    };

    let rpc_server = Container {
        name: "rpcserver".to_owned(),
        image: Some(defaults.rpc_image.clone()),
        env: Some(func_env),
        command: Some(vec![
            format!("/app/{}", func.spec.image),
            "-v".to_owned(),
            func.spec.version.clone(),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("rpc".to_owned()),
            container_port: defaults.rpc_port,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: WORKSPACE_VOLUME.to_owned(),
            mount_path: "/app".to_owned(),
            sub_path: Some("serverless-functions".to_owned()),
            ..Default::default()
        }]),
        resources: Some(limits(defaults.rpc_limits)),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(naming::deployment_name(name)),
            namespace: Some(namespace),
            owner_references: Some(vec![owner_reference(func)?]),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: func.spec.replicas,
            revision_history_limit: Some(defaults.revision_history_limit),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    security_context: Some(PodSecurityContext {
                        run_as_user: Some(defaults.run_as_user),
                        run_as_group: Some(defaults.run_as_group),
                        ..Default::default()
                    }),
                    volumes: Some(vec![Volume {
                        name: WORKSPACE_VOLUME.to_owned(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: defaults.workspace_claim.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    containers: vec![pilot, rpc_server],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn new_service(func: &ServerlessFunc, defaults: &ResourceDefaults) -> Result<Service> {
    let name = func.try_name()?;
    let labels = selector_labels(name);

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(naming::service_name(name)),
            namespace: Some(func.try_namespace()?),
            owner_references: Some(vec![owner_reference(func)?]),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("pilot".to_owned()),
                protocol: Some("TCP".to_owned()),
                port: defaults.service_port,
                target_port: Some(IntOrString::Int(defaults.pilot_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// The shared ingress of `namespace`: one rule with an empty path list. It has no owner since
/// every function of the namespace routes through it.
pub fn new_ingress(namespace: &str) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(naming::INGRESS_NAME.to_owned()),
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                http: Some(HTTPIngressRuleValue { paths: Vec::new() }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
