//! Pure comparisons between a [ServerlessFunc] and the objects observed in the cluster.
//!
//! Nothing here talks to the api server. An empty result means the observed object already
//! satisfies the function.

use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::networking::v1::Ingress;
use strum::AsRefStr;
use strum::Display;

use crate::crd::ServerlessFunc;
use crate::naming;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum DiffField {
    Replicas,
    Image,
    Version,
    /// Number of rules in the routing object.
    #[strum(serialize = "Spec.Rules")]
    Rules,
    /// Backend service of the function's routing path.
    #[strum(serialize = "Spec.Rules[0].Http.Paths.Backend.ServiceName")]
    PathBackend,
}

/// One field where the desired and the observed state disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    pub field: DiffField,
    pub expected: String,
    pub observed: String,
}

impl DiffRecord {
    fn new(field: DiffField, expected: impl ToString, observed: impl ToString) -> Self {
        Self {
            field,
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }
}

impl fmt::Display for DiffRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected {:?}, observed {:?}", self.field, self.expected, self.observed)
    }
}

/// Compares replicas, image and version of `func` with `deployment`, in that order.
///
/// Replicas are only compared when the function specifies them. Image and version are read
/// from the deployment labels, which are written together with the pod template.
pub fn diff_workload_runner(func: &ServerlessFunc, deployment: &Deployment) -> Vec<DiffRecord> {
    let mut records = Vec::new();

    if let Some(desired) = func.spec.replicas {
        let observed = deployment.spec.as_ref().and_then(|spec| spec.replicas);
        if observed != Some(desired) {
            let observed = observed.map_or_else(|| "<unset>".to_owned(), |replicas| replicas.to_string());
            records.push(DiffRecord::new(DiffField::Replicas, desired, observed));
        }
    }

    let labels = deployment.metadata.labels.as_ref();
    let label = |key: &str| labels.and_then(|labels| labels.get(key)).map_or("", String::as_str);

    let image = label(naming::IMAGE_LABEL);
    if func.spec.image != image {
        records.push(DiffRecord::new(DiffField::Image, &func.spec.image, image));
    }

    let version = label(naming::VERSION_LABEL);
    if func.spec.version != version {
        records.push(DiffRecord::new(DiffField::Version, &func.spec.version, version));
    }

    records
}

/// Checks that `ingress` has exactly one rule and that the rule routes to the function's
/// service. A rule count other than one yields a single [DiffField::Rules] record and nothing
/// else.
pub fn diff_routing_rule_set(func: &ServerlessFunc, ingress: &Ingress) -> Vec<DiffRecord> {
    let rules = ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.rules.as_deref())
        .unwrap_or_default();
    if rules.len() != 1 {
        return vec![DiffRecord::new(DiffField::Rules, 1, rules.len())];
    }

    let service_name = naming::service_name(func.metadata.name.as_deref().unwrap_or_default());
    let routed = rules[0].http.iter().flat_map(|http| &http.paths).any(|path| {
        path.backend
            .service
            .as_ref()
            .is_some_and(|service| service.name == service_name)
    });

    if routed {
        Vec::new()
    } else {
        vec![DiffRecord::new(DiffField::PathBackend, service_name, "")]
    }
}
