//! Routing entries of the shared ingress.

use k8s_openapi::api::networking::v1::HTTPIngressPath;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::networking::v1::IngressBackend;
use k8s_openapi::api::networking::v1::IngressServiceBackend;
use k8s_openapi::api::networking::v1::ServiceBackendPort;

const PATH_TYPE_PREFIX: &str = "Prefix";

fn backend(service_name: &str, port: i32) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: service_name.to_owned(),
            port: Some(ServiceBackendPort {
                number: Some(port),
                ..Default::default()
            }),
        }),
        ..Default::default()
    }
}

/// Returns a copy of `ingress` in which `path` routes to `service_name:port`.
///
/// An existing entry for `path` gets its backend replaced in place, otherwise a `Prefix` entry
/// is appended; all other entries keep their order. Ingresses that don't have exactly one rule
/// with an http value are returned unchanged. Merging the same route twice yields the same
/// object.
pub fn merge_route(ingress: &Ingress, path: &str, service_name: &str, port: i32) -> Ingress {
    let mut merged = ingress.clone();
    let Some(paths) = single_rule_paths(&mut merged) else {
        return ingress.clone();
    };

    let mut found = false;
    for entry in paths.iter_mut() {
        if entry.path.as_deref() == Some(path) {
            entry.backend = backend(service_name, port);
            found = true;
        }
    }
    if !found {
        paths.push(HTTPIngressPath {
            path: Some(path.to_owned()),
            path_type: PATH_TYPE_PREFIX.to_owned(),
            backend: backend(service_name, port),
        });
    }

    merged
}

fn single_rule_paths(ingress: &mut Ingress) -> Option<&mut Vec<HTTPIngressPath>> {
    let rules = ingress.spec.as_mut()?.rules.as_mut()?;
    match rules.as_mut_slice() {
        [rule] => rule.http.as_mut().map(|http| &mut http.paths),
        _ => None,
    }
}
