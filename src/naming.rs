//! Names derived from a `ServerlessFunc`. Other components (the pilot sidecar, the ingress
//! controller) rely on these exact shapes.

/// The single ingress shared by all functions of a namespace.
pub const INGRESS_NAME: &str = "serverlessfunc-ingress";

/// Label carrying [app_name] on every managed object and pod.
pub const APP_LABEL: &str = "serverlessfunc";
pub const IMAGE_LABEL: &str = "serverlessfunc-images";
pub const VERSION_LABEL: &str = "serverlessfunc-version";

pub fn app_name(func_name: &str) -> String {
    format!("func-{func_name}")
}

pub fn deployment_name(func_name: &str) -> String {
    format!("func-{func_name}-deployment")
}

pub fn service_name(func_name: &str) -> String {
    format!("func-{func_name}-service")
}

pub fn ingress_path(func_name: &str) -> String {
    format!("/serverlessfunc/{func_name}(/|$)(.*)")
}
