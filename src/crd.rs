//! The `ServerlessFunc` custom resource: the desired state of one function workload.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Desired state of a function. Owned by whoever applies the resource; the controller only
/// ever writes [ServerlessFuncStatus].
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, Default, JsonSchema)]
#[kube(
    group = "serverlesscontroller.k8s.io",
    version = "v1alpha1",
    kind = "ServerlessFunc",
    plural = "serverlessfuncs",
    shortname = "sf",
    derive = "PartialEq",
    status = "ServerlessFuncStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessFuncSpec {
    /// Name of the executable that the rpc server container runs.
    pub image: String,
    /// Changing the version rolls the workload.
    #[serde(default)]
    pub version: String,
    /// `None` leaves the replica count to the deployment defaults, it does not mean zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessFuncStatus {
    pub available_replicas: i32,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use kube::Resource;

    /// A spec as the api server would hand it out: named, namespaced and with a uid.
    pub(crate) fn serverless_func(name: &str, image: &str, version: &str, replicas: Option<i32>) -> ServerlessFunc {
        let mut func = ServerlessFunc::new(
            name,
            ServerlessFuncSpec {
                image: image.to_owned(),
                version: version.to_owned(),
                replicas,
            },
        );
        func.metadata = ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some("default".to_owned()),
            uid: Some(format!("uid-{name}")),
            resource_version: Some("1".to_owned()),
            ..Default::default()
        };
        func
    }

    #[test]
    fn test_spec_deserializes_without_replicas() {
        // Given: A manifest body that leaves replicas out
        let json = r#"{"image": "nop", "version": "v1"}"#;

        // When: Deserializing the spec
        let spec: ServerlessFuncSpec = serde_json::from_str(json).unwrap();

        // Then: Replicas is unspecified rather than zero
        assert_eq!(spec.replicas, None);
        assert_eq!(spec.image, "nop");
    }

    #[test]
    fn test_status_uses_camel_case() {
        // Given: A status
        let status = ServerlessFuncStatus { available_replicas: 3 };

        // When: Serializing it
        let json = serde_json::to_value(&status).unwrap();

        // Then: The field follows kubernetes naming
        assert_eq!(json["availableReplicas"], 3);
    }

    #[test]
    fn test_resource_identity() {
        // Given / When: The static type information
        // Then: It matches the group the CRD is installed under
        assert_eq!(ServerlessFunc::kind(&()), "ServerlessFunc");
        assert_eq!(ServerlessFunc::api_version(&()), "serverlesscontroller.k8s.io/v1alpha1");
    }
}
