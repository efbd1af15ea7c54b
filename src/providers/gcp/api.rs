//! Hand-modeled request/response types for the Google REST surfaces this
//! engine drives: Cloud Run v2, Resource Manager v3, Cloud Billing v1 and
//! Service Usage v1. Only the fields the deployer reads or writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const ALLOCATION_LATEST: &str = "TRAFFIC_TARGET_ALLOCATION_TYPE_LATEST";
pub const ALLOCATION_REVISION: &str = "TRAFFIC_TARGET_ALLOCATION_TYPE_REVISION";

/// Cloud Run v2 Service, writable subset plus the output fields we read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<RevisionTemplate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub traffic: Vec<TrafficTarget>,

    // Output-only fields.
    #[serde(skip_serializing)]
    pub uri: Option<String>,
    #[serde(skip_serializing)]
    pub latest_ready_revision: Option<String>,
    #[serde(skip_serializing)]
    pub terminal_condition: Option<Condition>,
    #[serde(skip_serializing)]
    pub traffic_statuses: Vec<TrafficStatus>,
    #[serde(skip_serializing)]
    pub update_time: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RevisionTemplate {
    pub containers: Vec<Container>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaling: Option<Scaling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instance_request_concurrency: Option<i32>,
    /// Request timeout as a duration string, e.g. `"300s"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Container {
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceRequirements {
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scaling {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_instance_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instance_count: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrafficTarget {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub allocation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrafficStatus {
    #[serde(rename = "type")]
    pub allocation_type: Option<String>,
    pub revision: Option<String>,
    pub percent: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Condition {
    pub state: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Revision {
    pub name: String,
    pub create_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListRevisionsResponse {
    pub revisions: Vec<Revision>,
}

/// Long-running operation envelope shared by the Google APIs in use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Operation {
    pub name: String,
    pub done: bool,
    pub error: Option<OperationStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationStatus {
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IamPolicy {
    pub bindings: Vec<IamBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IamBinding {
    pub role: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub name: String,
    pub project_id: String,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BillingInfo {
    #[serde(skip_serializing)]
    pub billing_enabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub billing_account_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagedService {
    pub state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_write_body_omits_output_fields() {
        let service = Service {
            template: Some(RevisionTemplate {
                containers: vec![Container {
                    image: "us-central1-docker.pkg.dev/p/r/i:latest".to_string(),
                    ..Container::default()
                }],
                ..RevisionTemplate::default()
            }),
            uri: Some("https://should-not-serialize".to_string()),
            ..Service::default()
        };
        let body = serde_json::to_value(&service).expect("serializes");
        assert!(body.get("uri").is_none());
        assert!(body.get("terminalCondition").is_none());
        assert_eq!(
            body["template"]["containers"][0]["image"],
            "us-central1-docker.pkg.dev/p/r/i:latest"
        );
    }

    #[test]
    fn traffic_target_uses_wire_field_names() {
        let target = TrafficTarget {
            allocation_type: Some(ALLOCATION_REVISION.to_string()),
            revision: Some("svc-00001-abc".to_string()),
            percent: Some(100),
        };
        let body = serde_json::to_value(&target).expect("serializes");
        assert_eq!(body["type"], ALLOCATION_REVISION);
        assert_eq!(body["percent"], 100);
    }

    #[test]
    fn reads_terminal_condition_from_response() {
        let body = serde_json::json!({
            "uri": "https://my-app-env-xyz.a.run.app",
            "terminalCondition": { "state": "CONDITION_SUCCEEDED", "message": "" },
            "latestReadyRevision": "projects/p/locations/l/services/s/revisions/s-00002-abc"
        });
        let service: Service = serde_json::from_value(body).expect("deserializes");
        assert_eq!(
            service.terminal_condition.and_then(|c| c.state).as_deref(),
            Some("CONDITION_SUCCEEDED")
        );
        assert_eq!(service.uri.as_deref(), Some("https://my-app-env-xyz.a.run.app"));
    }
}
