//! Mutating admission for latency agent injection
//!
//! Decodes an `admission.k8s.io` review, asks the [`SidecarInjector`]
//! whether the pod qualifies, and answers with a JSON patch that appends
//! the sidecar. Every failure is reported inside the review response; the
//! patch itself is applied by the API server.

use crate::inject::{InjectError, SidecarInjector};
use crate::observability::{outcomes, StructuredLogger, WebhookMetrics};
use crate::patch::{self, PatchError};
use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_API_VERSION: &str = "admission.k8s.io/v1";
pub const REVIEW_KIND: &str = "AdmissionReview";

/// Admission failure, reported in the review response
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("no body found")]
    EmptyBody,

    #[error("couldn't decode admission review: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("admission review carries no request")]
    MissingRequest,

    #[error("admission request carries no object")]
    MissingObject,

    #[error("couldn't decode pod: {0}")]
    DecodePod(#[source] serde_json::Error),

    #[error("failed to run injection: {0}")]
    Inject(#[from] InjectError),

    #[error("failed to create patch: {0}")]
    Patch(#[from] PatchError),
}

/// `AdmissionReview` envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

/// The object under admission and its context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// Verdict returned to the API server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    #[serde(default)]
    pub allowed: bool,
    #[serde(rename = "status", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Status>,
    /// Base64 encoded on the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<ByteString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
}

impl AdmissionResponse {
    /// Allow without changes
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            ..Default::default()
        }
    }

    /// Report `error`; `allowed` stays unset
    pub fn from_error(uid: impl Into<String>, error: &AdmissionError) -> Self {
        Self {
            uid: uid.into(),
            result: Some(Status {
                message: Some(error.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Allow with a JSON patch
    pub fn with_patch(mut self, patch: &Patch) -> Result<Self, PatchError> {
        self.patch = Some(ByteString(serde_json::to_vec(patch)?));
        self.patch_type = Some(PatchType::JsonPatch);
        Ok(self)
    }

    /// Decode the patch carried by this response, if any
    pub fn decoded_patch(&self) -> Option<Result<Patch, serde_json::Error>> {
        self.patch
            .as_ref()
            .map(|bytes| serde_json::from_slice(&bytes.0))
    }
}

/// Admission entry point: review in, review out
#[derive(Debug, Clone)]
pub struct AdmissionController {
    injector: SidecarInjector,
    metrics: WebhookMetrics,
    logger: StructuredLogger,
}

impl AdmissionController {
    pub fn new(injector: SidecarInjector, logger: StructuredLogger) -> Self {
        Self {
            injector,
            metrics: WebhookMetrics::new(),
            logger,
        }
    }

    pub fn injector(&self) -> &SidecarInjector {
        &self.injector
    }

    /// Answer a serialized review. Never fails: errors land in the response.
    pub fn review(&self, body: &[u8]) -> AdmissionReview {
        let request_review = if body.is_empty() {
            Err(AdmissionError::EmptyBody)
        } else {
            serde_json::from_slice::<AdmissionReview>(body).map_err(AdmissionError::Decode)
        };

        let request_review = match request_review {
            Ok(review) => review,
            Err(e) => {
                warn!(error = %e, "Failed to decode admission review");
                self.metrics
                    .observe_admission(outcomes::ERROR, Default::default(), 0);
                return AdmissionReview {
                    api_version: DEFAULT_API_VERSION.to_string(),
                    kind: REVIEW_KIND.to_string(),
                    request: None,
                    response: Some(AdmissionResponse::from_error("", &e)),
                };
            }
        };

        let response = match &request_review.request {
            Some(request) => self.admit(request),
            None => AdmissionResponse::from_error("", &AdmissionError::MissingRequest),
        };

        AdmissionReview {
            api_version: non_empty_or(request_review.api_version, DEFAULT_API_VERSION),
            kind: non_empty_or(request_review.kind, REVIEW_KIND),
            request: None,
            response: Some(response),
        }
    }

    /// Decide on a single request
    pub fn admit(&self, request: &AdmissionRequest) -> AdmissionResponse {
        let start = Instant::now();
        let namespace = request.namespace.as_deref().unwrap_or_default();

        let (response, outcome, patch_ops) = match self.mutate(request) {
            Ok(None) => (AdmissionResponse::allow(&request.uid), outcomes::SKIPPED, 0),
            Ok(Some(patch)) => {
                let ops = patch.0.len();
                match AdmissionResponse::allow(&request.uid).with_patch(&patch) {
                    Ok(response) => (response, outcomes::INJECTED, ops),
                    Err(e) => (
                        AdmissionResponse::from_error(&request.uid, &AdmissionError::Patch(e)),
                        outcomes::ERROR,
                        0,
                    ),
                }
            }
            Err(e) => {
                warn!(uid = %request.uid, error = %e, "Admission failed");
                (
                    AdmissionResponse::from_error(&request.uid, &e),
                    outcomes::ERROR,
                    0,
                )
            }
        };

        self.metrics
            .observe_admission(outcome, start.elapsed(), patch_ops);
        self.logger
            .log_admission(&request.uid, namespace, outcome, patch_ops);
        response
    }

    /// The patch to apply, `None` when the pod is left alone
    fn mutate(&self, request: &AdmissionRequest) -> Result<Option<Patch>, AdmissionError> {
        let object = request.object.clone().ok_or(AdmissionError::MissingObject)?;
        let mut pod: Pod = serde_json::from_value(object).map_err(AdmissionError::DecodePod)?;

        if !self.injector.needs_injection(&pod) {
            debug!(uid = %request.uid, pod = ?pod.metadata.name, "No injection needed");
            return Ok(None);
        }

        // Pods created from controllers have no namespace yet
        if pod.metadata.namespace.is_none() {
            pod.metadata.namespace = request.namespace.clone();
        }

        let merged = self.injector.inject(&pod)?;
        let patch = patch::create_patch(&pod, &merged)?;

        info!(
            uid = %request.uid,
            pod = ?pod.metadata.name.as_ref().or(pod.metadata.generate_name.as_ref()),
            container = %self.injector.config().container_name,
            "Injecting latency agent"
        );
        Ok(Some(patch))
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::{SidecarConfig, ANNOTATION_INJECTED, LABEL_COMPONENT};
    use serde_json::{json, Value};

    fn controller() -> AdmissionController {
        AdmissionController::new(
            SidecarInjector::new(SidecarConfig::default()),
            StructuredLogger::new("injector-test"),
        )
    }

    fn pod_json(labels: Value, annotations: Option<Value>, containers: &[&str]) -> Value {
        let containers: Vec<Value> = containers
            .iter()
            .map(|name| json!({"name": name, "image": format!("{}:v1", name)}))
            .collect();
        let mut metadata = json!({"name": "tidb-0", "labels": labels});
        if let Some(annotations) = annotations {
            metadata["annotations"] = annotations;
        }
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": metadata,
            "spec": {"containers": containers}
        })
    }

    fn review_body(object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1beta1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "7f0b2891-916f-4ed6-b7cd-27bff1815a8c",
                "namespace": "tidb-cluster",
                "operation": "CREATE",
                "object": object
            }
        }))
        .unwrap()
    }

    fn apply(original: &Value, response: &AdmissionResponse) -> Value {
        let mut doc: Value =
            serde_json::to_value(serde_json::from_value::<Pod>(original.clone()).unwrap()).unwrap();
        if let Some(patch) = response.decoded_patch() {
            json_patch::patch(&mut doc, &patch.unwrap().0).unwrap();
        }
        doc
    }

    #[test]
    fn test_empty_body_is_error_response() {
        let review = controller().review(b"");
        let response = review.response.unwrap();
        assert!(!response.allowed);
        assert_eq!(
            response.result.unwrap().message.as_deref(),
            Some("no body found")
        );
        assert_eq!(review.api_version, DEFAULT_API_VERSION);
    }

    #[test]
    fn test_undecodable_body_is_error_response() {
        let review = controller().review(b"{not json");
        let response = review.response.unwrap();
        assert!(!response.allowed);
        assert!(response.patch.is_none());
        let message = response.result.unwrap().message.unwrap();
        assert!(message.starts_with("couldn't decode admission review"));
    }

    #[test]
    fn test_missing_request_is_error_response() {
        let body = br#"{"apiVersion":"admission.k8s.io/v1","kind":"AdmissionReview"}"#;
        let response = controller().review(body).response.unwrap();
        assert!(!response.allowed);
        assert!(response.result.is_some());
    }

    #[test]
    fn test_bad_pod_object_is_error_response() {
        let body = review_body(json!({"spec": {"containers": "not-a-list"}}));
        let response = controller().review(&body).response.unwrap();
        assert!(!response.allowed);
        assert_eq!(response.uid, "7f0b2891-916f-4ed6-b7cd-27bff1815a8c");
        let message = response.result.unwrap().message.unwrap();
        assert!(message.starts_with("couldn't decode pod"));
    }

    #[test]
    fn test_unselected_pod_is_allowed_without_patch() {
        let pod = pod_json(json!({LABEL_COMPONENT: "tikv"}), None, &["kv"]);
        let review = controller().review(&review_body(pod));

        let response = review.response.unwrap();
        assert!(response.allowed);
        assert!(response.patch.is_none());
        assert!(response.patch_type.is_none());
    }

    #[test]
    fn test_selected_pod_gets_sidecar_patch() {
        let pod = pod_json(json!({LABEL_COMPONENT: "tidb"}), None, &["db"]);
        let review = controller().review(&review_body(pod.clone()));

        assert_eq!(review.api_version, "admission.k8s.io/v1beta1");
        assert_eq!(review.kind, "AdmissionReview");

        let response = review.response.unwrap();
        assert!(response.allowed);
        assert_eq!(response.uid, "7f0b2891-916f-4ed6-b7cd-27bff1815a8c");
        assert_eq!(response.patch_type, Some(PatchType::JsonPatch));

        let patch = serde_json::to_value(response.decoded_patch().unwrap().unwrap()).unwrap();
        let ops = patch.as_array().unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().any(|op| op["op"] == "add"
            && op["path"] == "/spec/containers/1"
            && op["value"]["name"] == "latency-agent"));
        assert!(ops
            .iter()
            .any(|op| op["op"] == "add" && op["path"] == "/metadata/annotations"));

        let patched = apply(&pod, &response);
        assert_eq!(patched["metadata"]["annotations"][ANNOTATION_INJECTED], "true");
        assert_eq!(patched["spec"]["containers"][1]["name"], "latency-agent");
    }

    #[test]
    fn test_patched_pod_matches_injector_output() {
        let controller = controller();
        let pod = pod_json(
            json!({LABEL_COMPONENT: "tidb"}),
            Some(json!({"team": "storage"})),
            &["db", "slowlog"],
        );

        let response = controller.review(&review_body(pod.clone())).response.unwrap();

        let typed: Pod = serde_json::from_value(pod.clone()).unwrap();
        let expected = controller.injector().inject(&typed).unwrap();
        assert_eq!(apply(&pod, &response), serde_json::to_value(expected).unwrap());
    }

    #[test]
    fn test_readmission_is_noop() {
        let controller = controller();
        let pod = pod_json(json!({LABEL_COMPONENT: "tidb"}), None, &["db"]);

        let first = controller.review(&review_body(pod.clone())).response.unwrap();
        let injected = apply(&pod, &first);

        let second = controller
            .review(&review_body(injected.clone()))
            .response
            .unwrap();
        assert!(second.allowed);
        assert!(second.patch.is_none());
        assert_eq!(apply(&injected, &second), injected);
    }

    #[test]
    fn test_duplicate_container_is_error_without_patch() {
        let pod = pod_json(json!({LABEL_COMPONENT: "tidb"}), None, &["db", "latency-agent"]);
        let response = controller().review(&review_body(pod)).response.unwrap();

        assert!(!response.allowed);
        assert!(response.patch.is_none());
        let message = response.result.unwrap().message.unwrap();
        assert!(message.contains("duplicated name found: latency-agent"));
    }

    #[test]
    fn test_response_wire_format() {
        let pod = pod_json(json!({LABEL_COMPONENT: "tidb"}), None, &["db"]);
        let review = controller().review(&review_body(pod));
        let wire = serde_json::to_value(&review).unwrap();

        assert!(wire.get("request").is_none());
        assert_eq!(wire["response"]["allowed"], true);
        assert_eq!(wire["response"]["patchType"], "JSONPatch");
        // patch travels base64 encoded
        assert!(wire["response"]["patch"].is_string());
    }
}
