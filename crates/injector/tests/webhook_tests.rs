//! Integration tests for the injection webhook endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use k8s_openapi::api::core::v1::Pod;
use latency_lib::{
    api::webhook::{router, WebhookState},
    health::components,
    inject::ANNOTATION_INJECTED,
    AdmissionController, AdmissionReview, HealthRegistry, SidecarConfig, SidecarInjector,
    StructuredLogger,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn setup_test_app(config: SidecarConfig) -> Router {
    setup_test_app_with_health(config, HealthRegistry::new())
}

fn setup_test_app_with_health(config: SidecarConfig, health: HealthRegistry) -> Router {
    let controller = AdmissionController::new(
        SidecarInjector::new(config),
        StructuredLogger::new("latency-injector-test"),
    );
    router(Arc::new(WebhookState::new(controller, health)))
}

async fn get_status(app: Router, uri: &str) -> StatusCode {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

fn tidb_pod() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "generateName": "basic-tidb-",
            "labels": {
                "app.kubernetes.io/component": "tidb",
                "app.kubernetes.io/instance": "basic"
            }
        },
        "spec": {
            "containers": [{
                "name": "tidb",
                "image": "pingcap/tidb:v7.5.0",
                "ports": [{"name": "mysql-client", "containerPort": 4000}]
            }]
        }
    })
}

fn review_for(pod: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "namespace": "tidb-cluster",
            "operation": "CREATE",
            "object": pod
        }
    })
}

async fn post_inject(app: Router, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/inject")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_tidb_pod_gets_sidecar() {
    let app = setup_test_app(SidecarConfig {
        initial_latency: Duration::from_millis(100),
        ..SidecarConfig::default()
    });
    let pod = tidb_pod();

    let (status, body) = post_inject(app, serde_json::to_vec(&review_for(pod.clone())).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let review: AdmissionReview = serde_json::from_slice(&body).unwrap();
    assert_eq!(review.api_version, "admission.k8s.io/v1");
    assert_eq!(review.kind, "AdmissionReview");

    let response = review.response.unwrap();
    assert_eq!(response.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
    assert!(response.allowed);
    assert!(response.result.is_none());

    let patch = response.decoded_patch().unwrap().unwrap();
    let mut patched = pod;
    json_patch::patch(&mut patched, &patch.0).unwrap();

    let patched: Pod = serde_json::from_value(patched).unwrap();
    let containers = patched.spec.unwrap().containers;
    assert_eq!(containers.len(), 2);
    assert_eq!(containers[0].name, "tidb");
    assert_eq!(containers[1].name, "latency-agent");
    assert_eq!(
        containers[1].args.as_ref().unwrap()[..4],
        ["--port", "2332", "--latency", "100ms"]
    );
    assert_eq!(
        patched
            .metadata
            .annotations
            .unwrap()
            .get(ANNOTATION_INJECTED)
            .map(String::as_str),
        Some("true")
    );
}

#[tokio::test]
async fn test_patch_wire_format() {
    let app = setup_test_app(SidecarConfig::default());

    let (_, body) = post_inject(app, serde_json::to_vec(&review_for(tidb_pod())).unwrap()).await;
    let raw: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(raw["response"]["patchType"], "JSONPatch");
    // base64 text, not an inline JSON array
    assert!(raw["response"]["patch"].is_string());
}

#[tokio::test]
async fn test_unselected_pod_is_allowed_without_patch() {
    let app = setup_test_app(SidecarConfig::default());
    let mut pod = tidb_pod();
    pod["metadata"]["labels"]["app.kubernetes.io/component"] = json!("tikv");

    let (status, body) = post_inject(app, serde_json::to_vec(&review_for(pod)).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let response = serde_json::from_slice::<AdmissionReview>(&body)
        .unwrap()
        .response
        .unwrap();
    assert!(response.allowed);
    assert!(response.patch.is_none());
    assert!(response.patch_type.is_none());
}

#[tokio::test]
async fn test_already_injected_pod_is_not_patched_again() {
    let app = setup_test_app(SidecarConfig::default());
    let mut pod = tidb_pod();
    pod["metadata"]["annotations"] = json!({ANNOTATION_INJECTED: "true"});

    let (_, body) = post_inject(app, serde_json::to_vec(&review_for(pod)).unwrap()).await;
    let response = serde_json::from_slice::<AdmissionReview>(&body)
        .unwrap()
        .response
        .unwrap();

    assert!(response.allowed);
    assert!(response.patch.is_none());
}

#[tokio::test]
async fn test_duplicate_container_name_is_reported() {
    let app = setup_test_app(SidecarConfig::default());
    let mut pod = tidb_pod();
    pod["spec"]["containers"]
        .as_array_mut()
        .unwrap()
        .push(json!({"name": "latency-agent", "image": "busybox"}));

    let (status, body) = post_inject(app, serde_json::to_vec(&review_for(pod)).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let response = serde_json::from_slice::<AdmissionReview>(&body)
        .unwrap()
        .response
        .unwrap();
    assert!(!response.allowed);
    assert!(response.patch.is_none());
    assert!(response
        .result
        .unwrap()
        .message
        .unwrap()
        .contains("duplicated name found: latency-agent"));
}

#[tokio::test]
async fn test_empty_body_is_400() {
    let app = setup_test_app(SidecarConfig::default());

    let (status, body) = post_inject(app, Vec::new()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"no body found");
}

#[tokio::test]
async fn test_garbage_body_is_reported_in_review() {
    let app = setup_test_app(SidecarConfig::default());

    let (status, body) = post_inject(app, b"{not json".to_vec()).await;
    assert_eq!(status, StatusCode::OK);

    let review: AdmissionReview = serde_json::from_slice(&body).unwrap();
    assert_eq!(review.api_version, "admission.k8s.io/v1");
    assert_eq!(review.kind, "AdmissionReview");

    let response = review.response.unwrap();
    assert!(!response.allowed);
    assert!(response.result.unwrap().message.is_some());
}

#[tokio::test]
async fn test_custom_selector() {
    let app = setup_test_app(SidecarConfig {
        selector: [("app".to_string(), "pd".to_string())].into_iter().collect(),
        ..SidecarConfig::default()
    });

    let mut pod = tidb_pod();
    pod["metadata"]["labels"] = json!({"app": "pd"});

    let (_, body) = post_inject(app, serde_json::to_vec(&review_for(pod)).unwrap()).await;
    let response = serde_json::from_slice::<AdmissionReview>(&body)
        .unwrap()
        .response
        .unwrap();
    assert!(response.allowed);
    assert!(response.patch.is_some());
}

#[tokio::test]
async fn test_health_and_metrics() {
    let app = setup_test_app(SidecarConfig::default());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // make sure at least one admission has been counted in this process
    post_inject(app.clone(), serde_json::to_vec(&review_for(tidb_pod())).unwrap()).await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("latency_injector_admissions_total"));
}

#[tokio::test]
async fn test_readyz_follows_listener_state() {
    let health = HealthRegistry::new();
    health.register(components::WEBHOOK).await;
    let app = setup_test_app_with_health(SidecarConfig::default(), health.clone());

    assert_eq!(
        get_status(app.clone(), "/readyz").await,
        StatusCode::SERVICE_UNAVAILABLE
    );

    health.set_ready(true).await;
    assert_eq!(get_status(app.clone(), "/readyz").await, StatusCode::OK);
    assert_eq!(get_status(app, "/healthz").await, StatusCode::OK);
}

#[tokio::test]
async fn test_healthz_reports_unhealthy_webhook() {
    let health = HealthRegistry::new();
    health.register(components::WEBHOOK).await;
    health.set_ready(true).await;
    health
        .set_unhealthy(components::WEBHOOK, "serve: connection reset")
        .await;
    let app = setup_test_app_with_health(SidecarConfig::default(), health);

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let report: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["status"], "unhealthy");
    assert_eq!(
        report["components"]["webhook"]["message"],
        "serve: connection reset"
    );
}
