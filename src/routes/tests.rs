use super::routes::routes;
use crate::{
    services::{
        credentials::CredentialPolicy,
        file_store::FileStore,
        transfer::{CollisionPolicy, TransferPipeline},
    },
    state::AppState,
};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "----file-exchange-test-boundary";
const API_KEY: &str = "5132135788";

struct TestApp {
    router: Router,
    destination: PathBuf,
    staging_root: PathBuf,
    uploads_root: PathBuf,
}

async fn test_app(temp: &TempDir, destination: &Path) -> TestApp {
    let uploads = FileStore::open(
        temp.path().join("uploads"),
        CredentialPolicy::new(Some("admin".into())),
    )
    .await
    .unwrap();
    let staging = FileStore::open(temp.path().join("staging"), CredentialPolicy::default())
        .await
        .unwrap();
    let staging_root = staging.root().to_path_buf();
    let pipeline = TransferPipeline::new(staging, destination, CollisionPolicy::Overwrite);
    let state = AppState::new(
        uploads,
        pipeline,
        Some(API_KEY.into()),
        vec!["xlsx".into(), "txt".into(), "csv".into()],
    );

    TestApp {
        router: routes(16 * 1024 * 1024).with_state(state),
        destination: destination.to_path_buf(),
        staging_root,
        uploads_root: temp.path().join("uploads"),
    }
}

/// (field name, optional filename, content)
fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_request(uri: &str, api_key: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={}", BOUNDARY),
    );
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::from(body)).unwrap()
}

fn form_request(uri: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Upload files through the web form and return their stored ids in order.
async fn upload(app: &TestApp, files: &[(&str, &[u8])], password: Option<&str>) -> Vec<String> {
    let mut parts: Vec<(&str, Option<&str>, &[u8])> = files
        .iter()
        .map(|(name, data)| ("files", Some(*name), *data))
        .collect();
    if let Some(password) = password {
        parts.push(("protection_password", None, password.as_bytes()));
    }
    let response = send(app, multipart_request("/upload", None, multipart_body(&parts))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    json["uploaded"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["stored_id"].as_str().unwrap().to_string())
        .collect()
}

fn listed_names(json: &Value) -> Vec<String> {
    json["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["original_name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn empty_listing_reports_defaults() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;

    let response = send(&app, get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["files"], Value::Array(vec![]));
    assert_eq!(json["current_sort"], "name");
    assert_eq!(json["current_order"], "asc");
}

#[tokio::test]
async fn uploads_are_listed_and_sorted() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    upload(
        &app,
        &[("B", &[1u8; 10]), ("a", &[1u8; 5]), ("C", &[1u8; 20])],
        None,
    )
    .await;

    let by_name = body_json(send(&app, get("/")).await).await;
    assert_eq!(listed_names(&by_name), ["a", "B", "C"]);

    let by_size = body_json(send(&app, get("/?sort=size&order=desc")).await).await;
    assert_eq!(listed_names(&by_size), ["C", "B", "a"]);
    assert_eq!(by_size["current_sort"], "size");
    assert_eq!(by_size["files"][0]["human_size"], "20 B");

    let fallback = body_json(send(&app, get("/?sort=colour&order=sideways")).await).await;
    assert_eq!(listed_names(&fallback), ["a", "B", "C"]);
}

#[tokio::test]
async fn upload_without_files_is_rejected() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    let body = multipart_body(&[("files", Some(""), b"")]);
    let response = send(&app, multipart_request("/upload", None, body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unprotected_file_downloads_with_original_name() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    let ids = upload(&app, &[("週報.txt", b"weekly")], None).await;

    let response = send(&app, get(&format!("/download/{}", ids[0]))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("filename*=UTF-8''%E9%80%B1%E5%A0%B1.txt"));
    assert_eq!(body_bytes(response).await, b"weekly");
}

#[tokio::test]
async fn protected_file_needs_password_or_override() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    let ids = upload(&app, &[("secret.txt", b"classified")], Some("pw")).await;
    let uri = format!("/download/{}", ids[0]);

    assert_eq!(send(&app, get(&uri)).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        send(&app, form_request(&uri, "password=nope")).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        send(&app, form_request(&uri, "")).await.status(),
        StatusCode::FORBIDDEN
    );

    let response = send(&app, form_request(&uri, "password=pw")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"classified");

    let response = send(&app, form_request(&uri, "password=admin")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn download_of_unknown_id_is_not_found() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    let response = send(&app, get("/download/does-not-exist.txt")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn check_lock_reports_protection() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    let locked = upload(&app, &[("l.txt", b"x")], Some("pw")).await;
    let open = upload(&app, &[("o.txt", b"x")], None).await;

    let json = body_json(send(&app, get(&format!("/check_lock/{}", locked[0]))).await).await;
    assert_eq!(json["is_locked"], true);
    let json = body_json(send(&app, get(&format!("/check_lock/{}", open[0]))).await).await;
    assert_eq!(json["is_locked"], false);
    let json = body_json(send(&app, get("/check_lock/unknown")).await).await;
    assert_eq!(json["is_locked"], true);
}

#[tokio::test]
async fn delete_checks_password_then_removes() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    let ids = upload(&app, &[("d.txt", b"x")], Some("pw")).await;
    let uri = format!("/delete/{}", ids[0]);

    assert_eq!(
        send(&app, form_request("/delete/unknown.txt", "password=pw"))
            .await
            .status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        send(&app, form_request(&uri, "password=wrong")).await.status(),
        StatusCode::FORBIDDEN
    );

    let response = send(&app, form_request(&uri, "password=pw")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["original_name"], "d.txt");
    assert_eq!(json["file_was_present"], true);

    let listing = body_json(send(&app, get("/")).await).await;
    assert!(listed_names(&listing).is_empty());
}

#[tokio::test]
async fn delete_reports_file_already_gone() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    let ids = upload(&app, &[("g.txt", b"x")], None).await;
    std::fs::remove_file(temp.path().join("uploads").join(&ids[0])).unwrap();

    let response = send(&app, form_request(&format!("/delete/{}", ids[0]), "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["file_was_present"], false);
}

#[tokio::test]
async fn automated_upload_requires_api_key() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    let body = || multipart_body(&[("file", Some("MPS.xlsx"), b"rows")]);

    let response = send(&app, multipart_request("/api/sap_upload", None, body())).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = send(&app, multipart_request("/api/sap_upload", Some("guess"), body())).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!app.destination.join("MPS.xlsx").exists());
}

#[tokio::test]
async fn automated_upload_moves_file_to_destination() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("share").join("MPS")).await;
    let body = multipart_body(&[("file", Some("MPS.xlsx"), b"rows")]);

    let response = send(&app, multipart_request("/api/sap_upload", Some(API_KEY), body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["original_name"], "MPS.xlsx");
    assert!(json.get("staged_as").is_none());

    assert_eq!(std::fs::read(app.destination.join("MPS.xlsx")).unwrap(), b"rows");
    let ledger = std::fs::read_to_string(app.staging_root.join("metadata.json")).unwrap();
    assert_eq!(serde_json::from_str::<Value>(&ledger).unwrap(), serde_json::json!({}));
}

#[tokio::test]
async fn automated_upload_keeps_file_staged_when_move_fails() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let app = test_app(&temp, &blocker.join("dest")).await;
    let body = multipart_body(&[("file", Some("MPS.xlsx"), b"rows")]);

    let response = send(&app, multipart_request("/api/sap_upload", Some(API_KEY), body)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    let staged_as = json["staged_as"].as_str().unwrap();
    assert_eq!(std::fs::read(app.staging_root.join(staged_as)).unwrap(), b"rows");
}

#[tokio::test]
async fn automated_upload_without_file_part_is_bad_request() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    let body = multipart_body(&[("note", None, b"hello")]);
    let response = send(&app, multipart_request("/api/sap_upload", Some(API_KEY), body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = multipart_body(&[("file", Some(""), b"")]);
    let response = send(&app, multipart_request("/api/sap_upload", Some(API_KEY), body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn automated_upload_rejects_disallowed_file_type() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;

    for name in ["tool.exe", "README", "MPS.xlsx.bat"] {
        let body = multipart_body(&[("file", Some(name), b"payload")]);
        let response = send(&app, multipart_request("/api/sap_upload", Some(API_KEY), body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{name}");
        let json = body_json(response).await;
        assert_eq!(json["error"], "File type not allowed");
    }

    assert!(!app.staging_root.join("metadata.json").exists());
    assert!(!app.destination.exists());

    let body = multipart_body(&[("file", Some("Daily.CSV"), b"a,b")]);
    let response = send(&app, multipart_request("/api/sap_upload", Some(API_KEY), body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(std::fs::read(app.destination.join("Daily.CSV")).unwrap(), b"a,b");
}

#[tokio::test]
async fn health_endpoints_report_ok() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;

    assert_eq!(send(&app, get("/healthz")).await.status(), StatusCode::OK);

    let response = send(&app, get("/readyz")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["checks"]["uploads"]["ok"], true);
    assert_eq!(json["checks"]["staging"]["ok"], true);
    assert_eq!(json["checks"]["destination"]["ok"], true);
    assert_eq!(json["checks"]["uploads_ledger"]["ok"], true);
    assert_eq!(json["checks"]["staging_ledger"]["ok"], true);
}

#[tokio::test]
async fn readiness_fails_on_unparseable_ledger() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, &temp.path().join("dest")).await;
    std::fs::write(app.uploads_root.join("metadata.json"), b"{ half").unwrap();

    let response = send(&app, get("/readyz")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["checks"]["uploads_ledger"]["ok"], false);
    assert_eq!(json["checks"]["staging_ledger"]["ok"], true);
}

#[tokio::test]
async fn readiness_fails_when_destination_cannot_exist() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let app = test_app(&temp, &blocker.join("dest")).await;

    let response = send(&app, get("/readyz")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
