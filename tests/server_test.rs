//! Upload Server Integration Tests
//!
//! Drives a real server over loopback with reqwest.
//!
//! Test Coverage:
//! - Health check and upload form
//! - Raw, single-file and multi-file uploads end to end
//! - Status mapping for rejected uploads
//! - Partial multi-file results

use local_uploadr::config::{Config, StorageConfig};
use local_uploadr::server::UploadServer;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

const LIMIT: u64 = 64;

/// Start a server storing into `root`, return its address
async fn start_server(root: &Path) -> SocketAddr {
    let mut config = Config::from_yaml_str(
        r#"
server:
  address: "127.0.0.1:0"
metrics:
  enabled: false
"#,
    )
    .expect("Failed to parse config");
    config.storage = StorageConfig {
        root: root.to_path_buf(),
        max_upload_bytes: Some(LIMIT),
        buffer_size: 16,
    };

    let server = UploadServer::new(config)
        .await
        .expect("Failed to create server");
    let addr = server.local_addr();

    tokio::spawn(async move { server.run().await });

    // Give server time to start
    sleep(Duration::from_millis(100)).await;
    addr
}

fn stored_files(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

fn staging_is_empty(root: &Path) -> bool {
    std::fs::read_dir(root.join(".incoming"))
        .unwrap()
        .next()
        .is_none()
}

#[tokio::test]
async fn test_health_check() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_upload_form() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let response = reqwest::get(format!("http://{}/", addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = response.text().await.unwrap();
    assert!(html.contains("action=\"/upload\""));
    assert!(html.contains("action=\"/multipleUpload\""));
}

#[tokio::test]
async fn test_raw_upload_round_trip() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;
    let payload: Vec<u8> = (0u8..10).collect();

    let response = reqwest::Client::new()
        .post(format!("http://{}/binaryUpload", addr))
        .header("Content-Type", "application/octet-stream")
        .header("X-Filename", "report.bin")
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["name"], "report.bin");
    assert_eq!(json["size_bytes"], 10);
    assert_eq!(json["sha256"], hex::encode(Sha256::digest(&payload)));

    assert_eq!(std::fs::read(dir.path().join("report.bin")).unwrap(), payload);
    assert!(staging_is_empty(dir.path()));
}

#[tokio::test]
async fn test_raw_upload_percent_encoded_name() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/binaryUpload", addr))
        .header("Content-Type", "application/octet-stream")
        .header("X-Filename", "r%C3%A9sum%C3%A9.pdf")
        .body("pdf")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["name"], "résumé.pdf");
}

#[tokio::test]
async fn test_raw_upload_traversal_stays_in_root() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/binaryUpload", addr))
        .header("Content-Type", "application/octet-stream")
        .header("X-Filename", "../../escape.txt")
        .body("contained")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["name"], "escape.txt");
    assert_eq!(stored_files(dir.path()), vec!["escape.txt"]);
}

#[tokio::test]
async fn test_single_multipart_upload() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let form = Form::new()
        .text("comment", "not a file")
        .part("file", Part::bytes(b"hello world".to_vec()).file_name("hello.txt"));

    let response = reqwest::Client::new()
        .post(format!("http://{}/upload", addr))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["name"], "hello.txt");
    assert_eq!(json["size_bytes"], 11);
    assert_eq!(
        std::fs::read(dir.path().join("hello.txt")).unwrap(),
        b"hello world"
    );
}

#[tokio::test]
async fn test_single_multipart_without_file_field() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let form = Form::new().text("comment", "no file here");

    let response = reqwest::Client::new()
        .post(format!("http://{}/upload", addr))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["error"], "missing_payload");
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_single_multipart_with_nothing_selected() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    // What a browser submits for a file input left empty
    let form = Form::new().part("file", Part::bytes(Vec::new()).file_name(""));

    let response = reqwest::Client::new()
        .post(format!("http://{}/upload", addr))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["error"], "missing_payload");
    assert!(stored_files(dir.path()).is_empty());
    assert!(staging_is_empty(dir.path()));
}

#[tokio::test]
async fn test_multiple_multipart_upload() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let form = Form::new()
        .part("files", Part::bytes(b"first".to_vec()).file_name("a.txt"))
        .part("files", Part::bytes(b"second".to_vec()).file_name("a.txt"));

    let response = reqwest::Client::new()
        .post(format!("http://{}/multipleUpload", addr))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["committed"], 2);
    assert_eq!(json["failed"], 0);
    assert_eq!(json["parts"][0]["object"]["name"], "a.txt");
    assert_eq!(json["parts"][1]["object"]["name"], "a-1.txt");

    assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"first");
    assert_eq!(std::fs::read(dir.path().join("a-1.txt")).unwrap(), b"second");
}

#[tokio::test]
async fn test_multiple_upload_partial_failure() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let form = Form::new()
        .part("files", Part::bytes(b"one".to_vec()).file_name("one.txt"))
        .part(
            "files",
            Part::bytes(vec![b'x'; LIMIT as usize + 1]).file_name("two.txt"),
        )
        .part("files", Part::bytes(b"three".to_vec()).file_name("three.txt"));

    let response = reqwest::Client::new()
        .post(format!("http://{}/multipleUpload", addr))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["committed"], 2);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["parts"][1]["declared_name"], "two.txt");
    assert_eq!(json["parts"][1]["error"]["error"], "payload_too_large");

    assert_eq!(stored_files(dir.path()), vec!["one.txt", "three.txt"]);
    assert!(staging_is_empty(dir.path()));
}

#[tokio::test]
async fn test_get_on_upload_route_is_rejected() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let response = reqwest::get(format!("http://{}/upload", addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get("allow").unwrap(), "POST");
}

#[tokio::test]
async fn test_unsupported_media_type() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/binaryUpload", addr))
        .header("Content-Type", "text/plain")
        .header("X-Filename", "note.txt")
        .body("hi")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["error"], "unsupported_media_type");
}

#[tokio::test]
async fn test_raw_upload_over_limit() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/binaryUpload", addr))
        .header("Content-Type", "application/octet-stream")
        .header("X-Filename", "big.bin")
        .body(vec![0u8; LIMIT as usize + 1])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["error"], "payload_too_large");
    assert!(stored_files(dir.path()).is_empty());
    assert!(staging_is_empty(dir.path()));
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/elsewhere", addr))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
