use super::*;
use crate::error::{ErrorCode, ServiceError};
use crate::types::{JobStatus, TransferFormat};
use tempfile::tempdir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpClient {
    let config = Config::new(server.uri(), "test-key");
    HttpClient::new(Arc::new(config)).unwrap()
}

fn format(server: &MockServer, name: &str, file: &str) -> TransferFormat {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "__links": { "self": format!("{}/files/{}", server.uri(), file) }
    }))
    .unwrap()
}

fn done_snapshot(id: &str, formats: Vec<TransferFormat>) -> JobSnapshot {
    JobSnapshot {
        id: JobId::from(id),
        status: JobStatus::Done,
        percent: 100,
        status_message: String::new(),
        transfer_formats: formats,
    }
}

// ---- upload ----

#[tokio::test]
async fn upload_sends_key_header_file_and_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/didimos"))
        .and(header(API_KEY_HEADER, "test-key"))
        .and(body_string_contains("name=\"photo\""))
        .and(body_string_contains("name=\"input_type\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"key": "abc123"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let photo = dir.path().join("leo.jpg");
    std::fs::write(&photo, b"jpeg bytes").unwrap();

    let request = UploadRequest::new(JobKind::Didimo, FilePart::new("photo", &photo))
        .field("input_type", "photo");
    let created = client_for(&server).create_job(&request).await.unwrap();

    assert_eq!(created.id, JobId::from("abc123"));
    assert!(created.transfer_formats.is_empty());
}

#[tokio::test]
async fn upload_accepts_200_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/didimos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"key": "k200"})))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let photo = dir.path().join("a.png");
    std::fs::write(&photo, b"png").unwrap();

    let created = client_for(&server)
        .create_job(&UploadRequest::new(JobKind::Didimo, FilePart::new("photo", &photo)))
        .await
        .unwrap();
    assert_eq!(created.id.as_str(), "k200");
}

#[tokio::test]
async fn upload_rejection_keeps_status_body_and_description() {
    let server = MockServer::start().await;
    let body = r#"{"description": "Not enough points", "code": 10004}"#;
    Mock::given(method("POST"))
        .and(path("/v3/didimos"))
        .respond_with(ResponseTemplate::new(402).set_body_string(body))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let photo = dir.path().join("leo.jpg");
    std::fs::write(&photo, b"jpeg").unwrap();

    let err = client_for(&server)
        .create_job(&UploadRequest::new(JobKind::Didimo, FilePart::new("photo", &photo)))
        .await
        .unwrap_err();

    match err {
        UploadError::Rejected {
            status,
            body: raw,
            message,
        } => {
            assert_eq!(status, 402);
            assert_eq!(raw, body);
            assert_eq!(message.as_deref(), Some("Not enough points"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn upload_of_missing_file_never_reaches_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .create_job(&UploadRequest::new(
            JobKind::Didimo,
            FilePart::new("photo", "/definitely/not/here.jpg"),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Io { .. }));
}

#[tokio::test]
async fn upload_attaches_secondary_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/didimos"))
        .and(body_string_contains("name=\"depth\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"key": "rgbd1"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let photo = dir.path().join("face.jpg");
    let depth = dir.path().join("face_depth.png");
    std::fs::write(&photo, b"rgb").unwrap();
    std::fs::write(&depth, b"depth").unwrap();

    let request = UploadRequest::new(JobKind::Didimo, FilePart::new("photo", &photo))
        .secondary(FilePart::new("depth", &depth));
    let created = client_for(&server).create_job(&request).await.unwrap();
    assert_eq!(created.id.as_str(), "rgbd1");
}

// ---- status ----

#[tokio::test]
async fn status_not_found_is_distinct_from_other_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/didimos/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/didimos/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let err = client
        .job_status(JobKind::Didimo, &JobId::from("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, StatusError::NotFound { ref id } if id == "missing"));

    let err = client
        .job_status(JobKind::Didimo, &JobId::from("broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, StatusError::Http { status: 500, .. }));
}

#[tokio::test]
async fn asset_status_uses_asset_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/assets/as1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "key": "as1", "status": "processing", "percent": 30, "status_message": ""
        })))
        .mount(&server)
        .await;

    let snapshot = client_for(&server)
        .job_status(JobKind::Asset, &JobId::from("as1"))
        .await
        .unwrap();
    assert_eq!(snapshot.status, JobStatus::Processing);
    assert_eq!(snapshot.percent, 30);
}

#[tokio::test]
async fn status_many_reports_unknown_ids_inline_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/didimos/one"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "key": "one", "status": "done", "status_message": ""
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/didimos/two"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let lookups = status_many(&client, &[JobId::from("one"), JobId::from("two")])
        .await
        .unwrap();

    assert!(matches!(&lookups[0], StatusLookup::Found(s) if s.id.as_str() == "one"));
    assert_eq!(
        lookups[1],
        StatusLookup::NotFound {
            key: JobId::from("two")
        }
    );
    assert_eq!(silent_exit_code(&lookups), 1);
}

#[test]
fn silent_exit_code_follows_first_unfinished_or_failed_job() {
    let mut pending = done_snapshot("p", vec![]);
    pending.status = JobStatus::Pending;
    let mut failed = done_snapshot("f", vec![]);
    failed.status_message = "no face found".into();

    assert_eq!(
        silent_exit_code(&[StatusLookup::Found(done_snapshot("d", vec![]))]),
        0
    );
    assert_eq!(
        silent_exit_code(&[
            StatusLookup::Found(done_snapshot("d", vec![])),
            StatusLookup::Found(pending.clone()),
        ]),
        2
    );
    assert_eq!(
        silent_exit_code(&[StatusLookup::Found(failed), StatusLookup::Found(pending)]),
        1
    );
    assert_eq!(silent_exit_code(&[]), 0);
}

// ---- download ----

#[tokio::test]
async fn stream_to_file_writes_body_and_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/abc_maya.zip"))
        .and(header(API_KEY_HEADER, "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let dest = dir.path().join("abc_maya.zip");
    let (tx, mut rx) = broadcast::channel(64);
    let sink = ProgressSink::new(JobId::from("abc"), tx);

    let written = client_for(&server)
        .fetch_artifact(&format!("{}/files/abc_maya.zip", server.uri()), &dest, &sink)
        .await
        .unwrap();

    assert_eq!(written, 4096);
    assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    assert!(matches!(
        last,
        Some(Event::Downloading { bytes: 4096, .. })
    ));
}

#[tokio::test]
async fn failed_fetch_leaves_no_file_behind() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/gone.zip"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let dest = dir.path().join("gone.zip");
    let err = client_for(&server)
        .fetch_artifact(
            &format!("{}/files/gone.zip", server.uri()),
            &dest,
            &ProgressSink::disabled(JobId::from("gone")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Http { status: 403, .. }));
    assert!(!dest.exists());
}

#[tokio::test]
async fn download_job_fetches_only_requested_package_types() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/abc_maya.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"maya".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/abc_gltf.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"gltf".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let snapshot = done_snapshot(
        "abc",
        vec![
            format(&server, "maya", "abc_maya.zip"),
            format(&server, "gltf", "abc_gltf.zip"),
        ],
    );
    let dir = tempdir().unwrap();
    let downloads = DownloadClient::silent(Arc::new(client_for(&server)));

    let result = downloads
        .download_job(3, &snapshot, &["maya".to_string()], dir.path())
        .await;

    assert!(result.succeeded());
    assert_eq!(result.index, 3);
    assert_eq!(result.artifacts.len(), 1);
    assert_eq!(result.artifacts[0].output_file, dir.path().join("abc_maya.zip"));
    assert_eq!(std::fs::read(dir.path().join("abc_maya.zip")).unwrap(), b"maya");
}

#[tokio::test]
async fn download_job_without_matching_format_is_recorded_not_thrown() {
    let server = MockServer::start().await;
    let snapshot = done_snapshot("abc", vec![format(&server, "maya", "abc_maya.zip")]);
    let dir = tempdir().unwrap();
    let downloads = DownloadClient::silent(Arc::new(client_for(&server)));

    let result = downloads
        .download_job(0, &snapshot, &["unity".to_string()], dir.path())
        .await;

    assert!(result.download_error);
    assert_eq!(result.code.as_deref(), Some("no_matching_format"));
    assert!(result.artifacts.is_empty());
}

#[tokio::test]
async fn download_job_records_partial_artifact_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/abc_maya.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/abc_fbx.zip"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let snapshot = done_snapshot(
        "abc",
        vec![
            format(&server, "maya", "abc_maya.zip"),
            format(&server, "fbx", "abc_fbx.zip"),
        ],
    );
    let dir = tempdir().unwrap();
    let result = DownloadClient::silent(Arc::new(client_for(&server)))
        .download_job(0, &snapshot, &[], dir.path())
        .await;

    assert!(result.download_error);
    assert_eq!(result.code.as_deref(), Some("download_http_error"));
    assert!(result.artifacts[0].succeeded());
    assert!(!result.artifacts[1].succeeded());
}

#[tokio::test]
async fn download_by_id_maps_unknown_job_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/didimos/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let err = DownloadClient::silent(Arc::new(client_for(&server)))
        .download_by_id(&JobId::from("nope"), &[], dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, StatusError::NotFound { .. }));
}

#[tokio::test]
async fn download_job_refuses_format_names_that_leave_output_dir() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/evil.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"owned".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let snapshot = done_snapshot("job-1", vec![format(&server, "../../../escaped", "evil.zip")]);
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let result = DownloadClient::silent(Arc::new(client_for(&server)))
        .download_job(0, &snapshot, &[], &out)
        .await;

    assert!(result.download_error);
    assert_eq!(result.code.as_deref(), Some("unsafe_file_name"));
    assert!(result.artifacts.is_empty());
    assert!(!dir.path().join("escaped.zip").exists());
    assert!(!out.exists());
}

#[tokio::test]
async fn download_by_id_refuses_ids_with_separators() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/didimos/..%2Fup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "key": "../up",
            "status": "done",
            "status_message": "",
            "transfer_formats": [
                { "name": "maya", "__links": { "self": format!("{}/files/up.zip", server.uri()) } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let result = DownloadClient::silent(Arc::new(client_for(&server)))
        .download_by_id(&JobId::from("../up"), &[], &dir.path().join("out"))
        .await
        .unwrap();

    assert_eq!(result.code.as_deref(), Some("unsafe_file_name"));
    assert!(!dir.path().join("up_maya.zip").exists());
}

#[test]
fn plain_names_reject_separators_and_parent_references() {
    use super::download::plain_name;

    assert_eq!(plain_name("gltf").unwrap(), "gltf");
    assert_eq!(plain_name("a..b").unwrap(), "a..b");
    for name in ["", ".", "..", "../x", "a/b", "a\\b", "/abs"] {
        assert!(
            matches!(plain_name(name), Err(DownloadError::UnsafeFileName { .. })),
            "accepted {name:?}"
        );
    }
}

// ---- account, listing, on-demand features ----

fn listed(key: &str, status: &str) -> serde_json::Value {
    serde_json::json!({
        "key": key,
        "status": status,
        "percent": 100,
        "input_type": "photo",
        "created_at": "2021-03-04T10:00:00Z"
    })
}

#[tokio::test]
async fn list_follows_next_links_until_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/didimo/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [listed("d1", "done"), listed("d2", "processing")],
            "next": "/didimo/list/2",
            "total_list_size": 3
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/didimo/list/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [listed("d3", "weird")],
            "total_list_size": 3
        })))
        .expect(1)
        .mount(&server)
        .await;

    let list = client_for(&server).list_didimos(5).await.unwrap();

    assert_eq!(list.pages, 2);
    assert_eq!(list.total, Some(3));
    let keys: Vec<_> = list.didimos.iter().map(|d| d.key.as_str()).collect();
    assert_eq!(keys, vec!["d1", "d2", "d3"]);
    assert_eq!(list.didimos[1].status, JobStatus::Processing);
    assert_eq!(list.didimos[2].status, JobStatus::Unknown);
    assert_eq!(list.didimos[0].input_type.as_deref(), Some("photo"));
}

#[tokio::test]
async fn list_stops_at_requested_page_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/didimo/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [listed("d1", "done")],
            "next": "/didimo/list/2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/didimo/list/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "models": [] })))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let list = client.list_didimos(1).await.unwrap();
    assert_eq!(list.pages, 1);
    assert_eq!(list.didimos.len(), 1);

    let empty = client.list_didimos(0).await.unwrap();
    assert_eq!(empty.pages, 0);
    assert!(empty.didimos.is_empty());
}

#[tokio::test]
async fn account_combines_profile_and_listing_size() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/profile"))
        .and(header(API_KEY_HEADER, "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tier_label": "Trial",
            "points": 120,
            "available_features": ["oculus_lipsync"],
            "next_expiration_points": 20,
            "next_expiration_date": "2021-12-31"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/didimo/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [],
            "total_list_size": 42
        })))
        .expect(1)
        .mount(&server)
        .await;

    let account = client_for(&server).account().await.unwrap();

    assert_eq!(account.profile.tier_label, "Trial");
    assert_eq!(account.profile.points, serde_json::json!(120));
    assert_eq!(account.profile.next_expiration_date.as_deref(), Some("2021-12-31"));
    assert_eq!(account.total_didimos, Some(42));

    let rendered = serde_json::to_value(&account).unwrap();
    assert_eq!(rendered["tier_label"], "Trial");
    assert_eq!(rendered["total_didimos"], 42);
}

#[tokio::test]
async fn account_rejection_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/profile"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let err = client_for(&server).account().await.unwrap_err();
    match err {
        ServiceError::Http { path, status, body } => {
            assert_eq!(path, "/v2/profile");
            assert_eq!(status, 403);
            assert_eq!(body, "forbidden");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn blendshapes_encodes_the_didimo_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/didimo/a%20b/execute/blendshapes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "key": "bs-1",
            "status": "pending"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let job = client_for(&server)
        .execute_blendshapes(&JobId::from("a b"))
        .await
        .unwrap();

    assert_eq!(job.key, JobId::from("bs-1"));
    assert_eq!(job.extra.get("status"), Some(&serde_json::json!("pending")));
}

#[tokio::test]
async fn vertexdeform_posts_the_vertex_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/didimo/d1/execute/vertexdeform"))
        .and(body_string_contains("v 0.1 0.2 0.3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "key": "vd-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let vertex = dir.path().join("mesh.obj");
    std::fs::write(&vertex, b"v 0.1 0.2 0.3\n").unwrap();

    let job = client_for(&server)
        .execute_vertexdeform(&JobId::from("d1"), &vertex)
        .await
        .unwrap();
    assert_eq!(job.key, JobId::from("vd-1"));
}

#[tokio::test]
async fn vertexdeform_with_missing_file_never_reaches_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let err = client_for(&server)
        .execute_vertexdeform(&JobId::from("d1"), &dir.path().join("absent.obj"))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Io { .. }));
    assert_eq!(err.error_code(), "service_io_error");
}

#[test]
fn client_rejects_invalid_configuration() {
    let config = Config::new("ftp://api.example", "key");
    assert!(HttpClient::new(Arc::new(config)).is_err());

    let config = Config::new("https://api.example", "");
    assert!(HttpClient::new(Arc::new(config)).is_err());
}
