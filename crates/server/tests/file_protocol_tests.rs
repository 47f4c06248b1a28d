//! End-to-end tests of the file-attachment protocol against the router.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use carrel_blob::BlobStore;
use carrel_blob::memory::MemoryBlobStore;
use carrel_core::{encode_patch, md5_bytes};
use carrel_server::api::{AppState, router};
use carrel_server::config::CarrelConfig;
use carrel_state_memory::MemoryStateStore;

const VERSION_HEADER: &str = "Last-Modified-Version";

struct TestServer {
    app: Router,
    blobs: Arc<MemoryBlobStore>,
    base: String,
}

fn server_with(config: CarrelConfig) -> TestServer {
    let blobs = Arc::new(MemoryBlobStore::new());
    let base = config.server.public_url();
    let state = AppState {
        state: Arc::new(MemoryStateStore::new()),
        blobs: Arc::clone(&blobs) as Arc<dyn BlobStore>,
        config: Arc::new(config),
    };
    TestServer {
        app: router(state),
        blobs,
        base,
    }
}

fn server() -> TestServer {
    server_with(CarrelConfig::default())
}

impl TestServer {
    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Turn an absolute URL from a ticket or redirect into a router path.
    fn relative<'a>(&self, url: &'a str) -> &'a str {
        url.strip_prefix(&self.base).unwrap_or(url)
    }

    async fn create_item(&self, key: &str) {
        let response = self
            .send(
                Request::post("/items")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(format!("{{\"key\":\"{key}\"}}")))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    async fn authorize(
        &self,
        item_key: &str,
        form: &[(&str, &str)],
        precondition: Option<(&str, &str)>,
    ) -> axum::response::Response {
        let body = serde_urlencoded::to_string(form).unwrap();
        let mut request = Request::post(format!("/items/{item_key}/file"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some((name, value)) = precondition {
            request = request.header(name, value);
        }
        self.send(request.body(Body::from(body)).unwrap()).await
    }

    async fn authorize_bytes(
        &self,
        item_key: &str,
        data: &[u8],
        filename: &str,
        precondition: Option<(&str, &str)>,
    ) -> axum::response::Response {
        let md5 = md5_bytes(data);
        let size = data.len().to_string();
        self.authorize(
            item_key,
            &[
                ("md5", md5.as_str()),
                ("filename", filename),
                ("filesize", size.as_str()),
                ("mtime", "1700000000000"),
                ("contentType", "text/plain"),
            ],
            precondition,
        )
        .await
    }

    async fn transfer_put(&self, ticket: &serde_json::Value, data: &[u8]) {
        let url = ticket["url"].as_str().unwrap();
        let response = self
            .send(
                Request::put(self.relative(url))
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from(data.to_vec()))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    async fn register(
        &self,
        item_key: &str,
        upload_key: &str,
        precondition: Option<(&str, &str)>,
    ) -> axum::response::Response {
        self.authorize(item_key, &[("upload", upload_key)], precondition)
            .await
    }

    /// Authorize, transfer, and register in one go.
    async fn upload(&self, item_key: &str, data: &[u8], filename: &str) -> u64 {
        let response = self
            .authorize_bytes(item_key, data, filename, Some(("If-None-Match", "*")))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let ticket = body_json(response).await;
        self.transfer_put(&ticket, data).await;

        let response = self
            .register(
                item_key,
                ticket["uploadKey"].as_str().unwrap(),
                Some(("If-None-Match", "*")),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        header_u64(&response, VERSION_HEADER)
    }

    async fn download(&self, item_key: &str, view: bool) -> axum::response::Response {
        let suffix = if view { "/view" } else { "" };
        self.send(
            Request::get(format!("/items/{item_key}/file{suffix}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Follow a 302 from the download endpoint and return the served bytes.
    async fn fetch_redirect(&self, response: axum::response::Response) -> (Bytes, String) {
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .to_owned();
        let served = self
            .send(
                Request::get(self.relative(&location))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(served.status(), StatusCode::OK);
        let content_type = served.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .to_owned();
        (body_bytes(served).await, content_type)
    }
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_u64(response: &axum::response::Response, name: &str) -> u64 {
    response.headers()[name].to_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn full_upload_roundtrip_preserves_content() {
    let server = server();
    server.create_item("AAAA1111").await;

    let data = b"the quick brown fox jumps over the lazy dog";
    let version = server.upload("AAAA1111", data, "fox.txt").await;
    assert!(version > 1);

    let (bytes, content_type) = server
        .fetch_redirect(server.download("AAAA1111", false).await)
        .await;
    assert_eq!(&bytes[..], data);
    assert_eq!(md5_bytes(&bytes), md5_bytes(data));
    assert_eq!(content_type, "text/plain");
}

#[tokio::test]
async fn second_authorization_reports_exists() {
    let server = server();
    server.create_item("AAAA1111").await;
    server.create_item("BBBB2222").await;

    let data = b"shared content";
    server.upload("AAAA1111", data, "a.txt").await;

    let response = server
        .authorize_bytes("BBBB2222", data, "a.txt", Some(("If-None-Match", "*")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let version = header_u64(&response, VERSION_HEADER);
    assert!(version > 1);
    assert_eq!(body_json(response).await["exists"], 1);

    // The second item can serve the deduplicated blob without a transfer.
    let (bytes, _) = server
        .fetch_redirect(server.download("BBBB2222", false).await)
        .await;
    assert_eq!(&bytes[..], data);
}

#[tokio::test]
async fn download_is_idempotent_and_view_carries_filename() {
    let server = server();
    server.create_item("AAAA1111").await;
    let data = b"view me";
    server.upload("AAAA1111", data, "notes.txt").await;

    let (first, _) = server
        .fetch_redirect(server.download("AAAA1111", false).await)
        .await;
    let (second, _) = server
        .fetch_redirect(server.download("AAAA1111", false).await)
        .await;
    assert_eq!(first, second);

    let view = server.download("AAAA1111", true).await;
    assert_eq!(view.status(), StatusCode::FOUND);
    let location = view.headers()[header::LOCATION].to_str().unwrap().to_owned();
    assert!(location.contains("/notes.txt?"), "got {location}");

    let (bytes, _) = server.fetch_redirect(server.download("AAAA1111", true).await).await;
    assert_eq!(&bytes[..], data);
}

#[tokio::test]
async fn authorization_requires_every_descriptor_field() {
    let server = server();
    server.create_item("AAAA1111").await;

    let md5 = md5_bytes(b"data");
    let all = [
        ("md5", md5.as_str()),
        ("filename", "a.txt"),
        ("filesize", "4"),
        ("mtime", "1700000000000"),
    ];
    for missing in 0..all.len() {
        let form: Vec<(&str, &str)> = all
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != missing)
            .map(|(_, pair)| *pair)
            .collect();
        let response = server
            .authorize("AAAA1111", &form, Some(("If-None-Match", "*")))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        let expected = format!("{} not provided", all[missing].0);
        assert_eq!(body["error"], expected.as_str());
    }
}

#[tokio::test]
async fn exists_requires_matching_size() {
    let server = server();
    server.create_item("AAAA1111").await;

    let data = b"12345";
    let md5 = md5_bytes(data);
    server.blobs.seed(&md5, data, "text/plain");

    // Same digest but a different declared size is not the same blob: the
    // server falls through to issuing a ticket instead of reporting an
    // exists hit.
    let response = server
        .authorize(
            "AAAA1111",
            &[
                ("md5", md5.as_str()),
                ("filename", "a.txt"),
                ("filesize", "999999"),
                ("mtime", "1700000000000"),
            ],
            Some(("If-None-Match", "*")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body.get("exists").is_none(), "got {body}");
    assert!(body["uploadKey"].is_string());

    // With the matching size the stored blob satisfies the check.
    let response = server
        .authorize_bytes("AAAA1111", data, "a.txt", Some(("If-None-Match", "*")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["exists"], 1);
}

#[tokio::test]
async fn mutations_require_a_precondition() {
    let server = server();
    server.create_item("AAAA1111").await;

    let response = server
        .authorize_bytes("AAAA1111", b"data", "a.txt", None)
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_REQUIRED);
}

#[tokio::test]
async fn stale_preconditions_fail_with_412() {
    let server = server();
    server.create_item("AAAA1111").await;
    server.upload("AAAA1111", b"version one", "a.txt").await;

    // The item now has a file, so asserting absence fails.
    let response = server
        .authorize_bytes("AAAA1111", b"version two", "a.txt", Some(("If-None-Match", "*")))
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert!(!response.headers().contains_key(VERSION_HEADER));

    // As does asserting the wrong current digest.
    let response = server
        .authorize_bytes(
            "AAAA1111",
            b"version two",
            "a.txt",
            Some(("If-Match", "00000000000000000000000000000000")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    // The right digest passes.
    let current = md5_bytes(b"version one");
    let response = server
        .authorize_bytes("AAAA1111", b"version two", "a.txt", Some(("If-Match", &current)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn quota_rejection_carries_structured_headers() {
    let mut config = CarrelConfig::default();
    config.quota.default_ceiling_bytes = 10;
    let server = server_with(config);
    server.create_item("AAAA1111").await;

    let response = server
        .authorize_bytes(
            "AAAA1111",
            b"way more than ten bytes of content",
            "big.txt",
            Some(("If-None-Match", "*")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.headers()["X-Storage-Quota"], "1");
    assert_eq!(response.headers()["X-Storage-UserID"], "local");

    // The failed reservation was rolled back; a fitting upload still works.
    server.upload("AAAA1111", b"tiny", "small.txt").await;
}

#[tokio::test]
async fn group_library_charges_the_group_owner() {
    let mut config = CarrelConfig::default();
    config
        .library_owners
        .insert("group-7".to_owned(), "owner-a".to_owned());
    config.quota.owner_ceilings.insert("owner-a".to_owned(), 5);
    let server = server_with(config);

    let response = server
        .send(
            Request::post("/items?library=group-7")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"key\":\"GGGG7777\"}"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let data = b"exceeds the five byte group ceiling";
    let md5 = md5_bytes(data);
    let size = data.len().to_string();
    let body = serde_urlencoded::to_string([
        ("md5", md5.as_str()),
        ("filename", "g.txt"),
        ("filesize", size.as_str()),
        ("mtime", "1700000000000"),
    ])
    .unwrap();
    let response = server
        .send(
            Request::post("/items/GGGG7777/file?library=group-7")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header("If-None-Match", "*")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.headers()["X-Storage-UserID"], "owner-a");
}

#[tokio::test]
async fn reservations_block_joint_oversubscription() {
    let mut config = CarrelConfig::default();
    config.quota.default_ceiling_bytes = 100;
    let server = server_with(config);
    server.create_item("AAAA1111").await;
    server.create_item("BBBB2222").await;

    let first = vec![b'a'; 60];
    let second = vec![b'b'; 60];

    // The first authorization reserves its bytes even though nothing has
    // been transferred yet.
    let response = server
        .authorize_bytes("AAAA1111", &first, "a.bin", Some(("If-None-Match", "*")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // 60 reserved + 60 requested > 100: the second must not pass.
    let response = server
        .authorize_bytes("BBBB2222", &second, "b.bin", Some(("If-None-Match", "*")))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn legacy_layout_blobs_satisfy_existence_and_migrate() {
    let server = server();
    server.create_item("AAAA1111").await;

    let data = b"legacy content";
    let md5 = md5_bytes(data);
    // Blob stored by an older client generation under {hash}/{filename}.
    server
        .blobs
        .seed(&format!("{md5}/old-name.txt"), data, "text/plain");

    // Authorizing the same content under a new filename finds the legacy
    // blob and reports exists without a transfer.
    let response = server
        .authorize_bytes("AAAA1111", data, "new-name.txt", Some(("If-None-Match", "*")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["exists"], 1);

    // The mismatched filename triggered a copy to the canonical key.
    use carrel_blob::store::BlobStore;
    assert!(server.blobs.head(&md5).await.unwrap().is_some());

    let (bytes, _) = server
        .fetch_redirect(server.download("AAAA1111", false).await)
        .await;
    assert_eq!(&bytes[..], data);
}

#[tokio::test]
async fn legacy_download_redirects_to_legacy_path() {
    let server = server();
    server.create_item("AAAA1111").await;

    let data = b"legacy content";
    let md5 = md5_bytes(data);
    server
        .blobs
        .seed(&format!("{md5}/old-name.txt"), data, "text/plain");

    // Same filename: no migration, the blob stays only under the legacy key.
    let response = server
        .authorize_bytes("AAAA1111", data, "old-name.txt", Some(("If-None-Match", "*")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let download = server.download("AAAA1111", false).await;
    assert_eq!(download.status(), StatusCode::FOUND);
    let location = download.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_owned();
    assert!(location.contains(&format!("{md5}/old-name.txt")), "got {location}");
    let (bytes, _) = server.fetch_redirect(download).await;
    assert_eq!(&bytes[..], data);
}

#[tokio::test]
async fn metadata_change_dissociates_the_stored_file() {
    let server = server();
    server.create_item("AAAA1111").await;
    server.upload("AAAA1111", b"original", "a.txt").await;

    let response = server
        .send(
            Request::patch("/items/AAAA1111")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    "{\"md5\":\"00000000000000000000000000000000\"}",
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["file"].is_null());

    let response = server.download("AAAA1111", false).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_key_is_single_use() {
    let server = server();
    server.create_item("AAAA1111").await;

    let data = b"single use";
    let response = server
        .authorize_bytes("AAAA1111", data, "a.txt", Some(("If-None-Match", "*")))
        .await;
    let ticket = body_json(response).await;
    let upload_key = ticket["uploadKey"].as_str().unwrap().to_owned();
    server.transfer_put(&ticket, data).await;

    let first = server
        .register("AAAA1111", &upload_key, Some(("If-None-Match", "*")))
        .await;
    assert_eq!(first.status(), StatusCode::NO_CONTENT);

    let md5 = md5_bytes(data);
    let second = server
        .register("AAAA1111", &upload_key, Some(("If-Match", &md5)))
        .await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn registration_reapplies_conditional_rules() {
    let server = server();
    server.create_item("AAAA1111").await;

    let data = b"conditional registration";
    let response = server
        .authorize_bytes("AAAA1111", data, "a.txt", Some(("If-None-Match", "*")))
        .await;
    let ticket = body_json(response).await;
    let upload_key = ticket["uploadKey"].as_str().unwrap().to_owned();
    server.transfer_put(&ticket, data).await;

    // No conditional header on the registration: 428, and the ticket is
    // not consumed.
    let response = server.register("AAAA1111", &upload_key, None).await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_REQUIRED);

    // A stale If-Match: 412 without a version header, ticket still intact.
    let response = server
        .register(
            "AAAA1111",
            &upload_key,
            Some(("If-Match", "00000000000000000000000000000000")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert!(!response.headers().contains_key(VERSION_HEADER));

    // The surviving ticket registers once the assertion holds.
    let response = server
        .register("AAAA1111", &upload_key, Some(("If-None-Match", "*")))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn registration_without_a_transfer_is_rejected() {
    let server = server();
    server.create_item("AAAA1111").await;

    let response = server
        .authorize_bytes("AAAA1111", b"never sent", "a.txt", Some(("If-None-Match", "*")))
        .await;
    let ticket = body_json(response).await;

    let response = server
        .register(
            "AAAA1111",
            ticket["uploadKey"].as_str().unwrap(),
            Some(("If-None-Match", "*")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn corrupted_transfer_is_rejected_by_the_store() {
    let server = server();
    server.create_item("AAAA1111").await;

    let data = b"the declared content";
    let response = server
        .authorize_bytes("AAAA1111", data, "a.txt", Some(("If-None-Match", "*")))
        .await;
    let ticket = body_json(response).await;

    // Bytes that do not match the declared digest never reach the store.
    let response = server
        .send(
            Request::put(server.relative(ticket["url"].as_str().unwrap()))
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from(b"something else entirely!".to_vec()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server
        .register(
            "AAAA1111",
            ticket["uploadKey"].as_str().unwrap(),
            Some(("If-None-Match", "*")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn transfer_digest_header_must_match_the_ticket() {
    let server = server();
    server.create_item("AAAA1111").await;

    let data = b"header checked content";
    let response = server
        .authorize_bytes("AAAA1111", data, "a.txt", Some(("If-None-Match", "*")))
        .await;
    let ticket = body_json(response).await;
    let url = ticket["url"].as_str().unwrap();

    let response = server
        .send(
            Request::put(server.relative(url))
                .header(header::CONTENT_TYPE, "text/plain")
                .header("Content-MD5", "00000000000000000000000000000000")
                .body(Body::from(data.to_vec()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server
        .send(
            Request::put(server.relative(url))
                .header(header::CONTENT_TYPE, "text/plain")
                .header("Content-MD5", md5_bytes(data))
                .body(Body::from(data.to_vec()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn sandwich_ticket_builds_a_valid_store_transfer() {
    let server = server();
    server.create_item("AAAA1111").await;

    let data = b"sandwich mode payload";
    let response = server
        .authorize_bytes("AAAA1111", data, "a.txt", Some(("If-None-Match", "*")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ticket = body_json(response).await;

    // Default mode is sandwich: assemble prefix + content + suffix and POST
    // it with the prescribed content type.
    use base64::Engine as _;
    let prefix = base64::engine::general_purpose::STANDARD
        .decode(ticket["prefix"].as_str().unwrap())
        .unwrap();
    let suffix = base64::engine::general_purpose::STANDARD
        .decode(ticket["suffix"].as_str().unwrap())
        .unwrap();
    let mut body = prefix;
    body.extend_from_slice(data);
    body.extend_from_slice(&suffix);

    let response = server
        .send(
            Request::post(server.relative(ticket["url"].as_str().unwrap()))
                .header(header::CONTENT_TYPE, ticket["contentType"].as_str().unwrap())
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server
        .register(
            "AAAA1111",
            ticket["uploadKey"].as_str().unwrap(),
            Some(("If-None-Match", "*")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn form_params_ticket_lists_required_fields() {
    let server = server();
    server.create_item("AAAA1111").await;

    let data = b"params mode payload";
    let md5 = md5_bytes(data);
    let size = data.len().to_string();
    let response = server
        .authorize(
            "AAAA1111",
            &[
                ("md5", md5.as_str()),
                ("filename", "a.txt"),
                ("filesize", size.as_str()),
                ("mtime", "1700000000000"),
                ("params", "1"),
            ],
            Some(("If-None-Match", "*")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ticket = body_json(response).await;
    let params = ticket["params"].as_object().unwrap();
    assert_eq!(params["md5"], md5.as_str());
    assert_eq!(params["key"], md5.as_str());
    assert_eq!(ticket["contentType"], "multipart/form-data");
}

#[tokio::test]
async fn bxdiff_patch_reconstructs_the_target() {
    let server = server();
    server.create_item("AAAA1111").await;

    let base = b"The quick brown fox jumps over the lazy dog.".to_vec();
    server.upload("AAAA1111", &base, "fable.txt").await;

    let target = b"The quick brown cat naps right over the lazy dog.".to_vec();
    let base_md5 = md5_bytes(&base);
    let target_md5 = md5_bytes(&target);

    let response = server
        .authorize_bytes("AAAA1111", &target, "fable.txt", Some(("If-Match", &base_md5)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ticket = body_json(response).await;
    let upload_key = ticket["uploadKey"].as_str().unwrap();

    let patch = encode_patch(&base, &target);
    assert!(patch.len() < target.len() + 16);
    let response = server
        .send(
            Request::post(format!(
                "/items/AAAA1111/file?algorithm=bxdiff&upload={upload_key}"
            ))
            .header("If-Match", &base_md5)
            .body(Body::from(patch))
            .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (bytes, _) = server
        .fetch_redirect(server.download("AAAA1111", false).await)
        .await;
    assert_eq!(&bytes[..], &target[..]);
    assert_eq!(md5_bytes(&bytes), target_md5);
}

#[tokio::test]
async fn corrupt_patch_does_not_commit() {
    let server = server();
    server.create_item("AAAA1111").await;

    let base = b"base content for patching".to_vec();
    server.upload("AAAA1111", &base, "a.txt").await;
    let base_md5 = md5_bytes(&base);

    let target = b"patched content".to_vec();
    let response = server
        .authorize_bytes("AAAA1111", &target, "a.txt", Some(("If-Match", &base_md5)))
        .await;
    let ticket = body_json(response).await;
    let upload_key = ticket["uploadKey"].as_str().unwrap();

    let response = server
        .send(
            Request::post(format!(
                "/items/AAAA1111/file?algorithm=bxdiff&upload={upload_key}"
            ))
            .header("If-Match", &base_md5)
            .body(Body::from(b"not a patch stream".to_vec()))
            .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The original content is untouched.
    let (bytes, _) = server
        .fetch_redirect(server.download("AAAA1111", false).await)
        .await;
    assert_eq!(&bytes[..], &base[..]);
}

#[tokio::test]
async fn linked_attachments_reject_file_operations() {
    let server = server();
    let response = server
        .send(
            Request::post("/items")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"key\":\"LLLL4444\",\"kind\":\"linked\"}"))
                .unwrap(),
            )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server
        .authorize_bytes("LLLL4444", b"data", "a.txt", Some(("If-None-Match", "*")))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn zip_attachments_store_and_serve_the_container() {
    let server = server();
    server.create_item("ZZZZ9999").await;

    let logical = b"<html>snapshotted page</html>".to_vec();
    let container = b"PK\x03\x04 pretend zip bytes".to_vec();
    let logical_md5 = md5_bytes(&logical);
    let container_md5 = md5_bytes(&container);
    let logical_size = logical.len().to_string();
    let container_size = container.len().to_string();

    let response = server
        .authorize(
            "ZZZZ9999",
            &[
                ("md5", logical_md5.as_str()),
                ("filename", "page.html"),
                ("filesize", logical_size.as_str()),
                ("mtime", "1700000000000"),
                ("contentType", "text/html"),
                ("zip", "1"),
                ("zipMD5", container_md5.as_str()),
                ("zipFilename", "page.zip"),
                ("zipFilesize", container_size.as_str()),
            ],
            Some(("If-None-Match", "*")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ticket = body_json(response).await;

    // The transfer carries the container, not the logical file.
    let url = ticket["url"].as_str().unwrap();
    assert!(url.contains(&format!("md5={container_md5}")));
    let response = server
        .send(
            Request::put(server.relative(url))
                .header(header::CONTENT_TYPE, "application/zip")
                .body(Body::from(container.clone()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server
        .register(
            "ZZZZ9999",
            ticket["uploadKey"].as_str().unwrap(),
            Some(("If-None-Match", "*")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (bytes, content_type) = server
        .fetch_redirect(server.download("ZZZZ9999", false).await)
        .await;
    assert_eq!(&bytes[..], &container[..]);
    assert_eq!(content_type, "application/zip");
}

#[tokio::test]
async fn expired_redirects_stop_working() {
    let server = server();
    server.create_item("AAAA1111").await;
    let data = b"short lived";
    server.upload("AAAA1111", data, "a.txt").await;
    let md5 = md5_bytes(data);

    let response = server
        .send(
            Request::get(format!("/store/{md5}?expires=1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
