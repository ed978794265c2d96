//! Test support: a stateful fake registry and local image fixtures.

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image_pusher::config::Config;
use image_pusher::digest::DigestUtils;
use image_pusher::image::{Descriptor, ImageRecord, LayerRecord, LocalImageStore, MediaType};
use image_pusher::image::store::IMAGE_INDEX_FILE;
use image_pusher::worker::{CONTENT_DIR, LocalContentStore, LocalWorker, NativeSnapshotter};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("image_pusher=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

const TOKEN: &str = "fake-registry-token";

#[derive(Default)]
struct State {
    blobs: HashMap<String, Vec<u8>>,
    manifests: HashMap<String, Vec<u8>>,
    next_session: usize,
    blob_puts: usize,
    manifest_puts: usize,
    failing_manifest_puts: usize,
    upload_delay: Option<Duration>,
    upload_started: Vec<Instant>,
    /// `(username, password)` the token endpoint accepts
    bearer_credentials: Option<(String, String)>,
    token_requests: usize,
    unauthorized_requests: usize,
    /// Bumped whenever issued tokens are revoked
    token_generation: usize,
    expire_token_on_upload: bool,
    realm: String,
}

impl State {
    fn token(&self) -> String {
        format!("{}-{}", TOKEN, self.token_generation)
    }
}

/// In-memory registry speaking enough of the distribution API for pushes.
#[derive(Clone, Default)]
pub struct FakeRegistry {
    state: Arc<Mutex<State>>,
}

impl FakeRegistry {
    pub async fn start() -> (MockServer, FakeRegistry) {
        let server = MockServer::start().await;
        let registry = FakeRegistry::default();
        registry.state.lock().unwrap().realm = format!("{}/token", server.uri());
        Mock::given(any())
            .respond_with(registry.clone())
            .mount(&server)
            .await;
        (server, registry)
    }

    /// Require bearer tokens, issued only for these credentials.
    pub fn require_token(&self, username: &str, password: &str) {
        self.state.lock().unwrap().bearer_credentials =
            Some((username.to_string(), password.to_string()));
    }

    /// Reject the next `n` manifest uploads with a 500.
    pub fn fail_manifest_puts(&self, n: usize) {
        self.state.lock().unwrap().failing_manifest_puts = n;
    }

    /// Revoke the current token when the next upload session is opened, so
    /// that request is answered with a fresh challenge.
    pub fn expire_token_on_upload(&self) {
        self.state.lock().unwrap().expire_token_on_upload = true;
    }

    pub fn delay_uploads(&self, delay: Duration) {
        self.state.lock().unwrap().upload_delay = Some(delay);
    }

    /// Highest number of blob PUTs whose (delayed) responses overlapped.
    pub fn max_uploads_in_flight(&self) -> usize {
        let state = self.state.lock().unwrap();
        let delay = state.upload_delay.unwrap_or_default();
        state
            .upload_started
            .iter()
            .map(|&start| {
                state
                    .upload_started
                    .iter()
                    .filter(|&&other| other <= start && start < other + delay)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    pub fn blob_puts(&self) -> usize {
        self.state.lock().unwrap().blob_puts
    }

    pub fn manifest_puts(&self) -> usize {
        self.state.lock().unwrap().manifest_puts
    }

    pub fn token_requests(&self) -> usize {
        self.state.lock().unwrap().token_requests
    }

    pub fn unauthorized_requests(&self) -> usize {
        self.state.lock().unwrap().unauthorized_requests
    }

    pub fn blob_count(&self) -> usize {
        self.state.lock().unwrap().blobs.len()
    }

    pub fn has_blob(&self, digest: &str) -> bool {
        self.state.lock().unwrap().blobs.contains_key(digest)
    }

    /// Manifest stored under `reference` (a tag or a digest)
    pub fn manifest(&self, reference: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().manifests.get(reference).cloned()
    }

    pub fn manifest_count(&self) -> usize {
        self.state.lock().unwrap().manifests.len()
    }

    fn authorized(state: &State, request: &Request) -> bool {
        if state.bearer_credentials.is_none() {
            return true;
        }
        request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {}", state.token()))
    }

    fn challenge(state: &mut State) -> ResponseTemplate {
        state.unauthorized_requests += 1;
        ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            format!(r#"Bearer realm="{}",service="fake-registry""#, state.realm).as_str(),
        )
    }

    fn token(state: &mut State, request: &Request) -> ResponseTemplate {
        state.token_requests += 1;
        let Some((username, password)) = &state.bearer_credentials else {
            return ResponseTemplate::new(404);
        };
        let expected = format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", username, password))
        );
        let presented = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            return ResponseTemplate::new(401);
        }
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": state.token() }))
    }

    fn put_manifest(state: &mut State, reference: &str, body: &[u8]) -> ResponseTemplate {
        state.manifest_puts += 1;
        if state.failing_manifest_puts > 0 {
            state.failing_manifest_puts -= 1;
            return ResponseTemplate::new(500).set_body_string("injected failure");
        }

        let Ok(manifest) = serde_json::from_slice::<serde_json::Value>(body) else {
            return ResponseTemplate::new(400).set_body_string("MANIFEST_INVALID");
        };
        let referenced = std::iter::once(&manifest["config"])
            .chain(manifest["layers"].as_array().into_iter().flatten())
            .filter_map(|d| d["digest"].as_str());
        for digest in referenced {
            if !state.blobs.contains_key(digest) {
                return ResponseTemplate::new(400).set_body_string("MANIFEST_BLOB_UNKNOWN");
            }
        }

        let digest = DigestUtils::compute_docker_digest(body);
        state.manifests.insert(reference.to_string(), body.to_vec());
        state.manifests.insert(digest.clone(), body.to_vec());
        ResponseTemplate::new(201).insert_header("Docker-Content-Digest", digest.as_str())
    }
}

impl Respond for FakeRegistry {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();
        let path = request.url.path().to_string();
        let method = request.method.as_str();

        if path == "/token" {
            return Self::token(&mut state, request);
        }
        if !Self::authorized(&state, request) {
            return Self::challenge(&mut state);
        }
        if path == "/v2/" {
            return ResponseTemplate::new(200);
        }
        let Some(rest) = path.strip_prefix("/v2/") else {
            return ResponseTemplate::new(404);
        };

        if let Some((repo, session)) = rest.split_once("/blobs/uploads/") {
            return match (method, session) {
                ("POST", "") if state.expire_token_on_upload => {
                    state.expire_token_on_upload = false;
                    state.token_generation += 1;
                    Self::challenge(&mut state)
                }
                ("POST", "") => {
                    state.next_session += 1;
                    let location = format!("/v2/{}/blobs/uploads/{}", repo, state.next_session);
                    ResponseTemplate::new(202).insert_header("Location", location.as_str())
                }
                ("PUT", _) => {
                    let Some(digest) = request
                        .url
                        .query_pairs()
                        .find(|(k, _)| k == "digest")
                        .map(|(_, v)| v.into_owned())
                    else {
                        return ResponseTemplate::new(400).set_body_string("DIGEST_INVALID");
                    };
                    if DigestUtils::compute_docker_digest(&request.body) != digest {
                        return ResponseTemplate::new(400).set_body_string("DIGEST_INVALID");
                    }
                    state.blob_puts += 1;
                    state.upload_started.push(Instant::now());
                    state.blobs.insert(digest.clone(), request.body.clone());
                    let response = ResponseTemplate::new(201)
                        .insert_header("Docker-Content-Digest", digest.as_str());
                    match state.upload_delay {
                        Some(delay) => response.set_delay(delay),
                        None => response,
                    }
                }
                _ => ResponseTemplate::new(405),
            };
        }

        if let Some((_, digest)) = rest.rsplit_once("/blobs/") {
            return match (method, state.blobs.get(digest)) {
                ("HEAD", Some(_)) => ResponseTemplate::new(200),
                ("GET", Some(blob)) => ResponseTemplate::new(200).set_body_bytes(blob.clone()),
                _ => ResponseTemplate::new(404),
            };
        }

        if let Some((_, reference)) = rest.rsplit_once("/manifests/") {
            return match method {
                "PUT" => Self::put_manifest(&mut state, reference, &request.body),
                "GET" | "HEAD" => match state.manifests.get(reference) {
                    Some(body) => ResponseTemplate::new(200).set_body_bytes(body.clone()),
                    None => ResponseTemplate::new(404),
                },
                _ => ResponseTemplate::new(405),
            };
        }

        ResponseTemplate::new(404)
    }
}

/// State of the committed base layer blob in [`LocalImage::with_stored_base`]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum StoredLayer {
    Intact,
    /// Same size as recorded, different bytes
    Corrupted,
}

/// Local worker root holding one image built from snapshot trees.
pub struct LocalImage {
    pub root: tempfile::TempDir,
    pub name: String,
    pub record: ImageRecord,
}

impl LocalImage {
    /// Two-layer image named `name` under a fresh worker root.
    pub fn create(name: &str) -> Self {
        Self::build(name, None).0
    }

    /// Like [`LocalImage::create`], but the base layer already has a
    /// committed blob in the content store. Returns the blob digest.
    pub fn with_stored_base(name: &str, layer: StoredLayer) -> (Self, String) {
        let (image, digest) = Self::build(name, Some(layer));
        (image, digest.unwrap())
    }

    fn build(name: &str, stored: Option<StoredLayer>) -> (Self, Option<String>) {
        let root = tempfile::tempdir().unwrap();
        let worker = LocalWorker::new(root.path(), "native");
        let content = LocalContentStore::open(&root.path().join(CONTENT_DIR)).unwrap();
        let snapshots = NativeSnapshotter::open(&worker.snapshot_root()).unwrap();

        let base = snapshots.prepare("base", None).unwrap();
        write_file(&base, "etc/os-release", "ID=fake\n");
        write_file(&base, "bin/sh", "#!fake\n");

        let app = snapshots.prepare("app", Some("base")).unwrap();
        write_file(&app, "etc/os-release", "ID=fake\n");
        write_file(&app, "bin/sh", "#!fake\n");
        write_file(&app, "app/main", &"x".repeat(4096));

        let config = br#"{"architecture":"amd64","os":"linux","config":{"Cmd":["/app/main"]}}"#;
        let config_digest = content.write(config).unwrap();

        let mut base_layer = LayerRecord {
            snapshot: "base".to_string(),
            blob: None,
            diff_id: None,
        };
        let stored_digest = stored.map(|state| {
            let blob = "stored base layer ".repeat(64).into_bytes();
            let digest = content.write(&blob).unwrap();
            if state == StoredLayer::Corrupted {
                std::fs::write(content.blob_path(&digest).unwrap(), vec![b'?'; blob.len()])
                    .unwrap();
            }
            base_layer.blob = Some(Descriptor::new(
                MediaType::OCI_LAYER_GZIP,
                digest.clone(),
                blob.len() as u64,
            ));
            base_layer.diff_id = Some(DigestUtils::compute_docker_digest(b"stored base diff"));
            digest
        });

        let record = ImageRecord {
            name: name.to_string(),
            config: Descriptor::new(MediaType::OCI_CONFIG, config_digest, config.len() as u64),
            layers: vec![
                base_layer,
                LayerRecord {
                    snapshot: "app".to_string(),
                    blob: None,
                    diff_id: None,
                },
            ],
        };
        let mut images = LocalImageStore::open(&root.path().join(IMAGE_INDEX_FILE)).unwrap();
        images.put(record.clone()).unwrap();

        let image = Self {
            root,
            name: name.to_string(),
            record,
        };
        (image, stored_digest)
    }

    /// Record the same image under another name.
    pub fn alias(&self, name: &str) {
        let mut images =
            LocalImageStore::open(&self.root.path().join(IMAGE_INDEX_FILE)).unwrap();
        images
            .put(ImageRecord {
                name: name.to_string(),
                ..self.record.clone()
            })
            .unwrap();
    }

    pub fn config(&self) -> Config {
        Config::new(self.root.path()).with_docker_config(None)
    }
}

fn write_file(root: &Path, path: &str, contents: &str) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, contents).unwrap();
}
