//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use httpmock::MockServer;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use tubecache_core::config::{
    AdminConfig, AppConfig, CacheConfig, MetadataConfig, ServerConfig, StorageConfig,
    UpstreamConfig,
};
use tubecache_metadata::models::ApiKeyRow;
use tubecache_metadata::repos::KeyRepo;
use tubecache_metadata::{MetadataStore, SqliteStore};
use tubecache_server::bootstrap::ensure_bootstrap_key;
use tubecache_server::extractor::HttpExtractor;
use tubecache_server::{AppState, Resolver, create_router};
use tubecache_storage::{FilesystemBackend, ObjectStore};

/// Bootstrap admin key installed by `AdminConfig::for_testing`.
#[allow(dead_code)]
pub const BOOTSTRAP_KEY: &str = "test-bootstrap-admin-key";

/// A test server wrapper with all dependencies, including a mock upstream
/// extractor API.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub upstream: MockServer,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    ///
    /// Blob write-through is disabled by default so mock hit counts stay
    /// deterministic; tests that exercise the durable tier re-enable it
    /// via [`TestServer::with_config`].
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let upstream = MockServer::start_async().await;

        // Create storage
        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        // Create metadata
        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig {
            server: ServerConfig::default(),
            storage: StorageConfig::Filesystem {
                path: storage_path.clone(),
            },
            metadata: MetadataConfig::Sqlite { path: db_path },
            upstream: UpstreamConfig {
                base_url: upstream.base_url(),
                timeout_secs: 5,
                max_retries: 2,
            },
            admin: AdminConfig::for_testing(),
            cache: CacheConfig {
                source_ttl_secs: 3600,
                blob_writethrough: false,
            },
        };

        // Apply user modifications
        modifier(&mut config);

        ensure_bootstrap_key(metadata.as_ref(), &config.admin)
            .await
            .expect("Failed to install bootstrap key");

        let extractor =
            Arc::new(HttpExtractor::new(&config.upstream).expect("Failed to build extractor"));
        let resolver = Arc::new(Resolver::new(
            metadata.clone(),
            storage.clone(),
            extractor,
            &config.cache,
            config.upstream.max_retries,
        ));

        let state = AppState::new(config, storage, metadata, resolver);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            upstream,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Insert an API key row directly, bypassing the admin endpoint.
    pub async fn insert_key(&self, api_key: &str, role: &str, daily_limit: i64) {
        self.insert_key_row(api_key, role, daily_limit, None).await;
    }

    /// Insert an API key row with an expiry timestamp.
    pub async fn insert_key_row(
        &self,
        api_key: &str,
        role: &str,
        daily_limit: i64,
        expires_at: Option<OffsetDateTime>,
    ) {
        let now = OffsetDateTime::now_utc();
        let row = ApiKeyRow {
            api_key: api_key.to_string(),
            owner: "Test".to_string(),
            role: role.to_string(),
            daily_limit,
            usage_count: 0,
            window_start: now,
            total_requests: 0,
            created_at: now,
            expires_at,
            created_by: None,
            is_bootstrap: false,
        };
        self.metadata()
            .create_key(&row)
            .await
            .expect("Failed to insert api key");
    }
}

/// Build a successful upstream extraction envelope pointing at `media_url`.
#[allow(dead_code)]
pub fn extraction_envelope(video_id: &str, title: &str, media_url: &str) -> Value {
    json!({
        "status": true,
        "result": {
            "id": video_id,
            "title": title,
            "duration": "3:33",
            "channel": "Test Channel",
            "views": 1234,
            "thumbnail": format!("https://i.example.com/{video_id}.jpg"),
            "url": media_url,
        }
    })
}

/// Helper to make JSON requests with optional headers.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let response = raw_request(router, method, uri, body, headers).await;

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Helper returning the raw response, for non-JSON bodies.
#[allow(dead_code)]
pub async fn raw_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> axum::response::Response {
    let mut builder = Request::builder().method(method).uri(uri);

    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    router.clone().oneshot(request).await.unwrap()
}
