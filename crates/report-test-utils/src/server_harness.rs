//! Test server harness for E2E testing
//!
//! Builds an [`AppContext`] pointed at a [`MockKeySource`] and serves the
//! real router on a random local port.

use crate::memory_stores::RecordingObjectStore;
use crate::token_builders::TEST_PROJECT_ID;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use report_service::config::Config;
use report_service::context::AppContext;
use report_service::observability::metrics::init_metrics_recorder;
use report_service::repositories::IdentityStore;
use report_service::routes::build_app;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide metrics handle. The global recorder can only be installed
/// once, so later callers share it.
pub fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Configuration for a test service whose keys come from `key_source_url`.
///
/// `overrides` replace or add environment variables.
pub fn test_config(key_source_url: &str, overrides: &[(&str, &str)]) -> Config {
    let mut vars = HashMap::from([
        (
            "DATABASE_URL".to_string(),
            "postgresql://test/test".to_string(),
        ),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("JWT_AUDIENCE".to_string(), TEST_PROJECT_ID.to_string()),
        ("FIREBASE_JWKS".to_string(), key_source_url.to_string()),
        ("JWKS_CACHE_PATH".to_string(), String::new()),
        ("AWS_CLOUDFRONT_DOMAIN".to_string(), "cdn.test".to_string()),
    ]);
    for (name, value) in overrides {
        vars.insert((*name).to_string(), (*value).to_string());
    }

    Config::from_vars(&vars).expect("test configuration is valid")
}

/// A pool that never connects until used. For tests whose paths do not
/// reach the database.
pub fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(std::time::Duration::from_millis(200))
        .connect_lazy("postgresql://test@127.0.0.1:1/test")
        .expect("lazy pool URL parses")
}

/// Build a context. Without `identities` the Postgres identity store is used.
pub fn test_context(
    config: Config,
    pool: PgPool,
    identities: Option<Arc<dyn IdentityStore>>,
    objects: Arc<RecordingObjectStore>,
) -> Arc<AppContext> {
    let metrics = test_metrics_handle();
    let context = match identities {
        Some(identities) => {
            AppContext::with_identity_store(config, pool, identities, objects, metrics)
        }
        None => AppContext::new(config, pool, objects, metrics),
    };
    Arc::new(context)
}

/// Test harness for spawning the report service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[sqlx::test(migrations = "../../migrations")]
/// async fn test_me_flow(pool: PgPool) -> Result<()> {
///     let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
///     let server = TestReportServer::spawn(pool, &keys.url()).await?;
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/api/me", server.url()))
///         .bearer_auth(TestTokenBuilder::new().sign())
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestReportServer {
    addr: SocketAddr,
    context: Arc<AppContext>,
    objects: Arc<RecordingObjectStore>,
    _handle: JoinHandle<()>,
}

impl TestReportServer {
    /// Spawn against a real database, typically from `#[sqlx::test]`.
    pub async fn spawn(pool: PgPool, key_source_url: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_with(pool, key_source_url, &[], None).await
    }

    /// Spawn with configuration overrides and an optional identity store.
    pub async fn spawn_with(
        pool: PgPool,
        key_source_url: &str,
        overrides: &[(&str, &str)],
        identities: Option<Arc<dyn IdentityStore>>,
    ) -> Result<Self, anyhow::Error> {
        let config = test_config(key_source_url, overrides);
        let objects = Arc::new(RecordingObjectStore::new());
        let context = test_context(config, pool, identities, objects.clone());

        let app = build_app(context.clone())
            .map_err(|e| anyhow::anyhow!("Failed to build app: {}", e))?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            context,
            objects,
            _handle: handle,
        })
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn pool(&self) -> &PgPool {
        &self.context.pool
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    /// The object store the server writes through.
    pub fn objects(&self) -> &RecordingObjectStore {
        &self.objects
    }
}

impl Drop for TestReportServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
