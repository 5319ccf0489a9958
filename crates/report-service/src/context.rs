//! Process-wide service context.
//!
//! Built once in `main` and handed to the dispatcher as `Arc<AppContext>`.
//! Handlers reach configuration, the pool, the gateway and object storage
//! only through it.

use crate::auth::{AdminAllowList, AuthGateway, IdentityProvisioner, KeySetCache, TokenVerifier};
use crate::config::Config;
use crate::repositories::{IdentityStore, PgIdentityStore};
use crate::storage::ObjectStore;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;

pub struct AppContext {
    pub config: Config,
    pub pool: PgPool,
    pub key_cache: Arc<KeySetCache>,
    pub gateway: Arc<AuthGateway>,
    pub objects: Arc<dyn ObjectStore>,
    pub metrics: PrometheusHandle,
}

impl AppContext {
    /// Wire the context with the Postgres identity store.
    pub fn new(
        config: Config,
        pool: PgPool,
        objects: Arc<dyn ObjectStore>,
        metrics: PrometheusHandle,
    ) -> Self {
        let identities: Arc<dyn IdentityStore> = Arc::new(PgIdentityStore::new(pool.clone()));
        Self::with_identity_store(config, pool, identities, objects, metrics)
    }

    /// Wire the context around a given identity store.
    pub fn with_identity_store(
        config: Config,
        pool: PgPool,
        identities: Arc<dyn IdentityStore>,
        objects: Arc<dyn ObjectStore>,
        metrics: PrometheusHandle,
    ) -> Self {
        let key_cache = Arc::new(
            KeySetCache::new(config.key_source_url.clone())
                .with_cache_path(config.key_cache_path.clone())
                .with_fetch_timeout(config.key_fetch_timeout),
        );
        let verifier = Arc::new(TokenVerifier::new(
            key_cache.clone(),
            &config.jwt_audience,
            config.jwt_leeway,
        ));
        let provisioner = Arc::new(IdentityProvisioner::new(
            identities,
            AdminAllowList::from_entries(&config.admin_emails),
        ));
        let gateway = Arc::new(AuthGateway::new(verifier, provisioner));

        Self {
            config,
            pool,
            key_cache,
            gateway,
            objects,
            metrics,
        }
    }
}
