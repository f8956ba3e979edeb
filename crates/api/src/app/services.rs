use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use brokerage_audit::{
    AuditLogReader, AuditRecorder, AuditSink, AuditWriter, InMemoryAuditLog, SnapshotPolicy, SnapshotSource,
};
use brokerage_auth::{
    AccountDirectory, AttemptCounter, GrantService, GrantStore, InMemoryAccountDirectory,
    InMemoryAttemptCounter, InMemoryGrantStore, InMemoryTemplateStore, PermissionResolver, RoleCatalog, SessionGuard,
    TemplateStore,
};
use brokerage_core::{StoreError, UserId};
use brokerage_infra::AppConfig;
use brokerage_infra::postgres::{self, PgAccountDirectory, PgAuditLog, PgGrantStore, PgSnapshotSource, PgTemplateStore};

/// Everything the handlers and middleware need, shared behind one `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub resolver: PermissionResolver,
    pub grants: GrantService,
    pub session: SessionGuard,
    pub audit: AuditRecorder,
    pub audit_log: Arc<dyn AuditLogReader>,
    /// Paths reachable while a password change is pending.
    pub password_change_paths: Arc<[String]>,
}

/// Handles on the in-memory stores, for seeding in tests and local runs.
#[derive(Clone)]
pub struct InMemoryStores {
    pub accounts: Arc<InMemoryAccountDirectory>,
    pub grants: Arc<InMemoryGrantStore>,
    pub templates: Arc<InMemoryTemplateStore>,
    pub attempts: Arc<InMemoryAttemptCounter>,
    pub audit_log: Arc<InMemoryAuditLog>,
}

struct Backends {
    grants: Arc<dyn GrantStore>,
    templates: Arc<dyn TemplateStore>,
    accounts: Arc<dyn AccountDirectory>,
    attempts: Arc<dyn AttemptCounter>,
    audit_sink: Arc<dyn AuditSink>,
    audit_log: Arc<dyn AuditLogReader>,
    snapshots: Arc<dyn SnapshotSource>,
}

impl AppServices {
    /// Postgres-backed when `DATABASE_URL` is set, in-memory otherwise.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StoreError> {
        let Some(database_url) = config.database_url.as_deref() else {
            warn!("DATABASE_URL not set; using in-memory stores");
            let (services, _) = Self::in_memory(config);
            return Ok(services);
        };

        let pool = postgres::connect(database_url).await?;
        postgres::migrate(&pool).await?;
        info!("connected to postgres");

        let audit_log = Arc::new(PgAuditLog::new(pool.clone()));
        let backends = Backends {
            grants: Arc::new(PgGrantStore::new(pool.clone())),
            templates: Arc::new(PgTemplateStore::new(pool.clone())),
            accounts: Arc::new(PgAccountDirectory::new(pool.clone())),
            attempts: attempt_counter(config).await?,
            audit_sink: audit_log.clone(),
            audit_log,
            snapshots: Arc::new(PgSnapshotSource::new(pool)),
        };
        Ok(Self::assemble(config, backends))
    }

    /// Fully in-memory services. Must be called inside a Tokio runtime.
    pub fn in_memory(config: &AppConfig) -> (Self, InMemoryStores) {
        let stores = InMemoryStores {
            accounts: InMemoryAccountDirectory::arc(),
            grants: InMemoryGrantStore::arc(),
            templates: InMemoryTemplateStore::arc(),
            attempts: InMemoryAttemptCounter::arc(),
            audit_log: InMemoryAuditLog::arc(),
        };
        let backends = Backends {
            grants: stores.grants.clone(),
            templates: stores.templates.clone(),
            accounts: stores.accounts.clone(),
            attempts: stores.attempts.clone(),
            audit_sink: stores.audit_log.clone(),
            audit_log: stores.audit_log.clone(),
            snapshots: Arc::new(AccountSnapshots::new(stores.accounts.clone())),
        };
        (Self::assemble(config, backends), stores)
    }

    fn assemble(config: &AppConfig, backends: Backends) -> Self {
        let resolver = PermissionResolver::new(backends.grants.clone(), Arc::new(RoleCatalog::brokerage()))
            .with_branch_policy(config.branch_policy());
        let writer = AuditWriter::spawn(backends.audit_sink, config.audit_queue_capacity);

        Self {
            resolver,
            grants: GrantService::new(backends.grants, backends.templates),
            session: SessionGuard::new(backends.accounts, backends.attempts, config.brute_force),
            audit: AuditRecorder::new(writer, backends.snapshots, SnapshotPolicy::brokerage()),
            audit_log: backends.audit_log,
            password_change_paths: config.password_change_paths.clone().into(),
        }
    }

    pub fn password_change_allowed(&self, path: &str) -> bool {
        self.password_change_paths.iter().any(|p| p == path)
    }
}

#[cfg(feature = "redis")]
async fn attempt_counter(config: &AppConfig) -> Result<Arc<dyn AttemptCounter>, StoreError> {
    match config.redis_url.as_deref() {
        Some(url) => {
            let counter = brokerage_infra::redis_attempts::RedisAttemptCounter::connect(url).await?;
            info!("attempt counters shared through redis");
            Ok(Arc::new(counter))
        }
        None => Ok(InMemoryAttemptCounter::arc()),
    }
}

#[cfg(not(feature = "redis"))]
async fn attempt_counter(config: &AppConfig) -> Result<Arc<dyn AttemptCounter>, StoreError> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL set but built without the `redis` feature; attempt counters are per-process");
    }
    Ok(InMemoryAttemptCounter::arc())
}

/// Before-state snapshots of users, read through the account directory.
///
/// Used when there is no database to read rows from.
pub struct AccountSnapshots {
    accounts: Arc<dyn AccountDirectory>,
}

impl AccountSnapshots {
    pub fn new(accounts: Arc<dyn AccountDirectory>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl SnapshotSource for AccountSnapshots {
    async fn fetch(&self, entity_type: &str, entity_id: &str) -> Result<Option<Value>, StoreError> {
        if entity_type != AuditRecorder::USER_ENTITY {
            return Ok(None);
        }
        let Ok(user_id) = entity_id.parse::<UserId>() else {
            return Ok(None);
        };

        Ok(self.accounts.find(user_id).await?.map(|account| {
            json!({
                "id": account.user_id,
                "email": account.email,
                "role": account.role,
                "branch_code": account.branch_code,
                "status": account.status,
                "last_password_change": account.last_password_change,
                "force_password_change": account.force_password_change,
            })
        }))
    }
}
