use std::sync::Arc;

use anyhow::Result;
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;

use labgate_common::LabgateConfig;

use crate::alerts::{AlertEngine, RuleCache};
use crate::audit::{AuditLogger, SecurityLogFile};
use crate::auth::TokenAuthGuard;
use crate::db::connect_to_db;
use crate::rate_limiting::{ApiRateLimiter, LoginRateLimiter};
use crate::reputation::ReputationEngine;
use crate::Maintenance;

/// One instance per process; every component receives its collaborators
/// explicitly instead of reaching for globals.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<Mutex<DatabaseConnection>>,
    pub config: Arc<Mutex<LabgateConfig>>,
    pub audit: Arc<AuditLogger>,
    pub reputation: Arc<ReputationEngine>,
    pub rule_cache: Arc<RuleCache>,
    pub alerts: Arc<AlertEngine>,
    pub api_rate_limiter: Arc<ApiRateLimiter>,
    pub login_rate_limiter: Arc<LoginRateLimiter>,
    pub auth: Arc<TokenAuthGuard>,
    pub maintenance: Arc<Maintenance>,
}

impl Services {
    pub async fn new(config: LabgateConfig) -> Result<Self> {
        let db = connect_to_db(&config).await?;
        Self::assemble(Arc::new(Mutex::new(db)), config)
    }

    /// Wiring split out from `new` so tests can bring their own database.
    pub fn assemble(db: Arc<Mutex<DatabaseConnection>>, config: LabgateConfig) -> Result<Self> {
        let security = &config.security;

        let log_path = config.paths_relative_to.join(&security.security_log_path);
        let security_log = Arc::new(Mutex::new(SecurityLogFile::new(
            log_path,
            security.security_log_max_bytes,
            security.security_log_generations,
        )));

        let audit = Arc::new(AuditLogger::new(db.clone(), security_log.clone()));
        let reputation = Arc::new(ReputationEngine::new(db.clone(), audit.clone()));
        let rule_cache = Arc::new(RuleCache::new());
        let alerts = Arc::new(AlertEngine::new(
            db.clone(),
            audit.clone(),
            reputation.clone(),
            rule_cache.clone(),
            security_log,
        ));
        let api_rate_limiter = Arc::new(ApiRateLimiter::new(
            db.clone(),
            audit.clone(),
            reputation.clone(),
            security,
        ));
        let login_rate_limiter = Arc::new(LoginRateLimiter::new(db.clone(), security));
        let auth = Arc::new(TokenAuthGuard::new(
            db.clone(),
            audit.clone(),
            alerts.clone(),
            security,
        ));
        let maintenance = Arc::new(Maintenance::new(
            db.clone(),
            reputation.clone(),
            security.maintenance_interval,
            security.reputation_retention,
            security.audit_retention,
        ));

        Ok(Self {
            db,
            config: Arc::new(Mutex::new(config)),
            audit,
            reputation,
            rule_cache,
            alerts,
            api_rate_limiter,
            login_rate_limiter,
            auth,
            maintenance,
        })
    }
}
