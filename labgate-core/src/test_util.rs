use std::sync::Arc;

use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use tokio::sync::Mutex;
use uuid::Uuid;

use labgate_common::helpers::hash::hash_password;
use labgate_db_entities::AlertRule::{self, RuleKind};
use labgate_db_entities::User::{self, UserRole};

use crate::alerts::{AlertEngine, RuleCache};
use crate::audit::{AuditLogger, RequestContext, SecurityLogFile};
use crate::reputation::ReputationEngine;

pub(crate) async fn test_db() -> Arc<Mutex<DatabaseConnection>> {
    // One pooled connection: each sqlite::memory: connection is its own DB
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    labgate_db_migrations::migrate_database(&db).await.unwrap();
    Arc::new(Mutex::new(db))
}

pub(crate) fn ctx(ip: &str, user_agent: &str) -> RequestContext {
    RequestContext::new(
        ip.parse().unwrap(),
        user_agent.to_owned(),
        "/api/test".to_owned(),
        "GET".to_owned(),
    )
}

pub(crate) struct TestStack {
    pub audit: Arc<AuditLogger>,
    pub reputation: Arc<ReputationEngine>,
    pub rule_cache: Arc<RuleCache>,
    pub alerts: Arc<AlertEngine>,
}

pub(crate) fn stack(db: &Arc<Mutex<DatabaseConnection>>) -> TestStack {
    let log_path = std::env::temp_dir()
        .join(format!("labgate-test-{}", Uuid::new_v4()))
        .join("security.log");
    let security_log = Arc::new(Mutex::new(SecurityLogFile::new(log_path, 1024 * 1024, 2)));

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

    TestStack {
        audit,
        reputation,
        rule_cache,
        alerts,
    }
}

pub(crate) async fn insert_user(
    db: &Arc<Mutex<DatabaseConnection>>,
    username: &str,
    role: UserRole,
) -> User::Model {
    let model = User::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(username.to_owned()),
        name: Set(format!("Test {username}")),
        email: Set(format!("{username}@lab.test")),
        password_hash: Set(hash_password("correct horse")),
        avatar: Set(None),
        gender: Set(None),
        phone: Set(None),
        department: Set(None),
        role: Set(role),
    };
    let db = db.lock().await;
    model.insert(&*db).await.unwrap()
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn insert_rule(
    db: &Arc<Mutex<DatabaseConnection>>,
    name: &str,
    kind: RuleKind,
    threshold_warning: i32,
    threshold_critical: i32,
    time_window_seconds: i32,
    cooldown_seconds: i32,
    auto_action: Option<serde_json::Value>,
) -> AlertRule::Model {
    let model = AlertRule::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_owned()),
        kind: Set(kind),
        threshold_warning: Set(threshold_warning),
        threshold_critical: Set(threshold_critical),
        time_window_seconds: Set(time_window_seconds),
        cooldown_seconds: Set(cooldown_seconds),
        scope: Set(None),
        auto_action: Set(auto_action),
        enabled: Set(true),
    };
    let db = db.lock().await;
    model.insert(&*db).await.unwrap()
}
