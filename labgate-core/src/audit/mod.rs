mod logfile;

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use labgate_common::helpers::hash::{token_digest, truncate_digest};
use labgate_db_entities::AuditLog::{self, AuditEventType, EventSeverity, EventStatus};

pub use logfile::SecurityLogFile;

/// Per-request correlation data. Created once at the edge, stamped into
/// every audit entry and echoed back as the `X-Request-ID` header.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub ip: IpAddr,
    pub user_agent: String,
    pub endpoint: String,
    pub http_method: String,
}

impl RequestContext {
    pub fn new(ip: IpAddr, user_agent: String, endpoint: String, http_method: String) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            ip,
            user_agent,
            endpoint,
            http_method,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub event_type: AuditEventType,
    pub severity: EventSeverity,
    pub status: EventStatus,
    pub user_id: Option<Uuid>,
    pub metadata: Option<Value>,
}

impl AuditEntry {
    pub fn new(event_type: AuditEventType, severity: EventSeverity, status: EventStatus) -> Self {
        Self {
            event_type,
            severity,
            status,
            user_id: None,
            metadata: None,
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Append-only structured audit sink.
///
/// The relational store is the primary sink; on a write failure the entry
/// goes to the security log file instead. WARNING and CRITICAL entries are
/// always mirrored to the file so they survive a database outage.
pub struct AuditLogger {
    db: Arc<Mutex<DatabaseConnection>>,
    file: Arc<Mutex<SecurityLogFile>>,
}

impl AuditLogger {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>, file: Arc<Mutex<SecurityLogFile>>) -> Self {
        Self { db, file }
    }

    /// Recording an audit entry never fails the request being audited.
    pub async fn record(&self, ctx: &RequestContext, entry: AuditEntry) {
        let timestamp = Utc::now();
        let metadata = entry.metadata.clone().map(sanitize_metadata);
        let line = format_line(ctx, &entry, metadata.as_ref(), timestamp);

        let model = AuditLog::ActiveModel {
            id: Set(Uuid::new_v4()),
            timestamp: Set(timestamp),
            event_type: Set(entry.event_type),
            user_id: Set(entry.user_id),
            ip_address: Set(ctx.ip.to_string()),
            user_agent: Set(ctx.user_agent.clone()),
            endpoint: Set(ctx.endpoint.clone()),
            http_method: Set(ctx.http_method.clone()),
            request_id: Set(ctx.request_id),
            status: Set(entry.status),
            severity: Set(entry.severity),
            metadata: Set(metadata),
        };

        let db_result = {
            let db = self.db.lock().await;
            model.insert(&*db).await
        };

        let mut mirror_to_file = entry.severity >= EventSeverity::Warning;
        if let Err(error) = db_result {
            warn!(?error, "Failed to store audit entry");
            mirror_to_file = true;
        }

        if mirror_to_file {
            if let Err(error) = self.file.lock().await.append(&line) {
                warn!(?error, "Failed to write security log file");
            }
        }
    }

    pub async fn login_success(&self, ctx: &RequestContext, user_id: Uuid, username: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::LoginSuccess,
                EventSeverity::Info,
                EventStatus::Success,
            )
            .user(user_id)
            .metadata(serde_json::json!({ "username": username })),
        )
        .await;
    }

    pub async fn login_fail(&self, ctx: &RequestContext, username: &str, reason: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::LoginFail,
                EventSeverity::Warning,
                EventStatus::Fail,
            )
            .metadata(serde_json::json!({ "username": username, "reason": reason })),
        )
        .await;
    }

    pub async fn invalid_credentials(&self, ctx: &RequestContext, username: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::InvalidCredentials,
                EventSeverity::Warning,
                EventStatus::Fail,
            )
            .metadata(serde_json::json!({ "username": username })),
        )
        .await;
    }

    pub async fn token_created(&self, ctx: &RequestContext, user_id: Uuid, token_hash: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::TokenCreated,
                EventSeverity::Info,
                EventStatus::Success,
            )
            .user(user_id)
            .metadata(serde_json::json!({ "token_hash": truncate_digest(token_hash) })),
        )
        .await;
    }

    pub async fn token_revoked(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        reason: &str,
        token_hash: &str,
    ) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::TokenRevoked,
                EventSeverity::Warning,
                EventStatus::Fail,
            )
            .user(user_id)
            .metadata(serde_json::json!({
                "reason": reason,
                "token_hash": truncate_digest(token_hash),
            })),
        )
        .await;
    }

    pub async fn token_replay(&self, ctx: &RequestContext, user_id: Uuid, reason: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::TokenReplay,
                EventSeverity::Critical,
                EventStatus::Fail,
            )
            .user(user_id)
            .metadata(serde_json::json!({ "reason": reason })),
        )
        .await;
    }

    pub async fn rate_limit_hit(
        &self,
        ctx: &RequestContext,
        identifier: &str,
        identifier_kind: &str,
    ) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::RateLimitHit,
                EventSeverity::Warning,
                EventStatus::Fail,
            )
            .metadata(serde_json::json!({
                "identifier_kind": identifier_kind,
                "identifier_truncated": truncate_digest(identifier),
                "endpoint": ctx.endpoint,
            })),
        )
        .await;
    }

    pub async fn unauthorized(&self, ctx: &RequestContext, reason: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::Unauthorized,
                EventSeverity::Warning,
                EventStatus::Fail,
            )
            .metadata(serde_json::json!({ "reason": reason })),
        )
        .await;
    }

    pub async fn forbidden(&self, ctx: &RequestContext, user_id: Uuid, required_roles: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::Forbidden,
                EventSeverity::Warning,
                EventStatus::Fail,
            )
            .user(user_id)
            .metadata(serde_json::json!({ "required_role": required_roles })),
        )
        .await;
    }

    pub async fn db_error(&self, ctx: &RequestContext, error: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::DbError,
                EventSeverity::Critical,
                EventStatus::Fail,
            )
            .metadata(serde_json::json!({ "error": error })),
        )
        .await;
    }

    pub async fn exception(&self, ctx: &RequestContext, error: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::Exception,
                EventSeverity::Critical,
                EventStatus::Fail,
            )
            .metadata(serde_json::json!({ "error": error })),
        )
        .await;
    }

    pub async fn suspicious_user(&self, ctx: &RequestContext, user_id: Uuid, reason: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::SuspiciousUser,
                EventSeverity::Critical,
                EventStatus::Fail,
            )
            .user(user_id)
            .metadata(serde_json::json!({ "reason": reason })),
        )
        .await;
    }

    pub async fn logout(&self, ctx: &RequestContext, user_id: Uuid, token_hash: &str) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::Logout,
                EventSeverity::Info,
                EventStatus::Success,
            )
            .user(user_id)
            .metadata(serde_json::json!({ "token_hash": truncate_digest(token_hash) })),
        )
        .await;
    }

    pub async fn password_change(&self, ctx: &RequestContext, user_id: Uuid) {
        self.record(
            ctx,
            AuditEntry::new(
                AuditEventType::PasswordChange,
                EventSeverity::Warning,
                EventStatus::Success,
            )
            .user(user_id),
        )
        .await;
    }
}

/// Strips raw credentials from metadata before it is persisted. Passwords
/// are removed entirely; a raw token is replaced by a truncated digest;
/// long token hashes are truncated in place.
pub fn sanitize_metadata(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            map.remove("password");

            if let Some(Value::String(token)) = map.remove("token") {
                if !map.contains_key("token_hash") {
                    map.insert(
                        "token_hash".into(),
                        Value::String(truncate_digest(&token_digest(&token))),
                    );
                }
            }

            if let Some(Value::String(hash)) = map.get("token_hash") {
                if hash.len() > 32 {
                    let truncated = truncate_digest(hash);
                    map.insert("token_hash".into(), Value::String(truncated));
                }
            }

            let map = map
                .into_iter()
                .map(|(k, v)| (k, sanitize_metadata(v)))
                .collect();
            Value::Object(map)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_metadata).collect()),
        other => other,
    }
}

fn format_line(
    ctx: &RequestContext,
    entry: &AuditEntry,
    metadata: Option<&Value>,
    timestamp: chrono::DateTime<Utc>,
) -> String {
    let user_agent: String = ctx.user_agent.chars().take(100).collect();
    format!(
        "[{}] [{}] [{}] [{}] | IP:{} | UA:{} | Endpoint:{} | Method:{} | RequestID:{} | UserID:{} | Metadata:{}",
        timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.severity.as_str(),
        entry.event_type.as_str(),
        entry.status.as_str(),
        ctx.ip,
        user_agent,
        ctx.endpoint,
        ctx.http_method,
        ctx.request_id,
        entry
            .user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "NULL".into()),
        metadata
            .map(|m| m.to_string())
            .unwrap_or_else(|| "{}".into()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_removes_password() {
        let out = sanitize_metadata(json!({ "username": "a", "password": "hunter2" }));
        assert_eq!(out, json!({ "username": "a" }));
    }

    #[test]
    fn test_sanitize_replaces_raw_token_with_digest() {
        let out = sanitize_metadata(json!({ "token": "abc" }));
        let hash = out.get("token_hash").and_then(|v| v.as_str()).unwrap();
        assert!(hash.ends_with("..."));
        assert_eq!(hash, "ba7816bf8f01cfea...");
    }

    #[test]
    fn test_sanitize_truncates_long_token_hash() {
        let long_hash = "a".repeat(64);
        let out = sanitize_metadata(json!({ "token_hash": long_hash }));
        assert_eq!(
            out.get("token_hash").and_then(|v| v.as_str()).unwrap(),
            format!("{}...", "a".repeat(16))
        );
    }

    #[test]
    fn test_sanitize_recurses_into_nested_metadata() {
        let out = sanitize_metadata(json!({ "metadata": { "password": "x", "keep": 1 } }));
        assert_eq!(out, json!({ "metadata": { "keep": 1 } }));
    }

    #[test]
    fn test_format_line_shape() {
        let ctx = RequestContext {
            request_id: Uuid::nil(),
            ip: "203.0.113.1".parse().unwrap(),
            user_agent: "test-agent".into(),
            endpoint: "/api/auth/login".into(),
            http_method: "POST".into(),
        };
        let entry = AuditEntry::new(
            AuditEventType::LoginFail,
            EventSeverity::Warning,
            EventStatus::Fail,
        );
        let line = format_line(&ctx, &entry, None, Utc::now());
        assert!(line.contains("[WARNING] [LOGIN_FAIL] [FAIL]"));
        assert!(line.contains("IP:203.0.113.1"));
        assert!(line.contains("UserID:NULL"));
    }

    use sea_orm::EntityTrait;

    use crate::test_util::{ctx, test_db};

    #[tokio::test]
    async fn test_record_persists_and_mirrors_warnings_to_file() {
        let db = test_db().await;
        let dir = std::env::temp_dir().join(format!("labgate-audit-{}", Uuid::new_v4()));
        let path = dir.join("security.log");
        let file = Arc::new(Mutex::new(SecurityLogFile::new(&path, 1024 * 1024, 2)));
        let audit = AuditLogger::new(db.clone(), file);

        let ctx = ctx("203.0.113.1", "curl/8");
        audit.login_success(&ctx, Uuid::new_v4(), "budi").await;
        audit.login_fail(&ctx, "budi", "invalid_credentials").await;

        let rows = {
            let db = db.lock().await;
            AuditLog::Entity::find().all(&*db).await.unwrap()
        };
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.request_id == ctx.request_id));

        // INFO stays in the store; the WARNING is mirrored to the file
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("LOGIN_SUCCESS"));
        assert!(content.contains("LOGIN_FAIL"));
    }

    #[tokio::test]
    async fn test_raw_password_never_reaches_the_store() {
        let db = test_db().await;
        let dir = std::env::temp_dir().join(format!("labgate-audit-{}", Uuid::new_v4()));
        let file = Arc::new(Mutex::new(SecurityLogFile::new(
            dir.join("security.log"),
            1024 * 1024,
            2,
        )));
        let audit = AuditLogger::new(db.clone(), file);

        let ctx = ctx("203.0.113.1", "curl/8");
        audit
            .record(
                &ctx,
                AuditEntry::new(
                    AuditEventType::Exception,
                    EventSeverity::Critical,
                    EventStatus::Fail,
                )
                .metadata(serde_json::json!({ "password": "hunter2", "detail": "boom" })),
            )
            .await;

        let row = {
            let db = db.lock().await;
            AuditLog::Entity::find().one(&*db).await.unwrap().unwrap()
        };
        let metadata = row.metadata.unwrap().to_string();
        assert!(!metadata.contains("hunter2"));
        assert!(metadata.contains("boom"));
    }
}
