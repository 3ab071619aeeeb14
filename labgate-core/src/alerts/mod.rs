mod notify;
mod rules;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use labgate_common::helpers::hash::{sha256_hex, truncate_digest};
use labgate_common::LabgateError;
use labgate_db_entities::AlertRule::{self, AlertSeverity, RuleKind};
use labgate_db_entities::AuditLog::{AuditEventType, EventSeverity, EventStatus};
use labgate_db_entities::{AlertEvent, AlertMetric, AlertState, ApiToken};

use crate::audit::{AuditEntry, AuditLogger, RequestContext, SecurityLogFile};
use crate::blocks;
use crate::db::LockForUpdate;
use crate::rate_limiting::fixed_window_start;
use crate::reputation::ReputationEngine;

pub use notify::EmailAlert;
pub use rules::RuleCache;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Event kinds reported to the engine by the other components. Rules are
/// not keyed on these; they appear in event metadata and the audit trail.
pub mod event_kind {
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_MULTI_IP: &str = "TOKEN_MULTI_IP";
    pub const REPEATED_403: &str = "REPEATED_403";
    pub const LOGIN_FAIL: &str = "LOGIN_FAIL";
    pub const RATE_LIMIT_HIT: &str = "RATE_LIMIT_HIT";
}

#[derive(Clone, Debug, Default)]
pub struct SecurityEvent {
    pub kind: &'static str,
    pub token_hash: Option<String>,
    pub user_id: Option<Uuid>,
}

impl SecurityEvent {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            token_hash: None,
            user_id: None,
        }
    }

    pub fn token_hash(mut self, token_hash: impl Into<String>) -> Self {
        self.token_hash = Some(token_hash.into());
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Rule-driven anomaly detection with a per-(rule, source) state machine:
/// Idle -> Firing -> Cooldown -> Idle. Everything here fails open; a broken
/// alert pipeline must never reject traffic.
pub struct AlertEngine {
    db: Arc<Mutex<DatabaseConnection>>,
    audit: Arc<AuditLogger>,
    reputation: Arc<ReputationEngine>,
    rule_cache: Arc<RuleCache>,
    security_log: Arc<Mutex<SecurityLogFile>>,
    last_cleanup: Mutex<Option<Instant>>,
}

impl AlertEngine {
    pub fn new(
        db: Arc<Mutex<DatabaseConnection>>,
        audit: Arc<AuditLogger>,
        reputation: Arc<ReputationEngine>,
        rule_cache: Arc<RuleCache>,
        security_log: Arc<Mutex<SecurityLogFile>>,
    ) -> Self {
        Self {
            db,
            audit,
            reputation,
            rule_cache,
            security_log,
            last_cleanup: Mutex::new(None),
        }
    }

    /// Evaluate a security event against every enabled rule.
    pub async fn check(&self, ctx: &RequestContext, event: &SecurityEvent) {
        let rules = match self.rules().await {
            Ok(rules) => rules,
            Err(error) => {
                warn!(?error, "Failed to load alert rules");
                return;
            }
        };

        for rule in rules.iter() {
            if !rule_applies(rule, &ctx.endpoint) {
                continue;
            }
            let Some(source_hash) = source_hash(rule, ctx, event) else {
                continue;
            };

            let count = match self.increment_metric(rule, &source_hash).await {
                Ok(count) => count,
                Err(error) => {
                    warn!(?error, rule = %rule.name, "Failed to increment alert metric");
                    continue;
                }
            };

            // Critical first; one event never fires both severities
            if count >= rule.threshold_critical {
                self.fire(ctx, event, rule, AlertSeverity::Critical, &source_hash, count)
                    .await;
            } else if count >= rule.threshold_warning {
                self.fire(ctx, event, rule, AlertSeverity::Warning, &source_hash, count)
                    .await;
            }
        }

        self.cleanup_if_due(&rules).await;
    }

    async fn rules(&self) -> Result<Arc<Vec<AlertRule::Model>>, LabgateError> {
        if let Some(rules) = self.rule_cache.get().await {
            return Ok(rules);
        }
        let db = self.db.lock().await;
        let rules = rules::load_enabled_rules(&db).await?;
        drop(db);
        Ok(self.rule_cache.put(rules).await)
    }

    pub async fn clear_rule_cache(&self) {
        self.rule_cache.invalidate().await;
    }

    pub async fn is_ip_blocked(&self, ip: std::net::IpAddr) -> bool {
        let db = self.db.lock().await;
        match blocks::is_blocked(&*db, &ip.to_string()).await {
            Ok(blocked) => blocked,
            Err(error) => {
                warn!(?error, %ip, "Failed to check IP block, failing open");
                false
            }
        }
    }

    async fn increment_metric(
        &self,
        rule: &AlertRule::Model,
        source_hash: &str,
    ) -> Result<i32, LabgateError> {
        let now = Utc::now();
        let window_start =
            fixed_window_start(now, Duration::from_secs(rule.time_window_seconds as u64));

        let db = self.db.lock().await;

        AlertMetric::Entity::insert(AlertMetric::ActiveModel {
            id: Set(Uuid::new_v4()),
            rule_id: Set(rule.id),
            source_hash: Set(source_hash.to_owned()),
            window_start: Set(window_start),
            count: Set(1),
            last_updated: Set(now),
        })
        .on_conflict(
            OnConflict::columns([
                AlertMetric::Column::RuleId,
                AlertMetric::Column::SourceHash,
                AlertMetric::Column::WindowStart,
            ])
            .value(
                AlertMetric::Column::Count,
                Expr::col(AlertMetric::Column::Count).add(1),
            )
            .value(AlertMetric::Column::LastUpdated, Expr::value(now))
            .to_owned(),
        )
        .exec(&*db)
        .await?;

        let metric = AlertMetric::Entity::find()
            .filter(AlertMetric::Column::RuleId.eq(rule.id))
            .filter(AlertMetric::Column::SourceHash.eq(source_hash))
            .filter(AlertMetric::Column::WindowStart.eq(window_start))
            .one(&*db)
            .await?;

        Ok(metric.map(|m| m.count).unwrap_or(0))
    }

    async fn fire(
        &self,
        ctx: &RequestContext,
        event: &SecurityEvent,
        rule: &AlertRule::Model,
        severity: AlertSeverity,
        source_hash: &str,
        count: i32,
    ) {
        let fired = match self
            .transition_state_and_persist(ctx, event, rule, severity, source_hash, count)
            .await
        {
            Ok(fired) => fired,
            Err(error) => {
                warn!(?error, rule = %rule.name, "Failed to fire alert");
                return;
            }
        };

        let Some(alert) = fired else {
            // Still cooling down for this (rule, source) pair
            debug!(rule = %rule.name, "Alert suppressed by cooldown");
            return;
        };

        let auto_blocked = self.execute_auto_actions(ctx, event, rule, severity, &alert).await;

        let auto_action = rule.auto_action().unwrap_or_default();
        let suggested = notify::suggested_action(auto_action.as_ref(), severity);
        let line = notify::format_alert_line(&alert, &ctx.endpoint, suggested);
        if let Err(error) = self.security_log.lock().await.append(&line) {
            warn!(?error, "Failed to write alert to security log");
        }
        if severity == AlertSeverity::Critical {
            notify::prepare_email(&alert, &ctx.endpoint, suggested);
        }

        self.audit
            .record(
                ctx,
                AuditEntry::new(
                    AuditEventType::AlertFired,
                    match severity {
                        AlertSeverity::Critical => EventSeverity::Critical,
                        AlertSeverity::Warning => EventSeverity::Warning,
                    },
                    EventStatus::Fail,
                )
                .metadata(serde_json::json!({
                    "alert_id": alert.id,
                    "rule_name": rule.name,
                    "severity": severity.as_str(),
                    "source_kind": alert.source_kind,
                    "source_value": alert.source_value,
                    "trigger_count": count,
                })),
            )
            .await;

        self.reputation
            .record_incident(ctx, severity, &rule.name, auto_blocked)
            .await;
    }

    /// Cooldown check, state update and event insert under one row lock.
    /// Returns None when the pair is still in cooldown.
    async fn transition_state_and_persist(
        &self,
        ctx: &RequestContext,
        event: &SecurityEvent,
        rule: &AlertRule::Model,
        severity: AlertSeverity,
        source_hash: &str,
        count: i32,
    ) -> Result<Option<AlertEvent::Model>, LabgateError> {
        let now = Utc::now();
        let state_hash = sha256_hex(&format!("{}|{}", rule.id, source_hash));

        let db = self.db.lock().await;
        let backend = db.get_database_backend();
        let txn = db.begin().await?;

        let state = AlertState::Entity::find()
            .filter(AlertState::Column::RuleId.eq(rule.id))
            .filter(AlertState::Column::SourceHash.eq(&state_hash))
            .lock_for_update(backend)
            .one(&txn)
            .await?;

        let cooldown_until = now + ChronoDuration::seconds(rule.cooldown_seconds as i64);

        match state {
            Some(state) => {
                if state.cooldown_until > now {
                    txn.rollback().await?;
                    return Ok(None);
                }
                let fire_count = state.fire_count + 1;
                let escalated =
                    state.escalated || (fire_count > 1 && severity == AlertSeverity::Critical);
                let model = AlertState::ActiveModel {
                    id: Set(state.id),
                    last_fired_at: Set(now),
                    fire_count: Set(fire_count),
                    escalated: Set(escalated),
                    cooldown_until: Set(cooldown_until),
                    ..Default::default()
                };
                model.update(&txn).await?;
            }
            None => {
                let model = AlertState::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    rule_id: Set(rule.id),
                    source_hash: Set(state_hash),
                    last_fired_at: Set(now),
                    fire_count: Set(1),
                    escalated: Set(false),
                    cooldown_until: Set(cooldown_until),
                };
                model.insert(&txn).await?;
            }
        }

        let mut metadata = serde_json::json!({
            "trigger_count": count,
            "time_window_seconds": rule.time_window_seconds,
            "endpoint": ctx.endpoint,
            "http_method": ctx.http_method,
            "request_id": ctx.request_id,
            "ip_address": ctx.ip.to_string(),
        });
        if let Some(token_hash) = &event.token_hash {
            metadata["token_hash"] = serde_json::json!(truncate_digest(token_hash));
        }
        if let Some(user_id) = event.user_id {
            metadata["user_id"] = serde_json::json!(user_id);
        }

        let alert = AlertEvent::ActiveModel {
            id: Set(Uuid::new_v4()),
            rule_id: Set(rule.id),
            rule_name: Set(rule.name.clone()),
            severity: Set(severity),
            source_kind: Set(source_kind(rule).to_owned()),
            source_value: Set(source_value(rule, ctx, event)),
            trigger_count: Set(count),
            time_window_seconds: Set(rule.time_window_seconds),
            metadata: Set(metadata),
            fired_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(Some(alert))
    }

    /// Auto-actions run only at CRITICAL severity and only when the rule
    /// enables them. Returns whether an IP block was applied.
    async fn execute_auto_actions(
        &self,
        ctx: &RequestContext,
        event: &SecurityEvent,
        rule: &AlertRule::Model,
        severity: AlertSeverity,
        alert: &AlertEvent::Model,
    ) -> bool {
        if severity != AlertSeverity::Critical {
            return false;
        }
        let action = match rule.auto_action() {
            Ok(Some(action)) => action,
            Ok(None) => return false,
            Err(error) => {
                warn!(?error, rule = %rule.name, "Invalid auto_action configuration");
                return false;
            }
        };

        let mut auto_blocked = false;

        if action.block_ip && !ctx.ip.is_unspecified() {
            let blocked_until = Utc::now() + ChronoDuration::seconds(action.duration_seconds as i64);
            let result = {
                let db = self.db.lock().await;
                blocks::extend_block(
                    &*db,
                    &ctx.ip.to_string(),
                    blocked_until,
                    &rule.name,
                    Some(alert.id),
                )
                .await
            };
            match result {
                Ok(()) => auto_blocked = true,
                Err(error) => warn!(?error, ip = %ctx.ip, "Failed to auto-block IP"),
            }
        }

        if action.revoke_token {
            if let Some(token_hash) = &event.token_hash {
                if let Err(error) = self.revoke_token(token_hash, &rule.name).await {
                    warn!(?error, "Failed to auto-revoke token");
                }
            }
        }

        if action.flag_user {
            if let Some(user_id) = event.user_id {
                self.audit
                    .suspicious_user(ctx, user_id, &format!("alert:{}", rule.name))
                    .await;
            }
        }

        auto_blocked
    }

    async fn revoke_token(&self, token_hash: &str, rule_name: &str) -> Result<(), LabgateError> {
        let db = self.db.lock().await;
        ApiToken::Entity::update_many()
            .col_expr(ApiToken::Column::RevokedAt, Expr::value(Utc::now()))
            .col_expr(
                ApiToken::Column::RevokedReason,
                Expr::value(format!("alert:{rule_name}")),
            )
            .filter(ApiToken::Column::TokenHash.eq(token_hash))
            .exec(&*db)
            .await?;
        Ok(())
    }

    /// Inline best-effort cleanup, throttled to once per five minutes per
    /// process. Removes metric rows past twice the longest configured
    /// window and expired auto-unblock IP blocks.
    async fn cleanup_if_due(&self, rules: &[AlertRule::Model]) {
        {
            let mut last = self.last_cleanup.lock().await;
            match *last {
                Some(at) if at.elapsed() < CLEANUP_INTERVAL => return,
                _ => *last = Some(Instant::now()),
            }
        }

        let max_age_seconds = rules
            .iter()
            .map(|r| r.time_window_seconds as i64 * 2)
            .max()
            .unwrap_or(0);
        let cutoff = Utc::now() - ChronoDuration::seconds(max_age_seconds);

        let result: Result<(), LabgateError> = async {
            let db = self.db.lock().await;
            AlertMetric::Entity::delete_many()
                .filter(AlertMetric::Column::WindowStart.lt(cutoff))
                .exec(&*db)
                .await?;
            blocks::cleanup_expired(&*db).await?;
            Ok(())
        }
        .await;

        if let Err(error) = result {
            warn!(?error, "Alert metric cleanup failed");
        }
    }
}

fn rule_applies(rule: &AlertRule::Model, endpoint: &str) -> bool {
    if rule.kind == RuleKind::EndpointBased {
        if let Some(scope) = &rule.scope {
            return scope_matches(scope, endpoint);
        }
    }
    true
}

/// Glob-to-regex endpoint matching; only `*` is a wildcard.
fn scope_matches(scope: &str, endpoint: &str) -> bool {
    let pattern = format!(
        "^{}$",
        scope
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*")
    );
    regex::Regex::new(&pattern)
        .map(|re| re.is_match(endpoint))
        .unwrap_or(false)
}

fn source_hash(
    rule: &AlertRule::Model,
    ctx: &RequestContext,
    event: &SecurityEvent,
) -> Option<String> {
    match rule.kind {
        RuleKind::IpBased => Some(sha256_hex(&format!("ip:{}", ctx.ip))),
        RuleKind::TokenBased => event
            .token_hash
            .as_ref()
            .map(|hash| sha256_hex(&format!("token:{hash}"))),
        RuleKind::UserBased => event
            .user_id
            .map(|user_id| sha256_hex(&format!("user:{user_id}"))),
        RuleKind::EndpointBased => Some(sha256_hex(&format!("endpoint:{}", ctx.endpoint))),
        RuleKind::Generic => Some(sha256_hex(&format!(
            "{}|{}|{}",
            ctx.ip,
            event.token_hash.as_deref().unwrap_or(""),
            event
                .user_id
                .map(|u| u.to_string())
                .unwrap_or_default()
        ))),
    }
}

fn source_kind(rule: &AlertRule::Model) -> &'static str {
    match rule.kind {
        RuleKind::IpBased | RuleKind::Generic => "IP",
        RuleKind::TokenBased => "TOKEN",
        RuleKind::UserBased => "USER",
        RuleKind::EndpointBased => "ENDPOINT",
    }
}

fn source_value(rule: &AlertRule::Model, ctx: &RequestContext, event: &SecurityEvent) -> String {
    match rule.kind {
        RuleKind::IpBased | RuleKind::Generic => ctx.ip.to_string(),
        RuleKind::TokenBased => event
            .token_hash
            .as_deref()
            .map(truncate_digest)
            .unwrap_or_else(|| "unknown".into()),
        RuleKind::UserBased => event
            .user_id
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".into()),
        RuleKind::EndpointBased => ctx.endpoint.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_matches_glob() {
        assert!(scope_matches("/api/admin/*", "/api/admin/users"));
        assert!(scope_matches("/api/*/login", "/api/auth/login"));
        assert!(!scope_matches("/api/admin/*", "/api/auth/login"));
        assert!(scope_matches("/api/auth/login", "/api/auth/login"));
    }

    #[test]
    fn test_scope_escapes_regex_metacharacters() {
        assert!(!scope_matches("/api/v1.0/x", "/api/v1a0/x"));
        assert!(scope_matches("/api/v1.0/x", "/api/v1.0/x"));
    }

    use crate::test_util::{ctx, insert_rule, stack, test_db};

    async fn count_events(db: &Arc<Mutex<DatabaseConnection>>) -> usize {
        let db = db.lock().await;
        AlertEvent::Entity::find().all(&*db).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_two_triggers_within_cooldown_fire_once() {
        let db = test_db().await;
        let stack = stack(&db);
        insert_rule(
            &db,
            "Excessive failures",
            RuleKind::IpBased,
            1,
            999,
            60,
            600,
            None,
        )
        .await;

        let ctx = ctx("203.0.113.5", "curl/8");
        let event = SecurityEvent::new(event_kind::LOGIN_FAIL);

        stack.alerts.check(&ctx, &event).await;
        stack.alerts.check(&ctx, &event).await;

        // Metric counted both events, cooldown deduplicated the alert
        assert_eq!(count_events(&db).await, 1);

        let metric = {
            let db = db.lock().await;
            AlertMetric::Entity::find().one(&*db).await.unwrap().unwrap()
        };
        assert_eq!(metric.count, 2);
    }

    #[tokio::test]
    async fn test_critical_auto_action_blocks_ip_and_scores_reputation() {
        let db = test_db().await;
        let stack = stack(&db);
        insert_rule(
            &db,
            "Token abuse",
            RuleKind::IpBased,
            1,
            1,
            60,
            600,
            Some(serde_json::json!({ "block_ip": true, "duration_seconds": 3600 })),
        )
        .await;

        let ctx = ctx("203.0.113.66", "curl/8");
        stack
            .alerts
            .check(&ctx, &SecurityEvent::new(event_kind::TOKEN_INVALID))
            .await;

        assert_eq!(count_events(&db).await, 1);
        assert!(stack.alerts.is_ip_blocked(ctx.ip).await);

        // CRITICAL + auto-block incident: base 3 + 5, no escalation yet
        let reputation = {
            let db = db.lock().await;
            labgate_db_entities::IpReputation::Entity::find()
                .one(&*db)
                .await
                .unwrap()
                .unwrap()
        };
        assert_eq!(reputation.score, 8);
        assert_eq!(reputation.auto_block_count, 1);
    }

    #[tokio::test]
    async fn test_second_critical_fire_escalates() {
        let db = test_db().await;
        let stack = stack(&db);
        insert_rule(
            &db,
            "Token abuse",
            RuleKind::IpBased,
            1,
            1,
            60,
            600,
            None,
        )
        .await;

        let ctx = ctx("203.0.113.66", "curl/8");
        let event = SecurityEvent::new(event_kind::TOKEN_INVALID);
        stack.alerts.check(&ctx, &event).await;

        // Expire the cooldown by hand, then trigger again
        {
            let db = db.lock().await;
            let state = AlertState::Entity::find().one(&*db).await.unwrap().unwrap();
            AlertState::ActiveModel {
                id: Set(state.id),
                cooldown_until: Set(Utc::now() - chrono::Duration::seconds(1)),
                ..Default::default()
            }
            .update(&*db)
            .await
            .unwrap();
        }
        stack.alerts.check(&ctx, &event).await;

        let state = {
            let db = db.lock().await;
            AlertState::Entity::find().one(&*db).await.unwrap().unwrap()
        };
        assert_eq!(state.fire_count, 2);
        assert!(state.escalated);
        assert_eq!(count_events(&db).await, 2);
    }

    #[tokio::test]
    async fn test_disabled_rules_and_cache_invalidation() {
        let db = test_db().await;
        let stack = stack(&db);
        let rule = insert_rule(
            &db,
            "Noisy rule",
            RuleKind::IpBased,
            1,
            999,
            60,
            600,
            None,
        )
        .await;

        let ctx = ctx("203.0.113.5", "curl/8");
        let event = SecurityEvent::new(event_kind::LOGIN_FAIL);
        stack.alerts.check(&ctx, &event).await;
        assert_eq!(count_events(&db).await, 1);

        // Disable the rule; the stale cache still fires until invalidated
        {
            let db = db.lock().await;
            AlertRule::ActiveModel {
                id: Set(rule.id),
                enabled: Set(false),
                ..Default::default()
            }
            .update(&*db)
            .await
            .unwrap();
        }
        stack.alerts.clear_rule_cache().await;

        stack.alerts.check(&ctx, &event).await;
        assert_eq!(count_events(&db).await, 1);
    }

    #[tokio::test]
    async fn test_endpoint_scoped_rule_ignores_other_endpoints() {
        let db = test_db().await;
        let stack = stack(&db);
        {
            let db_guard = db.lock().await;
            AlertRule::ActiveModel {
                id: Set(Uuid::new_v4()),
                name: Set("Login probing".into()),
                kind: Set(RuleKind::EndpointBased),
                threshold_warning: Set(1),
                threshold_critical: Set(999),
                time_window_seconds: Set(60),
                cooldown_seconds: Set(600),
                scope: Set(Some("/api/auth/*".into())),
                auto_action: Set(None),
                enabled: Set(true),
            }
            .insert(&*db_guard)
            .await
            .unwrap();
        }

        let mut other = ctx("203.0.113.5", "curl/8");
        other.endpoint = "/api/plp/loans".into();
        stack
            .alerts
            .check(&other, &SecurityEvent::new(event_kind::LOGIN_FAIL))
            .await;
        assert_eq!(count_events(&db).await, 0);

        let mut login = ctx("203.0.113.5", "curl/8");
        login.endpoint = "/api/auth/login".into();
        stack
            .alerts
            .check(&login, &SecurityEvent::new(event_kind::LOGIN_FAIL))
            .await;
        assert_eq!(count_events(&db).await, 1);
    }
}
