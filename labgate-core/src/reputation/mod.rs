mod scoring;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use labgate_common::LabgateError;
use labgate_db_entities::AlertRule::AlertSeverity;
use labgate_db_entities::AuditLog::{AuditEventType, EventSeverity, EventStatus};
use labgate_db_entities::IpReputation::{self, ReputationStatus};

use crate::audit::{AuditEntry, AuditLogger, RequestContext};
use crate::blocks;
use crate::db::LockForUpdate;

pub use scoring::{
    block_duration_multiplier, escalation_multiplier, incident_score, rate_limit_multiplier,
    status_for_score,
};

const ALERT_HISTORY_MAX: usize = 50;
const PREEMPTIVE_BLOCK_BASE_SECONDS: i64 = 3600;

#[derive(Clone, Debug)]
pub struct ReputationSummary {
    pub score: i32,
    pub status: ReputationStatus,
    pub block_multiplier: f64,
    pub rate_limit_multiplier: f64,
}

impl Default for ReputationSummary {
    fn default() -> Self {
        Self {
            score: 0,
            status: ReputationStatus::Normal,
            block_multiplier: 1.0,
            rate_limit_multiplier: 1.0,
        }
    }
}

#[derive(Clone, Debug)]
struct CachedReputation {
    score: i32,
    status: ReputationStatus,
}

#[derive(Serialize, Deserialize, Default)]
struct ReputationMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    first_alert_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_alert_severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_alert_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_alert_severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_alert_at: Option<DateTime<Utc>>,
    #[serde(default)]
    alert_history: Vec<HistoryEntry>,
}

#[derive(Serialize, Deserialize)]
struct HistoryEntry {
    #[serde(rename = "type")]
    alert_type: String,
    severity: String,
    score_increase: i32,
    timestamp: DateTime<Utc>,
}

/// Per-IP scoring with decay and escalation. Incidents are reported by the
/// alert engine but `record_incident` is a public entry point in its own
/// right. All operations except decay/cleanup fail open.
pub struct ReputationEngine {
    db: Arc<Mutex<DatabaseConnection>>,
    audit: Arc<AuditLogger>,
    cache: RwLock<HashMap<String, CachedReputation>>,
}

impl ReputationEngine {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>, audit: Arc<AuditLogger>) -> Self {
        Self {
            db,
            audit,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_incident(
        &self,
        ctx: &RequestContext,
        severity: AlertSeverity,
        alert_type: &str,
        auto_blocked: bool,
    ) {
        if ctx.ip.is_unspecified() {
            return;
        }

        match self
            .record_incident_inner(ctx.ip, severity, alert_type, auto_blocked)
            .await
        {
            Ok(new_score) => {
                if new_score >= scoring::THRESHOLD_AUTO_BLOCK && !auto_blocked {
                    self.trigger_preemptive_block(ctx, new_score).await;
                }
            }
            Err(error) => {
                warn!(?error, ip = %ctx.ip, "Failed to record reputation incident");
            }
        }
    }

    async fn record_incident_inner(
        &self,
        ip: IpAddr,
        severity: AlertSeverity,
        alert_type: &str,
        auto_blocked: bool,
    ) -> Result<i32, LabgateError> {
        let now = Utc::now();
        let ip_str = ip.to_string();

        let db = self.db.lock().await;
        let backend = db.get_database_backend();
        let txn = db.begin().await?;

        let existing = IpReputation::Entity::find()
            .filter(IpReputation::Column::IpAddress.eq(&ip_str))
            .lock_for_update(backend)
            .one(&txn)
            .await?;

        let new_score = match existing {
            Some(rep) => {
                let hours_since_last = rep
                    .last_incident_at
                    .map(|t| (now - t).num_seconds() as f64 / 3600.0)
                    .unwrap_or(999.0);
                let escalation = escalation_multiplier(hours_since_last);
                let increase = incident_score(severity, auto_blocked, escalation);
                let new_score = (rep.score + increase).min(scoring::SCORE_MAX);
                let new_status = status_for_score(new_score);

                let mut metadata: ReputationMetadata =
                    serde_json::from_value(rep.metadata.clone()).unwrap_or_default();
                metadata.last_alert_type = Some(alert_type.to_owned());
                metadata.last_alert_severity = Some(severity.as_str().to_owned());
                metadata.last_alert_at = Some(now);
                metadata.alert_history.push(HistoryEntry {
                    alert_type: alert_type.to_owned(),
                    severity: severity.as_str().to_owned(),
                    score_increase: increase,
                    timestamp: now,
                });
                while metadata.alert_history.len() > ALERT_HISTORY_MAX {
                    metadata.alert_history.remove(0);
                }

                let model = IpReputation::ActiveModel {
                    id: Set(rep.id),
                    score: Set(new_score),
                    status: Set(new_status),
                    last_seen: Set(now),
                    last_incident_at: Set(Some(now)),
                    total_alerts: Set(rep.total_alerts + 1),
                    critical_alerts: Set(if severity == AlertSeverity::Critical {
                        rep.critical_alerts + 1
                    } else {
                        rep.critical_alerts
                    }),
                    auto_block_count: Set(if auto_blocked {
                        rep.auto_block_count + 1
                    } else {
                        rep.auto_block_count
                    }),
                    metadata: Set(serde_json::to_value(&metadata)?),
                    ..Default::default()
                };
                model.update(&txn).await?;
                new_score
            }
            None => {
                let score = incident_score(severity, auto_blocked, 1.0);
                let status = status_for_score(score);
                let metadata = ReputationMetadata {
                    first_alert_type: Some(alert_type.to_owned()),
                    first_alert_severity: Some(severity.as_str().to_owned()),
                    last_alert_type: Some(alert_type.to_owned()),
                    last_alert_severity: Some(severity.as_str().to_owned()),
                    last_alert_at: Some(now),
                    alert_history: vec![HistoryEntry {
                        alert_type: alert_type.to_owned(),
                        severity: severity.as_str().to_owned(),
                        score_increase: score,
                        timestamp: now,
                    }],
                };

                let model = IpReputation::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    ip_address: Set(ip_str.clone()),
                    score: Set(score),
                    status: Set(status),
                    first_seen: Set(now),
                    last_seen: Set(now),
                    last_incident_at: Set(Some(now)),
                    last_decay_at: Set(None),
                    total_alerts: Set(1),
                    critical_alerts: Set(if severity == AlertSeverity::Critical { 1 } else { 0 }),
                    auto_block_count: Set(if auto_blocked { 1 } else { 0 }),
                    metadata: Set(serde_json::to_value(&metadata)?),
                };
                model.insert(&txn).await?;
                score
            }
        };

        txn.commit().await?;
        drop(db);

        self.cache.write().await.insert(
            ip_str,
            CachedReputation {
                score: new_score,
                status: status_for_score(new_score),
            },
        );

        Ok(new_score)
    }

    /// Blocks an IP that crossed the score threshold before any single rule
    /// fired an auto-block for it.
    async fn trigger_preemptive_block(&self, ctx: &RequestContext, score: i32) {
        let multiplier = block_duration_multiplier(score);
        let duration_seconds = (PREEMPTIVE_BLOCK_BASE_SECONDS as f64 * multiplier) as i64;
        let blocked_until = Utc::now() + ChronoDuration::seconds(duration_seconds);
        let reason = format!("REPUTATION_BASED: score={score}");

        let result = {
            let db = self.db.lock().await;
            blocks::extend_block(&*db, &ctx.ip.to_string(), blocked_until, &reason, None).await
        };

        match result {
            Ok(()) => {
                info!(ip = %ctx.ip, score, duration_seconds, "Preemptive reputation block");
                self.audit
                    .record(
                        ctx,
                        AuditEntry::new(
                            AuditEventType::IpPreemptiveBlock,
                            EventSeverity::Warning,
                            EventStatus::Success,
                        )
                        .metadata(serde_json::json!({
                            "reputation_score": score,
                            "block_duration": duration_seconds,
                        })),
                    )
                    .await;
            }
            Err(error) => {
                warn!(?error, ip = %ctx.ip, "Failed to apply preemptive block");
            }
        }
    }

    pub async fn get(&self, ip: IpAddr) -> ReputationSummary {
        if ip.is_unspecified() {
            return ReputationSummary::default();
        }
        let ip_str = ip.to_string();

        if let Some(cached) = self.cache.read().await.get(&ip_str) {
            return ReputationSummary {
                score: cached.score,
                status: cached.status,
                block_multiplier: block_duration_multiplier(cached.score),
                rate_limit_multiplier: rate_limit_multiplier(cached.score),
            };
        }

        let result = {
            let db = self.db.lock().await;
            IpReputation::Entity::find()
                .filter(IpReputation::Column::IpAddress.eq(&ip_str))
                .one(&*db)
                .await
        };

        match result {
            Ok(Some(rep)) => {
                self.cache.write().await.insert(
                    ip_str,
                    CachedReputation {
                        score: rep.score,
                        status: rep.status,
                    },
                );
                ReputationSummary {
                    score: rep.score,
                    status: rep.status,
                    block_multiplier: block_duration_multiplier(rep.score),
                    rate_limit_multiplier: rate_limit_multiplier(rep.score),
                }
            }
            Ok(None) => ReputationSummary::default(),
            Err(error) => {
                warn!(?error, ip = %ip, "Failed to read reputation, assuming neutral");
                ReputationSummary::default()
            }
        }
    }

    /// Maintenance pass: reduce idle scores by 10% (at least one point).
    /// Invalidates the lookup cache so request paths see decayed values.
    pub async fn apply_decay(&self) -> Result<u64, LabgateError> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::hours(scoring::DECAY_INTERVAL_HOURS);

        let db = self.db.lock().await;
        let candidates = IpReputation::Entity::find()
            .filter(IpReputation::Column::Score.gte(scoring::MIN_SCORE_FOR_DECAY))
            .filter(IpReputation::Column::LastIncidentAt.lt(cutoff))
            .all(&*db)
            .await?;

        let mut decayed = 0u64;
        for rep in candidates {
            let decay_amount = ((rep.score as f64 * scoring::DECAY_RATE).ceil() as i32).max(1);
            let new_score = (rep.score - decay_amount).max(scoring::SCORE_MIN);
            let model = IpReputation::ActiveModel {
                id: Set(rep.id),
                score: Set(new_score),
                status: Set(status_for_score(new_score)),
                last_decay_at: Set(Some(now)),
                ..Default::default()
            };
            model.update(&*db).await?;
            decayed += 1;
        }
        drop(db);

        if decayed > 0 {
            self.cache.write().await.clear();
            info!(count = decayed, "Applied reputation decay");
        }
        Ok(decayed)
    }

    /// Purge long-idle rows that never amounted to anything.
    pub async fn cleanup_old(&self, retention: std::time::Duration) -> Result<u64, LabgateError> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(retention).map_err(|e| LabgateError::Anyhow(e.into()))?;

        let db = self.db.lock().await;
        let result = IpReputation::Entity::delete_many()
            .filter(IpReputation::Column::LastSeen.lt(cutoff))
            .filter(IpReputation::Column::Status.eq(ReputationStatus::Normal))
            .filter(IpReputation::Column::Score.lte(0))
            .filter(IpReputation::Column::TotalAlerts.lte(1))
            .exec(&*db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn top_malicious(&self, limit: u64) -> Result<Vec<IpReputation::Model>, LabgateError> {
        let db = self.db.lock().await;
        Ok(IpReputation::Entity::find()
            .filter(IpReputation::Column::Status.eq(ReputationStatus::Malicious))
            .order_by_desc(IpReputation::Column::Score)
            .order_by_desc(IpReputation::Column::LastIncidentAt)
            .limit(limit)
            .all(&*db)
            .await?)
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labgate_db_entities::BlockedIp;

    use crate::test_util::{ctx, stack, test_db};

    async fn reputation_row(
        db: &Arc<Mutex<DatabaseConnection>>,
        ip: &str,
    ) -> Option<IpReputation::Model> {
        let db = db.lock().await;
        IpReputation::Entity::find()
            .filter(IpReputation::Column::IpAddress.eq(ip))
            .one(&*db)
            .await
            .unwrap()
    }

    async fn age_last_incident(db: &Arc<Mutex<DatabaseConnection>>, ip: &str, hours: i64) {
        let rep = reputation_row(db, ip).await.unwrap();
        let db = db.lock().await;
        IpReputation::ActiveModel {
            id: Set(rep.id),
            last_incident_at: Set(Some(Utc::now() - ChronoDuration::hours(hours))),
            ..Default::default()
        }
        .update(&*db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_first_incident_creates_row() {
        let db = test_db().await;
        let stack = stack(&db);
        let ctx = ctx("203.0.113.40", "curl/8");

        stack
            .reputation
            .record_incident(&ctx, AlertSeverity::Critical, "Token abuse", false)
            .await;

        let rep = reputation_row(&db, "203.0.113.40").await.unwrap();
        assert_eq!(rep.score, 3);
        assert_eq!(rep.status, ReputationStatus::Normal);
        assert_eq!(rep.total_alerts, 1);
        assert_eq!(rep.critical_alerts, 1);
    }

    #[tokio::test]
    async fn test_spaced_warnings_stay_unblocked() {
        let db = test_db().await;
        let stack = stack(&db);
        let ctx = ctx("203.0.113.41", "curl/8");

        for _ in 0..3 {
            stack
                .reputation
                .record_incident(&ctx, AlertSeverity::Warning, "Slow probing", false)
                .await;
            age_last_incident(&db, "203.0.113.41", 25).await;
            stack.reputation.clear_cache().await;
        }

        let rep = reputation_row(&db, "203.0.113.41").await.unwrap();
        assert_eq!(rep.score, 3);

        let blocked = {
            let db = db.lock().await;
            BlockedIp::Entity::find().all(&*db).await.unwrap()
        };
        assert!(blocked.is_empty());
    }

    #[tokio::test]
    async fn test_rapid_criticals_trigger_preemptive_block() {
        let db = test_db().await;
        let stack = stack(&db);
        let ctx = ctx("203.0.113.42", "curl/8");

        // Back-to-back criticals compound: 3, +9, +9, +9 = 30
        for _ in 0..4 {
            stack
                .reputation
                .record_incident(&ctx, AlertSeverity::Critical, "Burst", false)
                .await;
        }

        let rep = reputation_row(&db, "203.0.113.42").await.unwrap();
        assert!(rep.score >= scoring::THRESHOLD_AUTO_BLOCK);

        let block = {
            let db = db.lock().await;
            BlockedIp::Entity::find()
                .filter(BlockedIp::Column::IpAddress.eq("203.0.113.42"))
                .one(&*db)
                .await
                .unwrap()
        };
        let block = block.expect("preemptive block row");
        assert!(block.reason.starts_with("REPUTATION_BASED"));
        assert!(block.blocked_until > Utc::now());
    }

    #[tokio::test]
    async fn test_decay_reduces_idle_scores() {
        let db = test_db().await;
        let stack = stack(&db);
        let ctx = ctx("203.0.113.43", "curl/8");

        // Build up a score, then make the IP idle
        for _ in 0..3 {
            stack
                .reputation
                .record_incident(&ctx, AlertSeverity::Critical, "Burst", true)
                .await;
        }
        let before = reputation_row(&db, "203.0.113.43").await.unwrap();
        age_last_incident(&db, "203.0.113.43", 25).await;

        let decayed = stack.reputation.apply_decay().await.unwrap();
        assert_eq!(decayed, 1);

        let after = reputation_row(&db, "203.0.113.43").await.unwrap();
        let expected = before.score - ((before.score as f64 * 0.1).ceil() as i32).max(1);
        assert_eq!(after.score, expected);
        assert_eq!(after.status, status_for_score(after.score));
        assert!(after.last_decay_at.is_some());

        // Cache was invalidated: lookups see the decayed score
        assert_eq!(stack.reputation.get(ctx.ip).await.score, after.score);
    }

    #[tokio::test]
    async fn test_get_returns_multipliers_for_known_ip() {
        let db = test_db().await;
        let stack = stack(&db);
        let ctx = ctx("203.0.113.44", "curl/8");

        stack
            .reputation
            .record_incident(&ctx, AlertSeverity::Critical, "Burst", true)
            .await;

        let summary = stack.reputation.get(ctx.ip).await;
        assert_eq!(summary.score, 8);
        assert_eq!(summary.block_multiplier, 1.0);
        assert_eq!(summary.rate_limit_multiplier, 1.0);

        let unknown = stack.reputation.get("198.51.100.99".parse().unwrap()).await;
        assert_eq!(unknown.score, 0);
        assert_eq!(unknown.rate_limit_multiplier, 1.0);
    }
}
