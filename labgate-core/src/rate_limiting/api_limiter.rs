use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use labgate_common::{LabgateError, SecurityConfig};
use labgate_db_entities::RateLimitCounter::{self, IdentifierKind};
use labgate_db_entities::ApiToken;

use super::fixed_window_start;
use crate::audit::{AuditLogger, RequestContext};
use crate::db::LockForUpdate;
use crate::reputation::ReputationEngine;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Per-endpoint fixed-window admission control over the shared store.
///
/// The identity is the live token digest when one is presented, the client
/// IP otherwise; authenticated traffic gets double the unauthenticated
/// allowance. Counting and the threshold check share one transaction so
/// concurrent requests from the same identity cannot slip past the limit.
/// Storage failures fail open.
pub struct ApiRateLimiter {
    db: Arc<Mutex<DatabaseConnection>>,
    audit: Arc<AuditLogger>,
    reputation: Arc<ReputationEngine>,
    limit_unauthenticated: u32,
    limit_authenticated: u32,
    window: Duration,
}

impl ApiRateLimiter {
    pub fn new(
        db: Arc<Mutex<DatabaseConnection>>,
        audit: Arc<AuditLogger>,
        reputation: Arc<ReputationEngine>,
        config: &SecurityConfig,
    ) -> Self {
        Self {
            db,
            audit,
            reputation,
            limit_unauthenticated: config.api_limit_unauthenticated,
            limit_authenticated: config.api_limit_authenticated,
            window: config.api_window,
        }
    }

    pub async fn check(
        &self,
        ctx: &RequestContext,
        token_hash: Option<&str>,
    ) -> RateLimitDecision {
        let authenticated = match token_hash {
            Some(hash) => self.token_is_live(hash).await,
            None => false,
        };

        let (identifier, identifier_kind, base_limit) = match token_hash {
            Some(hash) if authenticated => {
                (hash.to_owned(), IdentifierKind::Token, self.limit_authenticated)
            }
            _ => (
                ctx.ip.to_string(),
                IdentifierKind::Ip,
                self.limit_unauthenticated,
            ),
        };

        // Known-bad IPs get their effective allowance divided down; the
        // window itself never changes.
        let multiplier = self.reputation.get(ctx.ip).await.rate_limit_multiplier;
        let limit = ((base_limit as f64 / multiplier).floor() as i32).max(1);

        let decision = self
            .count_and_check(&identifier, identifier_kind, &ctx.endpoint, limit)
            .await;

        match decision {
            Ok(RateLimitDecision::Limited { retry_after }) => {
                let kind = match identifier_kind {
                    IdentifierKind::Ip => "ip",
                    IdentifierKind::Token => "token",
                };
                self.audit.rate_limit_hit(ctx, &identifier, kind).await;
                RateLimitDecision::Limited { retry_after }
            }
            Ok(RateLimitDecision::Allowed) => {
                if authenticated {
                    // Secondary bookkeeping so IP-level limits still apply as
                    // a fallback for authenticated traffic.
                    if let Err(error) = self.track_ip_fallback(ctx).await {
                        warn!(?error, "IP fallback tracking failed");
                    }
                }
                RateLimitDecision::Allowed
            }
            Err(error) => {
                warn!(?error, "Rate limiter storage error, failing open");
                RateLimitDecision::Allowed
            }
        }
    }

    async fn token_is_live(&self, token_hash: &str) -> bool {
        let result = {
            let db = self.db.lock().await;
            ApiToken::Entity::find()
                .filter(ApiToken::Column::TokenHash.eq(token_hash))
                .filter(ApiToken::Column::Expiry.gt(Utc::now()))
                .one(&*db)
                .await
        };
        match result {
            Ok(found) => found.is_some(),
            Err(error) => {
                warn!(?error, "Token lookup failed during rate limiting");
                false
            }
        }
    }

    async fn count_and_check(
        &self,
        identifier: &str,
        identifier_kind: IdentifierKind,
        endpoint: &str,
        limit: i32,
    ) -> Result<RateLimitDecision, LabgateError> {
        let now = Utc::now();
        let window_start = fixed_window_start(now, self.window);

        let db = self.db.lock().await;
        let backend = db.get_database_backend();
        let txn = db.begin().await?;

        let record = RateLimitCounter::Entity::find()
            .filter(RateLimitCounter::Column::Identifier.eq(identifier))
            .filter(RateLimitCounter::Column::IdentifierKind.eq(identifier_kind))
            .filter(RateLimitCounter::Column::Endpoint.eq(endpoint))
            .lock_for_update(backend)
            .one(&txn)
            .await?;

        match record {
            Some(record) if record.window_start == window_start => {
                let request_count = record.request_count + 1;
                if request_count > limit {
                    txn.rollback().await?;
                    let window_end = window_start
                        + chrono::Duration::from_std(self.window)
                            .map_err(|e| LabgateError::Anyhow(e.into()))?;
                    let retry_after = (window_end - now)
                        .to_std()
                        .unwrap_or(self.window);
                    return Ok(RateLimitDecision::Limited { retry_after });
                }
                RateLimitCounter::ActiveModel {
                    id: Set(record.id),
                    request_count: Set(request_count),
                    last_request: Set(now),
                    ..Default::default()
                }
                .update(&txn)
                .await?;
            }
            Some(record) => {
                // New window: counter restarts at 1
                RateLimitCounter::ActiveModel {
                    id: Set(record.id),
                    request_count: Set(1),
                    window_start: Set(window_start),
                    last_request: Set(now),
                    ..Default::default()
                }
                .update(&txn)
                .await?;
            }
            None => {
                RateLimitCounter::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    identifier: Set(identifier.to_owned()),
                    identifier_kind: Set(identifier_kind),
                    endpoint: Set(endpoint.to_owned()),
                    window_start: Set(window_start),
                    request_count: Set(1),
                    last_request: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        txn.commit().await?;
        Ok(RateLimitDecision::Allowed)
    }

    async fn track_ip_fallback(&self, ctx: &RequestContext) -> Result<(), LabgateError> {
        let now = Utc::now();
        let window_start = fixed_window_start(now, self.window);
        let ip = ctx.ip.to_string();

        let db = self.db.lock().await;
        let backend = db.get_database_backend();
        let txn = db.begin().await?;

        let record = RateLimitCounter::Entity::find()
            .filter(RateLimitCounter::Column::Identifier.eq(&ip))
            .filter(RateLimitCounter::Column::IdentifierKind.eq(IdentifierKind::Ip))
            .filter(RateLimitCounter::Column::Endpoint.eq(&ctx.endpoint))
            .lock_for_update(backend)
            .one(&txn)
            .await?;

        match record {
            Some(record) if record.window_start == window_start => {
                RateLimitCounter::ActiveModel {
                    id: Set(record.id),
                    request_count: Set(record.request_count + 1),
                    last_request: Set(now),
                    ..Default::default()
                }
                .update(&txn)
                .await?;
            }
            Some(record) => {
                RateLimitCounter::ActiveModel {
                    id: Set(record.id),
                    request_count: Set(1),
                    window_start: Set(window_start),
                    last_request: Set(now),
                    ..Default::default()
                }
                .update(&txn)
                .await?;
            }
            None => {
                RateLimitCounter::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    identifier: Set(ip),
                    identifier_kind: Set(IdentifierKind::Ip),
                    endpoint: Set(ctx.endpoint.clone()),
                    window_start: Set(window_start),
                    request_count: Set(1),
                    last_request: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        txn.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labgate_common::helpers::hash::{generate_token_secret, token_digest};
    use labgate_db_entities::User::UserRole;

    use crate::test_util::{ctx, insert_user, stack, test_db};

    fn limiter_with_limits(
        db: &Arc<Mutex<DatabaseConnection>>,
        unauthenticated: u32,
    ) -> ApiRateLimiter {
        let stack = stack(db);
        let mut config = labgate_common::SecurityConfig::default();
        config.api_limit_unauthenticated = unauthenticated;
        config.api_limit_authenticated = unauthenticated * 2;
        ApiRateLimiter::new(db.clone(), stack.audit, stack.reputation, &config)
    }

    #[tokio::test]
    async fn test_limit_exceeded_returns_retry_after_within_window() {
        let db = test_db().await;
        let limiter = limiter_with_limits(&db, 3);
        let ctx = ctx("203.0.113.77", "curl/8");

        for _ in 0..3 {
            assert_eq!(
                limiter.check(&ctx, None).await,
                RateLimitDecision::Allowed
            );
        }

        let RateLimitDecision::Limited { retry_after } = limiter.check(&ctx, None).await else {
            panic!("expected fourth request to be limited");
        };
        assert!(retry_after <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_new_window_resets_the_counter() {
        let db = test_db().await;
        let limiter = limiter_with_limits(&db, 2);
        let ctx = ctx("203.0.113.77", "curl/8");

        for _ in 0..2 {
            assert_eq!(limiter.check(&ctx, None).await, RateLimitDecision::Allowed);
        }
        assert!(matches!(
            limiter.check(&ctx, None).await,
            RateLimitDecision::Limited { .. }
        ));

        // Age the counter row into the previous window
        {
            let db = db.lock().await;
            let record = RateLimitCounter::Entity::find()
                .filter(RateLimitCounter::Column::Identifier.eq("203.0.113.77"))
                .one(&*db)
                .await
                .unwrap()
                .unwrap();
            RateLimitCounter::ActiveModel {
                id: Set(record.id),
                window_start: Set(record.window_start - chrono::Duration::seconds(60)),
                ..Default::default()
            }
            .update(&*db)
            .await
            .unwrap();
        }

        assert_eq!(limiter.check(&ctx, None).await, RateLimitDecision::Allowed);
    }

    #[tokio::test]
    async fn test_token_identity_doubles_the_limit_and_tracks_ip() {
        let db = test_db().await;
        let limiter = limiter_with_limits(&db, 2);
        let ctx = ctx("203.0.113.77", "curl/8");

        let user = insert_user(&db, "budi", UserRole::User).await;
        let secret = generate_token_secret();
        let digest = token_digest(secret.expose_secret());
        {
            let db = db.lock().await;
            ApiToken::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user.id),
                token_hash: Set(digest.clone()),
                created: Set(Utc::now()),
                expiry: Set(Utc::now() + chrono::Duration::days(30)),
                last_ip: Set(None),
                last_user_agent: Set(None),
                last_used: Set(None),
                revoked_at: Set(None),
                revoked_reason: Set(None),
            }
            .insert(&*db)
            .await
            .unwrap();
        }

        for _ in 0..4 {
            assert_eq!(
                limiter.check(&ctx, Some(&digest)).await,
                RateLimitDecision::Allowed
            );
        }
        assert!(matches!(
            limiter.check(&ctx, Some(&digest)).await,
            RateLimitDecision::Limited { .. }
        ));

        // The underlying IP was tracked alongside the token identity
        let ip_row = {
            let db = db.lock().await;
            RateLimitCounter::Entity::find()
                .filter(RateLimitCounter::Column::Identifier.eq("203.0.113.77"))
                .filter(RateLimitCounter::Column::IdentifierKind.eq(IdentifierKind::Ip))
                .one(&*db)
                .await
                .unwrap()
        };
        assert_eq!(ip_row.map(|r| r.request_count), Some(4));
    }

    #[tokio::test]
    async fn test_unknown_token_falls_back_to_ip_identity() {
        let db = test_db().await;
        let limiter = limiter_with_limits(&db, 2);
        let ctx = ctx("203.0.113.77", "curl/8");

        let bogus = "f".repeat(64);
        for _ in 0..2 {
            assert_eq!(
                limiter.check(&ctx, Some(&bogus)).await,
                RateLimitDecision::Allowed
            );
        }
        assert!(matches!(
            limiter.check(&ctx, Some(&bogus)).await,
            RateLimitDecision::Limited { .. }
        ));
    }
}
