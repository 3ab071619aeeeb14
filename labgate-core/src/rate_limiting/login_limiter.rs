use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use labgate_common::{LabgateError, SecurityConfig};
use labgate_db_entities::LoginAttempt;

use crate::db::LockForUpdate;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginGate {
    Allowed,
    Blocked { retry_after: Duration },
}

/// Sliding-window login lockout per (ip, username). Five failures inside
/// ten minutes set a ten-minute block; while blocked, every attempt is
/// rejected no matter what credentials it carries.
pub struct LoginRateLimiter {
    db: Arc<Mutex<DatabaseConnection>>,
    max_attempts: u32,
    window: Duration,
    block_duration: Duration,
}

impl LoginRateLimiter {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>, config: &SecurityConfig) -> Self {
        Self {
            db,
            max_attempts: config.login_max_attempts,
            window: config.login_window,
            block_duration: config.login_block_duration,
        }
    }

    /// Gate called before credentials are even looked at. Fails open on
    /// storage errors.
    pub async fn check(&self, ip: IpAddr, username: &str) -> LoginGate {
        match self.check_inner(ip, username).await {
            Ok(gate) => gate,
            Err(error) => {
                warn!(?error, "Login limiter storage error, failing open");
                LoginGate::Allowed
            }
        }
    }

    async fn check_inner(&self, ip: IpAddr, username: &str) -> Result<LoginGate, LabgateError> {
        let now = Utc::now();

        let db = self.db.lock().await;
        let backend = db.get_database_backend();
        let txn = db.begin().await?;

        let record = LoginAttempt::Entity::find()
            .filter(LoginAttempt::Column::IpAddress.eq(ip.to_string()))
            .filter(LoginAttempt::Column::Username.eq(username))
            .lock_for_update(backend)
            .one(&txn)
            .await?;

        let Some(record) = record else {
            txn.commit().await?;
            return Ok(LoginGate::Allowed);
        };

        if let Some(blocked_until) = record.blocked_until {
            if blocked_until > now {
                txn.rollback().await?;
                let retry_after = (blocked_until - now).to_std().unwrap_or(self.block_duration);
                return Ok(LoginGate::Blocked { retry_after });
            }
        }

        let window =
            chrono::Duration::from_std(self.window).map_err(|e| LabgateError::Anyhow(e.into()))?;
        if record.last_attempt >= now - window && record.attempts >= self.max_attempts as i32 {
            let blocked_until = now
                + chrono::Duration::from_std(self.block_duration)
                    .map_err(|e| LabgateError::Anyhow(e.into()))?;
            LoginAttempt::ActiveModel {
                id: Set(record.id),
                blocked_until: Set(Some(blocked_until)),
                ..Default::default()
            }
            .update(&txn)
            .await?;
            txn.commit().await?;

            info!(%ip, username, "Login attempts exceeded, block set");
            return Ok(LoginGate::Blocked {
                retry_after: self.block_duration,
            });
        }

        txn.commit().await?;
        Ok(LoginGate::Allowed)
    }

    /// Record a failed attempt. The counter restarts at 1 for failures
    /// outside the window; reaching the limit sets the block immediately.
    pub async fn record_failure(&self, ip: IpAddr, username: &str) {
        if let Err(error) = self.record_failure_inner(ip, username).await {
            warn!(?error, "Failed to record login attempt");
        }
    }

    async fn record_failure_inner(&self, ip: IpAddr, username: &str) -> Result<(), LabgateError> {
        let now = Utc::now();
        let window =
            chrono::Duration::from_std(self.window).map_err(|e| LabgateError::Anyhow(e.into()))?;

        let db = self.db.lock().await;
        let backend = db.get_database_backend();
        let txn = db.begin().await?;

        let record = LoginAttempt::Entity::find()
            .filter(LoginAttempt::Column::IpAddress.eq(ip.to_string()))
            .filter(LoginAttempt::Column::Username.eq(username))
            .lock_for_update(backend)
            .one(&txn)
            .await?;

        match record {
            Some(record) => {
                let attempts = if record.last_attempt >= now - window {
                    record.attempts + 1
                } else {
                    1
                };
                let blocked_until = if attempts >= self.max_attempts as i32 {
                    Some(
                        now + chrono::Duration::from_std(self.block_duration)
                            .map_err(|e| LabgateError::Anyhow(e.into()))?,
                    )
                } else {
                    None
                };
                LoginAttempt::ActiveModel {
                    id: Set(record.id),
                    attempts: Set(attempts),
                    last_attempt: Set(now),
                    blocked_until: Set(blocked_until),
                    ..Default::default()
                }
                .update(&txn)
                .await?;
            }
            None => {
                LoginAttempt::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    ip_address: Set(ip.to_string()),
                    username: Set(username.to_owned()),
                    attempts: Set(1),
                    last_attempt: Set(now),
                    blocked_until: Set(None),
                }
                .insert(&txn)
                .await?;
            }
        }

        txn.commit().await?;
        Ok(())
    }

    /// A successful login clears the attempt record for the pair entirely.
    pub async fn reset(&self, ip: IpAddr, username: &str) {
        let result: Result<(), LabgateError> = async {
            let db = self.db.lock().await;
            LoginAttempt::Entity::delete_many()
                .filter(LoginAttempt::Column::IpAddress.eq(ip.to_string()))
                .filter(LoginAttempt::Column::Username.eq(username))
                .exec(&*db)
                .await?;
            Ok(())
        }
        .await;

        if let Err(error) = result {
            warn!(?error, "Failed to reset login attempts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_db;

    fn limiter(db: &Arc<Mutex<DatabaseConnection>>) -> LoginRateLimiter {
        let config = labgate_common::SecurityConfig::default();
        LoginRateLimiter::new(db.clone(), &config)
    }

    #[tokio::test]
    async fn test_exactly_five_failures_set_a_block() {
        let db = test_db().await;
        let limiter = limiter(&db);
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        for _ in 0..4 {
            limiter.record_failure(ip, "budi").await;
            assert_eq!(limiter.check(ip, "budi").await, LoginGate::Allowed);
        }

        limiter.record_failure(ip, "budi").await;
        let gate = limiter.check(ip, "budi").await;
        let LoginGate::Blocked { retry_after } = gate else {
            panic!("expected block after fifth failure");
        };
        assert!(retry_after <= Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_block_is_per_ip_username_pair() {
        let db = test_db().await;
        let limiter = limiter(&db);
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        for _ in 0..5 {
            limiter.record_failure(ip, "budi").await;
        }
        assert!(matches!(
            limiter.check(ip, "budi").await,
            LoginGate::Blocked { .. }
        ));
        assert_eq!(limiter.check(ip, "siti").await, LoginGate::Allowed);

        let other_ip: IpAddr = "198.51.100.1".parse().unwrap();
        assert_eq!(limiter.check(other_ip, "budi").await, LoginGate::Allowed);
    }

    #[tokio::test]
    async fn test_reset_clears_the_counter() {
        let db = test_db().await;
        let limiter = limiter(&db);
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        for _ in 0..5 {
            limiter.record_failure(ip, "budi").await;
        }
        limiter.reset(ip, "budi").await;
        assert_eq!(limiter.check(ip, "budi").await, LoginGate::Allowed);

        // Post-reset failures start counting from one again
        limiter.record_failure(ip, "budi").await;
        assert_eq!(limiter.check(ip, "budi").await, LoginGate::Allowed);
    }

    #[tokio::test]
    async fn test_stale_window_restarts_counter() {
        let db = test_db().await;
        let limiter = limiter(&db);
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        for _ in 0..4 {
            limiter.record_failure(ip, "budi").await;
        }

        // Age the record past the sliding window
        {
            let db = db.lock().await;
            let record = LoginAttempt::Entity::find()
                .filter(LoginAttempt::Column::Username.eq("budi"))
                .one(&*db)
                .await
                .unwrap()
                .unwrap();
            LoginAttempt::ActiveModel {
                id: Set(record.id),
                last_attempt: Set(Utc::now() - chrono::Duration::minutes(11)),
                ..Default::default()
            }
            .update(&*db)
            .await
            .unwrap();
        }

        limiter.record_failure(ip, "budi").await;
        let record = {
            let db = db.lock().await;
            LoginAttempt::Entity::find()
                .filter(LoginAttempt::Column::Username.eq("budi"))
                .one(&*db)
                .await
                .unwrap()
                .unwrap()
        };
        assert_eq!(record.attempts, 1);
        assert!(record.blocked_until.is_none());
    }
}
