use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use labgate_common::helpers::hash::{generate_token_secret, token_digest};
use labgate_common::helpers::net::same_subnet;
use labgate_common::{LabgateError, Secret, SecurityConfig};
use labgate_db_entities::User::{self, UserRole};
use labgate_db_entities::ApiToken;

use crate::alerts::{event_kind, AlertEngine, SecurityEvent};
use crate::audit::{AuditLogger, RequestContext};
use crate::consts::{
    REVOKE_REASON_IP_MISMATCH, REVOKE_REASON_LOGOUT, REVOKE_REASON_UA_MISMATCH,
    SESSION_EXPIRED_MESSAGE, TOKEN_PLAINTEXT_LEN,
};
use crate::db::LockForUpdate;

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("access denied")]
    Forbidden { required: Vec<UserRole> },
    /// Identity cannot be assumed under storage failure: fail closed.
    #[error(transparent)]
    Storage(#[from] LabgateError),
}

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user: User::Model,
    pub token: ApiToken::Model,
}

enum Outcome {
    Valid {
        user: User::Model,
        token: ApiToken::Model,
    },
    NotFound,
    Revoked {
        user_id: Uuid,
        reason: String,
    },
    BindingViolation {
        user_id: Uuid,
        reason: &'static str,
    },
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
/// The scheme is matched case-insensitively.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, rest) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

/// Tokens are exactly 64 hex characters; anything else is rejected before
/// touching the store.
pub fn is_token_format(token: &str) -> bool {
    token.len() == TOKEN_PLAINTEXT_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Bearer-token authentication with session binding.
///
/// A token is bound to the user agent and the network prefix (/24 or /64)
/// observed on its first validated use; any later mismatch revokes it on
/// the spot and rejects the request that exposed the mismatch.
pub struct TokenAuthGuard {
    db: Arc<Mutex<DatabaseConnection>>,
    audit: Arc<AuditLogger>,
    alerts: Arc<AlertEngine>,
    token_ttl: Duration,
}

impl TokenAuthGuard {
    pub fn new(
        db: Arc<Mutex<DatabaseConnection>>,
        audit: Arc<AuditLogger>,
        alerts: Arc<AlertEngine>,
        config: &SecurityConfig,
    ) -> Self {
        Self {
            db,
            audit,
            alerts,
            token_ttl: config.token_ttl,
        }
    }

    pub async fn validate(
        &self,
        authorization: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<AuthenticatedUser, AuthError> {
        let Some(header) = authorization else {
            self.audit
                .unauthorized(ctx, "Authorization header missing")
                .await;
            return Err(AuthError::Unauthorized("Authorization header missing"));
        };

        let Some(token) = parse_bearer(header) else {
            self.audit
                .unauthorized(ctx, "Invalid authorization format")
                .await;
            return Err(AuthError::Unauthorized("Invalid authorization format"));
        };

        if !is_token_format(token) {
            self.audit.unauthorized(ctx, "Invalid token format").await;
            return Err(AuthError::Unauthorized("Invalid token format"));
        }

        let digest = token_digest(token);

        let outcome = match self.validate_in_store(&digest, ctx).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.audit.db_error(ctx, &error.to_string()).await;
                return Err(AuthError::Storage(error));
            }
        };

        match outcome {
            Outcome::Valid { user, token } => Ok(AuthenticatedUser { user, token }),
            Outcome::NotFound => {
                self.audit
                    .unauthorized(ctx, "Invalid or expired token")
                    .await;
                self.alerts
                    .check(
                        ctx,
                        &SecurityEvent::new(event_kind::TOKEN_INVALID).token_hash(digest),
                    )
                    .await;
                Err(AuthError::Unauthorized("Invalid or expired token"))
            }
            Outcome::Revoked { user_id, reason } => {
                self.audit
                    .token_revoked(ctx, user_id, &reason, &digest)
                    .await;
                Err(AuthError::Unauthorized(SESSION_EXPIRED_MESSAGE))
            }
            Outcome::BindingViolation { user_id, reason } => {
                self.audit.token_replay(ctx, user_id, reason).await;
                self.alerts
                    .check(
                        ctx,
                        &SecurityEvent::new(event_kind::TOKEN_MULTI_IP)
                            .token_hash(digest)
                            .user(user_id),
                    )
                    .await;
                Err(AuthError::Unauthorized(SESSION_EXPIRED_MESSAGE))
            }
        }
    }

    pub async fn require_role(
        &self,
        authorization: Option<&str>,
        ctx: &RequestContext,
        allowed: &[UserRole],
    ) -> Result<AuthenticatedUser, AuthError> {
        let auth = self.validate(authorization, ctx).await?;

        if !allowed.is_empty() && !allowed.contains(&auth.user.role) {
            let required = allowed
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            self.audit.forbidden(ctx, auth.user.id, &required).await;
            self.alerts
                .check(
                    ctx,
                    &SecurityEvent::new(event_kind::REPEATED_403)
                        .token_hash(auth.token.token_hash.clone())
                        .user(auth.user.id),
                )
                .await;
            return Err(AuthError::Forbidden {
                required: allowed.to_vec(),
            });
        }

        Ok(auth)
    }

    async fn validate_in_store(
        &self,
        digest: &str,
        ctx: &RequestContext,
    ) -> Result<Outcome, LabgateError> {
        let now = Utc::now();

        let db = self.db.lock().await;
        let backend = db.get_database_backend();
        let txn = db.begin().await?;

        let token = ApiToken::Entity::find()
            .filter(ApiToken::Column::TokenHash.eq(digest))
            .filter(ApiToken::Column::Expiry.gt(now))
            .lock_for_update(backend)
            .one(&txn)
            .await?;

        let Some(token) = token else {
            txn.rollback().await?;
            return Ok(Outcome::NotFound);
        };

        if token.is_revoked() {
            txn.rollback().await?;
            let reason = token
                .revoked_reason
                .clone()
                .unwrap_or_else(|| "revoked".into());
            return Ok(Outcome::Revoked {
                user_id: token.user_id,
                reason,
            });
        }

        // Session binding: exact user-agent match once recorded
        if let Some(prev_ua) = &token.last_user_agent {
            if *prev_ua != ctx.user_agent {
                return self
                    .revoke_in_txn(txn, &token, REVOKE_REASON_UA_MISMATCH)
                    .await;
            }
        }

        // Session binding: same /24 (IPv4) or /64 (IPv6) as last seen
        if let Some(prev_ip) = &token.last_ip {
            let matches = prev_ip
                .parse::<IpAddr>()
                .map(|prev| same_subnet(prev, ctx.ip))
                .unwrap_or(false);
            if !matches {
                return self
                    .revoke_in_txn(txn, &token, REVOKE_REASON_IP_MISMATCH)
                    .await;
            }
        }

        let user = token
            .find_related(User::Entity)
            .one(&txn)
            .await?
            .ok_or(LabgateError::InconsistentState)?;

        let token = ApiToken::ActiveModel {
            id: Set(token.id),
            last_ip: Set(Some(ctx.ip.to_string())),
            last_user_agent: Set(Some(ctx.user_agent.clone())),
            last_used: Set(Some(now)),
            ..Default::default()
        }
        .update(&txn)
        .await?;

        txn.commit().await?;
        Ok(Outcome::Valid { user, token })
    }

    /// The revocation commits on its own so the token stays dead even
    /// though the current request is rejected.
    async fn revoke_in_txn(
        &self,
        txn: sea_orm::DatabaseTransaction,
        token: &ApiToken::Model,
        reason: &'static str,
    ) -> Result<Outcome, LabgateError> {
        ApiToken::ActiveModel {
            id: Set(token.id),
            revoked_at: Set(Some(Utc::now())),
            revoked_reason: Set(Some(reason.to_owned())),
            ..Default::default()
        }
        .update(&txn)
        .await?;
        txn.commit().await?;

        warn!(user_id = %token.user_id, reason, "Token revoked by session binding check");
        Ok(Outcome::BindingViolation {
            user_id: token.user_id,
            reason,
        })
    }

    /// Create a token at login. Binding fields start empty and are recorded
    /// on the first validated use.
    pub async fn issue_token(
        &self,
        ctx: &RequestContext,
        user: &User::Model,
    ) -> Result<Secret<String>, LabgateError> {
        let secret = generate_token_secret();
        let digest = token_digest(secret.expose_secret());
        let now = Utc::now();
        let expiry =
            now + chrono::Duration::from_std(self.token_ttl)
                .map_err(|e| LabgateError::Anyhow(e.into()))?;

        let model = ApiToken::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            token_hash: Set(digest.clone()),
            created: Set(now),
            expiry: Set(expiry),
            last_ip: Set(None),
            last_user_agent: Set(None),
            last_used: Set(None),
            revoked_at: Set(None),
            revoked_reason: Set(None),
        };
        {
            let db = self.db.lock().await;
            model.insert(&*db).await?;
        }

        self.audit.token_created(ctx, user.id, &digest).await;
        info!(user_id = %user.id, "Issued API token");
        Ok(secret)
    }

    pub async fn revoke_for_logout(
        &self,
        ctx: &RequestContext,
        auth: &AuthenticatedUser,
    ) -> Result<(), LabgateError> {
        {
            let db = self.db.lock().await;
            ApiToken::ActiveModel {
                id: Set(auth.token.id),
                revoked_at: Set(Some(Utc::now())),
                revoked_reason: Set(Some(REVOKE_REASON_LOGOUT.to_owned())),
                ..Default::default()
            }
            .update(&*db)
            .await?;
        }

        self.audit
            .logout(ctx, auth.user.id, &auth.token.token_hash)
            .await;
        Ok(())
    }

    /// Revoke every live token a user holds, e.g. after a password change.
    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        reason: &str,
    ) -> Result<u64, LabgateError> {
        let db = self.db.lock().await;
        let result = ApiToken::Entity::update_many()
            .col_expr(ApiToken::Column::RevokedAt, Expr::value(Utc::now()))
            .col_expr(ApiToken::Column::RevokedReason, Expr::value(reason))
            .filter(ApiToken::Column::UserId.eq(user_id))
            .filter(ApiToken::Column::RevokedAt.is_null())
            .exec(&*db)
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_case_insensitive() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("BEARER abc"), Some("abc"));
        assert_eq!(parse_bearer("  Bearer   abc  "), Some("abc"));
    }

    #[test]
    fn test_parse_bearer_rejects_other_schemes() {
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer(""), None);
    }

    #[test]
    fn test_token_format() {
        let valid = "a".repeat(64);
        assert!(is_token_format(&valid));
        assert!(!is_token_format(&"a".repeat(63)));
        assert!(!is_token_format(&"a".repeat(65)));
        assert!(!is_token_format(&format!("{}g", "a".repeat(63))));
    }

    use crate::test_util::{ctx, insert_user, stack, test_db};

    async fn guard_with_user() -> (
        Arc<Mutex<DatabaseConnection>>,
        TokenAuthGuard,
        User::Model,
    ) {
        let db = test_db().await;
        let stack = stack(&db);
        let guard = TokenAuthGuard::new(
            db.clone(),
            stack.audit.clone(),
            stack.alerts.clone(),
            &SecurityConfig::default(),
        );
        let user = insert_user(&db, "budi", UserRole::User).await;
        (db, guard, user)
    }

    fn bearer(secret: &Secret<String>) -> String {
        format!("Bearer {}", secret.expose_secret())
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let (_db, guard, user) = guard_with_user().await;
        let ctx = ctx("203.0.113.10", "curl/8");

        let secret = guard.issue_token(&ctx, &user).await.unwrap();
        let auth = guard.validate(Some(&bearer(&secret)), &ctx).await.unwrap();
        assert_eq!(auth.user.id, user.id);
        assert_eq!(auth.token.last_user_agent.as_deref(), Some("curl/8"));
    }

    #[tokio::test]
    async fn test_bit_flipped_token_rejected() {
        let (_db, guard, user) = guard_with_user().await;
        let ctx = ctx("203.0.113.10", "curl/8");

        let secret = guard.issue_token(&ctx, &user).await.unwrap();
        let mut flipped = secret.expose_secret().clone();
        let head = if flipped.starts_with('0') { "1" } else { "0" };
        flipped.replace_range(0..1, head);

        let result = guard
            .validate(Some(&format!("Bearer {flipped}")), &ctx)
            .await;
        assert!(matches!(
            result,
            Err(AuthError::Unauthorized("Invalid or expired token"))
        ));
    }

    #[tokio::test]
    async fn test_validate_after_logout_revocation() {
        let (_db, guard, user) = guard_with_user().await;
        let ctx = ctx("203.0.113.10", "curl/8");

        let secret = guard.issue_token(&ctx, &user).await.unwrap();
        let auth = guard.validate(Some(&bearer(&secret)), &ctx).await.unwrap();
        guard.revoke_for_logout(&ctx, &auth).await.unwrap();

        let result = guard.validate(Some(&bearer(&secret)), &ctx).await;
        assert!(matches!(
            result,
            Err(AuthError::Unauthorized(SESSION_EXPIRED_MESSAGE))
        ));
    }

    #[tokio::test]
    async fn test_user_agent_mismatch_revokes_immediately() {
        let (db, guard, user) = guard_with_user().await;
        let first_use = ctx("203.0.113.10", "firefox");

        let secret = guard.issue_token(&first_use, &user).await.unwrap();
        guard
            .validate(Some(&bearer(&secret)), &first_use)
            .await
            .unwrap();

        // Same origin, different user agent: rejected and revoked
        let replay = ctx("203.0.113.10", "curl/8");
        let result = guard.validate(Some(&bearer(&secret)), &replay).await;
        assert!(matches!(
            result,
            Err(AuthError::Unauthorized(SESSION_EXPIRED_MESSAGE))
        ));

        let stored = {
            let db = db.lock().await;
            ApiToken::Entity::find()
                .filter(ApiToken::Column::UserId.eq(user.id))
                .one(&*db)
                .await
                .unwrap()
                .unwrap()
        };
        assert_eq!(stored.revoked_reason.as_deref(), Some("ua_mismatch"));

        // The original client is locked out too; the token is dead
        let result = guard.validate(Some(&bearer(&secret)), &first_use).await;
        assert!(matches!(
            result,
            Err(AuthError::Unauthorized(SESSION_EXPIRED_MESSAGE))
        ));
    }

    #[tokio::test]
    async fn test_ip_churn_within_subnet_allowed() {
        let (_db, guard, user) = guard_with_user().await;
        let first_use = ctx("203.0.113.10", "firefox");

        let secret = guard.issue_token(&first_use, &user).await.unwrap();
        guard
            .validate(Some(&bearer(&secret)), &first_use)
            .await
            .unwrap();

        let same_subnet = ctx("203.0.113.250", "firefox");
        assert!(guard
            .validate(Some(&bearer(&secret)), &same_subnet)
            .await
            .is_ok());

        let other_subnet = ctx("203.0.114.10", "firefox");
        let result = guard.validate(Some(&bearer(&secret)), &other_subnet).await;
        assert!(matches!(
            result,
            Err(AuthError::Unauthorized(SESSION_EXPIRED_MESSAGE))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (db, guard, user) = guard_with_user().await;
        let ctx = ctx("203.0.113.10", "curl/8");

        let secret = generate_token_secret();
        let digest = token_digest(secret.expose_secret());
        {
            let db = db.lock().await;
            ApiToken::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user.id),
                token_hash: Set(digest),
                created: Set(Utc::now() - chrono::Duration::days(31)),
                expiry: Set(Utc::now() - chrono::Duration::days(1)),
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

        let result = guard.validate(Some(&bearer(&secret)), &ctx).await;
        assert!(matches!(
            result,
            Err(AuthError::Unauthorized("Invalid or expired token"))
        ));
    }

    #[tokio::test]
    async fn test_require_role_rejects_wrong_role() {
        let (_db, guard, user) = guard_with_user().await;
        let ctx = ctx("203.0.113.10", "curl/8");

        let secret = guard.issue_token(&ctx, &user).await.unwrap();
        let result = guard
            .require_role(Some(&bearer(&secret)), &ctx, &[UserRole::Admin])
            .await;
        assert!(matches!(result, Err(AuthError::Forbidden { .. })));

        // An empty allow-set only requires a valid token
        assert!(guard
            .require_role(Some(&bearer(&secret)), &ctx, &[])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let (_db, guard, user) = guard_with_user().await;
        let ctx = ctx("203.0.113.10", "curl/8");

        let first = guard.issue_token(&ctx, &user).await.unwrap();
        let second = guard.issue_token(&ctx, &user).await.unwrap();
        assert_ne!(first.expose_secret(), second.expose_secret());

        let revoked = guard
            .revoke_all_for_user(user.id, "password_change")
            .await
            .unwrap();
        assert_eq!(revoked, 2);

        for secret in [first, second] {
            let result = guard.validate(Some(&bearer(&secret)), &ctx).await;
            assert!(matches!(
                result,
                Err(AuthError::Unauthorized(SESSION_EXPIRED_MESSAGE))
            ));
        }
    }
}
