use chrono::{Duration as ChronoDuration, Utc};
use poem::web::Data;
use poem_openapi::param::{Path, Query};
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, OpenApi};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

use labgate_common::LabgateError;
use labgate_core::{blocks, Services};
use labgate_db_entities::AuditLog::{self, AuditEventType};
use labgate_db_entities::IpReputation::{self, ReputationStatus};
use labgate_db_entities::User::UserRole;
use labgate_db_entities::{AlertEvent, BlockedIp};

use crate::common::{auth_error_body, AuthzHeader, ErrorBody, ReqCtx};

pub struct Api;

#[derive(Object)]
struct SecurityStatus {
    blocked_ip_count: u64,
    malicious_ip_count: u64,
    alerts_last_24h: u64,
    failed_logins_last_24h: u64,
}

#[derive(ApiResponse)]
enum StatusResponse {
    #[oai(status = 200)]
    Ok(Json<SecurityStatus>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    #[oai(status = 403)]
    Forbidden(Json<ErrorBody>),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

#[derive(ApiResponse)]
enum BlockedIpsResponse {
    #[oai(status = 200)]
    Ok(Json<Vec<BlockedIp::Model>>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    #[oai(status = 403)]
    Forbidden(Json<ErrorBody>),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

#[derive(ApiResponse)]
enum UnblockResponse {
    #[oai(status = 204)]
    Deleted,
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    #[oai(status = 403)]
    Forbidden(Json<ErrorBody>),
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

#[derive(ApiResponse)]
enum TopMaliciousResponse {
    #[oai(status = 200)]
    Ok(Json<Vec<IpReputation::Model>>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    #[oai(status = 403)]
    Forbidden(Json<ErrorBody>),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

#[derive(Object)]
struct CacheCleared {
    success: bool,
    message: String,
}

#[derive(ApiResponse)]
enum CacheClearResponse {
    #[oai(status = 200)]
    Ok(Json<CacheCleared>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    #[oai(status = 403)]
    Forbidden(Json<ErrorBody>),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

macro_rules! admin_guard {
    ($services:expr, $ctx:expr, $authorization:expr, $variant:ident) => {
        match $services
            .auth
            .require_role($authorization.0.as_deref(), &$ctx, &[UserRole::Admin])
            .await
        {
            Ok(auth) => auth,
            Err(error) => {
                let (status, body) = auth_error_body(&error);
                return Ok(match status.as_u16() {
                    401 => $variant::Unauthorized(Json(body)),
                    403 => $variant::Forbidden(Json(body)),
                    _ => $variant::InternalError(Json(body)),
                });
            }
        }
    };
}

#[OpenApi]
impl Api {
    /// Security overview for the admin dashboard.
    #[oai(
        path = "/admin/security/status",
        method = "get",
        operation_id = "security_status"
    )]
    async fn status(
        &self,
        services: Data<&Services>,
        ctx: ReqCtx,
        authorization: AuthzHeader,
    ) -> poem::Result<StatusResponse> {
        let ctx = ctx.0;
        admin_guard!(services, ctx, authorization, StatusResponse);

        let now = Utc::now();
        let one_day_ago = now - ChronoDuration::hours(24);

        let db = services.db.lock().await;
        let blocked_ip_count = BlockedIp::Entity::find()
            .filter(BlockedIp::Column::BlockedUntil.gt(now))
            .count(&*db)
            .await
            .map_err(LabgateError::from)?;
        let malicious_ip_count = IpReputation::Entity::find()
            .filter(IpReputation::Column::Status.eq(ReputationStatus::Malicious))
            .count(&*db)
            .await
            .map_err(LabgateError::from)?;
        let alerts_last_24h = AlertEvent::Entity::find()
            .filter(AlertEvent::Column::FiredAt.gte(one_day_ago))
            .count(&*db)
            .await
            .map_err(LabgateError::from)?;
        let failed_logins_last_24h = AuditLog::Entity::find()
            .filter(AuditLog::Column::EventType.eq(AuditEventType::InvalidCredentials))
            .filter(AuditLog::Column::Timestamp.gte(one_day_ago))
            .count(&*db)
            .await
            .map_err(LabgateError::from)?;

        Ok(StatusResponse::Ok(Json(SecurityStatus {
            blocked_ip_count,
            malicious_ip_count,
            alerts_last_24h,
            failed_logins_last_24h,
        })))
    }

    /// Currently blocked IPs.
    #[oai(
        path = "/admin/security/blocked-ips",
        method = "get",
        operation_id = "list_blocked_ips"
    )]
    async fn blocked_ips(
        &self,
        services: Data<&Services>,
        ctx: ReqCtx,
        authorization: AuthzHeader,
    ) -> poem::Result<BlockedIpsResponse> {
        let ctx = ctx.0;
        admin_guard!(services, ctx, authorization, BlockedIpsResponse);

        let db = services.db.lock().await;
        let list = blocks::active_blocks(&*db).await?;
        Ok(BlockedIpsResponse::Ok(Json(list)))
    }

    /// Remove a block early.
    #[oai(
        path = "/admin/security/blocked-ips/:ip",
        method = "delete",
        operation_id = "unblock_ip"
    )]
    async fn unblock_ip(
        &self,
        services: Data<&Services>,
        ctx: ReqCtx,
        authorization: AuthzHeader,
        ip: Path<String>,
    ) -> poem::Result<UnblockResponse> {
        let ctx = ctx.0;
        admin_guard!(services, ctx, authorization, UnblockResponse);

        let removed = {
            let db = services.db.lock().await;
            blocks::remove_block(&*db, &ip.0).await?
        };
        if removed == 0 {
            return Ok(UnblockResponse::NotFound(Json(ErrorBody::new(
                "IP is not blocked",
            ))));
        }
        Ok(UnblockResponse::Deleted)
    }

    /// Worst-reputation IPs, highest score first.
    #[oai(
        path = "/admin/security/reputation/top",
        method = "get",
        operation_id = "top_malicious_ips"
    )]
    async fn top_malicious(
        &self,
        services: Data<&Services>,
        ctx: ReqCtx,
        authorization: AuthzHeader,
        limit: Query<Option<u64>>,
    ) -> poem::Result<TopMaliciousResponse> {
        let ctx = ctx.0;
        admin_guard!(services, ctx, authorization, TopMaliciousResponse);

        let list = services
            .reputation
            .top_malicious(limit.0.unwrap_or(20).min(100))
            .await?;
        Ok(TopMaliciousResponse::Ok(Json(list)))
    }

    /// Drop the cached rule set after editing alert rules.
    #[oai(
        path = "/admin/security/alert-rules/cache-clear",
        method = "post",
        operation_id = "clear_alert_rule_cache"
    )]
    async fn clear_rule_cache(
        &self,
        services: Data<&Services>,
        ctx: ReqCtx,
        authorization: AuthzHeader,
    ) -> poem::Result<CacheClearResponse> {
        let ctx = ctx.0;
        admin_guard!(services, ctx, authorization, CacheClearResponse);

        services.alerts.clear_rule_cache().await;
        Ok(CacheClearResponse::Ok(Json(CacheCleared {
            success: true,
            message: "Alert rule cache cleared".into(),
        })))
    }
}
