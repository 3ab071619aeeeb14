use chrono::{DateTime, Utc};
use poem_openapi::Enum;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Enum, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum AuditEventType {
    #[sea_orm(string_value = "LOGIN_SUCCESS")]
    LoginSuccess,
    #[sea_orm(string_value = "LOGIN_FAIL")]
    LoginFail,
    #[sea_orm(string_value = "INVALID_CREDENTIALS")]
    InvalidCredentials,
    #[sea_orm(string_value = "TOKEN_VALID")]
    TokenValid,
    #[sea_orm(string_value = "TOKEN_EXPIRED")]
    TokenExpired,
    #[sea_orm(string_value = "TOKEN_REVOKED")]
    TokenRevoked,
    #[sea_orm(string_value = "TOKEN_REPLAY")]
    TokenReplay,
    #[sea_orm(string_value = "TOKEN_CREATED")]
    TokenCreated,
    #[sea_orm(string_value = "RATE_LIMIT_HIT")]
    RateLimitHit,
    #[sea_orm(string_value = "UNAUTHORIZED")]
    Unauthorized,
    #[sea_orm(string_value = "FORBIDDEN")]
    Forbidden,
    #[sea_orm(string_value = "DB_ERROR")]
    DbError,
    #[sea_orm(string_value = "EXCEPTION")]
    Exception,
    #[sea_orm(string_value = "SUSPICIOUS_IP")]
    SuspiciousIp,
    #[sea_orm(string_value = "SUSPICIOUS_USER")]
    SuspiciousUser,
    #[sea_orm(string_value = "LOGOUT")]
    Logout,
    #[sea_orm(string_value = "PASSWORD_CHANGE")]
    PasswordChange,
    #[sea_orm(string_value = "ALERT_FIRED")]
    AlertFired,
    #[sea_orm(string_value = "IP_PREEMPTIVE_BLOCK")]
    IpPreemptiveBlock,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFail => "LOGIN_FAIL",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::TokenValid => "TOKEN_VALID",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::TokenReplay => "TOKEN_REPLAY",
            Self::TokenCreated => "TOKEN_CREATED",
            Self::RateLimitHit => "RATE_LIMIT_HIT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::DbError => "DB_ERROR",
            Self::Exception => "EXCEPTION",
            Self::SuspiciousIp => "SUSPICIOUS_IP",
            Self::SuspiciousUser => "SUSPICIOUS_USER",
            Self::Logout => "LOGOUT",
            Self::PasswordChange => "PASSWORD_CHANGE",
            Self::AlertFired => "ALERT_FIRED",
            Self::IpPreemptiveBlock => "IP_PREEMPTIVE_BLOCK",
        }
    }
}

#[derive(
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Enum,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum EventSeverity {
    #[sea_orm(string_value = "INFO")]
    Info,
    #[sea_orm(string_value = "WARNING")]
    Warning,
    #[sea_orm(string_value = "CRITICAL")]
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

#[derive(
    Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Enum, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
pub enum EventStatus {
    #[sea_orm(string_value = "SUCCESS")]
    Success,
    #[sea_orm(string_value = "FAIL")]
    Fail,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
        }
    }
}

/// Write-once audit record. Entries are never mutated after insert.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "audit_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub user_id: Option<Uuid>,
    pub ip_address: String,
    pub user_agent: String,
    pub endpoint: String,
    pub http_method: String,
    pub request_id: Uuid,
    pub status: EventStatus,
    pub severity: EventSeverity,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
