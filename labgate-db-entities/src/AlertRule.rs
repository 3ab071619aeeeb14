use poem_openapi::{Enum, Object};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use labgate_common::LabgateError;

#[derive(
    Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Enum, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum RuleKind {
    #[sea_orm(string_value = "IP_BASED")]
    IpBased,
    #[sea_orm(string_value = "TOKEN_BASED")]
    TokenBased,
    #[sea_orm(string_value = "USER_BASED")]
    UserBased,
    #[sea_orm(string_value = "ENDPOINT_BASED")]
    EndpointBased,
    #[sea_orm(string_value = "GENERIC")]
    Generic,
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
pub enum AlertSeverity {
    #[sea_orm(string_value = "WARNING")]
    Warning,
    #[sea_orm(string_value = "CRITICAL")]
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Automatic responses taken when a rule fires at CRITICAL severity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoAction {
    #[serde(default)]
    pub block_ip: bool,
    #[serde(default)]
    pub revoke_token: bool,
    #[serde(default)]
    pub flag_user: bool,
    #[serde(default = "default_block_duration")]
    pub duration_seconds: u64,
}

fn default_block_duration() -> u64 {
    3600
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Object)]
#[sea_orm(table_name = "alert_rules")]
#[oai(rename = "AlertRule")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub name: String,
    pub kind: RuleKind,
    pub threshold_warning: i32,
    pub threshold_critical: i32,
    pub time_window_seconds: i32,
    pub cooldown_seconds: i32,

    /// Endpoint glob pattern for ENDPOINT_BASED rules, e.g. `/api/admin/*`.
    pub scope: Option<String>,

    pub auto_action: Option<serde_json::Value>,
    pub enabled: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn auto_action(&self) -> Result<Option<AutoAction>, LabgateError> {
        self.auto_action
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(LabgateError::from)
    }
}
