use chrono::{DateTime, Utc};
use poem_openapi::Object;
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use super::AlertRule::AlertSeverity;

/// Immutable record of a fired alert. Written once, never updated.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Object)]
#[sea_orm(table_name = "alert_events")]
#[oai(rename = "AlertEvent")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub severity: AlertSeverity,

    /// "IP", "TOKEN", "USER" or "ENDPOINT".
    pub source_kind: String,
    /// Human-readable source; token hashes are truncated, never full.
    pub source_value: String,

    pub trigger_count: i32,
    pub time_window_seconds: i32,
    pub metadata: serde_json::Value,
    pub fired_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
