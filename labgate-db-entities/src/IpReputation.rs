use chrono::{DateTime, Utc};
use poem_openapi::{Enum, Object};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Enum, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ReputationStatus {
    #[sea_orm(string_value = "NORMAL")]
    Normal,
    #[sea_orm(string_value = "SUSPICIOUS")]
    Suspicious,
    #[sea_orm(string_value = "MALICIOUS")]
    Malicious,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Object)]
#[sea_orm(table_name = "ip_reputation")]
#[oai(rename = "IpReputation")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub ip_address: String,

    /// Clamped to [-100, 1000]; status is derived from this alone.
    pub score: i32,
    pub status: ReputationStatus,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_incident_at: Option<DateTime<Utc>>,
    pub last_decay_at: Option<DateTime<Utc>>,

    pub total_alerts: i32,
    pub critical_alerts: i32,
    pub auto_block_count: i32,

    /// Bounded alert history and last-alert summary.
    pub metadata: serde_json::Value,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
