use chrono::{DateTime, Utc};
use poem_openapi::Object;
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

/// An active or expired IP block. Repeated triggers only ever extend
/// `blocked_until`, never shrink it.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Object)]
#[sea_orm(table_name = "blocked_ips")]
#[oai(rename = "BlockedIp")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub ip_address: String,
    pub blocked_at: DateTime<Utc>,
    pub blocked_until: DateTime<Utc>,
    pub reason: String,

    /// Expired auto-unblock rows are deleted by the cleanup pass; manual
    /// blocks stay until an admin removes them.
    pub auto_unblock: bool,

    pub alert_id: Option<Uuid>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
