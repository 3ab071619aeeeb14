use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq, Serialize, Clone, Copy, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
pub enum IdentifierKind {
    #[sea_orm(string_value = "ip")]
    Ip,
    #[sea_orm(string_value = "token")]
    Token,
}

/// Fixed-window request counter. One row per
/// (identifier, identifier_kind, endpoint); the window rolls over in place.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "api_rate_limits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub identifier: String,
    pub identifier_kind: IdentifierKind,
    pub endpoint: String,
    pub window_start: DateTime<Utc>,
    pub request_count: i32,
    pub last_request: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
