use poem_openapi::{Enum, Object};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Enum, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum UserRole {
    #[sea_orm(string_value = "admin")]
    #[serde(rename = "admin")]
    Admin,
    #[sea_orm(string_value = "plp")]
    #[serde(rename = "plp")]
    Plp,
    #[sea_orm(string_value = "user")]
    #[serde(rename = "user")]
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Plp => "plp",
            Self::User => "user",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Object)]
#[sea_orm(table_name = "users")]
#[oai(rename = "User")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub username: String,
    pub name: String,
    pub email: String,
    #[oai(skip)]
    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text")]
    pub password_hash: String,
    pub avatar: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub role: UserRole,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    ApiTokens,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::ApiTokens => Entity::has_many(super::ApiToken::Entity)
                .from(Column::Id)
                .to(super::ApiToken::Column::UserId)
                .into(),
        }
    }
}

impl Related<super::ApiToken::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApiTokens.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
