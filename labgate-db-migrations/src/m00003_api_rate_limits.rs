use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod api_rate_limits {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Debug, PartialEq, Eq, Clone, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
    pub enum IdentifierKind {
        #[sea_orm(string_value = "ip")]
        Ip,
        #[sea_orm(string_value = "token")]
        Token,
    }

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
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
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00003_api_rate_limits"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(api_rate_limits::Entity))
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_api_rate_limits_key")
                    .table(api_rate_limits::Entity)
                    .col(api_rate_limits::Column::Identifier)
                    .col(api_rate_limits::Column::IdentifierKind)
                    .col(api_rate_limits::Column::Endpoint)
                    .unique()
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(api_rate_limits::Entity).to_owned())
            .await?;
        Ok(())
    }
}
