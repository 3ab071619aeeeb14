use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod audit_logs {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "audit_logs")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub timestamp: DateTime<Utc>,
        #[sea_orm(column_type = "String(StringLen::N(32))")]
        pub event_type: String,
        pub user_id: Option<Uuid>,
        pub ip_address: String,
        pub user_agent: String,
        pub endpoint: String,
        pub http_method: String,
        pub request_id: Uuid,
        #[sea_orm(column_type = "String(StringLen::N(8))")]
        pub status: String,
        #[sea_orm(column_type = "String(StringLen::N(16))")]
        pub severity: String,
        pub metadata: Option<serde_json::Value>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00008_audit_logs"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(audit_logs::Entity))
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_audit_logs_timestamp")
                    .table(audit_logs::Entity)
                    .col(audit_logs::Column::Timestamp)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_audit_logs_request_id")
                    .table(audit_logs::Entity)
                    .col(audit_logs::Column::RequestId)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(audit_logs::Entity).to_owned())
            .await?;
        Ok(())
    }
}
