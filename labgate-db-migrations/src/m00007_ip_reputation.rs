use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod ip_reputation {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Debug, PartialEq, Eq, Clone, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
    pub enum ReputationStatus {
        #[sea_orm(string_value = "NORMAL")]
        Normal,
        #[sea_orm(string_value = "SUSPICIOUS")]
        Suspicious,
        #[sea_orm(string_value = "MALICIOUS")]
        Malicious,
    }

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "ip_reputation")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        #[sea_orm(unique)]
        pub ip_address: String,
        pub score: i32,
        pub status: ReputationStatus,
        pub first_seen: DateTime<Utc>,
        pub last_seen: DateTime<Utc>,
        pub last_incident_at: Option<DateTime<Utc>>,
        pub last_decay_at: Option<DateTime<Utc>>,
        pub total_alerts: i32,
        pub critical_alerts: i32,
        pub auto_block_count: i32,
        pub metadata: serde_json::Value,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00007_ip_reputation"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(ip_reputation::Entity))
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ip_reputation::Entity).to_owned())
            .await?;
        Ok(())
    }
}
