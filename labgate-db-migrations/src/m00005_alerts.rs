use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod alert_rules {
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Debug, PartialEq, Eq, Clone, EnumIter, DeriveActiveEnum)]
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

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "alert_rules")]
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
        pub scope: Option<String>,
        pub auto_action: Option<serde_json::Value>,
        pub enabled: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod alert_metrics {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "alert_metrics")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub rule_id: Uuid,
        pub source_hash: String,
        pub window_start: DateTime<Utc>,
        pub count: i32,
        pub last_updated: DateTime<Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod alert_state {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "alert_state")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub rule_id: Uuid,
        pub source_hash: String,
        pub last_fired_at: DateTime<Utc>,
        pub fire_count: i32,
        pub escalated: bool,
        pub cooldown_until: DateTime<Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod alert_events {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Debug, PartialEq, Eq, Clone, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
    pub enum AlertSeverity {
        #[sea_orm(string_value = "WARNING")]
        Warning,
        #[sea_orm(string_value = "CRITICAL")]
        Critical,
    }

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "alert_events")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub rule_id: Uuid,
        pub rule_name: String,
        pub severity: AlertSeverity,
        pub source_kind: String,
        pub source_value: String,
        pub trigger_count: i32,
        pub time_window_seconds: i32,
        pub metadata: serde_json::Value,
        pub fired_at: DateTime<Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00005_alerts"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(alert_rules::Entity))
            .await?;
        manager
            .create_table(schema.create_table_from_entity(alert_metrics::Entity))
            .await?;
        manager
            .create_table(schema.create_table_from_entity(alert_state::Entity))
            .await?;
        manager
            .create_table(schema.create_table_from_entity(alert_events::Entity))
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_alert_metrics_key")
                    .table(alert_metrics::Entity)
                    .col(alert_metrics::Column::RuleId)
                    .col(alert_metrics::Column::SourceHash)
                    .col(alert_metrics::Column::WindowStart)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_alert_state_key")
                    .table(alert_state::Entity)
                    .col(alert_state::Column::RuleId)
                    .col(alert_state::Column::SourceHash)
                    .unique()
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(alert_events::Entity).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(alert_state::Entity).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(alert_metrics::Entity).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(alert_rules::Entity).to_owned())
            .await?;
        Ok(())
    }
}
