use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod login_attempts {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "login_attempts")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub ip_address: String,
        pub username: String,
        pub attempts: i32,
        pub last_attempt: DateTime<Utc>,
        pub blocked_until: Option<DateTime<Utc>>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00004_login_attempts"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(login_attempts::Entity))
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_login_attempts_key")
                    .table(login_attempts::Entity)
                    .col(login_attempts::Column::IpAddress)
                    .col(login_attempts::Column::Username)
                    .unique()
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(login_attempts::Entity).to_owned())
            .await?;
        Ok(())
    }
}
