use sea_orm::DatabaseConnection;
use sea_orm_migration::prelude::*;
use sea_orm_migration::MigrationTrait;

mod m00001_users;
mod m00002_api_tokens;
mod m00003_api_rate_limits;
mod m00004_login_attempts;
mod m00005_alerts;
mod m00006_blocked_ips;
mod m00007_ip_reputation;
mod m00008_audit_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m00001_users::Migration),
            Box::new(m00002_api_tokens::Migration),
            Box::new(m00003_api_rate_limits::Migration),
            Box::new(m00004_login_attempts::Migration),
            Box::new(m00005_alerts::Migration),
            Box::new(m00006_blocked_ips::Migration),
            Box::new(m00007_ip_reputation::Migration),
            Box::new(m00008_audit_logs::Migration),
        ]
    }
}

pub async fn migrate_database(connection: &DatabaseConnection) -> Result<(), DbErr> {
    Migrator::up(connection, None).await
}
