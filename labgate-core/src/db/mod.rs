mod locking;

use std::time::Duration;

use anyhow::Result;
use sea_orm::sea_query::Expr;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, EntityTrait, QueryFilter};
use labgate_common::LabgateConfig;
use labgate_db_entities::AuditLog;
use labgate_db_migrations::migrate_database;

pub use locking::LockForUpdate;

pub async fn connect_to_db(config: &LabgateConfig) -> Result<DatabaseConnection> {
    let mut url = url::Url::parse(&config.database_url.expose_secret()[..])?;
    if url.scheme() == "sqlite" {
        let path = url.path();
        let mut abs_path = config.paths_relative_to.clone();
        abs_path.push(path);
        abs_path.push("db.sqlite3");

        if let Some(parent) = abs_path.parent() {
            std::fs::create_dir_all(parent)?
        }

        url.set_path(
            abs_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Failed to convert database path to string"))?,
        );

        url.set_query(Some("mode=rwc"));
    }

    let mut opt = ConnectOptions::new(url.to_string());
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .sqlx_logging(true);

    let connection = Database::connect(opt).await?;

    migrate_database(&connection).await?;
    Ok(connection)
}

/// Delete audit entries past their retention period. Counters and alert
/// metrics have their own cleanup pass in the alert engine.
pub async fn cleanup_db(db: &DatabaseConnection, retention: &Duration) -> Result<u64> {
    let cutoff = chrono::Utc::now() - chrono::Duration::from_std(*retention)?;

    let result = AuditLog::Entity::delete_many()
        .filter(Expr::col(AuditLog::Column::Timestamp).lt(cutoff))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
