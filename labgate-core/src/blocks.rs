use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use tracing::info;
use uuid::Uuid;

use labgate_common::LabgateError;
use labgate_db_entities::BlockedIp;

/// Insert or extend an IP block. An existing block is only ever lengthened:
/// the new `blocked_until` is the greater of the stored and requested values.
pub async fn extend_block<C: ConnectionTrait>(
    db: &C,
    ip: &str,
    blocked_until: DateTime<Utc>,
    reason: &str,
    alert_id: Option<Uuid>,
) -> Result<(), LabgateError> {
    let existing = BlockedIp::Entity::find()
        .filter(BlockedIp::Column::IpAddress.eq(ip))
        .one(db)
        .await?;

    match existing {
        Some(block) => {
            let extended = block.blocked_until.max(blocked_until);
            let model = BlockedIp::ActiveModel {
                id: Set(block.id),
                ip_address: Set(block.ip_address),
                blocked_at: Set(Utc::now()),
                blocked_until: Set(extended),
                reason: Set(reason.to_owned()),
                auto_unblock: Set(true),
                alert_id: Set(alert_id),
            };
            BlockedIp::Entity::update(model).exec(db).await?;
        }
        None => {
            let model = BlockedIp::ActiveModel {
                id: Set(Uuid::new_v4()),
                ip_address: Set(ip.to_owned()),
                blocked_at: Set(Utc::now()),
                blocked_until: Set(blocked_until),
                reason: Set(reason.to_owned()),
                auto_unblock: Set(true),
                alert_id: Set(alert_id),
            };
            model.insert(db).await?;
        }
    }

    info!(ip = %ip, until = %blocked_until, reason = %reason, "IP blocked");
    Ok(())
}

pub async fn is_blocked<C: ConnectionTrait>(db: &C, ip: &str) -> Result<bool, LabgateError> {
    let now = Utc::now();
    Ok(BlockedIp::Entity::find()
        .filter(BlockedIp::Column::IpAddress.eq(ip))
        .filter(BlockedIp::Column::BlockedUntil.gt(now))
        .one(db)
        .await?
        .is_some())
}

pub async fn active_blocks<C: ConnectionTrait>(
    db: &C,
) -> Result<Vec<BlockedIp::Model>, LabgateError> {
    let now = Utc::now();
    Ok(BlockedIp::Entity::find()
        .filter(BlockedIp::Column::BlockedUntil.gt(now))
        .all(db)
        .await?)
}

pub async fn remove_block<C: ConnectionTrait>(db: &C, ip: &str) -> Result<u64, LabgateError> {
    let result = BlockedIp::Entity::delete_many()
        .filter(BlockedIp::Column::IpAddress.eq(ip))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Remove expired blocks that were created by auto-actions. Manual blocks
/// are left for an admin to clear.
pub async fn cleanup_expired<C: ConnectionTrait>(db: &C) -> Result<u64, LabgateError> {
    let now = Utc::now();
    let result = BlockedIp::Entity::delete_many()
        .filter(BlockedIp::Column::AutoUnblock.eq(true))
        .filter(BlockedIp::Column::BlockedUntil.lt(now))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}
