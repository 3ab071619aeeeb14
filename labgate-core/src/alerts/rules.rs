use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tokio::sync::RwLock;

use labgate_common::LabgateError;
use labgate_db_entities::AlertRule;

/// Process-wide cache of the enabled rule set. Injected into the engine so
/// rule-change tests can control its lifetime explicitly instead of relying
/// on hidden static state.
pub struct RuleCache {
    inner: RwLock<Option<Arc<Vec<AlertRule::Model>>>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Option<Arc<Vec<AlertRule::Model>>> {
        self.inner.read().await.clone()
    }

    pub async fn put(&self, rules: Vec<AlertRule::Model>) -> Arc<Vec<AlertRule::Model>> {
        let rules = Arc::new(rules);
        *self.inner.write().await = Some(rules.clone());
        rules
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) async fn load_enabled_rules(
    db: &DatabaseConnection,
) -> Result<Vec<AlertRule::Model>, LabgateError> {
    Ok(AlertRule::Entity::find()
        .filter(AlertRule::Column::Enabled.eq(true))
        .all(db)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use labgate_db_entities::AlertRule::RuleKind;
    use uuid::Uuid;

    fn rule(name: &str) -> AlertRule::Model {
        AlertRule::Model {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: RuleKind::IpBased,
            threshold_warning: 5,
            threshold_critical: 10,
            time_window_seconds: 300,
            cooldown_seconds: 600,
            scope: None,
            auto_action: None,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_cache_roundtrip_and_invalidate() {
        let cache = RuleCache::new();
        assert!(cache.get().await.is_none());

        cache.put(vec![rule("a"), rule("b")]).await;
        assert_eq!(cache.get().await.unwrap().len(), 2);

        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }
}
