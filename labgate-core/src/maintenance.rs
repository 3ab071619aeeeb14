use std::sync::Arc;
use std::time::{Duration, Instant};

use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::cleanup_db;
use crate::reputation::ReputationEngine;

/// Opportunistic maintenance triggered inline during request handling.
///
/// There is no background scheduler; each process keeps its own last-run
/// timestamp, so the cadence is best-effort across a fleet rather than
/// globally coordinated.
pub struct Maintenance {
    db: Arc<Mutex<DatabaseConnection>>,
    reputation: Arc<ReputationEngine>,
    interval: Duration,
    reputation_retention: Duration,
    audit_retention: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl Maintenance {
    pub fn new(
        db: Arc<Mutex<DatabaseConnection>>,
        reputation: Arc<ReputationEngine>,
        interval: Duration,
        reputation_retention: Duration,
        audit_retention: Duration,
    ) -> Self {
        Self {
            db,
            reputation,
            interval,
            reputation_retention,
            audit_retention,
            last_run: Mutex::new(None),
        }
    }

    pub async fn run_if_due(&self) {
        {
            let mut last = self.last_run.lock().await;
            match *last {
                Some(at) if at.elapsed() < self.interval => return,
                _ => *last = Some(Instant::now()),
            }
        }

        debug!("Running inline maintenance pass");

        if let Err(error) = self.reputation.apply_decay().await {
            warn!(?error, "Reputation decay failed");
        }
        if let Err(error) = self.reputation.cleanup_old(self.reputation_retention).await {
            warn!(?error, "Reputation cleanup failed");
        }

        let audit_cleanup = {
            let db = self.db.lock().await;
            cleanup_db(&db, &self.audit_retention).await
        };
        if let Err(error) = audit_cleanup {
            warn!(?error, "Audit log cleanup failed");
        }
    }
}
