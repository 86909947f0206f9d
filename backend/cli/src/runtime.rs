use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use leadflow_channels::build_gateway;
use leadflow_config::LeadflowConfig;
use leadflow_engine::{Collaborators, FollowupService, QueueCheckpointStore};
use leadflow_store::Database;

use crate::composer::TemplateComposer;

/// Wire the engine against the SQLite store and the configured gateway.
pub async fn build_service(config: &LeadflowConfig) -> Result<Arc<FollowupService>> {
    let db_path = &config.storage.db_path;
    let db = Database::open(db_path)?;
    let gateway = build_gateway(&config.gateway)?;

    let mut service = FollowupService::new(config, collaborators(&db, gateway))?;
    if config.storage.checkpoint {
        service = service.with_checkpoints(QueueCheckpointStore::open(db_path)?);
    }
    let restored = service.restore_checkpoint().await?;
    info!(
        db = %db_path,
        gateway = ?config.gateway.kind,
        restored,
        "Follow-up engine ready"
    );
    Ok(Arc::new(service))
}

fn collaborators(
    db: &Database,
    gateway: Arc<dyn leadflow_core::DeliveryGateway>,
) -> Collaborators {
    Collaborators {
        store: Arc::new(db.lead_store()),
        composer: Arc::new(TemplateComposer),
        gateway,
        sheet: Arc::new(db.sheet()),
        write_queue: Arc::new(db.write_queue()),
    }
}

/// In-memory service with a logging gateway, for handler tests.
#[cfg(test)]
pub async fn test_service() -> (Arc<FollowupService>, Database) {
    let mut config = LeadflowConfig::default();
    config.followup.min_score = 0.0;
    let db = Database::in_memory().unwrap();
    let gateway = Arc::new(leadflow_channels::LogGateway);
    let service = FollowupService::new(&config, collaborators(&db, gateway)).unwrap();
    (Arc::new(service), db)
}
