//! Best-effort audit trail. A failed write is logged and dropped; it never
//! fails the request that triggered it.

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::RequestMeta;
use crate::db::models::{ActivityAction, EntityType, NewActivity};
use crate::db::Store;

#[derive(Clone)]
pub struct ActivityLogger {
    store: Arc<dyn Store>,
}

impl ActivityLogger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn log(
        &self,
        user: Uuid,
        action: ActivityAction,
        entity_type: EntityType,
        entity_id: Option<Uuid>,
        details: impl Into<String>,
        meta: &RequestMeta,
    ) {
        let entry = NewActivity {
            user,
            action,
            entity_type,
            entity_id,
            details: details.into(),
            ip_address: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
        };

        if let Err(e) = self.store.insert_activity(entry).await {
            tracing::warn!(
                user_id = %user,
                action = %action,
                "Failed to record activity: {}",
                e
            );
        }
    }
}
