use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlx::PgPool;
use stream_bus::StreamBus;
use tokio::sync::RwLock;

pub type RelayGroupRegistry = Arc<RwLock<HashMap<i64, HashSet<String>>>>;
pub type OrgCache = Arc<RwLock<HashMap<String, i64>>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub bus: StreamBus,
    relay_groups: RelayGroupRegistry,
    org_cache: OrgCache,
}

impl AppState {
    pub fn new(pool: PgPool, bus: StreamBus) -> Self {
        Self {
            pool,
            bus,
            relay_groups: Arc::new(RwLock::new(HashMap::new())),
            org_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Idempotently adds a connection to an event's relay group. Returns
    /// `true` if this call actually added it (first join).
    pub async fn join_relay_group(&self, event_id: i64, connection_id: &str) -> bool {
        let mut groups = self.relay_groups.write().await;
        groups
            .entry(event_id)
            .or_insert_with(HashSet::new)
            .insert(connection_id.to_owned())
    }

    pub async fn leave_all_relay_groups(&self, connection_id: &str) {
        let mut groups = self.relay_groups.write().await;
        for members in groups.values_mut() {
            members.remove(connection_id);
        }
    }

    pub async fn cache_org(&self, client_id: &str, org_id: i64) {
        self.org_cache.write().await.insert(client_id.to_owned(), org_id);
    }

    pub async fn cached_org(&self, client_id: &str) -> Option<i64> {
        self.org_cache.read().await.get(client_id).copied()
    }
}
