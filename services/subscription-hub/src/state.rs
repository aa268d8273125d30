use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlx::PgPool;
use stream_bus::StreamBus;
use timing_protocol::ServerMessage;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// One live connection's egress channel plus the background task currently
/// forwarding that connection's subscribed event's patch channel, if any.
pub struct ConnectionHandle {
    pub tx: mpsc::Sender<ServerMessage>,
    pub event_task: Mutex<Option<JoinHandle<()>>>,
}

pub type ConnectionRegistry = Arc<RwLock<HashMap<String, Arc<ConnectionHandle>>>>;
pub type GroupRegistry<K> = Arc<RwLock<HashMap<K, HashSet<String>>>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub bus: StreamBus,
    pub connections: ConnectionRegistry,
    pub control_log_groups: GroupRegistry<i64>,
    pub car_control_log_groups: GroupRegistry<(i64, String)>,
    pub in_car_groups: GroupRegistry<(i64, String)>,
}

impl AppState {
    pub fn new(pool: PgPool, bus: StreamBus) -> Self {
        Self {
            pool,
            bus,
            connections: Arc::new(RwLock::new(HashMap::new())),
            control_log_groups: Arc::new(RwLock::new(HashMap::new())),
            car_control_log_groups: Arc::new(RwLock::new(HashMap::new())),
            in_car_groups: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register_connection(&self, connection_id: &str, handle: Arc<ConnectionHandle>) {
        self.connections.write().await.insert(connection_id.to_owned(), handle);
        pipeline_metrics::set_total_subscriber_connections(self.connections.read().await.len() as u64);
    }

    pub async fn remove_connection(&self, connection_id: &str) -> Option<Arc<ConnectionHandle>> {
        let removed = self.connections.write().await.remove(connection_id);
        pipeline_metrics::set_total_subscriber_connections(self.connections.read().await.len() as u64);
        removed
    }

    pub async fn join_control_logs(&self, event_id: i64, connection_id: &str) {
        self.control_log_groups.write().await.entry(event_id).or_default().insert(connection_id.to_owned());
    }

    pub async fn leave_control_logs(&self, event_id: i64, connection_id: &str) {
        if let Some(members) = self.control_log_groups.write().await.get_mut(&event_id) {
            members.remove(connection_id);
        }
    }

    pub async fn join_car_control_logs(&self, event_id: i64, car_number: &str, connection_id: &str) {
        self.car_control_log_groups
            .write()
            .await
            .entry((event_id, car_number.to_owned()))
            .or_default()
            .insert(connection_id.to_owned());
    }

    pub async fn leave_car_control_logs(&self, event_id: i64, car_number: &str, connection_id: &str) {
        if let Some(members) = self.car_control_log_groups.write().await.get_mut(&(event_id, car_number.to_owned())) {
            members.remove(connection_id);
        }
    }

    pub async fn join_in_car(&self, event_id: i64, car_number: &str, connection_id: &str) {
        self.in_car_groups
            .write()
            .await
            .entry((event_id, car_number.to_owned()))
            .or_default()
            .insert(connection_id.to_owned());
        self.refresh_in_car_gauge().await;
    }

    pub async fn leave_in_car(&self, event_id: i64, car_number: &str, connection_id: &str) {
        if let Some(members) = self.in_car_groups.write().await.get_mut(&(event_id, car_number.to_owned())) {
            members.remove(connection_id);
        }
        self.refresh_in_car_gauge().await;
    }

    async fn refresh_in_car_gauge(&self) {
        let total: usize = self.in_car_groups.read().await.values().map(HashSet::len).sum();
        pipeline_metrics::set_in_car_connections(total as u64);
    }

    pub async fn remove_connection_from_all_groups(&self, connection_id: &str) {
        self.control_log_groups.write().await.values_mut().for_each(|m| { m.remove(connection_id); });
        self.car_control_log_groups.write().await.values_mut().for_each(|m| { m.remove(connection_id); });
        self.in_car_groups.write().await.values_mut().for_each(|m| { m.remove(connection_id); });
        self.refresh_in_car_gauge().await;
    }
}
