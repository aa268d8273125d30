//! The single-writer, multi-reader handle around one session's state,
//! mirroring the `Arc<RwLock<...>>` registries the teacher keeps in
//! `AppState` (e.g. `BroadcastRegistry`).

use crate::model::SessionState;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone)]
pub struct SessionStateHandle {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionStateHandle {
    pub fn new(state: SessionState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.inner.read().await
    }

    /// Acquires the single writer lock for the duration of one pipeline
    /// message. Callers must release it before the publish step.
    pub async fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.inner.write().await
    }

    pub async fn snapshot(&self) -> SessionState {
        self.inner.read().await.clone()
    }
}
