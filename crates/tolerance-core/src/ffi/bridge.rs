use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{BridgeError, RemoteStoreBridge, SchedulerBridge};
use crate::reminders::{NotificationId, NotificationScheduler, ReminderRequest, SchedulerError};
use crate::remote::{RemoteError, RemoteStore, StorePath};

impl From<BridgeError> for RemoteError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Transport { message } => RemoteError::Transport(message),
            BridgeError::Rejected { message } => RemoteError::Rejected(message),
            BridgeError::PermissionDenied => RemoteError::Rejected("permission denied".into()),
            BridgeError::Unexpected { message } => RemoteError::Transport(message),
        }
    }
}

impl From<BridgeError> for SchedulerError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::PermissionDenied => SchedulerError::PermissionDenied,
            other => SchedulerError::Failed(other.to_string()),
        }
    }
}

/// Run a blocking host callback off the async worker threads.
async fn off_thread<T, E, F>(call: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, BridgeError> + Send + 'static,
    T: Send + 'static,
    E: From<BridgeError>,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(result) => result.map_err(E::from),
        Err(e) => Err(E::from(BridgeError::Unexpected {
            message: e.to_string(),
        })),
    }
}

/// `RemoteStore` backed by the host's `RemoteStoreBridge`.
pub struct BridgeRemoteStore {
    bridge: Arc<dyn RemoteStoreBridge>,
}

impl BridgeRemoteStore {
    pub fn new(bridge: Arc<dyn RemoteStoreBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl RemoteStore for BridgeRemoteStore {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, RemoteError> {
        let bridge = self.bridge.clone();
        let path = path.to_string();
        let raw = off_thread::<_, RemoteError, _>(move || bridge.read(path)).await?;
        match raw {
            None => Ok(None),
            Some(text) => {
                let value: Value =
                    serde_json::from_str(&text).map_err(|e| RemoteError::Decode(e.to_string()))?;
                Ok(Some(value).filter(|v| !v.is_null()))
            }
        }
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), RemoteError> {
        let bridge = self.bridge.clone();
        let path = path.to_string();
        let json = value.to_string();
        off_thread(move || bridge.write(path, json)).await
    }

    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), RemoteError> {
        let bridge = self.bridge.clone();
        let path = path.to_string();
        let json = Value::Object(fields).to_string();
        off_thread(move || bridge.merge(path, json)).await
    }
}

/// `NotificationScheduler` backed by the host's `SchedulerBridge`.
pub struct BridgeScheduler {
    bridge: Arc<dyn SchedulerBridge>,
}

impl BridgeScheduler {
    pub fn new(bridge: Arc<dyn SchedulerBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl NotificationScheduler for BridgeScheduler {
    async fn schedule(&self, request: ReminderRequest) -> Result<(), SchedulerError> {
        let bridge = self.bridge.clone();
        off_thread(move || bridge.schedule(request.into())).await
    }

    async fn cancel(&self, id: &NotificationId) -> Result<(), SchedulerError> {
        let bridge = self.bridge.clone();
        let id = id.to_string();
        off_thread(move || bridge.cancel(id)).await
    }

    async fn pending(&self) -> Result<Vec<String>, SchedulerError> {
        let bridge = self.bridge.clone();
        off_thread(move || bridge.pending()).await
    }
}
