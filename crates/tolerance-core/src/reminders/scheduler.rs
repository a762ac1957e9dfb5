use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::constants::NOTIFICATION_ID_SEPARATOR;
use crate::models::Category;

/// Identity of a scheduled reminder: one per (user, category, room).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId {
    pub user_id: String,
    pub category: Category,
    pub room_id: String,
}

impl NotificationId {
    pub fn new(user_id: impl Into<String>, category: Category, room_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            category,
            room_id: room_id.into(),
        }
    }

    /// Resolve an id handed back by the OS. Ids not minted here return `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(NOTIFICATION_ID_SEPARATOR);
        let user_id = parts.next().filter(|s| !s.is_empty())?;
        let category = Category::from_key(parts.next()?)?;
        let room_id = parts.next().filter(|s| !s.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(user_id, category, room_id))
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.user_id,
            self.category.key(),
            self.room_id,
            sep = NOTIFICATION_ID_SEPARATOR
        )
    }
}

impl Serialize for NotificationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("bad notification id: {}", raw)))
    }
}

/// Content shown by the notification. Carries enough for a tap handler to
/// land on the right category in the right room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPayload {
    pub title: String,
    pub body: String,
    pub category: Category,
    pub room_id: String,
    pub room_label: Option<String>,
}

/// A daily repeating trigger at `hour:minute` local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub id: NotificationId,
    pub hour: u32,
    pub minute: u32,
    pub payload: ReminderPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("scheduler failed: {0}")]
    Failed(String),
}

/// Local notification scheduler of the host platform.
///
/// Mirrors what mobile OSes actually offer: add, cancel by id and list pending.
/// `schedule` is not assumed to replace an existing registration.
#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    async fn schedule(&self, request: ReminderRequest) -> Result<(), SchedulerError>;
    async fn cancel(&self, id: &NotificationId) -> Result<(), SchedulerError>;
    /// Raw ids of every pending request, including ones this crate did not mint.
    async fn pending(&self) -> Result<Vec<String>, SchedulerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOp {
    Schedule(String),
    Cancel(String),
}

#[derive(Default)]
struct SchedulerState {
    requests: Vec<ReminderRequest>,
    log: Vec<SchedulerOp>,
    fail_next: Option<SchedulerError>,
}

/// Scheduler that keeps requests in memory.
///
/// Like a real OS it happily registers the same id twice, so callers that
/// forget to cancel first end up with duplicates.
#[derive(Default)]
pub struct InMemoryScheduler {
    state: Mutex<SchedulerState>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_requests(requests: Vec<ReminderRequest>) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                requests,
                ..Default::default()
            }),
        }
    }

    pub fn requests(&self) -> Vec<ReminderRequest> {
        self.state.lock().requests.clone()
    }

    pub fn get(&self, id: &NotificationId) -> Option<ReminderRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    /// Number of registrations sharing `id`. Anything above one is a bug.
    pub fn count(&self, id: &NotificationId) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| &r.id == id)
            .count()
    }

    pub fn log(&self) -> Vec<SchedulerOp> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Make the next `schedule` or `cancel` call fail with `error`.
    pub fn fail_next(&self, error: SchedulerError) {
        self.state.lock().fail_next = Some(error);
    }
}

#[async_trait]
impl NotificationScheduler for InMemoryScheduler {
    async fn schedule(&self, request: ReminderRequest) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state.log.push(SchedulerOp::Schedule(request.id.to_string()));
        state.requests.push(request);
        Ok(())
    }

    async fn cancel(&self, id: &NotificationId) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state.log.push(SchedulerOp::Cancel(id.to_string()));
        state.requests.retain(|r| &r.id != id);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<String>, SchedulerError> {
        Ok(self
            .state
            .lock()
            .requests
            .iter()
            .map(|r| r.id.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &NotificationId) -> ReminderRequest {
        ReminderRequest {
            id: id.clone(),
            hour: 9,
            minute: 0,
            payload: ReminderPayload {
                title: "t".into(),
                body: "b".into(),
                category: id.category,
                room_id: id.room_id.clone(),
                room_label: None,
            },
        }
    }

    #[test]
    fn test_notification_id_round_trips_through_display() {
        let id = NotificationId::new("u1", Category::Probiotic, "room1");
        assert_eq!(id.to_string(), "u1|probiotic|room1");
        assert_eq!(NotificationId::parse("u1|probiotic|room1"), Some(id));
    }

    #[test]
    fn test_notification_id_rejects_foreign_ids() {
        assert_eq!(NotificationId::parse("some-other-app-id"), None);
        assert_eq!(NotificationId::parse("u1|unknown|room1"), None);
        assert_eq!(NotificationId::parse("u1|vitamin|room1|extra"), None);
        assert_eq!(NotificationId::parse("|vitamin|room1"), None);
    }

    #[tokio::test]
    async fn test_in_memory_scheduler_keeps_duplicates() {
        let scheduler = InMemoryScheduler::new();
        let id = NotificationId::new("u1", Category::Vitamin, "room1");
        scheduler.schedule(request(&id)).await.unwrap();
        scheduler.schedule(request(&id)).await.unwrap();
        assert_eq!(scheduler.count(&id), 2);

        scheduler.cancel(&id).await.unwrap();
        assert_eq!(scheduler.count(&id), 0);
        assert!(scheduler.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let scheduler = InMemoryScheduler::new();
        let id = NotificationId::new("u1", Category::Vitamin, "room1");
        scheduler.fail_next(SchedulerError::PermissionDenied);
        assert_eq!(
            scheduler.schedule(request(&id)).await,
            Err(SchedulerError::PermissionDenied)
        );
        assert!(scheduler.schedule(request(&id)).await.is_ok());
        assert_eq!(scheduler.log(), vec![SchedulerOp::Schedule(id.to_string())]);
    }

    #[test]
    fn test_request_serializes_id_as_string() {
        let id = NotificationId::new("u1", Category::OitDose, "room1");
        let value = serde_json::to_value(request(&id)).unwrap();
        assert_eq!(value["id"], "u1|oit_dose|room1");
        assert_eq!(value["payload"]["roomId"], "room1");
        let back: ReminderRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, id);
    }
}
