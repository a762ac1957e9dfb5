//! Reminder reconciler.
//!
//! Desired state is per (user, room, category) and lives remotely under
//! `users/{id}/roomSettings/{room}/reminders`. The local scheduler is brought
//! in line with it by always cancelling a notification id before adding it
//! again, so convergence never depends on querying what is already pending.

mod scheduler;

pub use scheduler::{
    InMemoryScheduler, NotificationId, NotificationScheduler, ReminderPayload, ReminderRequest,
    SchedulerError, SchedulerOp,
};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::{fields, REMINDER_TITLE};
use crate::models::{Category, ReminderPatch, ReminderSetting, ReminderTime, User};
use crate::remote::{with_timeout, RemoteError, RemoteStore, StorePath};
use crate::session::{ActiveSession, Session};

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("no active session")]
    NoActiveSession,
    #[error("session changed before reminder settings arrived")]
    StaleScope,
    #[error("user or room id cannot be used as a remote key")]
    InvalidScope,
    #[error("failed to save reminder settings: {0}")]
    SettingsWriteFailed(#[source] RemoteError),
    #[error("failed to load reminder settings: {0}")]
    SettingsReadFailed(#[source] RemoteError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// What one `reconcile_all` pass did, per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scheduled: Vec<Category>,
    pub cancelled: Vec<Category>,
    pub failed: Vec<(Category, SchedulerError)>,
}

impl ReconcileReport {
    pub fn first_failure(&self) -> Option<&SchedulerError> {
        self.failed.first().map(|(_, e)| e)
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ReminderReconciler {
    remote: Arc<dyn RemoteStore>,
    scheduler: Arc<dyn NotificationScheduler>,
    session: Arc<Session>,
    budget: Duration,
    default_time: ReminderTime,
    room_label: RwLock<Option<String>>,
}

impl ReminderReconciler {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        scheduler: Arc<dyn NotificationScheduler>,
        session: Arc<Session>,
        budget: Duration,
        default_time: ReminderTime,
    ) -> Self {
        Self {
            remote,
            scheduler,
            session,
            budget,
            default_time,
            room_label: RwLock::new(None),
        }
    }

    /// Display name of the active room, shown in notification bodies.
    pub fn set_room_label(&self, label: Option<String>) {
        *self.room_label.write() = label;
    }

    /// In-memory reminder state of the active session.
    pub fn current(&self) -> Result<BTreeMap<Category, ReminderSetting>, ReminderError> {
        Ok(self.active()?.user.reminders())
    }

    /// Read the room's reminder settings, merge them into the active user and
    /// reconcile. Categories missing remotely keep their in-memory value.
    ///
    /// Returns `StaleScope` if the session moved on to another user or room
    /// while the read was in flight; nothing is merged in that case.
    pub async fn load_room_settings(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<BTreeMap<Category, ReminderSetting>, ReminderError> {
        let path = StorePath::room_reminders(user_id, room_id).ok_or(ReminderError::InvalidScope)?;
        let value = with_timeout(self.budget, self.remote.read(&path))
            .await
            .map_err(ReminderError::SettingsReadFailed)?;
        let patches = decode_room_reminders(value);

        let settings = self
            .session
            .update_user(user_id, room_id, |user| {
                for (category, patch) in patches {
                    user.apply_patch(category, patch);
                }
                user.reminders()
            })
            .ok_or_else(|| {
                debug!(%user_id, %room_id, "dropping reminder settings for a stale session");
                ReminderError::StaleScope
            })?;
        info!(%user_id, %room_id, "room reminder settings loaded");

        let report = self.reconcile_all().await?;
        match report.first_failure() {
            Some(e) => Err(ReminderError::Scheduler(e.clone())),
            None => Ok(settings),
        }
    }

    /// Turn a category on or off for the active room.
    ///
    /// Enabling a category that has no time yet assigns the default time.
    /// The local model and schedule are updated even if the remote write
    /// fails; the write error is still returned.
    pub async fn set_enabled(
        &self,
        category: Category,
        enabled: bool,
    ) -> Result<ReminderSetting, ReminderError> {
        let default_time = self.default_time;
        self.apply(category, |user| {
            let mut patch = ReminderPatch {
                enabled: Some(enabled),
                time: None,
            };
            if enabled && !user.reminder_times.contains_key(&category) {
                patch.time = Some(default_time);
            }
            patch
        })
        .await
    }

    /// Change a category's time. Reschedules only if the category is enabled.
    pub async fn set_time(
        &self,
        category: Category,
        time: ReminderTime,
    ) -> Result<ReminderSetting, ReminderError> {
        self.apply(category, |_| ReminderPatch {
            enabled: None,
            time: Some(time),
        })
        .await
    }

    /// Bring the scheduler in line with every category of the active session.
    ///
    /// Safe to call repeatedly. A scheduler failure on one category does not
    /// stop the others; failures are collected in the report.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport, ReminderError> {
        let active = self.active()?;
        let user_id = active.user.id.as_str();
        let room_id = active.room_id.as_str();

        let mut report = ReconcileReport::default();
        for category in Category::ALL {
            let setting = active.user.reminder(category);
            let result = if setting.enabled {
                self.schedule(user_id, room_id, category, setting.time)
                    .await
                    .map(|()| report.scheduled.push(category))
            } else {
                self.cancel(user_id, room_id, category)
                    .await
                    .map(|()| report.cancelled.push(category))
            };
            if let Err(e) = result {
                warn!(%user_id, %room_id, %category, error = %e, "reconcile failed for category");
                report.failed.push((category, e));
            }
        }
        info!(
            %user_id,
            %room_id,
            scheduled = report.scheduled.len(),
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            "reminders reconciled"
        );
        Ok(report)
    }

    /// Cancel every reminder belonging to (`user_id`, `room_id`), e.g. before
    /// signing out of that room.
    pub async fn clear_scope(&self, user_id: &str, room_id: &str) -> Result<(), ReminderError> {
        for category in Category::ALL {
            self.cancel(user_id, room_id, category).await?;
        }
        Ok(())
    }

    fn active(&self) -> Result<ActiveSession, ReminderError> {
        self.session.active().ok_or(ReminderError::NoActiveSession)
    }

    async fn apply<F>(&self, category: Category, make_patch: F) -> Result<ReminderSetting, ReminderError>
    where
        F: FnOnce(&User) -> ReminderPatch,
    {
        let active = self.active()?;
        let user_id = active.user.id;
        let room_id = active.room_id;
        let path = StorePath::room_reminder(&user_id, &room_id, category)
            .ok_or(ReminderError::InvalidScope)?;

        let (setting, patch) = self
            .session
            .update_user(&user_id, &room_id, |user| {
                let patch = make_patch(user);
                user.apply_patch(category, patch);
                (user.reminder(category), patch)
            })
            .ok_or(ReminderError::StaleScope)?;

        let written = with_timeout(self.budget, self.remote.merge(&path, patch_fields(&patch)))
            .await
            .map_err(|e| {
                warn!(%user_id, %room_id, %category, error = %e, "reminder write failed; keeping local state");
                ReminderError::SettingsWriteFailed(e)
            });

        let scheduled = if setting.enabled {
            self.schedule(&user_id, &room_id, category, setting.time).await
        } else if patch.enabled == Some(false) {
            self.cancel(&user_id, &room_id, category).await
        } else {
            Ok(())
        };

        written?;
        scheduled?;
        Ok(setting)
    }

    async fn schedule(
        &self,
        user_id: &str,
        room_id: &str,
        category: Category,
        time: Option<ReminderTime>,
    ) -> Result<(), SchedulerError> {
        let time = time.unwrap_or(self.default_time);
        let id = NotificationId::new(user_id, category, room_id);
        self.scheduler.cancel(&id).await?;
        let request = ReminderRequest {
            id,
            hour: time.hour(),
            minute: time.minute(),
            payload: self.payload(category, room_id),
        };
        debug!(id = %request.id, %time, "scheduling reminder");
        self.scheduler.schedule(request).await
    }

    async fn cancel(
        &self,
        user_id: &str,
        room_id: &str,
        category: Category,
    ) -> Result<(), SchedulerError> {
        let id = NotificationId::new(user_id, category, room_id);
        debug!(%id, "cancelling reminder");
        self.scheduler.cancel(&id).await
    }

    fn payload(&self, category: Category, room_id: &str) -> ReminderPayload {
        let room_label = self.room_label.read().clone();
        let body = match &room_label {
            Some(label) => format!("Time for {} ({})", category.label(), label),
            None => format!("Time for {}", category.label()),
        };
        ReminderPayload {
            title: REMINDER_TITLE.to_string(),
            body,
            category,
            room_id: room_id.to_string(),
            room_label,
        }
    }
}

/// Decode the `reminders` subtree. Unknown category keys and entries that do
/// not parse are skipped so one bad entry never hides the rest.
fn decode_room_reminders(value: Option<Value>) -> Vec<(Category, ReminderPatch)> {
    let Some(value) = value else {
        return Vec::new();
    };
    let Value::Object(entries) = value else {
        warn!("room reminders are not an object; ignoring");
        return Vec::new();
    };

    let mut patches = Vec::new();
    for (key, entry) in entries {
        let Some(category) = Category::from_key(&key) else {
            debug!(%key, "ignoring unknown reminder category");
            continue;
        };
        match serde_json::from_value::<ReminderPatch>(entry) {
            Ok(patch) if !patch.is_empty() => patches.push((category, patch)),
            Ok(_) => {}
            Err(e) => warn!(%category, error = %e, "skipping malformed reminder entry"),
        }
    }
    patches
}

fn patch_fields(patch: &ReminderPatch) -> Map<String, Value> {
    let mut map = Map::new();
    if let Some(enabled) = patch.enabled {
        map.insert(fields::ENABLED.to_string(), Value::Bool(enabled));
    }
    if let Some(time) = patch.time {
        map.insert(fields::TIME.to_string(), Value::String(time.to_string()));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemoteOp};
    use crate::settings::MemorySettingsStore;
    use serde_json::json;

    struct Fixture {
        remote: Arc<MemoryRemoteStore>,
        scheduler: Arc<InMemoryScheduler>,
        session: Arc<Session>,
        reconciler: ReminderReconciler,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemoteStore::new());
        let scheduler = Arc::new(InMemoryScheduler::new());
        let session = Arc::new(Session::new());
        session.commit_join(
            User::with_id("u1", "Alice", false),
            "room1".into(),
            &MemorySettingsStore::new(),
        );
        let reconciler = ReminderReconciler::new(
            remote.clone(),
            scheduler.clone(),
            session.clone(),
            Duration::from_secs(5),
            ReminderTime::DEFAULT,
        );
        Fixture {
            remote,
            scheduler,
            session,
            reconciler,
        }
    }

    fn id(category: Category) -> NotificationId {
        NotificationId::new("u1", category, "room1")
    }

    #[tokio::test]
    async fn test_enable_assigns_default_time_and_writes_both_fields() {
        let f = fixture();
        let setting = f
            .reconciler
            .set_enabled(Category::Vitamin, true)
            .await
            .unwrap();
        assert_eq!(setting.time, Some(ReminderTime::DEFAULT));

        let path = StorePath::room_reminder("u1", "room1", Category::Vitamin).unwrap();
        assert_eq!(
            f.remote.get(&path),
            Some(json!({"enabled": true, "time": "09:00"}))
        );
        let request = f.scheduler.get(&id(Category::Vitamin)).unwrap();
        assert_eq!((request.hour, request.minute), (9, 0));
    }

    #[tokio::test]
    async fn test_enable_keeps_existing_time() {
        let f = fixture();
        let seven = ReminderTime::new(7, 30).unwrap();
        f.reconciler.set_time(Category::Probiotic, seven).await.unwrap();
        assert_eq!(f.scheduler.count(&id(Category::Probiotic)), 0);

        let setting = f
            .reconciler
            .set_enabled(Category::Probiotic, true)
            .await
            .unwrap();
        assert_eq!(setting.time, Some(seven));
        let path = StorePath::room_reminder("u1", "room1", Category::Probiotic).unwrap();
        assert_eq!(
            f.remote.get(&path),
            Some(json!({"enabled": true, "time": "07:30"}))
        );
    }

    #[tokio::test]
    async fn test_write_failure_keeps_local_state_and_schedule() {
        let f = fixture();
        f.remote.fail_next(
            RemoteOp::Merge,
            "users/u1",
            RemoteError::Transport("offline".into()),
        );
        let err = f
            .reconciler
            .set_enabled(Category::OitDose, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ReminderError::SettingsWriteFailed(_)));

        let user = f.session.current_user().unwrap();
        assert!(user.reminder(Category::OitDose).enabled);
        assert_eq!(f.scheduler.count(&id(Category::OitDose)), 1);
    }

    #[tokio::test]
    async fn test_set_time_reschedules_enabled_category() {
        let f = fixture();
        f.reconciler.set_enabled(Category::Vitamin, true).await.unwrap();
        f.reconciler
            .set_time(Category::Vitamin, ReminderTime::new(20, 15).unwrap())
            .await
            .unwrap();

        assert_eq!(f.scheduler.count(&id(Category::Vitamin)), 1);
        let request = f.scheduler.get(&id(Category::Vitamin)).unwrap();
        assert_eq!((request.hour, request.minute), (20, 15));
    }

    #[tokio::test]
    async fn test_load_ignores_unknown_and_malformed_entries() {
        let f = fixture();
        let path = StorePath::room_reminders("u1", "room1").unwrap();
        f.remote.insert(
            &path,
            json!({
                "antihistamine": {"enabled": true, "time": "21:00"},
                "vitamin": {"enabled": "yes"},
                "caffeine": {"enabled": true}
            }),
        );

        let settings = f.reconciler.load_room_settings("u1", "room1").await.unwrap();
        assert!(settings[&Category::Antihistamine].enabled);
        assert!(!settings[&Category::Vitamin].enabled);
        assert_eq!(f.scheduler.requests().len(), 1);
        assert_eq!(f.scheduler.count(&id(Category::Antihistamine)), 1);
    }

    #[tokio::test]
    async fn test_load_keeps_values_absent_remotely() {
        let f = fixture();
        f.reconciler.set_enabled(Category::Vitamin, true).await.unwrap();
        // Remote loses the vitamin entry but gains a probiotic one.
        let path = StorePath::room_reminders("u1", "room1").unwrap();
        f.remote
            .insert(&path, json!({"probiotic": {"enabled": true, "time": "08:00"}}));

        let settings = f.reconciler.load_room_settings("u1", "room1").await.unwrap();
        assert!(settings[&Category::Vitamin].enabled);
        assert!(settings[&Category::Probiotic].enabled);
    }

    #[tokio::test]
    async fn test_load_for_stale_scope_is_dropped() {
        let f = fixture();
        let path = StorePath::room_reminders("u1", "room1").unwrap();
        f.remote.insert(&path, json!({"vitamin": {"enabled": true}}));
        f.session.sign_out(&MemorySettingsStore::new());
        f.session.commit_join(
            User::with_id("u2", "Bob", false),
            "room2".into(),
            &MemorySettingsStore::new(),
        );

        let err = f
            .reconciler
            .load_room_settings("u1", "room1")
            .await
            .unwrap_err();
        assert!(matches!(err, ReminderError::StaleScope));
        assert!(f.scheduler.requests().is_empty());
        assert!(!f.session.current_user().unwrap().reminder(Category::Vitamin).enabled);
    }

    #[tokio::test]
    async fn test_reconcile_continues_past_scheduler_failure() {
        let f = fixture();
        f.reconciler.set_enabled(Category::Vitamin, true).await.unwrap();
        f.scheduler.clear_log();
        f.scheduler.fail_next(SchedulerError::PermissionDenied);

        let report = f.reconciler.reconcile_all().await.unwrap();
        assert_eq!(report.failed, vec![(Category::OitDose, SchedulerError::PermissionDenied)]);
        assert_eq!(report.first_failure(), Some(&SchedulerError::PermissionDenied));
        assert_eq!(report.scheduled, vec![Category::Vitamin]);
        assert_eq!(f.scheduler.count(&id(Category::Vitamin)), 1);
    }

    #[tokio::test]
    async fn test_payload_carries_room_identity() {
        let f = fixture();
        f.reconciler.set_room_label(Some("Kitchen".into()));
        f.reconciler.set_enabled(Category::OitDose, true).await.unwrap();

        let payload = f.scheduler.get(&id(Category::OitDose)).unwrap().payload;
        assert_eq!(payload.category, Category::OitDose);
        assert_eq!(payload.room_id, "room1");
        assert_eq!(payload.room_label.as_deref(), Some("Kitchen"));
        assert!(payload.body.contains("Kitchen"));
    }

    #[tokio::test]
    async fn test_no_session() {
        let reconciler = ReminderReconciler::new(
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(InMemoryScheduler::new()),
            Arc::new(Session::new()),
            Duration::from_secs(1),
            ReminderTime::DEFAULT,
        );
        assert!(matches!(
            reconciler.reconcile_all().await,
            Err(ReminderError::NoActiveSession)
        ));
        assert!(matches!(
            reconciler.set_enabled(Category::Vitamin, true).await,
            Err(ReminderError::NoActiveSession)
        ));
    }
}
