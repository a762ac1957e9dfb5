//! Process-wide session: the active user and room.
//!
//! User and room live in one `Option<ActiveSession>` so they are always set
//! or cleared together. Mutation goes through the named entry points below;
//! each one mirrors the ids into the settings store and notifies subscribers.

use parking_lot::RwLock;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;

use crate::models::User;
use crate::remote::{with_timeout, RemoteError, RemoteStore, StorePath};
use crate::settings::{SettingsKey, SettingsStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub user: User,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Joined { user_id: String, room_id: String },
    Restored { user_id: String, room_id: String },
    RoomSwitched { room_id: String },
    RemindersUpdated { user_id: String, room_id: String },
    SignedOut,
}

#[derive(Debug, Default)]
struct SessionState {
    active: Option<ActiveSession>,
    room_code_draft: Option<String>,
}

pub struct Session {
    state: RwLock<SessionState>,
    changes: watch::Sender<Option<SessionChange>>,
}

impl Session {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            state: RwLock::new(SessionState::default()),
            changes,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionChange>> {
        self.changes.subscribe()
    }

    pub fn active(&self) -> Option<ActiveSession> {
        self.state.read().active.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active.is_some()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.read().active.as_ref().map(|a| a.user.clone())
    }

    pub fn current_room_id(&self) -> Option<String> {
        self.state.read().active.as_ref().map(|a| a.room_id.clone())
    }

    pub fn room_code_draft(&self) -> Option<String> {
        self.state.read().room_code_draft.clone()
    }

    /// Remember a half-typed room code so the join screen can be restored.
    pub fn set_room_code_draft(&self, code: Option<&str>, settings: &dyn SettingsStore) {
        let code = code.map(str::trim).filter(|c| !c.is_empty());
        self.state.write().room_code_draft = code.map(str::to_string);
        let result = match code {
            Some(code) => settings.set(SettingsKey::DraftRoomCode, code),
            None => settings.remove(SettingsKey::DraftRoomCode),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist room code draft");
        }
    }

    /// Final step of a successful join: install user and room together.
    ///
    /// Settings write failures are logged and do not undo the in-memory commit;
    /// the remote side is already provisioned at this point.
    pub fn commit_join(&self, user: User, room_id: String, settings: &dyn SettingsStore) {
        let change = SessionChange::Joined {
            user_id: user.id.clone(),
            room_id: room_id.clone(),
        };
        {
            let mut state = self.state.write();
            mirror_ids(settings, &user.id, &room_id);
            if let Err(e) = settings.remove(SettingsKey::DraftRoomCode) {
                tracing::warn!(error = %e, "failed to clear room code draft");
            }
            state.room_code_draft = None;
            state.active = Some(ActiveSession { user, room_id });
        }
        self.changes.send_replace(Some(change));
    }

    pub fn sign_out(&self, settings: &dyn SettingsStore) {
        {
            let mut state = self.state.write();
            state.active = None;
            state.room_code_draft = None;
            clear_ids(settings);
        }
        self.changes.send_replace(Some(SessionChange::SignedOut));
    }

    /// Point the active user at another room. Returns false without a session.
    ///
    /// Cached reminder settings belong to the room they were loaded for and
    /// are dropped when the room changes.
    pub fn switch_room(&self, room_id: &str, settings: &dyn SettingsStore) -> bool {
        {
            let mut state = self.state.write();
            let Some(active) = state.active.as_mut() else {
                return false;
            };
            if active.room_id != room_id {
                active.user.reminders_enabled.clear();
                active.user.reminder_times.clear();
            }
            active.room_id = room_id.to_string();
            if let Err(e) = settings.set(SettingsKey::CurrentRoomId, room_id) {
                tracing::warn!(error = %e, "failed to persist current room");
            }
        }
        self.changes.send_replace(Some(SessionChange::RoomSwitched {
            room_id: room_id.to_string(),
        }));
        true
    }

    /// Mutate the active user only if the session still belongs to
    /// (`user_id`, `room_id`). Results that arrive for a scope the user has
    /// since left are dropped by returning `None`.
    pub fn update_user<R>(
        &self,
        user_id: &str,
        room_id: &str,
        f: impl FnOnce(&mut User) -> R,
    ) -> Option<R> {
        let result = {
            let mut state = self.state.write();
            let active = state.active.as_mut()?;
            if active.user.id != user_id || active.room_id != room_id {
                return None;
            }
            f(&mut active.user)
        };
        self.changes.send_replace(Some(SessionChange::RemindersUpdated {
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
        }));
        Some(result)
    }

    /// Rebuild the session from mirrored ids at app start.
    ///
    /// The session is only restored if the user record still exists and still
    /// grants access to the mirrored room; otherwise the stale ids are cleared.
    /// Remote errors leave the ids in place so a later attempt can succeed.
    pub async fn restore(
        &self,
        settings: &dyn SettingsStore,
        remote: &dyn RemoteStore,
        budget: Duration,
    ) -> Result<Option<ActiveSession>, RemoteError> {
        if let Some(active) = self.active() {
            return Ok(Some(active));
        }

        self.state.write().room_code_draft = settings.get(SettingsKey::DraftRoomCode);

        let (Some(user_id), Some(room_id)) = (
            settings.get(SettingsKey::CurrentUserId),
            settings.get(SettingsKey::CurrentRoomId),
        ) else {
            clear_ids(settings);
            return Ok(None);
        };

        let (Some(user_path), Some(access_path)) = (
            StorePath::user(&user_id),
            StorePath::room_access(&user_id, &room_id),
        ) else {
            tracing::warn!(%user_id, %room_id, "mirrored session ids are malformed");
            clear_ids(settings);
            return Ok(None);
        };

        let user = with_timeout(budget, remote.read(&user_path))
            .await?
            .and_then(User::from_value)
            .filter(|u| u.id == user_id);
        let has_access =
            with_timeout(budget, remote.read(&access_path)).await? == Some(Value::Bool(true));

        let Some(user) = user.filter(|_| has_access) else {
            tracing::info!(%user_id, %room_id, "mirrored session no longer valid; clearing");
            clear_ids(settings);
            return Ok(None);
        };

        let restored = {
            let mut state = self.state.write();
            if let Some(active) = state.active.as_ref() {
                // A join committed while we were reading; it wins.
                return Ok(Some(active.clone()));
            }
            let active = ActiveSession {
                user,
                room_id: room_id.clone(),
            };
            state.active = Some(active.clone());
            active
        };
        tracing::info!(%user_id, %room_id, "session restored");
        self.changes.send_replace(Some(SessionChange::Restored { user_id, room_id }));
        Ok(Some(restored))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn mirror_ids(settings: &dyn SettingsStore, user_id: &str, room_id: &str) {
    if let Err(e) = settings.set(SettingsKey::CurrentUserId, user_id) {
        tracing::warn!(error = %e, "failed to persist current user id");
    }
    if let Err(e) = settings.set(SettingsKey::CurrentRoomId, room_id) {
        tracing::warn!(error = %e, "failed to persist current room id");
    }
}

fn clear_ids(settings: &dyn SettingsStore) {
    for key in [SettingsKey::CurrentUserId, SettingsKey::CurrentRoomId] {
        if let Err(e) = settings.remove(key) {
            tracing::warn!(key = key.key(), error = %e, "failed to clear session setting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, ReminderTime};
    use crate::remote::MemoryRemoteStore;
    use crate::settings::MemorySettingsStore;
    use serde_json::json;

    const BUDGET: Duration = Duration::from_secs(5);

    #[test]
    fn test_commit_join_sets_user_and_room_together() {
        let session = Session::new();
        let settings = MemorySettingsStore::new();
        session.set_room_code_draft(Some("ABC"), &settings);
        assert!(!session.is_active());

        let user = User::with_id("u1", "Alice", false);
        session.commit_join(user.clone(), "room1".into(), &settings);

        let active = session.active().unwrap();
        assert_eq!(active.user, user);
        assert_eq!(active.room_id, "room1");
        assert_eq!(session.room_code_draft(), None);
        assert_eq!(settings.get(SettingsKey::CurrentUserId).as_deref(), Some("u1"));
        assert_eq!(settings.get(SettingsKey::CurrentRoomId).as_deref(), Some("room1"));
        assert_eq!(settings.get(SettingsKey::DraftRoomCode), None);
    }

    #[test]
    fn test_sign_out_clears_everything() {
        let session = Session::new();
        let settings = MemorySettingsStore::new();
        session.commit_join(User::with_id("u1", "Alice", false), "room1".into(), &settings);
        session.sign_out(&settings);
        assert!(session.active().is_none());
        assert!(settings.is_empty());
    }

    #[test]
    fn test_switch_room_requires_session() {
        let session = Session::new();
        let settings = MemorySettingsStore::new();
        assert!(!session.switch_room("room2", &settings));
        assert!(settings.is_empty());

        session.commit_join(User::with_id("u1", "Alice", false), "room1".into(), &settings);
        assert!(session.switch_room("room2", &settings));
        assert_eq!(session.current_room_id().as_deref(), Some("room2"));
        assert_eq!(settings.get(SettingsKey::CurrentRoomId).as_deref(), Some("room2"));
    }

    #[test]
    fn test_switch_room_drops_cached_reminders() {
        let session = Session::new();
        let settings = MemorySettingsStore::new();
        let mut user = User::with_id("u1", "Alice", false);
        user.reminders_enabled.insert(Category::Vitamin, true);
        user.reminder_times.insert(Category::Vitamin, ReminderTime::DEFAULT);
        session.commit_join(user, "room1".into(), &settings);

        assert!(session.switch_room("room1", &settings));
        assert!(session.active().unwrap().user.reminder(Category::Vitamin).enabled);

        assert!(session.switch_room("room2", &settings));
        let user = session.active().unwrap().user;
        assert!(user.reminders_enabled.is_empty());
        assert!(user.reminder_times.is_empty());
    }

    #[test]
    fn test_update_user_drops_stale_scope() {
        let session = Session::new();
        let settings = MemorySettingsStore::new();
        session.commit_join(User::with_id("u1", "Alice", false), "room1".into(), &settings);

        assert_eq!(session.update_user("u1", "room2", |u| u.name.clone()), None);
        assert_eq!(session.update_user("u2", "room1", |u| u.name.clone()), None);
        assert_eq!(
            session.update_user("u1", "room1", |u| {
                u.name = "Alicia".into();
                u.name.clone()
            }),
            Some("Alicia".to_string())
        );
    }

    #[test]
    fn test_subscribers_see_latest_change() {
        let session = Session::new();
        let settings = MemorySettingsStore::new();
        let rx = session.subscribe();
        session.commit_join(User::with_id("u1", "Alice", false), "room1".into(), &settings);
        assert_eq!(
            *rx.borrow(),
            Some(SessionChange::Joined {
                user_id: "u1".into(),
                room_id: "room1".into()
            })
        );
    }

    #[tokio::test]
    async fn test_restore_from_settings() {
        let remote = MemoryRemoteStore::new();
        let user = User::with_id("u1", "Alice", true);
        remote.insert(&StorePath::user("u1").unwrap(), Value::Object(user.to_fields()));
        remote.insert(&StorePath::room_access("u1", "room1").unwrap(), json!(true));

        let settings = MemorySettingsStore::new();
        settings.set(SettingsKey::CurrentUserId, "u1").unwrap();
        settings.set(SettingsKey::CurrentRoomId, "room1").unwrap();

        let session = Session::new();
        let restored = session.restore(&settings, &remote, BUDGET).await.unwrap().unwrap();
        assert_eq!(restored.user.name, "Alice");
        assert_eq!(session.current_room_id().as_deref(), Some("room1"));
    }

    #[tokio::test]
    async fn test_restore_clears_ids_without_access() {
        let remote = MemoryRemoteStore::new();
        remote.insert(
            &StorePath::user("u1").unwrap(),
            Value::Object(User::with_id("u1", "Alice", false).to_fields()),
        );

        let settings = MemorySettingsStore::new();
        settings.set(SettingsKey::CurrentUserId, "u1").unwrap();
        settings.set(SettingsKey::CurrentRoomId, "room1").unwrap();

        let session = Session::new();
        assert!(session.restore(&settings, &remote, BUDGET).await.unwrap().is_none());
        assert!(!session.is_active());
        assert!(settings.is_empty());
    }

    #[tokio::test]
    async fn test_restore_keeps_ids_on_remote_error() {
        let remote = MemoryRemoteStore::new();
        remote.fail_next(
            crate::remote::RemoteOp::Read,
            "users",
            RemoteError::Transport("offline".into()),
        );
        let settings = MemorySettingsStore::new();
        settings.set(SettingsKey::CurrentUserId, "u1").unwrap();
        settings.set(SettingsKey::CurrentRoomId, "room1").unwrap();

        let session = Session::new();
        assert!(session.restore(&settings, &remote, BUDGET).await.is_err());
        assert_eq!(settings.get(SettingsKey::CurrentUserId).as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_restore_half_set_ids_are_cleared() {
        let remote = MemoryRemoteStore::new();
        let settings = MemorySettingsStore::new();
        settings.set(SettingsKey::CurrentUserId, "u1").unwrap();

        let session = Session::new();
        assert!(session.restore(&settings, &remote, BUDGET).await.unwrap().is_none());
        assert!(settings.is_empty());
    }
}
