//! UniFFI surface for the iOS and Android apps.
//!
//! Every exported method blocks the calling (foreign) thread on a shared
//! tokio runtime, except `join_room_async` which reports back through a
//! `JoinListener`. Host platform services come in as callback interfaces and
//! are adapted to the core traits in `bridge`.

mod bridge;
mod join_api;
mod lifecycle_api;
mod reminders_api;

pub use bridge::{BridgeRemoteStore, BridgeScheduler};

use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, OnceLock};

use crate::config::CoreConfig;
use crate::join::{JoinError, JoinOutcome, JoinSaga, JoinStage};
use crate::models::{Category, ReminderSetting};
use crate::reminders::{ReconcileReport, ReminderError, ReminderReconciler, ReminderRequest};
use crate::remote::RemoteStore;
use crate::session::{ActiveSession, Session};
use crate::settings::SettingsStore;
use crate::sink::ResultSink;

static TOKIO_RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

/// Shared runtime for all FFI calls. Returns an error instead of panicking
/// if the runtime cannot be built.
fn get_tokio_runtime() -> Result<&'static tokio::runtime::Runtime, ToleranceError> {
    if let Some(runtime) = TOKIO_RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = tokio::runtime::Runtime::new().map_err(|e| ToleranceError::Internal {
        message: format!("failed to start runtime: {}", e),
    })?;
    Ok(TOKIO_RUNTIME.get_or_init(|| runtime))
}

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ToleranceError {
    #[error("Core not initialized")]
    CoreNotInitialized,
    #[error("{message}")]
    InvalidInvitation { message: String },
    #[error("Room {room_id} no longer exists")]
    RoomGone { room_id: String },
    #[error("A join with this code is already in progress")]
    JoinInProgress,
    #[error("Connection error: {message}")]
    Connection { message: String },
    #[error("No active session")]
    NoActiveSession,
    #[error("Session changed while the request was in flight")]
    StaleSession,
    #[error("Failed to save reminder settings: {message}")]
    SettingsWriteFailed { message: String },
    #[error("Scheduler error: {message}")]
    Scheduler { message: String },
    #[error("Invalid time of day: {value}")]
    InvalidTime { value: String },
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<JoinError> for ToleranceError {
    fn from(e: JoinError) -> Self {
        match e {
            JoinError::InvalidInvitation => ToleranceError::InvalidInvitation {
                message: e.user_message().to_string(),
            },
            JoinError::RoomGone { room_id } => ToleranceError::RoomGone { room_id },
            JoinError::AlreadyInProgress => ToleranceError::JoinInProgress,
            JoinError::UserWriteFailed(_)
            | JoinError::AccessGrantFailed(_)
            | JoinError::Connection { .. } => ToleranceError::Connection {
                message: e.to_string(),
            },
        }
    }
}

impl From<ReminderError> for ToleranceError {
    fn from(e: ReminderError) -> Self {
        match e {
            ReminderError::NoActiveSession => ToleranceError::NoActiveSession,
            ReminderError::StaleScope => ToleranceError::StaleSession,
            ReminderError::SettingsWriteFailed(source) => ToleranceError::SettingsWriteFailed {
                message: source.to_string(),
            },
            ReminderError::SettingsReadFailed(source) => ToleranceError::Connection {
                message: source.to_string(),
            },
            ReminderError::Scheduler(source) => ToleranceError::Scheduler {
                message: source.to_string(),
            },
            ReminderError::InvalidScope => ToleranceError::Internal {
                message: e.to_string(),
            },
        }
    }
}

/// Error returned by host callbacks.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum BridgeError {
    #[error("Transport error: {message}")]
    Transport { message: String },
    #[error("Rejected: {message}")]
    Rejected { message: String },
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Unexpected callback error: {message}")]
    Unexpected { message: String },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for BridgeError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        BridgeError::Unexpected { message: e.reason }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSession {
    pub user_id: String,
    pub user_name: String,
    pub is_admin: bool,
    pub room_id: String,
}

impl From<ActiveSession> for FfiSession {
    fn from(active: ActiveSession) -> Self {
        Self {
            user_id: active.user.id,
            user_name: active.user.name,
            is_admin: active.user.is_admin,
            room_id: active.room_id,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiJoinResult {
    pub user_id: String,
    pub room_id: String,
    /// False when the invitation could not be flipped to accepted.
    /// The join itself still succeeded.
    pub invitation_marked: bool,
    pub invitation_note: Option<String>,
}

impl From<JoinOutcome> for FfiJoinResult {
    fn from(outcome: JoinOutcome) -> Self {
        use crate::join::InvitationMark;
        let (invitation_marked, invitation_note) = match outcome.invitation_mark {
            InvitationMark::Marked => (true, None),
            InvitationMark::Failed(reason) => (false, Some(reason)),
            InvitationMark::AcceptedConcurrently => (
                false,
                Some("invitation was accepted by another device".to_string()),
            ),
        };
        Self {
            user_id: outcome.user_id,
            room_id: outcome.room_id,
            invitation_marked,
            invitation_note,
        }
    }
}

#[derive(Debug, Clone, uniffi::Enum)]
pub enum FfiJoinOutcome {
    Success { result: FfiJoinResult },
    Failure {
        message: String,
        retryable: bool,
    },
}

impl From<Result<JoinOutcome, JoinError>> for FfiJoinOutcome {
    fn from(result: Result<JoinOutcome, JoinError>) -> Self {
        match result {
            Ok(outcome) => FfiJoinOutcome::Success {
                result: outcome.into(),
            },
            Err(e) => FfiJoinOutcome::Failure {
                message: e.user_message().to_string(),
                retryable: e.is_retryable(),
            },
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCategoryInfo {
    pub category: Category,
    pub key: String,
    pub label: String,
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReminder {
    pub category: Category,
    pub label: String,
    pub enabled: bool,
    /// `HH:MM`, or `None` if never set.
    pub time: Option<String>,
}

impl FfiReminder {
    fn new(category: Category, setting: ReminderSetting) -> Self {
        Self {
            category,
            label: category.label().to_string(),
            enabled: setting.enabled,
            time: setting.time.map(|t| t.to_string()),
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReconcileReport {
    pub scheduled: u32,
    pub cancelled: u32,
    pub failures: Vec<String>,
}

impl From<ReconcileReport> for FfiReconcileReport {
    fn from(report: ReconcileReport) -> Self {
        Self {
            scheduled: report.scheduled.len() as u32,
            cancelled: report.cancelled.len() as u32,
            failures: report
                .failed
                .iter()
                .map(|(category, e)| format!("{}: {}", category.key(), e))
                .collect(),
        }
    }
}

/// What the host needs to register a daily notification.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReminderRequest {
    pub id: String,
    pub hour: u32,
    pub minute: u32,
    pub title: String,
    pub body: String,
    pub category_key: String,
    pub room_id: String,
    pub room_label: Option<String>,
}

impl From<ReminderRequest> for FfiReminderRequest {
    fn from(request: ReminderRequest) -> Self {
        Self {
            id: request.id.to_string(),
            hour: request.hour,
            minute: request.minute,
            title: request.payload.title,
            body: request.payload.body,
            category_key: request.payload.category.key().to_string(),
            room_id: request.payload.room_id,
            room_label: request.payload.room_label,
        }
    }
}

/// Where a tapped notification should navigate.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNotificationTarget {
    pub user_id: String,
    pub category: Category,
    pub room_id: String,
}

/// Remote key-path store implemented by the host (e.g. a realtime database SDK).
///
/// Values cross the boundary as JSON text. Calls may block; they run on a
/// blocking thread.
#[uniffi::export(callback_interface)]
pub trait RemoteStoreBridge: Send + Sync {
    fn read(&self, path: String) -> Result<Option<String>, BridgeError>;
    fn write(&self, path: String, json: String) -> Result<(), BridgeError>;
    /// `json` is an object whose fields are merged into the node at `path`.
    fn merge(&self, path: String, json: String) -> Result<(), BridgeError>;
}

/// Local notification scheduler implemented by the host.
#[uniffi::export(callback_interface)]
pub trait SchedulerBridge: Send + Sync {
    fn schedule(&self, request: FfiReminderRequest) -> Result<(), BridgeError>;
    fn cancel(&self, id: String) -> Result<(), BridgeError>;
    fn pending(&self) -> Result<Vec<String>, BridgeError>;
}

/// Receives progress and the final result of `join_room_async`.
///
/// Invoked from a background thread.
#[uniffi::export(callback_interface)]
pub trait JoinListener: Send + Sync {
    fn on_stage(&self, stage: JoinStage);
    fn on_complete(&self, outcome: FfiJoinOutcome);
}

/// Everything built by `init`. All fields are shared handles so a copy can
/// be taken out of the lock before blocking on the runtime.
#[derive(Clone)]
struct CoreServices {
    config: CoreConfig,
    session: Arc<Session>,
    settings: Arc<dyn SettingsStore>,
    remote: Arc<dyn RemoteStore>,
    saga: Arc<JoinSaga>,
    reminders: Arc<ReminderReconciler>,
}

#[derive(uniffi::Object)]
pub struct ToleranceCore {
    services: RwLock<Option<CoreServices>>,
    /// Sink of the join started by the current join screen, if any.
    join_sink: Mutex<Option<ResultSink<Result<JoinOutcome, JoinError>>>>,
}

impl CoreServices {
    /// Pull the room's reminder settings once user and room are known. A
    /// failure leaves the session in place and is only logged.
    async fn load_room_reminders(&self, user_id: &str, room_id: &str) {
        if let Err(e) = self.reminders.load_room_settings(user_id, room_id).await {
            tracing::warn!(%user_id, %room_id, error = %e, "failed to load room reminders");
        }
    }
}

impl ToleranceCore {
    fn services(&self) -> Result<CoreServices, ToleranceError> {
        self.services
            .read()
            .clone()
            .ok_or(ToleranceError::CoreNotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminders::InMemoryScheduler;
    use crate::remote::{MemoryRemoteStore, RemoteOp};
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;

    fn initialized_core(dir: &std::path::Path) -> (ToleranceCore, Arc<InMemoryScheduler>) {
        let (core, _, scheduler) = initialized_core_with_remote(dir);
        (core, scheduler)
    }

    fn initialized_core_with_remote(
        dir: &std::path::Path,
    ) -> (ToleranceCore, Arc<MemoryRemoteStore>, Arc<InMemoryScheduler>) {
        let remote = Arc::new(MemoryRemoteStore::from_value(json!({
            "invitations": {"ABC123": {"status": "invited", "roomId": "room1", "isAdmin": true}},
            "rooms": {"room1": {"name": "Kitchen"}}
        })));
        let scheduler = Arc::new(InMemoryScheduler::new());
        let core = ToleranceCore::new();
        core.init_with(CoreConfig::new(dir), remote.clone(), scheduler.clone());
        (core, remote, scheduler)
    }

    fn read_room_reminders(remote: &MemoryRemoteStore, user_id: &str) -> bool {
        let path = format!("users/{}/roomSettings/room1/reminders", user_id);
        remote
            .journal()
            .iter()
            .any(|e| e.op == RemoteOp::Read && e.path == path)
    }

    #[test]
    fn test_calls_before_init_fail() {
        let core = ToleranceCore::new();
        assert!(matches!(
            core.current_session(),
            Err(ToleranceError::CoreNotInitialized)
        ));
        assert_eq!(core.list_categories().len(), Category::ALL.len());
    }

    #[test]
    fn test_join_then_enable_reminder() {
        let dir = tempfile::tempdir().unwrap();
        let (core, scheduler) = initialized_core(dir.path());

        let result = core.join_room("ABC123".into(), "Alice".into()).unwrap();
        assert_eq!(result.room_id, "room1");
        assert!(result.invitation_marked);

        let session = core.current_session().unwrap().unwrap();
        assert_eq!(session.user_id, result.user_id);
        assert!(session.is_admin);

        let reminder = core
            .set_reminder_enabled(Category::Antihistamine, true)
            .unwrap();
        assert_eq!(reminder.time.as_deref(), Some("09:00"));
        assert_eq!(scheduler.requests().len(), 1);

        core.sign_out().unwrap();
        assert!(core.current_session().unwrap().is_none());
        assert!(scheduler.requests().is_empty());
    }

    #[test]
    fn test_join_loads_room_reminders() {
        let dir = tempfile::tempdir().unwrap();
        let (core, remote, _) = initialized_core_with_remote(dir.path());

        let result = core.join_room("ABC123".into(), "Alice".into()).unwrap();
        assert!(read_room_reminders(&remote, &result.user_id));
    }

    #[test]
    fn test_join_errors_map_to_ffi_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _) = initialized_core(dir.path());
        assert!(matches!(
            core.join_room("XYZ".into(), "Bob".into()),
            Err(ToleranceError::InvalidInvitation { .. })
        ));
        assert!(matches!(
            core.set_reminder_time(Category::Vitamin, "25:00".into()),
            Err(ToleranceError::InvalidTime { .. })
        ));
        assert!(matches!(
            core.load_reminders(),
            Err(ToleranceError::NoActiveSession)
        ));
    }

    struct ChannelListener(Mutex<mpsc::Sender<Option<FfiJoinOutcome>>>);

    impl JoinListener for ChannelListener {
        fn on_stage(&self, _stage: JoinStage) {}

        fn on_complete(&self, outcome: FfiJoinOutcome) {
            let _ = self.0.lock().send(Some(outcome));
        }
    }

    #[test]
    fn test_async_join_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (core, remote, _) = initialized_core_with_remote(dir.path());
        let (tx, rx) = mpsc::channel();

        core.join_room_async(
            "ABC123".into(),
            "Alice".into(),
            Box::new(ChannelListener(Mutex::new(tx))),
        )
        .unwrap();

        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let result = match outcome {
            Some(FfiJoinOutcome::Success { result }) => result,
            other => panic!("expected success, got {:?}", other),
        };
        assert!(core.current_session().unwrap().is_some());
        assert!(read_room_reminders(&remote, &result.user_id));
    }

    #[test]
    fn test_parse_notification_id() {
        let core = ToleranceCore::new();
        let target = core
            .parse_notification_id("u1|probiotic|room1".into())
            .unwrap();
        assert_eq!(target.category, Category::Probiotic);
        assert_eq!(target.room_id, "room1");
        assert!(core.parse_notification_id("garbage".into()).is_none());
    }
}
