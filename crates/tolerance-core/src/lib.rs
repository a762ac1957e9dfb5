// UniFFI scaffolding for generating Swift/Kotlin bindings
uniffi::setup_scaffolding!();

pub mod config;
pub mod constants;
pub mod ffi;
pub mod join;
pub mod logging;
pub mod models;
pub mod reminders;
pub mod remote;
pub mod session;
pub mod settings;
pub mod sink;

pub use config::CoreConfig;
pub use ffi::{ToleranceCore, ToleranceError};
pub use join::{InvitationMark, JoinError, JoinOutcome, JoinSaga, JoinStage};
pub use reminders::{
    InMemoryScheduler, NotificationId, NotificationScheduler, ReconcileReport, ReminderError,
    ReminderReconciler,
};
pub use remote::{MemoryRemoteStore, RemoteError, RemoteStore, StorePath};
pub use session::{ActiveSession, Session};
pub use settings::{FileSettingsStore, SettingsKey, SettingsStore};
