//! Application-wide constants
//!
//! Remote path roots, field names and defaults shared by the saga,
//! the reconciler and the FFI layer.

/// Directory name used under the platform data dir when no base dir is configured
pub const DATA_DIR_NAME: &str = "tolerance";

/// Default budget for a single remote call
pub const REMOTE_TIMEOUT_MS: u64 = 15_000;

/// Hour and minute assigned when a reminder is enabled without a time
pub const DEFAULT_REMINDER_HOUR: u32 = 9;
pub const DEFAULT_REMINDER_MINUTE: u32 = 0;

/// Separator between the parts of a notification identifier.
/// Remote keys cannot contain it, so ids split back unambiguously.
pub const NOTIFICATION_ID_SEPARATOR: char = '|';

// Remote store layout
pub mod paths {
    pub const INVITATIONS: &str = "invitations";
    pub const ROOMS: &str = "rooms";
    pub const USERS: &str = "users";
    pub const ROOM_ACCESS: &str = "roomAccess";
    pub const ROOM_SETTINGS: &str = "roomSettings";
    pub const REMINDERS: &str = "reminders";
}

// Field names written by the core
pub mod fields {
    pub const STATUS: &str = "status";
    pub const ACCEPTED_BY: &str = "acceptedBy";
    pub const ENABLED: &str = "enabled";
    pub const TIME: &str = "time";
}

// Notification content
pub const REMINDER_TITLE: &str = "Medication reminder";
