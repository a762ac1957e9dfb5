use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tolerance_core::reminders::ReminderRequest;
use tolerance_core::{
    ActiveSession, CoreConfig, FileSettingsStore, InMemoryScheduler, JoinSaga, MemoryRemoteStore,
    ReminderReconciler, Session, StorePath,
};

const REMOTE_FILE: &str = "remote.json";
const SCHEDULED_FILE: &str = "scheduled.json";

/// Everything the CLI simulates, persisted under one data directory.
///
/// The remote store and the notification scheduler are in-memory and saved
/// as JSON after each command; settings are written through as they change.
pub struct Workspace {
    config: CoreConfig,
    pub remote: Arc<MemoryRemoteStore>,
    pub scheduler: Arc<InMemoryScheduler>,
    pub settings: Arc<FileSettingsStore>,
    pub session: Arc<Session>,
}

impl Workspace {
    pub fn open(config: CoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data dir: {}", config.data_dir.display())
        })?;

        let remote = match read_json(&config.data_dir.join(REMOTE_FILE))? {
            Some(root) => MemoryRemoteStore::from_value(root),
            None => MemoryRemoteStore::new(),
        };
        let scheduled: Vec<ReminderRequest> =
            match read_json(&config.data_dir.join(SCHEDULED_FILE))? {
                Some(value) => {
                    serde_json::from_value(value).context("Failed to parse scheduled.json")?
                }
                None => Vec::new(),
            };

        Ok(Self {
            settings: Arc::new(FileSettingsStore::open(config.settings_path())),
            remote: Arc::new(remote),
            scheduler: Arc::new(InMemoryScheduler::from_requests(scheduled)),
            session: Arc::new(Session::new()),
            config,
        })
    }

    pub fn save(&self) -> Result<()> {
        write_json(&self.path(REMOTE_FILE), &self.remote.snapshot())?;
        let scheduled = serde_json::to_value(self.scheduler.requests())
            .context("Failed to serialize scheduled reminders")?;
        write_json(&self.path(SCHEDULED_FILE), &scheduled)
    }

    pub fn saga(&self) -> JoinSaga {
        JoinSaga::new(
            self.remote.clone(),
            self.settings.clone(),
            self.session.clone(),
            self.config.remote_timeout,
        )
    }

    /// Reconciler for the active session, labelled with the room's name.
    pub fn reconciler(&self) -> ReminderReconciler {
        let reconciler = ReminderReconciler::new(
            self.remote.clone(),
            self.scheduler.clone(),
            self.session.clone(),
            self.config.remote_timeout,
            self.config.default_reminder_time,
        );
        let label = self
            .session
            .current_room_id()
            .and_then(|id| self.room_name(&id));
        reconciler.set_room_label(label);
        reconciler
    }

    /// Restore the session saved by a previous `join`.
    pub async fn restore(&self) -> Result<Option<ActiveSession>> {
        self.session
            .restore(
                self.settings.as_ref(),
                self.remote.as_ref(),
                self.config.remote_timeout,
            )
            .await
            .context("Failed to restore session")
    }

    fn room_name(&self, room_id: &str) -> Option<String> {
        let path = StorePath::room(room_id)?.child("name")?;
        self.remote
            .get(&path)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }
}

fn read_json(path: &Path) -> Result<Option<Value>> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fresh_workspace_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(CoreConfig::new(dir.path())).unwrap();
        assert_eq!(workspace.remote.snapshot(), json!({}));
        assert!(workspace.scheduler.requests().is_empty());
    }

    #[test]
    fn test_remote_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let workspace = Workspace::open(CoreConfig::new(dir.path())).unwrap();
            workspace
                .remote
                .insert(&StorePath::room("room1").unwrap(), json!({"name": "Kitchen"}));
            workspace.save().unwrap();
        }
        let workspace = Workspace::open(CoreConfig::new(dir.path())).unwrap();
        assert_eq!(workspace.room_name("room1").as_deref(), Some("Kitchen"));
    }

    #[test]
    fn test_corrupt_remote_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(REMOTE_FILE), "{oops").unwrap();
        assert!(Workspace::open(CoreConfig::new(dir.path())).is_err());
    }
}
