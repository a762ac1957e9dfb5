use super::*;
use std::path::PathBuf;

use crate::logging::init_logging;
use crate::reminders::NotificationScheduler;
use crate::settings::FileSettingsStore;

#[uniffi::export]
impl ToleranceCore {
    #[uniffi::constructor]
    pub fn new() -> Self {
        Self {
            services: RwLock::new(None),
            join_sink: Mutex::new(None),
        }
    }

    /// Initialize the core. Must be called before other operations.
    ///
    /// `data_dir` holds the settings file and the debug log. Calling this
    /// again after a successful init is a no-op.
    pub fn init(
        &self,
        data_dir: String,
        remote: Box<dyn RemoteStoreBridge>,
        scheduler: Box<dyn SchedulerBridge>,
    ) -> Result<(), ToleranceError> {
        let mut services = self.services.write();
        if services.is_some() {
            tracing::debug!("init called twice; keeping existing services");
            return Ok(());
        }

        let config = CoreConfig {
            data_dir: PathBuf::from(data_dir),
            ..CoreConfig::from_env()
        };
        std::fs::create_dir_all(&config.data_dir).map_err(|e| ToleranceError::Internal {
            message: format!("failed to create {}: {}", config.data_dir.display(), e),
        })?;
        init_logging("tolerance-core", Some(&config.log_path()));

        let remote: Arc<dyn RemoteStore> =
            Arc::new(BridgeRemoteStore::new(Arc::from(remote)));
        let scheduler: Arc<dyn NotificationScheduler> =
            Arc::new(BridgeScheduler::new(Arc::from(scheduler)));
        *services = Some(build_services(config, remote, scheduler));

        tracing::info!("core initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.services.read().is_some()
    }

    /// Rebuild the session from the ids saved by the last join, then load
    /// that room's reminders. Returns `None` if there is nothing to restore
    /// or the saved user no longer has access to the room.
    pub fn restore_session(&self) -> Result<Option<FfiSession>, ToleranceError> {
        let services = self.services()?;
        let runtime = get_tokio_runtime()?;

        let restored = runtime
            .block_on(services.session.restore(
                services.settings.as_ref(),
                services.remote.as_ref(),
                services.config.remote_timeout,
            ))
            .map_err(|e| ToleranceError::Connection {
                message: e.to_string(),
            })?;

        if let Some(active) = &restored {
            runtime.block_on(services.load_room_reminders(&active.user.id, &active.room_id));
        }
        Ok(restored.map(FfiSession::from))
    }

    pub fn current_session(&self) -> Result<Option<FfiSession>, ToleranceError> {
        Ok(self.services()?.session.active().map(FfiSession::from))
    }

    /// Leave the current room: cancel its reminders and forget the saved ids.
    pub fn sign_out(&self) -> Result<(), ToleranceError> {
        let services = self.services()?;
        if let Some(active) = services.session.active() {
            let cleared = get_tokio_runtime()?.block_on(
                services
                    .reminders
                    .clear_scope(&active.user.id, &active.room_id),
            );
            if let Err(e) = cleared {
                tracing::warn!(error = %e, "failed to cancel reminders on sign out");
            }
        }
        services.session.sign_out(services.settings.as_ref());
        Ok(())
    }

    pub fn room_code_draft(&self) -> Result<Option<String>, ToleranceError> {
        Ok(self.services()?.session.room_code_draft())
    }

    /// Remember the half-typed invitation code across launches.
    pub fn set_room_code_draft(&self, code: Option<String>) -> Result<(), ToleranceError> {
        let services = self.services()?;
        services
            .session
            .set_room_code_draft(code.as_deref(), services.settings.as_ref());
        Ok(())
    }
}

impl Default for ToleranceCore {
    fn default() -> Self {
        Self::new()
    }
}

fn build_services(
    config: CoreConfig,
    remote: Arc<dyn RemoteStore>,
    scheduler: Arc<dyn NotificationScheduler>,
) -> CoreServices {
    let settings: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::open(config.settings_path()));
    let session = Arc::new(Session::new());
    let saga = Arc::new(JoinSaga::new(
        remote.clone(),
        settings.clone(),
        session.clone(),
        config.remote_timeout,
    ));
    let reminders = Arc::new(ReminderReconciler::new(
        remote.clone(),
        scheduler,
        session.clone(),
        config.remote_timeout,
        config.default_reminder_time,
    ));
    CoreServices {
        config,
        session,
        settings,
        remote,
        saga,
        reminders,
    }
}

#[cfg(test)]
impl ToleranceCore {
    /// Initialize with in-process collaborators instead of host bridges.
    pub(crate) fn init_with(
        &self,
        config: CoreConfig,
        remote: Arc<dyn RemoteStore>,
        scheduler: Arc<dyn NotificationScheduler>,
    ) {
        *self.services.write() = Some(build_services(config, remote, scheduler));
    }
}
