use super::*;
use crate::models::ReminderTime;
use crate::reminders::NotificationId;

#[uniffi::export]
impl ToleranceCore {
    pub fn list_categories(&self) -> Vec<FfiCategoryInfo> {
        Category::ALL
            .into_iter()
            .map(|category| FfiCategoryInfo {
                category,
                key: category.key().to_string(),
                label: category.label().to_string(),
            })
            .collect()
    }

    /// Fetch the active room's reminder settings and reconcile the schedule.
    pub fn load_reminders(&self) -> Result<Vec<FfiReminder>, ToleranceError> {
        let services = self.services()?;
        let active = services
            .session
            .active()
            .ok_or(ToleranceError::NoActiveSession)?;
        let settings = get_tokio_runtime()?.block_on(
            services
                .reminders
                .load_room_settings(&active.user.id, &active.room_id),
        )?;
        Ok(settings
            .into_iter()
            .map(|(category, setting)| FfiReminder::new(category, setting))
            .collect())
    }

    /// In-memory reminder state without touching the network.
    pub fn cached_reminders(&self) -> Result<Vec<FfiReminder>, ToleranceError> {
        let settings = self.services()?.reminders.current()?;
        Ok(settings
            .into_iter()
            .map(|(category, setting)| FfiReminder::new(category, setting))
            .collect())
    }

    pub fn set_reminder_enabled(
        &self,
        category: Category,
        enabled: bool,
    ) -> Result<FfiReminder, ToleranceError> {
        let services = self.services()?;
        let setting =
            get_tokio_runtime()?.block_on(services.reminders.set_enabled(category, enabled))?;
        Ok(FfiReminder::new(category, setting))
    }

    /// `time` is `HH:MM` in 24-hour local time.
    pub fn set_reminder_time(
        &self,
        category: Category,
        time: String,
    ) -> Result<FfiReminder, ToleranceError> {
        let parsed: ReminderTime = time
            .parse()
            .map_err(|_| ToleranceError::InvalidTime { value: time.clone() })?;
        let services = self.services()?;
        let setting = get_tokio_runtime()?.block_on(services.reminders.set_time(category, parsed))?;
        Ok(FfiReminder::new(category, setting))
    }

    pub fn reconcile_reminders(&self) -> Result<FfiReconcileReport, ToleranceError> {
        let services = self.services()?;
        let report = get_tokio_runtime()?.block_on(services.reminders.reconcile_all())?;
        Ok(report.into())
    }

    /// Room name shown in notification bodies.
    pub fn set_room_label(&self, label: Option<String>) -> Result<(), ToleranceError> {
        self.services()?.reminders.set_room_label(label);
        Ok(())
    }

    /// Resolve a tapped notification back to its category and room.
    pub fn parse_notification_id(&self, id: String) -> Option<FfiNotificationTarget> {
        NotificationId::parse(&id).map(|id| FfiNotificationTarget {
            user_id: id.user_id,
            category: id.category,
            room_id: id.room_id,
        })
    }
}
