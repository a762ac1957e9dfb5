use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{Category, ReminderPatch, ReminderSetting, ReminderTime};

/// Generate a globally unique user id on the client.
pub fn generate_user_id() -> String {
    Uuid::new_v4().to_string()
}

/// A participant in a room, cached locally and mirrored to `users/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub is_admin: bool,
    pub reminders_enabled: BTreeMap<Category, bool>,
    pub reminder_times: BTreeMap<Category, ReminderTime>,
}

/// Wire shape of `users/{id}`. Category maps are keyed by `Category::key()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    id: String,
    name: String,
    #[serde(default)]
    is_admin: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    reminders_enabled: HashMap<String, bool>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    reminder_times: HashMap<String, String>,
}

impl User {
    pub fn new(name: impl Into<String>, is_admin: bool) -> Self {
        Self::with_id(generate_user_id(), name, is_admin)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>, is_admin: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_admin,
            reminders_enabled: BTreeMap::new(),
            reminder_times: BTreeMap::new(),
        }
    }

    pub fn reminder(&self, category: Category) -> ReminderSetting {
        ReminderSetting {
            enabled: self.reminders_enabled.get(&category).copied().unwrap_or(false),
            time: self.reminder_times.get(&category).copied(),
        }
    }

    pub fn reminders(&self) -> BTreeMap<Category, ReminderSetting> {
        Category::ALL
            .into_iter()
            .map(|c| (c, self.reminder(c)))
            .collect()
    }

    /// Merge a remote patch; fields the patch does not carry keep their value.
    pub fn apply_patch(&mut self, category: Category, patch: ReminderPatch) {
        if let Some(enabled) = patch.enabled {
            self.reminders_enabled.insert(category, enabled);
        }
        if let Some(time) = patch.time {
            self.reminder_times.insert(category, time);
        }
    }

    /// Top-level fields of `users/{id}`, for merging into the record.
    /// Child nodes such as `roomAccess` are never part of the result.
    pub fn to_fields(&self) -> Map<String, Value> {
        let record = UserRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            is_admin: self.is_admin,
            reminders_enabled: self
                .reminders_enabled
                .iter()
                .map(|(c, enabled)| (c.key().to_string(), *enabled))
                .collect(),
            reminder_times: self
                .reminder_times
                .iter()
                .map(|(c, time)| (c.key().to_string(), time.to_string()))
                .collect(),
        };
        match serde_json::to_value(record) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        }
    }

    /// Decode `users/{id}`. Unknown categories and unparseable times are dropped
    /// so a record written by a newer client still loads.
    pub fn from_value(value: Value) -> Option<Self> {
        let record: UserRecord = serde_json::from_value(value).ok()?;
        if record.id.is_empty() {
            return None;
        }
        let reminders_enabled = record
            .reminders_enabled
            .into_iter()
            .filter_map(|(key, enabled)| Category::from_key(&key).map(|c| (c, enabled)))
            .collect();
        let reminder_times = record
            .reminder_times
            .into_iter()
            .filter_map(|(key, raw)| {
                let category = Category::from_key(&key)?;
                raw.parse::<ReminderTime>().ok().map(|t| (category, t))
            })
            .collect();
        Some(Self {
            id: record.id,
            name: record.name,
            is_admin: record.is_admin,
            reminders_enabled,
            reminder_times,
        })
    }
}
