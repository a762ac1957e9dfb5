use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{DEFAULT_REMINDER_HOUR, DEFAULT_REMINDER_MINUTE};

/// Local time-of-day at which a daily reminder fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReminderTime {
    hour: u32,
    minute: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time of day: {0}")]
pub struct InvalidReminderTime(pub String);

impl ReminderTime {
    pub const DEFAULT: ReminderTime = ReminderTime {
        hour: DEFAULT_REMINDER_HOUR,
        minute: DEFAULT_REMINDER_MINUTE,
    };

    pub fn new(hour: u32, minute: u32) -> Result<Self, InvalidReminderTime> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self::from)
            .ok_or_else(|| InvalidReminderTime(format!("{}:{}", hour, minute)))
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }
}

impl From<NaiveTime> for ReminderTime {
    fn from(time: NaiveTime) -> Self {
        Self {
            hour: time.hour(),
            minute: time.minute(),
        }
    }
}

impl FromStr for ReminderTime {
    type Err = InvalidReminderTime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self::from)
            .map_err(|_| InvalidReminderTime(s.to_string()))
    }
}

impl fmt::Display for ReminderTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for ReminderTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReminderTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Desired state of one category's reminder within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReminderSetting {
    pub enabled: bool,
    pub time: Option<ReminderTime>,
}

/// Partial reminder entry as stored remotely; either field may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReminderPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<ReminderTime>,
}

impl ReminderPatch {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.time.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let time: ReminderTime = "07:05".parse().unwrap();
        assert_eq!(time.hour(), 7);
        assert_eq!(time.minute(), 5);
        assert_eq!(time.to_string(), "07:05");
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!("24:00".parse::<ReminderTime>().is_err());
        assert!("12:60".parse::<ReminderTime>().is_err());
        assert!("noon".parse::<ReminderTime>().is_err());
        assert!(ReminderTime::new(25, 0).is_err());
    }

    #[test]
    fn test_default_is_nine_am() {
        assert_eq!(ReminderTime::DEFAULT.to_string(), "09:00");
    }

    #[test]
    fn test_patch_tolerates_missing_fields() {
        let patch: ReminderPatch = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert_eq!(patch.enabled, Some(true));
        assert_eq!(patch.time, None);

        let patch: ReminderPatch = serde_json::from_str(r#"{"time": "20:30"}"#).unwrap();
        assert_eq!(patch.enabled, None);
        assert_eq!(patch.time, Some(ReminderTime::new(20, 30).unwrap()));
    }
}
