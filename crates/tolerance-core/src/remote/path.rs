use std::fmt;

use crate::constants::{paths, NOTIFICATION_ID_SEPARATOR};
use crate::models::Category;

/// Slash-delimited address into the remote store.
///
/// Every segment is validated on construction, so ids read back from remote
/// data can never address a different subtree than intended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath(String);

/// Characters the remote store rejects in keys, plus our own id separator.
const FORBIDDEN: &[char] = &['/', '.', '#', '$', '[', ']', NOTIFICATION_ID_SEPARATOR];

pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment
            .chars()
            .any(|c| c.is_control() || FORBIDDEN.contains(&c))
}

impl StorePath {
    pub fn from_segments<'a, I>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut joined = String::new();
        for segment in segments {
            if !is_valid_segment(segment) {
                return None;
            }
            if !joined.is_empty() {
                joined.push('/');
            }
            joined.push_str(segment);
        }
        if joined.is_empty() {
            None
        } else {
            Some(Self(joined))
        }
    }

    pub fn invitation(code: &str) -> Option<Self> {
        Self::from_segments([paths::INVITATIONS, code])
    }

    pub fn room(room_id: &str) -> Option<Self> {
        Self::from_segments([paths::ROOMS, room_id])
    }

    pub fn user(user_id: &str) -> Option<Self> {
        Self::from_segments([paths::USERS, user_id])
    }

    pub fn room_access(user_id: &str, room_id: &str) -> Option<Self> {
        Self::from_segments([paths::USERS, user_id, paths::ROOM_ACCESS, room_id])
    }

    pub fn room_reminders(user_id: &str, room_id: &str) -> Option<Self> {
        Self::from_segments([
            paths::USERS,
            user_id,
            paths::ROOM_SETTINGS,
            room_id,
            paths::REMINDERS,
        ])
    }

    pub fn room_reminder(user_id: &str, room_id: &str, category: Category) -> Option<Self> {
        Self::room_reminders(user_id, room_id)?.child(category.key())
    }

    pub fn child(&self, segment: &str) -> Option<Self> {
        if !is_valid_segment(segment) {
            return None;
        }
        Some(Self(format!("{}/{}", self.0, segment)))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0 == prefix || self.0.starts_with(&format!("{}/", prefix.trim_end_matches('/')))
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_paths() {
        assert_eq!(
            StorePath::invitation("ABC123").unwrap().as_str(),
            "invitations/ABC123"
        );
        assert_eq!(StorePath::room("room1").unwrap().as_str(), "rooms/room1");
        assert_eq!(
            StorePath::room_access("u1", "room1").unwrap().as_str(),
            "users/u1/roomAccess/room1"
        );
        assert_eq!(
            StorePath::room_reminder("u1", "room1", Category::Probiotic)
                .unwrap()
                .as_str(),
            "users/u1/roomSettings/room1/reminders/probiotic"
        );
    }

    #[test]
    fn test_rejects_malformed_segments() {
        assert!(StorePath::invitation("").is_none());
        assert!(StorePath::invitation("a/b").is_none());
        assert!(StorePath::invitation("a.b").is_none());
        assert!(StorePath::invitation("a|b").is_none());
        assert!(StorePath::room("[x]").is_none());
        assert!(StorePath::user("line\nbreak").is_none());
    }

    #[test]
    fn test_codes_are_case_sensitive() {
        assert_ne!(StorePath::invitation("abc"), StorePath::invitation("ABC"));
    }

    #[test]
    fn test_starts_with_respects_segment_boundaries() {
        let path = StorePath::user("u1").unwrap();
        assert!(path.starts_with("users"));
        assert!(path.starts_with("users/u1"));
        assert!(!path.starts_with("users/u"));
        assert!(!path.starts_with("invitations"));
    }
}
