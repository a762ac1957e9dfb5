use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvitationStatus {
    Invited,
    Sent,
    Accepted,
    /// Any status string this client does not know about
    Unknown(String),
}

impl InvitationStatus {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "invited" => Self::Invited,
            "sent" => Self::Sent,
            "accepted" => Self::Accepted,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Invited => "invited",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Unknown(raw) => raw,
        }
    }

    /// Only freshly issued invitations may be redeemed.
    pub fn is_redeemable(&self) -> bool {
        matches!(self, Self::Invited | Self::Sent)
    }
}

/// Wire shape of `invitations/{code}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvitationRecord {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    is_admin: Option<bool>,
    #[serde(default)]
    accepted_by: Option<String>,
}

/// Remote-owned invitation admitting one user to one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub code: String,
    pub status: InvitationStatus,
    pub room_id: Option<String>,
    pub is_admin: bool,
    pub accepted_by: Option<String>,
}

impl Invitation {
    /// Decode a remote value. Returns `None` for anything that is not an
    /// object with a string `status`.
    pub fn from_value(code: &str, value: Value) -> Option<Self> {
        let record: InvitationRecord = serde_json::from_value(value).ok()?;
        let status = InvitationStatus::from_wire(record.status.as_deref()?);
        Some(Self {
            code: code.to_string(),
            status,
            room_id: record.room_id.filter(|id| !id.is_empty()),
            is_admin: record.is_admin.unwrap_or(false),
            accepted_by: record.accepted_by,
        })
    }

    /// Redeemable when the status is `invited`/`sent` and it names a room.
    pub fn redeemable_room(&self) -> Option<&str> {
        if self.status.is_redeemable() {
            self.room_id.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sent_invitation_is_redeemable() {
        let invitation =
            Invitation::from_value("ABC123", json!({"status": "sent", "roomId": "room1"}))
                .unwrap();
        assert_eq!(invitation.redeemable_room(), Some("room1"));
        assert!(!invitation.is_admin);
    }

    #[test]
    fn test_accepted_and_unknown_are_not_redeemable() {
        for status in ["accepted", "revoked", ""] {
            let invitation =
                Invitation::from_value("C", json!({"status": status, "roomId": "room1"})).unwrap();
            assert_eq!(invitation.redeemable_room(), None, "status {status:?}");
        }
    }

    #[test]
    fn test_missing_room_is_not_redeemable() {
        let invitation = Invitation::from_value("C", json!({"status": "invited"})).unwrap();
        assert_eq!(invitation.redeemable_room(), None);
        let invitation =
            Invitation::from_value("C", json!({"status": "invited", "roomId": ""})).unwrap();
        assert_eq!(invitation.redeemable_room(), None);
    }

    #[test]
    fn test_malformed_values_do_not_decode() {
        assert!(Invitation::from_value("C", json!("sent")).is_none());
        assert!(Invitation::from_value("C", json!({"roomId": "room1"})).is_none());
        assert!(Invitation::from_value("C", json!({"status": 3, "roomId": "room1"})).is_none());
        assert!(Invitation::from_value(
            "C",
            json!({"status": "sent", "roomId": "room1", "isAdmin": "yes"})
        )
        .is_none());
    }

    #[test]
    fn test_admin_flag_is_carried() {
        let invitation = Invitation::from_value(
            "C",
            json!({"status": "invited", "roomId": "room1", "isAdmin": true}),
        )
        .unwrap();
        assert!(invitation.is_admin);
    }
}
