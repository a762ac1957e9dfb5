pub mod category;
pub mod invitation;
pub mod reminder;
pub mod user;

pub use category::Category;
pub use invitation::{Invitation, InvitationStatus};
pub use reminder::{InvalidReminderTime, ReminderPatch, ReminderSetting, ReminderTime};
pub use user::{generate_user_id, User};
