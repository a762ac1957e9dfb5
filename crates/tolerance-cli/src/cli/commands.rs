use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};

use tolerance_core::models::{Category, ReminderSetting, ReminderTime};
use tolerance_core::{ActiveSession, InvitationMark, ReminderReconciler, StorePath};

use super::Workspace;

/// A single CLI action, independent of argument parsing.
#[derive(Debug, Clone)]
pub enum Command {
    SeedRoom {
        room_id: String,
        name: Option<String>,
    },
    SeedInvitation {
        code: String,
        room_id: String,
        admin: bool,
        status: String,
    },
    Join {
        code: String,
        name: String,
    },
    Session,
    SignOut,
    RemindersLoad,
    RemindersEnable { category: String },
    RemindersDisable { category: String },
    RemindersTime { category: String, time: String },
    RemindersReconcile,
    RemindersList,
    Pending,
}

/// Run `command` against `workspace` and return its JSON output.
///
/// The workspace is saved afterwards even when the command fails, since a
/// failed saga may still have committed some remote writes.
pub async fn execute(workspace: &Workspace, command: Command) -> Result<Value> {
    let result = run(workspace, command).await;
    workspace.save()?;
    result
}

async fn run(workspace: &Workspace, command: Command) -> Result<Value> {
    match command {
        Command::SeedRoom { room_id, name } => {
            let path = StorePath::room(&room_id)
                .ok_or_else(|| anyhow!("Invalid room id: {}", room_id))?;
            let name = name.unwrap_or_else(|| room_id.clone());
            workspace.remote.insert(&path, json!({ "name": name }));
            Ok(json!({ "roomId": room_id, "name": name }))
        }
        Command::SeedInvitation {
            code,
            room_id,
            admin,
            status,
        } => {
            let path = StorePath::invitation(&code)
                .ok_or_else(|| anyhow!("Invalid invitation code: {}", code))?;
            let record = json!({ "status": status, "roomId": room_id, "isAdmin": admin });
            workspace.remote.insert(&path, record.clone());
            Ok(json!({ "code": code, "invitation": record }))
        }
        Command::Join { code, name } => {
            let saga = workspace.saga();
            let outcome = saga
                .join_with_progress(&code, &name, |stage| tracing::debug!(%stage, "join progress"))
                .await
                .map_err(|e| anyhow!("{} ({})", e.user_message(), e))?;
            let mark = match &outcome.invitation_mark {
                InvitationMark::Marked => json!("marked"),
                InvitationMark::Failed(reason) => json!({ "failed": reason }),
                InvitationMark::AcceptedConcurrently => json!("acceptedConcurrently"),
            };
            Ok(json!({
                "userId": outcome.user_id,
                "roomId": outcome.room_id,
                "invitation": mark,
            }))
        }
        Command::Session => {
            let active = workspace.restore().await?;
            Ok(active.map(session_json).unwrap_or(Value::Null))
        }
        Command::SignOut => {
            let Some(active) = workspace.restore().await? else {
                return Ok(json!({ "signedOut": false }));
            };
            workspace
                .reconciler()
                .clear_scope(&active.user.id, &active.room_id)
                .await
                .context("Failed to cancel reminders")?;
            workspace.session.sign_out(workspace.settings.as_ref());
            Ok(json!({ "signedOut": true }))
        }
        Command::RemindersLoad => {
            let active = require_session(workspace).await?;
            let settings = workspace
                .reconciler()
                .load_room_settings(&active.user.id, &active.room_id)
                .await?;
            Ok(reminders_json(settings.into_iter()))
        }
        Command::RemindersEnable { category } => set_enabled(workspace, &category, true).await,
        Command::RemindersDisable { category } => set_enabled(workspace, &category, false).await,
        Command::RemindersTime { category, time } => {
            let category = parse_category(&category)?;
            let time: ReminderTime = time.parse()?;
            let reconciler = restored_reconciler(workspace).await?;
            let setting = reconciler.set_time(category, time).await?;
            Ok(reminders_json([(category, setting)].into_iter()))
        }
        Command::RemindersReconcile => {
            let reconciler = restored_reconciler(workspace).await?;
            let report = reconciler.reconcile_all().await?;
            let failed: Vec<Value> = report
                .failed
                .iter()
                .map(|(category, e)| json!({ "category": category.key(), "error": e.to_string() }))
                .collect();
            Ok(json!({
                "scheduled": report.scheduled.iter().map(|c| c.key()).collect::<Vec<_>>(),
                "cancelled": report.cancelled.iter().map(|c| c.key()).collect::<Vec<_>>(),
                "failed": failed,
            }))
        }
        Command::RemindersList => {
            let reconciler = restored_reconciler(workspace).await?;
            Ok(reminders_json(reconciler.current()?.into_iter()))
        }
        Command::Pending => {
            serde_json::to_value(workspace.scheduler.requests()).context("Failed to serialize")
        }
    }
}

async fn set_enabled(workspace: &Workspace, category: &str, enabled: bool) -> Result<Value> {
    let category = parse_category(category)?;
    let reconciler = restored_reconciler(workspace).await?;
    let setting = reconciler.set_enabled(category, enabled).await?;
    Ok(reminders_json([(category, setting)].into_iter()))
}

async fn require_session(workspace: &Workspace) -> Result<ActiveSession> {
    match workspace.restore().await? {
        Some(active) => Ok(active),
        None => bail!("No active session. Run `join <code> <name>` first."),
    }
}

/// Restore the session, then load the room's reminder state so the
/// in-memory model matches what was saved by earlier commands.
async fn restored_reconciler(workspace: &Workspace) -> Result<ReminderReconciler> {
    let active = require_session(workspace).await?;
    let reconciler = workspace.reconciler();
    reconciler
        .load_room_settings(&active.user.id, &active.room_id)
        .await?;
    Ok(reconciler)
}

fn parse_category(key: &str) -> Result<Category> {
    Category::from_key(key).ok_or_else(|| {
        let valid: Vec<&str> = Category::ALL.iter().map(|c| c.key()).collect();
        anyhow!("Unknown category '{}'. Expected one of: {}", key, valid.join(", "))
    })
}

fn session_json(active: ActiveSession) -> Value {
    json!({
        "userId": active.user.id,
        "name": active.user.name,
        "isAdmin": active.user.is_admin,
        "roomId": active.room_id,
    })
}

fn reminders_json(
    settings: impl Iterator<Item = (Category, ReminderSetting)>,
) -> Value {
    Value::Array(
        settings
            .map(|(category, setting)| {
                json!({
                    "category": category.key(),
                    "label": category.label(),
                    "enabled": setting.enabled,
                    "time": setting.time.map(|t| t.to_string()),
                })
            })
            .collect(),
    )
}
