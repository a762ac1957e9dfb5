//! Invitation join saga.
//!
//! Admits a user to a room from an invitation code through a strictly ordered
//! series of remote reads and writes. There is no rollback: each step commits
//! on its own and a failure halts the remaining steps. Local session state is
//! touched only by the final commit, after every remote write has succeeded.
//! Marking the invitation as accepted is the one step whose failure is
//! tolerated.

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::fields;
use crate::models::{Invitation, User};
use crate::remote::{with_timeout, ConditionalMerge, RemoteError, RemoteStore, StorePath};
use crate::session::Session;
use crate::settings::SettingsStore;
use crate::sink::ResultSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum JoinStage {
    ValidatingInvitation,
    VerifyingRoom,
    WritingUser,
    GrantingAccess,
    MarkingInvitation,
    Committing,
    Done,
}

impl fmt::Display for JoinStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinStage::ValidatingInvitation => "validating invitation",
            JoinStage::VerifyingRoom => "verifying room",
            JoinStage::WritingUser => "writing user",
            JoinStage::GrantingAccess => "granting access",
            JoinStage::MarkingInvitation => "marking invitation",
            JoinStage::Committing => "committing",
            JoinStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// What happened to the invitation record in the marking step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvitationMark {
    Marked,
    /// The write failed; the join still succeeded.
    Failed(String),
    /// Another client flipped the status between our read and our write.
    AcceptedConcurrently,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub user_id: String,
    pub room_id: String,
    pub user: User,
    pub invitation_mark: InvitationMark,
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("invitation is missing, already used, or malformed")]
    InvalidInvitation,
    #[error("room {room_id} no longer exists")]
    RoomGone { room_id: String },
    #[error("failed to write user record: {0}")]
    UserWriteFailed(#[source] RemoteError),
    #[error("failed to grant room access: {0}")]
    AccessGrantFailed(#[source] RemoteError),
    #[error("connection error while {stage}: {source}")]
    Connection {
        stage: JoinStage,
        #[source]
        source: RemoteError,
    },
    #[error("a join with this code is already in progress")]
    AlreadyInProgress,
}

impl JoinError {
    /// Whether re-submitting the same code can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JoinError::InvalidInvitation | JoinError::RoomGone { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            JoinError::InvalidInvitation => {
                "That invitation code isn't valid. Check the code and try again."
            }
            JoinError::RoomGone { .. } => "The room for this invitation no longer exists.",
            JoinError::AlreadyInProgress => "Already joining, please wait.",
            JoinError::UserWriteFailed(_)
            | JoinError::AccessGrantFailed(_)
            | JoinError::Connection { .. } => "Something went wrong. Please try again.",
        }
    }
}

/// Marks a code as in flight for the lifetime of one saga run.
struct InFlight<'a> {
    codes: &'a Mutex<HashSet<String>>,
    code: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.codes.lock().remove(&self.code);
    }
}

pub struct JoinSaga {
    remote: Arc<dyn RemoteStore>,
    settings: Arc<dyn SettingsStore>,
    session: Arc<Session>,
    budget: Duration,
    in_flight: Mutex<HashSet<String>>,
    /// Users synthesized by runs that failed during provisioning, keyed by
    /// code. A retry reuses the id instead of orphaning another user.
    unfinished: Mutex<HashMap<String, User>>,
}

impl JoinSaga {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        settings: Arc<dyn SettingsStore>,
        session: Arc<Session>,
        budget: Duration,
    ) -> Self {
        Self {
            remote,
            settings,
            session,
            budget,
            in_flight: Mutex::new(HashSet::new()),
            unfinished: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_in_flight(&self, code: &str) -> bool {
        self.in_flight.lock().contains(code)
    }

    pub async fn join(&self, code: &str, display_name: &str) -> Result<JoinOutcome, JoinError> {
        self.join_with_progress(code, display_name, |_| {}).await
    }

    /// Run the saga, reporting each stage to `on_stage` as it starts.
    pub async fn join_with_progress<F>(
        &self,
        code: &str,
        display_name: &str,
        mut on_stage: F,
    ) -> Result<JoinOutcome, JoinError>
    where
        F: FnMut(JoinStage) + Send,
    {
        let _in_flight = self.claim(code)?;
        let mut enter = |stage: JoinStage| {
            info!(%code, %stage, "join stage");
            on_stage(stage);
        };

        enter(JoinStage::ValidatingInvitation);
        let invitation_path = StorePath::invitation(code).ok_or(JoinError::InvalidInvitation)?;
        let invitation = self
            .read(JoinStage::ValidatingInvitation, &invitation_path)
            .await?
            .and_then(|value| Invitation::from_value(code, value))
            .ok_or(JoinError::InvalidInvitation)?;
        let room_id = invitation
            .redeemable_room()
            .ok_or(JoinError::InvalidInvitation)?
            .to_string();
        let room_path = StorePath::room(&room_id).ok_or(JoinError::InvalidInvitation)?;

        enter(JoinStage::VerifyingRoom);
        if self.read(JoinStage::VerifyingRoom, &room_path).await?.is_none() {
            warn!(%code, %room_id, "invitation points at a missing room");
            return Err(JoinError::RoomGone { room_id });
        }

        let user = self.synthesize_user(code, display_name, invitation.is_admin);
        let (Some(user_path), Some(access_path)) = (
            StorePath::user(&user.id),
            StorePath::room_access(&user.id, &room_id),
        ) else {
            // Generated ids are uuids, so this only trips on a corrupted retry cache.
            self.unfinished.lock().remove(code);
            return Err(JoinError::UserWriteFailed(RemoteError::Rejected(
                "generated user id is not a valid key".into(),
            )));
        };

        // Merged rather than written: an earlier attempt's write that lands
        // late must not replace the subtree and drop `roomAccess`.
        enter(JoinStage::WritingUser);
        if let Err(e) =
            with_timeout(self.budget, self.remote.merge(&user_path, user.to_fields())).await
        {
            warn!(%code, user_id = %user.id, error = %e, "user write failed");
            self.remember_unfinished(code, &user);
            return Err(JoinError::UserWriteFailed(e));
        }

        enter(JoinStage::GrantingAccess);
        if let Err(e) =
            with_timeout(self.budget, self.remote.write(&access_path, Value::Bool(true))).await
        {
            // The user record now exists without access; a retry reuses it.
            warn!(%code, user_id = %user.id, error = %e, "room access grant failed");
            self.remember_unfinished(code, &user);
            return Err(JoinError::AccessGrantFailed(e));
        }

        enter(JoinStage::MarkingInvitation);
        let invitation_mark = self
            .mark_invitation(&invitation_path, &invitation, &user.id)
            .await;

        enter(JoinStage::Committing);
        self.unfinished.lock().remove(code);
        self.session
            .commit_join(user.clone(), room_id.clone(), self.settings.as_ref());

        enter(JoinStage::Done);
        Ok(JoinOutcome {
            user_id: user.id.clone(),
            room_id,
            user,
            invitation_mark,
        })
    }

    /// Run the saga to completion and hand the result to `sink`. If the
    /// screen detached meanwhile the result is dropped; the remote writes
    /// and the local commit have still happened.
    pub async fn join_into<F>(
        self: Arc<Self>,
        code: String,
        display_name: String,
        sink: ResultSink<Result<JoinOutcome, JoinError>>,
        on_stage: F,
    ) where
        F: FnMut(JoinStage) + Send,
    {
        let result = self.join_with_progress(&code, &display_name, on_stage).await;
        if !sink.deliver(result) {
            debug!(%code, "join finished after its screen detached; dropping result");
        }
    }

    /// Spawn `join_into` on the current tokio runtime.
    pub fn spawn_join(
        self: &Arc<Self>,
        code: String,
        display_name: String,
        sink: ResultSink<Result<JoinOutcome, JoinError>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.clone().join_into(code, display_name, sink, |_| {}))
    }

    fn claim(&self, code: &str) -> Result<InFlight<'_>, JoinError> {
        let mut codes = self.in_flight.lock();
        if !codes.insert(code.to_string()) {
            return Err(JoinError::AlreadyInProgress);
        }
        Ok(InFlight {
            codes: &self.in_flight,
            code: code.to_string(),
        })
    }

    async fn read(&self, stage: JoinStage, path: &StorePath) -> Result<Option<Value>, JoinError> {
        with_timeout(self.budget, self.remote.read(path))
            .await
            .map_err(|source| JoinError::Connection { stage, source })
    }

    fn synthesize_user(&self, code: &str, display_name: &str, is_admin: bool) -> User {
        match self.unfinished.lock().get(code) {
            Some(previous) => {
                debug!(%code, user_id = %previous.id, "reusing user id from an unfinished join");
                User::with_id(previous.id.clone(), display_name, is_admin)
            }
            None => User::new(display_name, is_admin),
        }
    }

    fn remember_unfinished(&self, code: &str, user: &User) {
        self.unfinished
            .lock()
            .insert(code.to_string(), user.clone());
    }

    /// Flip the invitation to accepted. Never fails the join.
    ///
    /// Uses a guarded merge on `status` when the store supports it so a
    /// concurrent acceptance by another device is at least detected.
    async fn mark_invitation(
        &self,
        path: &StorePath,
        invitation: &Invitation,
        user_id: &str,
    ) -> InvitationMark {
        let mut update = Map::new();
        update.insert(fields::STATUS.into(), json!("accepted"));
        update.insert(fields::ACCEPTED_BY.into(), json!(user_id));
        let expected = json!(invitation.status.as_str());

        let guarded = with_timeout(
            self.budget,
            self.remote
                .merge_if(path, fields::STATUS, &expected, update.clone()),
        )
        .await;

        let result = match guarded {
            Ok(ConditionalMerge::Applied) => Ok(()),
            Ok(ConditionalMerge::Conflict { current }) => {
                warn!(
                    code = %invitation.code,
                    %user_id,
                    current = ?current,
                    "invitation was accepted concurrently by another client"
                );
                return InvitationMark::AcceptedConcurrently;
            }
            Err(RemoteError::Unsupported) => {
                with_timeout(self.budget, self.remote.merge(path, update)).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => InvitationMark::Marked,
            Err(e) => {
                warn!(
                    code = %invitation.code,
                    %user_id,
                    error = %e,
                    "failed to mark invitation accepted; continuing"
                );
                InvitationMark::Failed(e.to_string())
            }
        }
    }
}
