//! Session actor: an isolated Tokio task that owns one live session.
//!
//! Each session runs in its own task, communicating with the outside
//! world through an mpsc command channel — the per-session single
//! logical writer. Membership, permissions, and the workspace state all
//! live here; commands linearize in arrival order, which is what makes
//! every mutation race-free without a lock.
//!
//! Outbound fan-out goes through per-connection unbounded senders, so
//! the actor never suspends while holding its state: the connection's
//! writer half does the actual network I/O.

use std::collections::HashMap;

use serde_json::Value;
use tandem_auth::Principal;
use tandem_protocol::{
    now_millis, AccessLevel, ConnectionId, CursorPosition, FileAction,
    FileOpData, FileState, InviteKey, PermissionSet, ServerEvent, SessionId,
    SessionSettings, SessionSnapshot, SessionUser, UserId,
};
use tandem_protocol::validate::validate_path;
use tokio::sync::{mpsc, oneshot};

use crate::session::{ProjectMode, SessionState};
use crate::HubError;

/// Default command channel size for session actors.
const DEFAULT_CHANNEL_SIZE: usize = 64;

/// Channel sender for delivering outbound events to one connection.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

// ---------------------------------------------------------------------------
// Operations & queries
// ---------------------------------------------------------------------------

/// A session-scoped operation from a bound connection. The actor checks
/// the required permission, applies the state change, and fans out the
/// derived event.
#[derive(Debug, Clone)]
pub enum SessionOp {
    CodeChange {
        code: String,
    },
    RealtimeCodeChange {
        file_path: String,
        content: String,
    },
    FileOperation {
        action: FileAction,
        path: String,
        data: Option<FileOpData>,
    },
    CreateFile {
        name: String,
        content: String,
    },
    CreateFolder {
        name: String,
    },
    CursorUpdate {
        file_path: String,
        position: CursorPosition,
        selection: Option<Value>,
        color: Option<String>,
    },
    FileActivityUpdate {
        file_path: String,
    },
    ChatMessage {
        content: String,
        kind: Option<String>,
    },
    UpdateUserPermissions {
        target: UserId,
        permissions: PermissionSet,
    },
    ProjectInit {
        mode: ProjectMode,
        template: Option<String>,
        data: Option<Value>,
    },
    AccessRightsUpdate {
        target: UserId,
        level: AccessLevel,
    },
}

/// A read-only query answered to the sender only.
#[derive(Debug, Clone, Copy)]
pub enum SessionQuery {
    Users,
    Info,
    Files,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a successful join returns to the joining connection.
#[derive(Debug)]
pub struct JoinOutcome {
    pub snapshot: SessionSnapshot,
    /// The current shared code buffer, for the joiner's snapshot.
    pub code: String,
    /// The current file map, for the joiner's snapshot.
    pub files: Vec<FileState>,
    /// `true` when the user was already a member (idempotent rejoin or
    /// a second editor tab).
    pub already_member: bool,
}

/// What a leave returns to the hub (for GC scheduling).
#[derive(Debug, Clone, Copy)]
pub struct LeaveOutcome {
    /// `true` when this was the user's last connection, so peers were
    /// notified exactly once.
    pub user_left: bool,
    /// Members remaining after the leave.
    pub remaining: usize,
    /// The join epoch at the time of the leave (GC sweep token).
    pub epoch: u64,
}

/// A cheap liveness probe used by the GC sweep.
#[derive(Debug, Clone, Copy)]
pub struct SessionStatus {
    pub member_count: usize,
    pub epoch: u64,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands sent to a session actor through its channel.
pub(crate) enum SessionCommand {
    Join {
        principal: Principal,
        connection_id: ConnectionId,
        sender: EventSender,
        reply: oneshot::Sender<Result<JoinOutcome, HubError>>,
    },
    Leave {
        user_id: UserId,
        connection_id: ConnectionId,
        reply: oneshot::Sender<LeaveOutcome>,
    },
    Apply {
        user_id: UserId,
        connection_id: ConnectionId,
        op: SessionOp,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Query {
        user_id: UserId,
        query: SessionQuery,
        reply: oneshot::Sender<Result<ServerEvent, HubError>>,
    },
    /// Authorize an execution and announce it to the room. The actual
    /// sandbox call happens outside the actor; the result comes back
    /// as a `Broadcast`.
    BeginExecution {
        user_id: UserId,
        language: String,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    /// Deliver an event to every member (execution results, metrics
    /// ticks).
    Broadcast { event: ServerEvent },
    /// The hub rotated the invite key; update the snapshot copy.
    SetInviteKey { invite_key: InviteKey },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    /// Stop the actor. With `notify`, broadcast the terminal
    /// `session_deleted` first.
    Shutdown { notify: bool },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running session actor. Cheap to clone.
///
/// The registry holds one per session; connection handlers snapshot a
/// clone out of the registry (releasing the registry lock) before any
/// awaited call here, keeping the registry → session lock order.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// The session this handle points at.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn unavailable(&self) -> HubError {
        HubError::SessionUnavailable(self.session_id.clone())
    }

    /// Adds a connection to the session.
    pub async fn join(
        &self,
        principal: Principal,
        connection_id: ConnectionId,
        sender: EventSender,
    ) -> Result<JoinOutcome, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Join {
                principal,
                connection_id,
                sender,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    /// Removes a connection from the session.
    pub async fn leave(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<LeaveOutcome, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Leave {
                user_id,
                connection_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Applies a session operation on behalf of a member.
    pub async fn apply(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        op: SessionOp,
    ) -> Result<(), HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Apply {
                user_id,
                connection_id,
                op,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    /// Answers a read-only query for a member.
    pub async fn query(
        &self,
        user_id: UserId,
        query: SessionQuery,
    ) -> Result<ServerEvent, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Query {
                user_id,
                query,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    /// Authorizes an execution and broadcasts `execution_started`.
    pub async fn begin_execution(
        &self,
        user_id: UserId,
        language: String,
    ) -> Result<(), HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::BeginExecution {
                user_id,
                language,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    /// Delivers an event to every member of the session.
    pub async fn broadcast(&self, event: ServerEvent) -> Result<(), HubError> {
        self.sender
            .send(SessionCommand::Broadcast { event })
            .await
            .map_err(|_| self.unavailable())
    }

    /// Updates the actor's copy of the invite key after a rotation.
    pub async fn set_invite_key(&self, invite_key: InviteKey) -> Result<(), HubError> {
        self.sender
            .send(SessionCommand::SetInviteKey { invite_key })
            .await
            .map_err(|_| self.unavailable())
    }

    /// Probes membership and epoch (GC sweep).
    pub async fn status(&self) -> Result<SessionStatus, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Status { reply: reply_tx })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Stops the actor, optionally broadcasting `session_deleted`.
    pub async fn shutdown(&self, notify: bool) -> Result<(), HubError> {
        self.sender
            .send(SessionCommand::Shutdown { notify })
            .await
            .map_err(|_| self.unavailable())
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// One connected member: display name plus every open connection
/// ("seat") the user holds in this session.
struct Member {
    display_name: String,
    seats: HashMap<ConnectionId, EventSender>,
}

/// The internal session actor state. Runs inside a Tokio task.
struct SessionActor {
    session_id: SessionId,
    name: String,
    creator_id: UserId,
    invite_key: InviteKey,
    created_at: u64,
    settings: SessionSettings,
    state: SessionState,
    members: HashMap<UserId, Member>,
    /// Permission rows outlive membership: they are materialized on
    /// first join and die with the session, so a rejoining user gets
    /// their old vector back.
    permissions: HashMap<UserId, PermissionSet>,
    /// Bumped on every join; the GC sweep compares epochs to detect a
    /// rejoin that happened after the sweep was scheduled.
    join_epoch: u64,
    receiver: mpsc::Receiver<SessionCommand>,
}

impl SessionActor {
    async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, "session actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                SessionCommand::Join {
                    principal,
                    connection_id,
                    sender,
                    reply,
                } => {
                    let result = self.handle_join(principal, connection_id, sender);
                    let _ = reply.send(result);
                }
                SessionCommand::Leave {
                    user_id,
                    connection_id,
                    reply,
                } => {
                    let outcome = self.handle_leave(&user_id, connection_id);
                    let _ = reply.send(outcome);
                }
                SessionCommand::Apply {
                    user_id,
                    connection_id,
                    op,
                    reply,
                } => {
                    let result = self.handle_apply(&user_id, connection_id, op);
                    let _ = reply.send(result);
                }
                SessionCommand::Query {
                    user_id,
                    query,
                    reply,
                } => {
                    let _ = reply.send(self.handle_query(&user_id, query));
                }
                SessionCommand::BeginExecution {
                    user_id,
                    language,
                    reply,
                } => {
                    let result = self.handle_begin_execution(&user_id, language);
                    let _ = reply.send(result);
                }
                SessionCommand::Broadcast { event } => {
                    self.broadcast_all(&event);
                }
                SessionCommand::SetInviteKey { invite_key } => {
                    self.invite_key = invite_key;
                }
                SessionCommand::Status { reply } => {
                    let _ = reply.send(SessionStatus {
                        member_count: self.members.len(),
                        epoch: self.join_epoch,
                    });
                }
                SessionCommand::Shutdown { notify } => {
                    if notify {
                        self.broadcast_all(&ServerEvent::SessionDeleted {
                            session_id: self.session_id.clone(),
                        });
                    }
                    break;
                }
            }
        }

        tracing::info!(session_id = %self.session_id, "session actor stopped");
    }

    // -- Join / leave -----------------------------------------------------

    fn handle_join(
        &mut self,
        principal: Principal,
        connection_id: ConnectionId,
        sender: EventSender,
    ) -> Result<JoinOutcome, HubError> {
        let user_id = principal.user_id.clone();
        let already_member = self.members.contains_key(&user_id);

        if !already_member {
            if principal.is_guest() && !self.settings.allow_guests {
                return Err(HubError::GuestDenied);
            }
            if self.members.len() >= self.settings.max_users {
                return Err(HubError::SessionFull(self.session_id.clone()));
            }
        }

        self.join_epoch += 1;

        // Materialize the permission row on first join; rows persist,
        // so this is a no-op for anyone who ever joined before. The
        // creator's row is seeded at spawn.
        self.permissions.entry(user_id.clone()).or_insert_with(|| {
            if user_id == self.creator_id {
                PermissionSet::full()
            } else {
                self.settings.default_permissions
            }
        });

        let member = self
            .members
            .entry(user_id.clone())
            .or_insert_with(|| Member {
                display_name: principal.display_name.clone(),
                seats: HashMap::new(),
            });
        member.seats.insert(connection_id, sender);

        if !already_member {
            tracing::info!(
                session_id = %self.session_id,
                %user_id,
                members = self.members.len(),
                "user joined session"
            );
            let display_name = principal.display_name.clone();
            self.broadcast_except(
                connection_id,
                &ServerEvent::UserJoinedSession {
                    user_id: user_id.clone(),
                    display_name,
                    user_count: self.members.len(),
                },
            );
            self.broadcast_except(connection_id, &self.session_update_event());
        }

        Ok(JoinOutcome {
            snapshot: self.snapshot_for(&user_id),
            code: self.state.code_buffer.clone(),
            files: self.state.files_snapshot(),
            already_member,
        })
    }

    fn handle_leave(
        &mut self,
        user_id: &UserId,
        connection_id: ConnectionId,
    ) -> LeaveOutcome {
        let Some(member) = self.members.get_mut(user_id) else {
            return LeaveOutcome {
                user_left: false,
                remaining: self.members.len(),
                epoch: self.join_epoch,
            };
        };

        member.seats.remove(&connection_id);
        let user_left = member.seats.is_empty();

        if user_left {
            let display_name = member.display_name.clone();
            self.members.remove(user_id);
            tracing::info!(
                session_id = %self.session_id,
                %user_id,
                members = self.members.len(),
                "user left session"
            );
            // Notify the remaining members exactly once per departed
            // user — a second tab closing takes the quiet path above.
            self.broadcast_all(&ServerEvent::UserLeftSession {
                user_id: user_id.clone(),
                display_name,
                user_count: self.members.len(),
            });
            self.broadcast_all(&self.session_update_event());
        }

        LeaveOutcome {
            user_left,
            remaining: self.members.len(),
            epoch: self.join_epoch,
        }
    }

    // -- Operations -------------------------------------------------------

    fn handle_apply(
        &mut self,
        user_id: &UserId,
        connection_id: ConnectionId,
        op: SessionOp,
    ) -> Result<(), HubError> {
        let Some(member) = self.members.get(user_id) else {
            return Err(HubError::AccessDenied("not a session member".into()));
        };
        let display_name = member.display_name.clone();
        let perms = self.permissions.get(user_id).copied().unwrap_or_default();

        match op {
            SessionOp::CodeChange { code } => {
                self.require(perms.can_edit_files)?;
                let event = self.state.set_code(user_id, code)?;
                self.broadcast_except(connection_id, &event);
            }
            SessionOp::RealtimeCodeChange { file_path, content } => {
                self.require(perms.can_edit_files)?;
                let event = self.state.upsert_file(user_id, file_path, content)?;
                self.broadcast_except(connection_id, &event);
            }
            SessionOp::FileOperation { action, path, data } => {
                self.require(perms.can_edit_files)?;
                let event = self
                    .state
                    .apply_file_operation(user_id, action, path, data)?;
                self.broadcast_except(connection_id, &event);
            }
            SessionOp::CreateFile { name, content } => {
                self.require(perms.can_create_files)?;
                let event = self.state.create_file(user_id, &name, content)?;
                self.broadcast_all(&event);
            }
            SessionOp::CreateFolder { name } => {
                self.require(perms.can_create_folders)?;
                let event = self.state.create_folder(user_id, &name)?;
                self.broadcast_all(&event);
            }
            SessionOp::CursorUpdate {
                file_path,
                position,
                selection,
                color,
            } => {
                self.require(perms.can_view_files)?;
                validate_path(&file_path)?;
                // Presence is relayed, never stored.
                self.broadcast_except(
                    connection_id,
                    &ServerEvent::CursorUpdate {
                        file_path,
                        position,
                        selection,
                        color,
                        user_id: user_id.clone(),
                        display_name,
                    },
                );
            }
            SessionOp::FileActivityUpdate { file_path } => {
                self.require(perms.can_view_files)?;
                validate_path(&file_path)?;
                self.broadcast_except(
                    connection_id,
                    &ServerEvent::FileActivityUpdate {
                        file_path,
                        user_id: user_id.clone(),
                    },
                );
            }
            SessionOp::ChatMessage { content, kind } => {
                self.require(perms.can_chat)?;
                let event =
                    self.state
                        .append_chat(user_id, &display_name, content, kind);
                self.broadcast_all(&event);
            }
            SessionOp::UpdateUserPermissions {
                target,
                permissions,
            } => {
                self.require_creator(user_id)?;
                self.permissions.insert(target.clone(), permissions);
                self.broadcast_all(&ServerEvent::PermissionsUpdated {
                    user_id: target,
                    permissions,
                });
            }
            SessionOp::ProjectInit {
                mode,
                template,
                data,
            } => {
                self.require_creator(user_id)?;
                let event = self.state.set_project(user_id, mode, template, data);
                self.broadcast_all(&event);
            }
            SessionOp::AccessRightsUpdate { target, level } => {
                let owner = self
                    .state
                    .project
                    .as_ref()
                    .map(|p| p.owner_id.clone())
                    .ok_or_else(|| {
                        HubError::AccessDenied("no project in this session".into())
                    })?;
                if *user_id != owner {
                    return Err(HubError::AccessDenied(
                        "only the project owner may change access rights".into(),
                    ));
                }

                let mut target_perms = self
                    .permissions
                    .get(&target)
                    .copied()
                    .unwrap_or(self.settings.default_permissions);
                match level {
                    AccessLevel::Viewer => {
                        target_perms.can_edit_files = false;
                        target_perms.can_execute = false;
                    }
                    AccessLevel::Editor | AccessLevel::Owner => {
                        target_perms.can_edit_files = true;
                        target_perms.can_execute = true;
                    }
                }
                self.permissions.insert(target.clone(), target_perms);
                self.broadcast_all(&ServerEvent::AccessRightsUpdate {
                    user_id: target,
                    access_level: level,
                    permissions: target_perms,
                });
            }
        }

        Ok(())
    }

    fn handle_query(
        &self,
        user_id: &UserId,
        query: SessionQuery,
    ) -> Result<ServerEvent, HubError> {
        if !self.members.contains_key(user_id) {
            return Err(HubError::AccessDenied("not a session member".into()));
        }
        Ok(match query {
            SessionQuery::Users => ServerEvent::SessionUsers {
                users: self.roster(),
            },
            SessionQuery::Info => ServerEvent::SessionInfo {
                session: self.snapshot_for(user_id),
            },
            SessionQuery::Files => ServerEvent::SessionFilesState {
                files: self.state.files_snapshot(),
            },
        })
    }

    fn handle_begin_execution(
        &mut self,
        user_id: &UserId,
        language: String,
    ) -> Result<(), HubError> {
        if !self.members.contains_key(user_id) {
            return Err(HubError::AccessDenied("not a session member".into()));
        }
        let perms = self.permissions.get(user_id).copied().unwrap_or_default();
        self.require(perms.can_execute)?;

        // Announced before the sandbox is called, so the room always
        // sees `execution_started` before the result or error.
        self.broadcast_all(&ServerEvent::ExecutionStarted {
            user_id: user_id.clone(),
            language,
        });
        Ok(())
    }

    // -- Permission helpers -----------------------------------------------

    fn require(&self, allowed: bool) -> Result<(), HubError> {
        if allowed {
            Ok(())
        } else {
            Err(HubError::AccessDenied("missing permission".into()))
        }
    }

    /// Capability check keyed on `creator_id` — immutable, so this can
    /// never be granted or revoked through permission edits.
    fn require_creator(&self, user_id: &UserId) -> Result<(), HubError> {
        if *user_id == self.creator_id {
            Ok(())
        } else {
            Err(HubError::AccessDenied(
                "only the session creator may do this".into(),
            ))
        }
    }

    // -- Snapshots & fan-out ----------------------------------------------

    fn roster(&self) -> Vec<SessionUser> {
        let mut users: Vec<SessionUser> = self
            .members
            .iter()
            .map(|(user_id, member)| SessionUser {
                user_id: user_id.clone(),
                display_name: member.display_name.clone(),
                permissions: self
                    .permissions
                    .get(user_id)
                    .copied()
                    .unwrap_or_default(),
            })
            .collect();
        users.sort_by(|a, b| a.user_id.0.cmp(&b.user_id.0));
        users
    }

    fn snapshot_for(&self, user_id: &UserId) -> SessionSnapshot {
        SessionSnapshot {
            id: self.session_id.clone(),
            name: self.name.clone(),
            creator_id: self.creator_id.clone(),
            invite_key: self.invite_key.clone(),
            created_at: self.created_at,
            user_count: self.members.len(),
            max_users: self.settings.max_users,
            user_permissions: self
                .permissions
                .get(user_id)
                .copied()
                .unwrap_or_default(),
            users: self.roster(),
        }
    }

    fn session_update_event(&self) -> ServerEvent {
        ServerEvent::SessionUpdate {
            user_count: self.members.len(),
            users: self.roster(),
        }
    }

    /// Sends an event to every seat of every member. Dead receivers are
    /// skipped; their connections are mid-teardown.
    fn broadcast_all(&self, event: &ServerEvent) {
        for member in self.members.values() {
            for sender in member.seats.values() {
                let _ = sender.send(event.clone());
            }
        }
    }

    /// Sends to every seat except the originating connection — the
    /// sender already knows what it did, but their other tabs do not.
    fn broadcast_except(&self, exclude: ConnectionId, event: &ServerEvent) {
        for member in self.members.values() {
            for (connection_id, sender) in &member.seats {
                if *connection_id != exclude {
                    let _ = sender.send(event.clone());
                }
            }
        }
    }
}

/// Spawns a session actor and returns the handle to command it.
///
/// The creator's permission row is seeded here (the "pseudo-join" at
/// creation time), so it exists before the creator's realtime
/// connection ever arrives.
pub(crate) fn spawn_session(
    session_id: SessionId,
    name: String,
    creator_id: UserId,
    invite_key: InviteKey,
    settings: SessionSettings,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_SIZE);

    let mut permissions = HashMap::new();
    permissions.insert(creator_id.clone(), PermissionSet::full());

    let actor = SessionActor {
        session_id: session_id.clone(),
        name,
        creator_id,
        invite_key,
        created_at: now_millis(),
        settings,
        state: SessionState::new(session_id.clone()),
        members: HashMap::new(),
        permissions,
        join_epoch: 0,
        receiver: rx,
    };

    tokio::spawn(actor.run());

    SessionHandle {
        session_id,
        sender: tx,
    }
}

// =========================================================================
// Tests
// =========================================================================
