//! The event catalogue: every message that travels over a realtime
//! connection, in both directions.
//!
//! Events are internally tagged JSON objects — the `event` field names
//! the variant, everything else is the payload:
//!
//! ```json
//! { "event": "join_session", "inviteKey": "ABC123XYZ789" }
//! { "event": "chat_message", "content": "hi", "type": "text" }
//! ```
//!
//! This replaces duck-typed payload dispatch with an enumerated schema:
//! required fields are validated by serde at the router edge, unknown
//! fields are ignored, and unknown event names are skipped with a
//! logged warning (see [`ClientEvent::EVENT_NAMES`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    AccessLevel, ChatEntry, ConnectionId, CursorPosition, ErrorCode,
    ExecutionReport, FileKind, FileState, InviteKey, LoadMetrics,
    PermissionSet, RuntimeInfo, SessionId, SessionSnapshot, SessionUser,
    UserId,
};

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// The first frame a client sends after the WebSocket upgrade.
///
/// All fields are optional: a missing/invalid `token` produces a guest
/// connection, and a present `invite_key` triggers an immediate join on
/// top of the handshake (so clients don't need a second round trip).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    pub token: Option<String>,
    pub session_id: Option<SessionId>,
    pub invite_key: Option<InviteKey>,
}

// ---------------------------------------------------------------------------
// File operations
// ---------------------------------------------------------------------------

/// The verb of a `file_operation` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Delete,
    Rename,
    Save,
}

/// Action-specific payload of a `file_operation` event.
///
/// Which fields matter depends on the action: `create`/`save` read
/// `content` (and `type` for create), `rename` reads `new_path`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOpData {
    pub content: Option<String>,
    pub new_path: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<FileKind>,
}

// ---------------------------------------------------------------------------
// Client → hub
// ---------------------------------------------------------------------------

/// Every event a client may send after the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind this connection to a session, by invite key or (for
    /// rejoining members) by session id.
    #[serde(rename_all = "camelCase")]
    JoinSession {
        invite_key: Option<InviteKey>,
        session_id: Option<SessionId>,
    },

    /// Unbind from the current session.
    LeaveSession,

    /// Overwrite the session-wide shared code buffer (legacy
    /// single-document channel).
    CodeChange { code: String },

    /// Upsert one file's full content (last-writer-wins snapshot).
    #[serde(rename_all = "camelCase")]
    RealtimeCodeChange { file_path: String, content: String },

    /// Structured file-map operation: create, delete, rename, or save.
    FileOperation {
        action: FileAction,
        path: String,
        data: Option<FileOpData>,
    },

    /// Create a file under the session's root (`<sessionId>/<name>`).
    CreateFile {
        name: String,
        content: Option<String>,
    },

    /// Create a directory under the session's root.
    CreateFolder { name: String },

    /// Cursor presence. Not stored; relayed to peers.
    #[serde(rename_all = "camelCase")]
    CursorUpdate {
        file_path: String,
        position: CursorPosition,
        selection: Option<Value>,
        color: Option<String>,
    },

    /// "I am looking at this file now" presence.
    #[serde(rename_all = "camelCase")]
    FileActivityUpdate { file_path: String },

    /// Append a chat message to the session log.
    ChatMessage {
        content: String,
        #[serde(rename = "type", default)]
        kind: Option<String>,
    },

    /// Run code in the external sandbox and report to the room.
    ExecuteCode {
        code: String,
        language: String,
        input: Option<String>,
    },

    /// Replace one member's permission vector. Creator only.
    #[serde(rename_all = "camelCase")]
    UpdateUserPermissions {
        user_id: UserId,
        permissions: PermissionSet,
    },

    /// Attach an existing project to the session. Creator only.
    ProjectShareInit { data: Option<Value> },

    /// Create a fresh project in the session, optionally preloading
    /// template files. Creator only.
    ProjectCreateInit {
        template: Option<String>,
        data: Option<Value>,
    },

    /// Coarse-grained permission change keyed on access level.
    /// Project owner only.
    #[serde(rename_all = "camelCase")]
    AccessRightsUpdate {
        user_id: UserId,
        access_level: AccessLevel,
    },

    /// Reply-to-sender queries.
    GetSessionUsers,
    GetSessionInfo,
    GetSessionFiles,

    /// Proxy the sandbox's runtime listing to the sender.
    GetRuntimes,

    /// Subscribe this session to the load-metrics ticker.
    StartPerformanceMonitoring,

    /// Unsubscribe this session from the load-metrics ticker.
    StopPerformanceMonitoring,
}

impl ClientEvent {
    /// Every event name the hub understands, as it appears in the
    /// `event` tag. Used to distinguish "unknown event" (ignored with
    /// a warning) from "known event with a bad payload"
    /// (`invalid_payload` error).
    pub const EVENT_NAMES: &'static [&'static str] = &[
        "join_session",
        "leave_session",
        "code_change",
        "realtime_code_change",
        "file_operation",
        "create_file",
        "create_folder",
        "cursor_update",
        "file_activity_update",
        "chat_message",
        "execute_code",
        "update_user_permissions",
        "project_share_init",
        "project_create_init",
        "access_rights_update",
        "get_session_users",
        "get_session_info",
        "get_session_files",
        "get_runtimes",
        "start_performance_monitoring",
        "stop_performance_monitoring",
    ];

    /// Returns `true` if `name` is a recognized event tag.
    pub fn is_known(name: &str) -> bool {
        Self::EVENT_NAMES.contains(&name)
    }
}

// ---------------------------------------------------------------------------
// Hub → client
// ---------------------------------------------------------------------------

/// Every event the hub may send to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledgement.
    #[serde(rename_all = "camelCase")]
    Connected {
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: String,
        authenticated: bool,
        guest: bool,
    },

    /// To the joiner: you are in, here is the session.
    SessionJoined { session: SessionSnapshot },

    /// To the leaver: you are out.
    #[serde(rename_all = "camelCase")]
    SessionLeft { session_id: SessionId },

    /// To the room: someone arrived.
    #[serde(rename_all = "camelCase")]
    UserJoinedSession {
        user_id: UserId,
        display_name: String,
        user_count: usize,
    },

    /// To the room: someone left.
    #[serde(rename_all = "camelCase")]
    UserLeftSession {
        user_id: UserId,
        display_name: String,
        user_count: usize,
    },

    /// To the room: membership or roster changed.
    #[serde(rename_all = "camelCase")]
    SessionUpdate {
        user_count: usize,
        users: Vec<SessionUser>,
    },

    /// The shared code buffer changed (or its snapshot on join, with
    /// `user_id` absent).
    #[serde(rename_all = "camelCase")]
    CodeUpdate {
        code: String,
        user_id: Option<UserId>,
    },

    /// One file's content changed.
    #[serde(rename_all = "camelCase")]
    RealtimeCodeUpdate {
        file_path: String,
        content: String,
        user_id: UserId,
    },

    /// Echo of an applied `file_operation`, to peers.
    #[serde(rename_all = "camelCase")]
    FileOperation {
        action: FileAction,
        path: String,
        data: Option<FileOpData>,
        user_id: UserId,
    },

    /// To the room: a file was created.
    FileCreated { file: FileState },

    /// To the room: a folder was created.
    FolderCreated { file: FileState },

    /// Cursor presence relay, to peers.
    #[serde(rename_all = "camelCase")]
    CursorUpdate {
        file_path: String,
        position: CursorPosition,
        selection: Option<Value>,
        color: Option<String>,
        user_id: UserId,
        display_name: String,
    },

    /// File-focus presence relay, to peers.
    #[serde(rename_all = "camelCase")]
    FileActivityUpdate { file_path: String, user_id: UserId },

    /// To the room: a chat message was appended.
    ChatMessage { message: ChatEntry },

    /// To the sender: full file-map snapshot.
    SessionFilesState { files: Vec<FileState> },

    /// To the sender: current roster.
    SessionUsers { users: Vec<SessionUser> },

    /// To the sender: session snapshot.
    SessionInfo { session: SessionSnapshot },

    /// To the room: an execution was accepted and dispatched.
    #[serde(rename_all = "camelCase")]
    ExecutionStarted { user_id: UserId, language: String },

    /// To the room: the sandbox finished.
    #[serde(rename_all = "camelCase")]
    ExecutionResult {
        result: ExecutionReport,
        user_id: UserId,
    },

    /// To the room (or sender, for `unsupported_language`): the
    /// execution failed before producing a result.
    ExecutionError {
        code: ErrorCode,
        message: String,
        details: Option<String>,
    },

    /// To the room: a member's permission vector was replaced.
    #[serde(rename_all = "camelCase")]
    PermissionsUpdated {
        user_id: UserId,
        permissions: PermissionSet,
    },

    /// To the room: a project was shared into the session.
    #[serde(rename_all = "camelCase")]
    ProjectShareInit {
        owner_id: UserId,
        data: Option<Value>,
    },

    /// To the room: a project was created in the session.
    #[serde(rename_all = "camelCase")]
    ProjectCreateInit {
        owner_id: UserId,
        template: Option<String>,
        data: Option<Value>,
    },

    /// To the room: a member's access level changed.
    #[serde(rename_all = "camelCase")]
    AccessRightsUpdate {
        user_id: UserId,
        access_level: AccessLevel,
        permissions: PermissionSet,
    },

    /// To the sender: metrics subscription confirmed.
    MonitoringStarted,

    /// To the sender: metrics subscription removed.
    MonitoringStopped,

    /// To subscribed rooms, every tick.
    PerformanceMetrics { metrics: LoadMetrics },

    /// Terminal broadcast: the session is gone.
    #[serde(rename_all = "camelCase")]
    SessionDeleted { session_id: SessionId },

    /// To the sender: admission failed (invalid invite, full, guests
    /// not allowed, ...).
    SessionError { code: ErrorCode, message: String },

    /// To the sender: a non-admission event failed validation or
    /// authorization. No state was changed.
    Error { code: ErrorCode, message: String },

    /// Terminal handshake failure (rate limit). The transport closes
    /// right after this event.
    ConnectionError { code: ErrorCode, message: String },

    /// To the sender: the sandbox's language/version listing.
    Runtimes { runtimes: Vec<RuntimeInfo> },
}

impl ServerEvent {
    /// Shorthand for the sender-only `error` event.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for the admission-failure `session_error` event.
    pub fn session_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::SessionError {
            code,
            message: message.into(),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
