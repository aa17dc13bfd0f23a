//! Shared wire structures: permissions, snapshots, presence, execution
//! reports, and load metrics.
//!
//! Everything here is serialized into event payloads, so field names
//! follow the editor client's camelCase convention via
//! `#[serde(rename_all = "camelCase")]`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{InviteKey, SessionId, UserId};

/// Milliseconds since the Unix epoch.
///
/// Wall-clock timestamps on the wire (`createdAt`, `lastModified`,
/// `sentAt`, `executionTime`) all use this representation.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// The per-user capability vector inside one session.
///
/// A row is materialized when a user first joins (copied from the
/// session's default permissions) and lives until the session dies —
/// it survives disconnect and rejoin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub can_view_files: bool,
    pub can_edit_files: bool,
    pub can_create_files: bool,
    pub can_create_folders: bool,
    pub can_delete_files: bool,
    pub can_manage_permissions: bool,
    pub can_invite_others: bool,
    pub can_execute: bool,
    pub can_chat: bool,
}

impl PermissionSet {
    /// Every capability granted. The creator always gets this.
    pub fn full() -> Self {
        Self {
            can_view_files: true,
            can_edit_files: true,
            can_create_files: true,
            can_create_folders: true,
            can_delete_files: true,
            can_manage_permissions: true,
            can_invite_others: true,
            can_execute: true,
            can_chat: true,
        }
    }

    /// Read-only access: view, cursor presence, chat. Used when an
    /// access-rights update demotes a member to viewer.
    pub fn viewer() -> Self {
        Self {
            can_view_files: true,
            can_edit_files: false,
            can_create_files: false,
            can_create_folders: false,
            can_delete_files: false,
            can_manage_permissions: false,
            can_invite_others: false,
            can_execute: false,
            can_chat: true,
        }
    }
}

/// The default vector for ordinary joiners: full collaboration rights,
/// but no destructive or administrative capabilities.
impl Default for PermissionSet {
    fn default() -> Self {
        Self {
            can_view_files: true,
            can_edit_files: true,
            can_create_files: true,
            can_create_folders: true,
            can_delete_files: false,
            can_manage_permissions: false,
            can_invite_others: false,
            can_execute: true,
            can_chat: true,
        }
    }
}

/// Coarse access level used by `access_rights_update`. The hub expands
/// a level into edits of `canEditFiles`/`canExecute` on the target's row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Viewer,
    Editor,
    Owner,
}

// ---------------------------------------------------------------------------
// Session settings & snapshots
// ---------------------------------------------------------------------------

/// Per-session settings, fixed at creation (invite-key rotation aside).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    /// Hard cap on concurrent members. Joins beyond this fail with
    /// `session_full`.
    pub max_users: usize,

    /// Whether guest principals may join. Guests are always admitted at
    /// the transport layer; this is the per-session gate.
    pub allow_guests: bool,

    /// The permission vector copied for each first-time joiner.
    pub default_permissions: PermissionSet,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_users: 10,
            allow_guests: false,
            default_permissions: PermissionSet::default(),
        }
    }
}

/// One member as reported in user listings and session snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub user_id: UserId,
    pub display_name: String,
    pub permissions: PermissionSet,
}

/// The session snapshot sent to a joiner (`session_joined`) and on
/// `get_session_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub name: String,
    pub creator_id: UserId,
    pub invite_key: InviteKey,
    pub created_at: u64,
    pub user_count: usize,
    pub max_users: usize,
    /// The requesting user's own permission row.
    pub user_permissions: PermissionSet,
    pub users: Vec<SessionUser>,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Whether a workspace entry is a file or a directory.
///
/// Directory entries have map keys ending in `/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// One entry of the session's in-memory file map, as sent on the wire
/// (`session_files_state`, `file_created`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub content: String,
    pub created_by: UserId,
    pub last_edited_by: UserId,
    pub last_modified: u64,
}

// ---------------------------------------------------------------------------
// Chat & presence
// ---------------------------------------------------------------------------

/// One chat message in the session's ordered log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub content: String,
    /// Client-defined message class ("text", "system", ...). Opaque to
    /// the hub.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub sent_at: u64,
}

/// A cursor location inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// How a project was attached to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectMode {
    /// The owner shared an existing project into the session.
    Share,
    /// The session created a fresh project, optionally from a template.
    Create,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// stdout/stderr/exit-code of one sandbox stage (compile or run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub code: Option<i32>,
}

/// The normalized result of one sandbox execution, broadcast to the
/// session room as `execution_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub success: bool,
    pub language: String,
    pub version: String,
    pub compile: Option<StageOutput>,
    pub run: Option<StageOutput>,
    /// Convenience: `run.stdout`.
    pub output: String,
    /// Convenience: `run.stderr`, falling back to `compile.stderr`.
    pub error: String,
    /// `run.code`, falling back to `compile.code`, falling back to 0.
    pub exit_code: i32,
    /// Wall-clock completion timestamp (ms since epoch).
    pub execution_time: u64,
}

/// One language/version pair advertised by the sandbox (`get_runtimes`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub language: String,
    pub version: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

// ---------------------------------------------------------------------------
// Load metrics
// ---------------------------------------------------------------------------

/// The load snapshot broadcast every tick to subscribed sessions.
///
/// `cpu`, `memory`, and `network` derive from process counters; the
/// remaining gauges are synthetic placeholders in this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadMetrics {
    pub cpu: f64,
    pub memory: f64,
    pub network: f64,
    pub build_time: f64,
    pub active_users: usize,
    pub server_load: f64,
    pub error_rate: f64,
    pub response_time: f64,
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Machine-readable error codes carried by `session_error`, `error`,
/// `execution_error`, and `connection_error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidToken,
    GuestDenied,
    InvalidInvite,
    SessionFull,
    AccessDenied,
    InvalidPayload,
    UnsupportedLanguage,
    ExecutionTimeout,
    ExecutionFailed,
    RateLimited,
    SessionNotFound,
}

// =========================================================================
// Tests
// =========================================================================
