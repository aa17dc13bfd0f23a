//! The session state engine: the mutable workspace owned by one
//! session actor.
//!
//! [`SessionState`] holds the shared code buffer, the file map, the chat
//! log, and the optional project. Every mutation validates its input
//! (limits are re-checked here even though the router already did — this
//! layer must hold on its own) and returns the derived event for the
//! actor to fan out. No I/O, no locking, no transport: the actor's
//! single-threaded command loop is the only caller, which is what makes
//! mutations linearizable.

use std::collections::HashMap;

use serde_json::Value;
use tandem_protocol::validate::{validate_code, validate_path};
use tandem_protocol::{
    now_millis, ChatEntry, FileAction, FileKind, FileOpData, FileState,
    ServerEvent, SessionId, UserId,
};

use crate::HubError;

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// How a project was attached to the session.
pub use tandem_protocol::ProjectMode;

/// A project attached to a session via `project_share_init` /
/// `project_create_init`.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub mode: ProjectMode,
    pub owner_id: UserId,
    pub template: Option<String>,
    pub data: Option<Value>,
}

// ---------------------------------------------------------------------------
// File entries
// ---------------------------------------------------------------------------

/// One entry of the in-memory file map. The path is the map key;
/// directory keys end in `/`.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub kind: FileKind,
    pub content: String,
    pub created_by: UserId,
    pub last_edited_by: UserId,
    pub last_modified: u64,
}

impl FileEntry {
    fn to_state(&self, path: &str) -> FileState {
        FileState {
            path: path.to_string(),
            kind: self.kind,
            content: self.content.clone(),
            created_by: self.created_by.clone(),
            last_edited_by: self.last_edited_by.clone(),
            last_modified: self.last_modified,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The mutable workspace of one session.
#[derive(Debug)]
pub struct SessionState {
    session_id: SessionId,
    /// The session-scoped shared string (legacy single-document channel).
    pub code_buffer: String,
    files: HashMap<String, FileEntry>,
    chat_log: Vec<ChatEntry>,
    pub project: Option<Project>,
}

impl SessionState {
    /// Creates an empty workspace for `session_id`.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            code_buffer: String::new(),
            files: HashMap::new(),
            chat_log: Vec::new(),
            project: None,
        }
    }

    // -- Code buffer ------------------------------------------------------

    /// Overwrites the shared code buffer (last writer wins).
    pub fn set_code(&mut self, user: &UserId, code: String) -> Result<ServerEvent, HubError> {
        validate_code(&code)?;
        self.code_buffer = code.clone();
        Ok(ServerEvent::CodeUpdate {
            code,
            user_id: Some(user.clone()),
        })
    }

    // -- File map ---------------------------------------------------------

    /// Upserts one file's full content (`realtime_code_change`).
    ///
    /// Creating and editing go through the same path: a snapshot for an
    /// unknown file creates it, attributed to the sender.
    pub fn upsert_file(
        &mut self,
        user: &UserId,
        file_path: String,
        content: String,
    ) -> Result<ServerEvent, HubError> {
        validate_path(&file_path)?;
        validate_code(&content)?;

        let now = now_millis();
        self.files
            .entry(file_path.clone())
            .and_modify(|entry| {
                entry.content = content.clone();
                entry.last_edited_by = user.clone();
                entry.last_modified = now;
            })
            .or_insert_with(|| FileEntry {
                kind: FileKind::File,
                content: content.clone(),
                created_by: user.clone(),
                last_edited_by: user.clone(),
                last_modified: now,
            });

        Ok(ServerEvent::RealtimeCodeUpdate {
            file_path,
            content,
            user_id: user.clone(),
        })
    }

    /// Applies a structured `file_operation` (create/delete/rename/save).
    pub fn apply_file_operation(
        &mut self,
        user: &UserId,
        action: FileAction,
        path: String,
        data: Option<FileOpData>,
    ) -> Result<ServerEvent, HubError> {
        validate_path(&path)?;
        let now = now_millis();
        let payload = data.clone().unwrap_or_default();

        match action {
            FileAction::Create => {
                let content = payload.content.unwrap_or_default();
                validate_code(&content)?;
                let kind = payload.kind.unwrap_or(FileKind::File);
                self.files.insert(
                    path.clone(),
                    FileEntry {
                        kind,
                        content,
                        created_by: user.clone(),
                        last_edited_by: user.clone(),
                        last_modified: now,
                    },
                );
            }
            FileAction::Delete => {
                self.files.remove(&path);
                // Deleting a directory removes everything under it.
                if path.ends_with('/') {
                    self.files.retain(|key, _| !key.starts_with(&path));
                }
            }
            FileAction::Rename => {
                let new_path = payload.new_path.clone().ok_or_else(|| {
                    HubError::InvalidPayload("rename requires data.newPath".into())
                })?;
                validate_path(&new_path)?;

                let Some(mut entry) = self.files.remove(&path) else {
                    return Err(HubError::InvalidPayload(format!(
                        "no such file: {path}"
                    )));
                };
                entry.last_edited_by = user.clone();
                entry.last_modified = now;
                self.files.insert(new_path.clone(), entry);

                // Re-key children when a directory moves.
                if path.ends_with('/') {
                    let children: Vec<String> = self
                        .files
                        .keys()
                        .filter(|k| k.starts_with(&path))
                        .cloned()
                        .collect();
                    for old_key in children {
                        if let Some(child) = self.files.remove(&old_key) {
                            let new_key =
                                format!("{new_path}{}", &old_key[path.len()..]);
                            self.files.insert(new_key, child);
                        }
                    }
                }
            }
            FileAction::Save => {
                let content = payload.content.unwrap_or_default();
                validate_code(&content)?;
                self.files
                    .entry(path.clone())
                    .and_modify(|entry| {
                        entry.content = content.clone();
                        entry.last_edited_by = user.clone();
                        entry.last_modified = now;
                    })
                    .or_insert_with(|| FileEntry {
                        kind: FileKind::File,
                        content,
                        created_by: user.clone(),
                        last_edited_by: user.clone(),
                        last_modified: now,
                    });
            }
        }

        Ok(ServerEvent::FileOperation {
            action,
            path,
            data,
            user_id: user.clone(),
        })
    }

    /// Creates a file under the session root: `<sessionId>/<name>`.
    pub fn create_file(
        &mut self,
        user: &UserId,
        name: &str,
        content: String,
    ) -> Result<ServerEvent, HubError> {
        if name.trim().is_empty() {
            return Err(HubError::InvalidPayload("file name is empty".into()));
        }
        let path = format!("{}/{}", self.session_id, name);
        validate_path(&path)?;
        validate_code(&content)?;

        let entry = FileEntry {
            kind: FileKind::File,
            content,
            created_by: user.clone(),
            last_edited_by: user.clone(),
            last_modified: now_millis(),
        };
        let state = entry.to_state(&path);
        self.files.insert(path, entry);
        Ok(ServerEvent::FileCreated { file: state })
    }

    /// Creates a directory under the session root: `<sessionId>/<name>/`.
    pub fn create_folder(
        &mut self,
        user: &UserId,
        name: &str,
    ) -> Result<ServerEvent, HubError> {
        let name = name.trim_end_matches('/');
        if name.trim().is_empty() {
            return Err(HubError::InvalidPayload("folder name is empty".into()));
        }
        let path = format!("{}/{}/", self.session_id, name);
        validate_path(&path)?;

        let entry = FileEntry {
            kind: FileKind::Directory,
            content: String::new(),
            created_by: user.clone(),
            last_edited_by: user.clone(),
            last_modified: now_millis(),
        };
        let state = entry.to_state(&path);
        self.files.insert(path, entry);
        Ok(ServerEvent::FolderCreated { file: state })
    }

    /// Full file-map snapshot, sorted by path for stable output.
    pub fn files_snapshot(&self) -> Vec<FileState> {
        let mut files: Vec<FileState> = self
            .files
            .iter()
            .map(|(path, entry)| entry.to_state(path))
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// Looks up one file entry (tests and queries).
    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    // -- Chat -------------------------------------------------------------

    /// Appends a chat message to the ordered log.
    pub fn append_chat(
        &mut self,
        user: &UserId,
        display_name: &str,
        content: String,
        kind: Option<String>,
    ) -> ServerEvent {
        let entry = ChatEntry {
            user_id: user.clone(),
            display_name: display_name.to_string(),
            content,
            kind,
            sent_at: now_millis(),
        };
        self.chat_log.push(entry.clone());
        ServerEvent::ChatMessage { message: entry }
    }

    /// The number of chat messages (tests).
    pub fn chat_len(&self) -> usize {
        self.chat_log.len()
    }

    // -- Project ----------------------------------------------------------

    /// Attaches a project to the session. In `Create` mode, preloads the
    /// template's starter files under the session root.
    pub fn set_project(
        &mut self,
        owner: &UserId,
        mode: ProjectMode,
        template: Option<String>,
        data: Option<Value>,
    ) -> ServerEvent {
        if mode == ProjectMode::Create {
            for (name, content) in template_files(template.as_deref()) {
                let path = format!("{}/{}", self.session_id, name);
                self.files.entry(path).or_insert_with(|| FileEntry {
                    kind: FileKind::File,
                    content: content.to_string(),
                    created_by: owner.clone(),
                    last_edited_by: owner.clone(),
                    last_modified: now_millis(),
                });
            }
        }

        self.project = Some(Project {
            mode,
            owner_id: owner.clone(),
            template: template.clone(),
            data: data.clone(),
        });

        match mode {
            ProjectMode::Share => ServerEvent::ProjectShareInit {
                owner_id: owner.clone(),
                data,
            },
            ProjectMode::Create => ServerEvent::ProjectCreateInit {
                owner_id: owner.clone(),
                template,
                data,
            },
        }
    }
}

/// Starter files per project template. Unknown templates get a bare
/// entry point.
fn template_files(template: Option<&str>) -> &'static [(&'static str, &'static str)] {
    match template {
        Some("node") => &[
            ("index.js", "console.log('hello from tandem');\n"),
            (
                "package.json",
                "{\n  \"name\": \"tandem-project\",\n  \"version\": \"0.1.0\",\n  \"main\": \"index.js\"\n}\n",
            ),
        ],
        Some("python") => &[("main.py", "print(\"hello from tandem\")\n")],
        _ => &[("main.txt", "")],
    }
}

// =========================================================================
// Tests
// =========================================================================
