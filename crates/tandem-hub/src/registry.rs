//! The session registry: the directory of live sessions.
//!
//! Two indexes, kept in sync: sessions by id and session ids by invite
//! key. The registry is the source of truth for the one-key-one-session
//! invariant; everything per-session (members, permissions, workspace)
//! lives in the session actor.
//!
//! # Concurrency note
//!
//! `SessionRegistry` is NOT thread-safe by itself — it uses plain
//! `HashMap`s. The hub wraps it in a single mutex and never holds that
//! lock across an await into a session actor (lock order: registry →
//! session, snapshot the handle, release, then await).

use std::collections::HashMap;

use tandem_protocol::{InviteKey, SessionId, UserId};

use crate::actor::SessionHandle;

/// Registry metadata for one live session.
///
/// `creator_id` is duplicated here (it also lives in the actor) because
/// creator-capability checks on registry operations — rotate, delete —
/// must not await into the actor while the registry lock is held. It is
/// written once at insert and never updated.
#[derive(Clone)]
pub struct SessionEntry {
    pub handle: SessionHandle,
    pub creator_id: UserId,
    pub invite_key: InviteKey,
}

/// The directory of live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionEntry>,
    invite_keys: HashMap<InviteKey, SessionId>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its id and invite key.
    ///
    /// The caller guarantees the key is collision-free (it generates
    /// keys in a re-roll loop against [`Self::has_invite_key`]).
    pub fn insert(&mut self, session_id: SessionId, entry: SessionEntry) {
        self.invite_keys
            .insert(entry.invite_key.clone(), session_id.clone());
        self.sessions.insert(session_id, entry);
    }

    /// Looks up a session by id.
    pub fn get(&self, session_id: &SessionId) -> Option<&SessionEntry> {
        self.sessions.get(session_id)
    }

    /// Resolves an invite key to its session.
    pub fn get_by_invite_key(&self, key: &InviteKey) -> Option<&SessionEntry> {
        let session_id = self.invite_keys.get(key)?;
        self.sessions.get(session_id)
    }

    /// Whether any live session holds this invite key.
    pub fn has_invite_key(&self, key: &InviteKey) -> bool {
        self.invite_keys.contains_key(key)
    }

    /// Removes a session and its invite key. Idempotent: removing a
    /// purged session is a no-op returning `None`.
    pub fn remove(&mut self, session_id: &SessionId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(session_id)?;
        self.invite_keys.remove(&entry.invite_key);
        Some(entry)
    }

    /// Atomically swaps a session's invite key: the old key is
    /// unregistered and the new one registered in one step (both under
    /// the caller's registry lock).
    ///
    /// Returns the old key, or `None` if the session doesn't exist.
    pub fn rotate_invite_key(
        &mut self,
        session_id: &SessionId,
        new_key: InviteKey,
    ) -> Option<InviteKey> {
        let entry = self.sessions.get_mut(session_id)?;
        let old_key = std::mem::replace(&mut entry.invite_key, new_key.clone());
        self.invite_keys.remove(&old_key);
        self.invite_keys.insert(new_key, session_id.clone());
        Some(old_key)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of all live sessions.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }
}

// =========================================================================
// Tests
// =========================================================================
