//! The session hub: admission control and lifecycle on top of the
//! registry.
//!
//! This is the public entry point for session operations — the realtime
//! router and the (external) REST surface both come through here, so
//! the invariants hold no matter who is calling. The hub owns the
//! registry mutex; session actors are reached by snapshotting a handle
//! out of the registry and releasing the lock before awaiting.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tandem_auth::Principal;
use tandem_protocol::{
    ConnectionId, InviteKey, SessionId, SessionSettings, UserId,
};
use tokio::sync::Mutex;

use crate::actor::{
    spawn_session, EventSender, JoinOutcome, LeaveOutcome, SessionHandle,
};
use crate::keys::{generate_invite_key, generate_session_id};
use crate::registry::{SessionEntry, SessionRegistry};
use crate::HubError;

/// Hub-wide configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Settings applied to sessions created without overrides.
    pub default_settings: SessionSettings,
    /// How long an empty session lives before the GC sweep purges it.
    pub idle_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            default_settings: SessionSettings::default(),
            idle_timeout: Duration::from_secs(3600),
        }
    }
}

/// What session creation hands back to the creator.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: SessionId,
    pub invite_key: InviteKey,
    pub name: String,
}

/// The session hub. Construct with [`SessionHub::new`]; it is always
/// behind an `Arc` so GC sweeps can find their way back.
pub struct SessionHub {
    registry: Mutex<SessionRegistry>,
    config: HubConfig,
    /// Self-reference for the detached GC sweep tasks. `Weak` so a
    /// dropped hub (tests, shutdown) lets sweeps die quietly.
    weak: Weak<SessionHub>,
}

impl SessionHub {
    /// Creates a hub with the given configuration.
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            registry: Mutex::new(SessionRegistry::new()),
            config,
            weak: weak.clone(),
        })
    }

    // -- Creation ---------------------------------------------------------

    /// Creates a new session owned by `creator`.
    ///
    /// Generates a non-guessable id and a collision-free invite key,
    /// spawns the session actor (which seeds the creator's permission
    /// row — the pseudo-join), and registers both indexes.
    pub async fn create_session(
        &self,
        creator: &Principal,
        name: Option<String>,
        settings: Option<SessionSettings>,
    ) -> CreatedSession {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{}'s session", creator.display_name));
        let settings = settings.unwrap_or_else(|| self.config.default_settings.clone());

        let mut registry = self.registry.lock().await;

        let session_id = loop {
            let candidate = generate_session_id();
            if registry.get(&candidate).is_none() {
                break candidate;
            }
        };
        let invite_key = loop {
            let candidate = generate_invite_key();
            if !registry.has_invite_key(&candidate) {
                break candidate;
            }
        };

        let handle = spawn_session(
            session_id.clone(),
            name.clone(),
            creator.user_id.clone(),
            invite_key.clone(),
            settings,
        );
        registry.insert(
            session_id.clone(),
            SessionEntry {
                handle,
                creator_id: creator.user_id.clone(),
                invite_key: invite_key.clone(),
            },
        );

        tracing::info!(
            %session_id,
            creator = %creator.user_id,
            "session created"
        );

        CreatedSession {
            session_id,
            invite_key,
            name,
        }
    }

    // -- Resolution -------------------------------------------------------

    /// Resolves an invite key to a session handle.
    pub async fn resolve_by_invite(
        &self,
        key: &InviteKey,
    ) -> Result<SessionHandle, HubError> {
        self.registry
            .lock()
            .await
            .get_by_invite_key(key)
            .map(|entry| entry.handle.clone())
            .ok_or(HubError::InvalidInvite)
    }

    /// Resolves a session id to a handle.
    pub async fn resolve(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionHandle, HubError> {
        self.registry
            .lock()
            .await
            .get(session_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| HubError::SessionNotFound(session_id.clone()))
    }

    // -- Admission --------------------------------------------------------

    /// Joins a session by invite key.
    pub async fn join_with_invite_key(
        &self,
        key: &InviteKey,
        principal: Principal,
        connection_id: ConnectionId,
        sender: EventSender,
    ) -> Result<(SessionId, JoinOutcome), HubError> {
        let handle = self.resolve_by_invite(key).await?;
        let session_id = handle.session_id().clone();
        let outcome = handle.join(principal, connection_id, sender).await?;
        Ok((session_id, outcome))
    }

    /// Joins a session by id (rejoin path: the client still knows the
    /// session from before its transport dropped).
    pub async fn join_session(
        &self,
        session_id: &SessionId,
        principal: Principal,
        connection_id: ConnectionId,
        sender: EventSender,
    ) -> Result<JoinOutcome, HubError> {
        let handle = self.resolve(session_id).await?;
        handle.join(principal, connection_id, sender).await
    }

    /// Removes a connection from a session (explicit `leave_session` or
    /// implicit on transport close). Schedules the GC sweep when the
    /// last member drains out.
    pub async fn leave(
        &self,
        session_id: &SessionId,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<LeaveOutcome, HubError> {
        let handle = self.resolve(session_id).await?;
        let outcome = handle.leave(user_id, connection_id).await?;
        if outcome.remaining == 0 {
            self.schedule_gc(session_id.clone(), outcome.epoch);
        }
        Ok(outcome)
    }

    // -- Creator capabilities ---------------------------------------------

    /// Rotates a session's invite key. Creator only.
    ///
    /// The swap is atomic under the registry lock: there is no instant
    /// at which both keys (or neither) resolve.
    pub async fn rotate_invite_key(
        &self,
        session_id: &SessionId,
        caller: &UserId,
    ) -> Result<InviteKey, HubError> {
        let (handle, new_key) = {
            let mut registry = self.registry.lock().await;
            let entry = registry
                .get(session_id)
                .ok_or_else(|| HubError::SessionNotFound(session_id.clone()))?;
            if entry.creator_id != *caller {
                return Err(HubError::AccessDenied(
                    "only the session creator may rotate the invite key".into(),
                ));
            }
            let handle = entry.handle.clone();

            let new_key = loop {
                let candidate = generate_invite_key();
                if !registry.has_invite_key(&candidate) {
                    break candidate;
                }
            };
            registry.rotate_invite_key(session_id, new_key.clone());
            (handle, new_key)
        };

        // Refresh the actor's snapshot copy outside the registry lock.
        handle.set_invite_key(new_key.clone()).await?;

        tracing::info!(%session_id, "invite key rotated");
        Ok(new_key)
    }

    /// Deletes a session. Creator only. Members get the terminal
    /// `session_deleted` broadcast before the actor stops.
    pub async fn delete_session(
        &self,
        session_id: &SessionId,
        caller: &UserId,
    ) -> Result<(), HubError> {
        let entry = {
            let mut registry = self.registry.lock().await;
            let entry = registry
                .get(session_id)
                .ok_or_else(|| HubError::SessionNotFound(session_id.clone()))?;
            if entry.creator_id != *caller {
                return Err(HubError::AccessDenied(
                    "only the session creator may delete the session".into(),
                ));
            }
            registry.remove(session_id).expect("checked just above")
        };

        entry.handle.shutdown(true).await?;
        tracing::info!(%session_id, "session deleted by creator");
        Ok(())
    }

    // -- Garbage collection -----------------------------------------------

    /// Schedules a delayed sweep for a drained session. The sweep
    /// re-checks emptiness and the join epoch: a rejoin after
    /// scheduling bumps the epoch and the stale sweep stands down.
    /// Purging is idempotent.
    fn schedule_gc(&self, session_id: SessionId, epoch: u64) {
        let weak = self.weak.clone();
        let idle_timeout = self.config.idle_timeout;
        tracing::debug!(%session_id, timeout_secs = idle_timeout.as_secs(), "GC sweep scheduled");

        tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;

            let Some(hub) = weak.upgrade() else {
                return;
            };
            let handle = {
                let registry = hub.registry.lock().await;
                registry.get(&session_id).map(|e| e.handle.clone())
            };
            let Some(handle) = handle else {
                return; // already purged (delete or an earlier sweep)
            };

            match handle.status().await {
                Ok(status) if status.member_count == 0 && status.epoch == epoch => {
                    let removed = hub.registry.lock().await.remove(&session_id);
                    if removed.is_some() {
                        let _ = handle.shutdown(false).await;
                        tracing::info!(%session_id, "empty session purged");
                    }
                }
                Ok(_) => {
                    // Someone rejoined; a newer sweep owns the next drain.
                }
                Err(_) => {
                    // Actor died out from under us; clear the indexes.
                    hub.registry.lock().await.remove(&session_id);
                }
            }
        });
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.lock().await.len()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Admission and lifecycle tests through the public hub API.
    //!
    //! GC tests run with `start_paused = true`: Tokio auto-advances the
    //! clock when the runtime idles, so the 1-hour sweep fires without
    //! wall-clock sleeping and without flakiness.

    use tandem_auth::{Principal, Role, TokenOrigin};
    use tandem_protocol::{ServerEvent, UserId};
    use tokio::sync::mpsc;

    use super::*;

    // -- Helpers ----------------------------------------------------------

    fn principal(id: &str) -> Principal {
        Principal {
            user_id: UserId(id.to_string()),
            email: Some(format!("{id}@example.com")),
            display_name: id.to_string(),
            role: Role::User,
            avatar: None,
            origin: TokenOrigin::AutoCreated,
        }
    }

    fn client() -> (
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    async fn hub_with_session() -> (Arc<SessionHub>, CreatedSession) {
        let hub = SessionHub::new(HubConfig::default());
        let created = hub
            .create_session(&principal("creator"), Some("demo".into()), None)
            .await;
        (hub, created)
    }

    // =====================================================================
    // create_session()
    // =====================================================================

    #[tokio::test]
    async fn test_create_session_generates_well_formed_credentials() {
        let (_hub, created) = hub_with_session().await;

        assert_eq!(created.session_id.as_str().len(), 32);
        assert!(created.invite_key.is_well_formed());
        assert_eq!(created.name, "demo");
    }

    #[tokio::test]
    async fn test_create_session_defaults_name_from_creator() {
        let hub = SessionHub::new(HubConfig::default());
        let created = hub.create_session(&principal("ada"), None, None).await;
        assert_eq!(created.name, "ada's session");
    }

    #[tokio::test]
    async fn test_created_session_is_joinable_by_key() {
        let (hub, created) = hub_with_session().await;

        let (tx, _rx) = client();
        let (session_id, outcome) = hub
            .join_with_invite_key(
                &created.invite_key,
                principal("b"),
                ConnectionId(1),
                tx,
            )
            .await
            .expect("join should succeed");

        assert_eq!(session_id, created.session_id);
        assert_eq!(outcome.snapshot.user_count, 1);
        assert_eq!(outcome.snapshot.creator_id, UserId("creator".into()));
    }

    #[tokio::test]
    async fn test_creator_auto_join_materializes_full_permissions() {
        let (hub, created) = hub_with_session().await;

        // The creator connects later; the row seeded at creation is
        // what the snapshot reports.
        let (tx, _rx) = client();
        let outcome = hub
            .join_session(
                &created.session_id,
                principal("creator"),
                ConnectionId(1),
                tx,
            )
            .await
            .unwrap();

        assert!(outcome.snapshot.user_permissions.can_manage_permissions);
        assert!(outcome.snapshot.user_permissions.can_invite_others);
    }

    // =====================================================================
    // join failures
    // =====================================================================

    #[tokio::test]
    async fn test_join_unknown_key_is_invalid_invite() {
        let (hub, _created) = hub_with_session().await;

        let (tx, _rx) = client();
        let result = hub
            .join_with_invite_key(
                &InviteKey("ZZZZZZZZZZZZ".into()),
                principal("b"),
                ConnectionId(1),
                tx,
            )
            .await;

        assert!(matches!(result, Err(HubError::InvalidInvite)));
    }

    #[tokio::test]
    async fn test_join_unknown_session_id_fails() {
        let (hub, _created) = hub_with_session().await;

        let (tx, _rx) = client();
        let result = hub
            .join_session(
                &SessionId("0000".into()),
                principal("b"),
                ConnectionId(1),
                tx,
            )
            .await;

        assert!(matches!(result, Err(HubError::SessionNotFound(_))));
    }

    // =====================================================================
    // rotate_invite_key()
    // =====================================================================

    #[tokio::test]
    async fn test_rotate_invalidates_old_key_and_registers_new() {
        let (hub, created) = hub_with_session().await;
        let old_key = created.invite_key.clone();

        let new_key = hub
            .rotate_invite_key(&created.session_id, &UserId("creator".into()))
            .await
            .expect("creator may rotate");

        assert_ne!(new_key, old_key);
        assert!(new_key.is_well_formed());

        // Old key → invalid_invite; new key → joins.
        let (tx, _rx) = client();
        let result = hub
            .join_with_invite_key(&old_key, principal("b"), ConnectionId(1), tx)
            .await;
        assert!(matches!(result, Err(HubError::InvalidInvite)));

        let (tx, _rx) = client();
        assert!(hub
            .join_with_invite_key(&new_key, principal("b"), ConnectionId(2), tx)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_rotate_requires_creator() {
        let (hub, created) = hub_with_session().await;

        let result = hub
            .rotate_invite_key(&created.session_id, &UserId("b".into()))
            .await;

        assert!(matches!(result, Err(HubError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn test_rotate_does_not_disturb_existing_members() {
        let (hub, created) = hub_with_session().await;
        let (tx, mut rx) = client();
        hub.join_with_invite_key(&created.invite_key, principal("b"), ConnectionId(1), tx)
            .await
            .unwrap();

        hub.rotate_invite_key(&created.session_id, &UserId("creator".into()))
            .await
            .unwrap();

        // Member is still in and got no terminal events.
        assert_eq!(hub.session_count().await, 1);
        while let Ok(ev) = rx.try_recv() {
            assert!(!matches!(ev, ServerEvent::SessionDeleted { .. }));
        }
    }

    // =====================================================================
    // delete_session()
    // =====================================================================

    #[tokio::test]
    async fn test_delete_broadcasts_and_purges() {
        let (hub, created) = hub_with_session().await;
        let (tx, mut rx) = client();
        hub.join_with_invite_key(&created.invite_key, principal("b"), ConnectionId(1), tx)
            .await
            .unwrap();

        hub.delete_session(&created.session_id, &UserId("creator".into()))
            .await
            .expect("creator may delete");

        assert_eq!(hub.session_count().await, 0);
        // The member saw the terminal broadcast once the actor drained.
        let mut saw_deleted = false;
        loop {
            match rx.recv().await {
                Some(ServerEvent::SessionDeleted { session_id }) => {
                    assert_eq!(session_id, created.session_id);
                    saw_deleted = true;
                }
                Some(_) => continue,
                None => break, // actor gone, channel closed
            }
        }
        assert!(saw_deleted);
    }

    #[tokio::test]
    async fn test_delete_requires_creator() {
        let (hub, created) = hub_with_session().await;

        let result = hub
            .delete_session(&created.session_id, &UserId("b".into()))
            .await;

        assert!(matches!(result, Err(HubError::AccessDenied(_))));
        assert_eq!(hub.session_count().await, 1);
    }

    // =====================================================================
    // Garbage collection
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_empty_session_purged_after_idle_timeout() {
        let (hub, created) = hub_with_session().await;
        let (tx, _rx) = client();
        hub.join_with_invite_key(&created.invite_key, principal("b"), ConnectionId(1), tx)
            .await
            .unwrap();

        hub.leave(&created.session_id, UserId("b".into()), ConnectionId(1))
            .await
            .unwrap();

        // The sweep fires after the (auto-advanced) idle hour.
        tokio::time::sleep(Duration::from_secs(3601)).await;
        tokio::task::yield_now().await;

        assert_eq!(hub.session_count().await, 0);
        assert!(hub.resolve(&created.session_id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_before_sweep_cancels_purge() {
        let (hub, created) = hub_with_session().await;
        let (tx, _rx) = client();
        hub.join_with_invite_key(&created.invite_key, principal("b"), ConnectionId(1), tx)
            .await
            .unwrap();
        hub.leave(&created.session_id, UserId("b".into()), ConnectionId(1))
            .await
            .unwrap();

        // Rejoin inside the GC window bumps the epoch.
        tokio::time::sleep(Duration::from_secs(60)).await;
        let (tx, _rx2) = client();
        hub.join_session(&created.session_id, principal("b"), ConnectionId(2), tx)
            .await
            .expect("session must still exist inside the GC window");

        // Let the original sweep fire; it must stand down.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        tokio::task::yield_now().await;

        assert_eq!(hub.session_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_after_rejoin_and_second_drain_still_purges() {
        let (hub, created) = hub_with_session().await;
        let (tx, _rx) = client();
        hub.join_with_invite_key(&created.invite_key, principal("b"), ConnectionId(1), tx)
            .await
            .unwrap();
        hub.leave(&created.session_id, UserId("b".into()), ConnectionId(1))
            .await
            .unwrap();

        // Rejoin, then drain again — the second drain schedules its own
        // sweep with the newer epoch.
        let (tx, _rx2) = client();
        hub.join_session(&created.session_id, principal("b"), ConnectionId(2), tx)
            .await
            .unwrap();
        hub.leave(&created.session_id, UserId("b".into()), ConnectionId(2))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(7200)).await;
        tokio::task::yield_now().await;

        assert_eq!(hub.session_count().await, 0);
    }
}
