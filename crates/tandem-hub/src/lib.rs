//! Session hub for Tandem: registry, admission control, and the
//! per-session state engine.
//!
//! Sessions run as isolated Tokio tasks (one actor per session) that
//! own all mutable session state; the [`SessionHub`] fronts them with
//! admission control, invite-key management, and garbage collection of
//! empty sessions. Cross-references between connections and sessions
//! are ids resolved through the registry, never long-lived pointers.

mod actor;
mod error;
mod hub;
mod keys;
mod registry;
mod session;

pub use actor::{
    EventSender, JoinOutcome, LeaveOutcome, SessionHandle, SessionOp,
    SessionQuery, SessionStatus,
};
pub use error::HubError;
pub use hub::{CreatedSession, HubConfig, SessionHub};
pub use keys::{generate_invite_key, generate_session_id};
pub use registry::{SessionEntry, SessionRegistry};
pub use session::{FileEntry, Project, ProjectMode, SessionState};
