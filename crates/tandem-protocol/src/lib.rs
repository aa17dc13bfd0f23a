//! Wire contract for the Tandem collaboration hub.
//!
//! This crate defines everything that travels between an editor client
//! and the hub: identity newtypes, the tagged event catalogue for both
//! directions, the shared payload structures, the codec seam, and the
//! payload validation limits. It has no I/O and no session state — the
//! other crates depend on it, never the reverse.

mod codec;
mod error;
mod events;
mod ids;
mod types;
pub mod validate;

#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use codec::Codec;
pub use error::ProtocolError;
pub use events::{ClientEvent, FileAction, FileOpData, HandshakeRequest, ServerEvent};
pub use ids::{ConnectionId, InviteKey, SessionId, UserId};
pub use types::{
    now_millis, AccessLevel, ChatEntry, CursorPosition, ErrorCode, ExecutionReport,
    FileKind, FileState, LoadMetrics, PermissionSet, ProjectMode, RuntimeInfo,
    SessionSettings, SessionSnapshot, SessionUser, StageOutput,
};
