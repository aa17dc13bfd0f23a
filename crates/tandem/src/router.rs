//! The event router: parse → bind → authorize → apply → fan out.
//!
//! Every inbound frame lands here. The router's own checks are shape
//! and binding; permissions are enforced inside the session actor (the
//! authoritative copy lives there), and every failure is answered with
//! a typed error event to the sender — never silence, never a state
//! change.
//!
//! Unknown event names are the one exception: they are ignored with a
//! logged warning, so an older hub doesn't error-spam a newer client.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tandem_exec::{runtime_for, ExecError, ExecutionRequest};
use tandem_hub::{SessionHandle, SessionOp, SessionQuery};
use tandem_protocol::validate::validate_code;
use tandem_protocol::{ClientEvent, ErrorCode, ServerEvent, SessionId};

use crate::handler::ConnectionCtx;
use crate::server::ServerState;

/// Decodes one inbound frame and dispatches it.
pub(crate) async fn route_frame(state: &Arc<ServerState>, ctx: &ConnectionCtx, data: &[u8]) {
    state.collector.note_event_in();

    let value: Value = match serde_json::from_slice(data) {
        Ok(value) => value,
        Err(e) => {
            state.collector.note_error();
            ctx.send(ServerEvent::error(
                ErrorCode::InvalidPayload,
                format!("frame is not valid JSON: {e}"),
            ));
            return;
        }
    };

    let event = match ClientEvent::deserialize(&value) {
        Ok(event) => event,
        Err(e) => {
            // Distinguish "event we don't know" (skip quietly) from
            // "event we know with a broken payload" (typed error).
            let name = value.get("event").and_then(Value::as_str);
            match name {
                Some(name) if !ClientEvent::is_known(name) => {
                    tracing::warn!(event = name, "ignoring unknown event");
                }
                _ => {
                    state.collector.note_error();
                    ctx.send(ServerEvent::error(
                        ErrorCode::InvalidPayload,
                        format!("malformed payload: {e}"),
                    ));
                }
            }
            return;
        }
    };

    handle_event(state, ctx, event).await;
}

/// Dispatches one parsed event.
pub(crate) async fn handle_event(
    state: &Arc<ServerState>,
    ctx: &ConnectionCtx,
    event: ClientEvent,
) {
    match event {
        ClientEvent::JoinSession {
            invite_key,
            session_id,
        } => handle_join(state, ctx, invite_key, session_id).await,

        ClientEvent::LeaveSession => handle_leave(state, ctx).await,

        // Sender-only, no session required: the runtime listing.
        ClientEvent::GetRuntimes => {
            match state.exec.runtimes().await {
                Ok(runtimes) => ctx.send(ServerEvent::Runtimes { runtimes }),
                Err(e) => {
                    state.collector.note_error();
                    ctx.send(ServerEvent::ExecutionError {
                        code: e.code(),
                        message: e.to_string(),
                        details: None,
                    });
                }
            }
        }

        ClientEvent::ExecuteCode {
            code,
            language,
            input,
        } => handle_execute(state, ctx, code, language, input).await,

        ClientEvent::GetSessionUsers => handle_query(state, ctx, SessionQuery::Users).await,
        ClientEvent::GetSessionInfo => handle_query(state, ctx, SessionQuery::Info).await,
        ClientEvent::GetSessionFiles => handle_query(state, ctx, SessionQuery::Files).await,

        ClientEvent::StartPerformanceMonitoring => {
            let Some((session_id, handle)) = bound_session(state, ctx).await else {
                return;
            };
            state.metrics.subscribe(session_id, handle);
            ctx.send(ServerEvent::MonitoringStarted);
        }

        ClientEvent::StopPerformanceMonitoring => {
            let Some((session_id, _handle)) = bound_session(state, ctx).await else {
                return;
            };
            state.metrics.unsubscribe(&session_id);
            ctx.send(ServerEvent::MonitoringStopped);
        }

        // Everything else maps 1:1 onto a session operation.
        other => {
            let Some(op) = session_op(other) else {
                // Unreachable by construction; every remaining variant
                // maps above or in session_op.
                return;
            };
            let Some((_session_id, handle)) = bound_session(state, ctx).await else {
                return;
            };
            if let Err(e) = handle
                .apply(ctx.user_id().clone(), ctx.connection_id, op)
                .await
            {
                state.collector.note_error();
                ctx.send(ServerEvent::error(e.code(), e.to_string()));
            }
        }
    }
}

/// Maps the session-scoped client events onto actor operations.
fn session_op(event: ClientEvent) -> Option<SessionOp> {
    Some(match event {
        ClientEvent::CodeChange { code } => SessionOp::CodeChange { code },
        ClientEvent::RealtimeCodeChange { file_path, content } => {
            SessionOp::RealtimeCodeChange { file_path, content }
        }
        ClientEvent::FileOperation { action, path, data } => {
            SessionOp::FileOperation { action, path, data }
        }
        ClientEvent::CreateFile { name, content } => SessionOp::CreateFile {
            name,
            content: content.unwrap_or_default(),
        },
        ClientEvent::CreateFolder { name } => SessionOp::CreateFolder { name },
        ClientEvent::CursorUpdate {
            file_path,
            position,
            selection,
            color,
        } => SessionOp::CursorUpdate {
            file_path,
            position,
            selection,
            color,
        },
        ClientEvent::FileActivityUpdate { file_path } => {
            SessionOp::FileActivityUpdate { file_path }
        }
        ClientEvent::ChatMessage { content, kind } => {
            SessionOp::ChatMessage { content, kind }
        }
        ClientEvent::UpdateUserPermissions {
            user_id,
            permissions,
        } => SessionOp::UpdateUserPermissions {
            target: user_id,
            permissions,
        },
        ClientEvent::ProjectShareInit { data } => SessionOp::ProjectInit {
            mode: tandem_hub::ProjectMode::Share,
            template: None,
            data,
        },
        ClientEvent::ProjectCreateInit { template, data } => SessionOp::ProjectInit {
            mode: tandem_hub::ProjectMode::Create,
            template,
            data,
        },
        ClientEvent::AccessRightsUpdate {
            user_id,
            access_level,
        } => SessionOp::AccessRightsUpdate {
            target: user_id,
            level: access_level,
        },
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Join / leave
// ---------------------------------------------------------------------------

async fn handle_join(
    state: &Arc<ServerState>,
    ctx: &ConnectionCtx,
    invite_key: Option<tandem_protocol::InviteKey>,
    session_id: Option<SessionId>,
) {
    // Single-session connections: a bound connection must leave first.
    if ctx.session_id().is_some() {
        state.collector.note_error();
        ctx.send(ServerEvent::error(
            ErrorCode::InvalidPayload,
            "connection is already bound to a session",
        ));
        return;
    }

    let result = match (invite_key, session_id) {
        (Some(key), _) => {
            state
                .sessions
                .join_with_invite_key(
                    &key,
                    ctx.principal.clone(),
                    ctx.connection_id,
                    ctx.sender(),
                )
                .await
        }
        (None, Some(session_id)) => state
            .sessions
            .join_session(
                &session_id,
                ctx.principal.clone(),
                ctx.connection_id,
                ctx.sender(),
            )
            .await
            .map(|outcome| (session_id, outcome)),
        (None, None) => {
            state.collector.note_error();
            ctx.send(ServerEvent::session_error(
                ErrorCode::InvalidPayload,
                "join_session requires inviteKey or sessionId",
            ));
            return;
        }
    };

    match result {
        Ok((session_id, outcome)) => {
            ctx.bind(session_id.clone());
            tracing::debug!(
                connection_id = %ctx.connection_id,
                %session_id,
                rejoin = outcome.already_member,
                "connection bound to session"
            );
            // Snapshot order is part of the contract: membership, then
            // the legacy buffer, then the file map.
            ctx.send(ServerEvent::SessionJoined {
                session: outcome.snapshot,
            });
            ctx.send(ServerEvent::CodeUpdate {
                code: outcome.code,
                user_id: None,
            });
            ctx.send(ServerEvent::SessionFilesState {
                files: outcome.files,
            });
        }
        Err(e) => {
            state.collector.note_error();
            ctx.send(ServerEvent::session_error(e.code(), e.to_string()));
        }
    }
}

async fn handle_leave(state: &Arc<ServerState>, ctx: &ConnectionCtx) {
    let Some(session_id) = ctx.session_id() else {
        state.collector.note_error();
        ctx.send(ServerEvent::error(
            ErrorCode::InvalidPayload,
            "no session to leave",
        ));
        return;
    };

    ctx.unbind();
    // The session may already be purged; the leave is then moot.
    let _ = state
        .sessions
        .leave(&session_id, ctx.user_id().clone(), ctx.connection_id)
        .await;
    ctx.send(ServerEvent::SessionLeft { session_id });
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

async fn handle_execute(
    state: &Arc<ServerState>,
    ctx: &ConnectionCtx,
    code: String,
    language: String,
    input: Option<String>,
) {
    let Some((_session_id, handle)) = bound_session(state, ctx).await else {
        return;
    };

    if let Err(e) = validate_code(&code) {
        state.collector.note_error();
        ctx.send(ServerEvent::error(ErrorCode::InvalidPayload, e.to_string()));
        return;
    }

    // Unknown language fails before anything is announced — the room
    // never sees a started/no-result pair.
    if runtime_for(&language).is_none() {
        state.collector.note_error();
        ctx.send(ServerEvent::ExecutionError {
            code: ErrorCode::UnsupportedLanguage,
            message: format!("unsupported language: {language}"),
            details: None,
        });
        return;
    }

    // The actor checks canExecute and broadcasts execution_started.
    if let Err(e) = handle
        .begin_execution(ctx.user_id().clone(), language.clone())
        .await
    {
        state.collector.note_error();
        ctx.send(ServerEvent::error(e.code(), e.to_string()));
        return;
    }

    // The sandbox round trip runs off the read loop so the requester
    // can keep editing; the result goes to the room that saw
    // execution_started — even if the requester is gone by then.
    let state = Arc::clone(state);
    let user_id = ctx.user_id().clone();
    tokio::spawn(async move {
        let request = ExecutionRequest {
            language,
            code,
            stdin: input,
        };
        let event = match state.exec.execute(&request).await {
            Ok(report) => ServerEvent::ExecutionResult {
                result: report,
                user_id,
            },
            Err(e) => {
                state.collector.note_error();
                let details = match &e {
                    ExecError::Failed(details) => Some(details.clone()),
                    _ => None,
                };
                ServerEvent::ExecutionError {
                    code: e.code(),
                    message: e.to_string(),
                    details,
                }
            }
        };
        let _ = handle.broadcast(event).await;
    });
}

// ---------------------------------------------------------------------------
// Queries & helpers
// ---------------------------------------------------------------------------

async fn handle_query(state: &Arc<ServerState>, ctx: &ConnectionCtx, query: SessionQuery) {
    let Some((_session_id, handle)) = bound_session(state, ctx).await else {
        return;
    };
    match handle.query(ctx.user_id().clone(), query).await {
        Ok(event) => ctx.send(event),
        Err(e) => {
            state.collector.note_error();
            ctx.send(ServerEvent::error(e.code(), e.to_string()));
        }
    }
}

/// Resolves the connection's bound session, answering the appropriate
/// error when unbound or when the session vanished underneath it (the
/// binding is cleared lazily in that case — the member already saw
/// `session_deleted`).
async fn bound_session(
    state: &Arc<ServerState>,
    ctx: &ConnectionCtx,
) -> Option<(SessionId, SessionHandle)> {
    let Some(session_id) = ctx.session_id() else {
        state.collector.note_error();
        ctx.send(ServerEvent::error(
            ErrorCode::AccessDenied,
            "join a session first",
        ));
        return None;
    };

    match state.sessions.resolve(&session_id).await {
        Ok(handle) => Some((session_id, handle)),
        Err(_) => {
            ctx.unbind();
            state.collector.note_error();
            ctx.send(ServerEvent::session_error(
                ErrorCode::SessionNotFound,
                "session no longer exists",
            ));
            None
        }
    }
}
