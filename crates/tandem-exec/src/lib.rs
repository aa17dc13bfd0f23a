//! Code-execution dispatcher for the Tandem hub.
//!
//! Forwards run requests from sessions to an external multi-language
//! sandbox (`POST /execute`) and normalizes the result for room
//! broadcast. The language table is closed: anything outside it fails
//! locally as `unsupported_language` without touching the network.

mod dispatcher;
mod error;
mod languages;

pub use dispatcher::{
    ExecConfig, ExecutionDispatcher, ExecutionRequest, DEFAULT_SANDBOX_URL,
};
pub use error::ExecError;
pub use languages::{runtime_for, supported_languages, Runtime, DEFAULT_FILENAME};
