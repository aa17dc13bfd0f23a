//! The execution dispatcher: maps a run request onto the external
//! sandbox and normalizes the result.
//!
//! The sandbox (a Piston-compatible service) is a black box behind two
//! endpoints: `POST /execute` and `GET /runtimes`. The dispatcher owns
//! the HTTP client and all timeout policy; callers broadcast
//! `execution_started` *before* invoking it, so result ordering is a
//! property of the caller, not of this module.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_protocol::{now_millis, ExecutionReport, RuntimeInfo, StageOutput};

use crate::languages::runtime_for;
use crate::ExecError;

/// The public Piston instance used when no sandbox URL is configured.
pub const DEFAULT_SANDBOX_URL: &str = "https://emkc.org/api/v2/piston";

// ---------------------------------------------------------------------------
// Configuration & request
// ---------------------------------------------------------------------------

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Sandbox base URL (no trailing slash needed).
    pub base_url: String,
    /// Overall HTTP timeout for one execution round trip.
    pub request_timeout: Duration,
    /// Compile-stage budget passed to the sandbox, in milliseconds.
    pub compile_timeout_ms: u64,
    /// Run-stage budget passed to the sandbox, in milliseconds.
    pub run_timeout_ms: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SANDBOX_URL.to_string(),
            request_timeout: Duration::from_secs(15),
            compile_timeout_ms: 10_000,
            run_timeout_ms: 3_000,
        }
    }
}

/// One run request from a session member.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    pub stdin: Option<String>,
}

// ---------------------------------------------------------------------------
// Sandbox wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SandboxFile<'a> {
    name: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct SandboxRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<SandboxFile<'a>>,
    stdin: &'a str,
    compile_timeout: u64,
    run_timeout: u64,
}

#[derive(Deserialize)]
struct SandboxResponse {
    #[serde(default)]
    language: String,
    #[serde(default)]
    version: String,
    compile: Option<StageOutput>,
    run: Option<StageOutput>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Talks to the sandbox. Cheap to share behind an `Arc`.
pub struct ExecutionDispatcher {
    config: ExecConfig,
    client: reqwest::Client,
}

impl ExecutionDispatcher {
    /// Builds a dispatcher from configuration.
    pub fn new(config: ExecConfig) -> Result<Self, ExecError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ExecError::Client)?;
        Ok(Self { config, client })
    }

    /// Executes one request against the sandbox.
    ///
    /// # Errors
    /// - [`ExecError::UnsupportedLanguage`] — before any network I/O
    /// - [`ExecError::Timeout`] — overall HTTP timeout elapsed
    /// - [`ExecError::Failed`] — any other transport/response failure
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionReport, ExecError> {
        let runtime = runtime_for(&request.language)
            .ok_or_else(|| ExecError::UnsupportedLanguage(request.language.clone()))?;

        let body = SandboxRequest {
            language: runtime.language,
            version: runtime.version,
            files: vec![SandboxFile {
                name: runtime.filename,
                content: &request.code,
            }],
            stdin: request.stdin.as_deref().unwrap_or(""),
            compile_timeout: self.config.compile_timeout_ms,
            run_timeout: self.config.run_timeout_ms,
        };

        let url = format!("{}/execute", self.config.base_url.trim_end_matches('/'));
        tracing::debug!(language = runtime.language, %url, "dispatching execution");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !response.status().is_success() {
            return Err(ExecError::Failed(format!(
                "sandbox returned {}",
                response.status()
            )));
        }

        let parsed: SandboxResponse = response
            .json()
            .await
            .map_err(|e| ExecError::Failed(format!("malformed sandbox response: {e}")))?;

        Ok(normalize(runtime.language, parsed))
    }

    /// Fetches the sandbox's language/version listing.
    pub async fn runtimes(&self) -> Result<Vec<RuntimeInfo>, ExecError> {
        let url = format!("{}/runtimes", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !response.status().is_success() {
            return Err(ExecError::Failed(format!(
                "sandbox returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ExecError::Failed(format!("malformed runtimes listing: {e}")))
    }
}

fn classify_transport_error(e: reqwest::Error) -> ExecError {
    if e.is_timeout() {
        ExecError::Timeout
    } else {
        ExecError::Failed(e.to_string())
    }
}

/// Normalizes a sandbox response into the wire report: run output wins,
/// compile output fills the gaps.
fn normalize(requested_language: &str, response: SandboxResponse) -> ExecutionReport {
    let run = response.run.clone();
    let compile = response.compile.clone();

    let output = run.as_ref().map(|r| r.stdout.clone()).unwrap_or_default();
    let run_stderr = run.as_ref().map(|r| r.stderr.clone()).unwrap_or_default();
    let error = if run_stderr.is_empty() {
        compile
            .as_ref()
            .map(|c| c.stderr.clone())
            .unwrap_or_default()
    } else {
        run_stderr
    };
    let exit_code = run
        .as_ref()
        .and_then(|r| r.code)
        .or_else(|| compile.as_ref().and_then(|c| c.code))
        .unwrap_or(0);

    let language = if response.language.is_empty() {
        requested_language.to_string()
    } else {
        response.language
    };

    ExecutionReport {
        success: exit_code == 0,
        language,
        version: response.version,
        compile,
        run,
        output,
        error,
        exit_code,
        execution_time: now_millis(),
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Normalization is tested as pure data; the HTTP path is driven
    //! against a one-shot canned server on a loopback port.

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    // -- Helpers ----------------------------------------------------------

    fn stage(stdout: &str, stderr: &str, code: Option<i32>) -> StageOutput {
        StageOutput {
            stdout: stdout.into(),
            stderr: stderr.into(),
            code,
        }
    }

    /// Serves exactly one HTTP response, then closes.
    async fn one_shot_server(body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
        });
        format!("http://{addr}")
    }

    fn dispatcher(base_url: String, timeout: Duration) -> ExecutionDispatcher {
        ExecutionDispatcher::new(ExecConfig {
            base_url,
            request_timeout: timeout,
            ..ExecConfig::default()
        })
        .expect("client should build")
    }

    // =====================================================================
    // normalize()
    // =====================================================================

    #[test]
    fn test_normalize_successful_run() {
        let report = normalize(
            "python",
            SandboxResponse {
                language: "python".into(),
                version: "3.10.0".into(),
                compile: None,
                run: Some(stage("4\n", "", Some(0))),
            },
        );

        assert!(report.success);
        assert_eq!(report.output, "4\n");
        assert_eq!(report.error, "");
        assert_eq!(report.exit_code, 0);
    }

    #[test]
    fn test_normalize_run_failure_carries_stderr() {
        let report = normalize(
            "python",
            SandboxResponse {
                language: "python".into(),
                version: "3.10.0".into(),
                compile: None,
                run: Some(stage("", "NameError: boom", Some(1))),
            },
        );

        assert!(!report.success);
        assert_eq!(report.error, "NameError: boom");
        assert_eq!(report.exit_code, 1);
    }

    #[test]
    fn test_normalize_compile_error_fills_gaps() {
        // Compiled language failed before the run stage existed.
        let report = normalize(
            "rust",
            SandboxResponse {
                language: "rust".into(),
                version: "1.68.2".into(),
                compile: Some(stage("", "error[E0425]: not found", Some(101))),
                run: None,
            },
        );

        assert!(!report.success);
        assert_eq!(report.error, "error[E0425]: not found");
        assert_eq!(report.exit_code, 101);
        assert_eq!(report.output, "");
    }

    #[test]
    fn test_normalize_missing_codes_default_to_zero() {
        let report = normalize(
            "python",
            SandboxResponse {
                language: String::new(),
                version: String::new(),
                compile: None,
                run: Some(stage("ok", "", None)),
            },
        );

        assert_eq!(report.exit_code, 0);
        assert!(report.success);
        // Requested language backfills an empty response field.
        assert_eq!(report.language, "python");
    }

    // =====================================================================
    // execute()
    // =====================================================================

    #[tokio::test]
    async fn test_execute_unknown_language_fails_without_network() {
        // Unroutable base URL: if the dispatcher tried the network the
        // test would fail with Failed, not UnsupportedLanguage.
        let d = dispatcher("http://127.0.0.1:1".into(), Duration::from_secs(1));

        let result = d
            .execute(&ExecutionRequest {
                language: "cobol".into(),
                code: "DISPLAY '4'.".into(),
                stdin: None,
            })
            .await;

        assert!(matches!(result, Err(ExecError::UnsupportedLanguage(_))));
    }

    #[tokio::test]
    async fn test_execute_normalizes_canned_response() {
        let base = one_shot_server(
            r#"{"language":"python","version":"3.10.0","run":{"stdout":"4\n","stderr":"","code":0}}"#
                .to_string(),
        )
        .await;
        let d = dispatcher(base, Duration::from_secs(5));

        let report = d
            .execute(&ExecutionRequest {
                language: "python".into(),
                code: "print(2+2)".into(),
                stdin: None,
            })
            .await
            .expect("should execute");

        assert!(report.success);
        assert_eq!(report.output, "4\n");
        assert_eq!(report.exit_code, 0);
    }

    #[tokio::test]
    async fn test_execute_unreachable_sandbox_is_failed() {
        let d = dispatcher("http://127.0.0.1:1".into(), Duration::from_secs(1));

        let result = d
            .execute(&ExecutionRequest {
                language: "python".into(),
                code: "print(1)".into(),
                stdin: None,
            })
            .await;

        assert!(matches!(result, Err(ExecError::Failed(_))));
    }

    #[tokio::test]
    async fn test_execute_slow_sandbox_is_timeout() {
        // A listener that accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // Hold the connection open without responding.
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let d = dispatcher(format!("http://{addr}"), Duration::from_millis(200));
        let result = d
            .execute(&ExecutionRequest {
                language: "python".into(),
                code: "print(1)".into(),
                stdin: None,
            })
            .await;

        assert!(matches!(result, Err(ExecError::Timeout)));
    }
}
