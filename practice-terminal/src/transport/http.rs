//! Request/response transport over `POST /run_code` and `POST /execute_command`

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use shared_types::{ExecuteCommandRequest, ExecuteCommandResponse, RunCodeRequest, RunCodeResponse};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{
    CommandExecutor, CommandOutput, OutputStream, RunId, RunRequest, Transport, TransportError,
    TransportEvent, TransportEventKind, TransportMode,
};

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    run_timeout: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    in_flight: Mutex<Option<(RunId, JoinHandle<()>)>>,
    /// Lines typed during a run, sent as stdin with the next run
    pending_stdin: Mutex<String>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        run_timeout: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            run_timeout,
            events,
            in_flight: Mutex::new(None),
            pending_stdin: Mutex::new(String::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Stdin queued for the next run.
    pub async fn pending_stdin(&self) -> String {
        self.pending_stdin.lock().await.clone()
    }

    async fn abort_in_flight(&self) -> Option<RunId> {
        let (run_id, handle) = self.in_flight.lock().await.take()?;
        handle.abort();
        Some(run_id)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::LineBuffered
    }

    async fn start(&self, request: RunRequest) -> Result<(), TransportError> {
        if let Some(previous) = self.abort_in_flight().await {
            tracing::debug!(run_id = %previous, "Aborted in-flight run before starting a new one");
        }

        let queued = std::mem::take(&mut *self.pending_stdin.lock().await);
        let body = RunCodeRequest {
            code: request.code,
            stdin: format!("{}{}", request.stdin, queued),
            language: request.language,
        };

        let run_id = request.run_id;
        let client = self.client.clone();
        let url = self.url("/run_code");
        let run_timeout = self.run_timeout;
        let events = self.events.clone();

        tracing::info!(%run_id, language = %body.language, "Submitting code run");
        let handle = tokio::spawn(async move {
            let kinds = match tokio::time::timeout(run_timeout, post_run_code(&client, &url, &body))
                .await
            {
                Ok(Ok(response)) => events_for_response(response),
                Ok(Err(e)) => {
                    tracing::warn!(%run_id, error = %e, "Code run request failed");
                    vec![TransportEventKind::failure(&e)]
                }
                Err(_) => {
                    tracing::warn!(%run_id, timeout_secs = run_timeout.as_secs(), "Code run timed out");
                    vec![TransportEventKind::failure(&TransportError::Timeout(run_timeout))]
                }
            };

            for kind in kinds {
                if events.send(TransportEvent::new(run_id, kind)).is_err() {
                    tracing::debug!(%run_id, "Event receiver dropped");
                    break;
                }
            }
        });

        *self.in_flight.lock().await = Some((run_id, handle));
        Ok(())
    }

    async fn send_input(&self, chunk: &str) -> Result<(), TransportError> {
        tracing::debug!(bytes = chunk.len(), "Queued stdin for next run");
        self.pending_stdin.lock().await.push_str(chunk);
        Ok(())
    }

    async fn resize(&self, _cols: u16, _rows: u16) -> Result<(), TransportError> {
        Ok(())
    }

    async fn kill(&self) -> Result<(), TransportError> {
        if let Some(run_id) = self.abort_in_flight().await {
            tracing::info!(%run_id, "Aborted code run");
        }
        // Input typed for a killed run must not leak into the next one.
        let discarded = std::mem::take(&mut *self.pending_stdin.lock().await);
        if !discarded.is_empty() {
            tracing::debug!(bytes = discarded.len(), "Discarded stdin queued for killed run");
        }
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for HttpTransport {
    async fn execute_command(&self, command: &str) -> Result<CommandOutput, TransportError> {
        let body = ExecuteCommandRequest {
            command: command.to_string(),
            cwd: None,
        };
        let url = self.url("/execute_command");

        let request = async {
            let response = self.client.post(&url).json(&body).send().await?;
            let value = read_json(response).await?;
            Ok::<_, TransportError>(lenient_command_response(&value))
        };
        let response = tokio::time::timeout(self.run_timeout, request)
            .await
            .map_err(|_| TransportError::Timeout(self.run_timeout))??;

        if let Some(error) = response.error.filter(|e| !e.trim().is_empty()) {
            return Err(TransportError::Remote(error));
        }

        Ok(CommandOutput {
            stdout: response.stdout.unwrap_or_default(),
            stderr: response.stderr.unwrap_or_default(),
            returncode: response.returncode,
        })
    }
}

async fn post_run_code(
    client: &reqwest::Client,
    url: &str,
    body: &RunCodeRequest,
) -> Result<RunCodeResponse, TransportError> {
    let response = client.post(url).json(body).send().await?;
    let value = read_json(response).await?;
    Ok(lenient_run_code_response(&value))
}

/// Read a JSON body, turning non-2xx statuses into [`TransportError::Status`].
async fn read_json(response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(describe_http_error(status, &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
}

fn describe_http_error(status: reqwest::StatusCode, body: &str) -> TransportError {
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("no details").to_string()
    } else if let Ok(json) = serde_json::from_str::<Value>(body) {
        json.get("error")
            .and_then(|v| v.as_str())
            .or_else(|| json.get("message").and_then(|v| v.as_str()))
            .unwrap_or(body)
            .to_string()
    } else {
        body.to_string()
    };

    TransportError::Status {
        status: status.as_u16(),
        message,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(ToString::to_string)
}

/// Field-by-field decode; wrong-typed fields read as absent.
fn lenient_run_code_response(value: &Value) -> RunCodeResponse {
    RunCodeResponse {
        stdout: str_field(value, "stdout"),
        stderr: str_field(value, "stderr"),
        error: str_field(value, "error"),
        requires_input: value
            .get("requires_input")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        prompt: str_field(value, "prompt"),
    }
}

fn lenient_command_response(value: &Value) -> ExecuteCommandResponse {
    ExecuteCommandResponse {
        stdout: str_field(value, "stdout"),
        stderr: str_field(value, "stderr"),
        returncode: value
            .get("returncode")
            .and_then(|v| v.as_i64())
            .and_then(|code| i32::try_from(code).ok()),
        error: str_field(value, "error"),
    }
}

fn events_for_response(response: RunCodeResponse) -> Vec<TransportEventKind> {
    if let Some(message) = response.error.filter(|e| !e.trim().is_empty()) {
        return vec![TransportEventKind::Error { message }];
    }

    let mut kinds = Vec::new();
    for (stream, text) in [
        (OutputStream::Stdout, response.stdout),
        (OutputStream::Stderr, response.stderr),
    ] {
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            kinds.push(TransportEventKind::Output {
                stream,
                chunk: text.trim_end_matches(['\r', '\n']).to_string(),
            });
        }
    }
    if response.requires_input {
        kinds.push(TransportEventKind::InputRequested {
            prompt: response.prompt.unwrap_or_default(),
        });
    }
    kinds.push(TransportEventKind::Exited { exit_code: None });
    kinds
}
