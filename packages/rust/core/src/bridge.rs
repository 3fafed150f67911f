//! Analysis engine bridge.
//!
//! Spawns the analysis subprocess and talks to it over a JSON-lines
//! stdin/stdout protocol: the bridge announces `ready`, answers each
//! `run_stage` request with a `result` or an `error`, and exits on
//! `shutdown`. Error text from the bridge is passed through untouched so
//! transient-failure markers survive.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use redline_shared::{AppConfig, RedlineError, Result};

use crate::stage::{StageError, StageExecutor, StageInput, StageSpec};

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    RunStage {
        id: String,
        stage: &'a str,
        instruction: &'a str,
        output_key: &'a str,
        model: &'a str,
        input: &'a StageInput,
    },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result { id: String, result: Value },
    Error { id: String, error: String },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// How to launch the bridge.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Program to run (e.g. "python").
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: String,
    /// Model identifier forwarded with every request.
    pub model: String,
}

impl From<&AppConfig> for BridgeSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            command: config.bridge.command.clone(),
            args: config.bridge.args.clone(),
            working_dir: config.bridge.working_dir.clone(),
            model: config.bridge.model.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
}

impl BridgeHandle {
    fn spawn(settings: &BridgeSettings) -> Result<Self> {
        info!(cmd = %settings.command, args = ?settings.args, "spawning analysis bridge");

        let mut child = Command::new(&settings.command)
            .args(&settings.args)
            .current_dir(&settings.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                RedlineError::Bridge(format!(
                    "failed to spawn bridge: {e}. Is `{}` installed?",
                    settings.command
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RedlineError::Bridge("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RedlineError::Bridge("failed to capture bridge stdout".into()))?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
        };
        match handle.read_message()? {
            ResponseMessage::Ready => {
                info!("bridge is ready");
                Ok(handle)
            }
            other => Err(RedlineError::Bridge(format!(
                "expected ready message, got: {other:?}"
            ))),
        }
    }

    fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| RedlineError::Bridge(format!("bridge read error: {e}")))?;
        if line.is_empty() {
            return Err(RedlineError::Bridge(
                "bridge closed stdout unexpectedly".into(),
            ));
        }
        serde_json::from_str(line.trim()).map_err(|e| {
            let shown: String = line.chars().take(200).collect();
            RedlineError::Bridge(format!("invalid bridge message: {e} (got: {shown})"))
        })
    }

    fn send(&mut self, request: &RequestMessage<'_>) -> Result<()> {
        let json = serde_json::to_string(request)
            .map_err(|e| RedlineError::Bridge(format!("failed to serialize request: {e}")))?;
        writeln!(self.stdin, "{json}")
            .and_then(|()| self.stdin.flush())
            .map_err(|e| RedlineError::Bridge(format!("failed to write to bridge stdin: {e}")))
    }

    /// Send one stage request and wait for its answer. The outer error is a
    /// transport failure; the inner one is the bridge's own error text.
    fn run_stage(
        &mut self,
        stage: &StageSpec,
        model: &str,
        input: &StageInput,
    ) -> Result<std::result::Result<Value, String>> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        self.send(&RequestMessage::RunStage {
            id: id.clone(),
            stage: &stage.name,
            instruction: &stage.instruction,
            output_key: &stage.output_key,
            model,
            input,
        })?;

        match self.read_message()? {
            ResponseMessage::Result { id: resp_id, result } if resp_id == id => Ok(Ok(result)),
            ResponseMessage::Error { id: resp_id, error } if resp_id == id => Ok(Err(error)),
            ResponseMessage::Ready => Err(RedlineError::Bridge(
                "unexpected ready message during stage".into(),
            )),
            other => Err(RedlineError::Bridge(format!(
                "response does not match request {id}: {other:?}"
            ))),
        }
    }

    fn shutdown(mut self) {
        if let Err(e) = self.send(&RequestMessage::Shutdown) {
            debug!(error = %e, "bridge already gone");
        }
        match self.child.wait() {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// [`StageExecutor`] backed by the bridge subprocess.
///
/// The subprocess is started on the first stage and reused for the rest of
/// the run. A transport failure drops it so the next attempt starts fresh.
pub struct BridgeExecutor {
    settings: BridgeSettings,
    handle: Option<BridgeHandle>,
}

impl BridgeExecutor {
    pub fn new(settings: BridgeSettings) -> Self {
        Self {
            settings,
            handle: None,
        }
    }

    fn handle(&mut self) -> Result<&mut BridgeHandle> {
        if self.handle.is_none() {
            self.handle = Some(BridgeHandle::spawn(&self.settings)?);
        }
        self.handle
            .as_mut()
            .ok_or_else(|| RedlineError::Bridge("bridge not running".into()))
    }
}

impl StageExecutor for BridgeExecutor {
    #[instrument(skip_all, fields(stage = %stage.name, model = %self.settings.model))]
    fn execute(
        &mut self,
        stage: &StageSpec,
        input: &StageInput,
    ) -> std::result::Result<Value, StageError> {
        let model = self.settings.model.clone();

        let outcome = self
            .handle()
            .and_then(|bridge| bridge.run_stage(stage, &model, input));

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(StageError::new(message)),
            Err(e) => {
                if let Some(handle) = self.handle.take() {
                    handle.shutdown();
                }
                Err(e.into())
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
        Ok(())
    }
}

impl Drop for BridgeExecutor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use redline_shared::RunId;
    use serde_json::json;

    fn empty_input() -> StageInput {
        StageInput::from_context(&PipelineContext::new(RunId::new()))
    }

    #[test]
    fn run_stage_request_serializes() {
        let input = empty_input();
        let msg = RequestMessage::RunStage {
            id: "req-1".into(),
            stage: "ambiguity",
            instruction: "find ambiguity",
            output_key: "ambiguity_analysis",
            model: "gemini-2.5-flash",
            input: &input,
        };
        let json: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "run_stage");
        assert_eq!(json["stage"], "ambiguity");
        assert_eq!(json["output_key"], "ambiguity_analysis");
        assert_eq!(json["input"]["documents"], json!([]));
    }

    #[test]
    fn shutdown_serializes() {
        let json = serde_json::to_string(&RequestMessage::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn responses_deserialize() {
        let ready: ResponseMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert!(matches!(ready, ResponseMessage::Ready));

        let result: ResponseMessage =
            serde_json::from_str(r#"{"type":"result","id":"req-1","result":{"status":"approved"}}"#)
                .unwrap();
        match result {
            ResponseMessage::Result { id, result } => {
                assert_eq!(id, "req-1");
                assert_eq!(result["status"], "approved");
            }
            other => panic!("unexpected {other:?}"),
        }

        let error: ResponseMessage =
            serde_json::from_str(r#"{"type":"error","id":"req-2","error":"500 INTERNAL"}"#)
                .unwrap();
        assert!(matches!(error, ResponseMessage::Error { ref error, .. } if error == "500 INTERNAL"));
    }

    fn shell_bridge(script: &str) -> BridgeExecutor {
        BridgeExecutor::new(BridgeSettings {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            working_dir: ".".into(),
            model: "test-model".into(),
        })
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_result_round_trip() {
        let mut exec = shell_bridge(
            r#"echo '{"type":"ready"}'; read req; echo '{"type":"result","id":"req-1","result":{"status":"approved"}}'; read bye"#,
        );
        let stage = StageSpec::new("validation", "validate");

        let value = exec.execute(&stage, &empty_input()).unwrap();
        assert_eq!(value, json!({"status": "approved"}));
        exec.shutdown().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_error_text_is_passed_through() {
        let mut exec = shell_bridge(
            r#"echo '{"type":"ready"}'; read req; echo '{"type":"error","id":"req-1","error":"500 INTERNAL: overloaded"}'; read bye"#,
        );
        let err = exec
            .execute(&StageSpec::new("ambiguity", "x"), &empty_input())
            .unwrap_err();
        assert_eq!(err.message, "500 INTERNAL: overloaded");
    }

    #[test]
    fn spawn_failure_is_a_stage_error() {
        let mut exec = BridgeExecutor::new(BridgeSettings {
            command: "redline-no-such-bridge-binary".into(),
            args: Vec::new(),
            working_dir: ".".into(),
            model: "m".into(),
        });
        let err = exec
            .execute(&StageSpec::new("ambiguity", "x"), &empty_input())
            .unwrap_err();
        assert!(err.message.contains("failed to spawn bridge"));
    }
}
