//! Trusted runner implementation
//!
//! Executes first-party internal actions without isolation. Actions with a
//! registered native handler run in-process; others run their code directly
//! with the host interpreter, without an ephemeral environment or the pool.
//! The return value comes back through a result file; anything the action
//! prints is only logged.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use super::{Invocation, Runner};
use crate::bridge::GuiBridge;
use crate::core::{ActionResult, InteractionMode, Result, SWITCH_TO_CLI_ACTION};
use crate::engine::pool::WorkerContext;
use crate::engine::process::{run_process, CommandSpec, ProcessExit};
use crate::sandbox::harness::{render, HarnessMode};

const SCRIPT_FILE: &str = "action.py";
const RESULT_FILE: &str = "result.json";

/// A first-party internal action implemented in Rust
#[async_trait]
pub trait InternalHandler: Send + Sync {
    async fn handle(&self, input: &Value) -> anyhow::Result<Value>;
}

/// Runner that executes trusted code directly without sandbox
pub struct TrustedRunner {
    /// Host interpreter for internal action code
    python: String,
    bridge: Arc<GuiBridge>,
    handlers: HashMap<String, Arc<dyn InternalHandler>>,
}

impl TrustedRunner {
    pub fn new(python: impl Into<String>, bridge: Arc<GuiBridge>) -> Self {
        Self {
            python: python.into(),
            bridge,
            handlers: HashMap::new(),
        }
    }

    /// Register a native handler for the internal action called `name`
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn InternalHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Run an internal action. Errors of the action itself come back as
    /// `{status: error, message}`; only bridge failures are raised.
    pub async fn execute(
        &self,
        action_name: &str,
        code: &str,
        input: &Value,
        mode: InteractionMode,
        timeout: Duration,
        ctx: &WorkerContext,
    ) -> Result<ActionResult> {
        if mode == InteractionMode::Gui && action_name != SWITCH_TO_CLI_ACTION {
            return self.bridge.run_action(code, input, &ctx.cancel).await;
        }

        if let Some(handler) = self.handlers.get(action_name) {
            debug!("Running native handler for '{}'", action_name);
            return Ok(match handler.handle(input).await {
                Ok(value) => ActionResult::Value(value),
                Err(e) => ActionResult::failure(format!("{:#}", e)),
            });
        }

        Ok(match self.run_code(code, input, timeout, ctx).await {
            Ok(value) => ActionResult::Value(value),
            Err(e) => ActionResult::failure(format!("{:#}", e)),
        })
    }

    async fn run_code(
        &self,
        code: &str,
        input: &Value,
        timeout: Duration,
        ctx: &WorkerContext,
    ) -> anyhow::Result<Value> {
        let script = render(code, input, HarnessMode::Trusted)?;
        let workspace = tempfile::Builder::new()
            .prefix("action_inline_")
            .tempdir()
            .context("Failed to create script directory")?;
        let script_path = workspace.path().join(SCRIPT_FILE);
        let result_path = workspace.path().join(RESULT_FILE);
        fs::write(&script_path, script)
            .await
            .context("Failed to write script file")?;

        let command = CommandSpec::new(&self.python)
            .with_args([
                script_path.to_string_lossy().into_owned(),
                result_path.to_string_lossy().into_owned(),
            ])
            .with_env(ctx.child_env.iter().cloned())
            .with_work_dir(workspace.path());

        let exit = run_process(&command, timeout, &ctx.cancel)
            .await
            .with_context(|| format!("Failed to run {}", self.python))?;

        let captured = match exit {
            ProcessExit::Completed(captured) => captured,
            ProcessExit::TimedOut => anyhow::bail!("Execution timed out after {}s", timeout.as_secs()),
            ProcessExit::Cancelled => anyhow::bail!("Execution was cancelled"),
        };

        let printed = captured.stdout_lossy();
        if !printed.is_empty() {
            debug!("Internal action output: {}", printed);
        }

        if captured.exit_code != 0 {
            let stderr = captured.stderr_lossy();
            if stderr.is_empty() {
                anyhow::bail!("Action exited with code {}", captured.exit_code);
            }
            anyhow::bail!(stderr);
        }

        let raw = fs::read_to_string(&result_path)
            .await
            .context("Action finished without producing a result")?;
        serde_json::from_str(&raw).context("Action result is not valid JSON")
    }
}

#[async_trait]
impl Runner for TrustedRunner {
    async fn run(&self, invocation: &Invocation, ctx: &WorkerContext) -> Result<ActionResult> {
        info!(
            "Running internal action '{}' (run_id={})",
            invocation.action.name, invocation.run_id
        );
        self.execute(
            &invocation.action.name,
            &invocation.action.code,
            &invocation.input,
            invocation.action.mode,
            invocation.timeout,
            ctx,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::tests::{bridge, out, ScriptedChannel};
    use crate::core::ErrorKind;
    use serde_json::json;

    struct Doubler;

    #[async_trait]
    impl InternalHandler for Doubler {
        async fn handle(&self, input: &Value) -> anyhow::Result<Value> {
            let n = input["n"].as_i64().context("n must be an integer")?;
            Ok(json!({"doubled": n * 2}))
        }
    }

    fn host_python() -> String {
        std::env::var("ACTION_PYTHON").unwrap_or_else(|_| "python3".into())
    }

    async fn python_available() -> bool {
        let spec = CommandSpec::new(host_python()).with_args(["-c", "pass"]);
        matches!(
            run_process(&spec, Duration::from_secs(30), &WorkerContext::detached().cancel).await,
            Ok(ProcessExit::Completed(c)) if c.exit_code == 0
        )
    }

    fn runner_with(channel: Arc<ScriptedChannel>) -> TrustedRunner {
        TrustedRunner::new(host_python(), Arc::new(bridge(channel)))
    }

    fn runner() -> TrustedRunner {
        runner_with(Arc::new(ScriptedChannel::new("Linux", vec![])))
    }

    async fn run(runner: &TrustedRunner, name: &str, code: &str, input: Value, mode: InteractionMode) -> Result<ActionResult> {
        runner
            .execute(name, code, &input, mode, Duration::from_secs(30), &WorkerContext::detached())
            .await
    }

    #[tokio::test]
    async fn test_mapping_returned_unchanged() {
        if !python_available().await {
            eprintln!("skipping: no python3 available");
            return;
        }
        let code = "def handler(input_data):\n    return {\"doubled\": input_data[\"n\"] * 2}\n";
        let result = run(&runner(), "double", code, json!({"n": 21}), InteractionMode::Cli)
            .await
            .unwrap();
        assert_eq!(result, ActionResult::Value(json!({"doubled": 42})));
    }

    #[tokio::test]
    async fn test_printing_does_not_touch_result() {
        if !python_available().await {
            eprintln!("skipping: no python3 available");
            return;
        }
        let code = "def handler(input_data):\n    print('working...')\n    print('{\"fake\": 1}')\n    return {\"doubled\": input_data[\"n\"] * 2}\n";
        let result = run(&runner(), "double", code, json!({"n": 21}), InteractionMode::Cli)
            .await
            .unwrap();
        assert_eq!(result, ActionResult::Value(json!({"doubled": 42})));
    }

    #[tokio::test]
    async fn test_implicit_modules_in_scope() {
        if !python_available().await {
            eprintln!("skipping: no python3 available");
            return;
        }
        let code = "def handler(input_data):\n    async def twice(n):\n        return n * 2\n    return json.loads(json.dumps({'v': asyncio.run(twice(input_data['n']))}))\n";
        let result = run(&runner(), "mods", code, json!({"n": 4}), InteractionMode::Cli)
            .await
            .unwrap();
        assert_eq!(result, ActionResult::Value(json!({"v": 8})));
    }

    #[tokio::test]
    async fn test_input_echoed_unchanged() {
        if !python_available().await {
            eprintln!("skipping: no python3 available");
            return;
        }
        let input = json!({
            "separators": "a\u{2028}b\u{2029}c\u{0085}d",
            "quotes": "it's \"quoted\" \"\"\"",
            "backslashes": "C:\\tmp \\u0041",
            "control": "\u{0000}\u{0007}\t\r\n",
            "unicode": "\u{65e5}\u{672c} \u{1f600}"
        });
        let result = run(&runner(), "echo", "def handle(d):\n    return d\n", input.clone(), InteractionMode::Cli)
            .await
            .unwrap();
        assert_eq!(result, ActionResult::Value(input));
    }

    #[tokio::test]
    async fn test_non_mapping_values_survive() {
        if !python_available().await {
            eprintln!("skipping: no python3 available");
            return;
        }
        let runner = runner();

        let list = run(&runner, "l", "def f(d):\n    return [1, 'two', None]\n", json!({}), InteractionMode::Cli)
            .await
            .unwrap();
        assert_eq!(list, ActionResult::Value(json!([1, "two", null])));

        let text = run(&runner, "s", "def f(d):\n    return 'plain'\n", json!({}), InteractionMode::Cli)
            .await
            .unwrap();
        assert_eq!(text, ActionResult::Value(json!("plain")));
    }

    #[tokio::test]
    async fn test_exception_becomes_error_result() {
        if !python_available().await {
            eprintln!("skipping: no python3 available");
            return;
        }
        let result = run(&runner(), "boom", "def f(d):\n    raise RuntimeError('kaput')\n", json!({}), InteractionMode::Cli)
            .await
            .unwrap();
        assert_eq!(result, ActionResult::failure("kaput"));
    }

    #[tokio::test]
    async fn test_classes_are_not_entry_points() {
        if !python_available().await {
            eprintln!("skipping: no python3 available");
            return;
        }
        let code = "class Helper:\n    pass\n\ndef run(d):\n    return {'ok': Helper.__name__}\n";
        let result = run(&runner(), "cls", code, json!({}), InteractionMode::Cli)
            .await
            .unwrap();
        assert_eq!(result, ActionResult::Value(json!({"ok": "Helper"})));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_error_result() {
        let runner = TrustedRunner::new(
            "/nonexistent/python3",
            Arc::new(bridge(Arc::new(ScriptedChannel::new("Linux", vec![])))),
        );
        let result = run(&runner, "x", "def f(d):\n    return 1\n", json!({}), InteractionMode::Cli)
            .await
            .unwrap();
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_native_handler_runs_in_process() {
        let runner = TrustedRunner::new(
            "/nonexistent/python3",
            Arc::new(bridge(Arc::new(ScriptedChannel::new("Linux", vec![])))),
        )
        .with_handler("double", Arc::new(Doubler));

        let ok = run(&runner, "double", "", json!({"n": 21}), InteractionMode::Cli)
            .await
            .unwrap();
        assert_eq!(ok, ActionResult::Value(json!({"doubled": 42})));

        let bad = run(&runner, "double", "", json!({"n": "x"}), InteractionMode::Cli)
            .await
            .unwrap();
        assert_eq!(bad, ActionResult::failure("n must be an integer"));
    }

    #[tokio::test]
    async fn test_gui_mode_routes_to_bridge() {
        let channel = Arc::new(ScriptedChannel::new("Linux", vec![out(0, b"clicked", "")]));
        let result = run(&runner_with(channel.clone()), "click", "def f(d):\n    return 1\n", json!({}), InteractionMode::Gui)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(channel.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_switch_to_cli_stays_local() {
        let channel = Arc::new(ScriptedChannel::new("Linux", vec![]));
        let runner = TrustedRunner::new("/nonexistent/python3", Arc::new(bridge(channel.clone())))
            .with_handler(SWITCH_TO_CLI_ACTION, Arc::new(Doubler));

        let result = run(&runner, SWITCH_TO_CLI_ACTION, "", json!({"n": 1}), InteractionMode::Gui)
            .await
            .unwrap();
        assert_eq!(result, ActionResult::Value(json!({"doubled": 2})));
        assert!(channel.calls().is_empty());
    }

    #[tokio::test]
    async fn test_gui_bridge_failure_is_raised() {
        let channel = Arc::new(ScriptedChannel::unreachable());
        let err = run(&runner_with(channel), "click", "def f(d):\n    return 1\n", json!({}), InteractionMode::Gui)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Setup);
    }
}
