//! Action executor
//!
//! Validates the action, picks a runner from its execution mode, schedules
//! sandboxed work on the pool under an outer deadline and tracks every call
//! in an in-flight table until it returns.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pool::{WorkerContext, WorkerPool};
use crate::bridge::GuiBridge;
use crate::core::{Action, ActionResult, ExecutionMode, ExecutorError, Result};
use crate::runner::{InternalHandler, Invocation, Runner, SandboxedRunner, TrustedRunner};
use crate::sandbox::{EnvironmentSpec, SandboxConfig};

type InFlightTable = Arc<Mutex<HashMap<Uuid, String>>>;

pub struct ActionExecutor {
    pool: WorkerPool,
    sandboxed: Arc<dyn Runner>,
    trusted: Arc<dyn Runner>,
    default_timeout_secs: u64,
    outer_grace: Duration,
    in_flight: InFlightTable,
}

impl ActionExecutor {
    pub fn new(
        pool: WorkerPool,
        sandboxed: Arc<dyn Runner>,
        trusted: Arc<dyn Runner>,
        default_timeout_secs: u64,
        outer_grace: Duration,
    ) -> Self {
        Self {
            pool,
            sandboxed,
            trusted,
            default_timeout_secs,
            outer_grace,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wire the production runners from configuration
    pub fn from_config(config: &SandboxConfig) -> anyhow::Result<Self> {
        Self::from_config_with_handlers(config, Vec::new())
    }

    /// Same as [`ActionExecutor::from_config`], with native handlers for
    /// internal actions
    pub fn from_config_with_handlers(
        config: &SandboxConfig,
        handlers: Vec<(String, Arc<dyn InternalHandler>)>,
    ) -> anyhow::Result<Self> {
        let bridge = Arc::new(GuiBridge::from_config(config)?);

        let sandboxed = SandboxedRunner::new(
            EnvironmentSpec {
                python: config.python.clone(),
                with_pip: config.venv_with_pip,
                setup_timeout: config.setup_timeout(),
                work_root: config.work_root.clone(),
            },
            Arc::clone(&bridge),
        );
        let trusted = handlers
            .into_iter()
            .fold(TrustedRunner::new(&config.python, bridge), |runner, (name, handler)| {
                runner.with_handler(name, handler)
            });

        let pool = WorkerPool::new(config.pool_size);
        info!(
            "Action executor ready: pool_size={}, default_timeout={}s, gui_target={}",
            pool.size(),
            config.default_timeout_secs,
            config.gui_target
        );

        Ok(Self::new(
            pool,
            Arc::new(sandboxed),
            Arc::new(trusted),
            config.default_timeout_secs,
            config.outer_grace(),
        ))
    }

    /// Execute one action call
    pub async fn execute_action(&self, action: &Action, input: &Value) -> Result<ActionResult> {
        if !action.is_atomic() {
            return Err(ExecutorError::NotAtomic(action.action_type.to_string()));
        }

        let invocation = Invocation::new(action.clone(), input.clone(), self.default_timeout_secs);
        let _entry = InFlightEntry::register(&self.in_flight, invocation.run_id, &action.name);

        self.execute_atomic_action(invocation).await
    }

    /// Dispatch purely on the execution mode
    pub async fn execute_atomic_action(&self, invocation: Invocation) -> Result<ActionResult> {
        match invocation.action.execution_mode.clone() {
            ExecutionMode::Internal => {
                self.trusted
                    .run(&invocation, &WorkerContext::detached())
                    .await
            }
            ExecutionMode::Sandboxed => self.run_on_pool(invocation).await,
            ExecutionMode::Other(mode) => Err(ExecutorError::UnknownExecutionMode(mode)),
        }
    }

    async fn run_on_pool(&self, invocation: Invocation) -> Result<ActionResult> {
        let inner = invocation.timeout;
        let deadline = inner + self.outer_grace;
        let run_id = invocation.run_id;
        let runner = Arc::clone(&self.sandboxed);

        let mut task = self
            .pool
            .submit(move |ctx| async move { runner.run(&invocation, &ctx).await });

        let outcome = tokio::time::timeout(deadline, task.join()).await;
        match outcome {
            Ok(joined) => joined?,
            Err(_) => {
                task.cancel();
                warn!(
                    "Outer deadline of {:?} expired for run_id={}; cancelling",
                    deadline, run_id
                );
                Ok(ActionResult::failure(format!(
                    "Execution timed out after {}s while running sandboxed action.",
                    inner.as_secs()
                )))
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Names of the actions currently executing
    pub fn in_flight(&self) -> Vec<String> {
        lock(&self.in_flight).values().cloned().collect()
    }
}

fn lock(table: &InFlightTable) -> std::sync::MutexGuard<'_, HashMap<Uuid, String>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes its run from the in-flight table when dropped
struct InFlightEntry {
    table: InFlightTable,
    run_id: Uuid,
}

impl InFlightEntry {
    fn register(table: &InFlightTable, run_id: Uuid, action_name: &str) -> Self {
        lock(table).insert(run_id, action_name.to_string());
        debug!("Registered run_id={} for '{}'", run_id, action_name);
        Self {
            table: Arc::clone(table),
            run_id,
        }
    }
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.run_id);
        debug!("Released run_id={}", self.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActionType, ErrorKind, ProcessOutput};
    use crate::engine::process::{run_process, CommandSpec, ProcessExit};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::sync::oneshot;

    /// Answers every call with a fixed result and counts calls
    struct FixedRunner {
        result: ActionResult,
        calls: AtomicUsize,
    }

    impl FixedRunner {
        fn new(result: ActionResult) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Runner for FixedRunner {
        async fn run(&self, _invocation: &Invocation, _ctx: &WorkerContext) -> Result<ActionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    /// Blocks until cancelled, then reports it
    struct HangingRunner {
        cancelled: Mutex<Option<oneshot::Sender<()>>>,
    }

    #[async_trait]
    impl Runner for HangingRunner {
        async fn run(&self, _invocation: &Invocation, ctx: &WorkerContext) -> Result<ActionResult> {
            ctx.cancel.cancelled().await;
            if let Some(tx) = self.cancelled.lock().unwrap().take() {
                let _ = tx.send(());
            }
            Ok(ProcessOutput::timed_out().into())
        }
    }

    struct BrokenRunner;

    #[async_trait]
    impl Runner for BrokenRunner {
        async fn run(&self, _invocation: &Invocation, _ctx: &WorkerContext) -> Result<ActionResult> {
            Err(ExecutorError::setup("environment creation failed"))
        }
    }

    fn executor(sandboxed: Arc<dyn Runner>, trusted: Arc<dyn Runner>) -> ActionExecutor {
        ActionExecutor::new(
            WorkerPool::new(2),
            sandboxed,
            trusted,
            30,
            Duration::from_millis(200),
        )
    }

    fn ok() -> ActionResult {
        ProcessOutput::from_exit(0, "ok", "").into()
    }

    #[tokio::test]
    async fn test_non_atomic_rejected_before_runner() {
        let sandboxed = FixedRunner::new(ok());
        let trusted = FixedRunner::new(ok());
        let executor = executor(sandboxed.clone(), trusted.clone());

        let action = Action::new("plan", "def handle(d):\n    return 1\n")
            .with_action_type(ActionType::Other("composite".to_string()));
        let err = executor.execute_action(&action, &json!({})).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("composite"));
        assert_eq!(sandboxed.calls(), 0);
        assert_eq!(trusted.calls(), 0);
        assert_eq!(executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_mode_is_raised() {
        let executor = executor(FixedRunner::new(ok()), FixedRunner::new(ok()));
        let action = Action::new("x", "").with_execution_mode(ExecutionMode::from("remote".to_string()));

        let err = executor.execute_action(&action, &json!({})).await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownExecutionMode(ref m) if m == "remote"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_by_mode() {
        let sandboxed = FixedRunner::new(ok());
        let trusted = FixedRunner::new(ActionResult::Value(json!({"doubled": 42})));
        let executor = executor(sandboxed.clone(), trusted.clone());

        let internal = Action::new("double", "").with_execution_mode(ExecutionMode::Internal);
        let result = executor.execute_action(&internal, &json!({"n": 21})).await.unwrap();
        assert_eq!(result, ActionResult::Value(json!({"doubled": 42})));

        let sandboxed_action = Action::new("echo", "");
        let result = executor.execute_action(&sandboxed_action, &json!({})).await.unwrap();
        assert_eq!(result, ok());

        assert_eq!(trusted.calls(), 1);
        assert_eq!(sandboxed.calls(), 1);
        assert_eq!(executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_outer_deadline_cancels_worker() {
        let (tx, rx) = oneshot::channel();
        let hanging = Arc::new(HangingRunner {
            cancelled: Mutex::new(Some(tx)),
        });
        let executor = executor(hanging, FixedRunner::new(ok()));
        let action = Action::new("spin", "").with_timeout(1);

        let start = Instant::now();
        let result = executor.execute_action(&action, &json!({})).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(
            result,
            ActionResult::failure("Execution timed out after 1s while running sandboxed action.")
        );
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("worker was not cancelled")
            .unwrap();
        assert_eq!(executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_setup_errors_propagate_and_release_entry() {
        let executor = executor(Arc::new(BrokenRunner), FixedRunner::new(ok()));
        let err = executor
            .execute_action(&Action::new("x", ""), &json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Setup);
        assert_eq!(executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_tracks_running_calls() {
        let (tx, rx) = oneshot::channel();
        let hanging = Arc::new(HangingRunner {
            cancelled: Mutex::new(Some(tx)),
        });
        let executor = Arc::new(executor(hanging, FixedRunner::new(ok())));

        let running = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                executor
                    .execute_action(&Action::new("spin", "").with_timeout(1), &json!({}))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(executor.in_flight(), vec!["spin".to_string()]);

        running.await.unwrap().unwrap();
        rx.await.unwrap();
        assert_eq!(executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_caller_cancellation_releases_entry() {
        let (tx, _rx) = oneshot::channel();
        let hanging = Arc::new(HangingRunner {
            cancelled: Mutex::new(Some(tx)),
        });
        let executor = executor(hanging, FixedRunner::new(ok()));
        let action = Action::new("spin", "").with_timeout(30);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), executor.execute_action(&action, &json!({})))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(executor.in_flight_count(), 0);
    }

    struct Doubler;

    #[async_trait]
    impl InternalHandler for Doubler {
        async fn handle(&self, input: &Value) -> anyhow::Result<Value> {
            Ok(json!({"doubled": input["n"].as_i64().unwrap_or_default() * 2}))
        }
    }

    #[tokio::test]
    async fn test_from_config_with_native_handler() {
        let config = SandboxConfig {
            python: "/nonexistent/python3".to_string(),
            ..SandboxConfig::default()
        };
        let handler: Arc<dyn InternalHandler> = Arc::new(Doubler);
        let executor =
            ActionExecutor::from_config_with_handlers(&config, vec![("double".to_string(), handler)])
                .unwrap();

        let action = Action::new("double", "").with_execution_mode(ExecutionMode::Internal);
        let result = executor.execute_action(&action, &json!({"n": 21})).await.unwrap();
        assert_eq!(result, ActionResult::Value(json!({"doubled": 42})));
    }

    #[tokio::test]
    async fn test_default_config_short_timeout_reaches_script() {
        let Some(python) = crate::sandbox::tests_support::python_with_venv().await else {
            eprintln!("skipping: no python3 with venv available");
            return;
        };
        // Keep the default pip install wherever the interpreter bundles ensurepip
        let ensurepip = CommandSpec::new(&python).with_args(["-c", "import ensurepip"]);
        let with_pip = matches!(
            run_process(&ensurepip, Duration::from_secs(30), &WorkerContext::detached().cancel).await,
            Ok(ProcessExit::Completed(c)) if c.exit_code == 0
        );
        let root = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            python,
            venv_with_pip: with_pip && SandboxConfig::default().venv_with_pip,
            work_root: Some(root.path().to_path_buf()),
            ..SandboxConfig::default()
        };
        let executor = ActionExecutor::from_config(&config).unwrap();

        let quick = Action::new("quick", "def handle(d):\n    return {'n': d['n']}\n").with_timeout(1);
        let result = executor.execute_action(&quick, &json!({"n": 3})).await.unwrap();
        match result {
            ActionResult::Process(output) => {
                assert_eq!(output.returncode, 0);
                assert_eq!(serde_json::from_str::<Value>(&output.stdout).unwrap(), json!({"n": 3}));
            }
            other => panic!("expected process output, got {:?}", other),
        }

        let spin = Action::new(
            "spin",
            "import time\n\ndef handle(d):\n    time.sleep(30)\n",
        )
        .with_timeout(1);
        let result = executor.execute_action(&spin, &json!({})).await.unwrap();
        assert_eq!(result, ActionResult::Process(ProcessOutput::timed_out()));
        assert_eq!(executor.in_flight_count(), 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
