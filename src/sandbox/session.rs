//! Execution sessions
//!
//! A [`PythonExecutor`] owns one worker thread, which owns the interpreter
//! and the session's persisted state. Requests are serialized per session;
//! separate executors never share state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use rustpython_vm::signal::{self, UserSignalReceiver};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::{ExecutionError, ExecutionRequest, ExecutionResult};
use super::interpreter;
use super::policy::{self, PolicyDecision};
use super::runner::{self, Job, JobKind, RawOutcome};
use super::watchdog::{JobControl, Reply, Watchdog, WorkerLink, WorkerLost};
use crate::config::SandboxConfig;
use crate::error::{Error, Result};

/// A persistent Python session
///
/// Variables defined by one successful `execute` are visible to the next.
/// Failed and timed-out runs leave the persisted state untouched.
pub struct PythonExecutor {
    id: Uuid,
    config: SandboxConfig,
    watchdog: Watchdog,
    worker: Mutex<Worker>,
    next_job: AtomicU64,
}

struct Worker {
    link: WorkerLink,
    // Dropping the handle detaches the thread.
    _thread: thread::JoinHandle<()>,
}

impl PythonExecutor {
    /// Start a session with its own interpreter
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let id = Uuid::new_v4();
        let worker = Worker::spawn(id, &config)?;
        info!(session = %id, "Python session started");

        Ok(PythonExecutor {
            id,
            watchdog: Watchdog::new(&config),
            config,
            worker: Mutex::new(worker),
            next_job: AtomicU64::new(1),
        })
    }

    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Session configuration
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute a request. Never fails: every problem is reported in the result.
    pub fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        if let PolicyDecision::Rejected(reason) = policy::check(&request.code) {
            info!(session = %self.id, %reason, "Rejected code");
            return ExecutionResult::failure("", &ExecutionError::PolicyRejected { reason });
        }

        let timeout = request.effective_timeout(self.config.default_timeout_secs);
        self.dispatch(
            JobKind::Exec,
            request.code.clone(),
            timeout,
            request.memory_limit_bytes,
        )
    }

    /// Execute code with the configured memory limit
    pub fn execute_code(&self, code: &str, timeout_seconds: u64) -> ExecutionResult {
        let request = ExecutionRequest::new(code)
            .with_timeout(timeout_seconds)
            .with_memory_limit(self.config.memory_limit_bytes);
        self.execute(&request)
    }

    /// Evaluate one expression against the persisted state without changing it
    pub fn evaluate(&self, expression: &str, timeout_seconds: u64) -> ExecutionResult {
        if let PolicyDecision::Rejected(reason) = policy::check_expression(expression) {
            info!(session = %self.id, %reason, "Rejected expression");
            return ExecutionResult::failure("", &ExecutionError::PolicyRejected { reason });
        }

        let timeout = if timeout_seconds == 0 {
            self.config.default_timeout_secs
        } else {
            timeout_seconds
        };
        self.dispatch(
            JobKind::Eval,
            expression.to_owned(),
            timeout,
            self.config.memory_limit_bytes,
        )
    }

    /// Names currently held in the persisted state, sorted
    pub fn variables(&self) -> Result<Vec<String>> {
        let result = self.dispatch(
            JobKind::Variables,
            String::new(),
            self.config.default_timeout_secs,
            self.config.memory_limit_bytes,
        );

        match (result.success, result.result) {
            (true, Some(names)) => Ok(serde_json::from_value(names)?),
            (true, None) => Ok(Vec::new()),
            (false, _) => Err(Error::Sandbox(result.error.unwrap_or_default())),
        }
    }

    /// Discard all persisted state.
    ///
    /// The worker is replaced by a fresh one. A previous worker still stuck in
    /// an abandoned run is detached and exits once that run returns.
    pub fn reset_state(&self) -> Result<()> {
        let fresh = Worker::spawn(self.id, &self.config)?;
        *self.lock_worker() = fresh;
        info!(session = %self.id, "Session state reset");
        Ok(())
    }

    fn dispatch(
        &self,
        kind: JobKind,
        code: String,
        timeout_secs: u64,
        memory_limit_bytes: u64,
    ) -> ExecutionResult {
        let mut worker = self.lock_worker();

        let job = Job {
            control: JobControl::new(
                self.next_job.fetch_add(1, Ordering::SeqCst),
                self.config.max_output_bytes,
            ),
            kind,
            code,
            memory_limit_bytes,
        };
        debug!(session = %self.id, job_id = job.control.id(), ?kind, timeout_secs, "Dispatching job");

        let outcome = match self.watchdog.execute_with_deadline(&worker.link, job, timeout_secs) {
            Ok(outcome) => outcome,
            Err(WorkerLost::NotSubmitted(job)) => {
                warn!(session = %self.id, "Worker is gone; starting a new one (persisted state is lost)");
                match Worker::spawn(self.id, &self.config) {
                    Ok(fresh) => {
                        *worker = fresh;
                        match self.watchdog.execute_with_deadline(&worker.link, job, timeout_secs) {
                            Ok(outcome) => outcome,
                            Err(lost) => lost_outcome(lost),
                        }
                    }
                    Err(e) => RawOutcome::failed(String::new(), ExecutionError::Internal(e.to_string())),
                }
            }
            Err(lost) => lost_outcome(lost),
        };

        if matches!(&outcome.verdict, Err(error) if error.is_timeout()) {
            info!(session = %self.id, timeout_secs, "Job timed out");
        }

        ExecutionResult::from_outcome(outcome)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Worker> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PythonExecutor {
    fn drop(&mut self) {
        debug!(session = %self.id, "Python session closed");
    }
}

fn lost_outcome(lost: WorkerLost) -> RawOutcome {
    match lost {
        WorkerLost::NotSubmitted(job) => {
            warn!(job_id = job.control.id(), "Replacement worker is not accepting jobs");
            RawOutcome::failed(String::new(), ExecutionError::NoResult)
        }
        WorkerLost::Disconnected { output } => {
            warn!("Worker exited before finishing the job");
            RawOutcome::failed(output, ExecutionError::NoResult)
        }
    }
}

impl Worker {
    fn spawn(session: Uuid, config: &SandboxConfig) -> Result<Worker> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>();
        let (ready_tx, ready_rx) = mpsc::channel::<()>();
        let (signal_tx, signal_rx) = signal::user_signal_channel();
        let current = Arc::new(AtomicU64::new(0));

        let stdlib_paths = interpreter::stdlib_paths(config);
        let worker_current = Arc::clone(&current);
        let name = format!("pysandbox-{}", &session.simple().to_string()[..8]);

        let thread = thread::Builder::new()
            .name(name)
            .stack_size(config.worker_stack_size)
            .spawn(move || {
                worker_main(stdlib_paths, signal_rx, job_rx, reply_tx, ready_tx, worker_current)
            })
            .map_err(|e| Error::Sandbox(format!("Failed to spawn worker thread: {}", e)))?;

        match ready_rx.recv_timeout(config.startup_timeout) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => {
                return Err(Error::Timeout(format!(
                    "interpreter did not start within {:?}",
                    config.startup_timeout
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::Sandbox(
                    "worker thread exited during interpreter startup".to_owned(),
                ));
            }
        }

        Ok(Worker {
            link: WorkerLink {
                jobs: job_tx,
                replies: reply_rx,
                signals: signal_tx,
                current,
                cancelled: Arc::new(AtomicU64::new(0)),
            },
            _thread: thread,
        })
    }
}

fn worker_main(
    stdlib_paths: Vec<String>,
    signals: UserSignalReceiver,
    jobs: mpsc::Receiver<Job>,
    replies: mpsc::Sender<Reply>,
    ready: mpsc::Sender<()>,
    current: Arc<AtomicU64>,
) {
    let interp = interpreter::build(stdlib_paths, signals);
    let state = interp.enter(|vm| vm.ctx.new_dict());
    if ready.send(()).is_err() {
        return;
    }

    for job in jobs {
        let job_id = job.control.id();
        if !job.control.start() {
            debug!(job_id, "Skipping job cancelled while queued");
            continue;
        }

        current.store(job_id, Ordering::SeqCst);
        let outcome = interp.enter(|vm| runner::run(vm, &state, &job));
        current.store(0, Ordering::SeqCst);

        if replies.send(Reply { job_id, outcome }).is_err() {
            break;
        }
    }

    debug!("Worker exiting");
}
