//! Cancellation watchdog
//!
//! The caller thread submits a job to the session worker and polls for its
//! reply. Every poll tick it also sends a signal closure through the
//! interpreter's user-signal channel; the worker runs it at the next bytecode
//! boundary, where it raises `MemoryError` once the run's heap budget is
//! exceeded, or `KeyboardInterrupt` once the running job has been cancelled.
//!
//! Cancellation is cooperative. A worker blocked in a native call does not
//! see the interrupt until the call returns; the watchdog still reports the
//! timeout and leaves the worker running. The job's state machine guarantees
//! the abandoned run cannot commit state afterwards.
//!
//! The deadline runs from submission, so a job queued behind an abandoned run
//! spends its own timeout waiting and the caller is never blocked much longer
//! than the timeout it asked for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rustpython_vm::{signal::UserSignalSender, VirtualMachine};
use tracing::{debug, warn};

use super::executor::ExecutionError;
use super::memory;
use super::output::OutputBuffer;
use super::runner::{Job, RawOutcome};
use crate::config::SandboxConfig;

/// Lifecycle of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Submitted, not yet picked up by the worker
    Idle,
    /// Executing on the worker
    Running,
    /// Finished without error; state may have been committed
    Completed,
    /// Finished with an error
    Failed,
    /// Reported to the caller as timed out
    TimedOut,
}

/// Shared control block for a job, held by both caller and worker
#[derive(Debug)]
pub struct JobControl {
    id: u64,
    submitted: Instant,
    phase: Mutex<Phase>,
    output: OutputBuffer,
}

impl JobControl {
    pub fn new(id: u64, output_limit: usize) -> Arc<Self> {
        Arc::new(JobControl {
            id,
            submitted: Instant::now(),
            phase: Mutex::new(Phase::Idle),
            output: OutputBuffer::new(output_limit),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> Phase {
        *self.lock()
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    /// Time since submission
    pub fn elapsed(&self) -> Duration {
        self.submitted.elapsed()
    }

    /// Worker side: `Idle -> Running`. False if the job was cancelled in the queue.
    pub fn start(&self) -> bool {
        let mut phase = self.lock();
        if *phase != Phase::Idle {
            return false;
        }
        *phase = Phase::Running;
        true
    }

    /// Worker side: `Running -> Completed | Failed`.
    ///
    /// False if the watchdog already cancelled the job; the caller must then
    /// discard its outcome and leave persisted state alone.
    pub fn finish(&self, succeeded: bool) -> bool {
        let mut phase = self.lock();
        if *phase != Phase::Running {
            return false;
        }
        *phase = if succeeded {
            Phase::Completed
        } else {
            Phase::Failed
        };
        true
    }

    /// Watchdog side: `Idle | Running -> TimedOut`. False if the worker finished first.
    pub fn cancel(&self) -> bool {
        let mut phase = self.lock();
        match *phase {
            Phase::Idle | Phase::Running => {
                *phase = Phase::TimedOut;
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reply from the worker for one job
pub(crate) struct Reply {
    pub job_id: u64,
    pub outcome: RawOutcome,
}

/// Caller-side handles to one session worker
pub(crate) struct WorkerLink {
    pub jobs: mpsc::Sender<Job>,
    pub replies: mpsc::Receiver<Reply>,
    pub signals: UserSignalSender,
    /// Id of the job the worker is executing, 0 when idle
    pub current: Arc<AtomicU64>,
    /// Id of the most recently cancelled job
    pub cancelled: Arc<AtomicU64>,
}

impl WorkerLink {
    /// Send the per-tick signal closure to the worker's interpreter.
    fn tick(&self) -> bool {
        send_tick(&self.signals, &self.current, &self.cancelled)
    }

    /// Whether the worker is still executing job `job_id`
    fn is_running(&self, job_id: u64) -> bool {
        self.current.load(Ordering::SeqCst) == job_id
    }
}

// False once the worker's interpreter is gone.
fn send_tick(signals: &UserSignalSender, current: &Arc<AtomicU64>, cancelled: &Arc<AtomicU64>) -> bool {
    let current = Arc::clone(current);
    let cancelled = Arc::clone(cancelled);
    signals
        .send(Box::new(move |vm: &VirtualMachine| {
            let running = current.load(Ordering::SeqCst);
            if running != 0 && running == cancelled.load(Ordering::SeqCst) {
                return Err(vm.new_exception_empty(vm.ctx.exceptions.keyboard_interrupt.to_owned()));
            }
            if let Some(limit) = memory::exceeded() {
                return Err(vm.new_exception_msg(
                    vm.ctx.exceptions.memory_error.to_owned(),
                    format!("heap grew past the {} byte limit", limit),
                ));
            }
            Ok(())
        }))
        .is_ok()
}

/// The worker went away while a job was in flight
pub(crate) enum WorkerLost {
    /// The job could not be queued; it is handed back untouched
    NotSubmitted(Job),
    /// The worker exited before replying
    Disconnected { output: String },
}

/// Enforces deadlines on jobs submitted to a worker
#[derive(Debug, Clone)]
pub struct Watchdog {
    poll_interval: Duration,
    interrupt_grace: Duration,
    queue_timeout: Duration,
}

impl Watchdog {
    pub fn new(config: &SandboxConfig) -> Self {
        Watchdog {
            poll_interval: config.poll_interval,
            interrupt_grace: config.interrupt_grace,
            queue_timeout: config.queue_timeout,
        }
    }

    /// Submit `job` and wait for its outcome, for at most `timeout_secs`
    /// from submission plus the interrupt grace period.
    ///
    /// A job still queued after `queue_timeout` (or its own deadline, if that
    /// comes first) is cancelled without ever running.
    pub(crate) fn execute_with_deadline(
        &self,
        link: &WorkerLink,
        job: Job,
        timeout_secs: u64,
    ) -> Result<RawOutcome, WorkerLost> {
        let control = Arc::clone(&job.control);
        let timeout = Duration::from_secs(timeout_secs);
        let queue_limit = self.queue_timeout.min(timeout);

        if let Err(mpsc::SendError(job)) = link.jobs.send(job) {
            return Err(WorkerLost::NotSubmitted(job));
        }

        loop {
            match link.replies.recv_timeout(self.poll_interval) {
                Ok(reply) if reply.job_id == control.id() => return Ok(reply.outcome),
                Ok(reply) => {
                    debug!(job_id = reply.job_id, "Discarding reply of abandoned job");
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WorkerLost::Disconnected {
                        output: control.output().contents(),
                    });
                }
            }

            link.tick();

            match control.phase() {
                Phase::Idle if control.elapsed() >= queue_limit => {
                    if control.cancel() {
                        warn!(
                            job_id = control.id(),
                            waited = ?control.elapsed(),
                            "Worker busy with an abandoned job; giving up on queued job"
                        );
                        return Ok(timed_out(&control, whole_seconds(queue_limit)));
                    }
                }
                Phase::Running => {
                    if control.elapsed() >= timeout && control.cancel() {
                        link.cancelled.store(control.id(), Ordering::SeqCst);
                        self.interrupt(link, &control);
                        return Ok(timed_out(&control, timeout_secs));
                    }
                }
                _ => {}
            }
        }
    }

    /// Keep interrupting a cancelled job for the grace period, then hand the
    /// interrupt over to a background thread until the worker leaves the job.
    fn interrupt(&self, link: &WorkerLink, control: &JobControl) {
        let deadline = Instant::now() + self.interrupt_grace;

        while Instant::now() < deadline {
            link.tick();
            match link.replies.recv_timeout(self.poll_interval) {
                Ok(reply) if reply.job_id == control.id() => {
                    debug!(job_id = control.id(), "Worker acknowledged interrupt");
                    return;
                }
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        if !link.is_running(control.id()) {
            return;
        }

        warn!(
            job_id = control.id(),
            "Worker did not stop within {:?} of the interrupt; leaving it running",
            self.interrupt_grace
        );
        self.keep_interrupting(link, control.id());
    }

    // The signal flag is shared by every interpreter in the process, so a
    // busy neighbour can consume the wakeup meant for this worker. Resend
    // until the worker is off the job.
    fn keep_interrupting(&self, link: &WorkerLink, job_id: u64) {
        let signals = link.signals.clone();
        let current = Arc::clone(&link.current);
        let cancelled = Arc::clone(&link.cancelled);
        let every = self.interrupt_grace.max(self.poll_interval);

        let spawned = std::thread::Builder::new()
            .name(format!("pysandbox-interrupt-{}", job_id))
            .spawn(move || {
                while current.load(Ordering::SeqCst) == job_id
                    && cancelled.load(Ordering::SeqCst) == job_id
                {
                    if !send_tick(&signals, &current, &cancelled) {
                        break;
                    }
                    std::thread::sleep(every);
                }
                debug!(job_id, "Abandoned job left the worker");
            });

        if let Err(e) = spawned {
            warn!(job_id, "Failed to start interrupt thread: {}", e);
        }
    }
}

/// Round a duration up to whole seconds for error messages
fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

fn timed_out(control: &JobControl, seconds: u64) -> RawOutcome {
    RawOutcome::failed(
        control.output().contents(),
        ExecutionError::TimedOut { seconds },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let control = JobControl::new(7, 64);
        assert_eq!(control.phase(), Phase::Idle);

        assert!(control.start());
        assert_eq!(control.phase(), Phase::Running);
        assert!(control.elapsed() < Duration::from_secs(5));

        assert!(control.finish(true));
        assert_eq!(control.phase(), Phase::Completed);
        assert!(!control.cancel());
    }

    #[test]
    fn test_cancel_wins_over_finish() {
        let control = JobControl::new(1, 64);
        assert!(control.start());
        assert!(control.cancel());
        assert!(!control.finish(true));
        assert_eq!(control.phase(), Phase::TimedOut);
    }

    #[test]
    fn test_cancelled_in_queue_never_starts() {
        let control = JobControl::new(2, 64);
        assert!(control.cancel());
        assert!(!control.start());
        assert_eq!(control.phase(), Phase::TimedOut);
    }

    #[test]
    fn test_failed_run() {
        let control = JobControl::new(3, 64);
        assert!(control.start());
        assert!(control.finish(false));
        assert_eq!(control.phase(), Phase::Failed);
        assert!(!control.start());
    }

    #[test]
    fn test_partial_output_in_timeout() {
        let control = JobControl::new(4, 64);
        control.output().push("tick\n");
        let outcome = timed_out(&control, 2);
        assert_eq!(outcome.output, "tick\n");
        assert_eq!(outcome.verdict, Err(ExecutionError::TimedOut { seconds: 2 }));
    }

    #[test]
    fn test_whole_seconds_rounds_up() {
        assert_eq!(whole_seconds(Duration::from_secs(1)), 1);
        assert_eq!(whole_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(whole_seconds(Duration::from_millis(200)), 1);
        assert_eq!(whole_seconds(Duration::ZERO), 0);
    }

    #[test]
    fn test_race_between_cancel_and_finish_has_one_winner() {
        for _ in 0..200 {
            let control = JobControl::new(5, 64);
            assert!(control.start());
            let worker = Arc::clone(&control);
            let handle = std::thread::spawn(move || worker.finish(true));
            let cancelled = control.cancel();
            let finished = handle.join().unwrap();
            assert!(cancelled ^ finished);
        }
    }
}
