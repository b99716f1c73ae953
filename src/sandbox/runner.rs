//! Resource-limited runner
//!
//! Executes one job on the worker thread: arms the memory budget, captures
//! the standard streams, runs the code in a fresh namespace and classifies
//! the outcome. Persisted state is committed only when the job wins the
//! `Running -> Completed` transition, so a run the watchdog has already
//! reported as timed out can never change it.

use std::sync::Arc;

use rustpython_vm::{
    builtins::{PyBaseExceptionRef, PyDictRef, PyStr},
    compiler::Mode,
    AsObject, PyObjectRef, VirtualMachine,
};
use serde_json::Value;
use tracing::{debug, warn};

use super::executor::ExecutionError;
use super::memory::{self, Budget};
use super::namespace::{self, Namespace};
use super::normalize::{normalize, text_of};
use super::output::{OutputBuffer, StreamCapture};
use super::policy;
use super::watchdog::JobControl;

/// What a job asks the worker to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    /// Run statements and commit bindings to persisted state
    Exec,
    /// Evaluate one expression without committing anything
    Eval,
    /// List the names in persisted state
    Variables,
}

/// One unit of work for a session worker
pub(crate) struct Job {
    pub control: Arc<JobControl>,
    pub kind: JobKind,
    pub code: String,
    pub memory_limit_bytes: u64,
}

/// Outcome of a run before it is turned into an `ExecutionResult`
#[derive(Debug, Clone)]
pub(crate) struct RawOutcome {
    pub output: String,
    pub verdict: Result<Option<Value>, ExecutionError>,
}

impl RawOutcome {
    pub fn failed(output: String, error: ExecutionError) -> Self {
        RawOutcome {
            output,
            verdict: Err(error),
        }
    }
}

/// Run `job` against `state`. Never panics on interpreter errors.
pub(crate) fn run(vm: &VirtualMachine, state: &PyDictRef, job: &Job) -> RawOutcome {
    let control = &job.control;

    if job.kind == JobKind::Variables {
        control.finish(true);
        return RawOutcome {
            output: String::new(),
            verdict: Ok(Some(variable_names(state))),
        };
    }

    let _budget = Budget::arm(job.memory_limit_bytes);
    let stderr = OutputBuffer::new(control.output().limit());

    let executed = match StreamCapture::install(vm, control.output().clone(), stderr.clone()) {
        Ok(_capture) => execute(vm, state, job),
        Err(exc) => Err(classify(vm, exc, job.memory_limit_bytes)),
    };

    let verdict = match executed {
        Ok((value, namespace)) => commit(vm, state, job, value, &namespace),
        Err(error) => {
            control.finish(false);
            Err(error)
        }
    };

    if !stderr.is_empty() {
        debug!(job_id = control.id(), stderr = %stderr.contents(), "Captured stderr");
    }

    RawOutcome {
        output: control.output().contents(),
        verdict,
    }
}

fn execute(
    vm: &VirtualMachine,
    state: &PyDictRef,
    job: &Job,
) -> Result<(Option<Value>, Namespace), ExecutionError> {
    let limit = job.memory_limit_bytes;
    let namespace = namespace::build(vm, state).map_err(|exc| classify(vm, exc, limit))?;

    // Block-expression mode makes the interpreter return the value of a
    // trailing expression statement; anything else has no result.
    let (mode, wants_value) = match job.kind {
        JobKind::Eval => (Mode::Eval, true),
        _ if policy::ends_with_expression(&job.code) => (Mode::BlockExpr, true),
        _ => (Mode::Exec, false),
    };

    let code = vm
        .compile(&job.code, mode, "<string>".to_owned())
        .map_err(|e| ExecutionError::RuntimeFault {
            type_name: "SyntaxError".to_owned(),
            message: e.to_string(),
            traceback: String::new(),
        })?;

    let value = vm
        .run_code_obj(code, namespace.scope())
        .map_err(|exc| classify(vm, exc, limit))?;

    // An allocation can overshoot between two periodic memory checks and the run can
    // finish before the next one.
    if let Some(limit_bytes) = memory::exceeded() {
        debug!(job_id = job.control.id(), limit_bytes, "Heap budget exceeded during run");
        return Err(ExecutionError::MemoryExceeded { limit_bytes });
    }

    let result = if wants_value {
        Some(normalize(vm, &value)).filter(|v| !v.is_null())
    } else {
        None
    };

    Ok((result, namespace))
}

fn commit(
    vm: &VirtualMachine,
    state: &PyDictRef,
    job: &Job,
    value: Option<Value>,
    namespace: &Namespace,
) -> Result<Option<Value>, ExecutionError> {
    if !job.control.finish(true) {
        // Already reported as timed out; this outcome is discarded.
        return Err(ExecutionError::Interrupted);
    }

    if job.kind == JobKind::Exec {
        match namespace::capture(vm, namespace, state) {
            Ok(merged) => debug!(job_id = job.control.id(), merged, "Persisted bindings"),
            Err(exc) => {
                warn!(job_id = job.control.id(), "Failed to persist bindings");
                return Err(classify(vm, exc, job.memory_limit_bytes));
            }
        }
    }

    Ok(value)
}

/// Map a raised exception onto the error taxonomy, in priority order.
fn classify(vm: &VirtualMachine, exc: PyBaseExceptionRef, limit_bytes: u64) -> ExecutionError {
    let obj = exc.as_object();

    if obj.fast_isinstance(vm.ctx.exceptions.memory_error) || memory::exceeded().is_some() {
        return ExecutionError::MemoryExceeded { limit_bytes };
    }
    if obj.fast_isinstance(vm.ctx.exceptions.keyboard_interrupt) {
        return ExecutionError::Interrupted;
    }

    let mut traceback = String::new();
    let _ = vm.write_exception(&mut traceback, &exc);

    ExecutionError::RuntimeFault {
        type_name: (*obj.class().name()).to_owned(),
        message: text_of(vm, obj),
        traceback,
    }
}

fn variable_names(state: &PyDictRef) -> Value {
    let entries: Vec<(PyObjectRef, PyObjectRef)> = state.into_iter().collect();
    let mut names: Vec<String> = entries
        .iter()
        .filter_map(|(key, _)| key.downcast_ref::<PyStr>().map(|s| s.as_str().to_owned()))
        .collect();
    names.sort();
    Value::from(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_vm::Interpreter;

    fn job(kind: JobKind, code: &str, memory_limit_bytes: u64) -> Job {
        Job {
            control: JobControl::new(1, 4096),
            kind,
            code: code.to_owned(),
            memory_limit_bytes,
        }
    }

    fn run_job(vm: &VirtualMachine, state: &PyDictRef, job: Job) -> RawOutcome {
        assert!(job.control.start());
        run(vm, state, &job)
    }

    #[test]
    fn test_output_and_final_expression() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            let outcome = run_job(vm, &state, job(JobKind::Exec, "print('hi'); 2+2", 1 << 30));
            assert_eq!(outcome.output, "hi\n");
            assert_eq!(outcome.verdict, Ok(Some(serde_json::json!(4))));
        });
    }

    #[test]
    fn test_statement_only_has_no_result() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            let outcome = run_job(vm, &state, job(JobKind::Exec, "x = 10", 1 << 30));
            assert_eq!(outcome.verdict, Ok(None));

            let outcome = run_job(vm, &state, job(JobKind::Eval, "x * 2", 1 << 30));
            assert_eq!(outcome.verdict, Ok(Some(serde_json::json!(20))));
        });
    }

    #[test]
    fn test_runtime_fault_keeps_output_and_state() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            let outcome = run_job(
                vm,
                &state,
                job(JobKind::Exec, "print('before')\nlost = 1\n1 / 0", 1 << 30),
            );
            assert_eq!(outcome.output, "before\n");
            match outcome.verdict {
                Err(ExecutionError::RuntimeFault { type_name, message, traceback }) => {
                    assert_eq!(type_name, "ZeroDivisionError");
                    assert!(message.contains("division by zero"));
                    assert!(traceback.contains("ZeroDivisionError"));
                }
                other => panic!("unexpected verdict {:?}", other),
            }
            assert!(state.get_item_opt("lost", vm).unwrap().is_none());
        });
    }

    #[test]
    fn test_compile_error_is_syntax_fault() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            let outcome = run_job(vm, &state, job(JobKind::Exec, "return 5", 1 << 30));
            assert!(matches!(
                outcome.verdict,
                Err(ExecutionError::RuntimeFault { ref type_name, .. }) if type_name == "SyntaxError"
            ));
        });
    }

    #[test]
    fn test_raised_interrupt_and_memory_error() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            let outcome = run_job(vm, &state, job(JobKind::Exec, "raise KeyboardInterrupt", 1 << 30));
            assert_eq!(outcome.verdict, Err(ExecutionError::Interrupted));

            let outcome = run_job(vm, &state, job(JobKind::Exec, "raise MemoryError()", 2048));
            assert_eq!(
                outcome.verdict,
                Err(ExecutionError::MemoryExceeded { limit_bytes: 2048 })
            );
        });
    }

    #[test]
    fn test_single_large_allocation_hits_the_ceiling() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            let limit = 16 * 1024 * 1024;
            let outcome = run_job(
                vm,
                &state,
                job(JobKind::Exec, "big = bytearray(64 * 1024 * 1024)\nlen(big)", limit),
            );
            assert_eq!(
                outcome.verdict,
                Err(ExecutionError::MemoryExceeded { limit_bytes: limit })
            );
            assert!(state.get_item_opt("big", vm).unwrap().is_none());

            // The next run gets a fresh budget.
            let outcome = run_job(vm, &state, job(JobKind::Exec, "small = bytearray(1024)", limit));
            assert_eq!(outcome.verdict, Ok(None));
        });
    }

    #[test]
    fn test_cancelled_job_does_not_commit() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            let job = job(JobKind::Exec, "late = 1", 1 << 30);
            assert!(job.control.start());
            assert!(job.control.cancel());

            let outcome = run(vm, &state, &job);
            assert!(outcome.verdict.is_err());
            assert!(state.get_item_opt("late", vm).unwrap().is_none());
        });
    }

    #[test]
    fn test_variables_are_sorted() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            run_job(vm, &state, job(JobKind::Exec, "b = 1\na = 2", 1 << 30));
            let outcome = run_job(vm, &state, job(JobKind::Variables, "", 0));
            assert_eq!(outcome.verdict, Ok(Some(serde_json::json!(["a", "b"]))));
        });
    }
}
