//! Bounded capture buffers for the interpreter's standard streams

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustpython_vm::{function::FuncArgs, AsObject, PyObjectRef, PyResult, VirtualMachine};

/// Marker appended when captured text hit the size limit
pub const TRUNCATION_MARKER: &str = "\n... (output truncated)";

#[derive(Debug, Default)]
struct Captured {
    text: String,
    truncated: bool,
}

/// Shared, size-limited text buffer
///
/// Cloned handles write to the same buffer, so the watchdog can read partial
/// output of a run it has given up on.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Captured>>,
    limit: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        OutputBuffer {
            inner: Arc::new(Mutex::new(Captured::default())),
            limit,
        }
    }

    /// Append text, dropping whatever does not fit
    pub fn push(&self, data: &str) {
        let mut captured = self.lock();
        if captured.truncated {
            return;
        }

        let room = self.limit.saturating_sub(captured.text.len());
        if data.len() <= room {
            captured.text.push_str(data);
            return;
        }

        let mut cut = room;
        while !data.is_char_boundary(cut) {
            cut -= 1;
        }
        captured.text.push_str(&data[..cut]);
        captured.truncated = true;
    }

    /// Everything captured so far, with the truncation marker if applicable
    pub fn contents(&self) -> String {
        let captured = self.lock();
        if captured.truncated {
            format!("{}{}", captured.text, TRUNCATION_MARKER)
        } else {
            captured.text.clone()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().text.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Redirects `sys.stdout`/`sys.stderr` into buffers until dropped.
///
/// The previous stream objects are restored on drop, whatever the exit path.
pub struct StreamCapture<'vm> {
    vm: &'vm VirtualMachine,
    saved_stdout: Option<PyObjectRef>,
    saved_stderr: Option<PyObjectRef>,
}

impl<'vm> StreamCapture<'vm> {
    pub fn install(
        vm: &'vm VirtualMachine,
        stdout: OutputBuffer,
        stderr: OutputBuffer,
    ) -> PyResult<Self> {
        let sys = vm.sys_module.as_object();
        let capture = StreamCapture {
            vm,
            saved_stdout: sys.get_attr("stdout", vm).ok(),
            saved_stderr: sys.get_attr("stderr", vm).ok(),
        };

        sys.set_attr("stdout", writer_object(vm, stdout), vm)?;
        sys.set_attr("stderr", writer_object(vm, stderr), vm)?;
        Ok(capture)
    }
}

impl Drop for StreamCapture<'_> {
    fn drop(&mut self) {
        let sys = self.vm.sys_module.as_object();
        if let Some(stdout) = self.saved_stdout.take() {
            let _ = sys.set_attr("stdout", stdout, self.vm);
        }
        if let Some(stderr) = self.saved_stderr.take() {
            let _ = sys.set_attr("stderr", stderr, self.vm);
        }
    }
}

/// Minimal file-like object whose `write` appends to `buffer`
fn writer_object(vm: &VirtualMachine, buffer: OutputBuffer) -> PyObjectRef {
    let write_fn = vm.new_function(
        "write",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let data = match args.args.first() {
                Some(obj) => obj.str(vm)?.as_str().to_owned(),
                None => String::new(),
            };
            buffer.push(&data);
            Ok(vm.ctx.new_int(data.chars().count()).into())
        },
    );

    let flush_fn = vm.new_function(
        "flush",
        |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> { Ok(vm.ctx.none()) },
    );

    let ns = vm.new_module("<capture>", vm.ctx.new_dict(), None);
    let _ = ns.as_object().set_attr("write", write_fn, vm);
    let _ = ns.as_object().set_attr("flush", flush_fn, vm);
    let _ = ns.as_object().set_attr("closed", vm.ctx.new_bool(false), vm);
    let _ = ns.as_object().set_attr("encoding", vm.ctx.new_str("utf-8"), vm);
    ns.into()
}
