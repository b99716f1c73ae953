//! Sandboxed namespace builder
//!
//! Each run gets a fresh globals dict seeded from the session's persisted
//! state. Values are shared by reference, so mutable objects carried over
//! from an earlier run can be mutated in place.
//!
//! Name lookup falls through to the interpreter's real builtins module, so
//! introspection primitives are shadowed in globals by stubs that raise
//! `NameError`, and `__builtins__` is a copy with them removed.

use rustpython_vm::{
    builtins::{PyDictRef, PyStr},
    function::FuncArgs,
    scope::Scope,
    AsObject, PyObjectRef, PyResult, VirtualMachine,
};

use super::policy::is_blocked_callable;

/// Builtins hidden from executed code
pub const MASKED_BUILTINS: &[&str] = &[
    "globals",
    "locals",
    "dir",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "__import__",
    "eval",
    "exec",
    "compile",
    "open",
    "input",
    "breakpoint",
];

/// Globals for one run
pub struct Namespace {
    globals: PyDictRef,
}

impl Namespace {
    pub fn globals(&self) -> &PyDictRef {
        &self.globals
    }

    pub fn scope(&self) -> Scope {
        Scope::new(None, self.globals.clone())
    }
}

/// Build a run namespace from persisted `state`.
pub fn build(vm: &VirtualMachine, state: &PyDictRef) -> PyResult<Namespace> {
    let globals = vm.ctx.new_dict();

    globals.set_item("__builtins__", filtered_builtins(vm)?.into(), vm)?;
    globals.set_item("__name__", vm.ctx.new_str("__main__").into(), vm)?;

    for name in MASKED_BUILTINS {
        globals.set_item(*name, masked(vm, *name), vm)?;
    }

    let entries: Vec<(PyObjectRef, PyObjectRef)> = state.into_iter().collect();
    for (key, value) in entries {
        globals.set_item(&*key, value, vm)?;
    }

    Ok(Namespace { globals })
}

/// Merge the namespace's top-level bindings into `state`.
///
/// Reserved (`__`-prefixed), masked and denylisted names are skipped. Names
/// already in `state` but deleted by the run are kept.
pub fn capture(vm: &VirtualMachine, namespace: &Namespace, state: &PyDictRef) -> PyResult<usize> {
    let entries: Vec<(PyObjectRef, PyObjectRef)> = namespace.globals().into_iter().collect();

    let mut merged = 0;
    for (key, value) in entries {
        let persistable = key
            .downcast_ref::<PyStr>()
            .map_or(false, |name| is_persistable(name.as_str()));
        if persistable {
            state.set_item(&*key, value, vm)?;
            merged += 1;
        }
    }
    Ok(merged)
}

/// Whether a top-level name survives into persisted state
pub fn is_persistable(name: &str) -> bool {
    !name.starts_with("__") && !is_blocked_callable(name) && !MASKED_BUILTINS.contains(&name)
}

fn filtered_builtins(vm: &VirtualMachine) -> PyResult<PyDictRef> {
    let source = vm
        .builtins
        .as_object()
        .dict()
        .ok_or_else(|| vm.new_runtime_error("builtins module has no namespace".to_owned()))?;

    let copy = vm.ctx.new_dict();
    let entries: Vec<(PyObjectRef, PyObjectRef)> = source.into_iter().collect();
    for (key, value) in entries {
        let hidden = key
            .downcast_ref::<PyStr>()
            .map_or(false, |name| MASKED_BUILTINS.contains(&name.as_str()));
        if !hidden {
            copy.set_item(&*key, value, vm)?;
        }
    }
    Ok(copy)
}

fn masked(vm: &VirtualMachine, name: &'static str) -> PyObjectRef {
    vm.new_function(
        name,
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            Err(vm.new_exception_msg(
                vm.ctx.exceptions.name_error.to_owned(),
                format!("name '{}' is not defined", name),
            ))
        },
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_vm::{compiler::Mode, Interpreter, TryFromObject};

    fn run(vm: &VirtualMachine, namespace: &Namespace, source: &str) -> PyResult {
        let code = vm
            .compile(source, Mode::Exec, "<test>".to_owned())
            .expect("compiles");
        vm.run_code_obj(code, namespace.scope())
    }

    #[test]
    fn test_state_is_visible_and_captured() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            state.set_item("x", vm.ctx.new_int(1).into(), vm).unwrap();

            let namespace = build(vm, &state).unwrap();
            run(vm, &namespace, "y = x + 1\n_private = 3").ok().unwrap();

            let merged = capture(vm, &namespace, &state).unwrap();
            assert_eq!(merged, 3);
            let y = state.get_item("y", vm).unwrap();
            assert_eq!(i64::try_from_object(vm, y).unwrap(), 2);
            assert!(state.get_item_opt("__name__", vm).unwrap().is_none());
            assert!(state.get_item_opt("getattr", vm).unwrap().is_none());
        });
    }

    #[test]
    fn test_masked_builtins_raise_name_error() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            let namespace = build(vm, &state).unwrap();

            for source in ["getattr(1, 'real')", "dir()", "globals()", "vars()"] {
                let err = run(vm, &namespace, source).err().expect("raises");
                assert!(err
                    .as_object()
                    .fast_isinstance(vm.ctx.exceptions.name_error));
            }
        });
    }

    #[test]
    fn test_builtins_copy_hides_masked_names() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let state = vm.ctx.new_dict();
            let namespace = build(vm, &state).unwrap();
            run(
                vm,
                &namespace,
                "hidden = 'getattr' in __builtins__\nkept = 'len' in __builtins__",
            )
            .ok()
            .unwrap();

            let hidden = namespace.globals().get_item("hidden", vm).unwrap();
            let kept = namespace.globals().get_item("kept", vm).unwrap();
            assert!(!hidden.try_to_bool(vm).unwrap());
            assert!(kept.try_to_bool(vm).unwrap());
        });
    }

    #[test]
    fn test_persistable_names() {
        assert!(is_persistable("total"));
        assert!(is_persistable("_helper"));
        assert!(!is_persistable("__doc__"));
        assert!(!is_persistable("eval"));
        assert!(!is_persistable("hasattr"));
    }
}
