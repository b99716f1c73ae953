//! Result normalization
//!
//! Converts interpreter values into JSON. Total: anything without a faithful
//! JSON shape degrades to its `str()` text, and a failing `str()` degrades to
//! a placeholder.

use rustpython_vm::{
    builtins::{PyByteArray, PyBytes, PyDict, PyFloat, PyList, PyStr, PyTuple},
    AsObject, PyObject, PyObjectRef, TryFromObject, VirtualMachine,
};
use serde_json::{Map, Number, Value};

/// Containers nested deeper than this are rendered as text
const MAX_DEPTH: usize = 64;

/// Convert an interpreter value into a JSON value.
pub fn normalize(vm: &VirtualMachine, value: &PyObjectRef) -> Value {
    normalize_at(vm, value, 0)
}

fn normalize_at(vm: &VirtualMachine, obj: &PyObjectRef, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String(text_of(vm, obj));
    }

    if vm.is_none(obj) {
        return Value::Null;
    }

    // bool subclasses int, so it goes first
    if obj.fast_isinstance(vm.ctx.types.bool_type) {
        return match obj.clone().try_to_bool(vm) {
            Ok(b) => Value::Bool(b),
            Err(_) => Value::String(text_of(vm, obj)),
        };
    }

    if obj.fast_isinstance(vm.ctx.types.int_type) {
        if let Ok(n) = i64::try_from_object(vm, obj.clone()) {
            return Value::from(n);
        }
        if let Ok(n) = u64::try_from_object(vm, obj.clone()) {
            return Value::from(n);
        }
        return Value::String(text_of(vm, obj));
    }

    if let Some(f) = obj.downcast_ref::<PyFloat>() {
        return float_value(f.to_f64()).unwrap_or_else(|| Value::String(text_of(vm, obj)));
    }

    if let Some(s) = obj.downcast_ref::<PyStr>() {
        return Value::String(s.as_str().to_owned());
    }

    if let Some(bytes) = obj.downcast_ref::<PyBytes>() {
        return decode_binary(bytes.as_bytes());
    }

    if let Some(buffer) = obj.downcast_ref::<PyByteArray>() {
        let data = buffer.borrow_buf().to_vec();
        return decode_binary(&data);
    }

    if obj.fast_isinstance(vm.ctx.types.complex_type) {
        return complex_value(vm, obj).unwrap_or_else(|| Value::String(text_of(vm, obj)));
    }

    if let Some(dict) = obj.downcast_ref::<PyDict>() {
        let mut map = Map::new();
        let entries: Vec<(PyObjectRef, PyObjectRef)> = dict.into_iter().collect();
        for (key, value) in entries {
            let key = match key.downcast_ref::<PyStr>() {
                Some(s) => s.as_str().to_owned(),
                None => text_of(vm, &key),
            };
            map.insert(key, normalize_at(vm, &value, depth + 1));
        }
        return Value::Object(map);
    }

    if let Some(list) = obj.downcast_ref::<PyList>() {
        let items = list.borrow_vec().to_vec();
        return sequence(vm, &items, depth);
    }

    if let Some(tuple) = obj.downcast_ref::<PyTuple>() {
        return sequence(vm, tuple.as_slice(), depth);
    }

    // Iteration order of sets is whatever the interpreter yields
    if obj.fast_isinstance(vm.ctx.types.set_type)
        || obj.fast_isinstance(vm.ctx.types.frozenset_type)
    {
        if let Ok(items) = Vec::<PyObjectRef>::try_from_object(vm, obj.clone()) {
            return sequence(vm, &items, depth);
        }
    }

    // Numeric buffers (array.array, memoryview) expose tolist()
    if let Ok(Some(tolist)) = vm.get_attribute_opt(obj.clone(), "tolist") {
        if let Ok(list) = tolist.call((), vm) {
            if !list.is(obj) {
                return normalize_at(vm, &list, depth + 1);
            }
        }
    }

    Value::String(text_of(vm, obj))
}

fn sequence(vm: &VirtualMachine, items: &[PyObjectRef], depth: usize) -> Value {
    Value::Array(
        items
            .iter()
            .map(|item| normalize_at(vm, item, depth + 1))
            .collect(),
    )
}

fn float_value(f: f64) -> Option<Value> {
    Number::from_f64(f).map(Value::Number)
}

fn complex_value(vm: &VirtualMachine, obj: &PyObjectRef) -> Option<Value> {
    let part = |name: &'static str| -> Option<Value> {
        let attr = obj.get_attr(name, vm).ok()?;
        let f = attr.downcast_ref::<PyFloat>()?.to_f64();
        float_value(f)
    };
    Some(Value::Array(vec![part("real")?, part("imag")?]))
}

fn decode_binary(data: &[u8]) -> Value {
    match std::str::from_utf8(data) {
        Ok(text) => Value::String(text.to_owned()),
        Err(_) => Value::String(format!("<binary data: {} bytes>", data.len())),
    }
}

/// `str(obj)`, or a placeholder naming the type if that raises.
pub(crate) fn text_of(vm: &VirtualMachine, obj: &PyObject) -> String {
    match obj.str(vm) {
        Ok(s) => s.as_str().to_owned(),
        Err(_) => format!("<unprintable {} object>", &*obj.class().name()),
    }
}
