//! Interpreter construction

use rustpython_vm::{signal::UserSignalReceiver, Interpreter, Settings};

use crate::config::SandboxConfig;

/// Common locations of a host Python standard library.
///
/// Pure-Python modules (json, collections, dataclasses, ...) are loaded from
/// here; native modules come from `rustpython_stdlib` and take precedence.
const STDLIB_CANDIDATES: &[&str] = &[
    "/usr/local/lib/python3.13",
    "/usr/local/lib/python3.12",
    "/usr/local/lib/python3.11",
    "/usr/local/lib/python3.10",
    "/usr/lib/python3",
    "/usr/lib/python3.12",
    "/usr/lib/python3.11",
    "/usr/lib/python3.10",
];

/// Stdlib search paths for a session: configured ones, or autodetected.
pub fn stdlib_paths(config: &SandboxConfig) -> Vec<String> {
    if config.stdlib_paths.is_empty() {
        detect_stdlib_paths()
    } else {
        config
            .stdlib_paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }
}

/// Candidate stdlib directories that exist on this host
pub fn detect_stdlib_paths() -> Vec<String> {
    STDLIB_CANDIDATES
        .iter()
        .filter(|p| std::path::Path::new(p).is_dir())
        .map(|p| p.to_string())
        .collect()
}

/// Build an interpreter that drains `signals` at every bytecode boundary.
///
/// Must be called on the thread that will run it; the interpreter is not
/// `Send`.
pub(crate) fn build(stdlib_paths: Vec<String>, signals: UserSignalReceiver) -> Interpreter {
    let mut settings = Settings::default();
    settings.path_list.extend(stdlib_paths);

    Interpreter::with_init(settings, move |vm| {
        vm.add_native_modules(rustpython_stdlib::get_module_inits());
        vm.set_user_signal_channel(signals);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_configured_paths_take_precedence() {
        let config = SandboxConfig {
            stdlib_paths: vec![PathBuf::from("/opt/python/lib")],
            ..SandboxConfig::default()
        };
        assert_eq!(stdlib_paths(&config), vec!["/opt/python/lib".to_string()]);
    }

    #[test]
    fn test_detected_paths_exist() {
        for path in detect_stdlib_paths() {
            assert!(std::path::Path::new(&path).is_dir());
        }
    }
}
