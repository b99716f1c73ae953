//! Static policy checker
//!
//! Parses submitted code with the Python parser and walks the syntax tree
//! looking for imports of denylisted modules and calls to denylisted bare
//! names. Nothing is executed. The check is syntactic: aliasing, attribute
//! chains and dynamically built names are not caught.

use rustpython_ast::Visitor;
use rustpython_parser::{ast, Parse};
use tracing::debug;

/// Modules whose top-level name may not be imported
pub const BLOCKED_MODULES: &[&str] = &[
    // process, filesystem and interpreter internals
    "os",
    "sys",
    "subprocess",
    "shutil",
    "ctypes",
    "importlib",
    "builtins",
    "posix",
    "nt",
    "io",
    "_io",
    "pathlib",
    "tempfile",
    "glob",
    "fcntl",
    "mmap",
    "pty",
    "resource",
    "signal",
    "gc",
    "inspect",
    "code",
    "codeop",
    "pickle",
    "marshal",
    // concurrency
    "multiprocessing",
    "threading",
    "_thread",
    "asyncio",
    "concurrent",
    // network
    "socket",
    "select",
    "selectors",
    "ssl",
    "requests",
    "urllib",
    "http",
    "ftplib",
    "telnetlib",
    "poplib",
    "smtplib",
    "webbrowser",
];

/// Callables that may not be invoked by bare name
pub const BLOCKED_CALLABLES: &[&str] = &[
    "exec",
    "eval",
    "compile",
    "open",
    "file",
    "subprocess",
    "ctypes",
    "importlib",
    "input",
    "breakpoint",
    "__import__",
    "globals",
    "locals",
    "dir",
    "vars",
    "getattr",
    "setattr",
    "delattr",
];

/// Outcome of a policy check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    Rejected(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allowed)
    }
}

/// Check `code` against the denylists without executing it.
///
/// Fails closed: code that does not parse is rejected.
pub fn check(code: &str) -> PolicyDecision {
    let suite = match ast::Suite::parse(code, "<string>") {
        Ok(suite) => suite,
        Err(e) => {
            debug!("Policy check rejected unparsable code: {}", e);
            return PolicyDecision::Rejected(format!("code could not be parsed: {}", e.error));
        }
    };

    let mut walker = DenylistWalker::default();
    for stmt in suite {
        walker.visit_stmt(stmt);
        if walker.violation.is_some() {
            break;
        }
    }

    match walker.violation {
        Some(reason) => {
            debug!("Policy check rejected code: {}", reason);
            PolicyDecision::Rejected(reason)
        }
        None => PolicyDecision::Allowed,
    }
}

/// Check a single expression, as used by expression evaluation.
pub fn check_expression(expression: &str) -> PolicyDecision {
    if let Err(e) = ast::Expr::parse(expression, "<string>") {
        return PolicyDecision::Rejected(format!("expression could not be parsed: {}", e.error));
    }
    // An expression is also a valid statement, so the statement walk covers it.
    check(expression)
}

/// Whether `code` ends with an expression statement whose value is the result.
pub fn ends_with_expression(code: &str) -> bool {
    match ast::Suite::parse(code, "<string>") {
        Ok(suite) => matches!(suite.last(), Some(ast::Stmt::Expr(_))),
        Err(_) => false,
    }
}

fn is_blocked_module(name: &str) -> bool {
    let top_level = name.split('.').next().unwrap_or(name);
    BLOCKED_MODULES.contains(&top_level)
}

/// Whether `name` is on the callable denylist
pub fn is_blocked_callable(name: &str) -> bool {
    BLOCKED_CALLABLES.contains(&name)
}

#[derive(Default)]
struct DenylistWalker {
    violation: Option<String>,
}

impl DenylistWalker {
    fn flag(&mut self, reason: String) {
        if self.violation.is_none() {
            self.violation = Some(reason);
        }
    }
}

impl Visitor for DenylistWalker {
    fn visit_stmt_import(&mut self, node: ast::StmtImport) {
        for alias in &node.names {
            if is_blocked_module(alias.name.as_str()) {
                self.flag(format!("import of blocked module '{}'", alias.name.as_str()));
            }
        }
        self.generic_visit_stmt_import(node);
    }

    fn visit_stmt_import_from(&mut self, node: ast::StmtImportFrom) {
        if let Some(module) = &node.module {
            if is_blocked_module(module.as_str()) {
                self.flag(format!("import from blocked module '{}'", module.as_str()));
            }
        }
        self.generic_visit_stmt_import_from(node);
    }

    fn visit_expr_call(&mut self, node: ast::ExprCall) {
        if let ast::Expr::Name(ast::ExprName { id, .. }) = node.func.as_ref() {
            if is_blocked_callable(id.as_str()) {
                self.flag(format!("call to blocked function '{}'", id.as_str()));
            }
        }
        self.generic_visit_expr_call(node);
    }
}
