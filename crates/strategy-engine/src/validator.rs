//! Static screening of strategy source before it is allowed anywhere near the sandbox.
//!
//! The validator parses the script into a syntax tree and walks every node, looking for
//! module loading, references to host globals, timers and dynamic evaluation. It never
//! runs any code and never sees candle data.

use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use rhai::{ASTNode, Engine, Expr, OptimizationLevel, Stmt, AST};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Modules that would give a script I/O or host access.
pub const PROHIBITED_MODULES: &[&str] = &[
    "fs",
    "child_process",
    "http",
    "https",
    "net",
    "dgram",
    "dns",
    "os",
    "path",
    "crypto",
    "stream",
    "util",
    "url",
    "querystring",
];

/// Host globals a script must not reference.
pub const PROHIBITED_GLOBALS: &[&str] = &[
    "require",
    "module",
    "exports",
    "global",
    "process",
    "Buffer",
    "setTimeout",
    "setInterval",
    "clearTimeout",
    "clearInterval",
];

/// Functions that evaluate or construct code at runtime.
pub const DYNAMIC_EVALUATION: &[&str] = &["eval", "Fn", "Function"];

/// Host clock and timer functions.
pub const TIMER_FUNCTIONS: &[&str] = &["sleep", "timestamp"];

/// Name and arity of the function every strategy must define.
pub const ENTRY_POINT: &str = "strategy";

static PROTOTYPE_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(__proto__|constructor|prototype)\b").expect("prototype token pattern is valid")
});

/// Outcome of screening one script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn from_findings(findings: Findings) -> Self {
        Self {
            is_valid: findings.errors.is_empty(),
            errors: findings.errors.into_iter().collect(),
            warnings: findings.warnings.into_iter().collect(),
        }
    }
}

/// Strategy source that has passed validation.
///
/// Only [`CodeValidator::validate`] can produce one, and the sandbox accepts nothing
/// else, so unvalidated code cannot be executed by construction.
#[derive(Debug, Clone)]
pub struct ValidatedStrategy {
    source: Arc<str>,
    warnings: Vec<String>,
}

impl ValidatedStrategy {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

#[derive(Default)]
struct Findings {
    errors: IndexSet<String>,
    warnings: IndexSet<String>,
}

/// Parses and screens strategy scripts.
#[derive(Debug)]
pub struct CodeValidator {
    parser: Engine,
}

impl Default for CodeValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeValidator {
    pub fn new() -> Self {
        let mut parser = Engine::new_raw();
        // Dead branches must stay in the tree so they are screened too.
        parser.set_optimization_level(OptimizationLevel::None);
        Self { parser }
    }

    /// Screens `code` and reports every violation found.
    #[instrument(skip_all, fields(code_len = code.len()))]
    pub fn check(&self, code: &str) -> ValidationResult {
        let mut findings = Findings::default();

        match self.parser.compile(code) {
            Ok(ast) => screen_ast(&ast, &mut findings),
            Err(err) => {
                findings.errors.insert(format!("Code parse failed: {err}"));
            }
        }

        for caps in PROTOTYPE_TOKENS.captures_iter(code) {
            findings
                .warnings
                .insert(format!("Possible prototype manipulation: {}", &caps[1]));
        }

        let result = ValidationResult::from_findings(findings);
        debug!(
            is_valid = result.is_valid,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "strategy code screened"
        );
        result
    }

    /// Screens `code` and, if it is clean, wraps it for execution.
    pub fn validate(&self, code: &str) -> Result<ValidatedStrategy, ValidationResult> {
        let result = self.check(code);
        if result.is_valid {
            Ok(ValidatedStrategy {
                source: Arc::from(code),
                warnings: result.warnings,
            })
        } else {
            Err(result)
        }
    }
}

fn screen_ast(ast: &AST, findings: &mut Findings) {
    let mut import_statements = 0usize;
    let mut literal_imports = 0usize;

    ast.walk(&mut |path: &[ASTNode<'_>]| -> bool {
        let parent = path.iter().rev().nth(1);
        match path.last() {
            Some(ASTNode::Stmt(Stmt::Import(..))) => import_statements += 1,
            Some(ASTNode::Expr(expr)) => {
                if let Some(name) = variable_name(expr) {
                    if PROHIBITED_GLOBALS.contains(&name) {
                        findings
                            .errors
                            .insert(format!("Prohibited global reference: {name}"));
                    }
                }

                match expr {
                    Expr::FnCall(call, ..) | Expr::MethodCall(call, ..) => {
                        screen_call(call.name.as_str(), findings)
                    }
                    Expr::Dot(dot, ..) => {
                        if let Some(object) = variable_name(&dot.lhs) {
                            if object == "process" || object == "global" {
                                findings
                                    .errors
                                    .insert(format!("Prohibited member access on: {object}"));
                            }
                        }
                    }
                    Expr::StringConstant(module, ..) => match parent {
                        Some(ASTNode::Stmt(Stmt::Import(..))) => {
                            literal_imports += 1;
                            screen_module(module.as_str(), "import", findings);
                        }
                        Some(ASTNode::Expr(Expr::FnCall(call, ..))) if call.name == "require" => {
                            screen_module(module.as_str(), "require", findings);
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
            _ => {}
        }
        true
    });

    if import_statements > literal_imports {
        findings
            .errors
            .insert("Dynamic module loading is not allowed".to_string());
    }

    let has_entry_point = ast
        .iter_functions()
        .any(|f| f.name == ENTRY_POINT && f.params.len() == 1);
    if !has_entry_point {
        findings.warnings.insert(format!(
            "No `fn {ENTRY_POINT}(data)` defined; every signal will be hold"
        ));
    }
}

/// Name of a plain, non-namespaced variable reference.
fn variable_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Variable(x, ..) if x.2.is_empty() => Some(x.1.as_str()),
        _ => None,
    }
}

fn screen_call(name: &str, findings: &mut Findings) {
    if PROHIBITED_GLOBALS.contains(&name) {
        findings
            .errors
            .insert(format!("Prohibited global function: {name}"));
    }
    if DYNAMIC_EVALUATION.contains(&name) {
        findings
            .errors
            .insert(format!("Dynamic code evaluation is not allowed: {name}"));
    }
    if TIMER_FUNCTIONS.contains(&name) {
        findings
            .errors
            .insert(format!("Timer and clock functions are not allowed: {name}"));
    }
}

fn screen_module(module: &str, how: &str, findings: &mut Findings) {
    if PROHIBITED_MODULES.contains(&module) {
        findings
            .errors
            .insert(format!("Prohibited module {how}: {module}"));
    } else if how == "import" {
        findings.warnings.insert(format!(
            "Module \"{module}\" cannot be resolved inside the sandbox"
        ));
    }
}
