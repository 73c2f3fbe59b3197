//! Tree-walking interpreter.
//!
//! A run never fails as a whole. A statement that raises is logged, recorded
//! in [`RunOutcome::errors`] and skipped; the rest of the program still runs.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::ast::{Expr, Program, Stmt, StmtKind};
use crate::builtins::{self, CallArgs};
use crate::error::{VplError, VplResult};
use crate::host::VplHost;
use crate::parser::parse;
use crate::value::VplValue;

/// Variable consulted when a program ends without `RETURN`
pub const RESULT_VAR: &str = "result";

#[derive(Debug)]
pub struct RunOutcome {
    pub value: VplValue,
    /// One `VplStatement` error per skipped statement, in execution order
    pub errors: Vec<cvfs_core::Error>,
}

impl RunOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

enum Flow {
    Next,
    Return(VplValue),
}

#[derive(Default)]
struct Frame {
    vars: HashMap<String, VplValue>,
    errors: Vec<cvfs_core::Error>,
}

pub struct Interpreter<'h> {
    host: &'h dyn VplHost,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h dyn VplHost) -> Self {
        Self { host }
    }

    /// Substitute `$name` placeholders from `params`, then parse and run
    pub fn run(&self, source: &str, params: &HashMap<String, String>) -> RunOutcome {
        let source = substitute(source, params);
        self.run_program(&parse(&source))
    }

    pub fn run_program(&self, program: &Program) -> RunOutcome {
        let mut frame = Frame::default();
        let value = match self.exec_block(&program.body, &mut frame) {
            Flow::Return(value) => value,
            Flow::Next => frame
                .vars
                .remove(RESULT_VAR)
                .unwrap_or_else(VplValue::empty_list),
        };
        debug!(
            "VPL run finished with {} result(s), {} skipped statement(s)",
            value.result_count(),
            frame.errors.len()
        );
        RunOutcome {
            value,
            errors: frame.errors,
        }
    }

    fn exec_block(&self, body: &[Stmt], frame: &mut Frame) -> Flow {
        for stmt in body {
            match self.exec_stmt(stmt, frame) {
                Ok(Flow::Next) => {}
                Ok(flow) => return flow,
                Err(e) => self.skip(e, frame),
            }
        }
        Flow::Next
    }

    fn skip(&self, error: cvfs_core::Error, frame: &mut Frame) {
        warn!("Skipping VPL statement: {}", error);
        self.host.record_operation(&format!("VPL-SKIP {}", error));
        frame.errors.push(error);
    }

    fn exec_stmt(&self, stmt: &Stmt, frame: &mut Frame) -> cvfs_core::Result<Flow> {
        let at = |e: VplError| e.at_line(stmt.line);

        match &stmt.kind {
            StmtKind::Assign { name, value } => {
                let value = self.eval(value, frame).map_err(at)?;
                frame.vars.insert(name.clone(), value);
            }
            StmtKind::Append { name, value } => {
                let value = self.eval(value, frame).map_err(at)?;
                match frame.vars.get_mut(name) {
                    Some(VplValue::List(items)) => items.push(value),
                    Some(other) => {
                        return Err(at(VplError::Type {
                            expected: "list",
                            found: other.type_name(),
                        }))
                    }
                    None => return Err(at(VplError::UndefinedVariable(name.clone()))),
                }
            }
            StmtKind::For { var, iterable, body } => {
                // Iterate a snapshot; appending to the list inside the body
                // does not extend the loop.
                let items = match self.eval(iterable, frame).map_err(at)? {
                    VplValue::List(items) => items,
                    other => {
                        return Err(at(VplError::Type {
                            expected: "list",
                            found: other.type_name(),
                        }))
                    }
                };
                for item in items {
                    frame.vars.insert(var.clone(), item);
                    if let Flow::Return(value) = self.exec_block(body, frame) {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            StmtKind::If { lhs, rhs, body } => {
                let lhs = self.eval(lhs, frame).and_then(|v| v.as_scalar()).map_err(at)?;
                let rhs = self.eval(rhs, frame).and_then(|v| v.as_scalar()).map_err(at)?;
                if lhs > rhs {
                    return Ok(self.exec_block(body, frame));
                }
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame).map_err(at)?,
                    None => VplValue::empty_list(),
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Expr(expr) => {
                self.eval(expr, frame).map_err(at)?;
            }
            StmtKind::Invalid { message } => {
                return Err(cvfs_core::Error::VplStatement {
                    line: stmt.line,
                    message: message.clone(),
                })
            }
        }
        Ok(Flow::Next)
    }

    fn eval(&self, expr: &Expr, frame: &Frame) -> VplResult<VplValue> {
        match expr {
            Expr::Number(x) => Ok(VplValue::Scalar(*x)),
            Expr::Str(s) => Ok(VplValue::Id(s.clone())),
            Expr::Var(name) => frame
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| VplError::UndefinedVariable(name.clone())),
            Expr::List(items) => items
                .iter()
                .map(|e| self.eval(e, frame))
                .collect::<VplResult<Vec<_>>>()
                .map(VplValue::List),
            Expr::Index { target, index } => {
                let target = self.eval(target, frame)?;
                let index = self.eval(index, frame)?.as_count()?;
                let items = target.as_list()?;
                items
                    .get(index)
                    .cloned()
                    .ok_or(VplError::IndexOutOfRange {
                        index,
                        len: items.len(),
                    })
            }
            Expr::Call { function, args } => {
                let builtin =
                    builtins::lookup(function).ok_or_else(|| VplError::UnknownFunction(function.clone()))?;
                let mut call_args = CallArgs::new(builtin);
                for arg in args {
                    call_args.push(arg.name.clone(), self.eval(&arg.value, frame)?)?;
                }
                builtins::call(self.host, call_args)
            }
        }
    }
}

/// Replace `$name` with `params[name]`. Longer names go first so `$top_k`
/// is not clobbered by a `$top` parameter.
pub fn substitute(source: &str, params: &HashMap<String, String>) -> String {
    let mut names: Vec<&String> = params.keys().collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

    let mut out = source.to_string();
    for name in names {
        out = out.replace(&format!("${}", name), &params[name]);
    }
    out
}
