//! Function algebra
//!
//! The compiled-program expression tree. A [`Function`] is created once at
//! compile time and immutable thereafter; composite variants reference their
//! children by [`FunId`] into the arena owned by
//! [`crate::program::Program`], so memoization hands out stable handles
//! rather than relying on object identity.

use serde::{Deserialize, Serialize};

use crate::dsl::ModeDeclaration;
use crate::ops::Operator;

/// Stable handle into a program's function arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FunId(pub usize);

/// A node in the compiled-program expression tree.
///
/// Every function has a fixed input arity and produces one output register's
/// value (a `1 x n` message over the symbol table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Function {
    /// Always produces the all-zero message; terminates unbounded recursion
    /// once the depth bound is hit.
    Null { mode: ModeDeclaration },

    /// A straight-line program: `op_inputs` names the formal input
    /// registers, `ops` execute in order, the last destination register is
    /// the output.
    OpSeq {
        op_inputs: Vec<String>,
        ops: Vec<Operator>,
    },

    /// Elementwise sum of each part's output on the same inputs — any of
    /// the clauses may fire, contributions add.
    Sum { parts: Vec<FunId> },

    /// Softmax-normalized form of the inner function's output, offset by a
    /// small null-smoothing term so zero-mass outputs stay differentiable.
    Softmax { inner: FunId },
}

impl Function {
    /// Number of input registers this function expects.
    ///
    /// Composite variants defer to their children; `resolve` maps a child
    /// handle to its function (the arena lookup).
    pub fn input_arity<'a>(&'a self, resolve: &dyn Fn(FunId) -> &'a Function) -> usize {
        match self {
            Function::Null { mode } => mode.input_arity(),
            Function::OpSeq { op_inputs, .. } => op_inputs.len(),
            Function::Sum { parts } => parts
                .first()
                .map(|p| resolve(*p).input_arity(resolve))
                .unwrap_or(0),
            Function::Softmax { inner } => resolve(*inner).input_arity(resolve),
        }
    }

    /// Indented listing of this function, resolving children through the
    /// arena. One line per node or operator.
    pub fn listing<'a>(
        &'a self,
        resolve: &dyn Fn(FunId) -> &'a Function,
        indent: usize,
        out: &mut Vec<String>,
    ) {
        let pad = "| ".repeat(indent);
        match self {
            Function::Null { mode } => out.push(format!("{}null[{}]", pad, mode)),
            Function::OpSeq { op_inputs, ops } => {
                out.push(format!("{}opseq({})", pad, op_inputs.join(",")));
                for op in ops {
                    out.push(format!("{}| {}", pad, op));
                }
            }
            Function::Sum { parts } => {
                out.push(format!("{}sum", pad));
                for part in parts {
                    resolve(*part).listing(resolve, indent + 1, out);
                }
            }
            Function::Softmax { inner } => {
                out.push(format!("{}softmax", pad));
                resolve(*inner).listing(resolve, indent + 1, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::ModeDeclaration;
    use crate::ops::Operator;

    #[test]
    fn test_input_arity() {
        let arena = vec![
            Function::OpSeq {
                op_inputs: vec!["x".into()],
                ops: vec![Operator::VecMatMul {
                    src: "x".into(),
                    dst: "y".into(),
                    mat_mode: ModeDeclaration::parse("q(i,o)").unwrap(),
                    transpose: false,
                }],
            },
            Function::Sum {
                parts: vec![FunId(0)],
            },
            Function::Softmax { inner: FunId(1) },
        ];
        let resolve = |id: FunId| &arena[id.0];
        assert_eq!(arena[2].input_arity(&resolve), 1);
    }

    #[test]
    fn test_listing_nests() {
        let arena = vec![
            Function::Null {
                mode: ModeDeclaration::parse("p(i,o)").unwrap(),
            },
            Function::Softmax { inner: FunId(0) },
        ];
        let resolve = |id: FunId| &arena[id.0];
        let mut lines = Vec::new();
        arena[1].listing(&resolve, 0, &mut lines);
        assert_eq!(lines, vec!["softmax".to_string(), "| null[p(i,o)]".to_string()]);
    }
}
