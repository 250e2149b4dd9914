//! Operator instruction set
//!
//! The straight-line intermediate representation produced by compiling one
//! rule body. Registers are named; each operator reads source registers and
//! writes one destination register.
//!
//! The cross-compiler lowers [`Operator::VecMatMul`] and
//! [`Operator::CallDefined`]; the remaining kinds exist for interpreted
//! evaluation and are fatal to cross-compile, so backend coverage fails
//! loudly instead of silently degrading results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dsl::ModeDeclaration;

/// One instruction over named message registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    /// `dst = src · M(mat_mode)`, with `M` logically transposed when
    /// `transpose` is set.
    VecMatMul {
        src: String,
        dst: String,
        mat_mode: ModeDeclaration,
        transpose: bool,
    },

    /// `dst = f(src)` where `f` is the compiled function cached for
    /// `(mode, depth)` — the recursion edge into a rule-defined
    /// sub-predicate.
    CallDefined {
        src: String,
        dst: String,
        mode: ModeDeclaration,
        depth: usize,
    },

    /// `dst = onehot(symbol)` — bind a constant entity.
    AssignOnehot { dst: String, symbol: String },

    /// `dst = src * sum(weighter)` — scale a message by the total mass of a
    /// weight register (trainable clause weights).
    WeightedVec {
        src: String,
        weighter: String,
        dst: String,
    },
}

impl Operator {
    /// Name of the register this operator writes.
    pub fn dst(&self) -> &str {
        match self {
            Operator::VecMatMul { dst, .. } => dst,
            Operator::CallDefined { dst, .. } => dst,
            Operator::AssignOnehot { dst, .. } => dst,
            Operator::WeightedVec { dst, .. } => dst,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::VecMatMul {
                src,
                dst,
                mat_mode,
                transpose,
            } => {
                if *transpose {
                    write!(f, "{} = {} * {}.T", dst, src, mat_mode)
                } else {
                    write!(f, "{} = {} * {}", dst, src, mat_mode)
                }
            }
            Operator::CallDefined {
                src,
                dst,
                mode,
                depth,
            } => write!(f, "{} = f_{}@{}({})", dst, mode, depth, src),
            Operator::AssignOnehot { dst, symbol } => {
                write!(f, "{} = onehot({})", dst, symbol)
            }
            Operator::WeightedVec { src, weighter, dst } => {
                write!(f, "{} = {} * sum({})", dst, src, weighter)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::ModeDeclaration;

    #[test]
    fn test_display() {
        let op = Operator::VecMatMul {
            src: "x".into(),
            dst: "y".into(),
            mat_mode: ModeDeclaration::parse("parent(i,o)").unwrap(),
            transpose: true,
        };
        assert_eq!(op.to_string(), "y = x * parent(i,o).T");
        assert_eq!(op.dst(), "y");
    }
}
