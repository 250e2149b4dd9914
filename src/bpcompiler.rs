//! Rule-body compiler
//!
//! Lowers one clause under a mode declaration into a straight-line
//! [`Function::OpSeq`]. The body is swept left to right, tracking which
//! logic variables are bound to message registers:
//!
//! - a binary goal with one bound side becomes a vector-matrix multiply
//!   (transposed when the bound side is the second argument), or a call
//!   into the compiled sub-function when the functor is rule-defined;
//! - a unary goal reweights its bound variable through the predicate's
//!   diagonal matrix and rebinds the variable to the result;
//! - an `assign(V, c)` goal binds `V` to the constant's one-hot row;
//! - constants in binary goals are materialized as one-hot temporaries.
//!
//! If the sweep ends on a register other than the head's output variable
//! (the weighted-clause pattern), the output is rescaled by the total mass
//! of that trailing register.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::dsl::{ArgMode, Goal, ModeDeclaration, Rule, Term, ASSIGN_FUNCTOR};
use crate::funs::{FunId, Function};
use crate::ops::Operator;
use crate::program::Program;
use crate::{Result, TensorLogError};

/// One side of a binary goal after binding analysis.
enum Side {
    /// Carried by an existing register
    Bound(String),
    /// A still-free variable, to be bound by this goal
    Free(String),
}

struct RuleCompiler<'a> {
    prog: &'a mut Program,
    depth: usize,
    /// variable -> register currently carrying its message
    bindings: HashMap<String, String>,
    /// every register name handed out so far
    used: HashSet<String>,
    tmp: usize,
    ops: Vec<Operator>,
}

/// Compile one clause of `mode` at `depth` into an `OpSeq` function.
pub(crate) fn compile_rule(
    prog: &mut Program,
    mode: &ModeDeclaration,
    depth: usize,
    rule: &Rule,
) -> Result<FunId> {
    debug!(rule = %rule, mode = %mode, depth, "compiling rule");
    if rule.lhs.arity() != mode.arity() {
        return Err(TensorLogError::Compile(format!(
            "head of '{}' does not match mode {}",
            rule, mode
        )));
    }
    if rule.rhs.is_empty() {
        return Err(TensorLogError::Compile(format!(
            "rule '{}' has an empty body",
            rule
        )));
    }

    let mut rc = RuleCompiler {
        prog,
        depth,
        bindings: HashMap::new(),
        used: HashSet::new(),
        tmp: 0,
        ops: Vec::new(),
    };

    let (op_inputs, out_var) = rc.analyze_head(mode, rule)?;
    for goal in &rule.rhs {
        rc.compile_goal(goal)?;
    }

    let out_reg = rc
        .bindings
        .get(&out_var)
        .ok_or_else(|| {
            TensorLogError::Compile(format!(
                "output variable {} is never bound by the body of '{}'",
                out_var, rule
            ))
        })?
        .clone();
    let last_dst = match rc.ops.last() {
        Some(op) => op.dst().to_string(),
        None => {
            return Err(TensorLogError::Compile(format!(
                "rule '{}' produced no operators",
                rule
            )))
        }
    };
    // body ended off the output chain: treat the trailing register as a
    // scalar weight on the output message
    if last_dst != out_reg {
        let dst = rc.fresh();
        rc.ops.push(Operator::WeightedVec {
            src: out_reg,
            weighter: last_dst,
            dst,
        });
    }

    let ops = rc.ops;
    Ok(prog.alloc(Function::OpSeq { op_inputs, ops }))
}

impl RuleCompiler<'_> {
    /// Bind head variables at input positions to the formal input registers
    /// and identify the single output variable.
    fn analyze_head(
        &mut self,
        mode: &ModeDeclaration,
        rule: &Rule,
    ) -> Result<(Vec<String>, String)> {
        let mut op_inputs = Vec::new();
        let mut out_var: Option<String> = None;
        for (i, term) in rule.lhs.args.iter().enumerate() {
            let var = term.as_variable().ok_or_else(|| {
                TensorLogError::Compile(format!(
                    "constants in rule heads are not supported: '{}'",
                    rule
                ))
            })?;
            if mode.is_input(i) {
                if self
                    .bindings
                    .insert(var.to_string(), var.to_string())
                    .is_none()
                {
                    self.used.insert(var.to_string());
                    op_inputs.push(var.to_string());
                }
            } else if out_var.replace(var.to_string()).is_some() {
                return Err(TensorLogError::Compile(format!(
                    "mode {} binds more than one output argument",
                    mode
                )));
            }
        }
        let out_var = out_var.ok_or_else(|| {
            TensorLogError::Compile(format!("mode {} has no output argument", mode))
        })?;
        if op_inputs.is_empty() {
            return Err(TensorLogError::Compile(format!(
                "mode {} has no input argument",
                mode
            )));
        }
        Ok((op_inputs, out_var))
    }

    fn compile_goal(&mut self, goal: &Goal) -> Result<()> {
        if goal.functor == ASSIGN_FUNCTOR && goal.arity() == 2 {
            return self.compile_assign(goal);
        }
        match goal.arity() {
            1 => self.compile_unary(goal),
            2 => self.compile_binary(goal),
            n => Err(TensorLogError::Compile(format!(
                "unsupported goal arity {} in '{}'",
                n, goal
            ))),
        }
    }

    /// `assign(V, c)` binds a fresh variable to a constant's one-hot row.
    fn compile_assign(&mut self, goal: &Goal) -> Result<()> {
        let (var, symbol) = match (&goal.args[0], &goal.args[1]) {
            (Term::Variable(v), Term::Constant(c)) => (v.clone(), c.clone()),
            _ => {
                return Err(TensorLogError::Compile(format!(
                    "assign expects a variable and a constant: '{}'",
                    goal
                )))
            }
        };
        if self.bindings.contains_key(&var) {
            return Err(TensorLogError::Compile(format!(
                "cannot assign to already-bound variable {}",
                var
            )));
        }
        self.used.insert(var.clone());
        self.bindings.insert(var.clone(), var.clone());
        self.ops.push(Operator::AssignOnehot { dst: var, symbol });
        Ok(())
    }

    /// A unary goal reweights the message of an already-bound variable
    /// through the predicate's diagonal matrix.
    fn compile_unary(&mut self, goal: &Goal) -> Result<()> {
        let var = match &goal.args[0] {
            Term::Variable(v) => v.clone(),
            Term::Constant(_) => {
                return Err(TensorLogError::Compile(format!(
                    "unary goal '{}' must take a variable",
                    goal
                )))
            }
        };
        let src = self.bindings.get(&var).cloned().ok_or_else(|| {
            TensorLogError::Compile(format!(
                "unary goal '{}' applied to unbound variable {}",
                goal, var
            ))
        })?;
        if self.prog.rules().defines(&goal.functor, 1) {
            return Err(TensorLogError::Compile(format!(
                "rule-defined unary predicates are not supported: '{}'",
                goal
            )));
        }
        if !self.prog.db().contains(&goal.functor, 1) {
            return Err(TensorLogError::Compile(format!(
                "unknown predicate {}/1",
                goal.functor
            )));
        }
        let dst = self.fresh();
        self.ops.push(Operator::VecMatMul {
            src,
            dst: dst.clone(),
            mat_mode: ModeDeclaration::new(goal.functor.clone(), vec![ArgMode::In]),
            transpose: false,
        });
        self.bindings.insert(var, dst);
        Ok(())
    }

    fn compile_binary(&mut self, goal: &Goal) -> Result<()> {
        let left = self.resolve_side(&goal.args[0])?;
        let right = self.resolve_side(&goal.args[1])?;

        let (src, free_var, transpose) = match (left, right) {
            (Side::Bound(src), Side::Free(v)) => (src, v, false),
            (Side::Free(v), Side::Bound(src)) => (src, v, true),
            (Side::Bound(_), Side::Bound(_)) => {
                return Err(TensorLogError::Compile(format!(
                    "goal '{}' leaves no variable free",
                    goal
                )))
            }
            (Side::Free(_), Side::Free(_)) => {
                return Err(TensorLogError::Compile(format!(
                    "goal '{}' has no bound argument",
                    goal
                )))
            }
        };

        let dst = if self.used.insert(free_var.clone()) {
            free_var.clone()
        } else {
            self.fresh()
        };

        if self.prog.rules().defines(&goal.functor, 2) {
            // recursion edge: compile the sub-predicate one level deeper,
            // with the bound side as its input
            let sub_args = if transpose {
                vec![ArgMode::Out, ArgMode::In]
            } else {
                vec![ArgMode::In, ArgMode::Out]
            };
            let sub_mode = ModeDeclaration::new(goal.functor.clone(), sub_args);
            let sub_depth = self.depth + 1;
            self.prog.compile_at(&sub_mode, sub_depth)?;
            self.ops.push(Operator::CallDefined {
                src,
                dst: dst.clone(),
                mode: sub_mode,
                depth: sub_depth,
            });
        } else if self.prog.db().contains(&goal.functor, 2) {
            self.ops.push(Operator::VecMatMul {
                src,
                dst: dst.clone(),
                mat_mode: ModeDeclaration::new(
                    goal.functor.clone(),
                    vec![ArgMode::In, ArgMode::Out],
                ),
                transpose,
            });
        } else {
            return Err(TensorLogError::Compile(format!(
                "unknown predicate {}/2",
                goal.functor
            )));
        }

        self.bindings.insert(free_var, dst);
        Ok(())
    }

    /// Classify one goal argument, materializing constants as one-hot
    /// temporaries.
    fn resolve_side(&mut self, term: &Term) -> Result<Side> {
        match term {
            Term::Variable(v) => Ok(match self.bindings.get(v) {
                Some(reg) => Side::Bound(reg.clone()),
                None => Side::Free(v.clone()),
            }),
            Term::Constant(c) => {
                let dst = self.fresh();
                self.ops.push(Operator::AssignOnehot {
                    dst: dst.clone(),
                    symbol: c.clone(),
                });
                Ok(Side::Bound(dst))
            }
        }
    }

    fn fresh(&mut self) -> String {
        loop {
            self.tmp += 1;
            let name = format!("t{}", self.tmp);
            if self.used.insert(name.clone()) {
                return name;
            }
        }
    }
}
