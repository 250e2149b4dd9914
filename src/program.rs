//! Mode compiler
//!
//! [`Program`] maps a `(mode, depth)` pair to a compiled [`Function`],
//! recursively resolving sub-predicate calls introduced by rule bodies,
//! bounding recursion depth, and memoizing results in a `(mode, depth)`
//! cache that hands out stable [`FunId`] arena handles.
//!
//! Compilation policy (per mode and depth):
//! - beyond the configured maximum depth the result is a `Null` function —
//!   a designed truncation of unbounded recursion, not an error;
//! - zero matching rules is a fatal compile error;
//! - one matching rule compiles to that clause's function directly;
//! - several matching rules compile independently and sum;
//! - at depth 0 with normalization enabled the result is wrapped in a
//!   softmax so the externally visible output is a probability-like
//!   distribution, while internal recursive calls stay unnormalized.

use std::collections::HashMap;

use candle_core::{DType, Tensor, D};
use tracing::debug;

use crate::bpcompiler;
use crate::db::MatrixDb;
use crate::dsl::{move_features_to_rhs, ModeDeclaration, RuleCollection, WEIGHTED_FUNCTOR};
use crate::funs::{FunId, Function};
use crate::ops::Operator;
use crate::{Result, TensorLogError};

/// Additive mass placed on the null entity after softmax, keeping zero-mass
/// outputs strictly positive so gradients remain defined.
pub const NULL_SMOOTHING: f64 = 1e-5;

/// Compiler configuration. Explicit, immutable settings — not ambient state.
#[derive(Debug, Clone, Copy)]
pub struct ProgramConfig {
    /// Maximum recursion depth before truncating to `Null`.
    pub max_depth: usize,
    /// Wrap depth-0 results in a softmax.
    pub normalize: bool,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            normalize: true,
        }
    }
}

/// A compiled logic program over one fact database.
#[derive(Debug)]
pub struct Program {
    db: MatrixDb,
    rules: RuleCollection,
    config: ProgramConfig,
    arena: Vec<Function>,
    cache: HashMap<(ModeDeclaration, usize), FunId>,
}

impl Program {
    pub fn new(db: MatrixDb, rules: RuleCollection) -> Self {
        Self::with_config(db, rules, ProgramConfig::default())
    }

    pub fn with_config(db: MatrixDb, rules: RuleCollection, config: ProgramConfig) -> Self {
        Self {
            db,
            rules,
            config,
            arena: Vec::new(),
            cache: HashMap::new(),
        }
    }

    /// Construct a program with ProPPR-style weighted-rule sugar expanded:
    /// `{f}` clause features become `assign`/`weighted` body goals.
    pub fn proppr(db: MatrixDb, mut rules: RuleCollection) -> Result<Self> {
        rules.map_rules(|r| move_features_to_rhs(r))?;
        Ok(Self::new(db, rules))
    }

    /// Install the `weighted/1` parameter predicate and mark it learnable.
    pub fn set_weights(&mut self, weights: &[f32]) -> Result<()> {
        self.db.insert_predicate(WEIGHTED_FUNCTOR, weights)?;
        self.db.mark_as_param(WEIGHTED_FUNCTOR, 1)
    }

    pub fn db(&self) -> &MatrixDb {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut MatrixDb {
        &mut self.db
    }

    pub fn rules(&self) -> &RuleCollection {
        &self.rules
    }

    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    // =========================================================================
    // ARENA
    // =========================================================================

    pub(crate) fn alloc(&mut self, fun: Function) -> FunId {
        let id = FunId(self.arena.len());
        self.arena.push(fun);
        id
    }

    /// Look up a compiled function by handle.
    pub fn fun(&self, id: FunId) -> &Function {
        &self.arena[id.0]
    }

    /// Number of input registers the compiled function expects.
    pub fn input_arity(&self, id: FunId) -> usize {
        let resolve = |fid: FunId| self.fun(fid);
        self.fun(id).input_arity(&resolve)
    }

    /// Indented listing of a compiled function.
    pub fn function_listing(&self, id: FunId) -> Vec<String> {
        let resolve = |fid: FunId| self.fun(fid);
        let mut out = Vec::new();
        self.fun(id).listing(&resolve, 0, &mut out);
        out
    }

    // =========================================================================
    // COMPILATION
    // =========================================================================

    /// Compile a mode at depth 0. Idempotent: a repeated call returns the
    /// identical handle without recompiling.
    pub fn compile(&mut self, mode: &ModeDeclaration) -> Result<FunId> {
        self.compile_at(mode, 0)
    }

    /// Compile a mode at a given recursion depth (the recursion edge used
    /// by the rule-body compiler for sub-predicates).
    pub fn compile_at(&mut self, mode: &ModeDeclaration, depth: usize) -> Result<FunId> {
        if let Some(&id) = self.cache.get(&(mode.clone(), depth)) {
            return Ok(id);
        }
        debug!(mode = %mode, depth, "compiling");

        let id = if depth > self.config.max_depth {
            self.alloc(Function::Null { mode: mode.clone() })
        } else {
            let matched = self.rules.rules_for(mode).to_vec();
            if matched.is_empty() {
                return Err(TensorLogError::Compile(format!(
                    "no rules match mode {}",
                    mode
                )));
            }
            let inner = if matched.len() == 1 {
                // no summation overhead for the common single-clause case
                bpcompiler::compile_rule(self, mode, depth, &matched[0])?
            } else {
                let mut parts = Vec::with_capacity(matched.len());
                for rule in &matched {
                    parts.push(bpcompiler::compile_rule(self, mode, depth, rule)?);
                }
                self.alloc(Function::Sum { parts })
            };
            if depth == 0 && self.config.normalize {
                self.alloc(Function::Softmax { inner })
            } else {
                inner
            }
        };

        self.cache.insert((mode.clone(), depth), id);
        Ok(id)
    }

    /// Handle cached for `(mode, depth)`, if already compiled.
    pub fn compiled(&self, mode: &ModeDeclaration, depth: usize) -> Option<FunId> {
        self.cache.get(&(mode.clone(), depth)).copied()
    }

    // =========================================================================
    // INTERPRETED EVALUATION
    // =========================================================================

    /// Evaluate a mode on one-hot input messages, lazily compiling it.
    pub fn eval(&mut self, mode: &ModeDeclaration, inputs: &[Tensor]) -> Result<Tensor> {
        let id = self.compile(mode)?;
        debug!(mode = %mode, "eval");
        self.eval_fun(id, inputs)
    }

    /// Evaluate a mode on input symbols, decoding the result to a sparse
    /// symbol -> weight map.
    pub fn eval_symbols(
        &mut self,
        mode: &ModeDeclaration,
        symbols: &[&str],
    ) -> Result<HashMap<String, f32>> {
        let inputs = symbols
            .iter()
            .map(|s| self.db.onehot(s))
            .collect::<Result<Vec<_>>>()?;
        let out = self.eval(mode, &inputs)?;
        self.db.row_as_symbol_map(&out)
    }

    /// Gradient of the output mass with respect to every marked parameter,
    /// keyed by `(functor, arity)`. Parameters the mode never touches map
    /// to zero gradients.
    pub fn eval_grad(
        &mut self,
        mode: &ModeDeclaration,
        inputs: &[Tensor],
    ) -> Result<HashMap<(String, usize), Tensor>> {
        let out = self.eval(mode, inputs)?;
        let grads = out.backward()?;
        let mut result = HashMap::new();
        for (key, var) in self.db.params() {
            let grad = match grads.get(var.as_tensor()) {
                Some(g) => g.clone(),
                None => var.as_tensor().zeros_like()?,
            };
            result.insert(key.clone(), grad);
        }
        Ok(result)
    }

    pub fn eval_grad_symbols(
        &mut self,
        mode: &ModeDeclaration,
        symbols: &[&str],
    ) -> Result<HashMap<(String, usize), Tensor>> {
        let inputs = symbols
            .iter()
            .map(|s| self.db.onehot(s))
            .collect::<Result<Vec<_>>>()?;
        self.eval_grad(mode, &inputs)
    }

    /// Interpret one compiled function against the database.
    pub fn eval_fun(&self, id: FunId, inputs: &[Tensor]) -> Result<Tensor> {
        match self.fun(id) {
            Function::Null { .. } => {
                let n = self.db.num_symbols();
                Ok(Tensor::zeros((1, n), DType::F32, self.db.device())?)
            }

            Function::OpSeq { op_inputs, ops } => {
                if inputs.len() != op_inputs.len() {
                    return Err(TensorLogError::Eval(format!(
                        "mismatching number of inputs: got {}, function takes {}",
                        inputs.len(),
                        op_inputs.len()
                    )));
                }
                let mut registers: HashMap<&str, Tensor> = HashMap::new();
                for (name, value) in op_inputs.iter().zip(inputs) {
                    registers.insert(name, value.clone());
                }
                let mut last = None;
                for op in ops {
                    let value = self.eval_op(&registers, op)?;
                    registers.insert(op.dst(), value.clone());
                    last = Some(value);
                }
                last.ok_or_else(|| TensorLogError::Eval("empty operator sequence".into()))
            }

            Function::Sum { parts } => {
                let mut acc: Option<Tensor> = None;
                for part in parts {
                    let value = self.eval_fun(*part, inputs)?;
                    acc = Some(match acc {
                        Some(a) => (&a + &value)?,
                        None => value,
                    });
                }
                acc.ok_or_else(|| TensorLogError::Eval("empty sum".into()))
            }

            Function::Softmax { inner } => {
                let raw = self.eval_fun(*inner, inputs)?;
                let normalized = candle_nn::ops::softmax(&raw, D::Minus1)?;
                let smoothing = self.db.null_matrix(1)?.affine(NULL_SMOOTHING, 0.0)?;
                Ok((&normalized + &smoothing)?)
            }
        }
    }

    fn eval_op(&self, registers: &HashMap<&str, Tensor>, op: &Operator) -> Result<Tensor> {
        let get = |name: &str| -> Result<&Tensor> {
            registers
                .get(name)
                .ok_or_else(|| TensorLogError::Eval(format!("unbound register '{}'", name)))
        };
        match op {
            Operator::VecMatMul {
                src,
                mat_mode,
                transpose,
                ..
            } => {
                let mat = self.db.matrix_tensor(mat_mode, *transpose)?;
                Ok(get(src)?.matmul(&mat)?)
            }
            Operator::CallDefined {
                src, mode, depth, ..
            } => {
                let fid = self.compiled(mode, *depth).ok_or_else(|| {
                    TensorLogError::Eval(format!(
                        "sub-function {} at depth {} was never compiled",
                        mode, depth
                    ))
                })?;
                self.eval_fun(fid, &[get(src)?.clone()])
            }
            Operator::AssignOnehot { symbol, .. } => self.db.onehot(symbol),
            Operator::WeightedVec { src, weighter, .. } => {
                let total = get(weighter)?.sum_all()?;
                Ok(get(src)?.broadcast_mul(&total)?)
            }
        }
    }
}
