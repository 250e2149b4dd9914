//! Cross-compiler
//!
//! Lowers a compiled [`Function`] tree into a backend-independent dataflow
//! graph whose leaves are positional input placeholders and database matrix
//! slots, then evaluates that graph with a pluggable matrix strategy
//! ([`MatrixRepr`]): dense candle tensors or native CSR kernels.
//!
//! Register names from different operator sequences are kept apart by
//! namespace: the environment is keyed by `(NamespaceId, name)`, and each
//! function application gets a fresh namespace, so a register `Y` in one
//! clause can never collide with `Y` in another.
//!
//! Each distinct `(mode, transpose-free)` relation is bound to one matrix
//! slot; the transpose is applied at the use site, so a predicate used in
//! both directions shares a single binding.

pub mod dense;
pub mod sparse;

pub use dense::DenseMat;
pub use sparse::SparseMat;

use std::collections::{BTreeMap, HashMap};

use candle_core::{DType, Device, Tensor, D};
use tracing::debug;

use crate::db::MatrixDb;
use crate::dsl::ModeDeclaration;
use crate::funs::{FunId, Function};
use crate::ops::Operator;
use crate::program::{Program, NULL_SMOOTHING};
use crate::{Result, TensorLogError};

/// Backend strategy for binding and multiplying relation matrices.
pub trait MatrixRepr {
    type Mat: Clone;

    /// Materialize the relation matrix a mode denotes (untransposed).
    fn bind(db: &MatrixDb, mode: &ModeDeclaration) -> Result<Self::Mat>;

    /// `vec · M` (or `vec · Mᵀ`) for a dense `1 x n` message.
    fn vec_mat_mul(vec: &Tensor, mat: &Self::Mat, transpose: bool) -> Result<Tensor>;
}

/// Opaque scope tag for register names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NamespaceId(u32);

type ExprId = usize;

/// One dataflow node. Children always precede parents in the arena, so a
/// single forward sweep evaluates the graph.
#[derive(Debug, Clone)]
enum Expr {
    /// The i-th positional input message
    Input(usize),
    /// Message times a bound matrix slot
    VecMatMul {
        vec: ExprId,
        mat: usize,
        transpose: bool,
    },
    /// Softmax normalization plus null smoothing
    Softmax(ExprId),
    Add(ExprId, ExprId),
    /// The all-zero message
    Zeros,
}

/// Cross-compiles one function at a time; [`CrossCompiler::compile`] resets
/// all graph state, so recompiling is always a clean slate.
pub struct CrossCompiler<R: MatrixRepr> {
    device: Device,
    next_ns: u32,
    exprs: Vec<Expr>,
    env: HashMap<(NamespaceId, String), ExprId>,
    mat_slots: BTreeMap<ModeDeclaration, usize>,
    mat_bindings: Vec<R::Mat>,
    null_smoothing: Tensor,
    num_symbols: usize,
    num_inputs: usize,
    output: Option<ExprId>,
}

impl<R: MatrixRepr> CrossCompiler<R> {
    pub fn new(db: &MatrixDb) -> Result<Self> {
        let null_smoothing = db.null_matrix(1)?.affine(NULL_SMOOTHING, 0.0)?;
        Ok(Self {
            device: db.device().clone(),
            next_ns: 0,
            exprs: Vec::new(),
            env: HashMap::new(),
            mat_slots: BTreeMap::new(),
            mat_bindings: Vec::new(),
            null_smoothing,
            num_symbols: db.num_symbols(),
            num_inputs: 0,
            output: None,
        })
    }

    /// Lower a compiled function into the dataflow graph and bind every
    /// relation matrix it references.
    pub fn compile(&mut self, prog: &Program, fun: FunId) -> Result<()> {
        self.next_ns = 0;
        self.exprs.clear();
        self.env.clear();
        self.mat_slots.clear();
        self.mat_bindings.clear();
        self.output = None;

        self.num_inputs = prog.input_arity(fun);
        let inputs: Vec<ExprId> = (0..self.num_inputs)
            .map(|i| self.push(Expr::Input(i)))
            .collect();
        let out = self.fun2expr(prog, fun, &inputs)?;

        let mut by_slot: Vec<(usize, &ModeDeclaration)> =
            self.mat_slots.iter().map(|(m, &s)| (s, m)).collect();
        by_slot.sort_unstable_by_key(|&(s, _)| s);
        let mut bindings = Vec::with_capacity(by_slot.len());
        for (_, mode) in by_slot {
            bindings.push(R::bind(prog.db(), mode)?);
        }
        self.mat_bindings = bindings;
        self.output = Some(out);
        debug!(
            nodes = self.exprs.len(),
            matrices = self.mat_bindings.len(),
            "cross-compiled"
        );
        Ok(())
    }

    /// The relation modes bound as matrix arguments, in sorted mode order.
    pub fn matrix_modes(&self) -> Vec<ModeDeclaration> {
        self.mat_slots.keys().cloned().collect()
    }

    /// Evaluate the compiled graph on one-hot input messages.
    pub fn call(&self, inputs: &[Tensor]) -> Result<Tensor> {
        let output = self
            .output
            .ok_or_else(|| TensorLogError::CrossCompile("no function compiled".into()))?;
        if inputs.len() != self.num_inputs {
            return Err(TensorLogError::Eval(format!(
                "mismatching number of inputs: got {}, function takes {}",
                inputs.len(),
                self.num_inputs
            )));
        }
        let mut values: Vec<Tensor> = Vec::with_capacity(self.exprs.len());
        for expr in &self.exprs {
            let v = match expr {
                Expr::Input(i) => inputs[*i].clone(),
                Expr::VecMatMul {
                    vec,
                    mat,
                    transpose,
                } => R::vec_mat_mul(&values[*vec], &self.mat_bindings[*mat], *transpose)?,
                Expr::Softmax(inner) => {
                    let normalized = candle_nn::ops::softmax(&values[*inner], D::Minus1)?;
                    (&normalized + &self.null_smoothing)?
                }
                Expr::Add(a, b) => (&values[*a] + &values[*b])?,
                Expr::Zeros => {
                    Tensor::zeros((1, self.num_symbols), DType::F32, &self.device)?
                }
            };
            values.push(v);
        }
        Ok(values[output].clone())
    }

    /// Evaluate on input symbols, decoding to a symbol -> weight map.
    pub fn eval_symbols(
        &self,
        db: &MatrixDb,
        symbols: &[&str],
    ) -> Result<HashMap<String, f32>> {
        let inputs = symbols
            .iter()
            .map(|s| db.onehot(s))
            .collect::<Result<Vec<_>>>()?;
        let out = self.call(&inputs)?;
        db.row_as_symbol_map(&out)
    }

    // =========================================================================
    // LOWERING
    // =========================================================================

    fn push(&mut self, expr: Expr) -> ExprId {
        let id = self.exprs.len();
        self.exprs.push(expr);
        id
    }

    fn fresh_namespace(&mut self) -> NamespaceId {
        let ns = NamespaceId(self.next_ns);
        self.next_ns += 1;
        ns
    }

    fn mat_slot(&mut self, mode: &ModeDeclaration) -> usize {
        if let Some(&slot) = self.mat_slots.get(mode) {
            return slot;
        }
        let slot = self.mat_slots.len();
        self.mat_slots.insert(mode.clone(), slot);
        slot
    }

    fn fun2expr(&mut self, prog: &Program, fun: FunId, inputs: &[ExprId]) -> Result<ExprId> {
        match prog.fun(fun) {
            Function::Null { .. } => Ok(self.push(Expr::Zeros)),

            Function::Softmax { inner } => {
                let e = self.fun2expr(prog, *inner, inputs)?;
                Ok(self.push(Expr::Softmax(e)))
            }

            Function::Sum { parts } => {
                let mut acc: Option<ExprId> = None;
                for part in parts {
                    let e = self.fun2expr(prog, *part, inputs)?;
                    acc = Some(match acc {
                        Some(a) => self.push(Expr::Add(a, e)),
                        None => e,
                    });
                }
                acc.ok_or_else(|| TensorLogError::CrossCompile("empty sum".into()))
            }

            Function::OpSeq { op_inputs, ops } => {
                if inputs.len() != op_inputs.len() {
                    return Err(TensorLogError::CrossCompile(format!(
                        "mismatching number of inputs: got {}, function takes {}",
                        inputs.len(),
                        op_inputs.len()
                    )));
                }
                let ns = self.fresh_namespace();
                for (name, &eid) in op_inputs.iter().zip(inputs) {
                    self.env.insert((ns, name.clone()), eid);
                }
                let mut last = None;
                for op in ops {
                    let eid = self.op2expr(prog, ns, op)?;
                    self.env.insert((ns, op.dst().to_string()), eid);
                    last = Some(eid);
                }
                last.ok_or_else(|| {
                    TensorLogError::CrossCompile("empty operator sequence".into())
                })
            }
        }
    }

    fn op2expr(&mut self, prog: &Program, ns: NamespaceId, op: &Operator) -> Result<ExprId> {
        match op {
            Operator::VecMatMul {
                src,
                mat_mode,
                transpose,
                ..
            } => {
                let vec = self.register(ns, src)?;
                let mat = self.mat_slot(mat_mode);
                Ok(self.push(Expr::VecMatMul {
                    vec,
                    mat,
                    transpose: *transpose,
                }))
            }
            Operator::CallDefined {
                src, mode, depth, ..
            } => {
                let sub = prog.compiled(mode, *depth).ok_or_else(|| {
                    TensorLogError::CrossCompile(format!(
                        "sub-function {} at depth {} was never compiled",
                        mode, depth
                    ))
                })?;
                let vec = self.register(ns, src)?;
                self.fun2expr(prog, sub, &[vec])
            }
            // coverage stays honest: unsupported operators fail loudly
            // instead of silently falling back to the interpreter
            other => Err(TensorLogError::CrossCompile(format!(
                "cannot cross-compile operator '{}'",
                other
            ))),
        }
    }

    fn register(&self, ns: NamespaceId, name: &str) -> Result<ExprId> {
        self.env
            .get(&(ns, name.to_string()))
            .copied()
            .ok_or_else(|| {
                TensorLogError::CrossCompile(format!("unbound register '{}'", name))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MatrixDb;
    use crate::dsl::RuleCollection;
    use crate::program::{Program, ProgramConfig};

    fn ancestor_program() -> Program {
        let mut db = MatrixDb::new();
        db.load_fact_lines("q\ta\tb\nq\tb\tc\n").unwrap();
        let rules =
            RuleCollection::parse("p(X,Y) :- q(X,Y).\np(X,Y) :- q(X,Z), p(Z,Y).").unwrap();
        Program::with_config(
            db,
            rules,
            ProgramConfig {
                max_depth: 2,
                normalize: true,
            },
        )
    }

    #[test]
    fn test_dense_matches_interpreter() {
        let mut prog = ancestor_program();
        let mode = ModeDeclaration::parse("p(i,o)").unwrap();
        let expected = prog.eval_symbols(&mode, &["a"]).unwrap();

        let fun = prog.compile(&mode).unwrap();
        let mut xc: CrossCompiler<DenseMat> = CrossCompiler::new(prog.db()).unwrap();
        xc.compile(&prog, fun).unwrap();
        let got = xc.eval_symbols(prog.db(), &["a"]).unwrap();

        assert_eq!(got.len(), expected.len());
        for (sym, &w) in &expected {
            let g = got.get(sym).copied().unwrap();
            assert!((g - w).abs() < 1e-6, "{}: {} vs {}", sym, g, w);
        }
    }

    #[test]
    fn test_sparse_matches_interpreter() {
        let mut prog = ancestor_program();
        let mode = ModeDeclaration::parse("p(i,o)").unwrap();
        let expected = prog.eval_symbols(&mode, &["a"]).unwrap();

        let fun = prog.compile(&mode).unwrap();
        let mut xc: CrossCompiler<SparseMat> = CrossCompiler::new(prog.db()).unwrap();
        xc.compile(&prog, fun).unwrap();
        let got = xc.eval_symbols(prog.db(), &["a"]).unwrap();

        for (sym, &w) in &expected {
            let g = got.get(sym).copied().unwrap();
            assert!((g - w).abs() < 1e-6, "{}: {} vs {}", sym, g, w);
        }
    }

    #[test]
    fn test_reachable_mass_lands_on_b_and_c() {
        let mut prog = ancestor_program();
        let mode = ModeDeclaration::parse("p(i,o)").unwrap();
        let fun = prog.compile(&mode).unwrap();
        let mut xc: CrossCompiler<DenseMat> = CrossCompiler::new(prog.db()).unwrap();
        xc.compile(&prog, fun).unwrap();
        let got = xc.eval_symbols(prog.db(), &["a"]).unwrap();

        // softmax over raw masses: b and c reachable, a is not
        assert!(got.get("b").copied().unwrap() > got.get("a").copied().unwrap());
        assert!(got.get("c").copied().unwrap() > got.get("a").copied().unwrap());
    }

    #[test]
    fn test_recompile_is_clean_slate() {
        let mut db = MatrixDb::new();
        db.load_fact_lines("q\ta\tb\nr\ta\tc\n").unwrap();
        let rules =
            RuleCollection::parse("f1(X,Y) :- q(X,Y).\nf2(X,Y) :- r(X,Y).").unwrap();
        let mut prog = Program::new(db, rules);

        let m1 = ModeDeclaration::parse("f1(i,o)").unwrap();
        let m2 = ModeDeclaration::parse("f2(i,o)").unwrap();
        let f1 = prog.compile(&m1).unwrap();
        let f2 = prog.compile(&m2).unwrap();

        let mut xc: CrossCompiler<DenseMat> = CrossCompiler::new(prog.db()).unwrap();
        xc.compile(&prog, f1).unwrap();
        let first = xc.eval_symbols(prog.db(), &["a"]).unwrap();
        xc.compile(&prog, f2).unwrap();
        xc.compile(&prog, f1).unwrap();
        let again = xc.eval_symbols(prog.db(), &["a"]).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_matrix_modes_are_sorted() {
        let mut db = MatrixDb::new();
        db.load_fact_lines("zeta\ta\tb\nalpha\tb\tc\n").unwrap();
        let rules = RuleCollection::parse("p(X,Y) :- zeta(X,Z), alpha(Z,Y).").unwrap();
        let mut prog = Program::new(db, rules);
        let mode = ModeDeclaration::parse("p(i,o)").unwrap();
        let fun = prog.compile(&mode).unwrap();

        let mut xc: CrossCompiler<DenseMat> = CrossCompiler::new(prog.db()).unwrap();
        xc.compile(&prog, fun).unwrap();
        let modes: Vec<String> = xc.matrix_modes().iter().map(|m| m.to_string()).collect();
        assert_eq!(modes, vec!["alpha(i,o)", "zeta(i,o)"]);
    }

    #[test]
    fn test_unsupported_operator_is_fatal() {
        let mut db = MatrixDb::new();
        db.load_fact_lines("q\ta\tb\n").unwrap();
        db.intern("f1");
        let rules = RuleCollection::parse("p(X,Y) :- q(X,Y) {f1}.").unwrap();
        let mut prog = Program::proppr(db, rules).unwrap();
        let n = prog.db().num_symbols();
        prog.set_weights(&vec![1.0; n]).unwrap();

        let mode = ModeDeclaration::parse("p(i,o)").unwrap();
        let fun = prog.compile(&mode).unwrap();
        let mut xc: CrossCompiler<DenseMat> = CrossCompiler::new(prog.db()).unwrap();
        assert!(matches!(
            xc.compile(&prog, fun),
            Err(TensorLogError::CrossCompile(_))
        ));
    }
}
