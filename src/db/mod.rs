//! Fact database: symbol table, relation matrices, one-hot codec, parameters
//!
//! `MatrixDb` stores ground facts of unary and binary predicates and serves
//! them to the compilers through a narrow interface:
//!
//! - `matrix(mode, transpose)` — the sparse relation matrix for a mode;
//! - `matrix_tensor(mode, transpose)` — the dense candle form, cached;
//! - `onehot(symbol)` / `row_as_symbol_map(tensor)` — symbol codec;
//! - `null_matrix(rows)` — unit mass on the reserved null entity, the
//!   building block of softmax null-smoothing;
//! - `mark_as_param` — promote a relation to a learnable `Var` so candle
//!   autograd reaches it.
//!
//! Symbol id 0 is reserved for the null entity; real entities start at 1.

pub mod sparse;

pub use sparse::SparseMatrix;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};

use crate::dsl::ModeDeclaration;
use crate::{Result, TensorLogError};

/// Reserved symbol occupying column 0 of every relation matrix.
pub const NULL_ENTITY: &str = "__NULL__";

/// Fact storage engine backing compilation and evaluation.
#[derive(Debug)]
pub struct MatrixDb {
    symbols: Vec<String>,
    index: HashMap<String, usize>,
    /// binary predicate -> (src, dst, weight) triplets
    binary: HashMap<String, Vec<(usize, usize, f32)>>,
    /// unary predicate -> (entity, weight) pairs
    unary: HashMap<String, Vec<(usize, f32)>>,
    /// learnable relations, keyed by (functor, arity)
    params: HashMap<(String, usize), Var>,
    csr_cache: RefCell<HashMap<(String, usize), SparseMatrix>>,
    dense_cache: RefCell<HashMap<(String, usize), Tensor>>,
    device: Device,
}

impl MatrixDb {
    pub fn new() -> Self {
        Self::on_device(Device::Cpu)
    }

    pub fn on_device(device: Device) -> Self {
        let mut db = Self {
            symbols: Vec::new(),
            index: HashMap::new(),
            binary: HashMap::new(),
            unary: HashMap::new(),
            params: HashMap::new(),
            csr_cache: RefCell::new(HashMap::new()),
            dense_cache: RefCell::new(HashMap::new()),
            device,
        };
        db.intern(NULL_ENTITY);
        db
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    // =========================================================================
    // SYMBOL TABLE
    // =========================================================================

    /// Intern a symbol, returning its stable id.
    pub fn intern(&mut self, sym: &str) -> usize {
        if let Some(&id) = self.index.get(sym) {
            return id;
        }
        let id = self.symbols.len();
        self.symbols.push(sym.to_string());
        self.index.insert(sym.to_string(), id);
        // matrix widths changed
        self.invalidate();
        id
    }

    pub fn symbol_id(&self, sym: &str) -> Option<usize> {
        self.index.get(sym).copied()
    }

    pub fn lookup(&self, id: usize) -> Option<&str> {
        self.symbols.get(id).map(String::as_str)
    }

    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    // =========================================================================
    // FACT LOADING
    // =========================================================================

    /// Add one ground fact. Arity 1 and 2 are supported.
    pub fn add_fact(&mut self, functor: &str, args: &[&str], weight: f32) -> Result<()> {
        match args {
            [a] => {
                let ai = self.intern(a);
                self.unary
                    .entry(functor.to_string())
                    .or_default()
                    .push((ai, weight));
            }
            [a, b] => {
                let ai = self.intern(a);
                let bi = self.intern(b);
                self.binary
                    .entry(functor.to_string())
                    .or_default()
                    .push((ai, bi, weight));
            }
            _ => {
                return Err(TensorLogError::Db(format!(
                    "unsupported fact arity {} for {}",
                    args.len(),
                    functor
                )))
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Load tab-separated fact lines: `functor<TAB>arg1[<TAB>arg2][<TAB>weight]`.
    ///
    /// A trailing field that parses as a float is taken as the fact weight.
    /// Blank lines and `#` comments are skipped.
    pub fn load_fact_lines(&mut self, text: &str) -> Result<()> {
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 2 {
                return Err(TensorLogError::Db(format!(
                    "malformed fact on line {}: '{}'",
                    lineno + 1,
                    line
                )));
            }
            let functor = fields[0];
            let mut args = &fields[1..];
            let mut weight = 1.0f32;
            if args.len() > 1 {
                if let Ok(w) = args[args.len() - 1].parse::<f32>() {
                    weight = w;
                    args = &args[..args.len() - 1];
                }
            }
            self.add_fact(functor, args, weight)?;
        }
        Ok(())
    }

    pub fn load_fact_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.load_fact_lines(&text)
    }

    /// Install a unary predicate from a dense weight vector (one entry per
    /// symbol). Replaces any existing facts for the functor.
    pub fn insert_predicate(&mut self, functor: &str, weights: &[f32]) -> Result<()> {
        if weights.len() != self.num_symbols() {
            return Err(TensorLogError::Db(format!(
                "weight vector length {} != {} symbols",
                weights.len(),
                self.num_symbols()
            )));
        }
        let pairs: Vec<(usize, f32)> = weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w != 0.0)
            .map(|(i, w)| (i, *w))
            .collect();
        self.unary.insert(functor.to_string(), pairs);
        self.invalidate();
        Ok(())
    }

    /// All-ones weight vector over the real entities (zero at the null slot).
    pub fn ones(&self) -> Vec<f32> {
        let mut v = vec![1.0f32; self.num_symbols()];
        v[0] = 0.0;
        v
    }

    /// Every stored fact as a tab-separated line (the same shape
    /// `load_fact_lines` accepts), sorted. Unit weights are omitted.
    pub fn listing(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (functor, pairs) in &self.unary {
            for &(i, w) in pairs {
                if let Some(sym) = self.lookup(i) {
                    if w == 1.0 {
                        out.push(format!("{}\t{}", functor, sym));
                    } else {
                        out.push(format!("{}\t{}\t{}", functor, sym, w));
                    }
                }
            }
        }
        for (functor, triplets) in &self.binary {
            for &(a, b, w) in triplets {
                if let (Some(sa), Some(sb)) = (self.lookup(a), self.lookup(b)) {
                    if w == 1.0 {
                        out.push(format!("{}\t{}\t{}", functor, sa, sb));
                    } else {
                        out.push(format!("{}\t{}\t{}\t{}", functor, sa, sb, w));
                    }
                }
            }
        }
        out.sort();
        out
    }

    /// Whether the database holds facts (or a parameter) for `functor/arity`.
    pub fn contains(&self, functor: &str, arity: usize) -> bool {
        match arity {
            1 => {
                self.unary.contains_key(functor)
                    || self.params.contains_key(&(functor.to_string(), 1))
            }
            2 => {
                self.binary.contains_key(functor)
                    || self.params.contains_key(&(functor.to_string(), 2))
            }
            _ => false,
        }
    }

    // =========================================================================
    // PARAMETERS
    // =========================================================================

    /// Promote a relation to a learnable parameter.
    ///
    /// The current facts become the initial value; afterwards the dense form
    /// is read through the `Var` so gradients flow to it.
    pub fn mark_as_param(&mut self, functor: &str, arity: usize) -> Result<()> {
        if !self.contains(functor, arity) {
            return Err(TensorLogError::Db(format!(
                "cannot mark unknown predicate {}/{} as parameter",
                functor, arity
            )));
        }
        let init = match arity {
            1 => self.unary_vector_tensor(functor)?,
            2 => self.natural_dense_tensor(functor)?,
            _ => {
                return Err(TensorLogError::Db(format!(
                    "unsupported parameter arity {}",
                    arity
                )))
            }
        };
        let var = Var::from_tensor(&init)?;
        self.params.insert((functor.to_string(), arity), var);
        Ok(())
    }

    /// Learnable relations, keyed by (functor, arity).
    pub fn params(&self) -> &HashMap<(String, usize), Var> {
        &self.params
    }

    // =========================================================================
    // RELATION MATRICES
    // =========================================================================

    /// The sparse relation matrix denoted by `(mode, transpose)`.
    ///
    /// Binary modes must bind exactly one argument (`(i,o)` or `(o,i)`);
    /// unary modes yield the diagonal matrix of the predicate's weight
    /// vector. Parameter-marked relations are materialized from the current
    /// `Var` value.
    pub fn matrix(&self, mode: &ModeDeclaration, transpose: bool) -> Result<SparseMatrix> {
        let flip = self.mode_flip(mode)? ^ transpose;
        let natural = self.natural_csr(mode.functor(), mode.arity())?;
        Ok(if flip { natural.transposed() } else { natural })
    }

    /// Dense candle form of `matrix(mode, transpose)`.
    ///
    /// Parameter-marked relations are read through their `Var` so the result
    /// participates in autograd; fixed relations are cached.
    pub fn matrix_tensor(&self, mode: &ModeDeclaration, transpose: bool) -> Result<Tensor> {
        let flip = self.mode_flip(mode)? ^ transpose;
        let functor = mode.functor();
        let arity = mode.arity();

        let natural = if let Some(var) = self.params.get(&(functor.to_string(), arity)) {
            match arity {
                1 => self.diag_of(var.as_tensor())?,
                _ => var.as_tensor().clone(),
            }
        } else {
            let key = (functor.to_string(), arity);
            if let Some(cached) = self.dense_cache.borrow().get(&key) {
                let cached = cached.clone();
                return if flip {
                    Ok(cached.t()?.contiguous()?)
                } else {
                    Ok(cached)
                };
            }
            let built = match arity {
                1 => {
                    let vec = self.unary_vector_tensor(functor)?;
                    self.diag_of(&vec)?
                }
                _ => self.natural_dense_tensor(functor)?,
            };
            self.dense_cache.borrow_mut().insert(key, built.clone());
            built
        };

        if flip {
            Ok(natural.t()?.contiguous()?)
        } else {
            Ok(natural)
        }
    }

    /// Whether `(mode, transpose)` is served by a valid relation.
    fn mode_flip(&self, mode: &ModeDeclaration) -> Result<bool> {
        let functor = mode.functor();
        match mode.arity() {
            1 => {
                if !mode.is_input(0) {
                    return Err(TensorLogError::Db(format!(
                        "unary mode {} must bind its argument",
                        mode
                    )));
                }
                if !self.contains(functor, 1) {
                    return Err(TensorLogError::Db(format!("unknown predicate {}/1", functor)));
                }
                Ok(false)
            }
            2 => {
                if !self.contains(functor, 2) {
                    return Err(TensorLogError::Db(format!("unknown predicate {}/2", functor)));
                }
                match (mode.is_input(0), mode.is_input(1)) {
                    (true, false) => Ok(false),
                    (false, true) => Ok(true),
                    _ => Err(TensorLogError::Db(format!(
                        "binary mode {} must bind exactly one argument",
                        mode
                    ))),
                }
            }
            n => Err(TensorLogError::Db(format!(
                "unsupported relation arity {} for {}",
                n, functor
            ))),
        }
    }

    fn natural_csr(&self, functor: &str, arity: usize) -> Result<SparseMatrix> {
        let n = self.num_symbols();
        let key = (functor.to_string(), arity);
        // parameter-marked relations read the current Var value every time,
        // so a mutated Var is never served stale from the cache
        let is_param = self.params.contains_key(&key);
        if !is_param {
            if let Some(cached) = self.csr_cache.borrow().get(&key) {
                return Ok(cached.clone());
            }
        }
        let built = match arity {
            1 => {
                let vec = self.unary_weights(functor)?;
                let entries = vec
                    .into_iter()
                    .enumerate()
                    .filter(|(_, w)| *w != 0.0)
                    .map(|(i, w)| (i, i, w))
                    .collect();
                SparseMatrix::from_triplets(n, n, entries)
            }
            _ => {
                if let Some(var) = self.params.get(&key) {
                    let rows = var.as_tensor().to_vec2::<f32>()?;
                    let mut entries = Vec::new();
                    for (r, row) in rows.iter().enumerate() {
                        for (c, &w) in row.iter().enumerate() {
                            if w != 0.0 {
                                entries.push((r, c, w));
                            }
                        }
                    }
                    SparseMatrix::from_triplets(n, n, entries)
                } else {
                    let triplets = self.binary.get(functor).ok_or_else(|| {
                        TensorLogError::Db(format!("unknown predicate {}/2", functor))
                    })?;
                    SparseMatrix::from_triplets(n, n, triplets.clone())
                }
            }
        };
        if !is_param {
            self.csr_cache.borrow_mut().insert(key, built.clone());
        }
        Ok(built)
    }

    /// Current dense weight vector of a unary predicate.
    fn unary_weights(&self, functor: &str) -> Result<Vec<f32>> {
        if let Some(var) = self.params.get(&(functor.to_string(), 1)) {
            let rows = var.as_tensor().to_vec2::<f32>()?;
            return Ok(rows.into_iter().next().unwrap_or_default());
        }
        let pairs = self
            .unary
            .get(functor)
            .ok_or_else(|| TensorLogError::Db(format!("unknown predicate {}/1", functor)))?;
        let mut out = vec![0.0f32; self.num_symbols()];
        for &(i, w) in pairs {
            out[i] += w;
        }
        Ok(out)
    }

    fn unary_vector_tensor(&self, functor: &str) -> Result<Tensor> {
        let weights = self.unary_weights(functor)?;
        let n = weights.len();
        Ok(Tensor::from_vec(weights, (1, n), &self.device)?)
    }

    fn natural_dense_tensor(&self, functor: &str) -> Result<Tensor> {
        let n = self.num_symbols();
        let dense = self.natural_csr(functor, 2)?.to_dense();
        Ok(Tensor::from_vec(dense, (n, n), &self.device)?)
    }

    /// Diagonal matrix of a `1 x n` weight vector, built with broadcast ops
    /// so gradients reach a parameter `Var`.
    fn diag_of(&self, vec: &Tensor) -> Result<Tensor> {
        let n = self.num_symbols();
        let eye = Tensor::eye(n, DType::F32, &self.device)?;
        Ok(eye.broadcast_mul(vec)?)
    }

    fn invalidate(&self) {
        self.csr_cache.borrow_mut().clear();
        self.dense_cache.borrow_mut().clear();
    }

    // =========================================================================
    // SYMBOL CODEC
    // =========================================================================

    /// One-hot row vector (`1 x n`) for a known symbol.
    pub fn onehot(&self, sym: &str) -> Result<Tensor> {
        let id = self
            .symbol_id(sym)
            .ok_or_else(|| TensorLogError::Db(format!("unknown symbol '{}'", sym)))?;
        let n = self.num_symbols();
        let mut v = vec![0.0f32; n];
        v[id] = 1.0;
        Ok(Tensor::from_vec(v, (1, n), &self.device)?)
    }

    /// `rows x n` matrix with unit mass on the null entity in every row.
    pub fn null_matrix(&self, rows: usize) -> Result<Tensor> {
        let n = self.num_symbols();
        let mut v = vec![0.0f32; rows * n];
        for r in 0..rows {
            v[r * n] = 1.0;
        }
        Ok(Tensor::from_vec(v, (rows, n), &self.device)?)
    }

    /// Decode a `1 x n` message into a sparse symbol -> weight map,
    /// dropping exact zeros.
    pub fn row_as_symbol_map(&self, row: &Tensor) -> Result<HashMap<String, f32>> {
        let rows = row.to_vec2::<f32>()?;
        let values = rows
            .into_iter()
            .next()
            .ok_or_else(|| TensorLogError::Eval("empty result row".into()))?;
        let mut out = HashMap::new();
        for (i, v) in values.into_iter().enumerate() {
            if v != 0.0 {
                if let Some(sym) = self.lookup(i) {
                    out.insert(sym.to_string(), v);
                }
            }
        }
        Ok(out)
    }
}

impl Default for MatrixDb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::ModeDeclaration;

    fn family_db() -> MatrixDb {
        let mut db = MatrixDb::new();
        db.load_fact_lines("parent\tjoe\tsue\nparent\tjoe\tbob\nbrother\tsue\tmax\n")
            .unwrap();
        db
    }

    #[test]
    fn test_null_entity_reserved() {
        let db = MatrixDb::new();
        assert_eq!(db.symbol_id(NULL_ENTITY), Some(0));
        assert_eq!(db.num_symbols(), 1);
    }

    #[test]
    fn test_load_and_contains() {
        let db = family_db();
        assert!(db.contains("parent", 2));
        assert!(!db.contains("parent", 1));
        assert!(!db.contains("spouse", 2));
        // __NULL__ + joe, sue, bob, max
        assert_eq!(db.num_symbols(), 5);
    }

    #[test]
    fn test_weighted_fact_line() {
        let mut db = MatrixDb::new();
        db.load_fact_lines("sim\ta\tb\t0.25\n").unwrap();
        let mode = ModeDeclaration::parse("sim(i,o)").unwrap();
        let m = db.matrix(&mode, false).unwrap();
        let (a, b) = (db.symbol_id("a").unwrap(), db.symbol_id("b").unwrap());
        assert_eq!(m.get(a, b), 0.25);
    }

    #[test]
    fn test_matrix_orientation() {
        let db = family_db();
        let fwd = ModeDeclaration::parse("parent(i,o)").unwrap();
        let rev = ModeDeclaration::parse("parent(o,i)").unwrap();
        let joe = db.symbol_id("joe").unwrap();
        let sue = db.symbol_id("sue").unwrap();

        assert_eq!(db.matrix(&fwd, false).unwrap().get(joe, sue), 1.0);
        // (o,i) is the transpose of (i,o)
        assert_eq!(db.matrix(&rev, false).unwrap().get(sue, joe), 1.0);
        // explicit transpose flag composes with the mode orientation
        assert_eq!(db.matrix(&rev, true).unwrap().get(joe, sue), 1.0);
    }

    #[test]
    fn test_matrix_rejects_bad_modes() {
        let db = family_db();
        let both_in = ModeDeclaration::parse("parent(i,i)").unwrap();
        assert!(db.matrix(&both_in, false).is_err());
        let unknown = ModeDeclaration::parse("spouse(i,o)").unwrap();
        assert!(db.matrix(&unknown, false).is_err());
    }

    #[test]
    fn test_matrix_tensor_matches_csr() {
        let db = family_db();
        let mode = ModeDeclaration::parse("parent(i,o)").unwrap();
        let dense = db
            .matrix_tensor(&mode, false)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(dense, db.matrix(&mode, false).unwrap().to_dense());
    }

    #[test]
    fn test_onehot_roundtrip() {
        let db = family_db();
        let hot = db.onehot("sue").unwrap();
        let decoded = db.row_as_symbol_map(&hot).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("sue"), Some(&1.0));
        assert!(db.onehot("nobody").is_err());
    }

    #[test]
    fn test_null_matrix() {
        let db = family_db();
        let nm = db.null_matrix(1).unwrap();
        let row = nm.to_vec2::<f32>().unwrap();
        assert_eq!(row[0][0], 1.0);
        assert!(row[0][1..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_unary_diagonal() {
        let mut db = family_db();
        let weights = db.ones();
        db.insert_predicate("weighted", &weights).unwrap();
        let mode = ModeDeclaration::parse("weighted(i)").unwrap();
        let m = db.matrix(&mode, false).unwrap();
        let sue = db.symbol_id("sue").unwrap();
        assert_eq!(m.get(sue, sue), 1.0);
        assert_eq!(m.get(0, 0), 0.0); // null slot carries no weight
    }

    #[test]
    fn test_same_functor_both_arities() {
        let mut db = MatrixDb::new();
        db.load_fact_lines("p\ta\tb\np\ta\n").unwrap();
        let unary = ModeDeclaration::parse("p(i)").unwrap();
        let binary = ModeDeclaration::parse("p(i,o)").unwrap();
        let (a, b) = (db.symbol_id("a").unwrap(), db.symbol_id("b").unwrap());

        // prime the caches with the unary diagonal first
        assert_eq!(db.matrix(&unary, false).unwrap().get(a, a), 1.0);
        assert_eq!(db.matrix(&binary, false).unwrap().get(a, b), 1.0);

        let dense = db.matrix_tensor(&unary, false).unwrap();
        assert_eq!(dense.to_vec2::<f32>().unwrap()[a][a], 1.0);
        let dense = db.matrix_tensor(&binary, false).unwrap();
        assert_eq!(dense.to_vec2::<f32>().unwrap()[a][b], 1.0);
    }

    #[test]
    fn test_param_matrix_tracks_var() {
        let mut db = family_db();
        db.mark_as_param("parent", 2).unwrap();
        let mode = ModeDeclaration::parse("parent(i,o)").unwrap();
        let joe = db.symbol_id("joe").unwrap();
        let sue = db.symbol_id("sue").unwrap();
        assert_eq!(db.matrix(&mode, false).unwrap().get(joe, sue), 1.0);

        let var = db.params().get(&("parent".to_string(), 2)).unwrap();
        let halved = var.as_tensor().affine(0.5, 0.0).unwrap();
        var.set(&halved).unwrap();
        assert_eq!(db.matrix(&mode, false).unwrap().get(joe, sue), 0.5);
        let dense = db.matrix_tensor(&mode, false).unwrap();
        assert_eq!(dense.to_vec2::<f32>().unwrap()[joe][sue], 0.5);
    }

    #[test]
    fn test_mark_as_param() {
        let mut db = family_db();
        let weights = db.ones();
        db.insert_predicate("weighted", &weights).unwrap();
        db.mark_as_param("weighted", 1).unwrap();
        assert_eq!(db.params().len(), 1);
        assert!(db.contains("weighted", 1));

        // dense form still matches the stored weights
        let mode = ModeDeclaration::parse("weighted(i)").unwrap();
        let t = db.matrix_tensor(&mode, false).unwrap();
        let sue = db.symbol_id("sue").unwrap();
        let vals = t.to_vec2::<f32>().unwrap();
        assert_eq!(vals[sue][sue], 1.0);
    }
}
