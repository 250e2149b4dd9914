//! # tensorlog
//!
//! Differentiable logic-program compiler: Datalog/Prolog-style rule sets with
//! typed input/output argument modes are compiled into numeric dataflow graphs
//! that compute, for one-hot input vectors, a weighted distribution over
//! output symbols together with its gradient with respect to learnable
//! weights.
//!
//! ## Overview
//!
//! The pipeline has two coupled halves:
//!
//! - **Mode compiler** ([`program::Program`]): resolves a predicate mode such
//!   as `p(i,o)` to a [`funs::Function`], recursively compiling
//!   sub-predicates, bounding recursion depth, summing multi-clause
//!   contributions and softmax-normalizing the top level.
//! - **Cross-compiler** ([`xcomp::CrossCompiler`]): lowers a compiled
//!   function into a candle expression graph plus a callable, under a dense
//!   or sparse relation-matrix strategy.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tensorlog::prelude::*;
//!
//! let mut interp = Interp::from_sources(
//!     "uncle(X,Y) :- parent(X,Z), brother(Z,Y).",
//!     "parent\tjoe\tsue\nbrother\tsue\tbob\n",
//!     false,
//! )?;
//! let dist = interp.eval("uncle(i,o)", "joe")?;
//! println!("uncle(joe, ·) = {:?}", dist);
//! ```

pub mod bpcompiler;
pub mod db;
pub mod dsl;
pub mod funs;
pub mod interp;
pub mod ops;
pub mod program;
pub mod xcomp;

// Re-export candle types for convenience
pub use candle_core::{DType, Device, Tensor, Var};

/// Error types for tensorlog operations
#[derive(Debug, thiserror::Error)]
pub enum TensorLogError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Db(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Cross-compile error: {0}")]
    CrossCompile(String),

    #[error("Evaluation error: {0}")]
    Eval(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for tensorlog operations
pub type Result<T> = std::result::Result<T, TensorLogError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{Result, TensorLogError};

    pub use crate::db::MatrixDb;
    pub use crate::dsl::{ArgMode, Goal, ModeDeclaration, Rule, RuleCollection, Term};
    pub use crate::funs::{FunId, Function};
    pub use crate::interp::Interp;
    pub use crate::ops::Operator;
    pub use crate::program::{Program, ProgramConfig};
    pub use crate::xcomp::{CrossCompiler, DenseMat, MatrixRepr, SparseMat};
}
