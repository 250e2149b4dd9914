//! Dense matrix strategy: every relation is a dense candle tensor.
//!
//! Simple and autograd-friendly (parameter-marked relations are read
//! through their `Var`), at the cost of `n x n` memory per relation.

use candle_core::Tensor;

use crate::db::MatrixDb;
use crate::dsl::ModeDeclaration;
use crate::xcomp::MatrixRepr;
use crate::Result;

pub struct DenseMat;

impl MatrixRepr for DenseMat {
    type Mat = Tensor;

    fn bind(db: &MatrixDb, mode: &ModeDeclaration) -> Result<Tensor> {
        db.matrix_tensor(mode, false)
    }

    fn vec_mat_mul(vec: &Tensor, mat: &Tensor, transpose: bool) -> Result<Tensor> {
        if transpose {
            Ok(vec.matmul(&mat.t()?.contiguous()?)?)
        } else {
            Ok(vec.matmul(mat)?)
        }
    }
}
