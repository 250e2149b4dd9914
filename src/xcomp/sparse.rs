//! Sparse matrix strategy: relations stay in CSR form.
//!
//! Messages remain dense candle tensors; each multiply round-trips the
//! message through the CSR kernels. Forward-only — gradients do not flow
//! through the native kernels, so use [`super::DenseMat`] when training.

use candle_core::Tensor;

use crate::db::{MatrixDb, SparseMatrix};
use crate::dsl::ModeDeclaration;
use crate::xcomp::MatrixRepr;
use crate::{Result, TensorLogError};

pub struct SparseMat;

impl MatrixRepr for SparseMat {
    type Mat = SparseMatrix;

    fn bind(db: &MatrixDb, mode: &ModeDeclaration) -> Result<SparseMatrix> {
        db.matrix(mode, false)
    }

    fn vec_mat_mul(vec: &Tensor, mat: &SparseMatrix, transpose: bool) -> Result<Tensor> {
        let rows = vec.to_vec2::<f32>()?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| TensorLogError::Eval("empty message vector".into()))?;
        let out = if transpose {
            mat.vec_mul_t(&row)
        } else {
            mat.vec_mul(&row)
        };
        let n = out.len();
        Ok(Tensor::from_vec(out, (1, n), vec.device())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_matches_dense_matmul() {
        let mut db = MatrixDb::new();
        db.load_fact_lines("q\ta\tb\t0.5\nq\ta\tc\t2.0\n").unwrap();
        let mode = ModeDeclaration::parse("q(i,o)").unwrap();

        let csr = SparseMat::bind(&db, &mode).unwrap();
        let dense = db.matrix_tensor(&mode, false).unwrap();
        let x = db.onehot("a").unwrap();

        let sparse_out = SparseMat::vec_mat_mul(&x, &csr, false).unwrap();
        let dense_out = x.matmul(&dense).unwrap();
        assert_eq!(
            sparse_out.to_vec2::<f32>().unwrap(),
            dense_out.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_transposed_kernel() {
        let mut db = MatrixDb::new();
        db.load_fact_lines("q\ta\tb\n").unwrap();
        let mode = ModeDeclaration::parse("q(i,o)").unwrap();
        let csr = SparseMat::bind(&db, &mode).unwrap();
        let out = SparseMat::vec_mat_mul(&db.onehot("b").unwrap(), &csr, true).unwrap();
        assert_eq!(db.row_as_symbol_map(&out).unwrap().get("a"), Some(&1.0));
    }
}
