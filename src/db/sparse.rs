//! Sparse relation matrix (CSR).
//!
//! Relation matrices are overwhelmingly sparse (a handful of facts over a
//! large symbol table), so the fact store keeps them in compressed
//! sparse-row form and only densifies on demand. Message vectors stay dense
//! everywhere; the kernels here multiply a dense row vector against a CSR
//! matrix, optionally transposed.

/// A sparse `rows x cols` matrix of f32 fact weights in CSR form.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    vals: Vec<f32>,
}

impl SparseMatrix {
    /// Build from (row, col, value) triplets. Duplicate coordinates are
    /// summed. Out-of-range coordinates are a caller bug.
    pub fn from_triplets(rows: usize, cols: usize, mut entries: Vec<(usize, usize, f32)>) -> Self {
        debug_assert!(entries.iter().all(|&(r, c, _)| r < rows && c < cols));
        entries.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let mut merged: Vec<(usize, usize, f32)> = Vec::with_capacity(entries.len());
        for (r, c, v) in entries {
            match merged.last_mut() {
                Some(last) if last.0 == r && last.1 == c => last.2 += v,
                _ => merged.push((r, c, v)),
            }
        }

        let mut row_ptr = vec![0usize; rows + 1];
        for &(r, _, _) in &merged {
            row_ptr[r + 1] += 1;
        }
        for r in 0..rows {
            row_ptr[r + 1] += row_ptr[r];
        }
        let col_idx = merged.iter().map(|e| e.1).collect();
        let vals = merged.iter().map(|e| e.2).collect();
        Self {
            rows,
            cols,
            row_ptr,
            col_idx,
            vals,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored entries
    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        let (lo, hi) = (self.row_ptr[row], self.row_ptr[row + 1]);
        for k in lo..hi {
            if self.col_idx[k] == col {
                return self.vals[k];
            }
        }
        0.0
    }

    /// Row-major dense copy
    pub fn to_dense(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.rows * self.cols];
        for r in 0..self.rows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                out[r * self.cols + self.col_idx[k]] += self.vals[k];
            }
        }
        out
    }

    /// Materialized transpose
    pub fn transposed(&self) -> SparseMatrix {
        let mut entries = Vec::with_capacity(self.nnz());
        for r in 0..self.rows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                entries.push((self.col_idx[k], r, self.vals[k]));
            }
        }
        SparseMatrix::from_triplets(self.cols, self.rows, entries)
    }

    /// Dense row vector times this matrix: `v · M`, length `cols`.
    ///
    /// Skips zero entries of `v`, so cost is proportional to the rows the
    /// message actually touches.
    pub fn vec_mul(&self, vec: &[f32]) -> Vec<f32> {
        debug_assert_eq!(vec.len(), self.rows);
        let mut out = vec![0.0f32; self.cols];
        for (r, &x) in vec.iter().enumerate() {
            if x == 0.0 {
                continue;
            }
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                out[self.col_idx[k]] += x * self.vals[k];
            }
        }
        out
    }

    /// Dense row vector times the transpose: `v · Mᵀ`, length `rows`.
    pub fn vec_mul_t(&self, vec: &[f32]) -> Vec<f32> {
        debug_assert_eq!(vec.len(), self.cols);
        let mut out = vec![0.0f32; self.rows];
        for r in 0..self.rows {
            let mut acc = 0.0f32;
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                acc += self.vals[k] * vec[self.col_idx[k]];
            }
            out[r] = acc;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SparseMatrix {
        // [[0, 2, 0],
        //  [1, 0, 0]]
        SparseMatrix::from_triplets(2, 3, vec![(1, 0, 1.0), (0, 1, 2.0)])
    }

    #[test]
    fn test_from_triplets_and_get() {
        let m = sample();
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.get(0, 1), 2.0);
        assert_eq!(m.get(1, 0), 1.0);
        assert_eq!(m.get(0, 0), 0.0);
    }

    #[test]
    fn test_to_dense() {
        let m = sample();
        assert_eq!(m.to_dense(), vec![0.0, 2.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_vec_mul() {
        let m = sample();
        // [1, 1] · M = [1, 2, 0]
        assert_eq!(m.vec_mul(&[1.0, 1.0]), vec![1.0, 2.0, 0.0]);
        // zero input row skipped
        assert_eq!(m.vec_mul(&[0.0, 3.0]), vec![3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_vec_mul_t_matches_transposed() {
        let m = sample();
        let v = [0.5, 1.0, 2.0];
        assert_eq!(m.vec_mul_t(&v), m.transposed().vec_mul(&v));
    }

    #[test]
    fn test_duplicate_triplets_sum() {
        let m = SparseMatrix::from_triplets(1, 2, vec![(0, 1, 1.0), (0, 1, 0.5)]);
        assert_eq!(m.get(0, 1), 1.5);
        assert_eq!(m.nnz(), 1);
    }

    #[test]
    fn test_empty_rows() {
        let m = SparseMatrix::from_triplets(3, 3, vec![(2, 0, 1.0)]);
        assert_eq!(m.vec_mul(&[1.0, 1.0, 1.0]), vec![1.0, 0.0, 0.0]);
        assert_eq!(m.get(1, 1), 0.0);
    }
}
