//! Jacobian accumulator with a dense and a sparse backend.
//!
//! Feature code is written once against [`Jacobian`]; the backend picked by
//! the caller through [`JacobianKind`] is preserved through every operation.
//! Dense matrices assign blocks in place, sparse matrices accumulate triplets
//! that are summed on conversion.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CooMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JacobianKind {
    Dense,
    Sparse,
}

#[derive(Debug, Clone)]
pub enum Jacobian {
    Dense(DMatrix<f64>),
    Sparse(CooMatrix<f64>),
}

impl Jacobian {
    pub fn zeros(kind: JacobianKind, nrows: usize, ncols: usize) -> Self {
        match kind {
            JacobianKind::Dense => Self::Dense(DMatrix::zeros(nrows, ncols)),
            JacobianKind::Sparse => Self::Sparse(CooMatrix::new(nrows, ncols)),
        }
    }

    pub fn identity(kind: JacobianKind, n: usize) -> Self {
        match kind {
            JacobianKind::Dense => Self::Dense(DMatrix::identity(n, n)),
            JacobianKind::Sparse => {
                let mut coo = CooMatrix::new(n, n);
                for i in 0..n {
                    coo.push(i, i, 1.);
                }
                Self::Sparse(coo)
            }
        }
    }

    pub fn kind(&self) -> JacobianKind {
        match self {
            Self::Dense(_) => JacobianKind::Dense,
            Self::Sparse(_) => JacobianKind::Sparse,
        }
    }

    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(m) => m.nrows(),
            Self::Sparse(m) => m.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(m) => m.ncols(),
            Self::Sparse(m) => m.ncols(),
        }
    }

    /// Writes a single entry. On the sparse backend each entry must be set at
    /// most once, since triplets are summed.
    pub(crate) fn set(&mut self, row: usize, col: usize, value: f64) {
        match self {
            Self::Dense(m) => m[(row, col)] = value,
            Self::Sparse(m) => m.push(row, col, value),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self {
            Self::Dense(m) => m[(row, col)],
            Self::Sparse(m) => m
                .triplet_iter()
                .filter(|(i, j, _)| *i == row && *j == col)
                .map(|(_, _, v)| *v)
                .sum(),
        }
    }

    /// `self[:, col_offset..col_offset + block.ncols()] += scale * block`
    pub fn add_block(&mut self, block: &Jacobian, col_offset: usize, scale: f64) {
        debug_assert_eq!(self.nrows(), block.nrows());
        debug_assert!(col_offset + block.ncols() <= self.ncols());
        match (self, block) {
            (Self::Dense(m), Self::Dense(b)) => {
                let mut view = m.view_mut((0, col_offset), (b.nrows(), b.ncols()));
                view += b * scale;
            }
            (Self::Dense(m), Self::Sparse(b)) => {
                for (i, j, v) in b.triplet_iter() {
                    m[(i, col_offset + j)] += scale * v;
                }
            }
            (Self::Sparse(m), Self::Dense(b)) => {
                for j in 0..b.ncols() {
                    for i in 0..b.nrows() {
                        let v = b[(i, j)];
                        if v != 0. {
                            m.push(i, col_offset + j, scale * v);
                        }
                    }
                }
            }
            (Self::Sparse(m), Self::Sparse(b)) => {
                for (i, j, v) in b.triplet_iter() {
                    m.push(i, col_offset + j, scale * v);
                }
            }
        }
    }

    pub fn scale(&mut self, s: f64) {
        match self {
            Self::Dense(m) => *m *= s,
            Self::Sparse(m) => {
                *m = remap(m, m.nrows(), m.ncols(), |i, j, v| Some((i, j, s * v)));
            }
        }
    }

    /// Multiplies row `i` by `s[i]`.
    pub fn scale_rows(&mut self, s: &[f64]) {
        debug_assert_eq!(self.nrows(), s.len());
        match self {
            Self::Dense(m) => {
                for (i, si) in s.iter().enumerate() {
                    let mut row = m.row_mut(i);
                    row *= *si;
                }
            }
            Self::Sparse(m) => {
                *m = remap(m, m.nrows(), m.ncols(), |i, j, v| Some((i, j, s[i] * v)));
            }
        }
    }

    /// `self += scale * y * row`, where `row` is a single-row jacobian.
    pub fn add_outer(&mut self, y: &DVector<f64>, row: &Jacobian, scale: f64) {
        debug_assert_eq!(row.nrows(), 1);
        debug_assert_eq!(self.nrows(), y.len());
        match self {
            Self::Dense(m) => {
                let row = row.to_dense();
                *m += (y * row) * scale;
            }
            Self::Sparse(m) => {
                let entries: Vec<(usize, f64)> = match row {
                    Jacobian::Dense(r) => r
                        .iter()
                        .enumerate()
                        .filter(|(_, v)| **v != 0.)
                        .map(|(j, v)| (j, *v))
                        .collect(),
                    Jacobian::Sparse(r) => r.triplet_iter().map(|(_, j, v)| (j, *v)).collect(),
                };
                for (j, v) in entries {
                    for (i, yi) in y.iter().enumerate() {
                        if *yi != 0. {
                            m.push(i, j, scale * yi * v);
                        }
                    }
                }
            }
        }
    }

    /// New jacobian made of the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Jacobian {
        match self {
            Self::Dense(m) => Self::Dense(m.select_rows(rows)),
            Self::Sparse(m) => {
                let mut targets = vec![Vec::new(); m.nrows()];
                for (new, old) in rows.iter().enumerate() {
                    targets[*old].push(new);
                }
                let mut coo = CooMatrix::new(rows.len(), m.ncols());
                for (i, j, v) in m.triplet_iter() {
                    for new in &targets[i] {
                        coo.push(*new, j, *v);
                    }
                }
                Self::Sparse(coo)
            }
        }
    }

    /// Places this jacobian at `col_offset` inside a wider column space.
    pub fn expand(&self, col_offset: usize, ncols: usize) -> Jacobian {
        let mut res = Jacobian::zeros(self.kind(), self.nrows(), ncols);
        res.add_block(self, col_offset, 1.);
        res
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        match self {
            Self::Dense(m) => m.clone(),
            Self::Sparse(m) => DMatrix::from(m),
        }
    }
}

fn remap(
    coo: &CooMatrix<f64>,
    nrows: usize,
    ncols: usize,
    f: impl Fn(usize, usize, f64) -> Option<(usize, usize, f64)>,
) -> CooMatrix<f64> {
    let mut res = CooMatrix::new(nrows, ncols);
    for (i, j, v) in coo.triplet_iter() {
        if let Some((i, j, v)) = f(i, j, *v) {
            res.push(i, j, v);
        }
    }
    res
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn block(kind: JacobianKind) -> Jacobian {
        let mut j = Jacobian::zeros(kind, 2, 3);
        j.set(0, 0, 1.);
        j.set(1, 2, -1.);
        j
    }

    #[test]
    fn test_add_block_same_for_both_backends() {
        let mut results = vec![];
        for kind in [JacobianKind::Dense, JacobianKind::Sparse] {
            let mut j = Jacobian::zeros(kind, 2, 9);
            j.add_block(&block(kind), 3, 2.);
            j.add_block(&block(kind), 6, -1.);
            j.add_block(&block(kind), 3, 1.);
            assert_eq!(j.kind(), kind);
            results.push(j.to_dense());
        }
        assert_relative_eq!(results[0], results[1]);
        assert_relative_eq!(results[0][(0, 3)], 3.);
        assert_relative_eq!(results[0][(1, 5)], -3.);
        assert_relative_eq!(results[0][(0, 6)], -1.);
        assert_relative_eq!(results[0][(1, 8)], 1.);
    }

    #[test]
    fn test_mixed_backends() {
        let mut dense = Jacobian::zeros(JacobianKind::Dense, 2, 3);
        dense.add_block(&block(JacobianKind::Sparse), 0, 1.);
        let mut sparse = Jacobian::zeros(JacobianKind::Sparse, 2, 3);
        sparse.add_block(&block(JacobianKind::Dense), 0, 1.);
        assert_relative_eq!(dense.to_dense(), sparse.to_dense());
        assert_eq!(sparse.kind(), JacobianKind::Sparse);
    }

    #[test]
    fn test_select_rows_and_expand() {
        for kind in [JacobianKind::Dense, JacobianKind::Sparse] {
            let j = block(kind).select_rows(&[1]);
            assert_eq!(j.nrows(), 1);
            assert_relative_eq!(j.get(0, 2), -1.);
            assert_relative_eq!(j.get(0, 0), 0.);

            let e = j.expand(4, 10);
            assert_eq!(e.ncols(), 10);
            assert_relative_eq!(e.get(0, 6), -1.);
            assert_eq!(e.kind(), kind);
        }
    }

    #[test]
    fn test_scale_rows_and_outer() {
        for kind in [JacobianKind::Dense, JacobianKind::Sparse] {
            let mut j = block(kind);
            j.scale_rows(&[10., 3.]);
            assert_relative_eq!(j.get(0, 0), 10.);
            assert_relative_eq!(j.get(1, 2), -3.);

            let mut row = Jacobian::zeros(kind, 1, 3);
            row.set(0, 1, 1.);
            j.add_outer(&DVector::from_vec(vec![2., 4.]), &row, -0.5);
            assert_relative_eq!(j.get(0, 1), -1.);
            assert_relative_eq!(j.get(1, 1), -2.);

            j.scale(2.);
            assert_relative_eq!(j.get(1, 2), -6.);
        }
    }

    #[test]
    fn test_identity() {
        let d = Jacobian::identity(JacobianKind::Dense, 3).to_dense();
        let s = Jacobian::identity(JacobianKind::Sparse, 3).to_dense();
        assert_relative_eq!(d, s);
        assert_relative_eq!(d, DMatrix::identity(3, 3));
    }
}
