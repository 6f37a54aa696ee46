//! Finite-difference velocity, acceleration and jerk over a configuration tuple.

use nalgebra::DVector;

use crate::configuration::Configuration;
use crate::error::{FeatureError, Result};
use crate::jacobian::{Jacobian, JacobianKind};

/// Column layout of the concatenated coordinate vectors of a tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TupleLayout {
    pub offsets: Vec<usize>,
    pub ncols: usize,
}

impl TupleLayout {
    pub fn new(tuple: &[&Configuration]) -> TupleLayout {
        let mut offsets = Vec::with_capacity(tuple.len());
        let mut ncols = 0;
        for c in tuple {
            offsets.push(ncols);
            ncols += c.joint_state_dim();
        }
        TupleLayout { offsets, ncols }
    }

    pub fn last_offset(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }
}

/// Coefficients of the backward difference of `order`, oldest first.
pub(crate) fn stencil(order: usize) -> Result<&'static [f64]> {
    match order {
        1 => Ok(&[-1., 1.]),
        2 => Ok(&[1., -2., 1.]),
        3 => Ok(&[-1., 3., -3., 1.]),
        _ => Err(FeatureError::UnsupportedOrder(order)),
    }
}

/// Combines the `order + 1` aligned values (and jacobians) of the newest
/// configurations of `tuple` into a finite difference scaled by `tau^order`.
///
/// Each jacobian is placed at its configuration's column offset in the whole
/// tuple; older configurations outside the stencil keep zero columns. For
/// velocities a correction `-(1/tau) y Jtau` accounts for a time step that is
/// itself part of the coordinates.
pub(crate) fn difference(
    order: usize,
    tuple: &[&Configuration],
    values: &[DVector<f64>],
    jacobians: Option<&[Jacobian]>,
) -> Result<(DVector<f64>, Option<Jacobian>)> {
    let coeffs = stencil(order)?;
    if let Some(jacobians) = jacobians {
        if order == 3 && jacobians.iter().any(|j| j.kind() == JacobianKind::Sparse) {
            return Err(FeatureError::UnsupportedSparse(order));
        }
    }
    if tuple.len() < order + 1 || values.len() != order + 1 {
        return Err(FeatureError::TupleTooShort {
            needed: order + 1,
            got: tuple.len().min(values.len()),
        });
    }
    let last = tuple[tuple.len() - 1];
    let tau = last.tau();
    if !(tau > 0. && tau.is_finite()) {
        return Err(FeatureError::InvalidTimestep(tau));
    }
    let n = values[0].len();
    if let Some(other) = values.iter().map(|v| v.len()).find(|len| *len != n) {
        return Err(FeatureError::InconsistentTuple { first: n, other });
    }

    let scale = 1. / tau.powi(order as i32);
    // repeated backward differences, exact for constant values
    let mut diffs = values.to_vec();
    for _ in 0..order {
        diffs = diffs.windows(2).map(|w| &w[1] - &w[0]).collect();
    }
    let y = &diffs[0] * scale;

    let Some(jacobians) = jacobians else {
        return Ok((y, None));
    };
    let layout = TupleLayout::new(tuple);
    let offset = tuple.len() - 1 - order;
    let kind = jacobians[0].kind();
    let mut jac = Jacobian::zeros(kind, n, layout.ncols);
    for (i, (c, j)) in coeffs.iter().zip(jacobians).enumerate() {
        jac.add_block(j, layout.offsets[offset + i], c * scale);
    }

    if order == 1 {
        let jtau = last
            .jacobian_tau(kind)
            .expand(layout.last_offset(), layout.ncols);
        jac.add_outer(&y, &jtau, -1. / tau);
    }
    Ok((y, Some(jac)))
}
