//! k-point sampling of the Brillouin zone.

use crate::error::{PwDftError, Result};
use itertools::iproduct;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// A set of k-points with their integration weights.
///
/// The weights always sum to one; the Γ-only case is the 1-element set with
/// weight one. Every wave-function quantity in the crate is indexed by an
/// explicit k-point index, so a single k-point degenerates naturally.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KPoints {
    /// k-points in Cartesian reciprocal coordinates (1/Bohr).
    pub k: Vec<Vector3<f64>>,
    /// Integration weight per k-point, normalized to sum to one.
    pub wk: Vec<f64>,
}

impl KPoints {
    /// The Γ-point-only sampling.
    pub fn gamma() -> KPoints {
        KPoints {
            k: vec![Vector3::zeros()],
            wk: vec![1.0],
        }
    }

    /// Build an unshifted Monkhorst-Pack mesh for the cell with real-space
    /// lattice vectors `r` (rows).
    pub fn monkhorst_pack(nk: [usize; 3], r: &Matrix3<f64>) -> Result<KPoints> {
        // b = 2 pi (R^-1)^T, rows are the reciprocal lattice vectors
        let b = 2.0 * std::f64::consts::PI
            * r.try_inverse()
                .ok_or_else(|| PwDftError::Config("singular lattice vectors".into()))?
                .transpose();

        let mut k = Vec::with_capacity(nk[0] * nk[1] * nk[2]);
        for (i, j, l) in iproduct!(0..nk[0], 0..nk[1], 0..nk[2]) {
            let frac = Vector3::new(
                mp_node(i, nk[0]),
                mp_node(j, nk[1]),
                mp_node(l, nk[2]),
            );
            k.push(b.transpose() * frac);
        }
        let wk = vec![1.0 / k.len() as f64; k.len()];
        Ok(KPoints { k, wk })
    }

    pub fn nk(&self) -> usize {
        self.k.len()
    }
}

// Monkhorst-Pack node (2i - n + 1) / (2n) in fractional coordinates.
fn mp_node(i: usize, n: usize) -> f64 {
    (2.0 * i as f64 - n as f64 + 1.0) / (2.0 * n as f64)
}
