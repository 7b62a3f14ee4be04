//! Plane-wave basis operators.
//!
//! Naming follows the common operator notation of plane-wave DFT codes:
//! `O` is the basis overlap, `L` the Laplacian, `I`/`J` the transforms
//! between reciprocal and real space with their adjoints `Idag`/`Jdag`, and
//! `T` a real-space translation. The normalization convention is fixed here
//! and relied on everywhere else:
//!
//!   I(c)_r    = sum_G c_G exp(iG·r)          (unnormalized inverse FFT)
//!   J(f)_G    = (1/Ns) sum_r f_r exp(-iG·r)
//!   Idag      = Ns · J        Jdag = I / Ns
//!   O(c)      = Omega · c     L(c) = -Omega |G+k|^2 · c
//!
//! so that `J(I(c)) = c` and `dot(I(c), f) = dot(c, Idag(f))` hold exactly.
//! Column coefficients that are orthonormal under `O` therefore satisfy
//! `sum_G |c_G|^2 = 1/Omega`.

use crate::atoms::Atoms;
use crate::CoeffBlock;
use nalgebra::{DVector, Vector3};
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Three-dimensional FFT over the sampling grid, built once per [`Atoms`].
///
/// The grid layout is row-major, `idx(i0, i1, i2) = (i0·s1 + i1)·s2 + i2`,
/// matching the index convention of the G-vector arrays. Plans are shared
/// behind `Arc` and safe to use from parallel workers.
#[derive(Clone)]
pub struct Fft3 {
    s: [usize; 3],
    forward: [Arc<dyn Fft<f64>>; 3],
    inverse: [Arc<dyn Fft<f64>>; 3],
}

impl Fft3 {
    pub fn new(s: [usize; 3]) -> Fft3 {
        let mut planner = FftPlanner::new();
        let forward = [
            planner.plan_fft_forward(s[0]),
            planner.plan_fft_forward(s[1]),
            planner.plan_fft_forward(s[2]),
        ];
        let inverse = [
            planner.plan_fft_inverse(s[0]),
            planner.plan_fft_inverse(s[1]),
            planner.plan_fft_inverse(s[2]),
        ];
        Fft3 { s, forward, inverse }
    }

    /// Unnormalized forward transform, in place.
    pub fn forward(&self, data: &mut [Complex64]) {
        self.transform(data, &self.forward);
    }

    /// Unnormalized inverse transform, in place.
    pub fn inverse(&self, data: &mut [Complex64]) {
        self.transform(data, &self.inverse);
    }

    fn transform(&self, data: &mut [Complex64], plans: &[Arc<dyn Fft<f64>>; 3]) {
        let [s0, s1, s2] = self.s;
        debug_assert_eq!(data.len(), s0 * s1 * s2);

        // Last axis is contiguous, one batched call covers all rows.
        let mut scratch = vec![Complex64::default(); plans[2].get_inplace_scratch_len()];
        plans[2].process_with_scratch(data, &mut scratch);

        // Middle axis, stride s2.
        let mut line = vec![Complex64::default(); s1];
        scratch.resize(plans[1].get_inplace_scratch_len(), Complex64::default());
        for i0 in 0..s0 {
            for i2 in 0..s2 {
                let base = i0 * s1 * s2 + i2;
                for i1 in 0..s1 {
                    line[i1] = data[base + i1 * s2];
                }
                plans[1].process_with_scratch(&mut line, &mut scratch);
                for i1 in 0..s1 {
                    data[base + i1 * s2] = line[i1];
                }
            }
        }

        // First axis, stride s1 * s2.
        let mut line = vec![Complex64::default(); s0];
        scratch.resize(plans[0].get_inplace_scratch_len(), Complex64::default());
        for i1 in 0..s1 {
            for i2 in 0..s2 {
                let base = i1 * s2 + i2;
                for i0 in 0..s0 {
                    line[i0] = data[base + i0 * s1 * s2];
                }
                plans[0].process_with_scratch(&mut line, &mut scratch);
                for i0 in 0..s0 {
                    data[base + i0 * s1 * s2] = line[i0];
                }
            }
        }
    }
}

impl Atoms {
    /// Overlap operator `O(c) = Omega · c`.
    pub fn o(&self, w: &CoeffBlock) -> CoeffBlock {
        w * Complex64::new(self.omega, 0.0)
    }

    /// Laplacian `L(c) = -Omega |G+k|^2 · c` on the active set of `ik`.
    pub fn l(&self, w: &CoeffBlock, ik: usize) -> CoeffBlock {
        let mut out = w.clone();
        for (ig, mut row) in out.row_iter_mut().enumerate() {
            row *= Complex64::new(-self.omega * self.gk2[ik][ig], 0.0);
        }
        out
    }

    /// Laplacian on a full-grid field (used for the Hartree potential).
    pub fn l_field(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        DVector::from_iterator(
            self.ns(),
            v.iter()
                .zip(self.g2.iter())
                .map(|(c, &g2)| c * Complex64::new(-self.omega * g2, 0.0)),
        )
    }

    /// Inverse Laplacian on a full-grid field; the undefined `G = 0`
    /// component is set to zero (compensating-background convention).
    pub fn linv_field(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        DVector::from_iterator(
            self.ns(),
            v.iter().zip(self.g2.iter()).map(|(c, &g2)| {
                if g2 < 1e-14 {
                    Complex64::default()
                } else {
                    c / Complex64::new(-self.omega * g2, 0.0)
                }
            }),
        )
    }

    /// `I`: active-set coefficients of `ik` to real space, one column per
    /// state.
    pub fn i(&self, w: &CoeffBlock, ik: usize) -> CoeffBlock {
        let ns = self.ns();
        let nstate = w.ncols();
        let mut out = CoeffBlock::zeros(ns, nstate);
        for ist in 0..nstate {
            let mut col = out.column_mut(ist);
            for (row, &ig) in self.active[ik].iter().enumerate() {
                col[ig] = w[(row, ist)];
            }
        }
        out.as_mut_slice()
            .par_chunks_exact_mut(ns)
            .for_each(|col| self.fft.inverse(col));
        out
    }

    /// `Idag = Ns · J`: real-space columns to active-set coefficients of
    /// `ik`, the adjoint of [`Atoms::i`].
    pub fn idag(&self, v: &CoeffBlock, ik: usize) -> CoeffBlock {
        let ns = self.ns();
        let nstate = v.ncols();
        let mut full = v.clone();
        full.as_mut_slice()
            .par_chunks_exact_mut(ns)
            .for_each(|col| self.fft.forward(col));
        let npw = self.npw(ik);
        let mut out = CoeffBlock::zeros(npw, nstate);
        for ist in 0..nstate {
            for (row, &ig) in self.active[ik].iter().enumerate() {
                out[(row, ist)] = full[(ig, ist)];
            }
        }
        out
    }

    /// `I` on a full-grid field (all G components, no active-set gather).
    pub fn i_field(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        let mut out = v.clone();
        self.fft.inverse(out.as_mut_slice());
        out
    }

    /// `J`: real-space field to full-grid reciprocal coefficients.
    pub fn j_field(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        let mut out = v.clone();
        self.fft.forward(out.as_mut_slice());
        out / Complex64::new(self.ns() as f64, 0.0)
    }

    /// `Jdag = I / Ns` on a full-grid field.
    pub fn jdag_field(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        let mut out = v.clone();
        self.fft.inverse(out.as_mut_slice());
        out / Complex64::new(self.ns() as f64, 0.0)
    }

    /// Translation `T(c)_G = exp(-i(G+k)·dr) · c_G` on the active set.
    pub fn t(&self, w: &CoeffBlock, ik: usize, dr: &Vector3<f64>) -> CoeffBlock {
        let mut out = w.clone();
        for (row, mut r) in out.row_iter_mut().enumerate() {
            let phase = Complex64::from_polar(1.0, -self.gk[ik][row].dot(dr));
            r *= phase;
        }
        out
    }
}
