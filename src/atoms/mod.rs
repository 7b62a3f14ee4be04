//! Cell, sampling grid, and plane-wave basis construction.
//!
//! An [`Atoms`] object is built once per calculation and is immutable
//! afterwards: the reciprocal lattice, the cutoff-sphere index sets, and the
//! FFT plans are all derived at construction time. Changing the cell or the
//! cutoff means building a new object; there are no rebuild-on-assignment
//! setters.

mod kpoints;
mod occupations;

pub use kpoints::KPoints;
pub use occupations::Occupations;

use crate::error::{PwDftError, Result};
use crate::operators::Fft3;
use itertools::iproduct;
use nalgebra::{DVector, Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Options for building an [`Atoms`] object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AtomsOptions {
    /// Cubic cell side length in Bohr, used when `lattice` is not given.
    pub a: f64,
    /// Full lattice vectors (rows, Bohr); overrides `a` when set.
    pub lattice: Option<Matrix3<f64>>,
    /// Plane-wave kinetic-energy cutoff in Hartree.
    pub ecut: f64,
    /// Real-space sampling points per axis; derived from the cutoff when not
    /// given. A grid too coarse for the cutoff aliases silently (caller
    /// responsibility, caught by energy regression tests).
    pub s: Option<[usize; 3]>,
    /// Spin-polarized (two spin channels) instead of spin-paired.
    pub unrestricted: bool,
    /// Net charge of the system (electrons removed from the valence count).
    pub charge: f64,
    /// Force a number of states per spin channel (extra states stay empty).
    pub nstate: Option<usize>,
    /// k-point sampling; Γ-only when not given.
    pub kpts: Option<KPoints>,
}

impl Default for AtomsOptions {
    fn default() -> Self {
        AtomsOptions {
            a: 20.0,
            lattice: None,
            ecut: 30.0,
            s: None,
            unrestricted: false,
            charge: 0.0,
            nstate: None,
            kpts: None,
        }
    }
}

/// Geometry, sampling grid, and plane-wave basis of one calculation.
#[derive(Clone)]
pub struct Atoms {
    /// Atom symbols.
    pub species: Vec<String>,
    /// Cartesian positions in Bohr.
    pub positions: Vec<Vector3<f64>>,
    /// Valence charge per atom; set by the SCF object from the
    /// pseudopotential table.
    pub z: Vec<f64>,
    /// Real-space lattice vectors as rows.
    pub r: Matrix3<f64>,
    /// Cell volume.
    pub omega: f64,
    /// Kinetic-energy cutoff in Hartree.
    pub ecut: f64,
    /// Real-space sampling points per axis.
    pub s: [usize; 3],
    /// Net charge of the system.
    pub charge: f64,
    /// k-point sampling.
    pub kpts: KPoints,
    /// Occupation structure (filled by the SCF object once the electron
    /// count is known).
    pub occ: Occupations,
    /// Requested number of states per spin channel, if forced.
    pub(crate) nstate_request: Option<usize>,

    // Derived basis quantities, immutable once built.
    pub(crate) b: Matrix3<f64>,
    pub(crate) g: Vec<Vector3<f64>>,
    pub(crate) g2: DVector<f64>,
    pub(crate) active: Vec<Vec<usize>>,
    pub(crate) gk: Vec<Vec<Vector3<f64>>>,
    pub(crate) gk2: Vec<DVector<f64>>,
    pub(crate) fft: Fft3,
}

impl Atoms {
    /// Build the full basis for the given geometry.
    ///
    /// Every derived quantity (reciprocal lattice, cutoff-sphere selection
    /// per k-point, FFT plans) is computed here; the result is safe to share
    /// read-only across parallel workers.
    pub fn new(
        species: Vec<String>,
        positions: Vec<Vector3<f64>>,
        opts: AtomsOptions,
    ) -> Result<Atoms> {
        if species.len() != positions.len() {
            return Err(PwDftError::Config(format!(
                "{} species for {} positions",
                species.len(),
                positions.len()
            )));
        }
        if species.is_empty() {
            return Err(PwDftError::Config("no atoms given".into()));
        }
        if opts.ecut <= 0.0 {
            return Err(PwDftError::Config(format!(
                "non-positive cutoff energy {}",
                opts.ecut
            )));
        }

        let r = opts.lattice.unwrap_or(Matrix3::identity() * opts.a);
        let omega = r.determinant().abs();
        if omega < 1e-12 {
            return Err(PwDftError::Config("cell volume is zero".into()));
        }

        let s = match opts.s {
            Some(s) => s,
            None => default_sampling(&r, opts.ecut),
        };
        if s.iter().any(|&si| si < 2) {
            return Err(PwDftError::Config(format!("sampling grid {s:?} too small")));
        }

        let kpts = opts.kpts.unwrap_or_else(KPoints::gamma);
        let occ = Occupations::new(if opts.unrestricted { 2 } else { 1 });

        // b = 2 pi (R^-1)^T, rows are the reciprocal lattice vectors
        let b = 2.0 * std::f64::consts::PI
            * r.try_inverse()
                .ok_or_else(|| PwDftError::Config("singular lattice vectors".into()))?
                .transpose();

        let ns = s[0] * s[1] * s[2];
        let mut g = Vec::with_capacity(ns);
        let mut g2 = DVector::zeros(ns);
        for (i0, i1, i2) in iproduct!(0..s[0], 0..s[1], 0..s[2]) {
            let m = Vector3::new(
                fft_freq(i0, s[0]),
                fft_freq(i1, s[1]),
                fft_freq(i2, s[2]),
            );
            let gv = b.transpose() * m;
            let ig = (i0 * s[1] + i1) * s[2] + i2;
            g2[ig] = gv.norm_squared();
            g.push(gv);
        }

        // Cutoff-sphere selection per k-point: |G+k|^2 / 2 <= ecut. The
        // ordering follows the grid index and is identical across calls.
        let mut active = Vec::with_capacity(kpts.nk());
        let mut gk = Vec::with_capacity(kpts.nk());
        let mut gk2 = Vec::with_capacity(kpts.nk());
        for k in &kpts.k {
            let mut idx = Vec::new();
            let mut gkv = Vec::new();
            let mut gk2v = Vec::new();
            for (ig, gv) in g.iter().enumerate() {
                let gkvec = gv + k;
                let norm2 = gkvec.norm_squared();
                if norm2 / 2.0 <= opts.ecut {
                    idx.push(ig);
                    gkv.push(gkvec);
                    gk2v.push(norm2);
                }
            }
            if idx.is_empty() {
                return Err(PwDftError::Config(
                    "cutoff sphere contains no plane waves".into(),
                ));
            }
            active.push(idx);
            gk.push(gkv);
            gk2.push(DVector::from_vec(gk2v));
        }

        let fft = Fft3::new(s);
        let z = vec![0.0; species.len()];

        // Occupations stay unfilled until valence charges are known; callers
        // that do not go through an SCF object fill them explicitly.
        Ok(Atoms {
            species,
            positions,
            z,
            r,
            omega,
            ecut: opts.ecut,
            s,
            charge: opts.charge,
            kpts,
            occ,
            nstate_request: opts.nstate,
            b,
            g,
            g2,
            active,
            gk,
            gk2,
            fft,
        })
    }

    /// Number of real-space sampling points.
    pub fn ns(&self) -> usize {
        self.s[0] * self.s[1] * self.s[2]
    }

    /// Number of active plane waves at k-point `ik`.
    pub fn npw(&self, ik: usize) -> usize {
        self.active[ik].len()
    }

    /// Cartesian coordinates of every real-space grid point, in grid order.
    pub fn r_points(&self) -> Vec<Vector3<f64>> {
        let mut out = Vec::with_capacity(self.ns());
        for (i0, i1, i2) in iproduct!(0..self.s[0], 0..self.s[1], 0..self.s[2]) {
            let frac = Vector3::new(
                i0 as f64 / self.s[0] as f64,
                i1 as f64 / self.s[1] as f64,
                i2 as f64 / self.s[2] as f64,
            );
            out.push(self.r.transpose() * frac);
        }
        out
    }
}

// Integer FFT frequency for index `i` on an axis of `n` points.
fn fft_freq(i: usize, n: usize) -> f64 {
    if i < n.div_ceil(2) {
        i as f64
    } else {
        i as f64 - n as f64
    }
}

// Default sampling: twice the Nyquist requirement of the cutoff sphere, so
// products of wave functions (densities) are representable without aliasing.
fn default_sampling(r: &Matrix3<f64>, ecut: f64) -> [usize; 3] {
    let gmax = (2.0 * ecut).sqrt();
    let mut s = [0usize; 3];
    for (i, si) in s.iter_mut().enumerate() {
        let len = r.row(i).norm();
        *si = 2 * (gmax * len / std::f64::consts::PI).ceil() as usize;
    }
    s
}
