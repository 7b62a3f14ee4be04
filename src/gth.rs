//! Goedecker-Teter-Hutter pseudopotentials.
//!
//! The separable GTH form has an analytic local part in reciprocal space and
//! Gaussian-type non-local projectors. A small built-in parameter table
//! (LDA/PADE set) covers the light elements; the local part of unknown
//! species falls back to an error, never to an all-electron potential.

use crate::atoms::Atoms;
use crate::error::{PwDftError, Result};
use crate::CoeffBlock;
use nalgebra::{DMatrix, DVector, Vector3};
use num_complex::Complex64;
use std::f64::consts::PI;

/// Parameters of one GTH pseudopotential.
#[derive(Clone, Debug)]
pub struct GthPsp {
    /// Valence charge.
    pub zion: f64,
    /// Local-part range.
    pub rloc: f64,
    /// Local-part polynomial coefficients C1..C4.
    pub cloc: [f64; 4],
    /// Non-local channels, one per angular momentum.
    pub channels: Vec<GthChannel>,
}

/// One non-local angular-momentum channel.
#[derive(Clone, Debug)]
pub struct GthChannel {
    pub l: usize,
    /// Projector range.
    pub rp: f64,
    /// Coupling matrix h_ij, size nproj x nproj.
    pub h: DMatrix<f64>,
}

impl GthPsp {
    /// Look up the built-in LDA (PADE) parameter set for a species.
    pub fn builtin(symbol: &str) -> Result<GthPsp> {
        let local = |zion: f64, rloc: f64, c1: f64, c2: f64| GthPsp {
            zion,
            rloc,
            cloc: [c1, c2, 0.0, 0.0],
            channels: Vec::new(),
        };
        let s_channel = |rp: f64, h11: f64| GthChannel {
            l: 0,
            rp,
            h: DMatrix::from_element(1, 1, h11),
        };
        let psp = match symbol {
            "H" => local(1.0, 0.2, -4.18023680, 0.72507482),
            "He" => local(2.0, 0.2, -9.11202340, 1.69836797),
            "Li" => {
                let mut psp = local(1.0, 0.78755305, -1.89261131, 0.28646965);
                psp.channels.push(s_channel(0.66637518, 1.85881111));
                psp.channels.push(GthChannel {
                    l: 1,
                    rp: 1.07930064,
                    h: DMatrix::from_element(1, 1, -0.00589504),
                });
                psp
            }
            "C" => {
                let mut psp = local(4.0, 0.34883045, -8.51377110, 1.22843203);
                psp.channels.push(s_channel(0.30455321, 9.52284179));
                psp
            }
            "N" => {
                let mut psp = local(5.0, 0.28917923, -12.23481988, 1.76640728);
                psp.channels.push(s_channel(0.25660487, 13.55224272));
                psp
            }
            "O" => {
                let mut psp = local(6.0, 0.24762086, -16.58031797, 2.39570092);
                psp.channels.push(s_channel(0.22178614, 18.26691718));
                psp
            }
            other => return Err(PwDftError::UnknownSpecies(other.to_string())),
        };
        Ok(psp)
    }

    /// Analytic Fourier transform of the local part at `|G|^2 = g2`.
    pub fn vps_loc(&self, g2: f64) -> f64 {
        let [c1, c2, c3, c4] = self.cloc;
        let rloc2 = self.rloc * self.rloc;
        if g2 < 1e-14 {
            // The divergent Coulomb tail is dropped at G = 0; its charge is
            // balanced inside the Ewald electroneutrality term.
            return 2.0 * PI * self.zion * rloc2
                + (2.0 * PI).powf(1.5)
                    * rloc2
                    * self.rloc
                    * (c1 + 3.0 * c2 + 15.0 * c3 + 105.0 * c4);
        }
        let x = g2 * rloc2;
        let gauss = (-x / 2.0).exp();
        -4.0 * PI * self.zion / g2 * gauss
            + (8.0 * PI * PI * PI).sqrt()
                * rloc2
                * self.rloc
                * gauss
                * (c1 + c2 * (3.0 - x) + c3 * (15.0 - 10.0 * x + x * x)
                    + c4 * (105.0 - 105.0 * x + 21.0 * x * x - x * x * x))
    }
}

// Radial projector in reciprocal space; `i` counts from 1 inside a channel.
fn eval_proj_g(l: usize, i: usize, rp: f64, gm2: f64, omega: f64) -> f64 {
    let gm = gm2.sqrt();
    let x = gm2 * rp * rp;
    let gauss = (-x / 2.0).exp();
    let pre = PI.powf(1.25) / omega.sqrt();
    let rp3 = rp * rp * rp;
    match (l, i) {
        (0, 1) => 4.0 * (2.0 * rp3).sqrt() * pre * gauss,
        (0, 2) => 8.0 * (2.0 * rp3 / 15.0).sqrt() * pre * (3.0 - x) * gauss,
        (0, 3) => {
            16.0 * (2.0 * rp3 / 105.0).sqrt() * pre / 3.0
                * (15.0 - 10.0 * x + x * x)
                * gauss
        }
        (1, 1) => 8.0 * (rp3 * rp * rp / 3.0).sqrt() * pre * gm * gauss,
        (1, 2) => 16.0 * (rp3 * rp * rp / 105.0).sqrt() * pre * gm * (5.0 - x) * gauss,
        (1, 3) => {
            32.0 * (rp3 * rp * rp / 1155.0).sqrt() * pre / 3.0
                * gm
                * (35.0 - 14.0 * x + x * x)
                * gauss
        }
        (2, 1) => 8.0 * (2.0 * rp3 * rp3 * rp / 15.0).sqrt() * pre * gm2 * gauss,
        _ => unreachable!("unsupported projector channel l={l} i={i}"),
    }
}

// Real spherical harmonics up to l = 2 for a reciprocal vector.
fn ylm_real(l: usize, m: i32, g: &Vector3<f64>) -> f64 {
    let r = g.norm();
    if l == 0 {
        return 0.5 / PI.sqrt();
    }
    if r < 1e-14 {
        return 0.0;
    }
    let (x, y, z) = (g[0] / r, g[1] / r, g[2] / r);
    match (l, m) {
        (1, -1) => (3.0 / (4.0 * PI)).sqrt() * y,
        (1, 0) => (3.0 / (4.0 * PI)).sqrt() * z,
        (1, 1) => (3.0 / (4.0 * PI)).sqrt() * x,
        (2, -2) => 0.5 * (15.0 / PI).sqrt() * x * y,
        (2, -1) => 0.5 * (15.0 / PI).sqrt() * y * z,
        (2, 0) => 0.25 * (5.0 / PI).sqrt() * (2.0 * z * z - x * x - y * y),
        (2, 1) => 0.5 * (15.0 / PI).sqrt() * z * x,
        (2, 2) => 0.25 * (15.0 / PI).sqrt() * (x * x - y * y),
        _ => unreachable!("unsupported spherical harmonic l={l} m={m}"),
    }
}

/// One coupling block in the flattened projector matrix: the columns
/// `[offset, offset + h.nrows())` of `betanl` share one (atom, l, m) triple.
#[derive(Clone, Debug)]
pub struct Coupling {
    pub offset: usize,
    pub h: DMatrix<f64>,
}

/// The assembled potential of a calculation: the dual-space local part and
/// the non-local projectors per k-point.
#[derive(Clone)]
pub struct GthPotential {
    /// Local potential in dual form `(Omega / Ns) V(r)`, ready for
    /// `dot(vloc, n)` energies and pointwise application in real space.
    pub vloc_dual: DVector<f64>,
    /// Projector matrices, one `npw x nbeta` block per k-point.
    pub betanl: Vec<CoeffBlock>,
    /// Coupling blocks into the projector columns.
    pub couplings: Vec<Coupling>,
}

impl GthPotential {
    /// Build the potential for `atoms` from per-atom pseudopotentials
    /// (`psps[ia]` belongs to atom `ia`).
    pub fn new(atoms: &Atoms, psps: &[GthPsp]) -> GthPotential {
        let ns = atoms.ns();

        // Local part: Jdag(Vps(G) Sf(G)) summed over atoms.
        let mut vg = DVector::zeros(ns);
        for (ia, psp) in psps.iter().enumerate() {
            let x = &atoms.positions[ia];
            for ig in 0..ns {
                let sf = Complex64::from_polar(1.0, -atoms.g[ig].dot(x));
                vg[ig] += Complex64::new(psp.vps_loc(atoms.g2[ig]), 0.0) * sf;
            }
        }
        let vloc_dual = atoms.jdag_field(&vg).map(|c| c.re);

        // Non-local part: one projector column per (atom, l, m, i).
        let mut couplings = Vec::new();
        let mut nbeta = 0;
        for psp in psps {
            for ch in &psp.channels {
                let nproj = ch.h.nrows();
                for _m in -(ch.l as i32)..=(ch.l as i32) {
                    couplings.push(Coupling {
                        offset: nbeta,
                        h: ch.h.clone(),
                    });
                    nbeta += nproj;
                }
            }
        }

        let mut betanl = Vec::with_capacity(atoms.kpts.nk());
        for ik in 0..atoms.kpts.nk() {
            let npw = atoms.npw(ik);
            let mut beta = CoeffBlock::zeros(npw, nbeta);
            let mut col = 0;
            for (ia, psp) in psps.iter().enumerate() {
                let x = &atoms.positions[ia];
                for ch in &psp.channels {
                    let nproj = ch.h.nrows();
                    // (-i)^l prefactor of the plane-wave expansion
                    let il = Complex64::new(0.0, -1.0).powu(ch.l as u32);
                    for m in -(ch.l as i32)..=(ch.l as i32) {
                        for i in 1..=nproj {
                            for row in 0..npw {
                                let gk = &atoms.gk[ik][row];
                                let radial =
                                    eval_proj_g(ch.l, i, ch.rp, atoms.gk2[ik][row], atoms.omega);
                                let phase = Complex64::from_polar(1.0, -gk.dot(x));
                                beta[(row, col)] =
                                    il * ylm_real(ch.l, m, gk) * radial * phase;
                            }
                            col += 1;
                        }
                    }
                }
            }
            betanl.push(beta);
        }

        GthPotential {
            vloc_dual,
            betanl,
            couplings,
        }
    }

    /// Number of projector columns.
    pub fn nbeta(&self) -> usize {
        self.betanl.first().map_or(0, |b| b.ncols())
    }

    /// Apply the non-local potential to a coefficient block at k-point `ik`.
    pub fn apply_nonloc(&self, atoms: &Atoms, w: &CoeffBlock, ik: usize) -> CoeffBlock {
        let mut out = CoeffBlock::zeros(w.nrows(), w.ncols());
        if self.nbeta() == 0 {
            return out;
        }
        let beta = &self.betanl[ik];
        // (nbeta x nstate) projections of every state
        let proj = beta.adjoint() * w;
        for cpl in &self.couplings {
            let nproj = cpl.h.nrows();
            let block = beta.columns(cpl.offset, nproj);
            let p = proj.rows(cpl.offset, nproj);
            let h = cpl.h.map(|x| Complex64::new(x, 0.0));
            out += block * (h * p);
        }
        out * Complex64::new(atoms.omega, 0.0)
    }

    /// Non-local energy contribution of one occupied block.
    pub fn nonloc_energy(&self, atoms: &Atoms, w: &CoeffBlock, ik: usize, f: &[f64]) -> f64 {
        if self.nbeta() == 0 {
            return 0.0;
        }
        let proj = self.betanl[ik].adjoint() * w;
        let mut e = 0.0;
        for cpl in &self.couplings {
            let nproj = cpl.h.nrows();
            for ist in 0..w.ncols() {
                for i in 0..nproj {
                    for j in 0..nproj {
                        let pi = proj[(cpl.offset + i, ist)];
                        let pj = proj[(cpl.offset + j, ist)];
                        e += f[ist] * cpl.h[(i, j)] * (pi.conj() * pj).re;
                    }
                }
            }
        }
        e * atoms.omega
    }
}
