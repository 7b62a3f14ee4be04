//! Total-energy contributions.
//!
//! Every getter recomputes one physical contribution from the current
//! coefficients and density; the [`Energy`] record is the single place the
//! SCF loop stores them.

use crate::atoms::Atoms;
use crate::dft::{get_n_single, solve_poisson, Precomputed};
use crate::error::Result;
use crate::gga::get_sigma;
use crate::gth::GthPotential;
use crate::xc::{get_xc, xc_type_of, Functional, XcType};
use crate::Wavefunction;
use itertools::iproduct;
use nalgebra::{DVector, Vector3};
use num_complex::Complex64;
use serde::Serialize;
use std::fmt;

/// All energy contributions of a calculation, in Hartree.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct Energy {
    pub ekin: f64,
    pub ecoul: f64,
    pub exc: f64,
    pub eloc: f64,
    pub enonloc: f64,
    pub eewald: f64,
    pub esic: f64,
    pub edisp: f64,
}

impl Energy {
    /// Total energy, the sum of all contributions.
    pub fn etot(&self) -> f64 {
        self.ekin
            + self.ecoul
            + self.exc
            + self.eloc
            + self.enonloc
            + self.eewald
            + self.esic
            + self.edisp
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Energy contributions in Eh")?;
        writeln!(f, "  Ekin    = {:+.9}", self.ekin)?;
        writeln!(f, "  Ecoul   = {:+.9}", self.ecoul)?;
        writeln!(f, "  Exc     = {:+.9}", self.exc)?;
        writeln!(f, "  Eloc    = {:+.9}", self.eloc)?;
        writeln!(f, "  Enonloc = {:+.9}", self.enonloc)?;
        writeln!(f, "  Eewald  = {:+.9}", self.eewald)?;
        if self.esic != 0.0 {
            writeln!(f, "  Esic    = {:+.9}", self.esic)?;
        }
        if self.edisp != 0.0 {
            writeln!(f, "  Edisp   = {:+.9}", self.edisp)?;
        }
        write!(f, "  Etot    = {:+.9}", self.etot())
    }
}

/// Kinetic energy `-1/2 sum_ik wk sum f Re(yᴴ L(y))`.
pub fn get_ekin(atoms: &Atoms, y: &Wavefunction) -> f64 {
    let mut ekin = 0.0;
    for (ik, y_k) in y.iter().enumerate() {
        let wk = atoms.kpts.wk[ik];
        for (spin, blk) in y_k.iter().enumerate() {
            let ly = atoms.l(blk, ik);
            for ist in 0..blk.ncols() {
                let f = atoms.occ.f[ik][spin][ist];
                if f == 0.0 {
                    continue;
                }
                let dot: Complex64 = blk
                    .column(ist)
                    .iter()
                    .zip(ly.column(ist).iter())
                    .map(|(a, b)| a.conj() * b)
                    .sum();
                ekin += -0.5 * wk * f * dot.re;
            }
        }
    }
    ekin
}

/// Hartree energy from the density and its Poisson solution.
pub fn get_ecoul(atoms: &Atoms, n: &DVector<f64>, phi: &DVector<Complex64>) -> f64 {
    let vcoul = atoms.i_field(phi);
    let dual = atoms.omega / atoms.ns() as f64;
    0.5 * dual
        * n.iter()
            .zip(vcoul.iter())
            .map(|(ni, vi)| ni * vi.re)
            .sum::<f64>()
}

/// Exchange-correlation energy from the per-particle energy density.
pub fn get_exc(atoms: &Atoms, n: &DVector<f64>, exc: &DVector<f64>) -> f64 {
    atoms.omega / atoms.ns() as f64 * n.dot(exc)
}

/// Local pseudopotential energy.
pub fn get_eloc(vloc_dual: &DVector<f64>, n: &DVector<f64>) -> f64 {
    vloc_dual.dot(n)
}

/// Non-local pseudopotential energy.
pub fn get_enonloc(atoms: &Atoms, pot: &GthPotential, y: &Wavefunction) -> f64 {
    let mut e = 0.0;
    for (ik, y_k) in y.iter().enumerate() {
        let wk = atoms.kpts.wk[ik];
        for (spin, blk) in y_k.iter().enumerate() {
            let f: Vec<f64> = atoms.occ.f[ik][spin].iter().copied().collect();
            e += wk * pot.nonloc_energy(atoms, blk, ik, &f);
        }
    }
    e
}

/// Band-energy sum `sum_ik wk Tr(yᴴ H y)` with uniform state weights; the
/// cost function of the fixed-Hamiltonian band minimization.
pub fn get_eband(
    atoms: &Atoms,
    pot: &GthPotential,
    pre: &Precomputed,
    y: &Wavefunction,
) -> f64 {
    let mut e = 0.0;
    for (ik, y_k) in y.iter().enumerate() {
        let wk = atoms.kpts.wk[ik];
        for (spin, blk) in y_k.iter().enumerate() {
            let hy = crate::dft::h(atoms, pot, pre, ik, spin, blk);
            for ist in 0..blk.ncols() {
                let dot: Complex64 = blk
                    .column(ist)
                    .iter()
                    .zip(hy.column(ist).iter())
                    .map(|(a, b)| a.conj() * b)
                    .sum();
                e += wk * dot.re;
            }
        }
    }
    e
}

/// All density- and coefficient-dependent contributions (everything except
/// the Ewald, SIC, and dispersion terms).
pub fn get_e_electronic(
    atoms: &Atoms,
    pot: &GthPotential,
    y: &Wavefunction,
    pre: &Precomputed,
) -> f64 {
    let ekin = get_ekin(atoms, y);
    let ecoul = get_ecoul(atoms, &pre.n, &pre.phi);
    let exc = get_exc(atoms, &pre.n, &pre.exc);
    let eloc = get_eloc(&pot.vloc_dual, &pre.n);
    let enonloc = get_enonloc(atoms, pot, y);
    ekin + ecoul + exc + eloc + enonloc
}

/// Perdew-Zunger self-interaction energy: the Hartree and
/// exchange-correlation self-energies of every occupied orbital density,
/// normalized to one electron and weighted by the occupation.
pub fn get_esic(
    atoms: &Atoms,
    functionals: &[Functional],
    y: &Wavefunction,
) -> Result<f64> {
    let ns = atoms.ns();
    let mut esic = 0.0;
    for (ik, y_k) in y.iter().enumerate() {
        for (spin, blk) in y_k.iter().enumerate() {
            for ist in 0..blk.ncols() {
                let f = atoms.occ.f[ik][spin][ist];
                if f <= 0.0 {
                    continue;
                }
                // Normalize the single-particle density to one electron.
                let ni = get_n_single(atoms, y, ik, spin, ist) / f;
                let phi_i = solve_poisson(atoms, &ni);
                let coul = get_ecoul(atoms, &ni, &phi_i);

                // One orbital is a fully polarized two-spin system.
                let n_pair = [ni.clone(), DVector::zeros(ns)];
                let sigma = if xc_type_of(functionals) == XcType::Lda {
                    None
                } else {
                    Some(get_sigma(atoms, &n_pair).1)
                };
                let xc = get_xc(functionals, &n_pair, sigma.as_deref())?;
                let exc = get_exc(atoms, &ni, &xc.exc);
                esic += f * (coul + exc);
            }
        }
    }
    Ok(esic)
}

// Symmetric ranges of lattice translations large enough for the requested
// convergence, per axis.
fn index_range(tmax: f64, len: f64) -> i64 {
    (tmax / len + 1.5).round() as i64
}

/// Ewald energy of the nuclei (valence point charges) in a neutralizing
/// background.
///
/// `gcut` and `gamma` control the real/reciprocal split and the truncation
/// error of both sums.
pub fn get_eewald(atoms: &Atoms, gcut: f64, gamma: f64) -> f64 {
    let gexp = -gamma.ln();
    let nu = 0.5 * (gcut * gcut / gexp).sqrt();
    let sqrt_pi = std::f64::consts::PI.sqrt();

    // Self energy and the electroneutrality compensation of the G = 0 terms
    // dropped in the potentials.
    let z2: f64 = atoms.z.iter().map(|z| z * z).sum();
    let ztot: f64 = atoms.z.iter().sum();
    let mut e = -nu / sqrt_pi * z2;
    e += -std::f64::consts::PI * ztot * ztot / (2.0 * atoms.omega * nu * nu);

    // Real-space sum over atom pairs and lattice translations.
    let tmax = (0.5 * gexp).sqrt() / nu;
    let sr: Vec<i64> = (0..3).map(|i| index_range(tmax, atoms.r.row(i).norm())).collect();
    for (m0, m1, m2) in iproduct!(-sr[0]..=sr[0], -sr[1]..=sr[1], -sr[2]..=sr[2]) {
        let t = atoms.r.transpose() * Vector3::new(m0 as f64, m1 as f64, m2 as f64);
        for (ia, xa) in atoms.positions.iter().enumerate() {
            for (ja, xb) in atoms.positions.iter().enumerate() {
                let d = xa - xb + t;
                let r = d.norm();
                if r < 1e-10 {
                    continue;
                }
                e += 0.5 * atoms.z[ia] * atoms.z[ja] * libm::erfc(r * nu) / r;
            }
        }
    }

    // Reciprocal-space sum over the structure factor.
    let b = atoms.b;
    let glimit = 2.0 * nu * gexp.sqrt();
    let sg: Vec<i64> = (0..3).map(|i| index_range(glimit, b.row(i).norm())).collect();
    let prefactor = 2.0 * std::f64::consts::PI / atoms.omega;
    for (m0, m1, m2) in iproduct!(-sg[0]..=sg[0], -sg[1]..=sg[1], -sg[2]..=sg[2]) {
        if m0 == 0 && m1 == 0 && m2 == 0 {
            continue;
        }
        let g = b.transpose() * Vector3::new(m0 as f64, m1 as f64, m2 as f64);
        let g2 = g.norm_squared();
        let sf: Complex64 = atoms
            .positions
            .iter()
            .zip(atoms.z.iter())
            .map(|(x, &z)| Complex64::from_polar(z, g.dot(x)))
            .sum();
        e += prefactor * (-g2 / (4.0 * nu * nu)).exp() / g2 * sf.norm_sqr();
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::AtomsOptions;
    use crate::dft::guess_random;
    use approx::assert_abs_diff_eq;

    fn charged_cell(positions: Vec<Vector3<f64>>, z: Vec<f64>, a: f64) -> Atoms {
        let mut atoms = Atoms::new(
            vec!["H".into(); positions.len()],
            positions,
            AtomsOptions {
                a,
                ecut: 2.0,
                s: Some([4, 4, 4]),
                ..Default::default()
            },
        )
        .unwrap();
        atoms.z = z;
        atoms
    }

    #[test]
    fn ewald_reproduces_the_simple_cubic_madelung_constant() {
        // One unit charge in a neutralizing background: E = -alpha / (2 a)
        // with alpha = 2.8372974794806.
        let atoms = charged_cell(vec![Vector3::zeros()], vec![1.0], 3.0);
        let e = get_eewald(&atoms, 2.0, 1e-8);
        assert_abs_diff_eq!(e, -2.8372974794806 / (2.0 * 3.0), epsilon = 1e-7);
    }

    #[test]
    fn ewald_is_translation_invariant() {
        let shift = Vector3::new(0.7, -0.3, 1.9);
        let p1 = vec![Vector3::zeros(), Vector3::new(1.5, 0.0, 0.0)];
        let p2: Vec<_> = p1.iter().map(|x| x + shift).collect();
        let a1 = charged_cell(p1, vec![1.0, 1.0], 9.0);
        let a2 = charged_cell(p2, vec![1.0, 1.0], 9.0);
        assert_abs_diff_eq!(
            get_eewald(&a1, 2.0, 1e-8),
            get_eewald(&a2, 2.0, 1e-8),
            epsilon = 1e-8
        );
    }

    #[test]
    fn ewald_scales_quadratically_with_charge() {
        let atoms1 = charged_cell(vec![Vector3::zeros()], vec![1.0], 5.0);
        let atoms2 = charged_cell(vec![Vector3::zeros()], vec![2.0], 5.0);
        assert_abs_diff_eq!(
            4.0 * get_eewald(&atoms1, 2.0, 1e-8),
            get_eewald(&atoms2, 2.0, 1e-8),
            epsilon = 1e-8
        );
    }

    #[test]
    fn kinetic_energy_is_positive_for_random_states() {
        let mut atoms = charged_cell(vec![Vector3::zeros()], vec![2.0], 6.0);
        atoms.occ.fill(2.0, 1, None).unwrap();
        let y = guess_random(&atoms, 77, false).unwrap();
        assert!(get_ekin(&atoms, &y) > 0.0);
    }

    #[test]
    fn coulomb_energy_is_positive() {
        let mut atoms = charged_cell(vec![Vector3::zeros()], vec![2.0], 6.0);
        atoms.occ.fill(2.0, 1, None).unwrap();
        let y = guess_random(&atoms, 78, false).unwrap();
        let n = crate::dft::get_n_total(&atoms, &y);
        let phi = solve_poisson(&atoms, &n);
        assert!(get_ecoul(&atoms, &n, &phi) > 0.0);
    }

    #[test]
    fn sic_matches_the_per_orbital_self_energies() {
        let mut atoms = charged_cell(vec![Vector3::zeros()], vec![2.0], 6.0);
        atoms.occ.fill(2.0, 1, None).unwrap();
        let y = guess_random(&atoms, 79, false).unwrap();

        // One doubly occupied orbital: f * (Ecoul[ni] + Exc[ni, 0]) with the
        // orbital density normalized to one electron.
        let f = atoms.occ.f[0][0][0];
        let ni = get_n_single(&atoms, &y, 0, 0, 0) / f;
        let phi = solve_poisson(&atoms, &ni);
        let coul = get_ecoul(&atoms, &ni, &phi);
        let n_pair = [ni.clone(), DVector::zeros(atoms.ns())];
        let xc = get_xc(&[Functional::LdaX], &n_pair, None).unwrap();
        let exc = get_exc(&atoms, &ni, &xc.exc);

        let esic = get_esic(&atoms, &[Functional::LdaX], &y).unwrap();
        assert_abs_diff_eq!(esic, f * (coul + exc), epsilon = 1e-12);
    }

    #[test]
    fn sic_scales_linearly_with_the_occupation() {
        // The normalized orbital density is occupation independent, so the
        // correction is proportional to f.
        let mut single = charged_cell(vec![Vector3::zeros()], vec![1.0], 6.0);
        single.occ.fill(1.0, 1, None).unwrap();
        let mut double = charged_cell(vec![Vector3::zeros()], vec![2.0], 6.0);
        double.occ.fill(2.0, 1, None).unwrap();
        let e1 = get_esic(&single, &[Functional::LdaX], &guess_random(&single, 79, false).unwrap()).unwrap();
        let e2 = get_esic(&double, &[Functional::LdaX], &guess_random(&double, 79, false).unwrap()).unwrap();
        assert_abs_diff_eq!(e2, 2.0 * e1, epsilon = 1e-10);
    }

    #[test]
    fn energy_record_serializes_and_sums() {
        let e = Energy {
            ekin: 1.0,
            ecoul: 0.5,
            exc: -0.7,
            eloc: -2.0,
            enonloc: 0.1,
            eewald: -0.4,
            esic: 0.0,
            edisp: 0.0,
        };
        assert_abs_diff_eq!(e.etot(), -1.5, epsilon = 1e-14);
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"ekin\":1.0"));
        let shown = format!("{e}");
        assert!(shown.contains("Etot"));
    }
}
