//! Density-gradient plumbing for GGA and meta-GGA functionals.
//!
//! The functionals in [`crate::xc`] only see scalar fields (densities,
//! contracted gradients, kinetic-energy densities); everything that needs
//! the plane-wave basis to build or consume those fields lives here.

use crate::atoms::Atoms;
use crate::{CoeffBlock, Wavefunction};
use nalgebra::DVector;
use num_complex::Complex64;

/// Real-space gradient of a real scalar field, one component per Cartesian
/// direction, via `Re(I(iG · J(f)))`.
pub fn get_grad_field(atoms: &Atoms, f: &DVector<f64>) -> [DVector<f64>; 3] {
    let fc = f.map(|x| Complex64::new(x, 0.0));
    let fg = atoms.j_field(&fc);
    std::array::from_fn(|dir| {
        let scaled = DVector::from_iterator(
            atoms.ns(),
            fg.iter()
                .zip(atoms.g.iter())
                .map(|(c, g)| c * Complex64::new(0.0, g[dir])),
        );
        atoms.i_field(&scaled).map(|c| c.re)
    })
}

/// Contracted density gradients for a set of spin densities.
///
/// Returns the per-spin gradient fields together with the sigma components
/// in the order the functionals expect: `[uu]` spin-paired and
/// `[uu, ud, dd]` spin-polarized.
#[allow(clippy::type_complexity)]
pub fn get_sigma(
    atoms: &Atoms,
    n_spin: &[DVector<f64>],
) -> (Vec<[DVector<f64>; 3]>, Vec<DVector<f64>>) {
    let dn_spin: Vec<[DVector<f64>; 3]> = n_spin
        .iter()
        .map(|n| get_grad_field(atoms, n))
        .collect();

    let contract = |a: &[DVector<f64>; 3], b: &[DVector<f64>; 3]| {
        let mut out = DVector::zeros(atoms.ns());
        for dir in 0..3 {
            out += a[dir].component_mul(&b[dir]);
        }
        out
    };

    let sigma = if n_spin.len() == 2 {
        vec![
            contract(&dn_spin[0], &dn_spin[0]),
            contract(&dn_spin[0], &dn_spin[1]),
            contract(&dn_spin[1], &dn_spin[1]),
        ]
    } else {
        vec![contract(&dn_spin[0], &dn_spin[0])]
    };
    (dn_spin, sigma)
}

/// Reciprocal-space correction to the exchange-correlation potential of one
/// spin channel, `sum_dir iG_dir · J(h_dir)`, where the `h` fields combine
/// the sigma derivatives with the density gradients.
pub fn gradient_correction(
    atoms: &Atoms,
    spin: usize,
    dn_spin: &[[DVector<f64>; 3]],
    vsigma: &[DVector<f64>],
) -> DVector<Complex64> {
    let ns = atoms.ns();
    let mut out = DVector::zeros(ns);
    for dir in 0..3 {
        let h: DVector<f64> = if dn_spin.len() == 2 {
            let other = 1 - spin;
            // 2 vsigma_ss dn_s + vsigma_ud dn_other
            2.0 * vsigma[2 * spin].component_mul(&dn_spin[spin][dir])
                + vsigma[1].component_mul(&dn_spin[other][dir])
        } else {
            2.0 * vsigma[0].component_mul(&dn_spin[0][dir])
        };
        let hg = atoms.j_field(&h.map(|x| Complex64::new(x, 0.0)));
        for ig in 0..ns {
            out[ig] += Complex64::new(0.0, atoms.g[ig][dir]) * hg[ig];
        }
    }
    out
}

/// Positive-definite kinetic-energy density per spin channel,
/// `tau = 1/2 sum f |grad psi|^2`.
pub fn get_tau(atoms: &Atoms, y: &Wavefunction) -> Vec<DVector<f64>> {
    let nspin = y[0].len();
    let ns = atoms.ns();
    let mut tau = vec![DVector::zeros(ns); nspin];
    for (ik, y_k) in y.iter().enumerate() {
        let wk = atoms.kpts.wk[ik];
        for (spin, y_ks) in y_k.iter().enumerate() {
            for dir in 0..3 {
                let mut scaled = y_ks.clone();
                for (row, mut r) in scaled.row_iter_mut().enumerate() {
                    r *= Complex64::new(0.0, atoms.gk[ik][row][dir]);
                }
                let dpsi = atoms.i(&scaled, ik);
                for ist in 0..y_ks.ncols() {
                    let f = atoms.occ.f[ik][spin][ist];
                    if f == 0.0 {
                        continue;
                    }
                    for ir in 0..ns {
                        tau[spin][ir] += 0.5 * wk * f * dpsi[(ir, ist)].norm_sqr();
                    }
                }
            }
        }
    }
    tau
}

/// Meta-GGA potential contribution `-1/2 grad · (vtau grad psi)` applied to
/// a coefficient block; `vtau_dual` carries the usual `Omega / Ns` weight of
/// effective potentials.
pub fn calc_vtau(
    atoms: &Atoms,
    w: &CoeffBlock,
    ik: usize,
    vtau_dual: &DVector<f64>,
) -> CoeffBlock {
    let mut out = CoeffBlock::zeros(w.nrows(), w.ncols());
    for dir in 0..3 {
        let mut scaled = w.clone();
        for (row, mut r) in scaled.row_iter_mut().enumerate() {
            r *= Complex64::new(0.0, atoms.gk[ik][row][dir]);
        }
        let mut real = atoms.i(&scaled, ik);
        for ist in 0..real.ncols() {
            let mut col = real.column_mut(ist);
            for ir in 0..vtau_dual.len() {
                col[ir] *= vtau_dual[ir];
            }
        }
        let back = atoms.idag(&real, ik);
        for row in 0..w.nrows() {
            let phase = Complex64::new(0.0, atoms.gk[ik][row][dir]);
            for ist in 0..w.ncols() {
                out[(row, ist)] += phase * back[(row, ist)];
            }
        }
    }
    out * Complex64::new(-0.5, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::AtomsOptions;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    fn small_atoms() -> Atoms {
        Atoms::new(
            vec!["H".into()],
            vec![Vector3::zeros()],
            AtomsOptions {
                a: 2.0 * std::f64::consts::PI,
                ecut: 3.0,
                s: Some([8, 8, 8]),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn gradient_of_a_plane_wave_is_analytic() {
        // f(r) = cos(x) on a 2 pi cell has df/dx = -sin(x).
        let atoms = small_atoms();
        let pts = atoms.r_points();
        let f = DVector::from_iterator(atoms.ns(), pts.iter().map(|r| r[0].cos()));
        let grad = get_grad_field(&atoms, &f);
        for (i, r) in pts.iter().enumerate() {
            assert_abs_diff_eq!(grad[0][i], -r[0].sin(), epsilon = 1e-10);
            assert_abs_diff_eq!(grad[1][i], 0.0, epsilon = 1e-10);
            assert_abs_diff_eq!(grad[2][i], 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn sigma_of_a_uniform_density_is_zero() {
        let atoms = small_atoms();
        let n = vec![DVector::from_element(atoms.ns(), 0.3)];
        let (_, sigma) = get_sigma(&atoms, &n);
        assert_abs_diff_eq!(sigma[0].norm(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn polarized_sigma_has_three_components() {
        let atoms = small_atoms();
        let pts = atoms.r_points();
        let nu = DVector::from_iterator(atoms.ns(), pts.iter().map(|r| 0.2 + 0.1 * r[0].cos()));
        let nd = DVector::from_iterator(atoms.ns(), pts.iter().map(|r| 0.2 + 0.05 * r[1].sin()));
        let (_, sigma) = get_sigma(&atoms, &[nu, nd]);
        assert_eq!(sigma.len(), 3);
        // The two gradients point along different axes everywhere, so the
        // cross component vanishes pointwise.
        assert_abs_diff_eq!(sigma[1].norm(), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn vtau_of_a_constant_multiplier_is_half_the_laplacian() {
        // With vtau = 1 (dual weight folded in), the operator reduces to
        // -1/2 nabla^2, i.e. +|G|^2/2 per row up to the Idag/I scaling.
        let atoms = small_atoms();
        let npw = atoms.npw(0);
        let w = CoeffBlock::from_fn(npw, 1, |r, _| {
            Complex64::new((r % 5) as f64 * 0.1 + 0.05, 0.0)
        });
        let vtau = DVector::from_element(atoms.ns(), 1.0);
        let out = calc_vtau(&atoms, &w, 0, &vtau);
        let ns = atoms.ns() as f64;
        for row in 0..npw {
            let expected = 0.5 * atoms.gk2[0][row] * ns * w[(row, 0)].re;
            assert_abs_diff_eq!(out[(row, 0)].re, expected, epsilon = 1e-8 * ns);
            assert_abs_diff_eq!(out[(row, 0)].im, 0.0, epsilon = 1e-8 * ns);
        }
    }
}
