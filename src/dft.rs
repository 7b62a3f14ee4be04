//! Core plane-wave DFT machinery: orthogonalization, densities, the
//! Kohn-Sham Hamiltonian, and the constrained energy gradient.
//!
//! Functions here take their collaborators explicitly instead of a
//! calculation object, so the minimizers can evaluate Hamiltonians and
//! gradients on trial coefficient blocks without touching shared state.

use crate::atoms::Atoms;
use crate::error::{PwDftError, Result};
use crate::gga::{get_sigma, gradient_correction};
use crate::gth::GthPotential;
use crate::xc::{get_xc, xc_type_of, Functional, XcType};
use crate::{CoeffBlock, Wavefunction};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

// Eigenvalues of the Gram matrix below this are treated as rank deficiency.
const GRAM_EPS: f64 = 1e-12;

/// `U^(-1/2)` of a hermitian positive-definite matrix via its
/// eigendecomposition.
fn inv_sqrt_hermitian(u: &DMatrix<Complex64>) -> Result<DMatrix<Complex64>> {
    let eig = u.clone().symmetric_eigen();
    let min = eig.eigenvalues.min();
    if min < GRAM_EPS {
        return Err(PwDftError::SingularGram(min));
    }
    let d = DMatrix::from_diagonal(&eig.eigenvalues.map(|x| Complex64::new(1.0 / x.sqrt(), 0.0)));
    Ok(&eig.eigenvectors * d * eig.eigenvectors.adjoint())
}

/// Orthonormalize one coefficient block: `Y = W (Wᴴ O(W))^(-1/2)`.
pub fn orth_block(atoms: &Atoms, w: &CoeffBlock) -> Result<CoeffBlock> {
    let u = w.adjoint() * atoms.o(w);
    Ok(w * inv_sqrt_hermitian(&u)?)
}

/// Orthonormalize every block of a wave function.
pub fn orth(atoms: &Atoms, w: &Wavefunction) -> Result<Wavefunction> {
    w.iter()
        .map(|w_k| w_k.iter().map(|blk| orth_block(atoms, blk)).collect())
        .collect()
}

/// Orthonormalize extra states against an already orthonormal occupied set:
/// the occupied subspace is projected out before the symmetric
/// orthogonalization.
pub fn orth_unocc(atoms: &Atoms, y_occ: &CoeffBlock, z: &CoeffBlock) -> Result<CoeffBlock> {
    let projected = z - y_occ * (y_occ.adjoint() * atoms.o(z));
    orth_block(atoms, &projected)
}

/// Real-space density per spin channel from orthonormal coefficients.
pub fn get_n_spin(atoms: &Atoms, y: &Wavefunction) -> Vec<DVector<f64>> {
    let nspin = y[0].len();
    let ns = atoms.ns();
    let mut n = vec![DVector::zeros(ns); nspin];
    for (ik, y_k) in y.iter().enumerate() {
        let wk = atoms.kpts.wk[ik];
        for (spin, y_ks) in y_k.iter().enumerate() {
            let psi = atoms.i(y_ks, ik);
            for ist in 0..y_ks.ncols() {
                let f = atoms.occ.f[ik][spin][ist];
                if f == 0.0 {
                    continue;
                }
                for ir in 0..ns {
                    n[spin][ir] += wk * f * psi[(ir, ist)].norm_sqr();
                }
            }
        }
    }
    n
}

/// Total density, summed over spin channels.
pub fn get_n_total(atoms: &Atoms, y: &Wavefunction) -> DVector<f64> {
    let n_spin = get_n_spin(atoms, y);
    let mut n = n_spin[0].clone();
    for n_s in n_spin.iter().skip(1) {
        n += n_s;
    }
    n
}

/// Density of a single state, with its own occupation, for the
/// self-interaction correction.
pub fn get_n_single(atoms: &Atoms, y: &Wavefunction, ik: usize, spin: usize, ist: usize) -> DVector<f64> {
    let psi = atoms.i(&CoeffBlock::from_columns(&[y[ik][spin].column(ist).clone_owned()]), ik);
    let f = atoms.occ.f[ik][spin][ist];
    let wk = atoms.kpts.wk[ik];
    DVector::from_iterator(
        atoms.ns(),
        (0..atoms.ns()).map(|ir| wk * f * psi[(ir, 0)].norm_sqr()),
    )
}

/// Hartree potential in reciprocal space: `phi = -4 pi Linv(O(J(n)))`.
pub fn solve_poisson(atoms: &Atoms, n: &DVector<f64>) -> DVector<Complex64> {
    let nc = n.map(|x| Complex64::new(x, 0.0));
    let ng = atoms.j_field(&nc);
    let og = DVector::from_iterator(
        atoms.ns(),
        ng.iter().map(|c| c * Complex64::new(atoms.omega, 0.0)),
    );
    atoms.linv_field(&og) * Complex64::new(-4.0 * std::f64::consts::PI, 0.0)
}

/// Density-dependent quantities shared by Hamiltonian applications: the
/// spin densities, the Hartree potential, the exchange-correlation energy
/// density, and the combined dual-space effective potential per spin.
pub struct Precomputed {
    pub n_spin: Vec<DVector<f64>>,
    pub n: DVector<f64>,
    pub phi: DVector<Complex64>,
    pub exc: DVector<f64>,
    pub veff_dual: Vec<DVector<f64>>,
    pub vtau_dual: Option<Vec<DVector<f64>>>,
}

/// Evaluate everything that depends on the density only, once per
/// wave-function update.
pub fn h_precompute(
    atoms: &Atoms,
    functionals: &[Functional],
    vloc_dual: &DVector<f64>,
    y: &Wavefunction,
) -> Result<Precomputed> {
    let n_spin = get_n_spin(atoms, y);
    let mut n = n_spin[0].clone();
    for n_s in n_spin.iter().skip(1) {
        n += n_s;
    }
    let phi = solve_poisson(atoms, &n);

    let needs_grad = xc_type_of(functionals) != XcType::Lda;
    let (dn_spin, sigma) = if needs_grad {
        let (dn, s) = get_sigma(atoms, &n_spin);
        (Some(dn), Some(s))
    } else {
        (None, None)
    };
    let xc = get_xc(functionals, &n_spin, sigma.as_deref())?;

    let ns = atoms.ns();
    let dual = atoms.omega / ns as f64;
    let vcoul = atoms.i_field(&phi).map(|c| c.re);

    let mut veff_dual = Vec::with_capacity(n_spin.len());
    for spin in 0..n_spin.len() {
        let mut vxc_g = atoms.j_field(&xc.vxc[spin].map(|x| Complex64::new(x, 0.0)));
        if let (Some(dn), Some(vsigma)) = (dn_spin.as_ref(), xc.vsigma.as_ref()) {
            vxc_g -= gradient_correction(atoms, spin, dn, vsigma);
        }
        let vxc_r = atoms.i_field(&vxc_g).map(|c| c.re);
        let veff = DVector::from_iterator(
            ns,
            (0..ns).map(|ir| vloc_dual[ir] + dual * (vcoul[ir] + vxc_r[ir])),
        );
        veff_dual.push(veff);
    }

    let vtau_dual = xc
        .vtau
        .as_ref()
        .map(|vt| vt.iter().map(|v| v.map(|x| dual * x)).collect());

    Ok(Precomputed {
        n_spin,
        n,
        phi,
        exc: xc.exc,
        veff_dual,
        vtau_dual,
    })
}

/// Apply the Kohn-Sham Hamiltonian to a coefficient block.
pub fn h(
    atoms: &Atoms,
    pot: &GthPotential,
    pre: &Precomputed,
    ik: usize,
    spin: usize,
    w: &CoeffBlock,
) -> CoeffBlock {
    // Kinetic part: -1/2 L(W)
    let mut out = atoms.l(w, ik) * Complex64::new(-0.5, 0.0);

    // Local effective potential, applied pointwise in real space.
    let mut psi = atoms.i(w, ik);
    let veff = &pre.veff_dual[spin];
    for ist in 0..psi.ncols() {
        let mut col = psi.column_mut(ist);
        for ir in 0..veff.len() {
            col[ir] *= veff[ir];
        }
    }
    out += atoms.idag(&psi, ik);

    out += pot.apply_nonloc(atoms, w, ik);

    if let Some(vtau) = &pre.vtau_dual {
        out += crate::gga::calc_vtau(atoms, w, ik, &vtau[spin]);
    }
    out
}

// Q operator of the constrained gradient: solves the Sylvester-type
// equation via the eigenbasis of U, dividing by sqrt(mu_i) + sqrt(mu_j).
fn q_operator(inp: &DMatrix<Complex64>, u: &DMatrix<Complex64>) -> Result<DMatrix<Complex64>> {
    let eig = u.clone().symmetric_eigen();
    let min = eig.eigenvalues.min();
    if min < GRAM_EPS {
        return Err(PwDftError::SingularGram(min));
    }
    let v = &eig.eigenvectors;
    let mut m = v.adjoint() * inp * v;
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            let denom = eig.eigenvalues[i].sqrt() + eig.eigenvalues[j].sqrt();
            m[(i, j)] /= Complex64::new(denom, 0.0);
        }
    }
    Ok(v * m * v.adjoint())
}

/// Whether a gradient evaluation weights states by their occupations or
/// treats all states equally (fixed-Hamiltonian band minimization).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GradWeight {
    Occupations,
    Uniform,
}

/// Gradient of the total energy with respect to one unconstrained
/// coefficient block, including the non-constant-occupation correction.
pub fn get_grad(
    atoms: &Atoms,
    pot: &GthPotential,
    pre: &Precomputed,
    ik: usize,
    spin: usize,
    w: &CoeffBlock,
    weight: GradWeight,
) -> Result<CoeffBlock> {
    let wk = atoms.kpts.wk[ik];
    let nstate = w.ncols();
    let f: DVector<f64> = match weight {
        GradWeight::Occupations => atoms.occ.f[ik][spin].clone(),
        GradWeight::Uniform => DVector::from_element(nstate, 1.0),
    };
    let f_mat = DMatrix::from_diagonal(&f.map(|x| Complex64::new(x, 0.0)));

    let hw = h(atoms, pot, pre, ik, spin, w);
    let ow = atoms.o(w);
    let u = w.adjoint() * &ow;
    let whw = w.adjoint() * &hw;
    let u12 = inv_sqrt_hermitian(&u)?;
    let inv_u = &u12 * &u12;

    // (HW - OW U^-1 WᴴHW) U^(-1/2) F U^(-1/2)
    let fp = &u12 * &f_mat * &u12;
    let mut grad = (&hw - &ow * (&inv_u * &whw)) * fp;

    // The occupation-commutator term vanishes for uniform occupations.
    let uniform = f.iter().all(|&fi| (fi - f[0]).abs() < 1e-14);
    if !uniform {
        let ht = &u12 * &whw * &u12;
        let comm = &ht * &f_mat - &f_mat * &ht;
        grad += &ow * (&u12 * q_operator(&comm, &u)?);
    }
    Ok(grad * Complex64::new(wk, 0.0))
}

/// Diagonalize the Hamiltonian in the subspace of one orthonormal block;
/// returns the rotated states and their eigenvalues, sorted ascending.
pub fn get_psi(
    atoms: &Atoms,
    pot: &GthPotential,
    pre: &Precomputed,
    ik: usize,
    spin: usize,
    y: &CoeffBlock,
) -> (CoeffBlock, DVector<f64>) {
    let hy = h(atoms, pot, pre, ik, spin, y);
    let mu = y.adjoint() * hy;
    let eig = mu.symmetric_eigen();

    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));

    let eps = DVector::from_iterator(order.len(), order.iter().map(|&i| eig.eigenvalues[i]));
    let cols: Vec<_> = order
        .iter()
        .map(|&i| eig.eigenvectors.column(i).clone_owned())
        .collect();
    let rotation = DMatrix::from_columns(&cols);
    (y * rotation, eps)
}

/// Kohn-Sham eigenvalues of every block, sorted ascending.
pub fn get_epsilon(
    atoms: &Atoms,
    pot: &GthPotential,
    pre: &Precomputed,
    y: &Wavefunction,
) -> Vec<Vec<DVector<f64>>> {
    y.iter()
        .enumerate()
        .map(|(ik, y_k)| {
            y_k.iter()
                .enumerate()
                .map(|(spin, blk)| get_psi(atoms, pot, pre, ik, spin, blk).1)
                .collect()
        })
        .collect()
}

/// Normally distributed random coefficients, orthonormalized per block.
///
/// With `symmetric` set, both spin channels start from identical
/// coefficients, which keeps an unpolarized solution exactly unpolarized.
pub fn guess_random(atoms: &Atoms, seed: u64, symmetric: bool) -> Result<Wavefunction> {
    let mut rng = StdRng::seed_from_u64(seed);
    let nspin = atoms.occ.nspin;
    let nstate = atoms.occ.nstate;
    let mut w = Vec::with_capacity(atoms.kpts.nk());
    for ik in 0..atoms.kpts.nk() {
        let npw = atoms.npw(ik);
        let mut blocks: Vec<CoeffBlock> = Vec::with_capacity(nspin);
        for spin in 0..nspin {
            if symmetric && spin > 0 {
                blocks.push(blocks[0].clone());
                continue;
            }
            let blk = CoeffBlock::from_fn(npw, nstate, |_, _| {
                let re: f64 = StandardNormal.sample(&mut rng);
                let im: f64 = StandardNormal.sample(&mut rng);
                Complex64::new(re, im)
            });
            blocks.push(blk);
        }
        w.push(blocks);
    }
    orth(atoms, &w)
}

/// Deterministic low-quality guess from a Lehmer generator; reproducible
/// across platforms and free of external entropy. `symmetric` replicates
/// the first spin channel like [`guess_random`] does.
pub fn guess_pseudo(atoms: &Atoms, seed: u64, symmetric: bool) -> Result<Wavefunction> {
    // Park-Miller constants
    const A: u64 = 48271;
    const M: u64 = 2147483647;
    let mut state = seed % M;
    if state == 0 {
        state = 1;
    }
    let mut next = move || {
        state = state * A % M;
        state as f64 / M as f64 - 0.5
    };

    let nspin = atoms.occ.nspin;
    let nstate = atoms.occ.nstate;
    let mut w = Vec::with_capacity(atoms.kpts.nk());
    for ik in 0..atoms.kpts.nk() {
        let npw = atoms.npw(ik);
        let mut blocks: Vec<CoeffBlock> = Vec::with_capacity(nspin);
        for spin in 0..nspin {
            if symmetric && spin > 0 {
                blocks.push(blocks[0].clone());
                continue;
            }
            blocks.push(CoeffBlock::from_fn(npw, nstate, |_, _| {
                Complex64::new(next(), next())
            }));
        }
        w.push(blocks);
    }
    orth(atoms, &w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::AtomsOptions;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    fn test_system() -> (Atoms, GthPotential) {
        let mut atoms = Atoms::new(
            vec!["He".into()],
            vec![Vector3::new(4.0, 4.0, 4.0)],
            AtomsOptions {
                a: 8.0,
                ecut: 5.0,
                s: Some([12, 12, 12]),
                ..Default::default()
            },
        )
        .unwrap();
        let psp = crate::gth::GthPsp::builtin("He").unwrap();
        atoms.z = vec![psp.zion];
        atoms.occ.fill(psp.zion, 1, None).unwrap();
        let pot = GthPotential::new(&atoms, &[psp]);
        (atoms, pot)
    }

    #[test]
    fn orthogonalization_yields_unit_overlap() {
        let (atoms, _) = test_system();
        let w = guess_random(&atoms, 1234, false).unwrap();
        let y = &w[0][0];
        let overlap = y.adjoint() * atoms.o(y);
        for i in 0..overlap.nrows() {
            for j in 0..overlap.ncols() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(overlap[(i, j)].re, expected, epsilon = 1e-9);
                assert_abs_diff_eq!(overlap[(i, j)].im, 0.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn orthogonalization_is_idempotent() {
        let (atoms, _) = test_system();
        let y = guess_random(&atoms, 7, false).unwrap();
        let y2 = orth(&atoms, &y).unwrap();
        assert_abs_diff_eq!((&y2[0][0] - &y[0][0]).norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn density_integrates_to_the_electron_count() {
        let (atoms, _) = test_system();
        let y = guess_random(&atoms, 42, false).unwrap();
        let n = get_n_total(&atoms, &y);
        let integral = atoms.omega / atoms.ns() as f64 * n.sum();
        assert_abs_diff_eq!(integral, atoms.occ.nelec, epsilon = 1e-9);
        assert!(n.min() > -1e-12);
    }

    #[test]
    fn poisson_solution_satisfies_the_laplace_equation() {
        let (atoms, _) = test_system();
        let y = guess_random(&atoms, 3, false).unwrap();
        let n = get_n_total(&atoms, &y);
        let phi = solve_poisson(&atoms, &n);
        // L(phi) must reproduce -4 pi O(J(n)) away from G = 0.
        let lhs = atoms.l_field(&phi);
        let rhs = atoms.j_field(&n.map(|x| Complex64::new(x, 0.0)))
            * Complex64::new(-4.0 * std::f64::consts::PI * atoms.omega, 0.0);
        for ig in 0..atoms.ns() {
            if atoms.g2[ig] < 1e-14 {
                continue;
            }
            assert_abs_diff_eq!((lhs[ig] - rhs[ig]).norm(), 0.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn hamiltonian_is_hermitian_in_the_subspace() {
        let (atoms, pot) = test_system();
        let y = guess_random(&atoms, 11, false).unwrap();
        let pre = h_precompute(&atoms, &[Functional::LdaX], &pot.vloc_dual, &y).unwrap();
        let hy = h(&atoms, &pot, &pre, 0, 0, &y[0][0]);
        let mu = y[0][0].adjoint() * hy;
        for i in 0..mu.nrows() {
            for j in 0..mu.ncols() {
                assert_abs_diff_eq!(
                    (mu[(i, j)] - mu[(j, i)].conj()).norm(),
                    0.0,
                    epsilon = 1e-8
                );
            }
        }
    }

    #[test]
    fn gradient_has_the_block_shape() {
        let (atoms, pot) = test_system();
        let y = guess_random(&atoms, 5, false).unwrap();
        let pre = h_precompute(&atoms, &[Functional::LdaX], &pot.vloc_dual, &y).unwrap();
        let g = get_grad(&atoms, &pot, &pre, 0, 0, &y[0][0], GradWeight::Occupations).unwrap();
        assert_eq!(g.nrows(), atoms.npw(0));
        assert_eq!(g.ncols(), atoms.occ.nstate);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let (atoms, pot) = test_system();
        let w = guess_random(&atoms, 19, false).unwrap();

        let energy = |blk: &CoeffBlock| -> f64 {
            let y = orth_block(&atoms, blk).unwrap();
            let wf = vec![vec![y]];
            let pre = h_precompute(&atoms, &[Functional::LdaX], &pot.vloc_dual, &wf).unwrap();
            crate::energies::get_e_electronic(&atoms, &pot, &wf, &pre)
        };

        let pre = {
            let y = orth(&atoms, &w).unwrap();
            h_precompute(&atoms, &[Functional::LdaX], &pot.vloc_dual, &y).unwrap()
        };
        let g = get_grad(&atoms, &pot, &pre, 0, 0, &w[0][0], GradWeight::Occupations).unwrap();

        // Perturb a single complex coefficient and compare the directional
        // derivative; dE = 2 Re(conj(g) dW) for holomorphic pairs.
        let h_step = 1e-5;
        let (row, col) = (3, 0);
        let mut wp = w[0][0].clone();
        wp[(row, col)] += Complex64::new(h_step, 0.0);
        let mut wm = w[0][0].clone();
        wm[(row, col)] -= Complex64::new(h_step, 0.0);
        let fd = (energy(&wp) - energy(&wm)) / (2.0 * h_step);
        assert_abs_diff_eq!(fd, 2.0 * g[(row, col)].re, epsilon = 1e-4);
    }

    #[test]
    fn empty_states_are_orthogonal_to_occupied_ones() {
        let (atoms, _) = test_system();
        let y = guess_random(&atoms, 23, false).unwrap();
        let z_raw = guess_random(&atoms, 29, false).unwrap();
        let z = orth_unocc(&atoms, &y[0][0], &z_raw[0][0]).unwrap();
        let cross = y[0][0].adjoint() * atoms.o(&z);
        assert_abs_diff_eq!(cross.norm(), 0.0, epsilon = 1e-8);
        let overlap = z.adjoint() * atoms.o(&z);
        for i in 0..overlap.nrows() {
            assert_abs_diff_eq!(overlap[(i, i)].re, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn subspace_diagonalization_sorts_eigenvalues() {
        let (atoms, pot) = test_system();
        let mut atoms = atoms;
        atoms.occ.fill(2.0, 1, Some(3)).unwrap();
        let y = guess_random(&atoms, 31, false).unwrap();
        let pre = h_precompute(&atoms, &[Functional::LdaX], &pot.vloc_dual, &y).unwrap();
        let (psi, eps) = get_psi(&atoms, &pot, &pre, 0, 0, &y[0][0]);
        assert!(eps[0] <= eps[1] && eps[1] <= eps[2]);
        // The rotation preserves orthonormality.
        let overlap = psi.adjoint() * atoms.o(&psi);
        for i in 0..3 {
            assert_abs_diff_eq!(overlap[(i, i)].re, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn pseudo_guess_is_deterministic() {
        let (atoms, _) = test_system();
        let a = guess_pseudo(&atoms, 1234, false).unwrap();
        let b = guess_pseudo(&atoms, 1234, false).unwrap();
        assert_abs_diff_eq!((&a[0][0] - &b[0][0]).norm(), 0.0);
    }

    #[test]
    fn symmetric_guesses_replicate_the_first_spin_channel() {
        let mut atoms = Atoms::new(
            vec!["He".into()],
            vec![Vector3::new(4.0, 4.0, 4.0)],
            AtomsOptions {
                a: 8.0,
                ecut: 5.0,
                s: Some([12, 12, 12]),
                unrestricted: true,
                ..Default::default()
            },
        )
        .unwrap();
        atoms.occ.fill(2.0, 1, None).unwrap();
        let random = guess_random(&atoms, 7, true).unwrap();
        assert_abs_diff_eq!((&random[0][0] - &random[0][1]).norm(), 0.0);
        let pseudo = guess_pseudo(&atoms, 7, true).unwrap();
        assert_abs_diff_eq!((&pseudo[0][0] - &pseudo[0][1]).norm(), 0.0);
    }
}
