//! End-to-end calculations on small molecules.

use approx::assert_abs_diff_eq;
use nalgebra::Vector3;
use pwdft::dft::get_n_total;
use pwdft::{Atoms, AtomsOptions, Scf, ScfOptions};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn hydrogen_molecule(separation: f64, opts: AtomsOptions) -> Atoms {
    Atoms::new(
        vec!["H".into(), "H".into()],
        vec![Vector3::zeros(), Vector3::new(separation, 0.0, 0.0)],
        opts,
    )
    .unwrap()
}

fn helium_atom() -> Atoms {
    Atoms::new(
        vec!["He".into()],
        vec![Vector3::new(4.0, 4.0, 4.0)],
        AtomsOptions {
            a: 8.0,
            ecut: 6.0,
            s: Some([16, 16, 16]),
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn h2_total_energy_matches_the_lda_reference() {
    init_tracing();
    // Reference value from a converged LDA (VWN) calculation of H2 in a
    // 10 Bohr cell at ecut = 10 on a 30-point grid.
    let atoms = hydrogen_molecule(
        1.4,
        AtomsOptions {
            a: 10.0,
            ecut: 10.0,
            ..Default::default()
        },
    );
    assert_eq!(atoms.s, [30, 30, 30]);

    let mut scf = Scf::new(
        atoms,
        ScfOptions {
            xc: "lda,vwn".into(),
            etol: 1e-8,
            opt: vec![("sd".into(), 3), ("pccg".into(), 250)],
            ..Default::default()
        },
    )
    .unwrap();
    let etot = scf.run().unwrap();
    assert!(scf.is_converged);
    assert_abs_diff_eq!(etot, -1.103621, epsilon = 1e-4);
}

#[test]
fn h2_density_integrates_to_two_electrons() {
    let atoms = hydrogen_molecule(
        1.4,
        AtomsOptions {
            a: 8.0,
            ecut: 6.0,
            s: Some([16, 16, 16]),
            ..Default::default()
        },
    );
    let mut scf = Scf::new(
        atoms,
        ScfOptions {
            opt: vec![("pccg".into(), 40)],
            etol: 1e-6,
            ..Default::default()
        },
    )
    .unwrap();
    scf.run().unwrap();
    let y = scf.y.as_ref().unwrap();
    let n = get_n_total(&scf.atoms, y);
    let integral = scf.atoms.omega / scf.atoms.ns() as f64 * n.sum();
    assert_abs_diff_eq!(integral, 2.0, epsilon = 1e-8);
}

#[test]
fn restricted_and_unrestricted_helium_agree() {
    // A closed-shell system must give the same ground-state energy in both
    // spin treatments when the unrestricted run starts spin-symmetric.
    let mut restricted = Scf::new(
        helium_atom(),
        ScfOptions {
            etol: 1e-8,
            opt: vec![("sd".into(), 3), ("pccg".into(), 250)],
            ..Default::default()
        },
    )
    .unwrap();
    let e_restricted = restricted.run().unwrap();

    let atoms = Atoms::new(
        vec!["He".into()],
        vec![Vector3::new(4.0, 4.0, 4.0)],
        AtomsOptions {
            a: 8.0,
            ecut: 6.0,
            s: Some([16, 16, 16]),
            unrestricted: true,
            ..Default::default()
        },
    )
    .unwrap();
    let mut unrestricted = Scf::new(
        atoms,
        ScfOptions {
            guess: "sym-random".into(),
            etol: 1e-8,
            opt: vec![("sd".into(), 3), ("pccg".into(), 250)],
            ..Default::default()
        },
    )
    .unwrap();
    let e_unrestricted = unrestricted.run().unwrap();

    assert!(restricted.is_converged && unrestricted.is_converged);
    assert_abs_diff_eq!(e_restricted, e_unrestricted, epsilon = 1e-6);
}

#[test]
fn symmetric_guess_cannot_break_spin_symmetry() {
    // Stretched H2 has a lower spin-polarized solution, but a spin-symmetric
    // start stays on the symmetric saddle; an independent guess may fall
    // below it, never above.
    let opts = AtomsOptions {
        a: 10.0,
        ecut: 5.0,
        s: Some([20, 20, 20]),
        unrestricted: true,
        ..Default::default()
    };
    let run = |guess: &str| {
        let atoms = hydrogen_molecule(4.0, opts.clone());
        let mut scf = Scf::new(
            atoms,
            ScfOptions {
                guess: guess.into(),
                etol: 1e-7,
                opt: vec![("sd".into(), 5), ("pccg".into(), 120)],
                ..Default::default()
            },
        )
        .unwrap();
        scf.run().unwrap()
    };
    let e_sym = run("sym-random");
    let e_free = run("random");
    assert!(e_free <= e_sym + 1e-6);
}

#[test]
fn warm_restart_resumes_from_the_converged_state() {
    init_tracing();
    let mut scf = Scf::new(
        helium_atom(),
        ScfOptions {
            etol: 1e-7,
            opt: vec![("pccg".into(), 100)],
            ..Default::default()
        },
    )
    .unwrap();
    let first = scf.run().unwrap();
    // The second run starts from the converged coefficients and must not
    // move away from the minimum.
    let second = scf.run().unwrap();
    assert!(scf.is_converged);
    assert_abs_diff_eq!(first, second, epsilon = 1e-6);
}

#[test]
fn energy_breakdown_sums_to_the_total() {
    let mut scf = Scf::new(
        helium_atom(),
        ScfOptions {
            opt: vec![("pccg".into(), 60)],
            etol: 1e-6,
            ..Default::default()
        },
    )
    .unwrap();
    let etot = scf.run().unwrap();
    let e = scf.energies;
    assert_abs_diff_eq!(
        etot,
        e.ekin + e.ecoul + e.exc + e.eloc + e.enonloc + e.eewald,
        epsilon = 1e-12
    );
    assert!(e.ekin > 0.0);
    assert!(e.ecoul > 0.0);
    assert!(e.exc < 0.0);
}

#[test]
fn occupied_eigenvalues_are_bound_states() {
    let mut scf = Scf::new(
        helium_atom(),
        ScfOptions {
            etol: 1e-7,
            opt: vec![("pccg".into(), 100)],
            ..Default::default()
        },
    )
    .unwrap();
    scf.run().unwrap();
    let eps = scf.eigenvalues().unwrap();
    assert!(eps[0][0][0] < 0.0);
}

#[test]
fn empty_band_follow_up_stays_above_the_occupied_states() {
    let mut scf = Scf::new(
        helium_atom(),
        ScfOptions {
            etol: 1e-7,
            opt: vec![("pccg".into(), 100)],
            ..Default::default()
        },
    )
    .unwrap();
    scf.run().unwrap();
    scf.converge_empty_bands(2).unwrap();
    let occ = scf.eigenvalues().unwrap();
    let unocc = scf.eigenvalues_unocc().unwrap();
    assert_eq!(unocc[0][0].len(), 2);
    assert!(unocc[0][0][0] > occ[0][0][0]);
}

#[test]
fn band_minimization_preserves_the_density_energy() {
    let mut scf = Scf::new(
        helium_atom(),
        ScfOptions {
            etol: 1e-7,
            opt: vec![("pccg".into(), 100)],
            ..Default::default()
        },
    )
    .unwrap();
    let etot = scf.run().unwrap();
    scf.converge_bands().unwrap();
    // The Hamiltonian stays frozen, so the total energy record is untouched.
    assert_abs_diff_eq!(scf.energies.etot(), etot, epsilon = 1e-12);
    let eps = scf.eigenvalues_unocc().unwrap();
    assert_eq!(eps[0][0].len(), scf.atoms.occ.nstate);
}

#[test]
fn sic_lowers_the_reported_total_energy() {
    let mut scf = Scf::new(
        helium_atom(),
        ScfOptions {
            sic: true,
            etol: 1e-6,
            opt: vec![("pccg".into(), 60)],
            ..Default::default()
        },
    )
    .unwrap();
    let etot = scf.run().unwrap();
    assert!(scf.energies.esic < 0.0);
    assert_abs_diff_eq!(etot, scf.energies.etot(), epsilon = 1e-12);
}

#[test]
fn fractional_occupations_converge() {
    // A single lithium valence electron in a spin-paired channel occupies
    // its state fractionally and exercises the occupation-weighted gradient.
    let atoms = Atoms::new(
        vec!["Li".into()],
        vec![Vector3::new(4.0, 4.0, 4.0)],
        AtomsOptions {
            a: 8.0,
            ecut: 6.0,
            s: Some([16, 16, 16]),
            ..Default::default()
        },
    )
    .unwrap();
    let mut scf = Scf::new(
        atoms,
        ScfOptions {
            etol: 1e-6,
            opt: vec![("sd".into(), 5), ("pccg".into(), 120)],
            ..Default::default()
        },
    )
    .unwrap();
    let etot = scf.run().unwrap();
    assert!(etot < 0.0);
    assert_abs_diff_eq!(scf.atoms.occ.f[0][0][0], 1.0);
}

#[test]
fn pbe_differs_from_lda_but_stays_close() {
    let run = |xc: &str| {
        let mut scf = Scf::new(
            helium_atom(),
            ScfOptions {
                xc: xc.into(),
                etol: 1e-6,
                opt: vec![("sd".into(), 3), ("pccg".into(), 100)],
                ..Default::default()
            },
        )
        .unwrap();
        scf.run().unwrap()
    };
    let e_lda = run("lda,vwn");
    let e_pbe = run("pbe");
    assert!((e_lda - e_pbe).abs() > 1e-4);
    assert!((e_lda - e_pbe).abs() < 0.5);
}
