//! The self-consistent-field calculation object.
//!
//! [`Scf`] owns the geometry, the potential, and the minimization state.
//! [`Scf::run`] performs the direct total-energy minimization; the band
//! follow-ups reuse the converged density with a frozen Hamiltonian.

use crate::atoms::Atoms;
use crate::dft::{
    get_epsilon, guess_pseudo, guess_random, h_precompute, orth, orth_unocc, Precomputed,
};
use crate::energies::{
    get_eband, get_ecoul, get_eewald, get_ekin, get_enonloc, get_esic, get_exc, get_eloc, Energy,
};
use crate::error::{PwDftError, Result};
use crate::gth::{GthPotential, GthPsp};
use crate::minimizer::{minimize, CgForm, Minimizer, Mode};
use crate::xc::{parse_functionals, Functional};
use crate::{CoeffBlock, Wavefunction};
use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Raw, serializable calculation options; validated into an [`Scf`] by
/// [`Scf::new`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScfOptions {
    /// Exchange-correlation functional string, e.g. `"lda,vwn"` or `"pbe"`.
    #[serde(default = "default_xc")]
    pub xc: String,
    /// Potential type: `"gth"` or `"coulomb"`.
    #[serde(default = "default_pot")]
    pub pot: String,
    /// Initial guess: `"random"`, `"pseudo"`, optionally prefixed with
    /// `"sym-"` for identical spin channels.
    #[serde(default = "default_guess")]
    pub guess: String,
    /// Convergence tolerance of the total energy.
    #[serde(default = "default_etol")]
    pub etol: f64,
    /// Optional gradient-norm tolerance, honored by the conjugate-gradient
    /// minimizers.
    #[serde(default)]
    pub gradtol: Option<f64>,
    /// Apply the Perdew-Zunger self-interaction correction after the run.
    #[serde(default)]
    pub sic: bool,
    /// Add a dispersion correction after the run; requires a provider
    /// installed via [`Scf::set_dispersion_provider`].
    #[serde(default)]
    pub disp: bool,
    /// Minimizer stages as (name, max iterations) pairs, executed in order.
    #[serde(default = "default_opt")]
    pub opt: Vec<(String, usize)>,
    /// Trial step of the line searches.
    #[serde(default = "default_betat")]
    pub betat: f64,
    /// Conjugate-gradient form (1 Fletcher-Reeves, 2 Polak-Ribiere,
    /// 3 Hestenes-Stiefel, 4 Dai-Yuan).
    #[serde(default = "default_cgform")]
    pub cgform: usize,
    /// Seed of the random initial guess.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_xc() -> String {
    "lda,vwn".into()
}
fn default_pot() -> String {
    "gth".into()
}
fn default_guess() -> String {
    "random".into()
}
fn default_etol() -> f64 {
    1e-7
}
fn default_opt() -> Vec<(String, usize)> {
    vec![("auto".into(), 250)]
}
fn default_betat() -> f64 {
    3e-5
}
fn default_cgform() -> usize {
    1
}
fn default_seed() -> u64 {
    1234
}

impl Default for ScfOptions {
    fn default() -> Self {
        ScfOptions {
            xc: default_xc(),
            pot: default_pot(),
            guess: default_guess(),
            etol: default_etol(),
            gradtol: None,
            sic: false,
            disp: false,
            opt: default_opt(),
            betat: default_betat(),
            cgform: default_cgform(),
            seed: default_seed(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PotentialKind {
    Gth,
    Coulomb,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GuessKind {
    Random,
    Pseudo,
}

// Validated options.
struct ScfConfig {
    guess: GuessKind,
    symmetric: bool,
    etol: f64,
    gradtol: Option<f64>,
    sic: bool,
    disp: bool,
    stages: Vec<(Minimizer, usize)>,
    betat: f64,
    cgform: CgForm,
    seed: u64,
}

/// External dispersion-correction backends plug in through this trait.
pub trait DispersionProvider: Send + Sync {
    fn energy(&self, atoms: &Atoms) -> Result<f64>;
}

/// A plane-wave DFT calculation.
pub struct Scf {
    pub atoms: Atoms,
    pub pot: GthPotential,
    pub functionals: Vec<Functional>,
    pub energies: Energy,
    pub is_converged: bool,
    config: ScfConfig,
    w: Option<Wavefunction>,
    /// Orthonormal coefficients of the last cost evaluation.
    pub y: Option<Wavefunction>,
    z: Option<Wavefunction>,
    pre: Option<Precomputed>,
    disp_provider: Option<Box<dyn DispersionProvider>>,
}

fn atomic_number(symbol: &str) -> Result<f64> {
    let z = match symbol {
        "H" => 1.0,
        "He" => 2.0,
        "Li" => 3.0,
        "Be" => 4.0,
        "B" => 5.0,
        "C" => 6.0,
        "N" => 7.0,
        "O" => 8.0,
        "F" => 9.0,
        "Ne" => 10.0,
        other => return Err(PwDftError::UnknownSpecies(other.to_string())),
    };
    Ok(z)
}

// All-electron Coulomb potential, mainly for validation runs against
// analytic references.
fn coulomb_potential(atoms: &Atoms) -> GthPotential {
    let ns = atoms.ns();
    let mut vg = DVector::zeros(ns);
    for (ia, x) in atoms.positions.iter().enumerate() {
        for ig in 0..ns {
            if atoms.g2[ig] < 1e-14 {
                continue;
            }
            let sf = Complex64::from_polar(1.0, -atoms.g[ig].dot(x));
            vg[ig] += Complex64::new(
                -4.0 * std::f64::consts::PI * atoms.z[ia] / atoms.g2[ig],
                0.0,
            ) * sf;
        }
    }
    GthPotential {
        vloc_dual: atoms.jdag_field(&vg).map(|c| c.re),
        betanl: (0..atoms.kpts.nk())
            .map(|ik| CoeffBlock::zeros(atoms.npw(ik), 0))
            .collect(),
        couplings: Vec::new(),
    }
}

impl Scf {
    /// Validate the options, assign valence charges and occupations, and
    /// build the potential.
    pub fn new(mut atoms: Atoms, opts: ScfOptions) -> Result<Scf> {
        let functionals = parse_functionals(&opts.xc)?;

        let (guess, symmetric) = {
            let (sym, name) = match opts.guess.strip_prefix("sym-") {
                Some(rest) => (true, rest),
                None => (false, opts.guess.as_str()),
            };
            let kind = match name {
                "random" => GuessKind::Random,
                "pseudo" => GuessKind::Pseudo,
                other => return Err(PwDftError::UnknownGuess(other.to_string())),
            };
            (kind, sym)
        };

        let mut stages = Vec::with_capacity(opts.opt.len());
        for (name, nmax) in &opts.opt {
            stages.push((name.parse::<Minimizer>()?, *nmax));
        }
        if stages.is_empty() {
            return Err(PwDftError::Config("empty minimizer stage list".into()));
        }
        if opts.etol <= 0.0 {
            return Err(PwDftError::Config(format!(
                "non-positive energy tolerance {}",
                opts.etol
            )));
        }

        let pot_kind = match opts.pot.as_str() {
            "gth" => PotentialKind::Gth,
            "coulomb" => PotentialKind::Coulomb,
            other => return Err(PwDftError::UnknownPotential(other.to_string())),
        };

        let pot = match pot_kind {
            PotentialKind::Gth => {
                let psps: Vec<GthPsp> = atoms
                    .species
                    .iter()
                    .map(|s| GthPsp::builtin(s))
                    .collect::<Result<_>>()?;
                for (ia, psp) in psps.iter().enumerate() {
                    atoms.z[ia] = psp.zion;
                }
                GthPotential::new(&atoms, &psps)
            }
            PotentialKind::Coulomb => {
                for ia in 0..atoms.species.len() {
                    atoms.z[ia] = atomic_number(&atoms.species[ia])?;
                }
                coulomb_potential(&atoms)
            }
        };

        let nelec = atoms.z.iter().sum::<f64>() - atoms.charge;
        atoms
            .occ
            .fill(nelec, atoms.kpts.nk(), atoms.nstate_request)?;
        tracing::info!(
            nelec,
            nstate = atoms.occ.nstate,
            nspin = atoms.occ.nspin,
            npw = atoms.npw(0),
            "initialized calculation"
        );

        Ok(Scf {
            atoms,
            pot,
            functionals,
            energies: Energy::default(),
            is_converged: false,
            config: ScfConfig {
                guess,
                symmetric,
                etol: opts.etol,
                gradtol: opts.gradtol,
                sic: opts.sic,
                disp: opts.disp,
                stages,
                betat: opts.betat,
                cgform: CgForm::from_index(opts.cgform)?,
                seed: opts.seed,
            },
            w: None,
            y: None,
            z: None,
            pre: None,
            disp_provider: None,
        })
    }

    /// Install a dispersion-correction backend.
    pub fn set_dispersion_provider(&mut self, provider: Box<dyn DispersionProvider>) {
        self.disp_provider = Some(provider);
    }

    pub(crate) fn betat(&self) -> f64 {
        self.config.betat
    }

    pub(crate) fn etol(&self) -> f64 {
        self.config.etol
    }

    pub(crate) fn gradtol(&self) -> Option<f64> {
        self.config.gradtol
    }

    pub(crate) fn cgform(&self) -> CgForm {
        self.config.cgform
    }

    fn w_ref(&self) -> Result<&Wavefunction> {
        self.w
            .as_ref()
            .ok_or_else(|| PwDftError::Config("coefficients not initialized".into()))
    }

    fn z_ref(&self) -> Result<&Wavefunction> {
        self.z
            .as_ref()
            .ok_or_else(|| PwDftError::Config("band coefficients not initialized".into()))
    }

    fn pre_ref(&self) -> Result<&Precomputed> {
        self.pre
            .as_ref()
            .ok_or_else(|| PwDftError::Config("no precomputed density available".into()))
    }

    fn y_ref(&self) -> Result<&Wavefunction> {
        self.y
            .as_ref()
            .ok_or_else(|| PwDftError::Config("no orthonormal coefficients available".into()))
    }

    /// The coefficients a minimizer mode works on.
    pub(crate) fn active(&self, mode: Mode) -> Result<&Wavefunction> {
        match mode {
            Mode::Scf => self.w_ref(),
            Mode::Bands | Mode::EmptyBands => self.z_ref(),
        }
    }

    pub(crate) fn active_mut(&mut self, mode: Mode) -> Result<&mut Wavefunction> {
        let slot = match mode {
            Mode::Scf => &mut self.w,
            Mode::Bands | Mode::EmptyBands => &mut self.z,
        };
        slot.as_mut()
            .ok_or_else(|| PwDftError::Config("coefficients not initialized".into()))
    }

    // The occupied columns of the orthonormal coefficients; states forced in
    // beyond the electron count carry f = 0 and are excluded.
    fn occupied_columns(&self, ik: usize, spin: usize) -> Result<CoeffBlock> {
        let y = &self.y_ref()?[ik][spin];
        let f = &self.atoms.occ.f[ik][spin];
        let cols: Vec<usize> = (0..y.ncols()).filter(|&ist| f[ist] > 0.0).collect();
        Ok(y.select_columns(&cols))
    }

    // Orthonormalize the band working set according to the mode.
    fn orth_bands(&self, mode: Mode) -> Result<Wavefunction> {
        let z = self.z_ref()?;
        match mode {
            Mode::Bands => orth(&self.atoms, z),
            Mode::EmptyBands => z
                .iter()
                .enumerate()
                .map(|(ik, z_k)| {
                    z_k.iter()
                        .enumerate()
                        .map(|(spin, blk)| {
                            let yocc = self.occupied_columns(ik, spin)?;
                            orth_unocc(&self.atoms, &yocc, blk)
                        })
                        .collect()
                })
                .collect(),
            Mode::Scf => unreachable!(),
        }
    }

    /// Cost function of a minimizer mode. For [`Mode::Scf`] this also
    /// refreshes the orthonormal coefficients, the density-dependent
    /// precomputations, and the energy record.
    pub(crate) fn eval_cost(&mut self, mode: Mode) -> Result<f64> {
        match mode {
            Mode::Scf => {
                let y = orth(&self.atoms, self.w_ref()?)?;
                let pre =
                    h_precompute(&self.atoms, &self.functionals, &self.pot.vloc_dual, &y)?;
                self.energies.ekin = get_ekin(&self.atoms, &y);
                self.energies.ecoul = get_ecoul(&self.atoms, &pre.n, &pre.phi);
                self.energies.exc = get_exc(&self.atoms, &pre.n, &pre.exc);
                self.energies.eloc = get_eloc(&self.pot.vloc_dual, &pre.n);
                self.energies.enonloc = get_enonloc(&self.atoms, &self.pot, &y);
                self.y = Some(y);
                self.pre = Some(pre);
                Ok(self.energies.etot())
            }
            Mode::Bands | Mode::EmptyBands => {
                let yz = self.orth_bands(mode)?;
                Ok(get_eband(&self.atoms, &self.pot, self.pre_ref()?, &yz))
            }
        }
    }

    /// Gradient of the mode cost with respect to one coefficient block.
    pub(crate) fn block_grad(
        &self,
        mode: Mode,
        ik: usize,
        spin: usize,
        blk: &CoeffBlock,
    ) -> Result<CoeffBlock> {
        let pre = self.pre_ref()?;
        match mode {
            Mode::Scf => crate::dft::get_grad(
                &self.atoms,
                &self.pot,
                pre,
                ik,
                spin,
                blk,
                crate::dft::GradWeight::Occupations,
            ),
            Mode::Bands => crate::dft::get_grad(
                &self.atoms,
                &self.pot,
                pre,
                ik,
                spin,
                blk,
                crate::dft::GradWeight::Uniform,
            ),
            Mode::EmptyBands => {
                let g = crate::dft::get_grad(
                    &self.atoms,
                    &self.pot,
                    pre,
                    ik,
                    spin,
                    blk,
                    crate::dft::GradWeight::Uniform,
                )?;
                // Keep the search inside the unoccupied complement.
                let yocc = self.occupied_columns(ik, spin)?;
                Ok(&g - &yocc * (yocc.adjoint() * self.atoms.o(&g)))
            }
        }
    }

    /// Run the self-consistent minimization. Returns the total energy; a
    /// non-converged run is reported through [`Scf::is_converged`] and a
    /// warning, never as an error.
    pub fn run(&mut self) -> Result<f64> {
        self.energies.eewald = get_eewald(&self.atoms, 2.0, 1e-8);

        // Warm restarts keep the previous coefficients.
        if self.w.is_none() {
            let w = match self.config.guess {
                GuessKind::Random => {
                    guess_random(&self.atoms, self.config.seed, self.config.symmetric)?
                }
                GuessKind::Pseudo => {
                    guess_pseudo(&self.atoms, self.config.seed, self.config.symmetric)?
                }
            };
            self.w = Some(w);
        }

        self.is_converged = false;
        let stages = self.config.stages.clone();
        for (kind, nmax) in stages {
            if self.is_converged {
                break;
            }
            let res = minimize(self, kind, nmax, Mode::Scf)?;
            self.is_converged = res.converged;
        }
        // Sync the state with the final coefficients.
        let etot = self.eval_cost(Mode::Scf)?;

        if !self.is_converged {
            tracing::warn!(etot, "SCF did not reach the energy tolerance");
        }

        if self.config.sic {
            self.energies.esic =
                get_esic(&self.atoms, &self.functionals, self.y_ref()?)?;
        }
        if self.config.disp {
            let provider = self.disp_provider.as_ref().ok_or_else(|| {
                PwDftError::MissingDependency(
                    "dispersion correction requested without a provider".into(),
                )
            })?;
            self.energies.edisp = provider.energy(&self.atoms)?;
        }

        tracing::info!(etot = self.energies.etot(), converged = self.is_converged, "run finished");
        Ok(self.energies.etot())
    }

    /// Minimize the band energy of all states under the frozen Hamiltonian
    /// of the converged density. Must follow a [`Scf::run`].
    pub fn converge_bands(&mut self) -> Result<()> {
        self.pre_ref()?;
        self.z = Some(self.y_ref()?.clone());
        let stages = self.config.stages.clone();
        let mut converged = false;
        for (kind, nmax) in stages {
            if converged {
                break;
            }
            let res = minimize(self, kind, nmax, Mode::Bands)?;
            converged = res.converged;
        }
        self.z = Some(self.orth_bands(Mode::Bands)?);
        Ok(())
    }

    /// Optimize `nempty` additional states per spin channel against the
    /// frozen Hamiltonian, kept orthogonal to the occupied states.
    pub fn converge_empty_bands(&mut self, nempty: usize) -> Result<()> {
        self.pre_ref()?;
        self.y_ref()?;

        // Deterministic start, offset from the occupied-guess seed.
        let mut atoms_empty = self.atoms.clone();
        atoms_empty.occ.nstate = nempty;
        let z = {
            let raw = guess_random(&atoms_empty, self.config.seed + 1, self.config.symmetric)?;
            raw.iter()
                .enumerate()
                .map(|(ik, z_k)| {
                    z_k.iter()
                        .enumerate()
                        .map(|(spin, blk)| {
                            let yocc = self.occupied_columns(ik, spin)?;
                            orth_unocc(&self.atoms, &yocc, blk)
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?
        };
        self.z = Some(z);

        let stages = self.config.stages.clone();
        let mut converged = false;
        for (kind, nmax) in stages {
            if converged {
                break;
            }
            let res = minimize(self, kind, nmax, Mode::EmptyBands)?;
            converged = res.converged;
        }
        self.z = Some(self.orth_bands(Mode::EmptyBands)?);
        Ok(())
    }

    /// Kohn-Sham eigenvalues of the occupied states, sorted ascending.
    pub fn eigenvalues(&self) -> Result<Vec<Vec<DVector<f64>>>> {
        Ok(get_epsilon(
            &self.atoms,
            &self.pot,
            self.pre_ref()?,
            self.y_ref()?,
        ))
    }

    /// Eigenvalues of the band working set (after a band follow-up).
    pub fn eigenvalues_unocc(&self) -> Result<Vec<Vec<DVector<f64>>>> {
        Ok(get_epsilon(
            &self.atoms,
            &self.pot,
            self.pre_ref()?,
            self.z_ref()?,
        ))
    }
}
