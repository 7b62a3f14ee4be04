//! Direct energy minimizers.
//!
//! All minimizers walk the unconstrained coefficients downhill; the
//! orthonormality constraint is enforced inside the cost evaluation. The
//! same machinery drives the self-consistent minimization, the
//! fixed-Hamiltonian band minimization, and the follow-up for empty states;
//! only the cost/gradient pair changes with the [`Mode`].

mod cg;
mod lm;
mod sd;

use crate::atoms::Atoms;
use crate::error::{PwDftError, Result};
use crate::scf::Scf;
use crate::CoeffBlock;
use std::fmt;
use std::str::FromStr;

/// The available minimization algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Minimizer {
    /// Steepest descent with a fixed step.
    Sd,
    /// Line minimization along the steepest-descent direction.
    Lm,
    /// Preconditioned line minimization.
    Pclm,
    /// Conjugate gradient.
    Cg,
    /// Preconditioned conjugate gradient.
    Pccg,
    /// Preconditioned conjugate gradient with a steepest-descent fallback
    /// whenever a step raises the energy.
    Auto,
}

impl FromStr for Minimizer {
    type Err = PwDftError;

    fn from_str(s: &str) -> Result<Minimizer> {
        match s.to_lowercase().as_str() {
            "sd" => Ok(Minimizer::Sd),
            "lm" => Ok(Minimizer::Lm),
            "pclm" => Ok(Minimizer::Pclm),
            "cg" => Ok(Minimizer::Cg),
            "pccg" => Ok(Minimizer::Pccg),
            "auto" => Ok(Minimizer::Auto),
            other => Err(PwDftError::UnknownMinimizer(other.to_string())),
        }
    }
}

impl fmt::Display for Minimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Minimizer::Sd => "sd",
            Minimizer::Lm => "lm",
            Minimizer::Pclm => "pclm",
            Minimizer::Cg => "cg",
            Minimizer::Pccg => "pccg",
            Minimizer::Auto => "auto",
        };
        f.write_str(name)
    }
}

/// The conjugate-direction update formula.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CgForm {
    FletcherReeves,
    PolakRibiere,
    HestenesStiefel,
    DaiYuan,
}

impl CgForm {
    pub fn from_index(i: usize) -> Result<CgForm> {
        match i {
            1 => Ok(CgForm::FletcherReeves),
            2 => Ok(CgForm::PolakRibiere),
            3 => Ok(CgForm::HestenesStiefel),
            4 => Ok(CgForm::DaiYuan),
            other => Err(PwDftError::Config(format!(
                "no conjugate-gradient form {other}, expected 1..4"
            ))),
        }
    }
}

/// What a minimization run optimizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Total energy; density and Hamiltonian follow the coefficients.
    Scf,
    /// Band energy under the frozen Hamiltonian of a converged density.
    Bands,
    /// Band energy of extra states kept orthogonal to the occupied ones.
    EmptyBands,
}

/// Outcome of one minimizer stage.
pub struct MinResult {
    /// Cost-function value per iteration.
    pub costs: Vec<f64>,
    pub converged: bool,
}

/// Real part of the Frobenius inner product, the descent metric of all line
/// searches.
pub(crate) fn dotprod(a: &CoeffBlock, b: &CoeffBlock) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x.conj() * y).re).sum()
}

/// Inverse-kinetic preconditioner `K(w) = w / (1 + |G+k|^2)` per row.
pub(crate) fn precondition(atoms: &Atoms, ik: usize, g: &CoeffBlock) -> CoeffBlock {
    let mut out = g.clone();
    for (row, mut r) in out.row_iter_mut().enumerate() {
        r /= num_complex::Complex64::new(1.0 + atoms.gk2[ik][row], 0.0);
    }
    out
}

/// Converged when the cost change stayed below `etol` for two consecutive
/// iterations and, if a gradient tolerance is set, the gradient norm
/// dropped below it as well.
pub(crate) fn check_convergence(
    costs: &[f64],
    etol: f64,
    norm_g: Option<f64>,
    gradtol: Option<f64>,
) -> bool {
    let n = costs.len();
    if n < 3 {
        return false;
    }
    let e_ok = (costs[n - 1] - costs[n - 2]).abs() < etol
        && (costs[n - 2] - costs[n - 3]).abs() < etol;
    match (gradtol, norm_g) {
        (Some(gt), Some(ng)) => e_ok && ng < gt,
        (Some(_), None) => false,
        _ => e_ok,
    }
}

/// Run one minimizer stage for at most `nmax` iterations.
pub(crate) fn minimize(
    scf: &mut Scf,
    kind: Minimizer,
    nmax: usize,
    mode: Mode,
) -> Result<MinResult> {
    tracing::info!(minimizer = %kind, nmax, ?mode, "starting minimizer stage");
    let res = match kind {
        Minimizer::Sd => sd::sd(scf, mode, nmax)?,
        Minimizer::Lm => lm::lm(scf, mode, nmax, false)?,
        Minimizer::Pclm => lm::lm(scf, mode, nmax, true)?,
        Minimizer::Cg => cg::cg(scf, mode, nmax, false, false)?,
        Minimizer::Pccg => cg::cg(scf, mode, nmax, true, false)?,
        Minimizer::Auto => cg::cg(scf, mode, nmax, true, true)?,
    };
    if let Some(last) = res.costs.last() {
        tracing::info!(
            minimizer = %kind,
            iterations = res.costs.len(),
            cost = last,
            converged = res.converged,
            "minimizer stage finished"
        );
    }
    Ok(res)
}
