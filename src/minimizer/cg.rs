//! Conjugate-gradient minimization, with optional preconditioning and an
//! automatic steepest-descent fallback.

use super::lm::quadratic_step;
use super::{check_convergence, dotprod, precondition, CgForm, Mode, MinResult};
use crate::error::Result;
use crate::scf::Scf;
use crate::{CoeffBlock, Wavefunction};
use num_complex::Complex64;

struct History {
    g: CoeffBlock,
    kg: CoeffBlock,
    d: CoeffBlock,
}

fn cg_beta(form: CgForm, g: &CoeffBlock, kg: &CoeffBlock, prev: &History) -> f64 {
    match form {
        CgForm::FletcherReeves => dotprod(g, kg) / dotprod(&prev.g, &prev.kg),
        CgForm::PolakRibiere => {
            dotprod(&(g - &prev.g), kg) / dotprod(&prev.g, &prev.kg)
        }
        CgForm::HestenesStiefel => {
            let dg = g - &prev.g;
            dotprod(&dg, kg) / dotprod(&dg, &prev.d)
        }
        CgForm::DaiYuan => {
            let dg = g - &prev.g;
            dotprod(g, kg) / dotprod(&dg, &prev.d)
        }
    }
}

pub(super) fn cg(
    scf: &mut Scf,
    mode: Mode,
    nmax: usize,
    pc: bool,
    fallback: bool,
) -> Result<MinResult> {
    let betat = scf.betat();
    let etol = scf.etol();
    let gradtol = scf.gradtol();
    let form = scf.cgform();
    let nk = scf.atoms.kpts.nk();
    let nspin = scf.atoms.occ.nspin;

    let mut costs: Vec<f64> = Vec::new();
    let mut history: Vec<Vec<Option<History>>> = (0..nk)
        .map(|_| (0..nspin).map(|_| None).collect())
        .collect();
    let mut snapshot: Option<Wavefunction> = None;

    for _ in 0..nmax {
        let mut e = scf.eval_cost(mode)?;

        // A rising energy means the conjugate direction overshot; retake the
        // previous position with a plain steepest-descent step and restart
        // the direction history.
        if fallback && costs.last().is_some_and(|&prev| e > prev) {
            if let Some(prev_w) = snapshot.take() {
                *scf.active_mut(mode)? = prev_w;
                for ik in 0..nk {
                    for spin in 0..nspin {
                        let blk = scf.active(mode)?[ik][spin].clone();
                        let g = scf.block_grad(mode, ik, spin, &blk)?;
                        scf.active_mut(mode)?[ik][spin] = blk - g * Complex64::new(betat, 0.0);
                        history[ik][spin] = None;
                    }
                }
                e = scf.eval_cost(mode)?;
            }
        }
        costs.push(e);
        tracing::debug!(cost = e, pc, "cg iteration");

        let mut norm_g = if gradtol.is_some() { Some(0.0) } else { None };
        snapshot = Some(scf.active(mode)?.clone());

        let mut grads: Vec<Vec<CoeffBlock>> = Vec::with_capacity(nk);
        for ik in 0..nk {
            let mut per_spin = Vec::with_capacity(nspin);
            for spin in 0..nspin {
                let blk = scf.active(mode)?[ik][spin].clone();
                let g = scf.block_grad(mode, ik, spin, &blk)?;
                if let Some(acc) = norm_g.as_mut() {
                    *acc += dotprod(&g, &g);
                }
                per_spin.push(g);
            }
            grads.push(per_spin);
        }
        let norm_g = norm_g.map(f64::sqrt);
        if check_convergence(&costs, etol, norm_g, gradtol) {
            return Ok(MinResult {
                costs,
                converged: true,
            });
        }

        for ik in 0..nk {
            for spin in 0..nspin {
                let g = grads[ik][spin].clone();
                let kg = if pc {
                    precondition(&scf.atoms, ik, &g)
                } else {
                    g.clone()
                };
                let mut d = match &history[ik][spin] {
                    Some(prev) => {
                        let beta = cg_beta(form, &g, &kg, prev);
                        -&kg + &prev.d * Complex64::new(beta, 0.0)
                    }
                    None => -&kg,
                };
                // A conjugate direction pointing uphill restarts from
                // steepest descent.
                if dotprod(&g, &d) > 0.0 {
                    d = -&kg;
                }

                let blk = scf.active(mode)?[ik][spin].clone();
                let trial = &blk + &d * Complex64::new(betat, 0.0);
                let gt = scf.block_grad(mode, ik, spin, &trial)?;
                let beta = quadratic_step(&g, &gt, &d, betat);
                scf.active_mut(mode)?[ik][spin] = blk + &d * Complex64::new(beta, 0.0);
                history[ik][spin] = Some(History { g, kg, d });
            }
        }
    }
    Ok(MinResult {
        costs,
        converged: false,
    })
}
