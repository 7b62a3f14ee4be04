//! Line minimization along the (optionally preconditioned) steepest-descent
//! direction.

use super::{check_convergence, dotprod, precondition, Mode, MinResult};
use crate::error::Result;
use crate::scf::Scf;
use crate::CoeffBlock;
use num_complex::Complex64;

// Step length from a quadratic fit through the gradients at the current and
// the trial position. Falls back to the trial step when the curvature along
// the direction is numerically flat.
pub(super) fn quadratic_step(
    g: &CoeffBlock,
    gt: &CoeffBlock,
    d: &CoeffBlock,
    betat: f64,
) -> f64 {
    let denom = dotprod(&(g - gt), d);
    if denom.abs() < 1e-30 {
        return betat;
    }
    betat * dotprod(g, d) / denom
}

pub(super) fn lm(scf: &mut Scf, mode: Mode, nmax: usize, pc: bool) -> Result<MinResult> {
    let betat = scf.betat();
    let etol = scf.etol();
    let mut costs = Vec::new();

    for _ in 0..nmax {
        let e = scf.eval_cost(mode)?;
        costs.push(e);
        tracing::debug!(cost = e, pc, "lm iteration");
        if check_convergence(&costs, etol, None, None) {
            return Ok(MinResult {
                costs,
                converged: true,
            });
        }
        for ik in 0..scf.atoms.kpts.nk() {
            for spin in 0..scf.atoms.occ.nspin {
                let blk = scf.active(mode)?[ik][spin].clone();
                let g = scf.block_grad(mode, ik, spin, &blk)?;
                let d = if pc {
                    -precondition(&scf.atoms, ik, &g)
                } else {
                    -&g
                };
                // Trial gradient with the stale density of this iteration.
                let trial = &blk + &d * Complex64::new(betat, 0.0);
                let gt = scf.block_grad(mode, ik, spin, &trial)?;
                let beta = quadratic_step(&g, &gt, &d, betat);
                scf.active_mut(mode)?[ik][spin] = blk + d * Complex64::new(beta, 0.0);
            }
        }
    }
    Ok(MinResult {
        costs,
        converged: false,
    })
}
