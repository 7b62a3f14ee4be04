//! Steepest descent.

use super::{check_convergence, Mode, MinResult};
use crate::error::Result;
use crate::scf::Scf;
use num_complex::Complex64;

pub(super) fn sd(scf: &mut Scf, mode: Mode, nmax: usize) -> Result<MinResult> {
    let betat = scf.betat();
    let etol = scf.etol();
    let mut costs = Vec::new();

    for _ in 0..nmax {
        let e = scf.eval_cost(mode)?;
        costs.push(e);
        tracing::debug!(cost = e, "sd iteration");
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
                scf.active_mut(mode)?[ik][spin] = blk - g * Complex64::new(betat, 0.0);
            }
        }
    }
    Ok(MinResult {
        costs,
        converged: false,
    })
}
