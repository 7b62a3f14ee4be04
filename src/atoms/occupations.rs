//! Occupation numbers per k-point, spin channel, and state.

use crate::error::{PwDftError, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Occupation structure of a calculation.
///
/// `f[ik][spin][ist]` holds the occupation of one state, bounded by the spin
/// degeneracy `2 / nspin`. The k-point weights live in
/// [`crate::atoms::KPoints`]; the invariant `sum_ik wk sum_spin,ist f = nelec`
/// holds after [`Occupations::fill`] and is never mutated by minimization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Occupations {
    /// Number of spin channels (1 spin-paired, 2 spin-polarized).
    pub nspin: usize,
    /// Number of states (bands) per spin channel.
    pub nstate: usize,
    /// Number of electrons represented by the occupations.
    pub nelec: f64,
    /// Occupation numbers, indexed `[ik][spin]`.
    pub f: Vec<Vec<DVector<f64>>>,
}

impl Occupations {
    /// Create an empty occupation structure; call [`Occupations::fill`] once
    /// the electron count is known (it depends on the pseudopotential
    /// valence charges).
    pub fn new(nspin: usize) -> Occupations {
        Occupations {
            nspin,
            nstate: 0,
            nelec: 0.0,
            f: Vec::new(),
        }
    }

    /// Fill the occupations with `nelec` electrons over `nk` k-points,
    /// distributing `2 / nspin` electrons per state and splitting any
    /// remainder as a fractional occupation of the last state.
    ///
    /// Spin-polarized systems fill the majority channel first: an odd
    /// electron count gives e.g. Li the configuration up `[1, 1]`,
    /// down `[1, 0]` instead of half-occupied channels.
    ///
    /// `nstate` can force extra (initially empty) states; by default the
    /// smallest number of states that holds all electrons is used.
    pub fn fill(&mut self, nelec: f64, nk: usize, nstate: Option<usize>) -> Result<()> {
        if nelec <= 0.0 {
            return Err(PwDftError::Config(format!(
                "cannot occupy states with {nelec} electrons"
            )));
        }
        let degeneracy = 2.0 / self.nspin as f64;
        // Electrons per channel: the majority channel takes the round-up
        // half, the minority channel the rest.
        let per_channel: Vec<f64> = if self.nspin == 2 {
            let up = (nelec / 2.0).ceil().min(nelec);
            vec![up, nelec - up]
        } else {
            vec![nelec]
        };
        let min_states = per_channel
            .iter()
            .map(|&e| (e / degeneracy).ceil() as usize)
            .max()
            .unwrap_or(0);
        let nstate = nstate.unwrap_or(min_states).max(min_states);

        let per_spin: Vec<DVector<f64>> = per_channel
            .iter()
            .map(|&e| {
                let mut f_spin = DVector::zeros(nstate);
                let mut remaining = e;
                for ist in 0..nstate {
                    let occ = remaining.min(degeneracy);
                    f_spin[ist] = occ;
                    remaining -= occ;
                }
                f_spin
            })
            .collect();

        self.nelec = nelec;
        self.nstate = nstate;
        self.f = (0..nk).map(|_| per_spin.clone()).collect();
        Ok(())
    }

    /// Total electron count implied by the occupations and k-point weights.
    pub fn electron_count(&self, wk: &[f64]) -> f64 {
        self.f
            .iter()
            .zip(wk.iter())
            .map(|(f_k, &w)| w * f_k.iter().map(|f_s| f_s.sum()).sum::<f64>())
            .sum()
    }

    /// True if any occupation differs from the full spin degeneracy, i.e.
    /// the non-constant-occupation gradient correction is required.
    pub fn has_fractional(&self) -> bool {
        let degeneracy = 2.0 / self.nspin as f64;
        self.f
            .iter()
            .flatten()
            .flat_map(|f_s| f_s.iter())
            .any(|&f| (f - degeneracy).abs() > 1e-12)
    }
}
