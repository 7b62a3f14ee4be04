//! Perdew-Burke-Ernzerhof exchange.

use super::THRESHOLD;
use nalgebra::DVector;

const KAPPA: f64 = 0.804;
const MU: f64 = 0.2195149727645171;

// Point evaluation on a closed-shell density: per-particle energy, potential,
// and the sigma derivative of the energy density.
fn pbe_x_point(n: f64, sigma: f64) -> (f64, f64, f64) {
    let kf = (3.0 * std::f64::consts::PI * std::f64::consts::PI * n).cbrt();
    let ex_unif = -3.0 * kf / (4.0 * std::f64::consts::PI);
    // s^2 = sigma / (2 kf n)^2
    let s2 = sigma / (4.0 * kf * kf * n * n);
    let t = 1.0 + MU * s2 / KAPPA;
    let fx = 1.0 + KAPPA - KAPPA / t;
    let dfx = MU / (t * t);

    let exc = ex_unif * fx;
    let vx = ex_unif * (4.0 / 3.0 * fx - 8.0 / 3.0 * s2 * dfx);
    // d(n exc)/dsigma at fixed n
    let vsigma = ex_unif * n * dfx / (4.0 * kf * kf * n * n);
    (exc, vx, vsigma)
}

/// Spin-paired PBE exchange; adds into `exc`, `vx`, and `vsigma`.
pub fn gga_x_pbe(
    n: &DVector<f64>,
    sigma: &DVector<f64>,
    exc: &mut DVector<f64>,
    vx: &mut DVector<f64>,
    vsigma: &mut DVector<f64>,
) {
    for i in 0..n.len() {
        if n[i] < THRESHOLD {
            continue;
        }
        let (e, v, vs) = pbe_x_point(n[i], sigma[i].max(0.0));
        exc[i] += e;
        vx[i] += v;
        vsigma[i] += vs;
    }
}

/// Spin-polarized PBE exchange via the spin-scaling relation: each channel is
/// evaluated as a closed-shell system of doubled density.
pub fn gga_x_pbe_spin(
    n_spin: &[DVector<f64>],
    sigma: &[DVector<f64>],
    exc: &mut DVector<f64>,
    vx: &mut [DVector<f64>],
    vsigma: &mut [DVector<f64>],
) {
    // sigma components are ordered [uu, ud, dd]; exchange never couples the
    // channels, so sigma_ud does not contribute.
    for i in 0..n_spin[0].len() {
        let n = n_spin[0][i] + n_spin[1][i];
        if n < THRESHOLD {
            continue;
        }
        let mut e = 0.0;
        for spin in 0..2 {
            let n_s = n_spin[spin][i];
            if n_s < THRESHOLD / 2.0 {
                continue;
            }
            let sigma_ss = sigma[2 * spin][i].max(0.0);
            let (e_s, v_s, vs_s) = pbe_x_point(2.0 * n_s, 4.0 * sigma_ss);
            e += 0.5 * e_s * 2.0 * n_s;
            vx[spin][i] += v_s;
            vsigma[2 * spin][i] += 2.0 * vs_s;
        }
        exc[i] += e / n;
    }
}
