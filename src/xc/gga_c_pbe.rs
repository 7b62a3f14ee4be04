//! Perdew-Burke-Ernzerhof correlation.
//!
//! Built on top of the Perdew-Wang local correlation with the gradient
//! contribution `H(rs, zeta, t)`; derivatives are evaluated analytically
//! through the full `A(ec, phi)` chain.

use super::lda_c_pw::{ec_polarized, PW92_PRECISE};
use super::{wigner_seitz_radius, THRESHOLD};
use nalgebra::DVector;

const BETA: f64 = 0.06672455060314922;

fn gamma_const() -> f64 {
    (1.0 - std::f64::consts::LN_2) / (std::f64::consts::PI * std::f64::consts::PI)
}

// t^2 = C sigma / (phi^2 n^(7/3))
fn t2_prefactor() -> f64 {
    std::f64::consts::PI
        / (16.0 * (3.0 * std::f64::consts::PI * std::f64::consts::PI).cbrt())
}

struct PbeCPoint {
    exc: f64,
    vc_up: f64,
    vc_dn: f64,
    // d(n H)/dsigma where sigma is the total contracted gradient.
    dh_dsigma_times_n: f64,
}

// Core evaluation at one grid point for total density n, polarization zeta,
// and total contracted gradient sigma.
fn pbe_c_point(n: f64, zeta: f64, sigma: f64) -> PbeCPoint {
    let gamma = gamma_const();
    let rs = wigner_seitz_radius(n);

    // phi(zeta) and its derivative; the cube roots blow up at |zeta| = 1, so
    // the polarization is kept strictly inside the interval.
    let zeta = zeta.clamp(-1.0 + 1e-12, 1.0 - 1e-12);
    let up = 1.0 + zeta;
    let dn = 1.0 - zeta;
    let phi = (up.powf(2.0 / 3.0) + dn.powf(2.0 / 3.0)) / 2.0;
    let dphi_dz = (up.powf(-1.0 / 3.0) - dn.powf(-1.0 / 3.0)) / 3.0;

    let (ec, dec_drs, dec_dz) = ec_polarized(&PW92_PRECISE, rs, zeta);
    let dec_dn = -rs / (3.0 * n) * dec_drs;

    let phi3 = phi * phi * phi;
    let u = t2_prefactor() * sigma / (phi * phi * n.powf(7.0 / 3.0));

    let e = (-ec / (gamma * phi3)).exp();
    let a = (BETA / gamma) / (e - 1.0);

    let d = 1.0 + a * u + a * a * u * u;
    let g = u * (1.0 + a * u) / d;
    let h = gamma * phi3 * (1.0 + (BETA / gamma) * g).ln();

    let dh_dg = BETA * phi3 / (1.0 + (BETA / gamma) * g);
    let dg_du = (1.0 + 2.0 * a * u) / (d * d);
    let dg_da = -(a * u * u * u) * (2.0 + a * u) / (d * d);
    let da_dec = a * a * (gamma / BETA) * e / (gamma * phi3);
    let da_dphi = -a * a * (gamma / BETA) * 3.0 * ec * e / (gamma * phi * phi3);

    let du_dn = -7.0 / 3.0 * u / n;
    let du_dphi = -2.0 * u / phi;
    let du_dsigma = t2_prefactor() / (phi * phi * n.powf(7.0 / 3.0));

    let dh_dn = dh_dg * (dg_du * du_dn + dg_da * da_dec * dec_dn);
    let dh_dsigma = dh_dg * dg_du * du_dsigma;
    let dh_dz = 3.0 * gamma * phi * phi * (1.0 + (BETA / gamma) * g).ln() * dphi_dz
        + dh_dg * (dg_du * du_dphi + dg_da * da_dphi) * dphi_dz
        + dh_dg * dg_da * da_dec * dec_dz;

    let exc = ec + h;
    let common = exc + n * (dec_dn + dh_dn);
    let dz = dec_dz + dh_dz;
    PbeCPoint {
        exc,
        vc_up: common + (1.0 - zeta) * dz,
        vc_dn: common - (1.0 + zeta) * dz,
        dh_dsigma_times_n: n * dh_dsigma,
    }
}

/// Spin-paired PBE correlation; adds into `exc`, `vc`, and `vsigma`.
pub fn gga_c_pbe(
    n: &DVector<f64>,
    sigma: &DVector<f64>,
    exc: &mut DVector<f64>,
    vc: &mut DVector<f64>,
    vsigma: &mut DVector<f64>,
) {
    for i in 0..n.len() {
        if n[i] < THRESHOLD {
            continue;
        }
        let p = pbe_c_point(n[i], 0.0, sigma[i].max(0.0));
        exc[i] += p.exc;
        vc[i] += p.vc_up;
        vsigma[i] += p.dh_dsigma_times_n;
    }
}

/// Spin-polarized PBE correlation.
pub fn gga_c_pbe_spin(
    n_spin: &[DVector<f64>],
    sigma: &[DVector<f64>],
    exc: &mut DVector<f64>,
    vc: &mut [DVector<f64>],
    vsigma: &mut [DVector<f64>],
) {
    for i in 0..n_spin[0].len() {
        let n = n_spin[0][i] + n_spin[1][i];
        if n < THRESHOLD {
            continue;
        }
        let zeta = (n_spin[0][i] - n_spin[1][i]) / n;
        // Correlation couples the channels; only the total gradient enters.
        let sigma_tot = (sigma[0][i] + 2.0 * sigma[1][i] + sigma[2][i]).max(0.0);
        let p = pbe_c_point(n, zeta, sigma_tot);
        exc[i] += p.exc;
        vc[0][i] += p.vc_up;
        vc[1][i] += p.vc_dn;
        vsigma[0][i] += p.dh_dsigma_times_n;
        vsigma[1][i] += 2.0 * p.dh_dsigma_times_n;
        vsigma[2][i] += p.dh_dsigma_times_n;
    }
}
