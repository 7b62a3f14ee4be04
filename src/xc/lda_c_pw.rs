//! Perdew-Wang 1992 correlation.

use super::{wigner_seitz_radius, THRESHOLD};
use nalgebra::DVector;

pub(super) struct PwFit {
    pub a: f64,
    pub alpha1: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub beta3: f64,
    pub beta4: f64,
}

impl PwFit {
    // ec(rs) of one fit and its derivative w.r.t. rs.
    pub(super) fn eval(&self, rs: f64) -> (f64, f64) {
        let srs = rs.sqrt();
        let q0 = -2.0 * self.a * (1.0 + self.alpha1 * rs);
        let q1 = 2.0
            * self.a
            * (self.beta1 * srs + self.beta2 * rs + self.beta3 * rs * srs + self.beta4 * rs * rs);
        let dq1 = self.a
            * (self.beta1 / srs
                + 2.0 * self.beta2
                + 3.0 * self.beta3 * srs
                + 4.0 * self.beta4 * rs);
        let log_term = (1.0 + 1.0 / q1).ln();
        let ec = q0 * log_term;
        let dec = -2.0 * self.a * self.alpha1 * log_term - q0 * dq1 / (q1 * q1 + q1);
        (ec, dec)
    }
}

pub(super) struct PwParams {
    pub para: PwFit,
    pub ferro: PwFit,
    // Fit of -alpha_c (the spin stiffness enters with a sign flip).
    pub stiff: PwFit,
}

/// The parameter set of the original 1992 paper.
pub(super) const PW92: PwParams = PwParams {
    para: PwFit {
        a: 0.031091,
        alpha1: 0.21370,
        beta1: 7.5957,
        beta2: 3.5876,
        beta3: 1.6382,
        beta4: 0.49294,
    },
    ferro: PwFit {
        a: 0.015545,
        alpha1: 0.20548,
        beta1: 14.1189,
        beta2: 6.1977,
        beta3: 3.3662,
        beta4: 0.62517,
    },
    stiff: PwFit {
        a: 0.016887,
        alpha1: 0.11125,
        beta1: 10.357,
        beta2: 3.6231,
        beta3: 0.88026,
        beta4: 0.49671,
    },
};

/// Higher-precision coefficients used inside the PBE correlation.
pub(super) const PW92_PRECISE: PwParams = PwParams {
    para: PwFit {
        a: 0.0310907,
        alpha1: 0.21370,
        beta1: 7.5957,
        beta2: 3.5876,
        beta3: 1.6382,
        beta4: 0.49294,
    },
    ferro: PwFit {
        a: 0.01554535,
        alpha1: 0.20548,
        beta1: 14.1189,
        beta2: 6.1977,
        beta3: 3.3662,
        beta4: 0.62517,
    },
    stiff: PwFit {
        a: 0.0168869,
        alpha1: 0.11125,
        beta1: 10.357,
        beta2: 3.6231,
        beta3: 0.88026,
        beta4: 0.49671,
    },
};

/// ec(rs, zeta) and its partial derivatives (w.r.t. rs and zeta) from the
/// three-fit spin interpolation.
pub(super) fn ec_polarized(params: &PwParams, rs: f64, zeta: f64) -> (f64, f64, f64) {
    let fzz0 = 4.0 / (9.0 * (2.0_f64.cbrt() - 1.0));
    let (ep, dep) = params.para.eval(rs);
    let (ef, def) = params.ferro.eval(rs);
    let (mac, dmac) = params.stiff.eval(rs);
    let (ac, dac) = (-mac, -dmac);

    let (fz, dfz) = super::lda_c_vwn::zeta_interpolation(zeta);
    let z3 = zeta * zeta * zeta;
    let z4 = z3 * zeta;

    let ec = ep + ac * fz / fzz0 * (1.0 - z4) + (ef - ep) * fz * z4;
    let dec_drs = dep + dac * fz / fzz0 * (1.0 - z4) + (def - dep) * fz * z4;
    let dec_dz = ac / fzz0 * (dfz * (1.0 - z4) - 4.0 * z3 * fz)
        + (ef - ep) * (dfz * z4 + 4.0 * z3 * fz);
    (ec, dec_drs, dec_dz)
}

/// Spin-paired PW92 correlation; adds into `exc` and `vc`.
pub fn lda_c_pw(n: &DVector<f64>, exc: &mut DVector<f64>, vc: &mut DVector<f64>) {
    for i in 0..n.len() {
        if n[i] < THRESHOLD {
            continue;
        }
        let rs = wigner_seitz_radius(n[i]);
        let (ec, dec) = PW92.para.eval(rs);
        exc[i] += ec;
        vc[i] += ec - rs / 3.0 * dec;
    }
}

/// Spin-polarized PW92 correlation.
pub fn lda_c_pw_spin(n_spin: &[DVector<f64>], exc: &mut DVector<f64>, vc: &mut [DVector<f64>]) {
    for i in 0..n_spin[0].len() {
        let n = n_spin[0][i] + n_spin[1][i];
        if n < THRESHOLD {
            continue;
        }
        let zeta = ((n_spin[0][i] - n_spin[1][i]) / n).clamp(-1.0, 1.0);
        let rs = wigner_seitz_radius(n);
        let (ec, dec_drs, dec_dz) = ec_polarized(&PW92, rs, zeta);
        let common = ec - rs / 3.0 * dec_drs;
        exc[i] += ec;
        vc[0][i] += common + (1.0 - zeta) * dec_dz;
        vc[1][i] += common - (1.0 + zeta) * dec_dz;
    }
}
