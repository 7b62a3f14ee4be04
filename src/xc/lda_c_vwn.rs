//! Vosko-Wilk-Nusair correlation (parameterization V).

use super::{wigner_seitz_radius, THRESHOLD};
use nalgebra::DVector;

// Pade fit parameters (A, x0, b, c) of the paramagnetic and ferromagnetic
// correlation energies and of the spin stiffness.
const PARA: VwnFit = VwnFit {
    a: 0.0310907,
    x0: -0.10498,
    b: 3.72744,
    c: 12.9352,
};
const FERRO: VwnFit = VwnFit {
    a: 0.01554535,
    x0: -0.32500,
    b: 7.06042,
    c: 18.0578,
};
const STIFF: VwnFit = VwnFit {
    a: -0.01688685,
    x0: -0.0047584,
    b: 1.13107,
    c: 13.0045,
};

struct VwnFit {
    a: f64,
    x0: f64,
    b: f64,
    c: f64,
}

impl VwnFit {
    // Correlation energy of one fit and its derivative w.r.t. x = sqrt(rs).
    fn eval(&self, x: f64) -> (f64, f64) {
        let (a, x0, b, c) = (self.a, self.x0, self.b, self.c);
        let xx = x * x + b * x + c;
        let x0x = x0 * x0 + b * x0 + c;
        let q = (4.0 * c - b * b).sqrt();
        let tx = 2.0 * x + b;
        let f1 = 2.0 * b / q;
        let f2 = b * x0 / x0x;
        let f3 = 2.0 * (2.0 * x0 + b) / q;
        let atan_term = (q / tx).atan();

        let e = a
            * ((x * x / xx).ln() + f1 * atan_term
                - f2 * (((x - x0) * (x - x0) / xx).ln() + f3 * atan_term));

        let datan = -2.0 * q / (tx * tx + q * q);
        let de = a
            * (2.0 / x - tx / xx + f1 * datan
                - f2 * (2.0 / (x - x0) - tx / xx + f3 * datan));
        (e, de)
    }
}

/// Spin-paired VWN correlation; adds into `exc` and `vc`.
pub fn lda_c_vwn(n: &DVector<f64>, exc: &mut DVector<f64>, vc: &mut DVector<f64>) {
    for i in 0..n.len() {
        if n[i] < THRESHOLD {
            continue;
        }
        let x = wigner_seitz_radius(n[i]).sqrt();
        let (ec, dec) = PARA.eval(x);
        exc[i] += ec;
        // vc = ec + n dec/dn = ec - (x/6) dec/dx
        vc[i] += ec - x / 6.0 * dec;
    }
}

/// Spin-polarized VWN correlation, interpolating between the paramagnetic
/// and ferromagnetic fits with the spin stiffness.
pub fn lda_c_vwn_spin(n_spin: &[DVector<f64>], exc: &mut DVector<f64>, vc: &mut [DVector<f64>]) {
    let fzz0 = 4.0 / (9.0 * (2.0_f64.cbrt() - 1.0));
    for i in 0..n_spin[0].len() {
        let n = n_spin[0][i] + n_spin[1][i];
        if n < THRESHOLD {
            continue;
        }
        let zeta = ((n_spin[0][i] - n_spin[1][i]) / n).clamp(-1.0, 1.0);
        let x = wigner_seitz_radius(n).sqrt();

        let (ep, dep) = PARA.eval(x);
        let (ef, def) = FERRO.eval(x);
        let (ac, dac) = STIFF.eval(x);

        let (fz, dfz) = zeta_interpolation(zeta);
        let z3 = zeta * zeta * zeta;
        let z4 = z3 * zeta;

        let ec = ep + ac * fz / fzz0 * (1.0 - z4) + (ef - ep) * fz * z4;
        let dec_dx = dep + dac * fz / fzz0 * (1.0 - z4) + (def - dep) * fz * z4;
        let dec_dz = ac / fzz0 * (dfz * (1.0 - z4) - 4.0 * z3 * fz)
            + (ef - ep) * (dfz * z4 + 4.0 * z3 * fz);

        let common = ec - x / 6.0 * dec_dx;
        exc[i] += ec;
        vc[0][i] += common + (1.0 - zeta) * dec_dz;
        vc[1][i] += common - (1.0 + zeta) * dec_dz;
    }
}

// f(zeta) and its derivative; the exchange-like interpolation function.
pub(super) fn zeta_interpolation(zeta: f64) -> (f64, f64) {
    let denom = 2.0_f64.powf(4.0 / 3.0) - 2.0;
    let up = (1.0 + zeta).max(0.0);
    let dn = (1.0 - zeta).max(0.0);
    let f = (up.powf(4.0 / 3.0) + dn.powf(4.0 / 3.0) - 2.0) / denom;
    let df = 4.0 / 3.0 * (up.cbrt() - dn.cbrt()) / denom;
    (f, df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn potential_is_the_density_derivative() {
        let n0 = 0.21;
        let h = 1e-6;
        let e = |n: f64| {
            let mut exc = DVector::zeros(1);
            let mut vc = DVector::zeros(1);
            lda_c_vwn(&DVector::from_element(1, n), &mut exc, &mut vc);
            n * exc[0]
        };
        let mut exc = DVector::zeros(1);
        let mut vc = DVector::zeros(1);
        lda_c_vwn(&DVector::from_element(1, n0), &mut exc, &mut vc);
        let fd = (e(n0 + h) - e(n0 - h)) / (2.0 * h);
        assert_abs_diff_eq!(vc[0], fd, epsilon = 1e-8);
    }

    #[test]
    fn unpolarized_limit_of_the_spin_variant() {
        let n = DVector::from_element(2, 0.4);
        let half = DVector::from_element(2, 0.2);
        let mut exc_p = DVector::zeros(2);
        let mut vc_p = DVector::zeros(2);
        lda_c_vwn(&n, &mut exc_p, &mut vc_p);
        let mut exc_s = DVector::zeros(2);
        let mut vc_s = vec![DVector::zeros(2), DVector::zeros(2)];
        lda_c_vwn_spin(&[half.clone(), half], &mut exc_s, &mut vc_s);
        for i in 0..2 {
            assert_abs_diff_eq!(exc_s[i], exc_p[i], epsilon = 1e-12);
            assert_abs_diff_eq!(vc_s[0][i], vc_p[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn polarized_potentials_are_partial_derivatives() {
        let (nu, nd) = (0.3, 0.12);
        let h = 1e-6;
        let e = |nu: f64, nd: f64| {
            let mut exc = DVector::zeros(1);
            let mut vc = vec![DVector::zeros(1), DVector::zeros(1)];
            lda_c_vwn_spin(
                &[DVector::from_element(1, nu), DVector::from_element(1, nd)],
                &mut exc,
                &mut vc,
            );
            (nu + nd) * exc[0]
        };
        let mut exc = DVector::zeros(1);
        let mut vc = vec![DVector::zeros(1), DVector::zeros(1)];
        lda_c_vwn_spin(
            &[DVector::from_element(1, nu), DVector::from_element(1, nd)],
            &mut exc,
            &mut vc,
        );
        let fd_up = (e(nu + h, nd) - e(nu - h, nd)) / (2.0 * h);
        let fd_dn = (e(nu, nd + h) - e(nu, nd - h)) / (2.0 * h);
        assert_abs_diff_eq!(vc[0][0], fd_up, epsilon = 1e-7);
        assert_abs_diff_eq!(vc[1][0], fd_dn, epsilon = 1e-7);
    }

    #[test]
    fn correlation_energy_is_negative() {
        for &n in &[1e-3, 0.1, 1.0, 10.0] {
            let mut exc = DVector::zeros(1);
            let mut vc = DVector::zeros(1);
            lda_c_vwn(&DVector::from_element(1, n), &mut exc, &mut vc);
            assert!(exc[0] < 0.0);
        }
    }
}
