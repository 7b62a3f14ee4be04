//! Slater exchange.

use super::THRESHOLD;
use nalgebra::DVector;

// -(3/4) (3/pi)^(1/3)
fn exchange_prefactor() -> f64 {
    -0.75 * (3.0 / std::f64::consts::PI).cbrt()
}

/// Spin-paired Slater exchange; adds into `exc` and `vx`.
pub fn lda_x(n: &DVector<f64>, exc: &mut DVector<f64>, vx: &mut DVector<f64>) {
    let c = exchange_prefactor();
    for i in 0..n.len() {
        if n[i] < THRESHOLD {
            continue;
        }
        let ex = c * n[i].cbrt();
        exc[i] += ex;
        vx[i] += 4.0 / 3.0 * ex;
    }
}

/// Spin-polarized Slater exchange via the exact spin-scaling relation
/// `Ex[n_up, n_dn] = (Ex[2 n_up] + Ex[2 n_dn]) / 2`.
pub fn lda_x_spin(n_spin: &[DVector<f64>], exc: &mut DVector<f64>, vx: &mut [DVector<f64>]) {
    let c = exchange_prefactor();
    for i in 0..n_spin[0].len() {
        let n = n_spin[0][i] + n_spin[1][i];
        if n < THRESHOLD {
            continue;
        }
        let mut e = 0.0;
        for (spin, n_s) in n_spin.iter().enumerate() {
            let ex = c * (2.0 * n_s[i]).cbrt();
            // Energy density of the doubled channel, halved.
            e += 0.5 * ex * 2.0 * n_s[i];
            vx[spin][i] += 4.0 / 3.0 * ex;
        }
        exc[i] += e / n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn matches_the_closed_form_at_unit_density() {
        let n = DVector::from_element(1, 1.0);
        let mut exc = DVector::zeros(1);
        let mut vx = DVector::zeros(1);
        lda_x(&n, &mut exc, &mut vx);
        assert_abs_diff_eq!(exc[0], -0.75 * (3.0 / std::f64::consts::PI).cbrt(), epsilon = 1e-14);
        assert_abs_diff_eq!(vx[0], 4.0 / 3.0 * exc[0], epsilon = 1e-14);
    }

    #[test]
    fn potential_is_the_density_derivative() {
        // vx = d(n exc)/dn via central differences.
        let n0 = 0.37;
        let h = 1e-6;
        let e = |n: f64| {
            let mut exc = DVector::zeros(1);
            let mut vx = DVector::zeros(1);
            lda_x(&DVector::from_element(1, n), &mut exc, &mut vx);
            n * exc[0]
        };
        let mut exc = DVector::zeros(1);
        let mut vx = DVector::zeros(1);
        lda_x(&DVector::from_element(1, n0), &mut exc, &mut vx);
        let fd = (e(n0 + h) - e(n0 - h)) / (2.0 * h);
        assert_abs_diff_eq!(vx[0], fd, epsilon = 1e-8);
    }

    #[test]
    fn unpolarized_limit_of_the_spin_variant() {
        let n = DVector::from_element(3, 0.52);
        let half = DVector::from_element(3, 0.26);
        let mut exc_p = DVector::zeros(3);
        let mut vx_p = DVector::zeros(3);
        lda_x(&n, &mut exc_p, &mut vx_p);
        let mut exc_s = DVector::zeros(3);
        let mut vx_s = vec![DVector::zeros(3), DVector::zeros(3)];
        lda_x_spin(&[half.clone(), half], &mut exc_s, &mut vx_s);
        for i in 0..3 {
            assert_abs_diff_eq!(exc_s[i], exc_p[i], epsilon = 1e-13);
            assert_abs_diff_eq!(vx_s[0][i], vx_p[i], epsilon = 1e-13);
            assert_abs_diff_eq!(vx_s[1][i], vx_p[i], epsilon = 1e-13);
        }
    }

    #[test]
    fn vacuum_stays_zero() {
        let n = DVector::from_element(2, 0.0);
        let mut exc = DVector::zeros(2);
        let mut vx = DVector::zeros(2);
        lda_x(&n, &mut exc, &mut vx);
        assert_abs_diff_eq!(exc.norm(), 0.0);
        assert_abs_diff_eq!(vx.norm(), 0.0);
    }
}
