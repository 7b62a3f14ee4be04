//! Exchange-correlation functionals.
//!
//! All functionals return the *per-particle* energy density `exc` together
//! with the potential `vxc` per spin channel. GGA functionals additionally
//! return derivatives with respect to the contracted density gradients
//! (`vsigma`); the plumbing that turns those into a potential lives in
//! [`crate::gga`].
//!
//! Densities below [`THRESHOLD`] are treated as vacuum: every output is
//! zeroed there instead of evaluating the parameterizations outside their
//! domain.

mod gga_c_pbe;
mod gga_x_pbe;
mod lda_c_pw;
mod lda_c_vwn;
mod lda_x;

use crate::error::{PwDftError, Result};
use nalgebra::DVector;

/// Densities below this value are treated as zero.
pub const THRESHOLD: f64 = 1e-12;

/// Functional rung, deciding which density ingredients are required.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XcType {
    Lda,
    Gga,
    MetaGga,
}

/// The supported exchange-correlation functional pieces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Functional {
    /// Slater exchange.
    LdaX,
    /// Vosko-Wilk-Nusair (parameterization V) correlation.
    LdaCVwn,
    /// Perdew-Wang 1992 correlation.
    LdaCPw,
    /// Perdew-Burke-Ernzerhof exchange.
    GgaXPbe,
    /// Perdew-Burke-Ernzerhof correlation.
    GgaCPbe,
    /// A functional that contributes nothing; a seam for testing custom
    /// functional handling without changing any energy.
    MockXc,
}

impl Functional {
    pub fn xc_type(&self) -> XcType {
        match self {
            Functional::LdaX | Functional::LdaCVwn | Functional::LdaCPw => XcType::Lda,
            Functional::GgaXPbe | Functional::GgaCPbe => XcType::Gga,
            Functional::MockXc => XcType::Lda,
        }
    }
}

/// Parse a comma-separated functional string, e.g. `"lda,vwn"` or `"pbe"`.
pub fn parse_functionals(xc: &str) -> Result<Vec<Functional>> {
    let mut out = Vec::new();
    for token in xc.split(',') {
        match token.trim().to_lowercase().as_str() {
            "" => {}
            "lda" | "s" | "slater" | "lda_x" => out.push(Functional::LdaX),
            "vwn" | "vwn5" | "lda_c_vwn" => out.push(Functional::LdaCVwn),
            "pw" | "lda_c_pw" => out.push(Functional::LdaCPw),
            "svwn" => {
                out.push(Functional::LdaX);
                out.push(Functional::LdaCVwn);
            }
            "pbe" => {
                out.push(Functional::GgaXPbe);
                out.push(Functional::GgaCPbe);
            }
            "gga_x_pbe" => out.push(Functional::GgaXPbe),
            "gga_c_pbe" => out.push(Functional::GgaCPbe),
            "mock" | "mock_xc" => out.push(Functional::MockXc),
            other => return Err(PwDftError::UnknownFunctional(other.to_string())),
        }
    }
    Ok(out)
}

/// The highest rung needed by a list of functional pieces.
pub fn xc_type_of(functionals: &[Functional]) -> XcType {
    let mut ty = XcType::Lda;
    for f in functionals {
        if f.xc_type() == XcType::MetaGga {
            return XcType::MetaGga;
        }
        if f.xc_type() == XcType::Gga {
            ty = XcType::Gga;
        }
    }
    ty
}

/// Output of an exchange-correlation evaluation on the real-space grid.
pub struct XcOutput {
    /// Per-particle energy density.
    pub exc: DVector<f64>,
    /// Potential per spin channel.
    pub vxc: Vec<DVector<f64>>,
    /// Derivatives w.r.t. the contracted gradients; `[uu]` spin-paired,
    /// `[uu, ud, dd]` spin-polarized. `None` for pure LDA stacks.
    pub vsigma: Option<Vec<DVector<f64>>>,
    /// Derivatives w.r.t. the kinetic-energy density, for meta-GGA pieces.
    pub vtau: Option<Vec<DVector<f64>>>,
}

/// Evaluate a functional stack on spin densities `n_spin` (one vector per
/// channel) with contracted gradients `sigma` where a GGA piece needs them.
///
/// Contributions are additive in `exc`, `vxc`, and `vsigma`.
pub fn get_xc(
    functionals: &[Functional],
    n_spin: &[DVector<f64>],
    sigma: Option<&[DVector<f64>]>,
) -> Result<XcOutput> {
    let nspin = n_spin.len();
    let ns = n_spin[0].len();
    let mut exc = DVector::zeros(ns);
    let mut vxc = vec![DVector::zeros(ns); nspin];

    // LDA pieces first; the contributions are additive, so the order does
    // not matter.
    for f in functionals {
        match (f, nspin) {
            (Functional::MockXc, _) => {}
            (Functional::LdaX, 1) => lda_x::lda_x(&n_spin[0], &mut exc, &mut vxc[0]),
            (Functional::LdaX, _) => lda_x::lda_x_spin(n_spin, &mut exc, &mut vxc),
            (Functional::LdaCVwn, 1) => lda_c_vwn::lda_c_vwn(&n_spin[0], &mut exc, &mut vxc[0]),
            (Functional::LdaCVwn, _) => lda_c_vwn::lda_c_vwn_spin(n_spin, &mut exc, &mut vxc),
            (Functional::LdaCPw, 1) => lda_c_pw::lda_c_pw(&n_spin[0], &mut exc, &mut vxc[0]),
            (Functional::LdaCPw, _) => lda_c_pw::lda_c_pw_spin(n_spin, &mut exc, &mut vxc),
            (Functional::GgaXPbe | Functional::GgaCPbe, _) => {}
        }
    }

    let needs_sigma = functionals.iter().any(|f| f.xc_type() == XcType::Gga);
    if !needs_sigma {
        return Ok(XcOutput {
            exc,
            vxc,
            vsigma: None,
            vtau: None,
        });
    }
    let sigma = sigma.ok_or_else(|| {
        PwDftError::Config("GGA functional evaluated without density gradients".into())
    })?;
    let ncomp = if nspin == 2 { 3 } else { 1 };
    let mut vsigma = vec![DVector::zeros(ns); ncomp];

    for f in functionals {
        match (f, nspin) {
            (Functional::GgaXPbe, 1) => gga_x_pbe::gga_x_pbe(
                &n_spin[0],
                &sigma[0],
                &mut exc,
                &mut vxc[0],
                &mut vsigma[0],
            ),
            (Functional::GgaXPbe, _) => {
                gga_x_pbe::gga_x_pbe_spin(n_spin, sigma, &mut exc, &mut vxc, &mut vsigma)
            }
            (Functional::GgaCPbe, 1) => gga_c_pbe::gga_c_pbe(
                &n_spin[0],
                &sigma[0],
                &mut exc,
                &mut vxc[0],
                &mut vsigma[0],
            ),
            (Functional::GgaCPbe, _) => {
                gga_c_pbe::gga_c_pbe_spin(n_spin, sigma, &mut exc, &mut vxc, &mut vsigma)
            }
            _ => {}
        }
    }

    Ok(XcOutput {
        exc,
        vxc,
        vsigma: Some(vsigma),
        vtau: None,
    })
}

/// Wigner-Seitz radius for density `n`.
pub(crate) fn wigner_seitz_radius(n: f64) -> f64 {
    (3.0 / (4.0 * std::f64::consts::PI * n)).cbrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn parse_composite_names() {
        assert_eq!(
            parse_functionals("lda,vwn").unwrap(),
            vec![Functional::LdaX, Functional::LdaCVwn]
        );
        assert_eq!(
            parse_functionals("pbe").unwrap(),
            vec![Functional::GgaXPbe, Functional::GgaCPbe]
        );
        assert_eq!(parse_functionals("svwn").unwrap().len(), 2);
        assert!(parse_functionals("b3lyp").is_err());
    }

    #[test]
    fn rung_detection() {
        assert_eq!(
            xc_type_of(&parse_functionals("lda,vwn").unwrap()),
            XcType::Lda
        );
        assert_eq!(xc_type_of(&parse_functionals("pbe").unwrap()), XcType::Gga);
    }

    #[test]
    fn mock_functional_contributes_nothing() {
        let n = vec![DVector::from_element(4, 0.3)];
        let out = get_xc(&[Functional::MockXc], &n, None).unwrap();
        assert_abs_diff_eq!(out.exc.norm(), 0.0);
        assert_abs_diff_eq!(out.vxc[0].norm(), 0.0);
        assert!(out.vsigma.is_none());
    }

    #[test]
    fn gga_without_gradients_is_an_error() {
        let n = vec![DVector::from_element(4, 0.3)];
        assert!(get_xc(&parse_functionals("pbe").unwrap(), &n, None).is_err());
    }

    #[test]
    fn contributions_are_additive() {
        let n = vec![DVector::from_element(4, 0.2)];
        let x = get_xc(&[Functional::LdaX], &n, None).unwrap();
        let c = get_xc(&[Functional::LdaCVwn], &n, None).unwrap();
        let xc = get_xc(&[Functional::LdaX, Functional::LdaCVwn], &n, None).unwrap();
        for i in 0..4 {
            assert_abs_diff_eq!(xc.exc[i], x.exc[i] + c.exc[i], epsilon = 1e-14);
            assert_abs_diff_eq!(xc.vxc[0][i], x.vxc[0][i] + c.vxc[0][i], epsilon = 1e-14);
        }
    }
}
