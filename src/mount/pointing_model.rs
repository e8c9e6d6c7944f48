//! Two parameter polar misalignment model.
//!
//! ME is the azimuth offset and MA the altitude offset of the mount's
//! pole from the true pole, both in radians. The model predicts the
//! error of the mount (actual - commanded) at hour angle HA:
//!
//! ```text
//! dHA  = ME * cos(HA) * tan(DEC) - MA * sin(HA) * tan(DEC)
//! dDEC = ME * sin(HA) + MA * cos(HA)
//! ```

use itertools::Itertools;
use serde::{Serialize, Deserialize};
use crate::{sky_math::EqCoord, utils::math::*};
use super::error::*;

/// tan(dec) is clamped to this (about 88.8°)
const TAN_DEC_MAX: f64 = 50.0;

/// Relative determinant of normal equations below which the system
/// is considered singular
const MIN_REL_DET: f64 = 1e-10;

/// Calibration points must span at least this angle (in degrees)
const MIN_CALIBR_SPREAD: f64 = 1.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct PointingModel {
    pub me: f64, // in radians
    pub ma: f64, // in radians
}

impl PointingModel {
    pub fn is_zero(&self) -> bool {
        f64::abs(self.me) < 1e-10 && f64::abs(self.ma) < 1e-10
    }

    /// Predicted (dHA, dDEC) in degrees for hour angle and declination
    /// in degrees
    pub(crate) fn predict_error(&self, ha_deg: f64, dec_deg: f64) -> (f64, f64) {
        let ((ha_me, ha_ma), (dec_me, dec_ma)) = coefficients(ha_deg, dec_deg);
        (
            radian_to_degree(self.me * ha_me + self.ma * ha_ma),
            radian_to_degree(self.me * dec_me + self.ma * dec_ma),
        )
    }
}

/// Partial derivatives of (dHA, dDEC) by (ME, MA)
fn coefficients(ha_deg: f64, dec_deg: f64) -> ((f64, f64), (f64, f64)) {
    let ha = degree_to_radian(ha_deg);
    let tan_dec = f64::tan(degree_to_radian(dec_deg)).clamp(-TAN_DEC_MAX, TAN_DEC_MAX);
    let (sin_ha, cos_ha) = f64::sin_cos(ha);
    (
        (cos_ha * tan_dec, -sin_ha * tan_dec),
        (sin_ha, cos_ha),
    )
}

/// Commanded position paired with independently measured position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    pub commanded_ra:  f64, // in hours
    pub commanded_dec: f64, // in degrees
    pub actual_ra:     f64, // in hours
    pub actual_dec:    f64, // in degrees
    pub lst:           f64, // in hours
}

impl CalibrationPoint {
    fn commanded_ha_deg(&self) -> f64 {
        (self.lst - self.commanded_ra) * 15.0
    }
}

/// Pre-compensates target so that misaligned mount lands on it
pub fn compute_correction(
    ra:    f64, // in hours
    dec:   f64, // in degrees
    lst:   f64, // in hours
    model: &PointingModel
) -> (f64, f64) {
    if model.is_zero() {
        return (ra, dec);
    }
    let ha_deg = (lst - ra) * 15.0;
    let (delta_ha_deg, delta_dec_deg) = model.predict_error(ha_deg, dec);
    (
        normalize_hours(ra + delta_ha_deg / 15.0),
        (dec - delta_dec_deg).clamp(-90.0, 90.0),
    )
}

/// Least squares fit of ME and MA. Returns model and RMS of residuals
/// in degrees
pub fn solve_pointing_model(points: &[CalibrationPoint]) -> Result<(PointingModel, f64)> {
    if points.len() < 2 {
        return Err(MountError::InsufficientCalibrationData(points.len()));
    }

    let max_spread = points.iter()
        .tuple_combinations()
        .map(|(p1, p2)| EqCoord::angle_between(
            &EqCoord { ra: p1.commanded_ha_deg() / 15.0, dec: p1.commanded_dec },
            &EqCoord { ra: p2.commanded_ha_deg() / 15.0, dec: p2.commanded_dec },
        ))
        .fold(0.0, f64::max);
    if max_spread < MIN_CALIBR_SPREAD {
        log::warn!("Calibration points span only {:.3}°", max_spread);
        return Err(MountError::SingularCalibrationGeometry);
    }

    // normal equations (A^T A) x = A^T b, two rows of A per point
    let mut ata_00 = 0.0;
    let mut ata_01 = 0.0;
    let mut ata_11 = 0.0;
    let mut atb_0 = 0.0;
    let mut atb_1 = 0.0;

    for pt in points {
        let ha_cmd_deg = pt.commanded_ha_deg();
        let ha_act_deg = (pt.lst - pt.actual_ra) * 15.0;
        let b_ha = degree_to_radian(wrap_180(ha_act_deg - ha_cmd_deg));
        let b_dec = degree_to_radian(pt.actual_dec - pt.commanded_dec);

        let ((ha_me, ha_ma), (dec_me, dec_ma)) = coefficients(ha_cmd_deg, pt.commanded_dec);

        ata_00 += ha_me * ha_me + dec_me * dec_me;
        ata_01 += ha_me * ha_ma + dec_me * dec_ma;
        ata_11 += ha_ma * ha_ma + dec_ma * dec_ma;
        atb_0 += ha_me * b_ha + dec_me * b_dec;
        atb_1 += ha_ma * b_ha + dec_ma * b_dec;
    }

    let scale = ata_00 * ata_11;
    let rel_det = if scale > 0.0 {
        (ata_00 * ata_11 - ata_01 * ata_01) / scale
    } else {
        0.0
    };
    if rel_det < MIN_REL_DET {
        log::warn!("Calibration normal equations are singular (rel. det = {:e})", rel_det);
        return Err(MountError::SingularCalibrationGeometry);
    }

    let (me, ma) = linear_solve2(
        ata_00, ata_01, atb_0,
        ata_01, ata_11, atb_1,
        0.0,
    ).ok_or(MountError::SingularCalibrationGeometry)?;

    let model = PointingModel { me, ma };

    let sum_sq: f64 = points.iter()
        .map(|pt| {
            let (pred_delta_ha, pred_delta_dec) =
                model.predict_error(pt.commanded_ha_deg(), pt.commanded_dec);
            let pred_actual_ra = pt.commanded_ra - pred_delta_ha / 15.0;
            let pred_actual_dec = pt.commanded_dec + pred_delta_dec;
            let ra_err_deg = wrap_180((pred_actual_ra - pt.actual_ra) * 15.0);
            let dec_err_deg = pred_actual_dec - pt.actual_dec;
            ra_err_deg * ra_err_deg + dec_err_deg * dec_err_deg
        })
        .sum();
    let rms = f64::sqrt(sum_sq / (2 * points.len()) as f64);

    log::debug!(
        "Pointing model solved from {} points: ME={:.6} rad, MA={:.6} rad, RMS={:.4}°",
        points.len(), model.me, model.ma, rms
    );

    Ok((model, rms))
}

#[cfg(test)]
fn make_point(model: &PointingModel, lst: f64, ha_deg: f64, dec: f64) -> CalibrationPoint {
    let commanded_ra = normalize_hours(lst - ha_deg / 15.0);
    let (err_ha, err_dec) = model.predict_error(ha_deg, dec);
    CalibrationPoint {
        commanded_ra,
        commanded_dec: dec,
        actual_ra:     normalize_hours(commanded_ra - err_ha / 15.0),
        actual_dec:    dec + err_dec,
        lst,
    }
}

#[test]
fn test_zero_model_is_identity() {
    let model = PointingModel::default();
    for (ra, dec, lst) in [(0.0, 0.0, 0.0), (23.99, 89.9, 5.0), (12.0, -45.0, 18.5)] {
        assert_eq!(compute_correction(ra, dec, lst, &model), (ra, dec));
    }
}

#[test]
fn test_correction_compensates_model() {
    let model = PointingModel { me: 0.01, ma: -0.005 };
    let lst = 10.0;
    for (ra, dec) in [(8.0, 30.0), (12.5, 10.0), (9.9, -20.0)] {
        let (cor_ra, cor_dec) = compute_correction(ra, dec, lst, &model);
        assert!(cor_ra >= 0.0 && cor_ra < 24.0);
        // where the misaligned mount really points when commanded to corrected position
        let (err_ha, err_dec) = model.predict_error((lst - cor_ra) * 15.0, cor_dec);
        let actual_ra = cor_ra - err_ha / 15.0;
        let actual_dec = cor_dec + err_dec;
        assert!(f64::abs(wrap_180((actual_ra - ra) * 15.0)) < 0.05);
        assert!(f64::abs(actual_dec - dec) < 0.05);
    }
}

#[test]
fn test_correction_keeps_ranges() {
    let model = PointingModel { me: 0.05, ma: 0.05 };
    let (ra, dec) = compute_correction(23.999, 89.99, 0.0, &model);
    assert!(ra >= 0.0 && ra < 24.0);
    assert!(dec <= 90.0 && dec >= -90.0);
}

#[test]
fn test_solve_recovers_model() {
    let model = PointingModel { me: 0.01, ma: -0.005 };
    let points = [
        make_point(&model, 10.0, -60.0, 20.0),
        make_point(&model, 10.0, 0.0, 40.0),
        make_point(&model, 10.0, 45.0, 60.0),
        make_point(&model, 10.0, 90.0, -10.0),
    ];
    let (solved, rms) = solve_pointing_model(&points).unwrap();
    assert!(f64::abs(solved.me - model.me) < 1e-6);
    assert!(f64::abs(solved.ma - model.ma) < 1e-6);
    assert!(rms < 1e-6);

    // two points are enough
    let (solved, rms) = solve_pointing_model(&points[..2]).unwrap();
    assert!(f64::abs(solved.me - model.me) < 1e-6);
    assert!(f64::abs(solved.ma - model.ma) < 1e-6);
    assert!(rms < 1e-6);
}

#[test]
fn test_solve_across_ra_wrap() {
    let model = PointingModel { me: -0.003, ma: 0.008 };
    let points = [
        make_point(&model, 0.2, -30.0, 35.0),
        make_point(&model, 0.2, 30.0, 50.0),
        make_point(&model, 23.9, 0.0, 70.0),
    ];
    let (solved, rms) = solve_pointing_model(&points).unwrap();
    assert!(f64::abs(solved.me - model.me) < 1e-6);
    assert!(f64::abs(solved.ma - model.ma) < 1e-6);
    assert!(rms < 1e-6);
}

#[test]
fn test_solve_rejects_degenerate_input() {
    let model = PointingModel { me: 0.01, ma: -0.005 };
    assert!(matches!(
        solve_pointing_model(&[]),
        Err(MountError::InsufficientCalibrationData(0))
    ));
    assert!(matches!(
        solve_pointing_model(&[make_point(&model, 10.0, 30.0, 40.0)]),
        Err(MountError::InsufficientCalibrationData(1))
    ));

    // nearly identical positions
    let clustered = [
        make_point(&model, 10.0, 30.0, 40.0),
        make_point(&model, 10.0, 30.01, 40.01),
    ];
    assert!(matches!(
        solve_pointing_model(&clustered),
        Err(MountError::SingularCalibrationGeometry)
    ));

    // on celestial equator HA equation has no information,
    // so points at the same hour angle are degenerate
    let equator = [
        make_point(&model, 10.0, 30.0, 0.0),
        make_point(&model, 12.0, 30.0, 0.0),
        make_point(&model, 14.0, 30.0, 0.0),
    ];
    assert!(matches!(
        solve_pointing_model(&equator),
        Err(MountError::SingularCalibrationGeometry)
    ));
}
