use std::f64::consts::PI;

#[inline(always)]
pub fn degree_to_radian(degree: f64) -> f64 {
    PI * degree / 180.0
}

#[inline(always)]
pub fn radian_to_degree(radian: f64) -> f64 {
    180.0 * radian / PI
}

/// Wraps hours into [0, 24)
pub fn normalize_hours(hours: f64) -> f64 {
    let result = hours.rem_euclid(24.0);
    // rem_euclid may round up to exactly 24.0 for tiny negative inputs
    if result >= 24.0 { 0.0 } else { result }
}

/// Wraps degrees into [0, 360)
pub fn normalize_degrees(degrees: f64) -> f64 {
    let result = degrees.rem_euclid(360.0);
    if result >= 360.0 { 0.0 } else { result }
}

/// Wraps an angular difference in degrees into [-180, 180]
pub fn wrap_180(degrees: f64) -> f64 {
    let mut result = normalize_degrees(degrees);
    if result > 180.0 {
        result -= 360.0;
    }
    result
}

/// Wraps an hour-angle difference into (-12, 12]
pub fn wrap_12h(hours: f64) -> f64 {
    let mut result = normalize_hours(hours);
    if result > 12.0 {
        result -= 24.0;
    }
    result
}

#[test]
fn test_normalize() {
    assert!(f64::abs(normalize_hours(25.5) - 1.5) < 1e-12);
    assert!(f64::abs(normalize_hours(-0.5) - 23.5) < 1e-12);
    assert!(normalize_hours(-1e-18) < 24.0);
    assert!(f64::abs(normalize_degrees(-90.0) - 270.0) < 1e-12);
    assert!(f64::abs(normalize_degrees(720.0)) < 1e-12);
    assert!(f64::abs(wrap_180(350.0) - (-10.0)) < 1e-12);
    assert!(f64::abs(wrap_180(-350.0) - 10.0) < 1e-12);
    assert!(f64::abs(wrap_180(180.0) - 180.0) < 1e-12);
    assert!(f64::abs(wrap_12h(13.0) - (-11.0)) < 1e-12);
    assert!(f64::abs(wrap_12h(-13.0) - 11.0) < 1e-12);
    assert!(f64::abs(wrap_12h(12.0) - 12.0) < 1e-12);
}

fn det2(
    a11: f64, a12: f64,
    a21: f64, a22: f64
) -> f64 {
    a11 * a22 - a12 * a21
}

/// Solves 2x2 linear system by Cramer's rule. Returns `None` when
/// `|det| <= min_det`
pub fn linear_solve2(
    a11: f64, a12: f64, b1: f64,
    a21: f64, a22: f64, b2: f64,
    min_det: f64,
) -> Option<(f64, f64)> {
    let det = det2(
        a11, a12,
        a21, a22,
    );

    if f64::abs(det) <= min_det {
        return None;
    }

    let det1 = det2(
        b1, a12,
        b2, a22,
    );

    let det2 = det2(
        a11, b1,
        a21, b2,
    );

    Some((det1/det, det2/det))
}

#[test]
fn test_linear_solve2() {
    let (x, y) = linear_solve2(
        3.0,  2.0, 16.0,
        2.0, -1.0,  6.0,
        0.0,
    ).unwrap();

    assert!(f64::abs(x - 4.0) < 0.01);
    assert!(f64::abs(y - 2.0) < 0.01);

    let (x, y) = linear_solve2(
        1.0, 2.0, 35.0,
        1.0, 1.0, 31.0,
        0.0,
    ).unwrap();

    assert!(f64::abs(x - 27.0) < 0.01);
    assert!(f64::abs(y - 4.0) < 0.01);

    assert!(linear_solve2(
        1.0, 2.0, 1.0,
        2.0, 4.0, 2.0,
        1e-20,
    ).is_none());
}
