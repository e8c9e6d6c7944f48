use std::fmt::Debug;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use crate::{indi::value_to_sexagesimal, utils::math::*};

/// Observer position. Degrees, east longitude is positive
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
}

impl GeoLocation {
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if lat.is_finite() && lon.is_finite()
        && lat.abs() <= 90.0 && lon.abs() <= 180.0 {
            Some(Self { lat, lon })
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Default, PartialEq)]
pub struct EqCoord {
    pub ra:  f64, // in hours
    pub dec: f64, // in degrees
}

impl EqCoord {
    /// Great circle distance in degrees
    pub fn angle_between(crd1: &EqCoord, crd2: &EqCoord) -> f64 {
        let dec1 = degree_to_radian(crd1.dec);
        let dec2 = degree_to_radian(crd2.dec);
        let sin_diff_dec = f64::sin((dec2 - dec1) / 2.0);
        let sin_diff_ra = f64::sin(degree_to_radian(15.0 * (crd2.ra - crd1.ra)) / 2.0);
        let root_expr =
            sin_diff_dec * sin_diff_dec +
            f64::cos(dec1) * f64::cos(dec2) * sin_diff_ra * sin_diff_ra;
        radian_to_degree(2.0 * f64::asin(f64::sqrt(root_expr).min(1.0)))
    }
}

#[test]
fn test_angle_between() {
    let a = EqCoord { ra: 0.0, dec: 0.0 };
    let b = EqCoord { ra: 6.0, dec: 0.0 };
    assert!(f64::abs(EqCoord::angle_between(&a, &b) - 90.0) < 1e-9);
    let c = EqCoord { ra: 23.0, dec: 0.0 };
    assert!(f64::abs(EqCoord::angle_between(&a, &c) - 15.0) < 1e-9);
    let pole1 = EqCoord { ra: 1.0, dec: 90.0 };
    let pole2 = EqCoord { ra: 13.0, dec: 90.0 };
    assert!(EqCoord::angle_between(&pole1, &pole2) < 1e-6);
}

impl Debug for EqCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EqCoord")
            .field("ra", &value_to_sexagesimal(self.ra, true, 9))
            .field("dec", &value_to_sexagesimal(self.dec, true, 8))
            .finish()
    }
}

#[derive(Clone, Copy, Default, PartialEq)]
pub struct HorizCoord {
    pub az:  f64, // in degrees, 0 = north, 90 = east
    pub alt: f64, // in degrees
}

impl HorizCoord {
    /// Az difference is wrapped into [-180, 180]
    pub fn error_to(&self, target: &HorizCoord) -> (f64, f64) {
        (wrap_180(self.az - target.az), self.alt - target.alt)
    }
}

impl Debug for HorizCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HorizCoord")
            .field("az", &value_to_sexagesimal(self.az, true, 8))
            .field("alt", &value_to_sexagesimal(self.alt, true, 8))
            .finish()
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
#[error("Local sidereal time is unavailable")]
pub struct ConversionUnavailable;

pub fn azalt_to_radec(
    crd: &HorizCoord,
    lat: f64, // in degrees
    lst: Option<f64>, // in hours
) -> Result<EqCoord, ConversionUnavailable> {
    let lst = lst.ok_or(ConversionUnavailable)?;

    let az = degree_to_radian(crd.az);
    let alt = degree_to_radian(crd.alt);
    let lat = degree_to_radian(lat);

    let sin_dec =
        f64::sin(alt) * f64::sin(lat) +
        f64::cos(alt) * f64::cos(lat) * f64::cos(az);
    let dec = f64::asin(sin_dec.clamp(-1.0, 1.0));

    let cos_dec = f64::cos(dec);
    let ha = if f64::abs(cos_dec) < 1e-10 {
        // pole: hour angle is undefined
        0.0
    } else {
        let sin_ha = -f64::sin(az) * f64::cos(alt) / cos_dec;
        let cos_ha =
            (f64::sin(alt) - f64::sin(dec) * f64::sin(lat)) /
            (cos_dec * f64::cos(lat));
        f64::atan2(sin_ha, cos_ha)
    };

    Ok(EqCoord {
        ra:  normalize_hours(lst - radian_to_degree(ha) / 15.0),
        dec: radian_to_degree(dec),
    })
}

pub fn radec_to_azalt(
    crd: &EqCoord,
    lat: f64, // in degrees
    lst: Option<f64>, // in hours
) -> Result<HorizCoord, ConversionUnavailable> {
    let lst = lst.ok_or(ConversionUnavailable)?;

    let ha = degree_to_radian(wrap_12h(lst - crd.ra) * 15.0);
    let dec = degree_to_radian(crd.dec);
    let lat = degree_to_radian(lat);

    let sin_alt =
        f64::sin(dec) * f64::sin(lat) +
        f64::cos(dec) * f64::cos(lat) * f64::cos(ha);
    let alt = f64::asin(sin_alt.clamp(-1.0, 1.0));

    let cos_alt = f64::cos(alt);
    let az = if f64::abs(cos_alt) < 1e-10 {
        0.0
    } else {
        let sin_az = -f64::sin(ha) * f64::cos(dec) / cos_alt;
        let cos_az =
            (f64::sin(dec) - f64::sin(lat) * f64::sin(alt)) /
            (f64::cos(lat) * cos_alt);
        f64::atan2(sin_az, cos_az)
    };

    Ok(HorizCoord {
        az:  normalize_degrees(radian_to_degree(az)),
        alt: radian_to_degree(alt),
    })
}

#[test]
fn test_zenith_is_on_meridian() {
    for az in [0.0, 45.0, 180.0, 300.0] {
        let eq = azalt_to_radec(
            &HorizCoord { az, alt: 90.0 },
            39.0,
            Some(10.0)
        ).unwrap();
        assert!(f64::abs(eq.dec - 39.0) < 1e-9);
        assert!(f64::abs(eq.ra - 10.0) < 1e-9);
    }
}

#[test]
fn test_conversion_requires_lst() {
    let hz = HorizCoord { az: 90.0, alt: 45.0 };
    assert_eq!(azalt_to_radec(&hz, 39.0, None), Err(ConversionUnavailable));
    let eq = EqCoord { ra: 1.0, dec: 20.0 };
    assert_eq!(radec_to_azalt(&eq, 39.0, None), Err(ConversionUnavailable));
}

#[test]
fn test_azalt_radec_round_trip() {
    let mut checked = 0;
    for lat in [-88.5, -60.0, -33.9, 0.0, 12.3, 39.917, 70.0, 88.5] {
        for lst in [0.0, 3.7, 12.0, 18.25, 23.99] {
            for az_i in 0..24 {
                let az = az_i as f64 * 15.0 + 0.3;
                for alt in [-4.9, 0.0, 10.0, 33.3, 60.0, 85.0, 89.5] {
                    let hz = HorizCoord { az, alt };
                    let eq = azalt_to_radec(&hz, lat, Some(lst)).unwrap();
                    if f64::abs(eq.dec) > 89.9 {
                        continue; // too close to the pole
                    }
                    assert!(eq.ra >= 0.0 && eq.ra < 24.0);
                    let back = radec_to_azalt(&eq, lat, Some(lst)).unwrap();
                    let (az_err, alt_err) = back.error_to(&hz);
                    assert!(f64::abs(az_err) < 1e-6, "az {} -> {}", az, back.az);
                    assert!(f64::abs(alt_err) < 1e-6, "alt {} -> {}", alt, back.alt);
                    checked += 1;
                }
            }
        }
    }
    assert!(checked > 1000);
}

#[test]
fn test_meridian_transit() {
    // object with ra = lst transits the meridian at alt = 90 - |lat - dec|
    let hz = radec_to_azalt(
        &EqCoord { ra: 5.0, dec: 20.0 },
        40.0,
        Some(5.0)
    ).unwrap();
    assert!(f64::abs(hz.alt - 70.0) < 1e-9);
    assert!(f64::abs(hz.az - 180.0) < 1e-9);
}

pub fn calc_julian_day(date: &NaiveDate) -> i64 {
    let mon = date.month() as i64;
    let day = date.day() as i64;
    let year = date.year() as i64;
    let a = (14 - mon) / 12;
    let y = year + 4800 - a;
    let m = mon + 12 * a - 3;
    day + (153 * m + 2)/5 + 365*y + y/4 - y/100 + y/400 - 32045
}

#[test]
fn test_calc_julian_day() {
    assert_eq!(
        calc_julian_day(&NaiveDate::from_ymd_opt(2001, 1, 1).unwrap()),
        2_451_911
    );
}

pub fn calc_julian_time(dt: &NaiveDateTime) -> f64 {
    let julian_day = calc_julian_day(&dt.date()) as f64;
    let hour = dt.hour() as f64;
    let min = dt.minute() as f64;
    let sec = dt.second() as f64 + (dt.nanosecond() / 1_000_000) as f64 / 1000.0;
    julian_day + (hour - 12.0) / 24.0 + min / 1440.0 + sec / 86400.0
}

/// Local mean sidereal time in hours for UTC time and east longitude in degrees
pub fn calc_local_sidereal_time(utc: &NaiveDateTime, lon: f64) -> f64 {
    let dtt = calc_julian_time(utc) - 2451545.0;
    let t = dtt / 36525.0;
    let gmst_degrees =
        280.46061837
        + 360.98564736629 * dtt
        + 0.000387933 * t * t
        - (t * t * t) / 38710000.0;
    normalize_hours((gmst_degrees + lon) / 15.0)
}

#[test]
fn test_calc_local_sidereal_time() {
    // J2000.0 epoch: GMST = 18h 41m 50.55s
    let j2000 = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
        .and_hms_opt(12, 0, 0).unwrap();
    let gmst = calc_local_sidereal_time(&j2000, 0.0);
    assert!(f64::abs(gmst - 18.697375) < 1e-4);

    let lst = calc_local_sidereal_time(&j2000, -105.0);
    assert!(f64::abs(lst - (18.697375 - 7.0)) < 1e-4);
}
