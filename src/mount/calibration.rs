use crate::{plate_solve::PositionVerifier, sky_math::*};
use super::{consts::*, error::*, fleet::*, pointing_model::*, unit::*};

/// Targets spread over the sky (az, alt)
pub const CALIBR_TARGETS: [(f64, f64); 3] = [
    (90.0,  45.0), // east
    (180.0, 50.0), // south
    (270.0, 45.0), // west
];

#[derive(Debug, Clone)]
pub struct CalibrationSample {
    pub target:      HorizCoord,
    pub point:       CalibrationPoint,
    pub measured_hz: Option<HorizCoord>,
}

#[derive(Debug)]
pub struct CalibrationResult {
    pub model:   PointingModel,
    pub rms:     f64, // in degrees
    pub samples: Vec<CalibrationSample>,
    pub skipped: Vec<(HorizCoord, MountError)>,
}

impl CalibrationResult {
    pub fn is_consistent(&self) -> bool {
        self.rms <= CALIBR_WARN_RMS
    }
}

/// Slews to calibration targets without pointing model, measures real
/// position at each of them and fits misalignment model. Model is saved
/// for the unit. Targets that fail are skipped
pub fn calibrate_pointing(
    fleet:    &FleetController,
    unit:     &MountUnit,
    verifier: &mut dyn PositionVerifier,
) -> Result<CalibrationResult> {
    unit.location()?;
    verifier.check_available()?;

    let mut samples = Vec::new();
    let mut skipped = Vec::new();
    for (idx, (az, alt)) in CALIBR_TARGETS.iter().enumerate() {
        let target = HorizCoord { az: *az, alt: *alt };
        log::info!(
            "{}: calibration target {}/{}: {:?}",
            unit.device(), idx + 1, CALIBR_TARGETS.len(), target
        );
        match measure_calibration_point(unit, verifier, &target) {
            Ok(sample) => {
                log::info!("{}: calibration point {:?}", unit.device(), sample.point);
                samples.push(sample);
            }
            Err(err) => {
                log::error!("{}: calibration target {:?} skipped: {}", unit.device(), target, err);
                skipped.push((target, err));
            }
        }
    }

    if samples.len() < 2 {
        return Err(MountError::InsufficientCalibrationData(samples.len()));
    }

    let points: Vec<_> = samples.iter().map(|s| s.point).collect();
    let (model, rms) = solve_pointing_model(&points)?;
    let result = CalibrationResult { model, rms, samples, skipped };
    if !result.is_consistent() {
        log::warn!("{}: calibration RMS {:.3}° is too big", unit.device(), rms);
    }

    fleet.save_pointing_model(unit.id(), &model)?;
    Ok(result)
}

fn measure_calibration_point(
    unit:     &MountUnit,
    verifier: &mut dyn PositionVerifier,
    target:   &HorizCoord,
) -> Result<CalibrationSample> {
    let (commanded, _) = unit.horiz_to_eq(target)?;
    unit.goto_uncorrected(&commanded)?;
    sleep(unit.timing().calibr_settle);

    let actual = verifier.measure(unit)?;

    // time has passed while measuring
    let lst = unit.lst().ok_or(MountError::ConversionUnavailable)?;

    Ok(CalibrationSample {
        target: *target,
        point: CalibrationPoint {
            commanded_ra:  commanded.ra,
            commanded_dec: commanded.dec,
            actual_ra:     actual.ra,
            actual_dec:    actual.dec,
            lst,
        },
        measured_hz: unit.eq_to_horiz(&actual).ok(),
    })
}

#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::{indi::{mock::MockBus, PropertyBus}, options::{ConfigStore, FleetConfig}};

/// Position of mount misaligned according to `model`
#[cfg(test)]
struct MisalignedVerifier {
    model:       PointingModel,
    fail_after:  usize,
    count:       usize,
}

#[cfg(test)]
impl PositionVerifier for MisalignedVerifier {
    fn measure(&mut self, unit: &MountUnit) -> Result<EqCoord> {
        self.count += 1;
        if self.count > self.fail_after {
            return Err(MountError::PlateSolveFailed("clouds".to_string()));
        }
        let cmd = unit.get_equatorial()
            .ok_or_else(|| MountError::PositionUnavailable(unit.device().to_string()))?;
        let lst = unit.lst().ok_or(MountError::ConversionUnavailable)?;
        let (err_ha, err_dec) = self.model.predict_error((lst - cmd.ra) * 15.0, cmd.dec);
        Ok(EqCoord {
            ra:  crate::utils::math::normalize_hours(cmd.ra - err_ha / 15.0),
            dec: cmd.dec + err_dec,
        })
    }
}

#[cfg(test)]
fn calibration_fleet() -> FleetController {
    calibration_fleet_with_bus().1
}

#[cfg(test)]
fn calibration_fleet_with_bus() -> (Arc<MockBus>, FleetController) {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.slew_on_goto("Mount 1");
    let mut config = FleetConfig::default();
    config.set_location(&GeoLocation::new(40.0, -105.0).unwrap());
    // stale model must not affect calibration slews
    config.pointing_models.insert("1".to_string(), PointingModel { me: 0.1, ma: 0.1 });
    let bus_dyn: Arc<dyn PropertyBus> = bus.clone();
    let fleet = FleetController::new(
        bus_dyn,
        Arc::new(ConfigStore::in_memory(config)),
        MountTiming::instant()
    );
    (bus, fleet)
}

#[test]
fn test_calibrate_pointing() {
    let fleet = calibration_fleet();
    let unit = fleet.unit(1).unwrap();
    let model = PointingModel { me: 0.01, ma: -0.005 };
    let mut verifier = MisalignedVerifier { model, fail_after: usize::MAX, count: 0 };

    let result = calibrate_pointing(&fleet, &unit, &mut verifier).unwrap();
    assert_eq!(result.samples.len(), 3);
    assert!(result.skipped.is_empty());
    assert!(result.is_consistent());
    assert!(result.rms < 1e-6);
    assert!(f64::abs(result.model.me - model.me) < 1e-6);
    assert!(f64::abs(result.model.ma - model.ma) < 1e-6);
    assert_eq!(fleet.store().pointing_model(1), result.model);
}

#[test]
fn test_calibrate_pointing_skips_failed_targets() {
    let fleet = calibration_fleet();
    let unit = fleet.unit(1).unwrap();
    let model = PointingModel { me: 0.01, ma: -0.005 };

    let mut verifier = MisalignedVerifier { model, fail_after: 2, count: 0 };
    let result = calibrate_pointing(&fleet, &unit, &mut verifier).unwrap();
    assert_eq!(result.samples.len(), 2);
    assert_eq!(result.skipped.len(), 1);
    assert!(matches!(result.skipped[0].1, MountError::PlateSolveFailed(_)));

    let mut verifier = MisalignedVerifier { model, fail_after: 1, count: 0 };
    assert!(matches!(
        calibrate_pointing(&fleet, &unit, &mut verifier),
        Err(MountError::InsufficientCalibrationData(1))
    ));
}

#[test]
fn test_calibrate_pointing_without_solver_does_not_move() {
    let (bus, fleet) = calibration_fleet_with_bus();
    let unit = fleet.unit(1).unwrap();
    let mut solver = crate::plate_solve::PlateSolver::NotAvailable;
    assert!(matches!(
        calibrate_pointing(&fleet, &unit, &mut solver),
        Err(MountError::PlateSolveFailed(_))
    ));
    assert!(bus.writes_for("Mount 1").iter().all(|w| !w.starts_with("EQUATORIAL_EOD_COORD")));
    assert!(bus.writes().is_empty());
    assert_eq!(fleet.store().pointing_model(1), PointingModel { me: 0.1, ma: 0.1 });
}
