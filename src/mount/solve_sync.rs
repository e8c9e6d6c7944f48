use std::collections::BTreeMap;
use crate::{plate_solve::PositionVerifier, sky_math::*};
use super::{consts::*, error::*, fleet::*, unit::*};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointingQuality {
    Excellent,
    Good,
    NeedsCalibration,
}

impl PointingQuality {
    pub fn from_error(error_arcmin: f64) -> Self {
        if error_arcmin < POINTING_EXCELLENT_ARCMIN {
            Self::Excellent
        } else if error_arcmin < POINTING_GOOD_ARCMIN {
            Self::Good
        } else {
            Self::NeedsCalibration
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::NeedsCalibration => "recalibrate",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolveSyncResult {
    pub unit_id:      u32,
    pub solved:       EqCoord,
    /// Position reported by mount before sync
    pub reported:     Option<EqCoord>,
    pub error_arcmin: Option<f64>,
    /// `None` if mount was not synced (verification only)
    pub sync:         Option<SyncReport>,
}

impl SolveSyncResult {
    pub fn quality(&self) -> Option<PointingQuality> {
        self.error_arcmin.map(PointingQuality::from_error)
    }
}

/// Measures where mount really points and syncs mount to measured
/// position. With `verify_only` mount is not synced and only pointing
/// error is reported
pub fn solve_and_sync(
    unit:        &MountUnit,
    verifier:    &mut dyn PositionVerifier,
    verify_only: bool,
) -> Result<SolveSyncResult> {
    if !unit.is_connected() {
        return Err(MountError::NotConnected(unit.device().to_string()));
    }
    unit.location()?;
    verifier.check_available()?;

    let reported = unit.get_equatorial();
    let solved = verifier.measure(unit)?;
    let error_arcmin = reported
        .as_ref()
        .map(|reported| 60.0 * EqCoord::angle_between(reported, &solved));
    log::info!(
        "{}: mount reports {:?}, solved {:?}, pointing error = {:?} arcmin",
        unit.device(), reported, solved, error_arcmin
    );

    let sync = if verify_only {
        None
    } else {
        Some(unit.sync_equatorial(solved.ra, solved.dec)?)
    };

    Ok(SolveSyncResult {
        unit_id: unit.id(),
        solved,
        reported,
        error_arcmin,
        sync,
    })
}

/// Runs `solve_and_sync` for selected units one by one. Each unit gets
/// own verifier (usually plate solver with camera of this unit)
pub fn solve_and_sync_all(
    fleet:            &FleetController,
    filter:           Option<u32>,
    verify_only:      bool,
    mut verifier_for: impl FnMut(u32) -> Box<dyn PositionVerifier>,
) -> Result<BTreeMap<u32, Result<SolveSyncResult>>> {
    let units = match filter {
        Some(unit_id) => vec![fleet.unit(unit_id)?],
        None => fleet.discover(),
    };
    if units.is_empty() {
        return Err(MountError::NoUnitsDiscovered);
    }
    let mut results = BTreeMap::new();
    for unit in &units {
        let mut verifier = verifier_for(unit.id());
        let result = solve_and_sync(unit, verifier.as_mut(), verify_only);
        if let Err(err) = &result {
            log::error!("{}: solve and sync failed: {}", unit.device(), err);
        }
        results.insert(unit.id(), result);
    }
    Ok(results)
}

#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::{
    indi::{mock::MockBus, PropertyBus},
    options::{ConfigStore, FleetConfig},
    plate_solve::PlateSolver,
};

/// Sky is shifted from where mount thinks it points
#[cfg(test)]
struct ShiftedSky {
    ra_shift:  f64, // in hours
    dec_shift: f64, // in degrees
}

#[cfg(test)]
impl PositionVerifier for ShiftedSky {
    fn measure(&mut self, unit: &MountUnit) -> Result<EqCoord> {
        let reported = unit.get_equatorial()
            .ok_or_else(|| MountError::PositionUnavailable(unit.device().to_string()))?;
        Ok(EqCoord { ra: reported.ra + self.ra_shift, dec: reported.dec + self.dec_shift })
    }
}

#[cfg(test)]
fn solve_sync_fleet() -> (Arc<MockBus>, FleetController) {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.add_mount("Mount 2", 40.0, 6.0);
    bus.put("Mount 3", "CONNECTION.CONNECT", "Off");
    let mut config = FleetConfig::default();
    config.set_location(&GeoLocation::new(40.0, -105.0).unwrap());
    let bus_dyn: Arc<dyn PropertyBus> = bus.clone();
    let fleet = FleetController::new(
        bus_dyn,
        Arc::new(ConfigStore::in_memory(config)),
        MountTiming::instant()
    );
    (bus, fleet)
}

#[test]
fn test_pointing_quality() {
    assert_eq!(PointingQuality::from_error(0.5), PointingQuality::Excellent);
    assert_eq!(PointingQuality::from_error(5.0), PointingQuality::Good);
    assert_eq!(PointingQuality::from_error(29.9), PointingQuality::Good);
    assert_eq!(PointingQuality::from_error(30.0), PointingQuality::NeedsCalibration);
    assert_eq!(PointingQuality::NeedsCalibration.as_str(), "recalibrate");
}

#[test]
fn test_solve_and_sync() {
    let (bus, fleet) = solve_sync_fleet();
    let unit = fleet.unit(1).unwrap();
    let mut verifier = ShiftedSky { ra_shift: 0.0, dec_shift: 0.25 };

    let result = solve_and_sync(&unit, &mut verifier, false).unwrap();
    assert_eq!(result.unit_id, 1);
    assert!(f64::abs(result.error_arcmin.unwrap() - 15.0) < 1e-6);
    assert_eq!(result.quality(), Some(PointingQuality::Good));
    assert_eq!(result.solved, EqCoord { ra: 6.0, dec: 0.25 });

    let sync = result.sync.unwrap();
    assert!(!sync.is_suspicious());
    assert_eq!(unit.get_equatorial(), Some(EqCoord { ra: 6.0, dec: 0.25 }));
    assert!(bus.writes_for("Mount 1").iter().any(|w| w == "ON_COORD_SET.SYNC=On"));
}

#[test]
fn test_solve_and_sync_verify_only() {
    let (bus, fleet) = solve_sync_fleet();
    let unit = fleet.unit(2).unwrap();
    let mut verifier = ShiftedSky { ra_shift: 0.1, dec_shift: 0.0 };

    let result = solve_and_sync(&unit, &mut verifier, true).unwrap();
    assert!(result.sync.is_none());
    assert!(f64::abs(result.error_arcmin.unwrap() - 90.0) < 1e-6);
    assert_eq!(result.quality(), Some(PointingQuality::NeedsCalibration));
    assert!(bus.writes().is_empty());
}

#[test]
fn test_solve_and_sync_all() {
    let (bus, fleet) = solve_sync_fleet();
    let mut requested = Vec::new();
    let results = solve_and_sync_all(&fleet, None, false, |unit_id| {
        requested.push(unit_id);
        Box::new(ShiftedSky { ra_shift: 0.0, dec_shift: 0.01 })
    }).unwrap();
    assert_eq!(requested, [1, 2, 3]);
    assert_eq!(results.len(), 3);
    assert_eq!(results[&1].as_ref().unwrap().quality(), Some(PointingQuality::Excellent));
    assert!(results[&2].is_ok());
    assert!(matches!(results[&3], Err(MountError::NotConnected(_))));
    assert!(bus.writes_for("Mount 3").is_empty());

    let results = solve_and_sync_all(&fleet, Some(2), true, |_| Box::new(PlateSolver::NotAvailable))
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[&2], Err(MountError::PlateSolveFailed(_))));
    assert!(matches!(
        solve_and_sync_all(&fleet, Some(7), true, |_| Box::new(PlateSolver::NotAvailable)),
        Err(MountError::DeviceNotFound(7))
    ));
}
