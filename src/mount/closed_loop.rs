use crate::{plate_solve::PositionVerifier, sky_math::*, utils::math::normalize_degrees};
use super::{consts::*, error::*, unit::*};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopIteration {
    pub commanded: HorizCoord,
    pub measured:  HorizCoord,
    pub az_err:    f64, // in degrees
    pub alt_err:   f64, // in degrees
}

impl LoopIteration {
    pub fn total_err(&self) -> f64 {
        f64::hypot(self.az_err, self.alt_err)
    }
}

#[derive(Debug, Clone)]
pub struct ClosedLoopOutcome {
    pub converged:  bool,
    pub iterations: Vec<LoopIteration>,
}

impl ClosedLoopOutcome {
    /// Total error (in degrees) of last measurement
    pub fn last_error(&self) -> Option<f64> {
        self.iterations.last().map(LoopIteration::total_err)
    }
}

/// Slews, measures real position and moves command point by measured
/// error until mount is within `tolerance` from target
pub struct ClosedLoopCorrector {
    tolerance:      f64, // in degrees
    max_iterations: usize,
}

impl Default for ClosedLoopCorrector {
    fn default() -> Self {
        Self::new(DEF_TOLERANCE, DEF_MAX_ITERATIONS)
    }
}

impl ClosedLoopCorrector {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Not converging is not an error: `converged` is `false` then.
    /// Failed slews and measurements are returned as errors
    pub fn run(
        &self,
        unit:     &MountUnit,
        verifier: &mut dyn PositionVerifier,
        target:   &HorizCoord,
    ) -> Result<ClosedLoopOutcome> {
        unit.location()?;
        if target.alt < MIN_TARGET_ALT {
            return Err(MountError::BelowHorizon(target.alt));
        }
        verifier.check_available()?;

        let mut commanded = *target;
        let mut iterations = Vec::new();

        for iteration in 1..=self.max_iterations {
            let (cmd_eq, lst) = unit.horiz_to_eq(&commanded)?;
            log::info!(
                "{}: closed loop iteration {}/{}, command {:?} = {:?}",
                unit.device(), iteration, self.max_iterations, commanded, cmd_eq
            );
            unit.goto_corrected(&cmd_eq, lst)?;
            sleep(unit.timing().solve_settle);

            let measured_eq = verifier.measure(unit)?;
            let measured = unit.eq_to_horiz(&measured_eq)?;
            let (az_err, alt_err) = measured.error_to(target);
            let item = LoopIteration { commanded, measured, az_err, alt_err };
            log::info!(
                "{}: measured {:?}, error az={:+.3}°, alt={:+.3}°, total={:.3}°",
                unit.device(), measured, az_err, alt_err, item.total_err()
            );
            iterations.push(item);

            if item.total_err() <= self.tolerance {
                return Ok(ClosedLoopOutcome { converged: true, iterations });
            }

            commanded = HorizCoord {
                az:  normalize_degrees(commanded.az - az_err),
                alt: (commanded.alt - alt_err).clamp(-90.0, 90.0),
            };
        }

        log::warn!(
            "{}: closed loop did not converge after {} iterations, error = {:?}",
            unit.device(), self.max_iterations,
            iterations.last().map(LoopIteration::total_err)
        );
        Ok(ClosedLoopOutcome { converged: false, iterations })
    }
}

#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::{indi::{mock::MockBus, PropertyBus}, options::{ConfigStore, FleetConfig}};

/// Mount with constant horizontal pointing offset
#[cfg(test)]
struct OffsetVerifier {
    az_offset:  f64,
    alt_offset: f64,
    count:      usize,
}

#[cfg(test)]
impl PositionVerifier for OffsetVerifier {
    fn measure(&mut self, unit: &MountUnit) -> Result<EqCoord> {
        self.count += 1;
        let reported = unit.get_horizontal()
            .ok_or_else(|| MountError::PositionUnavailable(unit.device().to_string()))?;
        let actual = HorizCoord {
            az:  normalize_degrees(reported.az + self.az_offset),
            alt: reported.alt + self.alt_offset,
        };
        Ok(unit.horiz_to_eq(&actual)?.0)
    }
}

#[cfg(test)]
struct CloudyVerifier;

#[cfg(test)]
impl PositionVerifier for CloudyVerifier {
    fn measure(&mut self, _unit: &MountUnit) -> Result<EqCoord> {
        Err(MountError::PlateSolveFailed("no stars".to_string()))
    }
}

#[cfg(test)]
fn closed_loop_unit() -> (Arc<MockBus>, MountUnit) {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.slew_on_goto("Mount 1");
    let mut config = FleetConfig::default();
    config.set_location(&GeoLocation::new(40.0, -105.0).unwrap());
    let bus_dyn: Arc<dyn PropertyBus> = bus.clone();
    let unit = MountUnit::new(
        1, bus_dyn,
        Arc::new(ConfigStore::in_memory(config)),
        MountTiming::instant()
    );
    (bus, unit)
}

#[test]
fn test_closed_loop_converges() {
    let (bus, unit) = closed_loop_unit();
    let mut verifier = OffsetVerifier { az_offset: 3.0, alt_offset: -2.0, count: 0 };
    let target = HorizCoord { az: 100.0, alt: 40.0 };
    let outcome = ClosedLoopCorrector::new(0.5, 5)
        .run(&unit, &mut verifier, &target)
        .unwrap();
    assert!(outcome.converged);
    assert_eq!(outcome.iterations.len(), 2);
    assert_eq!(verifier.count, 2);
    assert!(f64::abs(outcome.iterations[0].total_err() - f64::hypot(3.0, 2.0)) < 1e-6);
    assert!(outcome.last_error().unwrap() < 1e-6);

    // second command compensates offset
    let second = outcome.iterations[1].commanded;
    assert!(f64::abs(second.az - 97.0) < 1e-6);
    assert!(f64::abs(second.alt - 42.0) < 1e-6);
    assert!(bus.writes_for("Mount 1").iter().all(|w| !w.starts_with("TELESCOPE_ABORT")));
}

#[test]
fn test_closed_loop_on_target_first_time() {
    let (_, unit) = closed_loop_unit();
    let mut verifier = OffsetVerifier { az_offset: 0.1, alt_offset: 0.1, count: 0 };
    let outcome = ClosedLoopCorrector::default()
        .run(&unit, &mut verifier, &HorizCoord { az: 359.5, alt: 20.0 })
        .unwrap();
    assert!(outcome.converged);
    assert_eq!(outcome.iterations.len(), 1);
}

#[test]
fn test_closed_loop_not_converged() {
    let (_, unit) = closed_loop_unit();
    let mut verifier = OffsetVerifier { az_offset: 3.0, alt_offset: 0.0, count: 0 };
    let outcome = ClosedLoopCorrector::new(0.5, 1)
        .run(&unit, &mut verifier, &HorizCoord { az: 200.0, alt: 30.0 })
        .unwrap();
    assert!(!outcome.converged);
    assert_eq!(outcome.iterations.len(), 1);
    assert!(f64::abs(outcome.last_error().unwrap() - 3.0) < 1e-6);
}

#[test]
fn test_closed_loop_errors() {
    let (_, unit) = closed_loop_unit();
    let mut verifier = CloudyVerifier;
    let target = HorizCoord { az: 100.0, alt: 40.0 };
    assert!(matches!(
        ClosedLoopCorrector::default().run(&unit, &mut verifier, &target),
        Err(MountError::PlateSolveFailed(_))
    ));
    assert!(matches!(
        ClosedLoopCorrector::default().run(&unit, &mut verifier, &HorizCoord { az: 0.0, alt: -20.0 }),
        Err(MountError::BelowHorizon(_))
    ));
}

#[test]
fn test_closed_loop_without_solver_does_not_move() {
    let (bus, unit) = closed_loop_unit();
    let mut solver = crate::plate_solve::PlateSolver::NotAvailable;
    assert!(matches!(
        ClosedLoopCorrector::default().run(&unit, &mut solver, &HorizCoord { az: 100.0, alt: 40.0 }),
        Err(MountError::PlateSolveFailed(_))
    ));
    assert!(bus.writes().is_empty());
}
