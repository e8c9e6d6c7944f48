use std::{sync::Arc, time::Duration};
use crate::{
    indi::{props::*, value_to_sexagesimal, PropertyBus},
    options::ConfigStore,
    sky_math::*,
    utils::math::{normalize_degrees, normalize_hours, wrap_180},
};
use super::{consts::*, error::*, goto_monitor::*, pointing_model::*};

/// Snapshot of one mount shown by `status` command
#[derive(Debug, Clone)]
pub struct UnitStatus {
    pub id:              u32,
    pub device:          String,
    pub connected:       bool,
    pub port:            Option<String>,
    pub driver_location: Option<GeoLocation>,
    pub horizontal:      Option<HorizCoord>,
    pub equatorial:      Option<EqCoord>,
    pub steps:           Option<StepperPosition>,
    pub lst:             Option<f64>,
    pub ra_goto:         Option<String>,
    pub dec_goto:        Option<String>,
    pub coord_mode:      Option<&'static str>,
    pub pointing_model:  PointingModel,
}

#[derive(Debug, Clone)]
pub struct GotoReport {
    pub target:     EqCoord,
    /// Target after pointing model correction
    pub commanded:  EqCoord,
    pub reached_eq: Option<EqCoord>,
    pub reached_hz: Option<HorizCoord>,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub target_eq: EqCoord,
    pub target_hz: Option<HorizCoord>,
    pub before_eq: EqCoord,
    pub before_hz: Option<HorizCoord>,
    pub after_eq:  Option<EqCoord>,
    pub after_hz:  Option<HorizCoord>,
}

impl SyncReport {
    /// Difference between position reported after sync and sync target
    /// (az/alt for horizontal sync, ra/dec in degrees for equatorial one)
    pub fn residual(&self) -> Option<(f64, f64)> {
        if let Some(target_hz) = &self.target_hz {
            self.after_hz.map(|after| after.error_to(target_hz))
        } else {
            self.after_eq.map(|after| (
                wrap_180((after.ra - self.target_eq.ra) * 15.0),
                after.dec - self.target_eq.dec,
            ))
        }
    }

    /// Sync probably did not take effect
    pub fn is_suspicious(&self) -> bool {
        match self.residual() {
            Some((err1, err2)) =>
                f64::abs(err1) > SYNC_WARN_ERROR || f64::abs(err2) > SYNC_WARN_ERROR,
            None =>
                true,
        }
    }
}

/// One mount of the array. All property access is scoped to `device`
pub struct MountUnit {
    id:           u32,
    device:       String,
    connected:    bool,
    port:         Option<String>,
    bus:          Arc<dyn PropertyBus>,
    store:        Arc<ConfigStore>,
    timing:       MountTiming,
    goto_timeout: Duration,
}

impl MountUnit {
    pub fn new(
        id:     u32,
        bus:    Arc<dyn PropertyBus>,
        store:  Arc<ConfigStore>,
        timing: MountTiming,
    ) -> Self {
        let device = device_name(id);
        let connected = bus.get(&device, &elem(CONNECTION, CONNECTION_CONNECT))
            .is_some_and(|v| v == SWITCH_ON);
        let port = bus.get(&device, &elem(DEVICE_PORT, DEVICE_PORT_PORT))
            .filter(|p| !p.is_empty());
        Self {
            id, device, connected, port, bus, store, timing,
            goto_timeout: SINGLE_GOTO_TIMEOUT,
        }
    }

    pub fn with_goto_timeout(mut self, timeout: Duration) -> Self {
        self.goto_timeout = timeout;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn timing(&self) -> &MountTiming {
        &self.timing
    }

    pub fn get_horizontal(&self) -> Option<HorizCoord> {
        let az = self.get_f64(HORIZONTAL_COORD, HORIZONTAL_COORD_AZ)?;
        let alt = self.get_f64(HORIZONTAL_COORD, HORIZONTAL_COORD_ALT)?;
        Some(HorizCoord { az, alt })
    }

    pub fn get_equatorial(&self) -> Option<EqCoord> {
        let ra = self.get_f64(EQUATORIAL_EOD_COORD, EQUATORIAL_EOD_COORD_RA)?;
        let dec = self.get_f64(EQUATORIAL_EOD_COORD, EQUATORIAL_EOD_COORD_DEC)?;
        Some(EqCoord { ra, dec })
    }

    pub fn get_steps(&self) -> Option<StepperPosition> {
        let ra_steps = self.get_f64(CURRENTSTEPPERS, CURRENTSTEPPERS_RA)?;
        let dec_steps = self.get_f64(CURRENTSTEPPERS, CURRENTSTEPPERS_DEC)?;
        Some(StepperPosition { ra_steps, dec_steps })
    }

    /// Local sidereal time in hours as reported by driver
    pub fn lst(&self) -> Option<f64> {
        self.get_f64(TIME_LST, TIME_LST_LST)
    }

    pub fn pointing_model(&self) -> PointingModel {
        self.store.pointing_model(self.id)
    }

    pub fn status(&self) -> UnitStatus {
        let driver_location = self.get_f64(GEOGRAPHIC_COORD, GEOGRAPHIC_COORD_LAT)
            .zip(self.get_f64(GEOGRAPHIC_COORD, GEOGRAPHIC_COORD_LONG))
            .filter(|(lat, lon)| f64::abs(*lat) > 1e-10 || f64::abs(*lon) > 1e-10)
            .and_then(|(lat, lon)| GeoLocation::new(lat, lon));
        let coord_mode = [ON_COORD_SET_SLEW, ON_COORD_SET_TRACK, ON_COORD_SET_SYNC]
            .into_iter()
            .find(|mode| {
                self.bus.get(&self.device, &elem(ON_COORD_SET, mode))
                    .is_some_and(|v| v == SWITCH_ON)
            });
        UnitStatus {
            id:         self.id,
            device:     self.device.clone(),
            connected:  self.bus.get(&self.device, &elem(CONNECTION, CONNECTION_CONNECT))
                .is_some_and(|v| v == SWITCH_ON),
            port:       self.bus.get(&self.device, &elem(DEVICE_PORT, DEVICE_PORT_PORT))
                .filter(|p| !p.is_empty()),
            driver_location,
            horizontal: self.get_horizontal(),
            equatorial: self.get_equatorial(),
            steps:      self.get_steps(),
            lst:        self.lst(),
            ra_goto:    self.bus.get(&self.device, RASTATUS_GOTO),
            dec_goto:   self.bus.get(&self.device, DESTATUS_GOTO),
            coord_mode,
            pointing_model: self.pointing_model(),
        }
    }

    /// Stores location if both values are given, then applies stored
    /// location to the driver
    pub fn setup_location(&self, lat: Option<f64>, lon: Option<f64>) -> Result<GeoLocation> {
        if let (Some(lat), Some(lon)) = (lat, lon) {
            let location = GeoLocation::new(lat, lon)
                .ok_or(MountError::InvalidLocation { lat, lon })?;
            self.store.set_location(&location)?;
        }
        let location = self.location()?;
        self.apply_location(&location);
        Ok(location)
    }

    pub(crate) fn apply_location(&self, location: &GeoLocation) {
        log::debug!(
            "Applying location lat={}, lon={} to {}",
            value_to_sexagesimal(location.lat, true, 8),
            value_to_sexagesimal(location.lon, true, 8),
            self.device
        );
        let lat = location.lat.to_string();
        let lon = location.lon.to_string();
        self.bus.set(&self.device, GEOGRAPHIC_COORD, &[
            (GEOGRAPHIC_COORD_LAT,  lat.as_str()),
            (GEOGRAPHIC_COORD_LONG, lon.as_str()),
        ]);
    }

    pub fn location(&self) -> Result<GeoLocation> {
        self.store.location().ok_or(MountError::LocationNotSet)
    }

    /// Converts horizontal position to equatorial one using LST of this mount.
    /// Returns LST used for conversion too
    pub fn horiz_to_eq(&self, crd: &HorizCoord) -> Result<(EqCoord, f64)> {
        let location = self.location()?;
        let lst = self.lst().ok_or(MountError::ConversionUnavailable)?;
        let eq = azalt_to_radec(crd, location.lat, Some(lst))?;
        Ok((eq, lst))
    }

    pub fn eq_to_horiz(&self, crd: &EqCoord) -> Result<HorizCoord> {
        let location = self.location()?;
        Ok(radec_to_azalt(crd, location.lat, self.lst())?)
    }

    pub fn goto_horizontal(&self, az: f64, alt: f64) -> Result<GotoReport> {
        self.location()?;
        let current = self.get_horizontal()
            .ok_or_else(|| MountError::PositionUnavailable(self.device.clone()))?;
        log::info!("{}: current {:?}, target az={:.3}, alt={:.3}", self.device, current, az, alt);
        if alt < MIN_TARGET_ALT {
            return Err(MountError::BelowHorizon(alt));
        }
        let (target, lst) = self.horiz_to_eq(&HorizCoord { az, alt })?;
        self.goto_corrected(&target, lst)
    }

    /// Slews to equatorial position. Pointing model is applied when
    /// unit is calibrated and LST is known
    pub fn goto_equatorial(&self, ra: f64, dec: f64) -> Result<GotoReport> {
        let current = self.get_equatorial()
            .ok_or_else(|| MountError::PositionUnavailable(self.device.clone()))?;
        let target = EqCoord { ra: normalize_hours(ra), dec: dec.clamp(-90.0, 90.0) };
        log::info!("{}: current {:?}, target {:?}", self.device, current, target);
        match self.lst() {
            Some(lst) => self.goto_corrected(&target, lst),
            None => {
                if !self.pointing_model().is_zero() {
                    log::warn!("{}: LST is unavailable, pointing model is not applied", self.device);
                }
                self.goto_uncorrected(&target)
            }
        }
    }

    /// Applies pointing model of unit to `target` and slews
    pub fn goto_corrected(&self, target: &EqCoord, lst: f64) -> Result<GotoReport> {
        let model = self.pointing_model();
        let (ra, dec) = compute_correction(target.ra, target.dec, lst, &model);
        let commanded = EqCoord { ra, dec };
        if !model.is_zero() {
            log::info!("{}: target {:?} corrected to {:?}", self.device, target, commanded);
        }
        self.slew(target, &commanded)
    }

    /// Slews ignoring pointing model (used while calibrating)
    pub fn goto_uncorrected(&self, target: &EqCoord) -> Result<GotoReport> {
        self.slew(target, target)
    }

    fn slew(&self, target: &EqCoord, commanded: &EqCoord) -> Result<GotoReport> {
        self.bus.set_switch(&self.device, ON_COORD_SET, ON_COORD_SET_SLEW);
        sleep(self.timing.after_mode_set);
        self.write_eq_coord(commanded);
        sleep(self.timing.after_coord_set);

        let mut monitor = GotoMonitor::new(self.goto_timeout);
        let state = monitor.wait(self.timing.poll_period, || self.get_steps());
        log::debug!("{}: goto monitor finished with {:?}", self.device, state);

        match state {
            MonitorState::Done => {
                let reached_eq = self.get_equatorial();
                let reached_hz = self.get_horizontal();
                log::info!("{}: reached {:?} {:?}", self.device, reached_eq, reached_hz);
                Ok(GotoReport {
                    target: *target,
                    commanded: *commanded,
                    reached_eq,
                    reached_hz,
                })
            }
            MonitorState::NoMovement => {
                self.stop();
                Err(MountError::NoMovement(self.device.clone()))
            }
            _ => {
                self.stop();
                Err(MountError::GotoTimeout {
                    device:  self.device.clone(),
                    seconds: self.goto_timeout.as_secs_f64(),
                })
            }
        }
    }

    pub fn sync_equatorial(&self, ra: f64, dec: f64) -> Result<SyncReport> {
        let target = EqCoord { ra: normalize_hours(ra), dec: dec.clamp(-90.0, 90.0) };
        self.sync_impl(&target, None)
    }

    pub fn sync_horizontal(&self, az: f64, alt: f64) -> Result<SyncReport> {
        self.location()?;
        let target_hz = HorizCoord { az: normalize_degrees(az), alt: alt.clamp(-90.0, 90.0) };
        let (target_eq, _) = self.horiz_to_eq(&target_hz)?;
        self.sync_impl(&target_eq, Some(target_hz))
    }

    fn sync_impl(&self, target: &EqCoord, target_hz: Option<HorizCoord>) -> Result<SyncReport> {
        let before_eq = self.get_equatorial()
            .ok_or_else(|| MountError::SyncFailed(
                format!("can't read position of `{}`", self.device)
            ))?;
        let before_hz = self.get_horizontal();
        log::info!("{}: syncing {:?} to {:?}", self.device, before_eq, target);

        // Sync is ignored by mount firmware unless tracking
        // and standard sync mode are enabled
        self.bus.set_switch(&self.device, TELESCOPE_TRACK_STATE, TELESCOPE_TRACK_STATE_ON);
        self.bus.set_switch(&self.device, ALIGNSYNCMODE, ALIGNSYNCMODE_STANDARD);
        sleep(self.timing.sync_mode_settle);

        self.bus.set_switch(&self.device, ON_COORD_SET, ON_COORD_SET_SYNC);
        sleep(self.timing.after_mode_set);
        self.write_eq_coord(target);
        sleep(self.timing.after_coord_set);

        let after_eq = self.get_equatorial();
        self.bus.set_switch(&self.device, ON_COORD_SET, ON_COORD_SET_SLEW);

        // horizontal coordinates are updated by driver later
        sleep(self.timing.after_coord_set);
        let after_hz = self.get_horizontal();

        let report = SyncReport {
            target_eq: *target,
            target_hz,
            before_eq,
            before_hz,
            after_eq,
            after_hz,
        };
        if let Some(after) = after_eq {
            log::debug!(
                "{}: sync changed RA by {:+.4}h (expected {:+.4}h), DEC by {:+.2}° (expected {:+.2}°)",
                self.device,
                after.ra - before_eq.ra, target.ra - before_eq.ra,
                after.dec - before_eq.dec, target.dec - before_eq.dec,
            );
        }
        if report.is_suspicious() {
            log::warn!(
                "{}: sync may not have taken effect, residual = {:?}",
                self.device, report.residual()
            );
        }
        Ok(report)
    }

    /// Aborts any motion. There is no confirmation
    pub fn stop(&self) {
        log::info!("{}: abort motion", self.device);
        self.bus.set_switch(&self.device, TELESCOPE_ABORT_MOTION, TELESCOPE_ABORT_MOTION_ABORT);
    }

    pub(crate) fn connect_to_port(&self, port: &str) -> bool {
        self.bus.set(&self.device, DEVICE_PORT, &[(DEVICE_PORT_PORT, port)]);
        sleep(self.timing.port_settle);
        self.bus.set_switch(&self.device, CONNECTION, CONNECTION_CONNECT);
        sleep(self.timing.connect_settle);
        self.bus.get(&self.device, &elem(CONNECTION, CONNECTION_CONNECT))
            .is_some_and(|v| v == SWITCH_ON)
    }

    fn write_eq_coord(&self, crd: &EqCoord) {
        let ra = crd.ra.to_string();
        let dec = crd.dec.to_string();
        self.bus.set(&self.device, EQUATORIAL_EOD_COORD, &[
            (EQUATORIAL_EOD_COORD_RA,  ra.as_str()),
            (EQUATORIAL_EOD_COORD_DEC, dec.as_str()),
        ]);
    }

    fn get_f64(&self, prop: &str, elem_name: &str) -> Option<f64> {
        self.bus.get_f64(&self.device, &elem(prop, elem_name))
    }
}

pub fn device_name(unit_id: u32) -> String {
    format!("{}{}", MOUNT_PREFIX, unit_id)
}

#[cfg(test)]
use crate::{indi::mock::MockBus, options::FleetConfig};

#[cfg(test)]
fn test_unit(bus: &Arc<MockBus>, model: Option<PointingModel>) -> MountUnit {
    let mut config = FleetConfig::default();
    config.set_location(&GeoLocation::new(40.0, -105.0).unwrap());
    if let Some(model) = model {
        config.pointing_models.insert("1".to_string(), model);
    }
    let store = Arc::new(ConfigStore::in_memory(config));
    let bus: Arc<dyn PropertyBus> = bus.clone();
    MountUnit::new(1, bus, store, MountTiming::instant())
}

#[test]
fn test_unit_reads() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.put("Mount 1", "DEVICE_PORT.PORT", "/dev/ttyACM0");
    bus.script_steps("Mount 1", &[(100.0, 200.0)]);
    let unit = test_unit(&bus, None);
    assert_eq!(unit.device(), "Mount 1");
    assert!(unit.is_connected());
    assert_eq!(unit.port(), Some("/dev/ttyACM0"));
    assert_eq!(unit.lst(), Some(6.0));
    assert_eq!(unit.get_equatorial(), Some(EqCoord { ra: 6.0, dec: 0.0 }));
    assert_eq!(unit.get_steps(), Some(StepperPosition { ra_steps: 100.0, dec_steps: 200.0 }));

    bus.remove("Mount 1", "HORIZONTAL_COORD.ALT");
    assert_eq!(unit.get_horizontal(), None);

    let status = unit.status();
    assert_eq!(status.coord_mode, None);
    assert_eq!(status.driver_location, None);
    assert!(status.pointing_model.is_zero());
}

#[test]
fn test_unit_goto_horizontal() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.script_step_deltas("Mount 1", 0.0, &[1000.0, 1000.0, 0.0, 0.0, 0.0, 0.0]);
    let unit = test_unit(&bus, None);

    let report = unit.goto_horizontal(90.0, 45.0).unwrap();
    assert_eq!(report.target, report.commanded);
    let reached = report.reached_hz.unwrap();
    let (az_err, alt_err) = reached.error_to(&HorizCoord { az: 90.0, alt: 45.0 });
    assert!(f64::abs(az_err) < 1e-6);
    assert!(f64::abs(alt_err) < 1e-6);

    let writes = bus.writes_for("Mount 1");
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0], "ON_COORD_SET.SLEW=On");
    assert!(writes[1].starts_with("EQUATORIAL_EOD_COORD.RA="));
}

#[test]
fn test_unit_goto_applies_pointing_model() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.script_step_deltas("Mount 1", 0.0, &[1000.0, 0.0, 0.0, 0.0, 0.0]);
    let model = PointingModel { me: 0.01, ma: -0.005 };
    let unit = test_unit(&bus, Some(model));

    let report = unit.goto_equatorial(4.0, 30.0).unwrap();
    let (ra, dec) = compute_correction(4.0, 30.0, 6.0, &model);
    assert_eq!(report.commanded, EqCoord { ra, dec });
    assert!(EqCoord::angle_between(&report.target, &report.commanded) > 0.1);
    assert_eq!(report.reached_eq, Some(report.commanded));
}

#[test]
fn test_unit_goto_rejects_bad_targets() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    let unit = test_unit(&bus, None);
    assert!(matches!(
        unit.goto_horizontal(90.0, -10.0),
        Err(MountError::BelowHorizon(_))
    ));
    assert!(bus.writes().is_empty());

    bus.remove("Mount 1", "TIME_LST.LST");
    assert!(matches!(
        unit.goto_horizontal(90.0, 45.0),
        Err(MountError::ConversionUnavailable)
    ));

    let store = Arc::new(ConfigStore::in_memory(FleetConfig::default()));
    let bus_dyn: Arc<dyn PropertyBus> = bus.clone();
    let unit = MountUnit::new(1, bus_dyn, store, MountTiming::instant());
    assert!(matches!(unit.goto_horizontal(90.0, 45.0), Err(MountError::LocationNotSet)));
    assert!(matches!(unit.setup_location(None, None), Err(MountError::LocationNotSet)));
    assert!(matches!(
        unit.setup_location(Some(91.0), Some(0.0)),
        Err(MountError::InvalidLocation { .. })
    ));
    assert!(bus.writes().is_empty());
}

#[test]
fn test_unit_goto_failures_abort() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.script_step_deltas("Mount 1", 0.0, &[0.0; 8]);
    let unit = test_unit(&bus, None);
    assert!(matches!(
        unit.goto_horizontal(90.0, 45.0),
        Err(MountError::NoMovement(_))
    ));
    assert_eq!(
        bus.writes_for("Mount 1").last().map(String::as_str),
        Some("TELESCOPE_ABORT_MOTION.ABORT=On")
    );

    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.keep_moving("Mount 1");
    let unit = test_unit(&bus, None).with_goto_timeout(Duration::ZERO);
    assert!(matches!(
        unit.goto_equatorial(4.0, 20.0),
        Err(MountError::GotoTimeout { .. })
    ));
    assert_eq!(
        bus.writes_for("Mount 1").last().map(String::as_str),
        Some("TELESCOPE_ABORT_MOTION.ABORT=On")
    );
}

#[test]
fn test_unit_sync_sequence() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    let unit = test_unit(&bus, None);

    let report = unit.sync_horizontal(120.0, 30.0).unwrap();
    let (az_err, alt_err) = report.residual().unwrap();
    assert!(f64::abs(az_err) < 1e-6);
    assert!(f64::abs(alt_err) < 1e-6);
    assert!(!report.is_suspicious());
    assert_eq!(report.before_eq, EqCoord { ra: 6.0, dec: 0.0 });

    let writes = bus.writes_for("Mount 1");
    assert_eq!(writes.len(), 5);
    assert_eq!(writes[0], "TELESCOPE_TRACK_STATE.TRACK_ON=On");
    assert_eq!(writes[1], "ALIGNSYNCMODE.ALIGNSTANDARDSYNC=On");
    assert_eq!(writes[2], "ON_COORD_SET.SYNC=On");
    assert!(writes[3].starts_with("EQUATORIAL_EOD_COORD.RA="));
    assert_eq!(writes[4], "ON_COORD_SET.SLEW=On");
    assert_eq!(unit.status().coord_mode, Some(ON_COORD_SET_SLEW));
}

#[test]
fn test_unit_sync_needs_position() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.remove("Mount 1", "EQUATORIAL_EOD_COORD.RA");
    let unit = test_unit(&bus, None);
    assert!(matches!(unit.sync_equatorial(1.0, 2.0), Err(MountError::SyncFailed(_))));
    assert!(bus.writes().is_empty());
}

#[test]
fn test_unit_setup_location() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 0.0, 6.0);
    let unit = test_unit(&bus, None);
    let location = unit.setup_location(Some(-33.9), Some(18.4)).unwrap();
    assert_eq!(location, GeoLocation::new(-33.9, 18.4).unwrap());
    assert_eq!(unit.location().unwrap(), location);
    assert_eq!(bus.writes_for("Mount 1"), ["GEOGRAPHIC_COORD.LAT=-33.9;LONG=18.4"]);
}
