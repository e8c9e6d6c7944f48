use std::{collections::BTreeMap, path::Path, sync::{Arc, Mutex}, time::Duration};
use crate::{
    indi::{props::*, PropertyBus},
    options::{ConfigStore, FleetConfig},
    sky_math::*,
};
use super::{consts::*, error::*, pointing_model::*, unit::*};

pub struct FleetGotoReport {
    pub target_hz: HorizCoord,
    pub target_eq: EqCoord,
    pub lst:       f64,
    pub results:   BTreeMap<u32, Result<GotoReport>>,
}

impl FleetGotoReport {
    pub fn all_ok(&self) -> bool {
        self.results.values().all(|r| r.is_ok())
    }
}

pub struct FleetSyncReport {
    pub target_hz: HorizCoord,
    pub results:   BTreeMap<u32, Result<SyncReport>>,
}

impl FleetSyncReport {
    pub fn all_ok(&self) -> bool {
        self.results.values().all(|r| r.is_ok())
    }
}

/// State of serial ports, INDI server, mounts and configuration
pub struct FleetDiagnostics {
    pub serial_ports:     Vec<String>,
    pub server_available: bool,
    pub mounts:           Vec<UnitStatus>,
    pub config:           FleetConfig,
}

impl FleetDiagnostics {
    pub fn connected_count(&self) -> usize {
        self.mounts.iter().filter(|m| m.connected).count()
    }

    pub fn is_ready(&self) -> bool {
        self.server_available &&
        !self.mounts.is_empty() &&
        self.connected_count() == self.mounts.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    Connected(String),
    Failed(String),
    NoPort,
}

/// Controls all mounts attached to one INDI server
pub struct FleetController {
    bus:          Arc<dyn PropertyBus>,
    store:        Arc<ConfigStore>,
    timing:       MountTiming,
    goto_timeout: Duration,
}

impl FleetController {
    pub fn new(
        bus:    Arc<dyn PropertyBus>,
        store:  Arc<ConfigStore>,
        timing: MountTiming,
    ) -> Self {
        Self {
            bus, store, timing,
            goto_timeout: FLEET_GOTO_TIMEOUT,
        }
    }

    pub fn with_goto_timeout(mut self, timeout: Duration) -> Self {
        self.goto_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Units for which driver reports any connection state
    pub fn discover(&self) -> Vec<MountUnit> {
        let connect_prop = elem(CONNECTION, CONNECTION_CONNECT);
        (1..=MAX_UNITS)
            .filter(|id| self.bus.get(&device_name(*id), &connect_prop).is_some())
            .map(|id| self.create_unit(id))
            .collect()
    }

    /// Single unit with default (single mount) goto timeout
    pub fn unit(&self, unit_id: u32) -> Result<MountUnit> {
        self.select(Some(unit_id))?
            .pop()
            .map(|unit| unit.with_goto_timeout(SINGLE_GOTO_TIMEOUT.min(self.goto_timeout)))
            .ok_or(MountError::DeviceNotFound(unit_id))
    }

    fn create_unit(&self, unit_id: u32) -> MountUnit {
        MountUnit::new(
            unit_id,
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            self.timing.clone()
        ).with_goto_timeout(self.goto_timeout)
    }

    fn select(&self, filter: Option<u32>) -> Result<Vec<MountUnit>> {
        let mut units = self.discover();
        if units.is_empty() {
            return Err(MountError::NoUnitsDiscovered);
        }
        if let Some(unit_id) = filter {
            units.retain(|unit| unit.id() == unit_id);
            if units.is_empty() {
                return Err(MountError::DeviceNotFound(unit_id));
            }
        }
        Ok(units)
    }

    /// Stores location if both values are given and applies stored
    /// location to every discovered unit. Returns number of units
    pub fn setup_location(
        &self,
        lat: Option<f64>,
        lon: Option<f64>
    ) -> Result<(GeoLocation, usize)> {
        if let (Some(lat), Some(lon)) = (lat, lon) {
            let location = GeoLocation::new(lat, lon)
                .ok_or(MountError::InvalidLocation { lat, lon })?;
            self.store.set_location(&location)?;
        }
        let location = self.store.location().ok_or(MountError::LocationNotSet)?;
        let units = self.discover();
        for unit in &units {
            unit.apply_location(&location);
        }
        log::info!("Location {:?} applied to {} mount(s)", location, units.len());
        Ok((location, units.len()))
    }

    /// Points every selected unit to the same horizontal position.
    /// Units slew concurrently and failure of one doesn't stop others
    pub fn goto_all(&self, az: f64, alt: f64, filter: Option<u32>) -> Result<FleetGotoReport> {
        self.store.location().ok_or(MountError::LocationNotSet)?;
        let units = self.select(filter)?;
        if alt < MIN_TARGET_ALT {
            return Err(MountError::BelowHorizon(alt));
        }

        // all mounts share location so one LST is enough
        let target_hz = HorizCoord { az, alt };
        let (target_eq, lst) = units[0].horiz_to_eq(&target_hz)?;
        log::info!(
            "Fleet goto {:?} = {:?} (LST from {}), {} mount(s)",
            target_hz, target_eq, units[0].device(), units.len()
        );

        let results = Mutex::new(BTreeMap::new());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(units.len())
            .thread_name(|idx| format!("goto_{}", idx))
            .build();
        match pool {
            Ok(pool) =>
                pool.scope(|s| spawn_goto_workers(s, &units, &target_eq, lst, &results)),
            Err(err) => {
                log::warn!("Can't create goto thread pool ({}), using global one", err);
                rayon::scope(|s| spawn_goto_workers(s, &units, &target_eq, lst, &results));
            }
        }

        Ok(FleetGotoReport {
            target_hz,
            target_eq,
            lst,
            results: results.into_inner().unwrap(),
        })
    }

    /// Syncs units one by one. Residual bigger than 1° is reported
    pub fn sync_all(&self, az: f64, alt: f64, filter: Option<u32>) -> Result<FleetSyncReport> {
        self.store.location().ok_or(MountError::LocationNotSet)?;
        let units = self.select(filter)?;
        let mut results = BTreeMap::new();
        for unit in &units {
            let result = unit.sync_horizontal(az, alt);
            match &result {
                Ok(report) if report.is_suspicious() =>
                    log::warn!("{}: sync residual {:?}", unit.device(), report.residual()),
                Ok(_) =>
                    log::info!("{}: synced", unit.device()),
                Err(err) =>
                    log::error!("{}: sync failed: {}", unit.device(), err),
            }
            results.insert(unit.id(), result);
        }
        Ok(FleetSyncReport {
            target_hz: HorizCoord { az, alt },
            results,
        })
    }

    /// Aborts motion of every discovered unit. Returns number of units
    pub fn stop_all(&self) -> usize {
        let units = self.discover();
        for unit in &units {
            unit.stop();
        }
        units.len()
    }

    /// Existing `/dev/ttyACM*` devices in enumeration order
    pub fn available_ports() -> Vec<String> {
        (0..MAX_SERIAL_PORTS)
            .map(|idx| format!("{}{}", SERIAL_PORT_PREFIX, idx))
            .filter(|port| Path::new(port).exists())
            .collect()
    }

    /// Assigns `ports` to discovered units in order and connects them.
    /// Stored location is reapplied afterwards
    pub fn auto_connect(&self, ports: &[String]) -> Result<BTreeMap<u32, ConnectOutcome>> {
        let units = self.select(None)?;
        if ports.is_empty() {
            return Err(MountError::NoSerialPorts);
        }
        if ports.len() < units.len() {
            log::warn!("Found {} port(s) for {} mount(s)", ports.len(), units.len());
        }
        let mut result = BTreeMap::new();
        for (idx, unit) in units.iter().enumerate() {
            let outcome = match ports.get(idx) {
                Some(port) if unit.connect_to_port(port) => {
                    log::info!("{} connected on {}", unit.device(), port);
                    ConnectOutcome::Connected(port.clone())
                }
                Some(port) => {
                    log::error!("{} failed to connect on {}", unit.device(), port);
                    ConnectOutcome::Failed(port.clone())
                }
                None => ConnectOutcome::NoPort,
            };
            result.insert(unit.id(), outcome);
        }
        match self.setup_location(None, None) {
            Ok(_) | Err(MountError::LocationNotSet) => {}
            Err(err) => log::error!("Can't apply location: {}", err),
        }
        Ok(result)
    }

    /// Mounts are queried only if INDI server is available
    pub fn diagnose(&self, serial_ports: Vec<String>, server_available: bool) -> FleetDiagnostics {
        let mounts = if server_available {
            self.discover().iter().map(MountUnit::status).collect()
        } else {
            Vec::new()
        };
        FleetDiagnostics {
            serial_ports,
            server_available,
            mounts,
            config: self.store.config(),
        }
    }

    pub fn save_pointing_model(&self, unit_id: u32, model: &PointingModel) -> Result<()> {
        self.store.set_pointing_model(unit_id, model)?;
        log::info!("Pointing model of unit {} saved: {:?}", unit_id, model);
        Ok(())
    }

    /// Returns `false` if unit had no model
    pub fn clear_pointing_model(&self, unit_id: u32) -> Result<bool> {
        let removed = self.store.remove_pointing_model(unit_id)?;
        log::info!("Pointing model of unit {} cleared: {}", unit_id, removed);
        Ok(removed)
    }
}

fn spawn_goto_workers<'s>(
    scope:   &rayon::Scope<'s>,
    units:   &'s [MountUnit],
    target:  &'s EqCoord,
    lst:     f64,
    results: &'s Mutex<BTreeMap<u32, Result<GotoReport>>>,
) {
    for unit in units {
        scope.spawn(move |_| {
            let result = unit.goto_corrected(target, lst);
            if let Err(err) = &result {
                log::error!("{}: goto failed: {}", unit.device(), err);
            }
            results.lock().unwrap().insert(unit.id(), result);
        });
    }
}

#[cfg(test)]
use crate::indi::mock::MockBus;

#[cfg(test)]
fn test_fleet(bus: &Arc<MockBus>, location: Option<GeoLocation>) -> FleetController {
    let mut config = FleetConfig::default();
    if let Some(location) = &location {
        config.set_location(location);
    }
    let store = Arc::new(ConfigStore::in_memory(config));
    let bus: Arc<dyn PropertyBus> = bus.clone();
    let timing = MountTiming {
        poll_period: Duration::from_millis(1),
        ..MountTiming::instant()
    };
    FleetController::new(bus, store, timing)
}

#[test]
fn test_fleet_discover() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.put("Mount 3", "CONNECTION.CONNECT", "Off");
    bus.add_mount("Mount 11", 40.0, 6.0);
    let fleet = test_fleet(&bus, None);
    let units = fleet.discover();
    assert_eq!(units.iter().map(|u| u.id()).collect::<Vec<_>>(), [1, 3]);
    assert!(units[0].is_connected());
    assert!(!units[1].is_connected());
    assert!(matches!(fleet.unit(2), Err(MountError::DeviceNotFound(2))));
    assert_eq!(fleet.unit(3).unwrap().device(), "Mount 3");

    let empty = test_fleet(&Arc::new(MockBus::new()), None);
    assert!(matches!(empty.goto_all(0.0, 45.0, None), Err(MountError::LocationNotSet)));
    assert!(matches!(
        empty.sync_all(0.0, 45.0, None),
        Err(MountError::LocationNotSet)
    ));
    assert!(empty.discover().is_empty());
    assert_eq!(empty.stop_all(), 0);
}

#[test]
fn test_fleet_setup_location() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 0.0, 6.0);
    bus.add_mount("Mount 2", 0.0, 6.0);
    let fleet = test_fleet(&bus, None);
    assert!(matches!(fleet.setup_location(None, None), Err(MountError::LocationNotSet)));
    assert!(matches!(
        fleet.setup_location(Some(10.0), Some(190.0)),
        Err(MountError::InvalidLocation { .. })
    ));

    let (location, count) = fleet.setup_location(Some(39.917), Some(-105.004)).unwrap();
    assert_eq!(count, 2);
    assert_eq!(fleet.store().location(), Some(location));
    for device in ["Mount 1", "Mount 2"] {
        assert_eq!(bus.writes_for(device), ["GEOGRAPHIC_COORD.LAT=39.917;LONG=-105.004"]);
    }
}

#[test]
fn test_fleet_goto_aggregation() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.add_mount("Mount 2", 40.0, 6.0);
    bus.script_step_deltas("Mount 1", 0.0, &[150.0, 150.0, 150.0, 20.0, 10.0, 5.0, 5.0]);
    bus.keep_moving("Mount 2");
    let fleet = test_fleet(&bus, GeoLocation::new(40.0, -105.0))
        .with_goto_timeout(Duration::from_millis(200));

    let report = fleet.goto_all(135.0, 30.0, None).unwrap();
    assert!(!report.all_ok());
    assert_eq!(report.results.len(), 2);

    let unit1 = report.results[&1].as_ref().unwrap();
    let (az_err, alt_err) = unit1.reached_hz.unwrap().error_to(&report.target_hz);
    assert!(f64::abs(az_err) < 1e-6);
    assert!(f64::abs(alt_err) < 1e-6);
    assert!(matches!(report.results[&2], Err(MountError::GotoTimeout { .. })));

    // timed out unit was stopped, finished one was not
    assert!(bus.writes_for("Mount 2").iter().any(|w| w == "TELESCOPE_ABORT_MOTION.ABORT=On"));
    assert!(!bus.writes_for("Mount 1").iter().any(|w| w.starts_with("TELESCOPE_ABORT_MOTION")));
}

#[test]
fn test_fleet_goto_filter_and_models() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.add_mount("Mount 2", 40.0, 6.0);
    bus.script_step_deltas("Mount 2", 0.0, &[500.0, 0.0, 0.0, 0.0, 0.0]);
    let fleet = test_fleet(&bus, GeoLocation::new(40.0, -105.0));
    let model = PointingModel { me: 0.01, ma: 0.01 };
    fleet.save_pointing_model(2, &model).unwrap();

    assert!(matches!(fleet.goto_all(135.0, 30.0, Some(5)), Err(MountError::DeviceNotFound(5))));
    assert!(matches!(fleet.goto_all(135.0, -30.0, None), Err(MountError::BelowHorizon(_))));

    let report = fleet.goto_all(135.0, 30.0, Some(2)).unwrap();
    assert!(report.all_ok());
    assert_eq!(report.results.len(), 1);
    let unit2 = report.results[&2].as_ref().unwrap();
    let (ra, dec) = compute_correction(report.target_eq.ra, report.target_eq.dec, report.lst, &model);
    assert_eq!(unit2.commanded, EqCoord { ra, dec });
    assert!(bus.writes_for("Mount 1").is_empty());

    assert!(fleet.clear_pointing_model(2).unwrap());
    assert!(!fleet.clear_pointing_model(2).unwrap());
}

#[test]
fn test_fleet_sync_and_stop() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.add_mount("Mount 2", 40.0, 6.0);
    bus.remove("Mount 2", "EQUATORIAL_EOD_COORD.DEC");
    let fleet = test_fleet(&bus, GeoLocation::new(40.0, -105.0));

    let report = fleet.sync_all(200.0, 60.0, None).unwrap();
    assert!(!report.all_ok());
    let unit1 = report.results[&1].as_ref().unwrap();
    assert!(!unit1.is_suspicious());
    assert!(matches!(report.results[&2], Err(MountError::SyncFailed(_))));

    assert_eq!(fleet.stop_all(), 2);
    for device in ["Mount 1", "Mount 2"] {
        assert_eq!(
            bus.writes_for(device).last().map(String::as_str),
            Some("TELESCOPE_ABORT_MOTION.ABORT=On")
        );
    }
}

#[test]
fn test_fleet_auto_connect() {
    let bus = Arc::new(MockBus::new());
    bus.put("Mount 1", "CONNECTION.CONNECT", "Off");
    bus.put("Mount 2", "CONNECTION.CONNECT", "Off");
    let fleet = test_fleet(&bus, GeoLocation::new(40.0, -105.0));

    assert!(matches!(fleet.auto_connect(&[]), Err(MountError::NoSerialPorts)));

    let result = fleet.auto_connect(&["/dev/ttyACM0".to_string()]).unwrap();
    assert_eq!(result[&1], ConnectOutcome::Connected("/dev/ttyACM0".to_string()));
    assert_eq!(result[&2], ConnectOutcome::NoPort);
    assert_eq!(
        bus.writes_for("Mount 1"),
        [
            "DEVICE_PORT.PORT=/dev/ttyACM0",
            "CONNECTION.CONNECT=On",
            "GEOGRAPHIC_COORD.LAT=40;LONG=-105",
        ]
    );
    assert_eq!(bus.writes_for("Mount 2"), ["GEOGRAPHIC_COORD.LAT=40;LONG=-105"]);
    assert!(fleet.discover()[0].is_connected());
}

#[test]
fn test_fleet_goto_is_concurrent() {
    // every unit needs 5 poll periods (500 ms) to finish
    let bus = Arc::new(MockBus::new());
    for device in ["Mount 1", "Mount 2", "Mount 3"] {
        bus.add_mount(device, 40.0, 6.0);
        bus.script_step_deltas(device, 0.0, &[500.0, 0.0, 0.0, 0.0, 0.0]);
    }
    let mut fleet = test_fleet(&bus, GeoLocation::new(40.0, -105.0));
    fleet.timing.poll_period = Duration::from_millis(100);

    let start = std::time::Instant::now();
    let report = fleet.goto_all(135.0, 30.0, None).unwrap();
    let elapsed = start.elapsed();
    assert!(report.all_ok());
    assert_eq!(report.results.len(), 3);
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(1000), "took {:?}", elapsed);

    // unit which never settles doesn't hold back others
    for device in ["Mount 1", "Mount 2", "Mount 3"] {
        bus.script_step_deltas(device, 0.0, &[500.0, 0.0, 0.0, 0.0, 0.0]);
    }
    bus.add_mount("Mount 4", 40.0, 6.0);
    bus.keep_moving("Mount 4");
    let fleet = fleet.with_goto_timeout(Duration::from_millis(1000));

    let start = std::time::Instant::now();
    let report = fleet.goto_all(135.0, 30.0, None).unwrap();
    let elapsed = start.elapsed();
    assert_eq!(report.results.len(), 4);
    assert!(report.results[&1].is_ok());
    assert!(report.results[&2].is_ok());
    assert!(report.results[&3].is_ok());
    assert!(matches!(report.results[&4], Err(MountError::GotoTimeout { .. })));
    assert!(elapsed < Duration::from_millis(2000), "took {:?}", elapsed);
}

#[test]
fn test_fleet_diagnose() {
    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    bus.put("Mount 1", "DEVICE_PORT.PORT", "/dev/ttyACM0");
    bus.put("Mount 2", "CONNECTION.CONNECT", "Off");
    let fleet = test_fleet(&bus, GeoLocation::new(40.0, -105.0));
    let ports = vec!["/dev/ttyACM0".to_string()];

    let diag = fleet.diagnose(ports.clone(), false);
    assert!(diag.mounts.is_empty());
    assert!(!diag.is_ready());
    assert_eq!(diag.config.location(), GeoLocation::new(40.0, -105.0));

    let diag = fleet.diagnose(ports, true);
    assert_eq!(diag.mounts.len(), 2);
    assert_eq!(diag.mounts[0].port.as_deref(), Some("/dev/ttyACM0"));
    assert_eq!(diag.connected_count(), 1);
    assert!(!diag.is_ready());

    bus.put("Mount 2", "CONNECTION.CONNECT", "On");
    assert!(fleet.diagnose(Vec::new(), true).is_ready());
    assert!(bus.writes().is_empty());
}
