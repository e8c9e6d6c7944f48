use std::time::Duration;

/// INDI device name is `Mount N` where N is the unit id
pub const MOUNT_PREFIX: &str = "Mount ";

/// Discovery probes unit ids 1..=MAX_UNITS
pub const MAX_UNITS: u32 = 10;

/// Serial devices of the mounts are `/dev/ttyACM0..9`
pub const SERIAL_PORT_PREFIX: &str = "/dev/ttyACM";
pub const MAX_SERIAL_PORTS: usize = 10;

/// Encoder delta (in counts) that means axis is moving
pub const MOTION_THRESHOLD_STEPS: f64 = 100.0;

/// Consecutive stable samples after motion to consider slew complete
pub const STABLE_SAMPLES_DONE: usize = 4;

/// Consecutive stable samples without any motion to give up
pub const STABLE_SAMPLES_NO_MOVEMENT: usize = 6;

/// Maximum time to wait while single mount slews to target
pub const SINGLE_GOTO_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum time to wait while every mount of array slews to target
pub const FLEET_GOTO_TIMEOUT: Duration = Duration::from_secs(300);

/// Targets below this altitude are rejected (in degrees)
pub const MIN_TARGET_ALT: f64 = -5.0;

/// Sync residual above this is reported as suspicious (in degrees)
pub const SYNC_WARN_ERROR: f64 = 1.0;

/// Calibration result with bigger RMS is reported as inconsistent (in degrees)
pub const CALIBR_WARN_RMS: f64 = 2.0;

/// Pointing error limits (in arcminutes) of plate solve verification
pub const POINTING_EXCELLENT_ARCMIN: f64 = 5.0;
pub const POINTING_GOOD_ARCMIN: f64 = 30.0;

/// Closed loop defaults
pub const DEF_TOLERANCE: f64 = 1.0;
pub const DEF_MAX_ITERATIONS: usize = 5;

/// Delays between property writes and reads
#[derive(Debug, Clone)]
pub struct MountTiming {
    pub poll_period:      Duration,
    pub after_mode_set:   Duration,
    pub after_coord_set:  Duration,
    pub sync_mode_settle: Duration,
    pub port_settle:      Duration,
    pub connect_settle:   Duration,
    pub solve_settle:     Duration,
    pub calibr_settle:    Duration,
}

impl Default for MountTiming {
    fn default() -> Self {
        Self {
            poll_period:      Duration::from_millis(500),
            after_mode_set:   Duration::from_millis(100),
            after_coord_set:  Duration::from_millis(500),
            sync_mode_settle: Duration::from_millis(300),
            port_settle:      Duration::from_millis(300),
            connect_settle:   Duration::from_secs(2),
            solve_settle:     Duration::from_secs(1),
            calibr_settle:    Duration::from_secs(2),
        }
    }
}

impl MountTiming {
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            poll_period:      Duration::ZERO,
            after_mode_set:   Duration::ZERO,
            after_coord_set:  Duration::ZERO,
            sync_mode_settle: Duration::ZERO,
            port_settle:      Duration::ZERO,
            connect_settle:   Duration::ZERO,
            solve_settle:     Duration::ZERO,
            calibr_settle:    Duration::ZERO,
        }
    }
}

pub(crate) fn sleep(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}
