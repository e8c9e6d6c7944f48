use crate::sky_math::ConversionUnavailable;

#[derive(thiserror::Error, Debug)]
pub enum MountError {
    #[error("Can't convert coordinates: local sidereal time is unavailable")]
    ConversionUnavailable,

    #[error("Location is not set")]
    LocationNotSet,

    #[error("Invalid location lat={lat}, lon={lon}")]
    InvalidLocation { lat: f64, lon: f64 },

    #[error("Mount {0} not found")]
    DeviceNotFound(u32),

    #[error("No mounts discovered")]
    NoUnitsDiscovered,

    #[error("No serial ports found")]
    NoSerialPorts,

    #[error("`{0}` is not connected")]
    NotConnected(String),

    #[error("Can't read position of `{0}`")]
    PositionUnavailable(String),

    #[error("Target altitude {0:.1}° is below horizon")]
    BelowHorizon(f64),

    #[error("Sync failed: {0}")]
    SyncFailed(String),

    #[error("`{device}` did not reach target in {seconds:.0}s")]
    GotoTimeout { device: String, seconds: f64 },

    #[error("No movement of `{0}` detected")]
    NoMovement(String),

    #[error("Need at least 2 calibration points, got {0}")]
    InsufficientCalibrationData(usize),

    #[error("Singular calibration geometry")]
    SingularCalibrationGeometry,

    #[error("Plate solve failed: {0}")]
    PlateSolveFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ConversionUnavailable> for MountError {
    fn from(_: ConversionUnavailable) -> Self {
        MountError::ConversionUnavailable
    }
}

impl MountError {
    /// What the operator can do about it
    pub fn remediation(&self) -> &'static str {
        match self {
            MountError::ConversionUnavailable =>
                "The mount did not report local sidereal time yet. Check the connection and retry.",
            MountError::LocationNotSet =>
                "Run: mount_fleet set-location LAT LON",
            MountError::InvalidLocation { .. } =>
                "Latitude must be within -90..90 and longitude within -180..180.",
            MountError::DeviceNotFound(_) =>
                "Check `mount_fleet status` for discovered mounts.",
            MountError::NoUnitsDiscovered =>
                "Is the INDI server running with the mount drivers loaded?",
            MountError::NoSerialPorts =>
                "Check USB cables of the mounts: no /dev/ttyACM* devices present.",
            MountError::NotConnected(_) =>
                "Run: mount_fleet connect",
            MountError::PositionUnavailable(_) =>
                "Check that the mount is connected: mount_fleet connect",
            MountError::BelowHorizon(_) =>
                "Choose a target with altitude above -5°.",
            MountError::SyncFailed(_) =>
                "Check that the mount is connected and tracking, then sync again.",
            MountError::GotoTimeout { .. } =>
                "Motion aborted. Check for obstructions and power, then retry.",
            MountError::NoMovement(_) =>
                "Motion aborted. Check that the mount is connected, powered and unparked.",
            MountError::InsufficientCalibrationData(_) =>
                "Make sure stars are visible so that more points can be measured.",
            MountError::SingularCalibrationGeometry =>
                "Calibration points are too close together. Spread them across the sky.",
            MountError::PlateSolveFailed(_) =>
                "Check sky conditions, focus and the --solver-cmd setting.",
            MountError::Config(_) =>
                "Check permissions of the configuration file or pass --config PATH.",
        }
    }
}

impl From<anyhow::Error> for MountError {
    fn from(err: anyhow::Error) -> Self {
        MountError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MountError>;

#[test]
fn test_conversion_unavailable_maps_to_mount_error() {
    fn convert() -> Result<()> {
        Err(ConversionUnavailable)?;
        Ok(())
    }
    assert!(matches!(convert(), Err(MountError::ConversionUnavailable)));
    assert!(MountError::LocationNotSet.remediation().contains("set-location"));
}
