//! Property and element names used by the EQMod-family mount drivers

pub const CONNECTION: &str = "CONNECTION";
pub const CONNECTION_CONNECT: &str = "CONNECT";

pub const DEVICE_PORT: &str = "DEVICE_PORT";
pub const DEVICE_PORT_PORT: &str = "PORT";

pub const GEOGRAPHIC_COORD: &str = "GEOGRAPHIC_COORD";
pub const GEOGRAPHIC_COORD_LAT: &str = "LAT";
pub const GEOGRAPHIC_COORD_LONG: &str = "LONG";

pub const TIME_LST: &str = "TIME_LST";
pub const TIME_LST_LST: &str = "LST";

pub const HORIZONTAL_COORD: &str = "HORIZONTAL_COORD";
pub const HORIZONTAL_COORD_AZ: &str = "AZ";
pub const HORIZONTAL_COORD_ALT: &str = "ALT";

pub const EQUATORIAL_EOD_COORD: &str = "EQUATORIAL_EOD_COORD";
pub const EQUATORIAL_EOD_COORD_RA: &str = "RA";
pub const EQUATORIAL_EOD_COORD_DEC: &str = "DEC";

pub const CURRENTSTEPPERS: &str = "CURRENTSTEPPERS";
pub const CURRENTSTEPPERS_RA: &str = "RAStepsCurrent";
pub const CURRENTSTEPPERS_DEC: &str = "DEStepsCurrent";

pub const ON_COORD_SET: &str = "ON_COORD_SET";
pub const ON_COORD_SET_SLEW: &str = "SLEW";
pub const ON_COORD_SET_TRACK: &str = "TRACK";
pub const ON_COORD_SET_SYNC: &str = "SYNC";

pub const TELESCOPE_ABORT_MOTION: &str = "TELESCOPE_ABORT_MOTION";
pub const TELESCOPE_ABORT_MOTION_ABORT: &str = "ABORT";

pub const TELESCOPE_TRACK_STATE: &str = "TELESCOPE_TRACK_STATE";
pub const TELESCOPE_TRACK_STATE_ON: &str = "TRACK_ON";

pub const ALIGNSYNCMODE: &str = "ALIGNSYNCMODE";
pub const ALIGNSYNCMODE_STANDARD: &str = "ALIGNSTANDARDSYNC";

pub const RASTATUS_GOTO: &str = "RASTATUS.RAGoto";
pub const DESTATUS_GOTO: &str = "DESTATUS.DEGoto";

pub const SWITCH_ON: &str = "On";

/// `PROPERTY.ELEMENT` address used by `PropertyBus::get`
pub fn elem(prop: &str, elem: &str) -> String {
    format!("{}.{}", prop, elem)
}
