use std::{process::Command, time::Duration};
use crate::utils::process::{run_with_timeout, ProcessOutput};
use super::{parse_prop_value, props::SWITCH_ON};

/// Get/set access to properties of a running INDI server.
///
/// `set` is fire-and-forget: there is no acknowledgement and no error
/// for unknown devices. Callers have to infer failures from later reads.
pub trait PropertyBus: Send + Sync {
    /// `prop` is `PROPERTY.ELEMENT`. Returns `None` if there is no value
    /// or the call timed out
    fn get(&self, device: &str, prop: &str) -> Option<String>;

    /// Writes all `elements` of vector property `prop` in one command
    fn set(&self, device: &str, prop: &str, elements: &[(&str, &str)]);

    fn get_f64(&self, device: &str, prop: &str) -> Option<f64> {
        self.get(device, prop).and_then(|v| parse_prop_value(&v))
    }

    fn set_switch(&self, device: &str, prop: &str, elem: &str) {
        self.set(device, prop, &[(elem, SWITCH_ON)]);
    }
}

pub const INDI_CALL_TIMEOUT: Duration = Duration::from_secs(5);

const GETPROP_FNAME: &str = "indi_getprop";
const SETPROP_FNAME: &str = "indi_setprop";

/// Connection switches of all devices. Output is one line per device
const SERVER_CHECK_PROP: &str = "*.CONNECTION.CONNECT";

/// Property bus backed by `indi_getprop` / `indi_setprop` command line tools
pub struct IndiCliBus {
    host:        Option<String>,
    port:        Option<u16>,
    timeout:     Duration,
    getprop_exe: String,
    setprop_exe: String,
}

impl IndiCliBus {
    pub fn new(host: Option<String>, port: Option<u16>) -> Self {
        Self {
            host,
            port,
            timeout:     INDI_CALL_TIMEOUT,
            getprop_exe: GETPROP_FNAME.to_string(),
            setprop_exe: SETPROP_FNAME.to_string(),
        }
    }

    #[cfg(test)]
    fn with_tools(mut self, getprop_exe: &str, setprop_exe: &str) -> Self {
        self.getprop_exe = getprop_exe.to_string();
        self.setprop_exe = setprop_exe.to_string();
        self
    }

    pub fn server_available(&self) -> bool {
        match self.run(&self.getprop_exe, SERVER_CHECK_PROP) {
            Some(output) =>
                output.status.success() ||
                !output.stderr.to_lowercase().contains("unable to connect"),
            None =>
                false,
        }
    }

    fn run(&self, exe: &str, arg: &str) -> Option<ProcessOutput> {
        let mut cmd = Command::new(exe);
        if let Some(host) = &self.host {
            cmd.arg("-h").arg(host);
        }
        if let Some(port) = self.port {
            cmd.arg("-p").arg(port.to_string());
        }
        cmd.arg(arg);

        match run_with_timeout(cmd, self.timeout, Duration::from_millis(20)) {
            Ok(output) => Some(output),
            Err(err) => {
                log::warn!("{} {}: {}", exe, arg, err);
                None
            }
        }
    }
}

impl PropertyBus for IndiCliBus {
    fn get(&self, device: &str, prop: &str) -> Option<String> {
        let output = self.run(&self.getprop_exe, &format!("{}.{}", device, prop))?;
        let value = extract_getprop_value(&output.stdout);
        log::trace!("get {}.{} -> {:?}", device, prop, value);
        value
    }

    fn set(&self, device: &str, prop: &str, elements: &[(&str, &str)]) {
        let assignment = format_setprop_arg(device, prop, elements);
        log::debug!("set {}", assignment);
        _ = self.run(&self.setprop_exe, &assignment);
    }
}

fn extract_getprop_value(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.split_once('='))
        .map(|(_, value)| value.trim().to_string())
}

fn format_setprop_arg(device: &str, prop: &str, elements: &[(&str, &str)]) -> String {
    let values = elements
        .iter()
        .map(|(elem, value)| format!("{}={}", elem, value))
        .collect::<Vec<_>>()
        .join(";");
    format!("{}.{}.{}", device, prop, values)
}

#[test]
fn test_extract_getprop_value() {
    assert_eq!(
        extract_getprop_value("Mount 1.TIME_LST.LST=10.5123\n"),
        Some("10.5123".to_string())
    );
    assert_eq!(extract_getprop_value(""), None);
    assert_eq!(
        extract_getprop_value("Mount 2.CONNECTION.CONNECT=Off"),
        Some("Off".to_string())
    );
}

#[test]
fn test_format_setprop_arg() {
    assert_eq!(
        format_setprop_arg("Mount 1", "EQUATORIAL_EOD_COORD", &[("RA", "1.5"), ("DEC", "-20")]),
        "Mount 1.EQUATORIAL_EOD_COORD.RA=1.5;DEC=-20"
    );
    assert_eq!(
        format_setprop_arg("Mount 1", "ON_COORD_SET", &[("SLEW", "On")]),
        "Mount 1.ON_COORD_SET.SLEW=On"
    );
}

/// Writes executable shell script with `body` into `dir`
#[cfg(unix)]
#[cfg(test)]
fn fake_tool(dir: &std::path::Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let file_name = dir.join(name);
    std::fs::write(&file_name, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&file_name, std::fs::Permissions::from_mode(0o755)).unwrap();
    file_name.to_string_lossy().into_owned()
}

#[cfg(unix)]
#[test]
fn test_cli_bus_with_big_output() {
    let dir = std::env::temp_dir().join(format!("mount_fleet_bus_{}", rand::random::<u64>()));
    std::fs::create_dir_all(&dir).unwrap();
    // about 200 KB, much more than pipe buffer
    let getprop = fake_tool(
        &dir, "getprop",
        "yes 'Mount 1.EQUATORIAL_EOD_COORD.RA=10.5123456789012345' | head -n 4000"
    );
    let setprop = fake_tool(&dir, "setprop", "echo \"$@\" > \"$(dirname \"$0\")/set_args\"");
    let bus = IndiCliBus::new(None, None).with_tools(&getprop, &setprop);

    let start = std::time::Instant::now();
    assert!(bus.server_available());
    assert_eq!(bus.get_f64("Mount 1", "EQUATORIAL_EOD_COORD.RA"), Some(10.5123456789012345));
    assert!(start.elapsed() < Duration::from_secs(4));

    bus.set("Mount 1", "ON_COORD_SET", &[("SLEW", "On")]);
    let args = std::fs::read_to_string(dir.join("set_args")).unwrap();
    assert_eq!(args.trim(), "Mount 1.ON_COORD_SET.SLEW=On");

    _ = std::fs::remove_dir_all(&dir);
}

#[cfg(unix)]
#[test]
fn test_cli_bus_server_down() {
    let dir = std::env::temp_dir().join(format!("mount_fleet_bus_{}", rand::random::<u64>()));
    std::fs::create_dir_all(&dir).unwrap();
    let getprop = fake_tool(
        &dir, "getprop",
        "echo 'indi_getprop: Unable to connect to localhost' >&2; exit 1"
    );
    let bus = IndiCliBus::new(None, Some(7624)).with_tools(&getprop, &getprop);
    assert!(!bus.server_available());
    assert_eq!(bus.get("Mount 1", "CONNECTION.CONNECT"), None);

    let bus = IndiCliBus::new(None, None)
        .with_tools("mount_fleet_no_such_getprop", "mount_fleet_no_such_setprop");
    assert!(!bus.server_available());
    _ = std::fs::remove_dir_all(&dir);
}
