use std::io::{BufRead, Write};
use crate::{
    mount::{MountError, MountUnit, Result},
    sky_math::{EqCoord, HorizCoord},
};

/// Operator measures mount direction (phone inclinometer and compass)
/// and types it in as `AZ ALT`
pub struct ManualVerifier<R: BufRead, W: Write> {
    input:  R,
    output: W,
}

impl ManualVerifier<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdin() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ManualVerifier<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_horizontal(&mut self, device: &str) -> anyhow::Result<HorizCoord> {
        loop {
            write!(self.output, "{}: enter measured AZ ALT in degrees (empty line to skip): ", device)?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                anyhow::bail!("end of input");
            }
            let line = line.trim();
            if line.is_empty() {
                anyhow::bail!("skipped by operator");
            }
            match parse_az_alt(line) {
                Some(crd) => return Ok(crd),
                None => writeln!(self.output, "Expected two numbers: AZ (0..360) and ALT (-90..90)")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> super::PositionVerifier for ManualVerifier<R, W> {
    fn measure(&mut self, unit: &MountUnit) -> Result<EqCoord> {
        let crd = self.read_horizontal(unit.device())
            .map_err(|err| MountError::PlateSolveFailed(
                format!("manual measurement: {}", err)
            ))?;
        log::info!("{}: operator measured {:?}", unit.device(), crd);
        let (eq, _) = unit.horiz_to_eq(&crd)?;
        Ok(eq)
    }
}

fn parse_az_alt(text: &str) -> Option<HorizCoord> {
    let mut items = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty());
    let az = items.next()?.parse::<f64>().ok()?;
    let alt = items.next()?.parse::<f64>().ok()?;
    if items.next().is_some()
    || !(0.0..=360.0).contains(&az)
    || !(-90.0..=90.0).contains(&alt) {
        return None;
    }
    Some(HorizCoord { az: az % 360.0, alt })
}

#[test]
fn test_parse_az_alt() {
    assert_eq!(parse_az_alt("90 45"), Some(HorizCoord { az: 90.0, alt: 45.0 }));
    assert_eq!(parse_az_alt("360, -5.5"), Some(HorizCoord { az: 0.0, alt: -5.5 }));
    assert_eq!(parse_az_alt("90"), None);
    assert_eq!(parse_az_alt("90 45 1"), None);
    assert_eq!(parse_az_alt("north 45"), None);
    assert_eq!(parse_az_alt("90 95"), None);
}

#[test]
fn test_manual_verifier() {
    use std::sync::Arc;
    use crate::{
        indi::{mock::MockBus, PropertyBus},
        mount::MountTiming,
        options::{ConfigStore, FleetConfig},
        sky_math::GeoLocation,
    };
    use super::PositionVerifier;

    let bus = Arc::new(MockBus::new());
    bus.add_mount("Mount 1", 40.0, 6.0);
    let mut config = FleetConfig::default();
    config.set_location(&GeoLocation::new(40.0, -105.0).unwrap());
    let bus_dyn: Arc<dyn PropertyBus> = bus.clone();
    let unit = MountUnit::new(
        1, bus_dyn,
        Arc::new(ConfigStore::in_memory(config)),
        MountTiming::instant()
    );

    let mut output = Vec::new();
    let mut verifier = ManualVerifier::new("bad\n180 50\n\n".as_bytes(), &mut output);
    let eq = verifier.measure(&unit).unwrap();
    // south at alt 50 for lat 40 is on meridian
    assert!(f64::abs(eq.ra - 6.0) < 1e-9);
    assert!(f64::abs(eq.dec - 0.0) < 1e-9);
    assert!(matches!(verifier.measure(&unit), Err(MountError::PlateSolveFailed(_))));
    assert!(matches!(verifier.measure(&unit), Err(MountError::PlateSolveFailed(_))));
    drop(verifier);
    assert!(String::from_utf8(output).unwrap().contains("Expected two numbers"));
}
