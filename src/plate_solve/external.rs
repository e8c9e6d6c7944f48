use std::{process::Command, time::{Duration, Instant}};
use chrono::{DateTime, Local, Utc};
use once_cell::sync::Lazy;
use crate::{
    indi::value_to_sexagesimal,
    mount::{MountError, MountUnit, Result},
    sky_math::EqCoord,
    utils::{math::normalize_hours, process::run_with_timeout},
};
use super::CameraSelect;

pub const DEF_SOLVE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct ExternalSolverOptions {
    /// Path of capture-and-solve program. Used as is, spaces included
    pub cmd:      String,
    /// Extra arguments placed before camera and exposure arguments
    pub args:     Vec<String>,
    pub camera:   CameraSelect,
    pub exposure: f64, // in seconds
    pub gain:     i32,
    pub fov:      f64, // estimated field of view in degrees
    pub timeout:  Duration,
}

#[derive(Debug, Clone)]
pub struct PlateSolveOkResult {
    pub crd:      EqCoord,
    pub time:     DateTime<Utc>,
    pub duration: Duration,
}

impl PlateSolveOkResult {
    pub fn print_to_log(&self) {
        log::debug!(
            "plate solver result = (ra: {}, dec: {}), solved at {}, solve time = {:.1}s",
            value_to_sexagesimal(self.crd.ra, true, 9),
            value_to_sexagesimal(self.crd.dec, true, 8),
            self.time.with_timezone(&Local).format("%H:%M:%S"),
            self.duration.as_secs_f64(),
        );
    }
}

/// Runs external program that captures frame from camera and plate
/// solves it. Program has to print `RA_DEG DEC_DEG` as last line of stdout
pub struct ExternalSolver {
    options: ExternalSolverOptions,
}

impl ExternalSolver {
    pub fn new(options: ExternalSolverOptions) -> Self {
        Self { options }
    }

    fn build_command(&self) -> anyhow::Result<Command> {
        if self.options.cmd.trim().is_empty() {
            anyhow::bail!("Plate solver command is empty");
        }
        let mut cmd = Command::new(&self.options.cmd);
        cmd.args(&self.options.args);
        match &self.options.camera {
            CameraSelect::Id(id) =>
                cmd.arg("--camera").arg(id),
            CameraSelect::Index(index) =>
                cmd.arg("--camera-index").arg(index.to_string()),
        };
        cmd
            .arg("--exposure").arg(self.options.exposure.to_string())
            .arg("--gain").arg(self.options.gain.to_string())
            .arg("--fov").arg(self.options.fov.to_string());
        Ok(cmd)
    }

    fn solve(&self) -> anyhow::Result<PlateSolveOkResult> {
        let cmd = self.build_command()?;
        log::debug!("Running plate solver {:?} args={:?}", cmd.get_program(), cmd.get_args());

        let start_time = Instant::now();
        let output = run_with_timeout(cmd, self.options.timeout, Duration::from_millis(100))?;
        log::debug!("Platesolver stdout:\n{}", output.stdout);

        if !output.status.success() {
            anyhow::bail!("Plate solver exited with {}: {}", output.status, output.stderr.trim());
        }

        let Some(crd) = parse_solver_output(&output.stdout) else {
            anyhow::bail!("Can't extract RA and DEC from plate solver output");
        };

        Ok(PlateSolveOkResult {
            crd,
            time: Utc::now(),
            duration: start_time.elapsed(),
        })
    }

    pub fn measure(&mut self, unit: &MountUnit) -> Result<EqCoord> {
        log::info!("{}: plate solving with camera {:?}", unit.device(), self.options.camera);
        match self.solve() {
            Ok(result) => {
                result.print_to_log();
                Ok(result.crd)
            }
            Err(err) => {
                log::error!("{}: plate solve failed: {}", unit.device(), err);
                Err(MountError::PlateSolveFailed(err.to_string()))
            }
        }
    }
}

/// Last non-empty line is `RA_DEG DEC_DEG` (space or comma separated).
/// RA is converted into hours
fn parse_solver_output(text: &str) -> Option<EqCoord> {
    static RE_RA_DEC: Lazy<regex::Regex> = Lazy::new(|| {
        regex::Regex::new(r"^([0-9eE.+-]+)[\s,]+([0-9eE.+-]+)$").unwrap()
    });
    let line = text.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    let cap = RE_RA_DEC.captures(line)?;
    let ra_deg = cap.get(1)?.as_str().parse::<f64>().ok()?;
    let dec = cap.get(2)?.as_str().parse::<f64>().ok()?;
    if !ra_deg.is_finite() || !dec.is_finite() || dec.abs() > 90.0 {
        return None;
    }
    Some(EqCoord {
        ra: normalize_hours(ra_deg / 15.0),
        dec,
    })
}

#[test]
fn test_parse_solver_output() {
    let crd = parse_solver_output("capturing...\nsolving...\n187.5 -12.25\n\n").unwrap();
    assert!(f64::abs(crd.ra - 12.5) < 1e-12);
    assert!(f64::abs(crd.dec + 12.25) < 1e-12);

    let crd = parse_solver_output("360.0, 89.0").unwrap();
    assert!(crd.ra >= 0.0 && crd.ra < 24.0);

    assert!(parse_solver_output("").is_none());
    assert!(parse_solver_output("10.0 20.0\nsolve failed").is_none());
    assert!(parse_solver_output("10.0 95.0").is_none());
    assert!(parse_solver_output("NaN 10.0").is_none());
}

#[cfg(test)]
fn test_options(cmd: &str, args: &[&str]) -> ExternalSolverOptions {
    ExternalSolverOptions {
        cmd:      cmd.to_string(),
        args:     args.iter().map(|a| a.to_string()).collect(),
        camera:   CameraSelect::Id("ZWO ASI120MM".to_string()),
        exposure: 1.5,
        gain:     100,
        fov:      8.0,
        timeout:  Duration::from_secs(10),
    }
}

#[test]
fn test_build_command_keeps_spaces() {
    let solver = ExternalSolver::new(test_options(
        "/opt/My Tools/capture solve",
        &["--index-dir", "/data/astrometry index"]
    ));
    let cmd = solver.build_command().unwrap();
    assert_eq!(cmd.get_program(), "/opt/My Tools/capture solve");
    let args = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect::<Vec<_>>();
    assert_eq!(args, [
        "--index-dir", "/data/astrometry index",
        "--camera", "ZWO ASI120MM",
        "--exposure", "1.5",
        "--gain", "100",
        "--fov", "8",
    ]);

    let solver = ExternalSolver::new(test_options("  ", &[]));
    assert!(solver.build_command().is_err());
}

#[cfg(unix)]
#[test]
fn test_solve_with_big_output() {
    let solver = ExternalSolver::new(test_options(
        "sh",
        &["-c", "yes 'solving field...' | head -n 20000; echo '187.5 -12.25'", "solver"]
    ));
    let result = solver.solve().unwrap();
    assert!(f64::abs(result.crd.ra - 12.5) < 1e-12);
    assert!(f64::abs(result.crd.dec + 12.25) < 1e-12);
    assert!(result.duration < Duration::from_secs(10));

    let solver = ExternalSolver::new(test_options(
        "sh",
        &["-c", "echo 'no stars found' >&2; exit 2", "solver"]
    ));
    let err = solver.solve().unwrap_err().to_string();
    assert!(err.contains("no stars found"));
}
