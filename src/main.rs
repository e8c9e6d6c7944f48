#![allow(dead_code)]
#![allow(
    clippy::too_many_arguments,
    clippy::upper_case_acronyms,
    clippy::uninlined_format_args,
    clippy::wrong_self_convention
)]

mod indi;
mod sky_math;
mod utils;
mod mount;
mod plate_solve;
mod options;
mod log_utils;

use std::{ops::RangeInclusive, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use crate::{
    indi::{value_to_sexagesimal, IndiCliBus, PropertyBus},
    mount::{
        calibrate_pointing, device_name, solve_and_sync_all, ClosedLoopCorrector,
        ConnectOutcome, FleetController, FleetDiagnostics, GotoReport, MountError,
        MountTiming, SolveSyncResult, SyncReport, CALIBR_TARGETS, DEF_MAX_ITERATIONS,
        DEF_TOLERANCE,
    },
    options::ConfigStore,
    plate_solve::{
        CameraSelect, ExternalSolver, ExternalSolverOptions, ManualVerifier,
        PlateSolver, PositionVerifier, DEF_SOLVE_TIMEOUT,
    },
    sky_math::{calc_local_sidereal_time, EqCoord, HorizCoord},
    utils::{io_utils::get_app_dir, math::{radian_to_degree, wrap_12h}},
};

/// Goto, sync and pointing calibration of telescope mounts attached to INDI server
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file [default: <config dir>/.mount_fleet/fleet.json]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host of INDI server
    #[arg(long, global = true)]
    indi_host: Option<String>,

    /// Port of INDI server
    #[arg(long, global = true)]
    indi_port: Option<u16>,

    /// Debug messages in log
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    solver: SolverArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SolverArgs {
    /// Capture-and-solve program. Must print `RA_DEG DEC_DEG` as last line
    #[arg(long, global = true)]
    solver_cmd: Option<String>,

    /// Argument passed to solver program (repeat for more arguments)
    #[arg(long = "solver-arg", global = true, allow_hyphen_values = true)]
    solver_args: Vec<String>,

    /// Camera id passed to solver command
    #[arg(long, global = true)]
    camera: Option<String>,

    /// Camera index passed to solver command
    #[arg(long, global = true)]
    camera_index: Option<usize>,

    /// Exposure in seconds
    #[arg(long, global = true, default_value_t = 0.5)]
    exposure: f64,

    #[arg(long, global = true, default_value_t = 50)]
    gain: i32,

    /// Estimated field of view in degrees
    #[arg(long, global = true, default_value_t = 10.0)]
    fov: f64,

    /// Timeout of solver command in seconds
    #[arg(long, global = true, default_value_t = DEF_SOLVE_TIMEOUT.as_secs())]
    solve_timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Show discovered mounts and their positions
    Status,

    /// Assign /dev/ttyACM* ports to mounts and connect them
    Connect,

    /// Slew mounts to horizontal position
    #[command(allow_negative_numbers = true)]
    Goto {
        /// Azimuth in degrees (0..360)
        #[arg(value_parser = parse_az)]
        az: f64,

        /// Altitude in degrees (-90..90)
        #[arg(value_parser = parse_alt)]
        alt: f64,

        /// Only this mount
        #[arg(long)]
        mount: Option<u32>,
    },

    /// Slew one mount to equatorial position
    #[command(allow_negative_numbers = true)]
    GotoEq {
        /// Right ascension in hours (0..24)
        #[arg(value_parser = parse_ra)]
        ra: f64,

        /// Declination in degrees (-90..90)
        #[arg(value_parser = parse_dec)]
        dec: f64,

        #[arg(long)]
        mount: u32,
    },

    /// Tell mounts they point to horizontal position
    #[command(allow_negative_numbers = true)]
    Sync {
        #[arg(value_parser = parse_az)]
        az: f64,

        #[arg(value_parser = parse_alt)]
        alt: f64,

        #[arg(long)]
        mount: Option<u32>,
    },

    /// Tell one mount it points to equatorial position
    #[command(allow_negative_numbers = true)]
    SyncEq {
        #[arg(value_parser = parse_ra)]
        ra: f64,

        #[arg(value_parser = parse_dec)]
        dec: f64,

        #[arg(long)]
        mount: u32,
    },

    /// Store observer location and apply it to all mounts
    #[command(allow_negative_numbers = true)]
    SetLocation {
        /// Latitude in degrees (-90..90)
        #[arg(value_parser = parse_lat)]
        lat: f64,

        /// East longitude in degrees (-180..180)
        #[arg(value_parser = parse_lon)]
        lon: f64,
    },

    /// Abort motion of all mounts
    Stop,

    /// Measure polar misalignment of a mount and store pointing model
    CalibratePointing {
        /// Measure positions with plate solver instead of asking operator
        #[arg(long)]
        auto: bool,

        /// List stored pointing models
        #[arg(long)]
        show: bool,

        /// Remove pointing model of mount
        #[arg(long)]
        clear: bool,

        #[arg(long)]
        mount: Option<u32>,
    },

    /// Plate solve where mounts point and sync them to solved position
    Calibrate {
        /// Only measure pointing error, don't sync
        #[arg(long, visible_alias = "dry-run")]
        verify: bool,

        /// Every discovered mount, each with its own camera
        #[arg(long, conflicts_with = "mount")]
        all: bool,

        /// Mount to calibrate [default: 1]
        #[arg(long)]
        mount: Option<u32>,
    },

    /// Check serial ports, INDI server, mounts and configuration
    Diagnose,

    /// Slew and correct by plate solving until mount is on target
    #[command(allow_negative_numbers = true)]
    GotoSolve {
        #[arg(value_parser = parse_az)]
        az: f64,

        #[arg(value_parser = parse_alt)]
        alt: f64,

        #[arg(long)]
        mount: u32,

        /// Acceptable error in degrees
        #[arg(long, default_value_t = DEF_TOLERANCE)]
        tolerance: f64,

        #[arg(long, default_value_t = DEF_MAX_ITERATIONS)]
        max_iterations: usize,
    },

    /// Check coordinate conversion and sidereal time of first mount
    #[command(allow_negative_numbers = true)]
    Debug {
        #[arg(value_parser = parse_az, default_value_t = 180.0)]
        az: f64,

        #[arg(value_parser = parse_alt, default_value_t = 45.0)]
        alt: f64,
    },
}

fn parse_in_range(text: &str, range: RangeInclusive<f64>, what: &str) -> Result<f64, String> {
    let value = text.trim().parse::<f64>()
        .map_err(|_| format!("`{}` is not a number", text))?;
    if !range.contains(&value) {
        return Err(format!("{} must be within {}..{}", what, range.start(), range.end()));
    }
    Ok(value)
}

fn parse_az(text: &str) -> Result<f64, String> {
    parse_in_range(text, 0.0..=360.0, "azimuth")
}

fn parse_alt(text: &str) -> Result<f64, String> {
    parse_in_range(text, -90.0..=90.0, "altitude")
}

fn parse_ra(text: &str) -> Result<f64, String> {
    parse_in_range(text, 0.0..=24.0, "right ascension")
}

fn parse_dec(text: &str) -> Result<f64, String> {
    parse_in_range(text, -90.0..=90.0, "declination")
}

fn parse_lat(text: &str) -> Result<f64, String> {
    parse_in_range(text, -90.0..=90.0, "latitude")
}

fn parse_lon(text: &str) -> Result<f64, String> {
    parse_in_range(text, -180.0..=180.0, "longitude")
}

fn panic_handler(
    panic_info:        &std::panic::PanicHookInfo,
    def_panic_handler: &(dyn Fn(&std::panic::PanicHookInfo<'_>) + 'static + Sync + Send),
) {
    let payload_str =
        if let Some(msg) = panic_info.payload().downcast_ref::<&'static str>() {
            Some(*msg)
        } else if let Some(msg) = panic_info.payload().downcast_ref::<String>() {
            Some(msg.as_str())
        } else {
            None
        };

    log::error!("(╯°□°）╯︵ ┻━┻ PANIC OCCURRED");

    if let Some(payload) = &payload_str {
        log::error!("Panic payload: {}", payload);
    }

    if let Some(loc) = panic_info.location() {
        log::error!("Panic location: {}", loc);
    }

    log::error!(
        "Panic stacktrace: {}",
        std::backtrace::Backtrace::force_capture()
    );

    def_panic_handler(panic_info);
}

fn start_logging(verbose: bool) -> anyhow::Result<PathBuf> {
    let mut logs_dir = get_app_dir()?;
    logs_dir.push("logs");
    log_utils::cleanup_old_logs(&logs_dir, 14/*days*/);
    log_utils::start_logger(&logs_dir)?;
    log::set_max_level(if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info });

    log::info!(
        "{} {} ver. {} is started with args {:?}",
        env!("CARGO_PKG_NAME"),
        std::env::consts::ARCH,
        env!("CARGO_PKG_VERSION"),
        std::env::args().skip(1).collect::<Vec<_>>()
    );

    std::panic::set_hook({
        let default_panic_handler = std::panic::take_hook();
        Box::new(move |panic_info| {
            panic_handler(panic_info, default_panic_handler.as_ref())
        })
    });

    Ok(logs_dir)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = start_logging(cli.verbose) {
        eprintln!("Can't start logger: {}", err);
    }

    let result = run(&cli);
    match &result {
        Ok(true) => log::info!("Command succeeded"),
        Ok(false) => log::warn!("Command partially failed"),
        Err(err) => log::error!("Command failed: {:#}", err),
    }
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            print_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn print_error(err: &anyhow::Error) {
    if let Some(mount_err) = err.downcast_ref::<MountError>() {
        println!("Error: {}", mount_err);
        println!("  {}", mount_err.remediation());
    } else {
        println!("Error: {:#}", err);
    }
}

fn print_unit_error(unit_id: u32, err: &MountError) {
    println!("{}: FAILED: {}", device_name(unit_id), err);
    println!("  {}", err.remediation());
}

/// Returns `Ok(false)` if command failed for some of the mounts
fn run(cli: &Cli) -> anyhow::Result<bool> {
    let store = Arc::new(match &cli.config {
        Some(file_name) => ConfigStore::open(file_name),
        None => ConfigStore::open_default()?,
    });
    log::info!("Configuration file: {:?}", store.file_name());

    let bus = Arc::new(IndiCliBus::new(cli.indi_host.clone(), cli.indi_port));
    let fleet = FleetController::new(
        Arc::clone(&bus) as Arc<dyn PropertyBus>,
        Arc::clone(&store),
        MountTiming::default(),
    );

    let offline = matches!(
        cli.command,
        Commands::SetLocation { .. } |
        Commands::CalibratePointing { show: true, .. } |
        Commands::CalibratePointing { clear: true, .. } |
        Commands::Diagnose
    );
    if !offline {
        start_session(&bus, &fleet)?;
    }

    match &cli.command {
        Commands::Status =>
            cmd_status(&fleet),
        Commands::Connect =>
            cmd_connect(&fleet),
        Commands::Goto { az, alt, mount } =>
            cmd_goto(&fleet, *az, *alt, *mount),
        Commands::GotoEq { ra, dec, mount } =>
            cmd_goto_eq(&fleet, *ra, *dec, *mount),
        Commands::Sync { az, alt, mount } =>
            cmd_sync(&fleet, *az, *alt, *mount),
        Commands::SyncEq { ra, dec, mount } =>
            cmd_sync_eq(&fleet, *ra, *dec, *mount),
        Commands::Stop =>
            cmd_stop(&fleet),
        Commands::SetLocation { lat, lon } =>
            cmd_set_location(&fleet, *lat, *lon),
        Commands::CalibratePointing { show: true, .. } => {
            show_pointing_models(fleet.store());
            Ok(true)
        }
        Commands::CalibratePointing { clear: true, mount, .. } =>
            cmd_clear_model(&fleet, *mount),
        Commands::CalibratePointing { auto, mount, .. } =>
            cmd_calibrate(&fleet, &cli.solver, *auto, *mount),
        Commands::Calibrate { verify, all, mount } =>
            cmd_solve_sync(&fleet, &cli.solver, *verify, *all, *mount),
        Commands::Diagnose =>
            cmd_diagnose(&bus, &fleet),
        Commands::GotoSolve { az, alt, mount, tolerance, max_iterations } =>
            cmd_goto_solve(&fleet, &cli.solver, *az, *alt, *mount, *tolerance, *max_iterations),
        Commands::Debug { az, alt } =>
            cmd_debug(&fleet, *az, *alt),
    }
}

/// INDI server must answer and mounts must know where they are
/// before any coordinate conversion
fn start_session(bus: &IndiCliBus, fleet: &FleetController) -> anyhow::Result<()> {
    if !bus.server_available() {
        anyhow::bail!("INDI server is not available. Is indiserver running?");
    }
    match fleet.setup_location(None, None) {
        Ok(_) => Ok(()),
        Err(MountError::LocationNotSet) => {
            log::warn!("Location is not set");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn create_plate_solver(args: &SolverArgs, store: &ConfigStore, unit_id: u32) -> PlateSolver {
    let Some(cmd) = &args.solver_cmd else {
        return PlateSolver::NotAvailable;
    };
    let camera = CameraSelect::for_unit(
        args.camera.as_deref(),
        args.camera_index,
        store,
        unit_id
    );
    PlateSolver::External(ExternalSolver::new(ExternalSolverOptions {
        cmd:      cmd.clone(),
        args:     args.solver_args.clone(),
        camera,
        exposure: args.exposure,
        gain:     args.gain,
        fov:      args.fov,
        timeout:  Duration::from_secs(args.solve_timeout),
    }))
}

fn fmt_eq(crd: &EqCoord) -> String {
    format!(
        "ra={}, dec={}",
        value_to_sexagesimal(crd.ra, true, 9),
        value_to_sexagesimal(crd.dec, true, 8)
    )
}

fn fmt_hz(crd: &HorizCoord) -> String {
    format!("az={:.3}°, alt={:.3}°", crd.az, crd.alt)
}

fn fmt_opt<T>(value: Option<T>, fmt: impl FnOnce(T) -> String) -> String {
    value.map(fmt).unwrap_or_else(|| "-".to_string())
}

fn cmd_status(fleet: &FleetController) -> anyhow::Result<bool> {
    let units = fleet.discover();
    if units.is_empty() {
        return Err(MountError::NoUnitsDiscovered.into());
    }
    println!(
        "Location: {}",
        fmt_opt(fleet.store().location(), |l| format!("lat={:.4}°, lon={:.4}°", l.lat, l.lon))
    );
    for unit in &units {
        let status = unit.status();
        println!(
            "{} (unit {}): {}",
            status.device, status.id,
            if status.connected { "connected" } else { "disconnected" }
        );
        println!("  port:           {}", status.port.as_deref().unwrap_or("-"));
        println!(
            "  driver location: {}",
            fmt_opt(status.driver_location, |l| format!("lat={:.4}°, lon={:.4}°", l.lat, l.lon))
        );
        println!("  horizontal:     {}", fmt_opt(status.horizontal, |c| fmt_hz(&c)));
        println!("  equatorial:     {}", fmt_opt(status.equatorial, |c| fmt_eq(&c)));
        println!(
            "  steppers:       {}",
            fmt_opt(status.steps, |s| format!("ra={:.0}, dec={:.0}", s.ra_steps, s.dec_steps))
        );
        println!("  lst:            {}", fmt_opt(status.lst, |t| value_to_sexagesimal(t, true, 9)));
        println!(
            "  goto status:    ra={}, dec={}",
            status.ra_goto.as_deref().unwrap_or("-"),
            status.dec_goto.as_deref().unwrap_or("-")
        );
        println!("  coord set mode: {}", status.coord_mode.unwrap_or("-"));
        if !status.pointing_model.is_zero() {
            println!(
                "  pointing model: me={:.4}°, ma={:.4}°",
                radian_to_degree(status.pointing_model.me),
                radian_to_degree(status.pointing_model.ma)
            );
        }
    }
    Ok(true)
}

fn cmd_connect(fleet: &FleetController) -> anyhow::Result<bool> {
    let ports = FleetController::available_ports();
    println!("Serial ports: {}", if ports.is_empty() { "-".to_string() } else { ports.iter().join(", ") });
    let outcomes = fleet.auto_connect(&ports)?;
    for (unit_id, outcome) in &outcomes {
        match outcome {
            ConnectOutcome::Connected(port) =>
                println!("{}: connected on {}", device_name(*unit_id), port),
            ConnectOutcome::Failed(port) =>
                println!("{}: FAILED to connect on {}", device_name(*unit_id), port),
            ConnectOutcome::NoPort =>
                println!("{}: no free serial port", device_name(*unit_id)),
        }
    }
    Ok(outcomes.values().all(|o| matches!(o, ConnectOutcome::Connected(_))))
}

fn print_goto_report(unit_id: u32, report: &GotoReport) {
    println!(
        "{}: done, commanded {}, reached {} / {}",
        device_name(unit_id),
        fmt_eq(&report.commanded),
        fmt_opt(report.reached_eq, |c| fmt_eq(&c)),
        fmt_opt(report.reached_hz, |c| fmt_hz(&c)),
    );
}

fn fmt_hz_error(reached: Option<HorizCoord>, target: &HorizCoord) -> String {
    fmt_opt(reached, |reached| {
        let (az_err, alt_err) = reached.error_to(target);
        format!("az={:+.3}°, alt={:+.3}°", az_err, alt_err)
    })
}

fn cmd_goto(fleet: &FleetController, az: f64, alt: f64, mount: Option<u32>) -> anyhow::Result<bool> {
    println!("Goto {}", fmt_hz(&HorizCoord { az, alt }));
    let report = fleet.goto_all(az, alt, mount)?;
    println!(
        "Target {} (lst={})",
        fmt_eq(&report.target_eq),
        value_to_sexagesimal(report.lst, true, 9)
    );
    for (unit_id, result) in &report.results {
        match result {
            Ok(goto) => {
                print_goto_report(*unit_id, goto);
                println!("  error {}", fmt_hz_error(goto.reached_hz, &report.target_hz));
            }
            Err(err) => print_unit_error(*unit_id, err),
        }
    }
    Ok(report.all_ok())
}

fn cmd_goto_eq(fleet: &FleetController, ra: f64, dec: f64, mount: u32) -> anyhow::Result<bool> {
    let unit = fleet.unit(mount)?;
    println!("{}: goto {}", unit.device(), fmt_eq(&EqCoord { ra, dec }));
    let report = unit.goto_equatorial(ra, dec)?;
    print_goto_report(mount, &report);
    println!(
        "  error {}",
        fmt_opt(report.reached_eq, |c| format!("{:.3}°", EqCoord::angle_between(&c, &report.target)))
    );
    Ok(true)
}

fn print_sync_report(unit_id: u32, report: &SyncReport) {
    println!("{}: synced", device_name(unit_id));
    println!(
        "  before {} / {}",
        fmt_eq(&report.before_eq),
        fmt_opt(report.before_hz, |c| fmt_hz(&c))
    );
    println!(
        "  after  {} / {}",
        fmt_opt(report.after_eq, |c| fmt_eq(&c)),
        fmt_opt(report.after_hz, |c| fmt_hz(&c))
    );
    let residual = fmt_opt(report.residual(), |(e1, e2)| {
        if report.target_hz.is_some() {
            format!("az={:+.3}°, alt={:+.3}°", e1, e2)
        } else {
            format!("ra={:+.3}°, dec={:+.3}°", e1, e2)
        }
    });
    if report.is_suspicious() {
        println!("  WARNING: position after sync differs from target: {}", residual);
    } else {
        println!("  error  {}", residual);
    }
}

fn cmd_sync(fleet: &FleetController, az: f64, alt: f64, mount: Option<u32>) -> anyhow::Result<bool> {
    println!("Sync {}", fmt_hz(&HorizCoord { az, alt }));
    let report = fleet.sync_all(az, alt, mount)?;
    if let Some(target_eq) = report.results.values().flatten().next().map(|r| r.target_eq) {
        println!("Target {} = {}", fmt_hz(&report.target_hz), fmt_eq(&target_eq));
    }
    for (unit_id, result) in &report.results {
        match result {
            Ok(sync) => print_sync_report(*unit_id, sync),
            Err(err) => print_unit_error(*unit_id, err),
        }
    }
    Ok(report.all_ok())
}

fn cmd_sync_eq(fleet: &FleetController, ra: f64, dec: f64, mount: u32) -> anyhow::Result<bool> {
    let unit = fleet.unit(mount)?;
    println!("{}: sync {}", unit.device(), fmt_eq(&EqCoord { ra, dec }));
    let report = unit.sync_equatorial(ra, dec)?;
    print_sync_report(mount, &report);
    Ok(true)
}

fn cmd_set_location(fleet: &FleetController, lat: f64, lon: f64) -> anyhow::Result<bool> {
    let (location, count) = fleet.setup_location(Some(lat), Some(lon))?;
    println!(
        "Location lat={:.4}°, lon={:.4}° saved and applied to {} mount(s)",
        location.lat, location.lon, count
    );
    Ok(true)
}

fn cmd_stop(fleet: &FleetController) -> anyhow::Result<bool> {
    let count = fleet.stop_all();
    if count == 0 {
        return Err(MountError::NoUnitsDiscovered.into());
    }
    println!("Stop sent to {} mount(s)", count);
    Ok(true)
}

fn show_pointing_models(store: &ConfigStore) {
    let models = store.pointing_models();
    if models.is_empty() {
        println!("No pointing models stored");
        return;
    }
    for (unit_id, model) in &models {
        println!(
            "Unit {}: me={:.4}° ({:.6} rad), ma={:.4}° ({:.6} rad)",
            unit_id,
            radian_to_degree(model.me), model.me,
            radian_to_degree(model.ma), model.ma,
        );
    }
}

fn cmd_clear_model(fleet: &FleetController, mount: Option<u32>) -> anyhow::Result<bool> {
    let Some(mount) = mount else {
        anyhow::bail!("--clear needs --mount N");
    };
    if fleet.clear_pointing_model(mount)? {
        println!("Pointing model of {} removed", device_name(mount));
    } else {
        println!("{} has no pointing model", device_name(mount));
    }
    Ok(true)
}

fn cmd_calibrate(
    fleet:  &FleetController,
    solver: &SolverArgs,
    auto:   bool,
    mount:  Option<u32>,
) -> anyhow::Result<bool> {
    let Some(mount) = mount else {
        anyhow::bail!("Calibration needs --mount N");
    };
    let unit = fleet.unit(mount)?;

    let result = if auto {
        let mut verifier = create_plate_solver(solver, fleet.store(), mount);
        calibrate_pointing(fleet, &unit, &mut verifier)?
    } else {
        println!(
            "{} will slew to {} targets. Measure azimuth and altitude of the \
            tube at each of them (compass and inclinometer) and type them in.",
            unit.device(), CALIBR_TARGETS.len()
        );
        let mut verifier = ManualVerifier::stdin();
        calibrate_pointing(fleet, &unit, &mut verifier)?
    };

    for sample in &result.samples {
        println!(
            "target {}: commanded {}, measured ra={}, dec={}",
            fmt_hz(&sample.target),
            fmt_eq(&EqCoord { ra: sample.point.commanded_ra, dec: sample.point.commanded_dec }),
            value_to_sexagesimal(sample.point.actual_ra, true, 9),
            value_to_sexagesimal(sample.point.actual_dec, true, 8),
        );
        println!(
            "  measured {}, error {}",
            fmt_opt(sample.measured_hz, |c| fmt_hz(&c)),
            fmt_hz_error(sample.measured_hz, &sample.target)
        );
    }
    for (target, err) in &result.skipped {
        println!("target {}: SKIPPED: {}", fmt_hz(target), err);
    }
    println!(
        "Pointing model of {} saved: me={:.4}°, ma={:.4}°, rms={:.3}°",
        unit.device(),
        radian_to_degree(result.model.me),
        radian_to_degree(result.model.ma),
        result.rms
    );
    if !result.is_consistent() {
        println!("WARNING: measurements are inconsistent, consider repeating calibration");
    }
    Ok(true)
}

fn print_solve_sync_result(result: &SolveSyncResult, verify: bool) {
    let device = device_name(result.unit_id);
    println!("{}: solved {}", device, fmt_eq(&result.solved));
    println!("  mount reported {}", fmt_opt(result.reported, |c| fmt_eq(&c)));
    match (result.error_arcmin, result.quality()) {
        (Some(error), Some(quality)) => {
            let verdict = if verify { "verified" } else { "before sync" };
            println!("  pointing error {:.1} arcmin ({}, {})", error, quality.as_str(), verdict);
        }
        _ =>
            println!("  pointing error is unknown"),
    }
    if let Some(sync) = &result.sync {
        print_sync_report(result.unit_id, sync);
    } else {
        println!("  mount was not synced");
    }
}

fn cmd_solve_sync(
    fleet:  &FleetController,
    solver: &SolverArgs,
    verify: bool,
    all:    bool,
    mount:  Option<u32>,
) -> anyhow::Result<bool> {
    let filter = if all { None } else { Some(mount.unwrap_or(1)) };
    let results = solve_and_sync_all(fleet, filter, verify, |unit_id| {
        let verifier: Box<dyn PositionVerifier> =
            Box::new(create_plate_solver(solver, fleet.store(), unit_id));
        verifier
    })?;
    for (unit_id, result) in &results {
        match result {
            Ok(result) => print_solve_sync_result(result, verify),
            Err(err) => print_unit_error(*unit_id, err),
        }
    }
    Ok(results.values().all(|r| r.is_ok()))
}

fn print_diagnostics(diag: &FleetDiagnostics) {
    println!("Serial ports:");
    if diag.serial_ports.is_empty() {
        println!("  none found. Is the mount powered on and the USB cable connected?");
    }
    for port in &diag.serial_ports {
        println!("  {}", port);
    }

    if diag.server_available {
        println!("INDI server: running");
    } else {
        println!("INDI server: NOT RUNNING. Start indiserver with the mount drivers");
    }

    if diag.server_available && diag.mounts.is_empty() {
        println!("No mounts found by INDI server");
    }
    for status in &diag.mounts {
        println!(
            "{}: {}, port {}",
            status.device,
            if status.connected { "connected" } else { "disconnected" },
            status.port.as_deref().unwrap_or("-")
        );
    }

    println!("Configuration:");
    println!(
        "  location:        {}",
        fmt_opt(diag.config.location(), |l| format!("lat={:.4}°, lon={:.4}°", l.lat, l.lon))
    );
    println!(
        "  pointing models: {}",
        if diag.config.pointing_models.is_empty() {
            "-".to_string()
        } else {
            diag.config.pointing_models.keys().join(", ")
        }
    );
    for (unit_id, camera) in &diag.config.camera_map {
        println!("  camera of unit {}: {}", unit_id, camera);
    }

    println!("Summary:");
    println!("  serial ports:     {}", diag.serial_ports.len());
    println!("  mounts connected: {} of {}", diag.connected_count(), diag.mounts.len());
    if diag.is_ready() {
        println!("Ready");
    } else if !diag.server_available {
        println!("Start INDI server");
    } else {
        println!("Run: mount_fleet connect");
    }
}

fn cmd_diagnose(bus: &IndiCliBus, fleet: &FleetController) -> anyhow::Result<bool> {
    let diag = fleet.diagnose(FleetController::available_ports(), bus.server_available());
    print_diagnostics(&diag);
    Ok(diag.is_ready())
}

fn cmd_goto_solve(
    fleet:          &FleetController,
    solver:         &SolverArgs,
    az:             f64,
    alt:            f64,
    mount:          u32,
    tolerance:      f64,
    max_iterations: usize,
) -> anyhow::Result<bool> {
    let unit = fleet.unit(mount)?;
    let mut verifier = create_plate_solver(solver, fleet.store(), mount);
    let target = HorizCoord { az, alt };
    println!("{}: goto {} with plate solving", unit.device(), fmt_hz(&target));

    let outcome = ClosedLoopCorrector::new(tolerance, max_iterations)
        .run(&unit, &mut verifier, &target)?;

    for (idx, item) in outcome.iterations.iter().enumerate() {
        println!(
            "iteration {}: commanded {}, measured {}, error az={:+.3}°, alt={:+.3}°",
            idx + 1, fmt_hz(&item.commanded), fmt_hz(&item.measured),
            item.az_err, item.alt_err
        );
    }
    if outcome.converged {
        println!("{}: on target", unit.device());
    } else {
        println!(
            "{}: did NOT converge, last error {}",
            unit.device(),
            fmt_opt(outcome.last_error(), |e| format!("{:.3}°", e))
        );
    }
    Ok(outcome.converged)
}

fn cmd_debug(fleet: &FleetController, az: f64, alt: f64) -> anyhow::Result<bool> {
    let unit = fleet.discover()
        .into_iter()
        .next()
        .ok_or(MountError::NoUnitsDiscovered)?;
    let location = unit.location()?;
    println!("{}: location lat={:.4}°, lon={:.4}°", unit.device(), location.lat, location.lon);

    let calc_lst = calc_local_sidereal_time(&chrono::Utc::now().naive_utc(), location.lon);
    println!(
        "LST: mount={}, computed={}",
        fmt_opt(unit.lst(), |t| value_to_sexagesimal(t, true, 9)),
        value_to_sexagesimal(calc_lst, true, 9)
    );
    if let Some(lst) = unit.lst() {
        let diff_min = wrap_12h(lst - calc_lst) * 60.0;
        println!("  difference {:+.2} min", diff_min);
    }

    let target = HorizCoord { az, alt };
    let (eq, _) = unit.horiz_to_eq(&target)?;
    let back = unit.eq_to_horiz(&eq)?;
    let (az_err, alt_err) = back.error_to(&target);
    println!(
        "Round trip {} -> {} -> {}, error az={:+.6}°, alt={:+.6}°",
        fmt_hz(&target), fmt_eq(&eq), fmt_hz(&back), az_err, alt_err
    );

    match (unit.get_equatorial(), unit.get_horizontal()) {
        (Some(mount_eq), Some(mount_hz)) => {
            let ours = unit.eq_to_horiz(&mount_eq)?;
            let (az_err, alt_err) = ours.error_to(&mount_hz);
            let total = f64::hypot(az_err, alt_err);
            println!(
                "Mount reports {} and {}, our conversion gives {} (difference {:.3}°)",
                fmt_eq(&mount_eq), fmt_hz(&mount_hz), fmt_hz(&ours), total
            );
            if total > 1.0 {
                log::warn!("{}: driver and our conversion differ by {:.3}°", unit.device(), total);
                println!("WARNING: driver conversion differs by more than 1°. Check location and time of the mount");
            }
        }
        _ =>
            println!("Mount position is not available"),
    }
    Ok(true)
}

#[test]
fn test_parse_in_range() {
    assert_eq!(parse_az("359.5"), Ok(359.5));
    assert_eq!(parse_lon(" -105.2 "), Ok(-105.2));
    assert!(parse_az("-1").is_err());
    assert!(parse_alt("91").is_err());
    assert!(parse_ra("24.5").is_err());
    assert!(parse_lat("north").is_err());
}

#[test]
fn test_cli_args() {
    use clap::CommandFactory;
    Cli::command().debug_assert();

    let cli = Cli::try_parse_from(["mount_fleet", "set-location", "40.5", "-105"]).unwrap();
    assert!(matches!(cli.command, Commands::SetLocation { lat, lon } if lat == 40.5 && lon == -105.0));

    let cli = Cli::try_parse_from(["mount_fleet", "goto", "180", "-2", "--mount", "2"]).unwrap();
    assert!(matches!(cli.command, Commands::Goto { mount: Some(2), .. }));

    let cli = Cli::try_parse_from([
        "mount_fleet", "goto-solve", "90", "30", "--mount", "1",
        "--solver-cmd", "capture_solve", "--tolerance", "0.2"
    ]).unwrap();
    assert_eq!(cli.solver.solver_cmd.as_deref(), Some("capture_solve"));
    assert!(cli.solver.solver_args.is_empty());
    assert!(matches!(cli.command, Commands::GotoSolve { tolerance, max_iterations: 5, .. } if tolerance == 0.2));

    let cli = Cli::try_parse_from([
        "mount_fleet", "calibrate", "--all", "--dry-run",
        "--solver-cmd", "/opt/astro tools/capture_solve",
        "--solver-arg", "--fast", "--solver-arg", "/data/index files",
    ]).unwrap();
    assert!(matches!(cli.command, Commands::Calibrate { verify: true, all: true, mount: None }));
    assert_eq!(cli.solver.solver_cmd.as_deref(), Some("/opt/astro tools/capture_solve"));
    assert_eq!(cli.solver.solver_args, ["--fast", "/data/index files"]);

    let cli = Cli::try_parse_from(["mount_fleet", "calibrate", "--mount", "2"]).unwrap();
    assert!(matches!(cli.command, Commands::Calibrate { verify: false, all: false, mount: Some(2) }));
    assert!(Cli::try_parse_from(["mount_fleet", "calibrate", "--all", "--mount", "2"]).is_err());
    assert!(matches!(
        Cli::try_parse_from(["mount_fleet", "diagnose"]).unwrap().command,
        Commands::Diagnose
    ));

    assert!(Cli::try_parse_from(["mount_fleet", "set-location", "95", "10"]).is_err());
    assert!(Cli::try_parse_from(["mount_fleet", "goto", "x", "10"]).is_err());
    assert!(Cli::try_parse_from(["mount_fleet", "goto-eq", "10", "20"]).is_err());
}

#[test]
fn test_fmt_hz_error() {
    let target = HorizCoord { az: 359.5, alt: 30.0 };
    let reached = HorizCoord { az: 0.5, alt: 29.75 };
    assert_eq!(fmt_hz_error(Some(reached), &target), "az=+1.000°, alt=-0.250°");
    assert_eq!(fmt_hz_error(None, &target), "-");
}
