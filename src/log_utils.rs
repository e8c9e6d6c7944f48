use std::{path::*, time::{Duration, SystemTime}};
use flexi_logger::*;

pub fn start_logger(log_path: &Path) -> anyhow::Result<()> {
    let custom_format_fun = |
        w:      &mut dyn std::io::Write,
        now:    &mut DeferredNow,
        record: &Record
    | -> Result<(), std::io::Error> {
        write!(
            w, "[{}] {} {}",
            now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK),
            record.level(),
            record.args()
        )
    };

    Logger::try_with_str("trace")?
        .log_to_file(
            FileSpec::default()
                .directory(log_path)
                .basename(env!("CARGO_PKG_NAME"))
        )
        .format(custom_format_fun)
        .duplicate_to_stderr(Duplicate::Warn)
        .start()?;

    Ok(())
}

/// Removes log files older than `days`
pub fn cleanup_old_logs(log_path: &Path, days: u64) {
    let Ok(dir) = std::fs::read_dir(log_path) else {
        return;
    };
    let max_age = Duration::from_secs(days * 24 * 60 * 60);
    let now = SystemTime::now();
    for entry in dir.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age {
            if let Err(err) = std::fs::remove_file(&path) {
                log::warn!("Can't remove old log {}: {}", path.display(), err);
            }
        }
    }
}

#[test]
fn test_cleanup_old_logs_keeps_fresh_files() {
    let dir = std::env::temp_dir().join(format!("mount_fleet_logs_{}", rand::random::<u64>()));
    std::fs::create_dir_all(&dir).unwrap();
    let log_file = dir.join("mount_fleet_rCURRENT.log");
    let other_file = dir.join("notes.txt");
    std::fs::write(&log_file, "text").unwrap();
    std::fs::write(&other_file, "text").unwrap();

    cleanup_old_logs(&dir, 14);
    assert!(log_file.exists());

    let old_time = SystemTime::now() - Duration::from_secs(15 * 24 * 60 * 60);
    std::fs::File::options().write(true).open(&log_file).unwrap()
        .set_modified(old_time).unwrap();
    std::fs::File::options().write(true).open(&other_file).unwrap()
        .set_modified(old_time).unwrap();
    cleanup_old_logs(&dir, 14);
    assert!(!log_file.exists());
    assert!(other_file.exists());

    cleanup_old_logs(&dir.join("missing"), 0);
    _ = std::fs::remove_dir_all(&dir);
}
