use std::path::{Path, PathBuf};

/// Serializes `obj` as pretty JSON into a temporary file next to
/// `file_name` and renames it over the target
pub fn save_json_atomic<T: serde::Serialize>(
    obj:       &T,
    file_name: &Path,
) -> anyhow::Result<()> {
    let dir = file_name.parent().unwrap_or(Path::new("."));
    if !dir.as_os_str().is_empty() && !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    let text = serde_json::to_string_pretty(obj)?;
    let base_name = file_name
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("config.json");
    let temp_file = dir.join(format!(".{}.{}.tmp", base_name, rand::random::<u64>()));
    std::fs::write(&temp_file, text)?;
    if let Err(err) = std::fs::rename(&temp_file, file_name) {
        _ = std::fs::remove_file(&temp_file);
        return Err(err.into());
    }
    Ok(())
}

/// Returns `T::default()` when file doesn't exist
pub fn load_json_from_file<T: serde::de::DeserializeOwned + Default>(
    file_name: &Path,
) -> anyhow::Result<T> {
    if !file_name.is_file() {
        return Ok(T::default());
    }
    let file = std::io::BufReader::new(std::fs::File::open(file_name)?);
    Ok(serde_json::from_reader(file)?)
}

pub fn get_app_dir() -> anyhow::Result<PathBuf> {
    let conf_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("dirs::config_dir()"))?;
    let mut path = PathBuf::from(&conf_dir);
    path.push(format!(".{}", env!("CARGO_PKG_NAME")));
    Ok(path)
}

pub fn get_app_conf_file_name(conf_name: &str) -> anyhow::Result<PathBuf> {
    let mut path = get_app_dir()?;
    path.push(format!("{}.json", conf_name));
    Ok(path)
}

#[test]
fn test_save_and_load_json_atomic() {
    use std::collections::HashMap;
    let dir = std::env::temp_dir().join(format!("mount_fleet_io_{}", rand::random::<u64>()));
    let file_name = dir.join("test.json");

    let loaded: HashMap<String, f64> = load_json_from_file(&file_name).unwrap();
    assert!(loaded.is_empty());

    let mut data = HashMap::new();
    data.insert("lat".to_string(), 39.917);
    save_json_atomic(&data, &file_name).unwrap();
    data.insert("lat".to_string(), 40.0);
    save_json_atomic(&data, &file_name).unwrap();

    let loaded: HashMap<String, f64> = load_json_from_file(&file_name).unwrap();
    assert_eq!(loaded.get("lat"), Some(&40.0));

    let leftovers = std::fs::read_dir(&dir).unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);

    _ = std::fs::remove_dir_all(&dir);
}
