use std::{collections::BTreeMap, path::{Path, PathBuf}, sync::RwLock};
use crate::{
    mount::{MountError, PointingModel, Result},
    sky_math::GeoLocation,
    utils::io_utils::*,
};
use super::FleetConfig;

pub const CONF_FN: &str = "fleet";

/// Owns fleet configuration file. Every change is written immediately
/// (last writer wins, there is no locking between processes)
pub struct ConfigStore {
    file_name: Option<PathBuf>,
    config:    RwLock<FleetConfig>,
}

impl ConfigStore {
    /// Missing or broken file gives empty configuration
    pub fn open(file_name: &Path) -> Self {
        let config = match load_json_from_file::<FleetConfig>(file_name) {
            Ok(config) => config,
            Err(err) => {
                log::error!("Can't load {}: {}", file_name.display(), err);
                FleetConfig::default()
            }
        };
        log::debug!("Fleet config loaded from {}: {:?}", file_name.display(), config);
        Self {
            file_name: Some(file_name.to_path_buf()),
            config:    RwLock::new(config),
        }
    }

    pub fn open_default() -> anyhow::Result<Self> {
        let file_name = get_app_conf_file_name(CONF_FN)?;
        Ok(Self::open(&file_name))
    }

    /// Store that is never written to disk
    #[cfg(test)]
    pub fn in_memory(config: FleetConfig) -> Self {
        Self {
            file_name: None,
            config:    RwLock::new(config),
        }
    }

    pub fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    pub fn config(&self) -> FleetConfig {
        self.config.read().unwrap().clone()
    }

    pub fn location(&self) -> Option<GeoLocation> {
        self.config.read().unwrap().location()
    }

    pub fn set_location(&self, location: &GeoLocation) -> Result<()> {
        self.modify(|config| config.set_location(location))
    }

    /// Zero model if unit is not calibrated
    pub fn pointing_model(&self, unit_id: u32) -> PointingModel {
        self.config.read().unwrap()
            .pointing_model(unit_id)
            .unwrap_or_default()
    }

    pub fn pointing_models(&self) -> BTreeMap<String, PointingModel> {
        self.config.read().unwrap().pointing_models.clone()
    }

    pub fn set_pointing_model(&self, unit_id: u32, model: &PointingModel) -> Result<()> {
        self.modify(|config| {
            config.pointing_models.insert(unit_id.to_string(), *model);
        })
    }

    /// Returns `false` if there was no model for unit
    pub fn remove_pointing_model(&self, unit_id: u32) -> Result<bool> {
        let mut removed = false;
        self.modify(|config| {
            removed = config.pointing_models.remove(&unit_id.to_string()).is_some();
        })?;
        Ok(removed)
    }

    pub fn camera(&self, unit_id: u32) -> Option<String> {
        self.config.read().unwrap()
            .camera(unit_id)
            .map(str::to_string)
    }

    fn modify(&self, fun: impl FnOnce(&mut FleetConfig)) -> Result<()> {
        let mut config = self.config.write().unwrap();
        fun(&mut config);
        let Some(file_name) = &self.file_name else {
            return Ok(());
        };
        save_json_atomic(&*config, file_name)
            .map_err(|err| MountError::Config(
                format!("can't save {}: {}", file_name.display(), err)
            ))?;
        log::debug!("Fleet config saved to {}", file_name.display());
        Ok(())
    }
}

#[test]
fn test_config_store_persists() {
    let dir = std::env::temp_dir().join(format!("mount_fleet_store_{}", rand::random::<u64>()));
    let file_name = dir.join("fleet.json");

    let store = ConfigStore::open(&file_name);
    assert_eq!(store.location(), None);
    assert!(store.pointing_model(1).is_zero());

    store.set_location(&GeoLocation::new(39.9, -105.0).unwrap()).unwrap();
    store.set_pointing_model(2, &PointingModel { me: 0.002, ma: 0.003 }).unwrap();

    let reopened = ConfigStore::open(&file_name);
    assert_eq!(reopened.location(), GeoLocation::new(39.9, -105.0));
    assert_eq!(reopened.pointing_model(2), PointingModel { me: 0.002, ma: 0.003 });

    assert!(reopened.remove_pointing_model(2).unwrap());
    assert!(!reopened.remove_pointing_model(2).unwrap());
    assert!(ConfigStore::open(&file_name).pointing_models().is_empty());

    _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_config_store_broken_file() {
    let dir = std::env::temp_dir().join(format!("mount_fleet_store_{}", rand::random::<u64>()));
    std::fs::create_dir_all(&dir).unwrap();
    let file_name = dir.join("fleet.json");
    std::fs::write(&file_name, "{ not json").unwrap();

    let store = ConfigStore::open(&file_name);
    assert_eq!(store.config(), FleetConfig::default());

    _ = std::fs::remove_dir_all(&dir);
}
