use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use crate::{mount::PointingModel, sky_math::GeoLocation};

/// Persisted state shared by all mounts of the array
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat:             Option<f64>, // in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon:             Option<f64>, // in degrees
    pub pointing_models: BTreeMap<String, PointingModel>, // unit id -> model
    pub camera_map:      BTreeMap<String, String>, // unit id -> camera id
}

impl FleetConfig {
    pub fn location(&self) -> Option<GeoLocation> {
        GeoLocation::new(self.lat?, self.lon?)
    }

    pub fn set_location(&mut self, location: &GeoLocation) {
        self.lat = Some(location.lat);
        self.lon = Some(location.lon);
    }

    pub fn pointing_model(&self, unit_id: u32) -> Option<PointingModel> {
        self.pointing_models.get(&unit_id.to_string()).copied()
    }

    pub fn camera(&self, unit_id: u32) -> Option<&str> {
        self.camera_map.get(&unit_id.to_string()).map(String::as_str)
    }
}

#[test]
fn test_fleet_config_json() {
    let json = r#"{
        "lat": 39.917,
        "lon": -105.004,
        "pointing_models": { "1": { "me": 0.001, "ma": -0.002 } },
        "camera_map": { "1": "cam_east", "2": "cam_west" }
    }"#;
    let config: FleetConfig = serde_json::from_str(json).unwrap();
    let location = config.location().unwrap();
    assert_eq!(location.lat, 39.917);
    assert_eq!(location.lon, -105.004);
    assert_eq!(
        config.pointing_model(1),
        Some(PointingModel { me: 0.001, ma: -0.002 })
    );
    assert_eq!(config.pointing_model(2), None);
    assert_eq!(config.camera(2), Some("cam_west"));
    assert_eq!(config.camera(3), None);

    let text = serde_json::to_string(&config).unwrap();
    let restored: FleetConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(restored, config);
}

#[test]
fn test_fleet_config_partial_json() {
    let config: FleetConfig = serde_json::from_str(r#"{ "lat": 10.0 }"#).unwrap();
    assert_eq!(config.location(), None);
    assert!(config.pointing_models.is_empty());

    let config: FleetConfig = serde_json::from_str(r#"{ "lat": 95.0, "lon": 0.0 }"#).unwrap();
    assert_eq!(config.location(), None);

    let text = serde_json::to_string(&FleetConfig::default()).unwrap();
    assert!(!text.contains("lat"));
}
