use crate::{
    mount::{MountError, MountUnit, Result},
    options::ConfigStore,
    sky_math::EqCoord,
};

mod external;
mod manual;

pub use external::*;
pub use manual::*;

/// Independent measurement of where mount actually points
pub trait PositionVerifier {
    /// Checked before any mount moves
    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    fn measure(&mut self, unit: &MountUnit) -> Result<EqCoord>;
}

/// Camera used to verify position of a mount
#[derive(Debug, Clone, PartialEq)]
pub enum CameraSelect {
    Id(String),
    Index(usize),
}

impl CameraSelect {
    /// Explicit camera id, then camera map of config,
    /// then camera with index `unit_id - 1`
    pub fn for_unit(
        explicit:       Option<&str>,
        explicit_index: Option<usize>,
        store:          &ConfigStore,
        unit_id:        u32,
    ) -> Self {
        if let Some(id) = explicit {
            return Self::Id(id.to_string());
        }
        if let Some(index) = explicit_index {
            return Self::Index(index);
        }
        if let Some(id) = store.camera(unit_id) {
            return Self::Id(id);
        }
        Self::Index(unit_id.saturating_sub(1) as usize)
    }
}

/// Plate solving capability selected at start-up
pub enum PlateSolver {
    External(ExternalSolver),
    NotAvailable,
}

fn solver_not_configured() -> MountError {
    MountError::PlateSolveFailed("plate solver is not configured (use --solver-cmd)".to_string())
}

impl PositionVerifier for PlateSolver {
    fn check_available(&self) -> Result<()> {
        match self {
            Self::External(_) => Ok(()),
            Self::NotAvailable => Err(solver_not_configured()),
        }
    }

    fn measure(&mut self, unit: &MountUnit) -> Result<EqCoord> {
        match self {
            Self::External(solver) =>
                solver.measure(unit),
            Self::NotAvailable =>
                Err(solver_not_configured()),
        }
    }
}

#[test]
fn test_camera_for_unit() {
    use crate::options::FleetConfig;
    let mut config = FleetConfig::default();
    config.camera_map.insert("2".to_string(), "cam_west".to_string());
    let store = ConfigStore::in_memory(config);
    assert_eq!(
        CameraSelect::for_unit(Some("cam_x"), Some(5), &store, 2),
        CameraSelect::Id("cam_x".to_string())
    );
    assert_eq!(CameraSelect::for_unit(None, Some(5), &store, 2), CameraSelect::Index(5));
    assert_eq!(
        CameraSelect::for_unit(None, None, &store, 2),
        CameraSelect::Id("cam_west".to_string())
    );
    assert_eq!(CameraSelect::for_unit(None, None, &store, 3), CameraSelect::Index(2));
}
