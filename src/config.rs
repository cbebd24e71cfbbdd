//! Persistent tool settings

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::scene::CornellBoxOptions;
use crate::util::{Error, Result};

/// Settings of the `rtscene` tool, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Device
    pub memory_budget: Option<u64>,
    pub unified_memory: bool,

    // Scene
    pub use_intersection_functions: bool,
    pub grid_radius: u32,
    pub light_seed: u64,

    // Probe
    pub probe_width: u32,
    pub probe_height: u32,
    pub field_of_view: f32, // vertical, degrees
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            memory_budget: None,
            unified_memory: true,
            use_intersection_functions: true,
            grid_radius: 1,
            light_seed: 0,
            probe_width: 64,
            probe_height: 64,
            field_of_view: 45.0,
        }
    }
}

impl Settings {
    /// Load settings from `path`. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings, falling back to defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(path = %path.as_ref().display(), error = %e, "using default settings");
                Self::default()
            }
        }
    }

    /// Save settings as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_width == 0 || self.probe_height == 0 {
            return Err(Error::Config(format!(
                "probe resolution {}x{} must be non-zero",
                self.probe_width, self.probe_height
            )));
        }
        if !(self.field_of_view > 0.0 && self.field_of_view < 180.0) {
            return Err(Error::Config(format!(
                "field of view {} must be in (0, 180) degrees",
                self.field_of_view
            )));
        }
        Ok(())
    }

    pub fn cornell_box_options(&self) -> CornellBoxOptions {
        CornellBoxOptions {
            use_intersection_functions: self.use_intersection_functions,
            grid_radius: self.grid_radius,
            light_seed: self.light_seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let s: Settings = serde_json::from_str(r#"{"grid_radius": 3}"#).unwrap();
        assert_eq!(s.grid_radius, 3);
        assert_eq!(s.probe_width, 64);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let s = Settings {
            probe_width: 0,
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(Error::Config(_))));

        let s = Settings {
            field_of_view: -1.0,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }
}
