use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::annotations::HighlightColor;
use crate::error::{EngineError, EngineResult};
use crate::navigation::ZoomSettings;
use crate::windowing::WindowSettings;

pub const CONFIG_FILENAME: &str = "config.toml";

/// Tunables of the reading engine, read from `config.toml`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub buffer_radius: usize,
    pub edge_load_fraction: f32,
    pub edge_load_pages: usize,
    pub visible_threshold: f32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub search_debounce: Duration,
    pub continuous: bool,
    pub default_scale: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub zoom_step: f32,
    pub highlight_color: HighlightColor,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let window = WindowSettings::default();
        let zoom = ZoomSettings::default();
        Self {
            buffer_radius: window.buffer_radius,
            edge_load_fraction: window.edge_load_fraction,
            edge_load_pages: window.edge_load_pages,
            visible_threshold: window.visible_threshold,
            search_debounce: Duration::from_millis(300),
            continuous: window.continuous,
            default_scale: zoom.default_scale,
            min_scale: zoom.min_scale,
            max_scale: zoom.max_scale,
            zoom_step: zoom.step,
            highlight_color: HighlightColor::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|err| EngineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw).map_err(|err| match err {
            EngineError::Config(reason) => EngineError::Config(format!("{}: {reason}", path.display())),
            other => other,
        })
    }

    /// Reads `path` when given, otherwise the platform config file if one
    /// exists. Missing files mean defaults; malformed ones are errors.
    pub fn load_or_default(path: Option<&Path>) -> EngineResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "loading engine config");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        let fail = |reason: String| Err(EngineError::Config(reason));
        if !(0.0..=1.0).contains(&self.edge_load_fraction) {
            return fail(format!(
                "edge_load_fraction must be within 0..=1, got {}",
                self.edge_load_fraction
            ));
        }
        if !(self.visible_threshold > 0.0 && self.visible_threshold <= 1.0) {
            return fail(format!(
                "visible_threshold must be within (0, 1], got {}",
                self.visible_threshold
            ));
        }
        if !(self.min_scale > 0.0 && self.min_scale <= self.max_scale) {
            return fail(format!(
                "scale range {}..{} is empty or not positive",
                self.min_scale, self.max_scale
            ));
        }
        if !(self.min_scale..=self.max_scale).contains(&self.default_scale) {
            return fail(format!(
                "default_scale {} is outside {}..{}",
                self.default_scale, self.min_scale, self.max_scale
            ));
        }
        if !(self.zoom_step > 0.0 && self.zoom_step.is_finite()) {
            return fail(format!("zoom_step must be positive, got {}", self.zoom_step));
        }
        Ok(())
    }

    pub fn window_settings(&self) -> WindowSettings {
        WindowSettings {
            continuous: self.continuous,
            buffer_radius: self.buffer_radius,
            edge_load_fraction: self.edge_load_fraction,
            edge_load_pages: self.edge_load_pages,
            visible_threshold: self.visible_threshold,
        }
    }

    pub fn zoom_settings(&self) -> ZoomSettings {
        ZoomSettings {
            default_scale: self.default_scale,
            min_scale: self.min_scale,
            max_scale: self.max_scale,
            step: self.zoom_step,
        }
    }
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("net", "folio", "folio")
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.search_debounce, Duration::from_millis(300));
        assert_eq!(config.window_settings(), WindowSettings::default());
    }

    #[test]
    fn partial_file_overrides_named_keys() {
        let config = EngineConfig::from_toml_str(
            r##"
            buffer_radius = 4
            search_debounce = 150
            continuous = false
            highlight_color = "#00ff88"
            "##,
        )
        .unwrap();
        assert_eq!(config.buffer_radius, 4);
        assert_eq!(config.search_debounce, Duration::from_millis(150));
        assert!(!config.window_settings().continuous);
        assert_eq!(config.highlight_color, HighlightColor::Custom("#00ff88".into()));
        assert_eq!(config.zoom_settings(), ZoomSettings::default());
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for raw in [
            "edge_load_fraction = 1.5",
            "visible_threshold = 0.0",
            "min_scale = 3.0",
            "default_scale = 2.5",
            "zoom_step = -0.1",
            "unknown_key = 1",
            "highlight_color = \"mauve\"",
        ] {
            assert!(
                matches!(EngineConfig::from_toml_str(raw), Err(EngineError::Config(_))),
                "accepted {raw}"
            );
        }
    }

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "max_scale = 3.0\nzoom_step = 0.25\n").unwrap();

        let config = EngineConfig::load_or_default(Some(&path)).unwrap();

        assert_eq!(config.max_scale, 3.0);
        assert_eq!(config.zoom_settings().step, 0.25);
    }

    #[test]
    fn missing_explicit_path_is_an_io_error() {
        let dir = tempdir().unwrap();
        let result = EngineConfig::load_or_default(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(EngineError::Io(_))));
    }
}
