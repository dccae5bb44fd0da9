// SPDX-License-Identifier: CEPL-1.0
use life_platform::WindowSettings;
use life_render::CameraSettings;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GridCfg {
    pub size: u32,
    /// Unset means a fresh seed every run.
    pub seed: Option<u64>,
    pub density: f64,
}

impl Default for GridCfg {
    fn default() -> Self {
        GridCfg {
            size: 1000,
            seed: None,
            density: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let w = WindowSettings::default();
        WindowCfg {
            width: w.width,
            height: w.height,
            title: w.title,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CameraCfg {
    pub pan_step: f32,
    pub zoom_step: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
}

impl Default for CameraCfg {
    fn default() -> Self {
        let c = CameraSettings::default();
        CameraCfg {
            pan_step: c.pan_step,
            zoom_step: c.zoom_step,
            min_zoom: c.min_zoom,
            max_zoom: c.max_zoom,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub validation: bool,
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            validation: true,
            shader_dir: None,
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub grid: GridCfg,
    pub window: WindowCfg,
    pub camera: CameraCfg,
    pub render: RenderCfg,
}

/// Command-line values; `None` leaves the file/default value alone.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub grid_size: Option<u32>,
    pub seed: Option<u64>,
    pub shader_dir: Option<PathBuf>,
    pub no_validation: bool,
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn merge(mut self, cli: &Overrides) -> Self {
        if let Some(size) = cli.grid_size {
            self.grid.size = size;
        }
        if let Some(seed) = cli.seed {
            self.grid.seed = Some(seed);
        }
        if let Some(dir) = &cli.shader_dir {
            self.render.shader_dir = Some(dir.clone());
        }
        if cli.no_validation {
            self.render.validation = false;
        }
        self
    }

    /// Values that parse but cannot drive the grid or camera are replaced by
    /// their defaults, with a warning each.
    pub fn sanitized(mut self) -> Self {
        let grid = GridCfg::default();
        if !(0.0..=1.0).contains(&self.grid.density) {
            warn!("grid.density {} outside [0, 1]; using {}", self.grid.density, grid.density);
            self.grid.density = grid.density;
        }

        let cam = CameraCfg::default();
        self.camera.pan_step = positive("camera.pan_step", self.camera.pan_step, cam.pan_step);
        self.camera.zoom_step = positive("camera.zoom_step", self.camera.zoom_step, cam.zoom_step);
        self.camera.min_zoom = positive("camera.min_zoom", self.camera.min_zoom, cam.min_zoom);
        self.camera.max_zoom = positive("camera.max_zoom", self.camera.max_zoom, cam.max_zoom);
        if self.camera.max_zoom < self.camera.min_zoom {
            warn!(
                "camera.max_zoom {} below camera.min_zoom {}; using {} and {}",
                self.camera.max_zoom, self.camera.min_zoom, cam.min_zoom, cam.max_zoom
            );
            self.camera.min_zoom = cam.min_zoom;
            self.camera.max_zoom = cam.max_zoom;
        }
        self
    }

    pub fn window_settings(&self) -> WindowSettings {
        WindowSettings {
            width: self.window.width,
            height: self.window.height,
            title: self.window.title.clone(),
        }
    }

    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            pan_step: self.camera.pan_step,
            zoom_step: self.camera.zoom_step,
            min_zoom: self.camera.min_zoom,
            max_zoom: self.camera.max_zoom,
        }
    }
}

fn positive(name: &str, value: f32, default: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        warn!("{name} {value} must be a positive number; using {default}");
        default
    }
}

/// A missing file means defaults; so does a broken one, with a warning.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => AppCfg::parse(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not found; using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(AppCfg::parse("").unwrap(), AppCfg::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [grid]
            size = 64
            seed = 7

            [render]
            clear_color = [0.0, 0.0, 0.0, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.grid.size, 64);
        assert_eq!(cfg.grid.seed, Some(7));
        assert_eq!(cfg.grid.density, 0.5);
        assert_eq!(cfg.render.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(cfg.render.validation);
        assert_eq!(cfg.window, WindowCfg::default());
    }

    #[test]
    fn cli_beats_file() {
        let file = AppCfg::parse("[grid]\nsize = 64\nseed = 7\n").unwrap();
        let cfg = file.merge(&Overrides {
            grid_size: Some(300),
            seed: None,
            shader_dir: Some(PathBuf::from("/tmp/spv")),
            no_validation: true,
        });
        assert_eq!(cfg.grid.size, 300);
        assert_eq!(cfg.grid.seed, Some(7));
        assert_eq!(cfg.render.shader_dir.as_deref(), Some(Path::new("/tmp/spv")));
        assert!(!cfg.render.validation);
    }

    #[test]
    fn no_overrides_changes_nothing() {
        let file = AppCfg::parse("[camera]\nmax_zoom = 8.0\n").unwrap();
        assert_eq!(file.clone().merge(&Overrides::default()), file);
        assert_eq!(file.camera_settings().max_zoom, 8.0);
        assert_eq!(file.camera_settings().pan_step, CameraSettings::default().pan_step);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("life-broken-{}.toml", std::process::id()));
        fs::write(&path, "[grid\nsize = ").unwrap();
        assert_eq!(load_cfg(&path), AppCfg::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_defaults() {
        assert_eq!(load_cfg(Path::new("/nonexistent/life.toml")), AppCfg::default());
    }

    #[test]
    fn nan_density_falls_back_to_default() {
        let cfg = AppCfg::parse("[grid]\ndensity = nan\n").unwrap();
        assert!(cfg.grid.density.is_nan());
        assert_eq!(cfg.sanitized().grid.density, 0.5);
        let cfg = AppCfg::parse("[grid]\ndensity = 1.5\n").unwrap();
        assert_eq!(cfg.sanitized().grid.density, 0.5);
    }

    #[test]
    fn unusable_camera_values_fall_back_to_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [camera]
            pan_step = inf
            zoom_step = -2.0
            min_zoom = nan
            max_zoom = 0.0
            "#,
        )
        .unwrap()
        .sanitized();
        assert_eq!(cfg.camera, CameraCfg::default());
    }

    #[test]
    fn inverted_zoom_range_resets_both_bounds() {
        let cfg = AppCfg::parse("[camera]\nmin_zoom = 8.0\nmax_zoom = 2.0\n")
            .unwrap()
            .sanitized();
        let d = CameraCfg::default();
        assert_eq!((cfg.camera.min_zoom, cfg.camera.max_zoom), (d.min_zoom, d.max_zoom));
    }

    #[test]
    fn valid_values_survive_sanitizing() {
        let cfg = AppCfg::parse("[grid]\ndensity = 0.0\n[camera]\nzoom_step = 2.0\nmax_zoom = 4.0\n").unwrap();
        assert_eq!(cfg.clone().sanitized(), cfg);
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        assert!(AppCfg::parse("[grid]\nsize = \"big\"\n").is_err());
    }
}
