// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use life_core::init_tracing;
use life_platform::WinitEvents;
use life_render::{Camera, EventSource, FrameLoop, GridSeed};
use life_render_vk::{default_shader_dir, RendererSettings, SetupError, VkRenderer};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

mod config;

use config::{load_cfg, AppCfg, Overrides};

#[derive(Parser, Debug)]
#[command(author, version, about = "GPU Game of Life viewer", long_about = None)]
struct Args {
    /// Cells per side of the square grid
    #[arg(value_name = "GRID_SIZE")]
    grid_size: Option<u32>,
    /// TOML config file; missing means defaults
    #[arg(long, default_value = "life.toml")]
    config: PathBuf,
    /// Seed for the initial board
    #[arg(long)]
    seed: Option<u64>,
    /// Directory holding cells.vert.spv and cells.frag.spv
    #[arg(long)]
    shader_dir: Option<PathBuf>,
    /// Skip the validation layer even when it is installed
    #[arg(long)]
    no_validation: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            grid_size: self.grid_size,
            seed: self.seed,
            shader_dir: self.shader_dir.clone(),
            no_validation: self.no_validation,
        }
    }
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn run(cfg: AppCfg) -> Result<()> {
    if cfg.grid.size == 0 {
        return Err(SetupError::ZeroGrid.into());
    }
    let grid = GridSeed {
        size: cfg.grid.size,
        seed: cfg.grid.seed.unwrap_or_else(time_seed),
        density: cfg.grid.density,
    };
    info!(
        "grid {0}x{0}, seed {1}, density {2}",
        grid.size, grid.seed, grid.density
    );

    let mut events = WinitEvents::new(cfg.window_settings())?;
    let mut camera = Camera::new(grid.size, cfg.camera_settings());
    // Started minimized: nothing to build against yet.
    let Some(size) = events.wait_for_extent(&mut camera) else {
        info!("closed before first frame");
        return Ok(());
    };

    let window = events.window()?;
    let renderer = VkRenderer::new(
        window,
        window,
        &RendererSettings {
            grid,
            size,
            clear_color: cfg.render.clear_color,
            validation: cfg.render.validation,
            shader_dir: cfg.render.shader_dir.clone().unwrap_or_else(default_shader_dir),
            camera: camera.uniform(),
        },
    )?;
    info!("rendering on {}", renderer.device_name());

    // Declared after `events`: the renderer (and its surface) drops before the window.
    let mut frames = FrameLoop::new(renderer, camera);
    frames.run(&mut events)
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config).merge(&args.overrides()).sanitized();
    run(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_grid_size_and_flags() {
        let args = Args::try_parse_from(["life", "256", "--seed", "9", "--no-validation"]).unwrap();
        assert_eq!(args.grid_size, Some(256));
        assert_eq!(args.seed, Some(9));
        assert!(args.no_validation);
        assert_eq!(args.config, PathBuf::from("life.toml"));
    }

    #[test]
    fn grid_size_is_optional() {
        let args = Args::try_parse_from(["life"]).unwrap();
        let cfg = AppCfg::default().merge(&args.overrides());
        assert_eq!(cfg.grid.size, 1000);
        assert!(cfg.render.validation);
    }

    #[test]
    fn non_numeric_grid_size_is_rejected() {
        assert!(Args::try_parse_from(["life", "huge"]).is_err());
    }

    #[test]
    fn zero_grid_is_a_setup_error() {
        let cfg = AppCfg::default().merge(&Overrides {
            grid_size: Some(0),
            ..Overrides::default()
        });
        let err = run(cfg).unwrap_err();
        assert!(matches!(err.downcast_ref::<SetupError>(), Some(SetupError::ZeroGrid)));
    }
}
