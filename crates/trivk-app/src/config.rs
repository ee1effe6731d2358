// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use trivk_platform::{WindowSpec, DEFAULT_HEIGHT, DEFAULT_TITLE, DEFAULT_WIDTH};
use trivk_render_vk::{MeshKind, RendererConfig, SelectionPolicy};

pub const DEFAULT_CONFIG_PATH: &str = "trivk.toml";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: DEFAULT_TITLE.to_owned(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeshCfg {
    #[default]
    Quad,
    Triangle,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub mesh: MeshCfg,
    #[serde(default = "default_validation")]
    pub validation: bool,
    #[serde(default)]
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            mesh: MeshCfg::Quad,
            validation: default_validation(),
            shader_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCfg {
    #[serde(default = "yes")]
    pub require_discrete_gpu: bool,
    #[serde(default = "yes")]
    pub require_geometry_shader: bool,
}

impl Default for DeviceCfg {
    fn default() -> Self {
        DeviceCfg {
            require_discrete_gpu: true,
            require_geometry_shader: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
    #[serde(default)]
    pub device: DeviceCfg,
}

fn default_clear() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}
fn yes() -> bool {
    true
}

impl AppCfg {
    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn renderer_config(&self) -> RendererConfig {
        let mut cfg = RendererConfig {
            clear_color: self.render.clear_color,
            mesh: match self.render.mesh {
                MeshCfg::Quad => MeshKind::Quad,
                MeshCfg::Triangle => MeshKind::Triangle,
            },
            validation: self.render.validation,
            policy: SelectionPolicy {
                require_discrete_gpu: self.device.require_discrete_gpu,
                require_geometry_shader: self.device.require_geometry_shader,
            },
            ..RendererConfig::default()
        };
        if let Some(dir) = &self.render.shader_dir {
            cfg.shader_dir = dir.clone();
        }
        cfg
    }
}

/// Missing file → defaults, quietly. Unreadable or malformed file → defaults plus a warning.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => {
                debug!("loaded config from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("ignoring malformed {}: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => AppCfg::default(),
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cfg(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_cfg(&dir.path().join("nope.toml"));
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.title, "trivk");
        assert_eq!((cfg.window.width, cfg.window.height), (1024, 768));
        assert_eq!(cfg.render.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.render.mesh, MeshCfg::Quad);
        assert!(cfg.device.require_discrete_gpu && cfg.device.require_geometry_shader);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let f = write_cfg(
            r#"
[render]
mesh = "triangle"

[device]
require_discrete_gpu = false
"#,
        );
        let cfg = load_cfg(f.path());
        assert_eq!(cfg.render.mesh, MeshCfg::Triangle);
        assert_eq!(cfg.render.clear_color, default_clear());
        assert!(!cfg.device.require_discrete_gpu);
        assert!(cfg.device.require_geometry_shader);
        assert_eq!(cfg.window, WindowCfg::default());

        let rc = cfg.renderer_config();
        assert_eq!(rc.mesh, MeshKind::Triangle);
        assert!(!rc.policy.require_discrete_gpu);
    }

    #[test]
    fn full_file_round_trips_into_renderer_config() {
        let f = write_cfg(
            r#"
[window]
title = "spin"
width = 640
height = 480

[render]
clear_color = [0.1, 0.2, 0.3, 1.0]
validation = false
shader_dir = "/tmp/spv"
"#,
        );
        let cfg = load_cfg(f.path());
        let spec = cfg.window_spec();
        assert_eq!((spec.title.as_str(), spec.width, spec.height), ("spin", 640, 480));

        let rc = cfg.renderer_config();
        assert_eq!(rc.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert!(!rc.validation);
        assert_eq!(rc.shader_dir, PathBuf::from("/tmp/spv"));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let f = write_cfg("[render\nclear_color = 3");
        assert_eq!(load_cfg(f.path()), AppCfg::default());

        let wrong_type = write_cfg("[window]\nwidth = \"wide\"\n");
        assert_eq!(load_cfg(wrong_type.path()), AppCfg::default());
    }

    #[test]
    fn unknown_mesh_is_rejected() {
        let f = write_cfg("[render]\nmesh = \"teapot\"\n");
        assert_eq!(load_cfg(f.path()).render.mesh, MeshCfg::Quad);
    }
}
