use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{MillError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    #[serde(default = "default_cflags")]
    pub cflags: String,
    #[serde(default = "default_cxxflags")]
    pub cxxflags: String,
    #[serde(default = "default_asflags")]
    pub asflags: String,
    #[serde(default = "default_linkflags")]
    pub linkflags: String,
    #[serde(default)]
    pub ccache: bool,
}

fn default_arch() -> String {
    std::env::consts::ARCH.to_string()
}
fn default_jobs() -> usize {
    1
}
fn default_cflags() -> String {
    "-O2 -pipe".to_string()
}
fn default_cxxflags() -> String {
    "-O2 -pipe".to_string()
}
fn default_asflags() -> String {
    String::new()
}
fn default_linkflags() -> String {
    String::new()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            arch: default_arch(),
            jobs: default_jobs(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cflags: default_cflags(),
            cxxflags: default_cxxflags(),
            asflags: default_asflags(),
            linkflags: default_linkflags(),
            ccache: false,
        }
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

fn get_xdg_config() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join(".config"))
                .ok()
        })
        .map(|p| p.join("mill/mill.toml"))
}

/// Recursively merge two TOML values. For tables, overlay keys win; missing
/// keys are inherited from base. All other types (scalars, arrays) are
/// replaced wholesale by the overlay value.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    use toml::Value;
    match (base, overlay) {
        (Value::Table(mut base_map), Value::Table(overlay_map)) => {
            for (k, v) in overlay_map {
                let merged = if let Some(base_v) = base_map.remove(&k) {
                    merge_toml(base_v, v)
                } else {
                    v
                };
                base_map.insert(k, merged);
            }
            Value::Table(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn load_toml_file(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MillError::ConfigError(format!("failed to read {}: {}", path.display(), e))
    })?;
    Ok(toml::from_str(&content)?)
}

impl GlobalConfig {
    /// Load configuration with layered merging.
    ///
    /// When an explicit `path` is supplied (via `--config`), that single file
    /// is loaded as-is with no layering.
    ///
    /// Otherwise configs are merged in ascending priority order so that
    /// higher-priority files only need to specify the keys they want to
    /// override — everything else is inherited from the layer below:
    ///
    ///   1. `/etc/mill/mill.toml`              (system-wide, lowest priority)
    ///   2. `$XDG_CONFIG_HOME/mill/mill.toml`   (per-user)
    ///   3. `./mill.toml`                       (project-local, highest priority)
    ///
    /// Any layer that does not exist is silently skipped. If no file is found
    /// at any location, built-in defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            let config_path = PathBuf::from(p);
            if !config_path.exists() {
                return Ok(Self::default());
            }
            return Ok(toml::from_str(&std::fs::read_to_string(&config_path).map_err(
                |e| MillError::ConfigError(format!("failed to read {}: {}", config_path.display(), e)),
            )?)?);
        }

        let mut layers: Vec<PathBuf> = vec![PathBuf::from("/etc/mill/mill.toml")];
        if let Some(xdg) = get_xdg_config() {
            layers.push(xdg);
        }
        layers.push(PathBuf::from("./mill.toml"));

        let mut merged: Option<toml::Value> = None;
        for layer_path in &layers {
            if layer_path.exists() {
                let val = load_toml_file(layer_path)?;
                merged = Some(match merged {
                    Some(base) => merge_toml(base, val),
                    None => val,
                });
            }
        }

        match merged {
            None => Ok(Self::default()),
            Some(val) => Ok(GlobalConfig::deserialize(val)?),
        }
    }
}
