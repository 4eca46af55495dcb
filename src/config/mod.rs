use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::ui::theme::ThemeName;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub theme: ThemeName,
    #[serde(default = "default_volume")]
    pub initial_volume: f64,
    #[serde(default = "default_seek_step")]
    pub seek_step_secs: f64,
    #[serde(default)]
    pub spectrogram: SpectrogramConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpectrogramConfig {
    pub width: u32,
    pub height: u32,
    pub fft_size: usize,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 256,
            fft_size: 4096,
        }
    }
}

fn default_volume() -> f64 {
    1.0
}

fn default_seek_step() -> f64 {
    5.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: ThemeName::default(),
            initial_volume: default_volume(),
            seek_step_secs: default_seek_step(),
            spectrogram: SpectrogramConfig::default(),
        }
    }
}

impl Config {
    fn validate(mut self) -> Result<Self> {
        self.initial_volume = self.initial_volume.clamp(0.0, 1.0);
        if !(self.seek_step_secs.is_finite() && self.seek_step_secs > 0.0) {
            anyhow::bail!("seek_step_secs must be a positive number of seconds");
        }
        let fft = self.spectrogram.fft_size;
        if fft < 64 || !fft.is_power_of_two() {
            anyhow::bail!("spectrogram.fft_size must be a power of two no smaller than 64");
        }
        if self.spectrogram.width == 0 || self.spectrogram.height < 2 {
            anyhow::bail!("spectrogram must be at least 1x2 pixels");
        }
        Ok(self)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not find config directory")?
        .join("spectroseek");

    Ok(config_dir.join("config.yml"))
}

/// Load the config at `path` (or the default location), writing the
/// defaults there first if nothing exists yet.
pub fn load_or_create_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let default_config = Config::default();
        let yaml =
            serde_yaml::to_string(&default_config).context("Failed to serialize default config")?;

        fs::write(&config_path, yaml).context("Failed to write default config file")?;
        info!(path = %config_path.display(), "created default config");

        return Ok(default_config);
    }

    let config_content = fs::read_to_string(&config_path).context("Failed to read config file")?;
    parse_config(&config_content)
        .with_context(|| format!("Invalid config file: {}", config_path.display()))
}

fn parse_config(content: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(content).context("Failed to parse config file")?;
    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = parse_config("theme: tokyo_night\n").unwrap();
        assert_eq!(config.theme, ThemeName::TokyoNight);
        assert_eq!(config.initial_volume, 1.0);
        assert_eq!(config.seek_step_secs, 5.0);
        assert_eq!(config.spectrogram, SpectrogramConfig::default());
    }

    #[test]
    fn defaults_survive_a_yaml_round_trip() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.theme, ThemeName::default());
        assert_eq!(config.spectrogram.fft_size, 4096);
    }

    #[test]
    fn rejects_bad_fft_sizes() {
        let yaml = "spectrogram:\n  width: 100\n  height: 50\n  fft_size: 1000\n";
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn clamps_volume() {
        let config = parse_config("initial_volume: 4.0\n").unwrap();
        assert_eq!(config.initial_volume, 1.0);
    }
}
