use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::compress::CompressOptions;
use crate::gallery::{self, Endpoints};

const DEFAULT_ENV_PREFIX: &str = "GALLERIA";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_upload_timeout", with = "humantime_serde")]
    pub upload_timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            endpoints: Endpoints::default(),
            timeout: default_timeout(),
            upload_timeout: default_upload_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl ApiConfig {
    pub fn client_config(&self) -> gallery::ClientConfig {
        gallery::ClientConfig {
            base_url: self.base_url.trim().to_string(),
            endpoints: self.endpoints.clone(),
            user_agent: self.user_agent.clone(),
            timeout: self.timeout,
            upload_timeout: self.upload_timeout,
            http_client: None,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_user_agent() -> String {
    format!("galleria/{}", crate::VERSION)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    #[serde(default = "default_max_dimension")]
    pub max_width: u32,
    #[serde(default = "default_max_dimension")]
    pub max_height: u32,
    #[serde(default = "default_quality")]
    pub quality: f32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_dimension(),
            max_height: default_max_dimension(),
            quality: default_quality(),
        }
    }
}

impl UploadConfig {
    pub fn compress_options(&self) -> CompressOptions {
        CompressOptions {
            max_width: self.max_width.max(1),
            max_height: self.max_height.max(1),
            quality: self.quality,
        }
    }
}

fn default_max_dimension() -> u32 {
    1920
}

fn default_quality() -> f32 {
    0.85
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    /// Fallback pixel width of a terminal cell when the terminal does not report one.
    #[serde(default = "default_cell_width")]
    pub cell_width_px: u16,
    #[serde(default = "default_cell_height")]
    pub cell_height_px: u16,
    #[serde(default = "default_resize_debounce", with = "humantime_serde")]
    pub resize_debounce: Duration,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            cell_width_px: default_cell_width(),
            cell_height_px: default_cell_height(),
            resize_debounce: default_resize_debounce(),
        }
    }
}

fn default_cell_width() -> u16 {
    8
}

fn default_cell_height() -> u16 {
    16
}

fn default_resize_debounce() -> Duration {
    crate::feed::DEFAULT_RESIZE_DEBOUNCE
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

/// Defaults, then the YAML file (explicit path or the default location), then
/// `GALLERIA_*` environment variables.
pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix, env::vars());

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str, vars: impl IntoIterator<Item = (String, String)>) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in vars {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => set_duration(&mut cfg.api.timeout, key, &value),
        "api.upload_timeout" => set_duration(&mut cfg.api.upload_timeout, key, &value),
        "api.endpoints.get_feed" => cfg.api.endpoints.get_feed = value,
        "api.endpoints.upload_photo" => cfg.api.endpoints.upload_photo = value,
        "api.endpoints.delete_photo" => cfg.api.endpoints.delete_photo = value,
        "api.endpoints.add_comment" => cfg.api.endpoints.add_comment = value,
        "api.endpoints.delete_comment" => cfg.api.endpoints.delete_comment = value,
        "api.endpoints.add_like" => cfg.api.endpoints.add_like = value,
        "upload.max_width" => set_parsed(&mut cfg.upload.max_width, key, &value),
        "upload.max_height" => set_parsed(&mut cfg.upload.max_height, key, &value),
        "upload.quality" => set_parsed(&mut cfg.upload.quality, key, &value),
        "ui.cell_width_px" => set_parsed(&mut cfg.ui.cell_width_px, key, &value),
        "ui.cell_height_px" => set_parsed(&mut cfg.ui.cell_height_px, key, &value),
        "ui.resize_debounce" => set_duration(&mut cfg.ui.resize_debounce, key, &value),
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        // GALLERIA_LOG and friends are read elsewhere.
        _ => {}
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(key, value, "ignoring unparsable config override"),
    }
}

fn set_duration(slot: &mut Duration, key: &str, value: &str) {
    match humantime::parse_duration(value.trim()) {
        Ok(duration) => *slot = duration,
        Err(err) => tracing::warn!(key, value, error = %err, "ignoring invalid duration override"),
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("galleria").join("config.yaml"))
}

/// Writes a config file with every default spelled out, unless one exists.
pub fn write_default(path: Option<PathBuf>) -> Result<PathBuf> {
    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };
    anyhow::ensure!(
        !path.exists(),
        "config: {} already exists",
        path.display()
    );

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents =
        serde_yaml::to_string(&Config::default()).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.api.timeout, Duration::from_secs(30));
        assert_eq!(cfg.api.upload_timeout, Duration::from_secs(120));
        assert_eq!(cfg.api.endpoints.get_feed, "getFeed");
        assert_eq!(cfg.upload.compress_options(), CompressOptions::default());
        assert_eq!(cfg.ui.resize_debounce, Duration::from_millis(250));
        assert!(cfg.storage.path.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: https://api.example.com/prod\n  timeout: 5s\n  endpoints:\n    add_like: likes\nupload:\n  quality: 0.6\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("GALLERIA_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://api.example.com/prod");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
        assert_eq!(cfg.api.upload_timeout, Duration::from_secs(120));
        assert_eq!(cfg.api.endpoints.add_like, "likes");
        assert_eq!(cfg.api.endpoints.upload_photo, "uploadPhoto");
        assert_eq!(cfg.upload.quality, 0.6);
        assert_eq!(cfg.upload.max_width, 1920);
    }

    #[test]
    fn missing_explicit_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("absent.yaml")),
            env_prefix: Some("GALLERIA_TEST_ABSENT".into()),
        })
        .unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "api: [not, a, map]\n").unwrap();
        let err = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("GALLERIA_TEST_BAD".into()),
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn env_overrides_apply_by_section() {
        let mut cfg = Config::default();
        apply_env(
            &mut cfg,
            "GALLERIA",
            vars(&[
                ("GALLERIA_API__BASE_URL", "http://localhost:9000"),
                ("GALLERIA_API__ENDPOINTS__GET_FEED", "feed"),
                ("GALLERIA_UPLOAD__MAX_WIDTH", "800"),
                ("GALLERIA_UI__RESIZE_DEBOUNCE", "100ms"),
                ("GALLERIA_STORAGE__PATH", "/tmp/g.db"),
                ("OTHER_API__BASE_URL", "ignored"),
            ]),
        );
        assert_eq!(cfg.api.base_url, "http://localhost:9000");
        assert_eq!(cfg.api.endpoints.get_feed, "feed");
        assert_eq!(cfg.upload.max_width, 800);
        assert_eq!(cfg.ui.resize_debounce, Duration::from_millis(100));
        assert_eq!(cfg.storage.path, Some(PathBuf::from("/tmp/g.db")));
    }

    #[test]
    fn bad_env_values_are_ignored() {
        let mut cfg = Config::default();
        apply_env(
            &mut cfg,
            "GALLERIA",
            vars(&[
                ("GALLERIA_UPLOAD__QUALITY", "high"),
                ("GALLERIA_API__TIMEOUT", "soon"),
            ]),
        );
        assert_eq!(cfg.upload.quality, 0.85);
        assert_eq!(cfg.api.timeout, Duration::from_secs(30));
    }

    #[test]
    fn write_default_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let written = write_default(Some(path.clone())).unwrap();
        assert_eq!(written, path);
        assert_eq!(read_config_file(&path).unwrap(), Config::default());
        assert!(write_default(Some(path)).is_err());
    }
}
