use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::assets::DEFAULT_BUCKET;
use crate::error_codes::{CodedError, INVALID_CONFIG};
use crate::selection::{DimFactor, DEFAULT_DIM_FACTOR};
use crate::texture_stage::{ContextOptions, GpuPowerPreference, ImageOrigin};

pub const DEFAULT_CONFIG_FILE: &str = "labellens.yaml";
pub const DEFAULT_PALETTE_TABLE: &str = "ImageColors";
pub const STORE_URL_ENV: &str = "LABELLENS_STORE_URL";
pub const STORE_KEY_ENV: &str = "LABELLENS_STORE_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewerConfig {
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub palette: PaletteConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetsConfig {
    #[serde(default = "default_assets_root")]
    pub root: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: default_assets_root(),
        }
    }
}

fn default_assets_root() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_palette_table")]
    pub palette_table: String,
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_owned()
}

fn default_palette_table() -> String {
    DEFAULT_PALETTE_TABLE.to_owned()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaletteConfig {
    #[serde(default)]
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    #[serde(default = "default_dim_factor")]
    pub dim_factor: f32,
    #[serde(default)]
    pub image_origin: ImageOrigin,
    #[serde(default)]
    pub power_preference: GpuPowerPreference,
    #[serde(default)]
    pub software: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dim_factor: DEFAULT_DIM_FACTOR,
            image_origin: ImageOrigin::default(),
            power_preference: GpuPowerPreference::default(),
            software: false,
        }
    }
}

fn default_dim_factor() -> f32 {
    DEFAULT_DIM_FACTOR
}

/// Remote store settings after environment fallbacks were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub url: Url,
    pub key: String,
    pub bucket: String,
    pub palette_table: String,
}

impl ViewerConfig {
    /// Load `explicit` if given, else `labellens.yaml` in the working
    /// directory if present, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => load_config(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    load_config(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn dim_factor(&self) -> Result<DimFactor> {
        DimFactor::new(self.render.dim_factor).map_err(|error| {
            anyhow!(CodedError::usage(INVALID_CONFIG, error.to_string())
                .with_details(json!({ "field": "render.dim_factor" })))
        })
    }

    pub fn context_options(&self) -> Result<ContextOptions> {
        Ok(ContextOptions {
            origin: self.render.image_origin,
            dim: self.dim_factor()?,
            ..ContextOptions::default()
        })
    }

    pub fn remote_settings(&self) -> Result<Option<RemoteSettings>> {
        self.remote_settings_with(|name| std::env::var(name).ok())
    }

    /// Resolve remote settings, filling `url`/`key` from `env` when the file
    /// leaves them out. `None` when no remote is configured anywhere.
    pub fn remote_settings_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<RemoteSettings>> {
        let remote = self.remote.clone();
        let url = remote
            .as_ref()
            .and_then(|remote| remote.url.clone())
            .or_else(|| env(STORE_URL_ENV));
        let Some(url) = url else {
            return Ok(None);
        };

        let key = remote
            .as_ref()
            .and_then(|remote| remote.key.clone())
            .or_else(|| env(STORE_KEY_ENV))
            .ok_or_else(|| {
                anyhow!(CodedError::usage(
                    INVALID_CONFIG,
                    format!("remote store key missing; set remote.key or {STORE_KEY_ENV}"),
                ))
            })?;

        let url = Url::parse(&url).map_err(|error| {
            anyhow!(CodedError::usage(
                INVALID_CONFIG,
                format!("remote.url '{url}' is not a valid URL: {error}"),
            )
            .with_details(json!({ "field": "remote.url" })))
        })?;

        Ok(Some(RemoteSettings {
            url,
            key,
            bucket: remote
                .as_ref()
                .map_or_else(default_bucket, |remote| remote.bucket.clone()),
            palette_table: remote
                .as_ref()
                .map_or_else(default_palette_table, |remote| remote.palette_table.clone()),
        }))
    }
}

pub fn load_config(path: &Path) -> Result<ViewerConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut config: ViewerConfig = serde_yaml::from_str(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(CodedError::usage(
            INVALID_CONFIG,
            format!(
                "failed to parse yaml in {} at {}: {}",
                path.display(),
                location,
                error
            ),
        ))
    })?;

    config.dim_factor()?;

    let config_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    config.assets.root = resolve_relative(&config_dir, &config.assets.root);
    config.palette.catalog = config
        .palette
        .catalog
        .as_deref()
        .map(|catalog| resolve_relative(&config_dir, catalog));

    Ok(config)
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
