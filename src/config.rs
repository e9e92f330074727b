use crate::backend::Backend;
use crate::error::{Result, SoundIoError};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

pub const ENV_BACKEND: &str = "SOUNDIO_BACKEND";
pub const ENV_APP_NAME: &str = "SOUNDIO_APP_NAME";
pub const ENV_LATENCY: &str = "SOUNDIO_LATENCY";
pub const ENV_SAMPLE_RATE: &str = "SOUNDIO_SAMPLE_RATE";

/// Application-level settings for a context and its streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundIoConfig {
    pub app_name: String,
    /// `None` tries every compiled-in backend in priority order. Read with
    /// the same rules as `SOUNDIO_BACKEND`.
    #[serde(deserialize_with = "deserialize_backend")]
    pub backend: Option<Backend>,
    /// Seconds; `None` uses the device default
    pub software_latency: Option<f64>,
    pub sample_rate: Option<u32>,
}

fn deserialize_backend<'de, D>(deserializer: D) -> std::result::Result<Option<Backend>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(value) => Backend::parse_selection(&value).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

impl Default for SoundIoConfig {
    fn default() -> Self {
        Self {
            app_name: "SoundIo".to_string(),
            backend: None,
            software_latency: None,
            sample_rate: None,
        }
    }
}

impl SoundIoConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SoundIoError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&json)
            .map_err(|e| SoundIoError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SoundIoError::Config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| SoundIoError::Config(format!("failed to write {}: {}", path.display(), e)))
    }

    /// Defaults overridden by the `SOUNDIO_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Override fields with any `SOUNDIO_*` environment variables that are set
    pub fn merge_env(self) -> Result<Self> {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`merge_env`](Self::merge_env) with a custom variable lookup
    pub fn merge_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(ENV_BACKEND) {
            self.backend = Backend::parse_selection(&value)?;
        }
        if let Some(value) = lookup(ENV_APP_NAME) {
            self.app_name = value;
        }
        if let Some(value) = lookup(ENV_LATENCY) {
            let latency = value
                .trim()
                .parse::<f64>()
                .map_err(|_| SoundIoError::Config(format!("{}: not a number: {}", ENV_LATENCY, value)))?;
            self.software_latency = Some(latency);
        }
        if let Some(value) = lookup(ENV_SAMPLE_RATE) {
            let rate = value.trim().parse::<u32>().map_err(|_| {
                SoundIoError::Config(format!("{}: not a sample rate: {}", ENV_SAMPLE_RATE, value))
            })?;
            self.sample_rate = Some(rate);
        }
        Ok(self)
    }
}
