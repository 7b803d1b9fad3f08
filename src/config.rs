use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub engine: EngineConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

/// Recognition-service endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the recognition service, e.g. "ws://localhost:8000"
    pub url: String,
    /// Default language code, e.g. "ru"
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per captured frame (one device callback = one frame)
    pub frame_samples: u32,
    /// Input device name substring; default device when absent
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_samples: 4096,
            device: None,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
