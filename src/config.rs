use std::{env, path::PathBuf, time::Duration};

/// Per-hop compute deadline.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Peak level a recording is scaled to when `normalize` is requested.
pub const DEFAULT_NORMALIZE_PEAK: f32 = 0.95;

pub const DEFAULT_MODEL_BASE_URL: &str = "https://models.stem-separator.dev/";

/// Engine-wide settings. Per-call settings live in [`crate::SeparationOptions`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub chunk_timeout: Duration,
    /// Overrides the platform cache directory for downloaded models.
    pub cache_dir: Option<PathBuf>,
    /// Base URL the catalog's relative manifest paths are joined onto.
    pub model_base_url: String,
    pub normalize_peak: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            cache_dir: None,
            model_base_url: DEFAULT_MODEL_BASE_URL.into(),
            normalize_peak: DEFAULT_NORMALIZE_PEAK,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `STEM_SEPARATOR_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(ms) = env::var("STEM_SEPARATOR_CHUNK_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            cfg.chunk_timeout = Duration::from_millis(ms);
        }
        if let Ok(dir) = env::var("STEM_SEPARATOR_CACHE_DIR") {
            cfg.cache_dir = Some(PathBuf::from(dir));
        }
        if let Ok(url) = env::var("STEM_SEPARATOR_MODEL_BASE_URL") {
            cfg.model_base_url = url;
        }

        cfg
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}
