use std::{
    env,
    fs,
    path::{
        Path, PathBuf,
    },
    time::Duration,
};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    remote::{
        ExportLimits,
        PollPolicy,
    },
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    // e.g. https://earthengine.googleapis.com/v1
    pub url: Option<String>,

    // projects/<project> becomes the root namespace
    pub project: Option<String>,

    // overrides the project-derived root
    pub root_dir: Option<String>,

    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    // in seconds
    pub max_sleep_secs: u64,

    pub initial_exponent: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        let policy = PollPolicy::default();
        PollingConfig {
            max_sleep_secs: policy.max_sleep.as_secs(),
            initial_exponent: policy.initial_exponent,
        }
    }
}

impl PollingConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            initial_exponent: self.initial_exponent,
            max_sleep: Duration::from_secs(self.max_sleep_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub max_pixels: u64,

    pub max_properties: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let limits = ExportLimits::default();
        ExportConfig {
            max_pixels: limits.max_pixels,
            max_properties: limits.max_properties,
        }
    }
}

impl ExportConfig {
    pub fn limits(&self) -> ExportLimits {
        ExportLimits {
            max_pixels: self.max_pixels,
            max_properties: self.max_properties,
        }
    }
}

// settings as read in from disk, then patched from the environment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

impl Settings {
    pub fn parse(text: &str, path: &Path) -> Result<Settings, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Read settings from `path`, or from the default location if it exists,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().ok().filter(|p| p.exists()),
        };
        let mut settings = match path {
            Some(path) => {
                let text = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
                    path: path.clone(),
                    source: e,
                })?;
                Settings::parse(&text, &path)?
            },
            None => Settings::default(),
        };
        settings.apply_env(|name| env::var(name).ok());
        Ok(settings)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = &mut self.backend;
        for (name, slot) in [
            ("GEOTASK_BACKEND_URL", &mut backend.url),
            ("GEOTASK_PROJECT", &mut backend.project),
            ("GEOTASK_ROOT_DIR", &mut backend.root_dir),
            ("GEOTASK_ACCESS_TOKEN", &mut backend.access_token),
        ] {
            if let Some(value) = lookup(name).filter(|v| false == v.is_empty()) {
                *slot = Some(value);
            }
        }
    }
}

// base config path of the host
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home_dir = home::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home_dir.join(".geotask").join("config.toml"))
}
