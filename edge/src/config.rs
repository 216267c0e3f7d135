use provider::knative::{LabelSelector, SelectorError, ServiceRef};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_public_entrypoints() -> Vec<String> {
    vec!["web".to_string()]
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            sentry_dsn: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct KnativeConfig {
    /// Directory of Ingress, Service and Secret manifests.
    pub manifests_dir: PathBuf,
    /// Watched namespaces. Empty means all of them.
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub label_selector: String,
    #[serde(default = "default_public_entrypoints")]
    pub public_entrypoints: Vec<String>,
    pub public_service: ServiceRef,
    #[serde(default)]
    pub private_entrypoints: Vec<String>,
    #[serde(default)]
    pub private_service: Option<ServiceRef>,
    #[serde(default)]
    pub throttle_duration_ms: u64,
}

impl KnativeConfig {
    pub fn throttle_duration(&self) -> Duration {
        Duration::from_millis(self.throttle_duration_ms)
    }

    pub fn label_selector(&self) -> Result<LabelSelector, ConfigError> {
        Ok(LabelSelector::parse(&self.label_selector)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.manifests_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyManifestsDir);
        }
        if self.public_entrypoints.is_empty() {
            return Err(ConfigError::EmptyPublicEntrypoints);
        }
        let services = std::iter::once(("public_service", &self.public_service))
            .chain(self.private_service.iter().map(|s| ("private_service", s)));
        for (field, service) in services {
            if service.namespace.is_empty() || service.name.is_empty() {
                return Err(ConfigError::IncompleteServiceRef(field));
            }
        }
        self.label_selector()?;
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FileConfig {
    /// A YAML file or a directory of YAML files.
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub watch: bool,
    #[serde(default)]
    pub throttle_duration_ms: u64,
}

impl FileConfig {
    pub fn throttle_duration(&self) -> Duration {
        Duration::from_millis(self.throttle_duration_ms)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ProvidersConfig {
    pub knative: Option<KnativeConfig>,
    pub file: Option<FileConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let providers = &self.providers;
        if providers.knative.is_none() && providers.file.is_none() {
            return Err(ConfigError::NoProviders);
        }
        if let Some(knative) = &providers.knative {
            knative.validate()?;
        }
        if let Some(file) = &providers.file
            && file.path.as_os_str().is_empty()
        {
            return Err(ConfigError::EmptyFilePath);
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("no provider configured")]
    NoProviders,
    #[error("knative provider needs at least one public entry point")]
    EmptyPublicEntrypoints,
    #[error("knative provider needs a manifests directory")]
    EmptyManifestsDir,
    #[error("file provider needs a path")]
    EmptyFilePath,
    #[error("{0} needs a namespace and a name")]
    IncompleteServiceRef(&'static str),
    #[error("invalid label selector: {0}")]
    InvalidLabelSelector(#[from] SelectorError),
}
