//! # Configuration
//!
//! Layered settings of the exporter, in increasing precedence:
//!
//! 1. the embedded `default-config.yaml`
//! 2. an optional YAML file (`--config`, or `config.yaml` in the config directory)
//! 3. `SIMPLEMDM_EXPORTER_*` environment variables
//! 4. command line arguments

#[macro_use]
extern crate tracing;

mod app_config;
mod args;

pub use app_config::{
    default_config_file,
    get_config_dir,
    ENV_PREFIX,
};
pub use args::Args;
use derive_more::Debug;
use eyre::{
    ensure,
    Context as _,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    net::SocketAddr,
    time::Duration,
};
use strum::{
    Display,
    EnumIter,
    EnumString,
};
use url::Url;

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

/// Upper bound of the API's `limit` parameter.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A resource collector that can be enabled in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CollectorKind {
    Devices,
    Apps,
    Enrollments,
    Dep,
    Profiles,
    PushCertificate,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[debug(skip)]
    #[serde(default)]
    pub api_key: String,
    pub base_url: Url,
    pub listen_address: SocketAddr,
    #[serde(with = "humantime_format")]
    pub interval: Duration,
    #[serde(with = "humantime_format")]
    pub request_timeout: Duration,
    pub page_size: u32,
    pub max_pages: u32,
    #[serde(default)]
    pub concurrent_collectors: bool,
    pub collectors: Vec<CollectorKind>,
    pub log_level: String,
}

impl Config {
    /// Load the configuration from all layers, including the process environment.
    pub fn new(args: Args) -> Result<Self, config::ConfigError> {
        Self::load(args, config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load(args: Args, environment: config::Environment) -> Result<Self, config::ConfigError> {
        let (config_file, required) = match &args.config {
            Some(path) => (path.clone(), true),
            None => (default_config_file(), false),
        };
        debug!(file = %config_file.display(), required, "loading configuration");

        let environment = environment
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("collectors");

        let cfg: Self = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml))
            .add_source(
                config::File::from(config_file)
                    .format(config::FileFormat::Yaml)
                    .required(required),
            )
            .add_source(environment)
            .add_source(args)
            .build()?
            .try_deserialize()?;

        Ok(cfg)
    }

    /// Reject settings the exporter cannot run with.
    pub fn validate(&self) -> eyre::Result<()> {
        ensure!(
            !self.api_key.trim().is_empty(),
            "an API key is required (--api-key, SIMPLEMDM_API_KEY or `api_key` in the config file)"
        );
        ensure!(
            (1..=MAX_PAGE_SIZE).contains(&self.page_size),
            "page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
            self.page_size
        );
        ensure!(!self.interval.is_zero(), "interval must be greater than zero");
        ensure!(!self.request_timeout.is_zero(), "request_timeout must be greater than zero");
        ensure!(self.max_pages > 0, "max_pages must be greater than zero");
        ensure!(!self.collectors.is_empty(), "at least one collector must be enabled");
        Ok(())
    }

    /// Enabled collectors in configured order, each once.
    pub fn enabled_collectors(&self) -> Vec<CollectorKind> {
        let mut enabled = Vec::with_capacity(self.collectors.len());
        for kind in &self.collectors {
            if !enabled.contains(kind) {
                enabled.push(*kind);
            }
        }
        enabled
    }

    /// The effective configuration as YAML, with the API key masked.
    pub fn to_redacted_yaml(&self) -> eyre::Result<String> {
        let mut clone = self.clone();
        if !clone.api_key.is_empty() {
            clone.api_key = "<redacted>".to_string();
        }
        serde_yml::to_string(&clone).context("Failed to serialize config")
    }
}

mod humantime_format {
    use serde::{
        de::Error as _,
        Deserialize,
        Deserializer,
        Serializer,
    };
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(|e| D::Error::custom(format!("invalid duration `{text}`: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use temp_dir::TempDir;

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    fn config_file(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.child("config.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn args(dir: &TempDir, content: &str) -> Args {
        Args {
            config: Some(config_file(dir, content)),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_embedded() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(args(&dir, "api_key: secret\n"), environment(&[])).unwrap();

        assert_eq!(cfg.base_url.as_str(), "https://a.simplemdm.com/api/v1/");
        assert_eq!(cfg.listen_address, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(cfg.interval, Duration::from_secs(60));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.page_size, 100);
        assert_eq!(cfg.max_pages, 10_000);
        assert!(!cfg.concurrent_collectors);
        assert_eq!(cfg.collectors.len(), 6);
        assert_eq!(cfg.log_level, "info");
        cfg.validate().unwrap();
    }

    #[test]
    fn layers_override_in_order() {
        let dir = TempDir::new().unwrap();
        let mut args = args(&dir, "api_key: from-file\ninterval: 5m\npage_size: 50\n");
        args.page_size = Some(25);

        let cfg = Config::load(
            args,
            environment(&[
                ("SIMPLEMDM_EXPORTER_API_KEY", "from-env"),
                ("SIMPLEMDM_EXPORTER_PAGE_SIZE", "75"),
                ("SIMPLEMDM_EXPORTER_COLLECTORS", "apps,dep"),
            ]),
        )
        .unwrap();

        assert_eq!(cfg.api_key, "from-env");
        assert_eq!(cfg.interval, Duration::from_secs(300));
        assert_eq!(cfg.page_size, 25);
        assert_eq!(cfg.collectors, vec![CollectorKind::Apps, CollectorKind::Dep]);
    }

    #[test]
    fn collectors_from_args() {
        let dir = TempDir::new().unwrap();
        let mut args = args(&dir, "api_key: secret\n");
        args.collectors = Some(vec![CollectorKind::PushCertificate, CollectorKind::PushCertificate]);

        let cfg = Config::load(args, environment(&[])).unwrap();

        assert_eq!(cfg.enabled_collectors(), vec![CollectorKind::PushCertificate]);
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let args = Args {
            config: Some("/nonexistent/simplemdm-exporter.yaml".into()),
            ..Default::default()
        };
        assert!(Config::load(args, environment(&[])).is_err());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let dir = TempDir::new().unwrap();
        let load = |content: &str| Config::load(args(&dir, content), environment(&[])).unwrap();

        assert!(load("api_key: ''\n").validate().is_err());
        assert!(load("api_key: k\npage_size: 101\n").validate().is_err());
        assert!(load("api_key: k\npage_size: 0\n").validate().is_err());
        assert!(load("api_key: k\ninterval: 0s\n").validate().is_err());
        assert!(load("api_key: k\nmax_pages: 0\n").validate().is_err());
        assert!(load("api_key: k\ncollectors: []\n").validate().is_err());
        assert!(Config::load(args(&dir, "interval: soon\n"), environment(&[])).is_err());
    }

    #[test]
    fn api_key_is_never_printed() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(args(&dir, "api_key: top-secret\n"), environment(&[])).unwrap();

        assert!(!format!("{cfg:?}").contains("top-secret"));
        let yaml = cfg.to_redacted_yaml().unwrap();
        assert!(!yaml.contains("top-secret"));
        let reparsed: Config = serde_yml::from_str(&yaml).unwrap();
        assert_eq!(reparsed.interval, Duration::from_secs(60));
        assert_eq!(reparsed.api_key, "<redacted>");
    }
}
