use crate::CollectorKind;
use clap::Parser;
use std::path::PathBuf;

/// Prometheus exporter for the SimpleMDM API
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// SimpleMDM API key, sent as the basic auth user.
    #[clap(long, env = "SIMPLEMDM_API_KEY", value_name = "KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the SimpleMDM API.
    #[clap(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Address the metrics endpoint listens on.
    #[clap(long, value_name = "ADDR")]
    pub listen_address: Option<String>,

    /// Time between the starts of two collection cycles (e.g. `60s`, `5m`).
    #[clap(long, value_name = "DURATION")]
    pub interval: Option<String>,

    /// Timeout of a single API request.
    #[clap(long, value_name = "DURATION")]
    pub request_timeout: Option<String>,

    /// Records requested per page, at most 100.
    #[clap(long, value_name = "N")]
    pub page_size: Option<u32>,

    /// Pages followed per collection before giving up.
    #[clap(long, value_name = "N")]
    pub max_pages: Option<u32>,

    /// Run the collectors of a cycle concurrently.
    #[clap(long, action)]
    pub concurrent_collectors: bool,

    /// Comma separated list of enabled collectors.
    #[clap(long, value_delimiter = ',', value_name = "NAME,...")]
    pub collectors: Option<Vec<CollectorKind>>,

    /// Default log filter when `RUST_LOG` is not set.
    #[clap(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// YAML configuration file. Defaults to `config.yaml` in the config directory.
    #[clap(long, short, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the effective configuration and exit.
    #[clap(long, action)]
    pub print_config: bool,
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            let strings = [
                ("api_key", &self.api_key),
                ("base_url", &self.base_url),
                ("listen_address", &self.listen_address),
                ("interval", &self.interval),
                ("request_timeout", &self.request_timeout),
                ("log_level", &self.log_level),
            ];
            for (key, value) in strings {
                if let Some(value) = value {
                    cache.insert(key.to_string(), value.clone().into());
                }
            }
            if let Some(page_size) = self.page_size {
                cache.insert("page_size".to_string(), u64::from(page_size).into());
            }
            if let Some(max_pages) = self.max_pages {
                cache.insert("max_pages".to_string(), u64::from(max_pages).into());
            }
            if self.concurrent_collectors {
                cache.insert("concurrent_collectors".to_string(), true.into());
            }
            if let Some(collectors) = &self.collectors {
                cache.insert(
                    "collectors".to_string(),
                    collectors
                        .iter()
                        .map(|kind| Value::from(kind.to_string()))
                        .collect::<Vec<_>>()
                        .into(),
                );
            }
            Ok(cache)
        }
    }
}

pub fn version() -> String {
    let author = clap::crate_authors!();
    let config_file = crate::default_config_file().display().to_string();

    format!(
        "{}

Authors: {author}

Config file: {config_file}",
        clap::crate_version!()
    )
}
