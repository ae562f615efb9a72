#[macro_use]
extern crate tracing;

mod app;

pub use app::App;
use color_eyre::Result;
pub use simplemdm_exporter_config::Args;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

pub fn init_errors() -> Result<()> {
    color_eyre::install()
}

/// `RUST_LOG` takes precedence over the configured `default_directive`.
pub fn init_logging(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)?,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .with(tracing_error::ErrorLayer::default())
        .try_init()?;
    Ok(())
}
