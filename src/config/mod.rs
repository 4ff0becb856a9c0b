mod settings;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;

pub use settings::{
    BrokerSettings, DispatchSettings, LoggingSettings, ServerSettings, Settings, TransportKind,
};

/// Prefix for environment overrides, e.g. `FANBUS__BROKER__PORT=5673`.
pub const ENV_PREFIX: &str = "FANBUS";

/// Loads the configuration from `.env`, the default file and environment variables.
///
/// Sources are layered in that order and merged over [`Settings::default`], so
/// any value may be left out.
pub fn load_config() -> Result<Settings, ConfigError> {
    // a missing .env is the normal case
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
