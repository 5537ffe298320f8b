mod settings;

use config::{Config, Environment, File};

use crate::utils::error::SettingsError;

pub use settings::{
    BrokerSettings, ClientSettings, DirectorySettings, LogSettings, PartialSettings,
    ReconnectSettings, SessionSettings, Settings, TopicSettings,
};

/// Environment variable naming the configuration file (without extension).
pub const CONFIG_PATH_VAR: &str = "MCHAT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default";

/// Loads the configuration file named by `MCHAT_CONFIG` (default
/// `config/default`) and `MCHAT_*` environment variables, merges them over
/// the defaults and validates the result.
pub fn load_config() -> Result<Settings, SettingsError> {
    let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_config_from(&path)
}

/// Same as [`load_config`] with an explicit file path. A missing file is
/// not an error.
pub fn load_config_from(path: &str) -> Result<Settings, SettingsError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("MCHAT")
                .prefix_separator("_")
                .separator("__"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = partial.merge(Settings::default());
    settings.validate()?;
    Ok(settings)
}
