mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, ControllerSettings, ImageSettings, RuntimeSettings, SempSettings, Settings,
    StorageSettings,
};

/// Default location of the optional configuration file (any format the
/// `config` crate understands, e.g. `config/default.toml`).
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Optional dotenv file read before the environment is consulted.
pub const DOTENV_FILE: &str = "env/dev.env";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    // A missing dotenv file is normal in containers.
    let _ = dotenvy::from_filename(DOTENV_FILE);
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Loads `path` (optional) and `BRIDGE__SECTION__KEY` environment variables,
/// then merges the result onto the defaults.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        // Values stay strings; numeric fields are converted on deserialize.
        .add_source(Environment::with_prefix("BRIDGE").separator("__"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
