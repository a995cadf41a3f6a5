pub mod state;

pub use state::{
    ClientSettings, DEFAULT_RELAY_URL, SETTINGS_DIRECTORY_NAME, SETTINGS_ENV_PREFIX,
    SETTINGS_FILE_NAME, SettingsError, SettingsResult,
};
