use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000";
pub const SETTINGS_DIRECTORY_NAME: &str = "relaychat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "RELAYCHAT_";
const DATABASE_FILE_NAME: &str = "state.db";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to extract client settings on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Where the client sends chat turns and keeps its local state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            database_path: default_database_path(),
        }
    }
}

impl ClientSettings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".relaychat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads settings from the default location.
    pub fn load() -> Self {
        Self::load_from(&Self::default_config_path())
    }

    /// Defaults, then the JSON file at `path`, then `RELAYCHAT_*` variables.
    ///
    /// A broken settings file is logged and the defaults are used instead.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        match Self::extract(Self::figment(path)) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "using default settings");
                Self::default()
            }
        }
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX))
    }

    pub fn extract(figment: Figment) -> SettingsResult<Self> {
        let settings = figment.extract::<Self>().context(ExtractSnafu {
            stage: "extract-client-settings",
        })?;
        Ok(settings.normalized())
    }

    fn normalized(mut self) -> Self {
        self.relay_url = self.relay_url.trim().to_string();
        if self.relay_url.is_empty() {
            self.relay_url = default_relay_url();
        }
        if self.database_path.as_os_str().is_empty() {
            self.database_path = default_database_path();
        }
        self
    }
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_string()
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".relaychat"))
        .join(DATABASE_FILE_NAME)
}
