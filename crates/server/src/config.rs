use std::net::SocketAddr;

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use relaychat_llm::{DEFAULT_OPENAI_MODEL, ProviderConfig, RIG_OPENAI_PROVIDER_ID};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:3000";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const CONFIG_ENV_PREFIX: &str = "RELAYCHAT_";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("failed to extract relay config on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
    #[snafu(display("{API_KEY_ENV} is missing or blank (checked on `{stage}`)"))]
    MissingApiKey { stage: &'static str },
    #[snafu(display("bind address '{address}' is invalid on `{stage}`: {source}"))]
    InvalidBindAddress {
        stage: &'static str,
        address: String,
        source: std::net::AddrParseError,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub bind_address: String,
    pub model_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub openai_api_key: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            model_id: DEFAULT_OPENAI_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            openai_api_key: String::new(),
        }
    }
}

impl RelayConfig {
    /// Defaults, then `RELAYCHAT_*` variables, then `OPENAI_API_KEY`.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(CONFIG_ENV_PREFIX))
            .merge(
                Env::raw()
                    .only(&[API_KEY_ENV])
                    .map(|_| "openai_api_key".into()),
            )
    }

    /// Loads and validates the relay configuration. A missing credential is fatal.
    pub fn load() -> ConfigResult<Self> {
        Self::extract(Self::figment())
    }

    pub fn extract(figment: Figment) -> ConfigResult<Self> {
        let mut config = figment.extract::<Self>().context(ExtractSnafu {
            stage: "extract-relay-config",
        })?;

        config.openai_api_key = config.openai_api_key.trim().to_string();
        ensure!(
            !config.openai_api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "validate-relay-api-key",
            }
        );

        config.model_id = config.model_id.trim().to_string();
        if config.model_id.is_empty() {
            config.model_id = DEFAULT_OPENAI_MODEL.to_string();
        }

        config.socket_addr()?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> ConfigResult<SocketAddr> {
        self.bind_address
            .trim()
            .parse()
            .context(InvalidBindAddressSnafu {
                stage: "parse-bind-address",
                address: self.bind_address.clone(),
            })
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(RIG_OPENAI_PROVIDER_ID, &self.openai_api_key, &self.endpoint)
    }
}
