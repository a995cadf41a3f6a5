#![deny(unsafe_code)]

/// Relay for relaychat: accepts a message history on `POST /api/chat` and streams the
/// provider's reply back as plain text.
pub mod config;
pub mod relay;

use std::sync::Arc;

use relaychat_llm::{LlmProvider, ProviderError, create_provider};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;

pub use config::{ConfigError, RelayConfig};
pub use relay::{RelayError, RelayState, router};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServerError {
    #[snafu(display("relay configuration is invalid on `{stage}`: {source}"))]
    Config {
        stage: &'static str,
        source: ConfigError,
    },
    #[snafu(display("failed to create provider on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("failed to bind {address} on `{stage}`: {source}"))]
    Bind {
        stage: &'static str,
        address: String,
        source: std::io::Error,
    },
    #[snafu(display("relay server stopped on `{stage}`: {source}"))]
    Serve {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Loads configuration from the environment and serves the relay.
pub async fn run() -> ServerResult<()> {
    let config = RelayConfig::load().context(ConfigSnafu {
        stage: "load-relay-config",
    })?;
    serve(config).await
}

/// Builds the provider from configuration and serves the relay until it fails.
pub async fn serve(config: RelayConfig) -> ServerResult<()> {
    let provider = create_provider(config.provider_config()).context(ProviderSnafu {
        stage: "serve-create-provider",
    })?;
    let address = config.socket_addr().context(ConfigSnafu {
        stage: "serve-bind-address",
    })?;
    let listener = TcpListener::bind(address).await.context(BindSnafu {
        stage: "serve-bind",
        address: address.to_string(),
    })?;

    serve_with(listener, provider, config.model_id).await
}

/// Serves the relay on an already bound listener.
pub async fn serve_with(
    listener: TcpListener,
    provider: Arc<dyn LlmProvider>,
    model_id: String,
) -> ServerResult<()> {
    match listener.local_addr() {
        Ok(address) => tracing::info!(%address, provider = provider.id(), model = %model_id, "relay listening"),
        Err(error) => tracing::warn!(error = %error, "relay listening on unknown address"),
    }

    let app = router(RelayState::new(provider, model_id));
    axum::serve(listener, app).await.context(ServeSnafu {
        stage: "serve-http",
    })
}
