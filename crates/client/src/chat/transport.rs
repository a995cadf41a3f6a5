use std::future::Future;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use relaychat_llm::{CHAT_ROUTE, ChatRequest};
use snafu::{ResultExt, Snafu, ensure};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ByteStream = Pin<Box<dyn Stream<Item = TransportResult<Vec<u8>>> + Send>>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("failed to build relay client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`: {source}"))]
    SendRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("relay at {url} answered with status {status}"))]
    UnexpectedStatus {
        stage: &'static str,
        url: String,
        status: u16,
    },
    #[snafu(display("reading relay response body failed on `{stage}`: {source}"))]
    ReadBody {
        stage: &'static str,
        source: reqwest::Error,
    },
}

/// Opens one streamed chat turn against a relay.
pub trait ChatTransport: Send + Sync {
    fn open<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, TransportResult<ByteStream>>;
}

/// HTTP transport for `POST /api/chat`.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    chat_url: String,
}

impl RelayClient {
    pub fn new(relay_url: &str) -> TransportResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context(BuildClientSnafu {
                stage: "relay-client-build",
            })?;
        Ok(Self::with_client(http, relay_url))
    }

    pub fn with_client(http: reqwest::Client, relay_url: &str) -> Self {
        Self {
            http,
            chat_url: format!("{}{CHAT_ROUTE}", relay_url.trim().trim_end_matches('/')),
        }
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    async fn open_stream(&self, request: ChatRequest) -> TransportResult<ByteStream> {
        let response = self
            .http
            .post(&self.chat_url)
            .json(&request)
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "relay-send",
                url: self.chat_url.clone(),
            })?;

        let status = response.status();
        ensure!(
            status.is_success(),
            UnexpectedStatusSnafu {
                stage: "relay-status",
                url: self.chat_url.clone(),
                status: status.as_u16(),
            }
        );

        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .context(ReadBodySnafu {
                    stage: "relay-read-chunk",
                })
        });
        Ok(Box::pin(body))
    }
}

impl ChatTransport for RelayClient {
    fn open<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, TransportResult<ByteStream>> {
        Box::pin(self.open_stream(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_url_joins_without_double_slash() {
        let client = RelayClient::new("http://127.0.0.1:3000/").unwrap();
        assert_eq!(client.chat_url(), "http://127.0.0.1:3000/api/chat");
    }
}
