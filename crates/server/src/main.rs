use relaychat_server::ServerError;

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt::init();
    relaychat_server::run().await
}
