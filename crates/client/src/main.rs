use relaychat_client::app::{AppError, ChatApp, open_session};
use relaychat_client::settings::ClientSettings;
use tokio::io::BufReader;

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Logs go to stderr so they do not interleave with streamed replies.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let settings = ClientSettings::load();
    let session = open_session(&settings).await?;

    let mut app = ChatApp::new(session);
    app.run(BufReader::new(tokio::io::stdin()), std::io::stdout())
        .await
}
