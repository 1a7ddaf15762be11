use jarvis::{
    client::{ApiClient, ConversationManager, FileStore},
    config::ClientConfig,
    interface::Terminal,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file loaded: {}", e);
    }

    // Quiet by default so log lines don't land in the middle of the chat.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;
    info!(server = %config.server_url, cache = %config.cache_dir.display(), "starting client");

    let api = Arc::new(ApiClient::new(&config.server_url, config.reply_timeout)?);
    let conversations = ConversationManager::new(api.clone(), Arc::new(FileStore::new(&config.cache_dir)))
        .with_reply_timeout(config.reply_timeout);

    let mut terminal = Terminal::new(
        api,
        conversations,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );
    terminal.run().await
}
