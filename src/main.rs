use jarvis::{
    agent::{CompletionService, GeminiClient},
    api::{ApiServer, ServerOptions},
    auth::AuthService,
    blob::LocalBlobStore,
    config::Config,
    manager::Manager,
    profile::ProfileManager,
    store::{Repository, Store},
};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        // Plain environment variables are enough.
        info!("No .env file loaded: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return Err(e);
        }
    };

    info!("Jarvis daemon starting...");

    let store = Store::connect(&config.database_url).await?;
    store.init().await?;
    info!(users = store.count_users().await?, "store ready");

    let repo: Arc<dyn Repository> = Arc::new(store.clone());

    let completion: Arc<dyn CompletionService> = Arc::new(GeminiClient::new(
        &config.gemini_base_url,
        &config.gemini_model,
        &config.gemini_api_key,
        config.completion_timeout,
    )?);

    let blobs = Arc::new(LocalBlobStore::new(&config.upload_dir));
    let auth = AuthService::new(repo.clone(), &config.jwt_secret);
    let profiles = ProfileManager::new(repo.clone(), blobs, &config.public_base_url);
    let manager = Arc::new(Manager::new(repo, auth, profiles, completion));

    let app = ApiServer::new(
        manager,
        ServerOptions {
            upload_dir: config.upload_dir.clone(),
            frontend_dir: config.frontend_dir.clone(),
            cors_origin: config.cors_origin.clone(),
        },
    )
    .router();

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
