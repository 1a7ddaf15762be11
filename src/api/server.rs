use super::handlers;
use crate::{
    blob::{MAX_AVATAR_BYTES, UPLOADS_PREFIX},
    manager::Manager,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Router,
};
use std::{path::PathBuf, sync::Arc};
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Room for the multipart envelope around a maximum-size avatar.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub struct ApiState {
    pub manager: Arc<Manager>,
}

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub upload_dir: PathBuf,
    pub frontend_dir: Option<PathBuf>,
    /// Single allowed browser origin. `None` allows any origin.
    pub cors_origin: Option<String>,
}

pub struct ApiServer {
    manager: Arc<Manager>,
    options: ServerOptions,
}

impl ApiServer {
    pub fn new(manager: Arc<Manager>, options: ServerOptions) -> Self {
        Self { manager, options }
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(ApiState {
            manager: self.manager.clone(),
        });

        let router = Router::new()
            .route("/signup", post(handlers::signup))
            .route("/login", post(handlers::login))
            .route(
                "/user/:id",
                get(handlers::get_user).put(handlers::update_user),
            )
            .route("/chat", post(handlers::chat))
            .nest_service(UPLOADS_PREFIX, ServeDir::new(&self.options.upload_dir))
            .layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES + MULTIPART_OVERHEAD))
            .with_state(state);

        // Unknown paths fall through to the browser client so its own
        // router can handle deep links.
        let router = match &self.options.frontend_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "serving browser client");
                router.fallback_service(
                    ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))),
                )
            }
            None => router,
        };

        router
            .layer(self.cors_layer())
            .layer(TraceLayer::new_for_http())
    }

    fn cors_layer(&self) -> CorsLayer {
        let Some(origin) = self.options.cors_origin.as_deref() else {
            return CorsLayer::permissive();
        };

        match origin.parse::<HeaderValue>() {
            Ok(origin) => CorsLayer::new()
                .allow_origin(origin)
                .allow_credentials(true)
                .allow_methods([Method::GET, Method::POST, Method::PUT])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
            Err(_) => {
                warn!(origin, "unparseable CORS origin, allowing any origin");
                CorsLayer::permissive()
            }
        }
    }
}
