use crate::{
    agent::CompletionService,
    auth::AuthService,
    chat::Exchange,
    entity::UserId,
    error::{Error, Result},
    profile::ProfileManager,
    store::Repository,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Server-side services behind the HTTP handlers.
pub struct Manager {
    repo: Arc<dyn Repository>,
    auth: AuthService,
    profiles: ProfileManager,
    completion: Arc<dyn CompletionService>,
}

impl Manager {
    pub fn new(
        repo: Arc<dyn Repository>,
        auth: AuthService,
        profiles: ProfileManager,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            repo,
            auth,
            profiles,
            completion,
        }
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn profiles(&self) -> &ProfileManager {
        &self.profiles
    }

    /// Forward `message` to the completion service and log the exchange.
    ///
    /// The log write is an audit trail: if it fails the reply is still
    /// returned.
    pub async fn chat(&self, user_id: UserId, message: &str) -> Result<String> {
        if message.trim().is_empty() {
            return Err(Error::Validation("Message is required.".to_string()));
        }

        let reply = self.completion.complete(message).await?;

        let exchange = Exchange::new(user_id, message, reply.as_str());
        match self.repo.insert_exchange(&exchange).await {
            Ok(()) => info!(user_id = %user_id, exchange_id = %exchange.id, "logged exchange"),
            Err(e) => warn!(user_id = %user_id, error = %e, "failed to log exchange"),
        }

        Ok(reply)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{auth::tests::cheap_params, blob::LocalBlobStore, store::Store};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Completion service that replies from a script and counts calls.
    pub(crate) struct ScriptedCompletion {
        reply: std::result::Result<String, String>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedCompletion {
        pub(crate) fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing(detail: &str) -> Self {
            Self {
                reply: Err(detail.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletion {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(Error::Upstream)
        }
    }

    pub(crate) fn manager(
        store: &Store,
        completion: Arc<dyn CompletionService>,
        uploads: &std::path::Path,
    ) -> Manager {
        let repo: Arc<dyn Repository> = Arc::new(store.clone());
        Manager::new(
            repo.clone(),
            AuthService::new(repo.clone(), "test-secret").with_password_params(cheap_params()),
            ProfileManager::new(
                repo,
                Arc::new(LocalBlobStore::new(uploads)),
                "http://localhost:5000",
            ),
            completion,
        )
    }

    #[tokio::test]
    async fn successful_chat_is_logged_once() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let completion = Arc::new(ScriptedCompletion::replying("Hi there"));
        let manager = manager(&store, completion.clone(), dir.path());

        let user = manager.auth().signup("alice", "a@x.com", "pw").await.unwrap();
        let reply = manager.chat(user, "hello").await.unwrap();
        assert_eq!(reply, "Hi there");

        let logged = store.exchanges_for(user).await.unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].user_message, "hello");
        assert_eq!(logged[0].bot_response, "Hi there");
    }

    #[tokio::test]
    async fn failed_chat_logs_nothing() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(
            &store,
            Arc::new(ScriptedCompletion::failing("quota exceeded")),
            dir.path(),
        );

        let user = manager.auth().signup("alice", "a@x.com", "pw").await.unwrap();
        assert!(matches!(
            manager.chat(user, "hello").await,
            Err(Error::Upstream(_))
        ));
        assert!(store.exchanges_for(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_message_never_reaches_the_service() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let completion = Arc::new(ScriptedCompletion::replying("unused"));
        let manager = manager(&store, completion.clone(), dir.path());

        assert!(matches!(
            manager.chat(UserId::new(), "   ").await,
            Err(Error::Validation(_))
        ));
        assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
    }
}
