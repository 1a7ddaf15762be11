//! Conversation state for the signed-in user.
//!
//! The manager owns the in-memory [`ConversationSet`], writes it through to a
//! [`KeyValueStore`] after every change, and sends messages through a
//! [`ChatBackend`]. At most one send per conversation is in flight; a second
//! one is refused with [`ClientError::Busy`].

use super::{
    cache::KeyValueStore,
    conversation::{Conversation, ConversationSet, Direction, Turn},
    error::ClientError,
    markup::markup,
};
use crate::entity::UserId;
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

pub const IDENTITY_REPLY: &str = "**I am Jarvis, your AI assistant.**";

const IDENTITY_PHRASES: [&str; 3] = [
    "what is your name",
    "who are you",
    "what everyone calls you",
];

/// Questions about the assistant itself get a fixed answer.
pub fn is_identity_question(text: &str) -> bool {
    let text = text.to_lowercase();
    IDENTITY_PHRASES.iter().any(|phrase| text.contains(phrase))
}

/// Where a message goes to get a reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, message: &str) -> Result<String, ClientError>;
}

#[derive(Debug, Default)]
struct Session {
    user: Option<UserId>,
    conversations: ConversationSet,
    selected: Option<String>,
}

type InFlightSet = Arc<StdMutex<HashSet<Uuid>>>;

/// Marks a conversation as awaiting a reply until dropped.
struct InFlight {
    set: InFlightSet,
    id: Uuid,
}

impl InFlight {
    fn acquire(set: &InFlightSet, id: Uuid) -> Option<Self> {
        let mut ids = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            id,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut ids = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        ids.remove(&self.id);
    }
}

pub struct ConversationManager {
    backend: Arc<dyn ChatBackend>,
    cache: Arc<dyn KeyValueStore>,
    reply_timeout: Duration,
    session: Mutex<Session>,
    in_flight: InFlightSet,
}

fn cache_key(user: UserId) -> String {
    format!("conversations:{user}")
}

fn corrupt_key(user: UserId) -> String {
    format!("conversations:{user}:corrupt")
}

impl ConversationManager {
    pub fn new(backend: Arc<dyn ChatBackend>, cache: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            cache,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            session: Mutex::new(Session::default()),
            in_flight: Arc::default(),
        }
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Load `user`'s cached conversations, replacing whatever is in memory.
    /// Nothing is fetched from the server.
    ///
    /// A cache entry that no longer parses is moved aside and the user starts
    /// with no conversations. A cache that cannot be read at all is an error
    /// and leaves the session untouched.
    pub async fn reconcile_on_login(&self, user: UserId) -> Result<(), ClientError> {
        let key = cache_key(user);
        let conversations: ConversationSet = match self.cache.get(&key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(conversations) => conversations,
                Err(e) => {
                    warn!(user_id = %user, error = %e, "cached conversations are corrupt, starting empty");
                    self.cache.set(&corrupt_key(user), &raw).await?;
                    self.cache.remove(&key).await?;
                    ConversationSet::new()
                }
            },
            None => ConversationSet::new(),
        };

        let mut session = self.session.lock().await;
        info!(user_id = %user, conversations = conversations.len(), "loaded conversations");
        *session = Session {
            user: Some(user),
            conversations,
            selected: None,
        };
        Ok(())
    }

    /// Forget the in-memory state. The cache is kept for the next login.
    pub async fn logout(&self) {
        let mut session = self.session.lock().await;
        if let Some(user) = session.user {
            info!(user_id = %user, "logged out");
        }
        *session = Session::default();
    }

    pub async fn create_conversation(&self) -> String {
        let mut session = self.session.lock().await;
        let name = session.conversations.next_name();
        session
            .conversations
            .insert(name.clone(), Conversation::default());
        session.selected = Some(name.clone());
        self.persist(&session).await;
        name
    }

    pub async fn select_conversation(&self, name: &str) -> Result<(), ClientError> {
        let mut session = self.session.lock().await;
        if !session.conversations.contains(name) {
            return Err(ClientError::UnknownConversation(name.to_string()));
        }
        session.selected = Some(name.to_string());
        Ok(())
    }

    /// Remove `name` if present. Deleting the selected conversation selects
    /// the first remaining one.
    pub async fn delete_conversation(&self, name: &str) {
        let mut session = self.session.lock().await;
        if session.conversations.remove(name).is_none() {
            return;
        }
        if session.selected.as_deref() == Some(name) {
            session.selected = session.conversations.first_name().map(str::to_string);
        }
        self.persist(&session).await;
    }

    /// Append `text` to the selected conversation and wait for the reply.
    ///
    /// The sent turn is stored before anything can fail. On failure no reply
    /// turn is added and the conversation is released for the next send.
    pub async fn send_message(&self, text: &str) -> Result<Turn, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let (user, id, name, _in_flight) = {
            let mut session = self.session.lock().await;
            let name = session
                .selected
                .clone()
                .ok_or(ClientError::NoConversationSelected)?;
            let id = session
                .conversations
                .id_of(&name)
                .ok_or_else(|| ClientError::UnknownConversation(name.clone()))?;
            let in_flight = InFlight::acquire(&self.in_flight, id)
                .ok_or_else(|| ClientError::Busy(name.clone()))?;

            if let Some(conversation) = session.conversations.get_by_id_mut(id) {
                conversation.push(Direction::Sent, text, Utc::now());
            }
            self.persist(&session).await;

            (session.user, id, name, in_flight)
        };

        let reply = if is_identity_question(text) {
            debug!(conversation = %name, "answering identity question locally");
            IDENTITY_REPLY.to_string()
        } else {
            match tokio::time::timeout(self.reply_timeout, self.backend.chat(text)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    warn!(conversation = %name, error = %e, "reply failed");
                    return Err(e);
                }
                Err(_) => {
                    warn!(conversation = %name, timeout = ?self.reply_timeout, "reply timed out");
                    return Err(ClientError::Timeout);
                }
            }
        };

        let mut session = self.session.lock().await;
        // The user may have logged out or deleted the conversation meanwhile.
        if session.user != user {
            return Err(ClientError::UnknownConversation(name));
        }
        // A conversation created later under the same name is a different one.
        let Some(conversation) = session.conversations.get_by_id_mut(id) else {
            debug!(conversation = %name, "dropping reply for deleted conversation");
            return Err(ClientError::UnknownConversation(name));
        };
        let turn = conversation
            .push(Direction::Received, markup(&reply), Utc::now())
            .clone();
        self.persist(&session).await;
        Ok(turn)
    }

    /// Names of conversations whose turns contain `term`, in creation order.
    /// An empty term matches everything.
    pub async fn search(&self, term: &str) -> Vec<String> {
        let session = self.session.lock().await;
        let term = term.trim();
        session
            .conversations
            .iter()
            .filter(|(_, conversation)| term.is_empty() || conversation.mentions(term))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub async fn conversations(&self) -> ConversationSet {
        self.session.lock().await.conversations.clone()
    }

    pub async fn conversation(&self, name: &str) -> Option<Conversation> {
        self.session.lock().await.conversations.get(name).cloned()
    }

    pub async fn selected(&self) -> Option<String> {
        self.session.lock().await.selected.clone()
    }

    pub async fn active_user(&self) -> Option<UserId> {
        self.session.lock().await.user
    }

    /// Whether any conversation is waiting for a reply.
    pub fn pending(&self) -> bool {
        !self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub async fn is_pending(&self, name: &str) -> bool {
        let Some(id) = self.session.lock().await.conversations.id_of(name) else {
            return false;
        };
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    async fn persist(&self, session: &Session) {
        let Some(user) = session.user else {
            return;
        };

        let result = match serde_json::to_string(&session.conversations) {
            Ok(json) => self.cache.set(&cache_key(user), &json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(user_id = %user, error = %e, "failed to cache conversations");
        }
    }
}
