//! Client side: the conversation state kept on the user's device, and the
//! HTTP client it uses to reach the daemon.

pub mod api;
pub mod cache;
pub mod conversation;
pub mod error;
pub mod markup;
pub mod state;

pub use api::ApiClient;
pub use cache::{FileStore, KeyValueStore, MemoryStore};
pub use conversation::{Conversation, ConversationSet, Direction, Turn};
pub use error::ClientError;
pub use markup::markup;
pub use state::{ChatBackend, ConversationManager};
