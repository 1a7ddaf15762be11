//! Adapter for the external text-generation service.

pub mod gemini;

use crate::error::Result;
use async_trait::async_trait;

pub use gemini::GeminiClient;

/// Reply used when the service answers without any candidate text.
pub const FALLBACK_RESPONSE: &str = "Sorry, I couldn't generate a response.";

/// One prompt in, one reply out. No conversation context is sent; every
/// call is independent from the model's point of view.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Fails with [`crate::error::Error::Upstream`] on any transport or API
    /// failure. Callers do not retry.
    async fn complete(&self, prompt: &str) -> Result<String>;
}
