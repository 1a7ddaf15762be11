//! HTTP/JSON surface of the daemon.

mod extract;
mod handlers;
pub mod server;

pub use extract::BearerUser;
pub use server::{ApiServer, ApiState, ServerOptions};
