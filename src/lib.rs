//! Jarvis: a chat assistant daemon and its terminal client.
//!
//! The daemon (`jarvis`) owns accounts, profiles and the completion service.
//! The client (`jarvis-chat`) keeps conversations locally and talks to the
//! daemon over HTTP.

pub mod agent;
pub mod api;
pub mod auth;
pub mod blob;
pub mod chat;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod interface;
pub mod manager;
pub mod profile;
pub mod store;
