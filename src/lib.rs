//! Presence, typing relay and delivery-state tracking for two-party direct
//! messages, served over WebSocket and a small REST surface.

pub mod auth;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod messages;
pub mod models;
pub mod presence;
pub mod registry;
pub mod server;
pub mod store;
pub mod typing;

pub use config::Config;
pub use error::ChatError;
pub use server::Server;
